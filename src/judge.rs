use crate::client::{ChatBackend, ChatRequest, ClientError, Sampling};
use crate::models::{EvalField, JudgeMode};
use std::sync::Arc;

/// Inputs of one judge call, taken from a row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgeInput {
    pub system: String,
    pub instruction: String,
    /// Reference answer treated as ground truth
    pub reference: String,
    /// Answer of the model under evaluation
    pub candidate: String,
}

/// Scores candidate answers against references through a chat backend
pub struct JudgeClient {
    backend: Arc<dyn ChatBackend>,
    sampling: Sampling,
}

impl JudgeClient {
    pub fn new(backend: Arc<dyn ChatBackend>, sampling: Sampling) -> Self {
        Self { backend, sampling }
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    /// Run one judge call and return the raw payload
    pub async fn judge(&self, input: &JudgeInput, mode: JudgeMode) -> Result<String, ClientError> {
        let request = self.build_request(input, mode);
        self.backend.complete(&request).await
    }

    fn build_request(&self, input: &JudgeInput, mode: JudgeMode) -> ChatRequest {
        ChatRequest {
            system: system_prompt(mode),
            user: user_prompt(input),
            sampling: self.sampling.clone(),
            json_response: true,
        }
    }
}

/// System message fixing the output schema of `mode`
pub fn system_prompt(mode: JudgeMode) -> String {
    let keys = mode
        .fields()
        .iter()
        .map(|f| format!("'{}'", f.key()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "You should respond in JSON format with the following keys: {keys}. \
         The values should be a number between 0 and 100, except for '{reasoning}': \
         there you should think about each metric, compare the target response and the \
         generated response carefully together with the given context, and present your \
         thinking as text. You have to do your reasoning in English, regardless of the \
         language of the task.",
        reasoning = EvalField::ReasoningOfMetricsAndCorrectness.key(),
    )
}

/// User message with instructions, reference and candidate in fixed order
pub fn user_prompt(input: &JudgeInput) -> String {
    format!(
        "System Instruction:\n{}\n\
         User Instruction:\n{}\n\
         Target Response that is the wanted generated answer and should be seen as ground truth:\n{}\n\
         Model generated Response that should be evaluated against the system and user \
         instructions and compared to the Target Response:\n{}",
        input.system, input.instruction, input.reference, input.candidate
    )
}
