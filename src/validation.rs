use crate::judge::JudgeInput;
use crate::table::Row;

pub const SYSTEM: &str = "System";
pub const INSTRUCTION: &str = "Instruction";
pub const CHOSEN: &str = "Chosen";
pub const MODEL_OUTPUT: &str = "model_generated_output";

/// Row lacks data the judge cannot do without
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing {}", .missing.join(", "))]
pub struct ValidationError {
    pub missing: Vec<&'static str>,
}

/// Check that a row can be judged and collect the judge's inputs
pub fn judge_input(row: &Row) -> Result<JudgeInput, ValidationError> {
    let missing: Vec<&'static str> = [INSTRUCTION, MODEL_OUTPUT]
        .into_iter()
        .filter(|column| row.non_empty(column).is_none())
        .collect();

    if !missing.is_empty() {
        return Err(ValidationError { missing });
    }

    let text = |column: &str| row.get(column).unwrap_or_default().to_string();
    Ok(JudgeInput {
        system: text(SYSTEM),
        instruction: text(INSTRUCTION),
        reference: text(CHOSEN),
        candidate: text(MODEL_OUTPUT),
    })
}
