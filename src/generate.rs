use crate::client::{ChatBackend, ChatRequest, ClientError, Sampling};
use crate::models::MISSING_DATA_MARKER;
use crate::table::{Row, Table, TableError, TableWriter};
use crate::validation::{INSTRUCTION, MODEL_OUTPUT, SYSTEM};
use std::path::Path;
use std::sync::Arc;

/// Cell written when the model under test could not answer
pub const GENERATION_FAILED_MARKER: &str = "Error generating response";

/// Collects answers of the model under test, one row at a time
pub struct Generator {
    backend: Arc<dyn ChatBackend>,
    sampling: Sampling,
}

impl Generator {
    pub fn new(backend: Arc<dyn ChatBackend>, sampling: Sampling) -> Self {
        Self { backend, sampling }
    }

    /// Send the row's system message and instruction to the model
    pub async fn generate_response(&self, system: &str, instruction: &str) -> Result<String, ClientError> {
        let request = ChatRequest {
            system: system.to_string(),
            user: instruction.to_string(),
            sampling: self.sampling.clone(),
            json_response: false,
        };
        self.backend.complete(&request).await
    }

    /// Answer every row of `input` and write it with a `model_generated_output`
    /// column to `output`. Returns the number of rows written.
    pub async fn process_table(&self, input: &Path, output: &Path) -> Result<usize, TableError> {
        let table = Table::read_path(input)?;
        table.schema().require(&[INSTRUCTION, SYSTEM])?;

        let mut writer = TableWriter::create(output, table.schema(), &[MODEL_OUTPUT])?;
        for (index, row) in table.rows().iter().enumerate() {
            let answer = self.answer_row(index, row).await;
            writer.write_row(row, [answer])?;
        }
        writer.flush()?;

        Ok(writer.rows_written())
    }

    async fn answer_row(&self, index: usize, row: &Row) -> String {
        let (Some(system), Some(instruction)) = (row.non_empty(SYSTEM), row.non_empty(INSTRUCTION))
        else {
            tracing::warn!(row = index, "missing 'Instruction' or 'System'");
            return MISSING_DATA_MARKER.to_string();
        };

        match self.generate_response(system, instruction).await {
            Ok(answer) => {
                tracing::info!(row = index, id = row.get("ID").unwrap_or("N/A"), "generated response");
                answer
            }
            Err(e) => {
                tracing::error!(row = index, error = %e, "error generating response");
                GENERATION_FAILED_MARKER.to_string()
            }
        }
    }
}
