//! Concurrent judging of one table.
//!
//! Every row becomes one task on a [`JoinSet`]; a [`Semaphore`] caps how many of
//! them talk to the judge at once. The loop draining the set is the only code that
//! touches the output writer, so rows are written in completion order without
//! any locking around the file.

use crate::client::ClientError;
use crate::judge::{JudgeClient, JudgeInput};
use crate::models::{EvaluationResult, JudgeMode};
use crate::normalize::{self, MalformedPayload};
use crate::stats::{MetricStatistics, ScoreCollector};
use crate::table::{Table, TableError, TableWriter};
use crate::validation;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Why a judged row ended up without scores
#[derive(Debug, thiserror::Error)]
pub enum JudgeFailure {
    #[error("judge call failed: {0}")]
    JudgeCallFailed(#[from] ClientError),

    #[error("malformed judge payload: {0}")]
    MalformedPayload(#[from] MalformedPayload),
}

/// How a row's evaluation came about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Judged,
    MissingData,
    JudgeFailed,
    ProcessingFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowState {
    Pending,
    Dispatched,
    Completed,
    Failed,
    Merged,
}

/// Counts and statistics of one processed table
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableReport {
    pub rows: usize,
    pub judged: usize,
    pub missing_data: usize,
    pub judge_failed: usize,
    pub processing_failed: usize,
    pub statistics: Vec<MetricStatistics>,
}

impl TableReport {
    fn record(&mut self, outcome: RowOutcome) {
        self.rows += 1;
        match outcome {
            RowOutcome::Judged => self.judged += 1,
            RowOutcome::MissingData => self.missing_data += 1,
            RowOutcome::JudgeFailed => self.judge_failed += 1,
            RowOutcome::ProcessingFailed => self.processing_failed += 1,
        }
    }
}

/// Fans judge calls for a table out over a bounded pool of tasks
pub struct RowProcessor {
    judge: Arc<JudgeClient>,
    max_workers: usize,
}

impl RowProcessor {
    pub fn new(judge: Arc<JudgeClient>, max_workers: usize) -> Self {
        Self {
            judge,
            max_workers: max_workers.max(1),
        }
    }

    /// Judge every row of `table` and write each merged row as soon as it completes.
    ///
    /// Only writer errors are returned; row-level failures are recorded in the row
    /// itself and in the report.
    pub async fn process<W: Write>(
        &self,
        table: Table,
        mode: JudgeMode,
        writer: &mut TableWriter<W>,
    ) -> Result<TableReport, TableError> {
        let rows = table.into_rows();
        let mut states = vec![RowState::Pending; rows.len()];
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut join_set = JoinSet::new();
        let mut task_rows = HashMap::with_capacity(rows.len());

        for (index, row) in rows.iter().enumerate() {
            let input = validation::judge_input(row);
            let judge = self.judge.clone();
            let semaphore = semaphore.clone();

            let handle = join_set.spawn(async move {
                match input {
                    Err(e) => {
                        tracing::warn!(row = index, error = %e, "skipping row with missing data");
                        (EvaluationResult::missing_data(mode), RowOutcome::MissingData)
                    }
                    Ok(input) => {
                        let Ok(_permit) = semaphore.acquire().await else {
                            tracing::error!(row = index, "worker pool closed");
                            return (
                                EvaluationResult::processing_failed(mode),
                                RowOutcome::ProcessingFailed,
                            );
                        };
                        match judge_row(&judge, &input, mode).await {
                            Ok(result) => (result, RowOutcome::Judged),
                            Err(e) => {
                                tracing::error!(row = index, error = %e, "judging failed");
                                (EvaluationResult::absent(mode), RowOutcome::JudgeFailed)
                            }
                        }
                    }
                }
            });
            task_rows.insert(handle.id(), index);
            states[index] = RowState::Dispatched;
        }

        let mut report = TableReport::default();
        let mut scores = ScoreCollector::new(mode);

        while let Some(joined) = join_set.join_next_with_id().await {
            let (index, result, outcome) = match joined {
                Ok((id, (result, outcome))) => {
                    let index = task_rows[&id];
                    states[index] = RowState::Completed;
                    (index, result, outcome)
                }
                Err(e) => {
                    let index = task_rows[&e.id()];
                    states[index] = RowState::Failed;
                    tracing::error!(row = index, error = %e, "row processing failed");
                    (
                        index,
                        EvaluationResult::processing_failed(mode),
                        RowOutcome::ProcessingFailed,
                    )
                }
            };

            debug_assert_ne!(states[index], RowState::Merged);
            writer.write_row(&rows[index], result.cells())?;
            states[index] = RowState::Merged;

            scores.push(&result);
            report.record(outcome);
            tracing::debug!(row = index, outcome = ?outcome, "row merged");
        }

        writer.flush()?;
        debug_assert!(states.iter().all(|s| *s == RowState::Merged));

        report.statistics = scores.finish();
        Ok(report)
    }
}

/// One judge call followed by normalization of its payload
async fn judge_row(
    judge: &JudgeClient,
    input: &JudgeInput,
    mode: JudgeMode,
) -> Result<EvaluationResult, JudgeFailure> {
    let payload = judge.judge(input, mode).await?;
    Ok(normalize::normalize(&payload, mode)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ChatBackend, ChatRequest, Sampling};
    use crate::models::{EvalField, MISSING_DATA_MARKER, PROCESSING_FAILED_MARKER};
    use async_trait::async_trait;
    use rand::Rng;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Echoes the instruction back as the reasoning, after a random delay
    struct EchoBackend {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        max_delay_ms: u64,
    }

    impl EchoBackend {
        fn new(max_delay_ms: u64) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                max_delay_ms,
            }
        }
    }

    fn instruction_of(request: &ChatRequest) -> String {
        request
            .user
            .lines()
            .skip_while(|l| *l != "User Instruction:")
            .nth(1)
            .unwrap_or_default()
            .to_string()
    }

    #[async_trait]
    impl ChatBackend for EchoBackend {
        fn model(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: &ChatRequest) -> Result<String, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = rand::thread_rng().gen_range(0..=self.max_delay_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let instruction = instruction_of(request);
            if instruction.starts_with("panic") {
                panic!("backend exploded for {instruction}");
            }
            if instruction.starts_with("garbage") {
                return Ok("not json at all".to_string());
            }
            if instruction.starts_with("offline") {
                return Err(ClientError::EmptyResponse);
            }

            Ok(serde_json::json!({
                "reasoning_of_metrics_and_correctness": instruction,
                "language_quality": 90,
                "overall_correctness": 80,
                "instruction_following": 70,
                "constrains_adherence": 60,
                "logical_consistency": 50,
                "final_solution_correctness": 40,
                "overall_score": 75
            })
            .to_string())
        }
    }

    fn processor(backend: Arc<EchoBackend>, max_workers: usize) -> RowProcessor {
        let sampling = Sampling {
            temperature: 0.01,
            top_p: 0.1,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop: vec![],
        };
        RowProcessor::new(Arc::new(JudgeClient::new(backend, sampling)), max_workers)
    }

    fn synthetic_table(instructions: &[String]) -> Table {
        let mut csv = String::from("ID;System;Instruction;Chosen;model_generated_output;Extra\n");
        for (i, instruction) in instructions.iter().enumerate() {
            csv.push_str(&format!("{i};sys;{instruction};ref {i};out {i};keep-{i}\n"));
        }
        Table::read_from(csv.as_bytes()).unwrap()
    }

    async fn run(
        processor: &RowProcessor,
        table: Table,
        mode: JudgeMode,
    ) -> (TableReport, Table) {
        let mut writer =
            TableWriter::new(Vec::new(), table.schema(), &mode.column_names()).unwrap();
        let report = processor.process(table, mode, &mut writer).await.unwrap();
        let bytes = writer.into_inner().unwrap();
        (report, Table::read_from(bytes.as_slice()).unwrap())
    }

    #[tokio::test]
    async fn test_every_row_accounted_for_exactly_once() {
        let tokens: Vec<String> = (0..250).map(|i| format!("token-{i:04}")).collect();
        let backend = Arc::new(EchoBackend::new(20));
        let processor = processor(backend.clone(), 100);

        let (report, output) = run(&processor, synthetic_table(&tokens), JudgeMode::Basic).await;

        assert_eq!(report.rows, 250);
        assert_eq!(report.judged, 250);
        assert_eq!(output.len(), 250);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 250);

        let mut seen = HashSet::new();
        for row in output.rows() {
            let token = row.get("Instruction").unwrap();
            assert!(seen.insert(token.to_string()), "duplicate row {token}");
            // the judge's echo landed on the row it was asked about
            assert_eq!(row.get("reasoning_of_metrics_and_correctness"), Some(token));
            let id = token.trim_start_matches("token-").parse::<usize>().unwrap();
            assert_eq!(row.get("ID"), Some(id.to_string().as_str()));
            assert_eq!(row.get("Extra").unwrap(), format!("keep-{id}"));
            assert_eq!(row.get("Chosen").unwrap(), format!("ref {id}"));
            assert_eq!(row.get("overall_score"), Some("75"));
        }
        assert_eq!(seen.len(), 250);
    }

    #[tokio::test]
    async fn test_worker_cap_is_respected() {
        let tokens: Vec<String> = (0..40).map(|i| format!("row-{i}")).collect();
        let backend = Arc::new(EchoBackend::new(10));
        let processor = processor(backend.clone(), 4);

        let (report, _) = run(&processor, synthetic_table(&tokens), JudgeMode::Basic).await;

        assert_eq!(report.rows, 40);
        assert!(backend.max_in_flight.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_single_worker_holds_its_permit_for_the_whole_call() {
        let tokens: Vec<String> = (0..20).map(|i| format!("row-{i}")).collect();
        let backend = Arc::new(EchoBackend::new(5));
        let processor = processor(backend.clone(), 1);

        let (report, _) = run(&processor, synthetic_table(&tokens), JudgeMode::Basic).await;

        assert_eq!(report.judged, 20);
        assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_data_rows_skip_the_judge() {
        let csv = "System;Instruction;Chosen;model_generated_output\n\
                   sys;first;ref;out\n\
                   sys;;ref;out\n\
                   sys;third;ref;\n";
        let table = Table::read_from(csv.as_bytes()).unwrap();
        let backend = Arc::new(EchoBackend::new(0));
        let processor = processor(backend.clone(), 10);

        let (report, output) = run(&processor, table, JudgeMode::ReasoningExtended).await;

        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.missing_data, 2);
        assert_eq!(report.judged, 1);
        assert_eq!(output.len(), 3);

        for row in output.rows().iter().filter(|r| r.get("Instruction") != Some("first")) {
            for field in JudgeMode::ReasoningExtended.fields() {
                assert_eq!(row.get(field.key()), Some(MISSING_DATA_MARKER));
            }
        }
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let instructions: Vec<String> = ["fine-1", "garbage-2", "offline-3", "panic-4", "fine-5"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let backend = Arc::new(EchoBackend::new(5));
        let processor = processor(backend, 10);

        let (report, output) =
            run(&processor, synthetic_table(&instructions), JudgeMode::Basic).await;

        assert_eq!(report.rows, 5);
        assert_eq!(report.judged, 2);
        assert_eq!(report.judge_failed, 2);
        assert_eq!(report.processing_failed, 1);
        assert_eq!(output.len(), 5);

        let by_instruction = |name: &str| {
            output
                .rows()
                .iter()
                .find(|r| r.get("Instruction") == Some(name))
                .unwrap()
                .clone()
        };

        for name in ["garbage-2", "offline-3"] {
            let row = by_instruction(name);
            for field in JudgeMode::Basic.fields() {
                assert_eq!(row.get(field.key()), Some(""), "{name} {field}");
            }
        }

        let crashed = by_instruction("panic-4");
        for field in JudgeMode::Basic.fields() {
            assert_eq!(crashed.get(field.key()), Some(PROCESSING_FAILED_MARKER));
        }
        assert_eq!(crashed.get("Extra"), Some("keep-3"));

        assert_eq!(by_instruction("fine-5").get("overall_score"), Some("75"));
    }

    #[tokio::test]
    async fn test_reasoning_mode_fills_extended_fields() {
        let tokens = vec!["only".to_string()];
        let backend = Arc::new(EchoBackend::new(0));
        let processor = processor(backend, 1);

        let (report, output) =
            run(&processor, synthetic_table(&tokens), JudgeMode::ReasoningExtended).await;
        let row = &output.rows()[0];

        assert_eq!(row.get(EvalField::ConstrainsAdherence.key()), Some("60"));
        assert_eq!(row.get(EvalField::LogicalConsistency.key()), Some("50"));
        assert_eq!(row.get(EvalField::FinalSolutionCorrectness.key()), Some("40"));
        assert_eq!(report.statistics.len(), 7);
    }

    #[tokio::test]
    async fn test_basic_mode_has_no_extended_columns() {
        let tokens = vec!["only".to_string()];
        let backend = Arc::new(EchoBackend::new(0));
        let processor = processor(backend, 1);

        let (_, output) = run(&processor, synthetic_table(&tokens), JudgeMode::Basic).await;

        assert!(!output.schema().contains("constrains_adherence"));
        assert!(!output.schema().contains("logical_consistency"));
        assert!(!output.schema().contains("final_solution_correctness"));
        assert_eq!(output.schema().len(), 6 + 5);
    }

    #[tokio::test]
    async fn test_empty_table() {
        let backend = Arc::new(EchoBackend::new(0));
        let processor = processor(backend, 4);

        let (report, output) = run(&processor, synthetic_table(&[]), JudgeMode::Basic).await;

        assert_eq!(report.rows, 0);
        assert!(output.is_empty());
        assert_eq!(output.schema().len(), 11);
    }
}
