use crate::client::ChatBackend;
use crate::config::Config;
use crate::generate::Generator;
use crate::judge::JudgeClient;
use crate::models::JudgeMode;
use crate::processor::{RowProcessor, TableReport};
use crate::stages::{self, EXTRACTED_REFERENCES, PREPARED_REFERENCES, ReferenceColumn};
use crate::table::{Table, TableError, TableWriter};
use crate::validation::{INSTRUCTION, SYSTEM};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Pipeline stage a table was processed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Prepare,
    Generate,
    Extract,
    Judge,
}

/// Whether a table made it to its output file
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableStatus {
    Written { rows: usize },
    Skipped { reason: String },
}

/// Outcome of one table in one stage
#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub stage: Stage,
    pub input: PathBuf,
    pub output: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<JudgeMode>,
    #[serde(flatten)]
    pub status: TableStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<TableReport>,
}

impl TableSummary {
    fn new(stage: Stage, input: &Path, output: &Path, status: TableStatus) -> Self {
        Self {
            stage,
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            mode: None,
            status,
            report: None,
        }
    }

    fn from_rows(stage: Stage, input: &Path, output: &Path, rows: Result<usize, TableError>) -> Self {
        let status = match rows {
            Ok(rows) => TableStatus::Written { rows },
            Err(e) => {
                tracing::error!(table = %input.display(), error = %e, "table skipped");
                TableStatus::Skipped {
                    reason: e.to_string(),
                }
            }
        };
        Self::new(stage, input, output, status)
    }
}

/// Drives the pipeline stages over the configured directories
pub struct Runner {
    config: Config,
}

impl Runner {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Copy the raw benchmarks, adding `References` to reference benchmarks
    pub fn prepare(&self) -> Result<Vec<TableSummary>> {
        let paths = &self.config.paths;
        ensure_directory_exists(&paths.prepared_dir)?;

        Ok(self.convert_benchmarks(Stage::Prepare, |name| {
            (
                paths.raw_dir.join(name),
                paths.prepared_dir.join(format!("prepared_{name}")),
                PREPARED_REFERENCES,
            )
        }))
    }

    /// Copy evaluated benchmarks, adding `model_References` to reference benchmarks
    pub fn extract(&self) -> Result<Vec<TableSummary>> {
        let paths = &self.config.paths;
        ensure_directory_exists(&paths.extracted_dir)?;

        Ok(self.convert_benchmarks(Stage::Extract, |name| {
            (
                paths.evaluated_dir.join(format!("evaluated_{name}")),
                paths.extracted_dir.join(format!("extracted_evaluated_{name}")),
                EXTRACTED_REFERENCES,
            )
        }))
    }

    fn convert_benchmarks(
        &self,
        stage: Stage,
        locate: impl Fn(&str) -> (PathBuf, PathBuf, ReferenceColumn),
    ) -> Vec<TableSummary> {
        let benchmarks = &self.config.benchmarks;
        let reference = benchmarks.reference_files.iter().map(|n| (n, true));
        let normal = benchmarks.normal_files.iter().map(|n| (n, false));

        let mut summaries = Vec::new();
        for (name, is_reference) in reference.chain(normal) {
            let (input, output, column) = locate(name.as_str());
            if !input.exists() {
                tracing::warn!(table = %input.display(), "benchmark file not found");
                summaries.push(TableSummary::new(
                    stage,
                    &input,
                    &output,
                    TableStatus::Skipped {
                        reason: "file not found".to_string(),
                    },
                ));
                continue;
            }

            let rows = stages::copy_table(&input, &output, is_reference.then_some(column));
            if rows.is_ok() {
                tracing::info!(table = %input.display(), output = %output.display(), "saved");
            }
            summaries.push(TableSummary::from_rows(stage, &input, &output, rows));
        }
        summaries
    }

    /// Collect answers of the model under test for every prepared table
    pub async fn generate(&self, backend: Arc<dyn ChatBackend>) -> Result<Vec<TableSummary>> {
        let paths = &self.config.paths;
        ensure_directory_exists(&paths.evaluated_dir)?;

        tracing::info!(model = backend.model(), "generating with model under test");
        let generator = Generator::new(backend, self.config.generator.api.sampling());
        let mut summaries = Vec::new();

        for input in discover_tables(&paths.prepared_dir)? {
            let output = output_path(&input, &paths.evaluated_dir, "prepared_", "evaluated_");
            tracing::info!(table = %input.display(), "generating responses");

            let rows = generator.process_table(&input, &output).await;
            summaries.push(TableSummary::from_rows(Stage::Generate, &input, &output, rows));
        }

        Ok(summaries)
    }

    /// Judge every extracted table, one table at a time
    pub async fn judge(&self, backend: Arc<dyn ChatBackend>) -> Result<Vec<TableSummary>> {
        let paths = &self.config.paths;
        ensure_directory_exists(&paths.judged_dir)?;

        let judge = Arc::new(JudgeClient::new(backend, self.config.judge.api.sampling()));
        tracing::info!(
            model = judge.model(),
            max_workers = self.config.judge.max_workers,
            "judging extracted tables"
        );
        let processor = RowProcessor::new(judge, self.config.judge.max_workers);
        let mut summaries = Vec::new();

        for input in discover_tables(&paths.extracted_dir)? {
            let output = output_path(&input, &paths.judged_dir, "evaluated_", "judged_evaluated_");
            let mode = self.mode_for(&input);
            tracing::info!(table = %input.display(), %mode, "judging table");

            let mut summary = match self.judge_table(&processor, &input, &output, mode).await {
                Ok(report) => {
                    tracing::info!(
                        table = %input.display(),
                        output = %output.display(),
                        rows = report.rows,
                        "processed"
                    );
                    let rows = report.rows;
                    TableSummary {
                        report: Some(report),
                        ..TableSummary::new(Stage::Judge, &input, &output, TableStatus::Written { rows })
                    }
                }
                Err(e) => TableSummary::from_rows(Stage::Judge, &input, &output, Err(e)),
            };
            summary.mode = Some(mode);
            summaries.push(summary);
        }

        Ok(summaries)
    }

    async fn judge_table(
        &self,
        processor: &RowProcessor,
        input: &Path,
        output: &Path,
        mode: JudgeMode,
    ) -> Result<TableReport, TableError> {
        let table = Table::read_path(input)?;
        table.schema().require(&[INSTRUCTION, SYSTEM])?;
        if table.is_empty() {
            tracing::warn!(table = %input.display(), "table has no rows");
        } else {
            tracing::debug!(table = %input.display(), rows = table.len(), "table loaded");
        }

        let mut writer = TableWriter::create(output, table.schema(), &mode.column_names())?;
        processor.process(table, mode, &mut writer).await
    }

    /// Contract used for the table at `path`
    pub fn mode_for(&self, path: &Path) -> JudgeMode {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if self.config.benchmarks.is_reasoning_table(name) {
            JudgeMode::ReasoningExtended
        } else {
            JudgeMode::Basic
        }
    }
}

/// All `*.csv` files directly inside `dir`, sorted
pub fn discover_tables(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = dir.join("*.csv");
    let pattern = pattern
        .to_str()
        .with_context(|| format!("Directory is not valid UTF-8: {}", dir.display()))?;

    let mut tables = Vec::new();
    for entry in glob::glob(pattern).context("Invalid table pattern")? {
        match entry {
            Ok(path) => tables.push(path),
            Err(e) => tracing::warn!(error = %e, "cannot read directory entry"),
        }
    }
    tables.sort();
    Ok(tables)
}

/// Output path in `dir` with every `from` in the file name replaced by `to`
pub fn output_path(input: &Path, dir: &Path, from: &str, to: &str) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().replace(from, to))
        .unwrap_or_default();
    dir.join(name)
}

/// Ensure the output directory exists
fn ensure_directory_exists(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))
}
