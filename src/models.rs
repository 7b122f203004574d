use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Cell text written for rows that failed validation
pub const MISSING_DATA_MARKER: &str = "Error: Missing data";
/// Cell text written for rows whose worker crashed
pub const PROCESSING_FAILED_MARKER: &str = "Error: Processing failed";

/// A single field of the judge's output contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalField {
    ReasoningOfMetricsAndCorrectness,
    LanguageQuality,
    OverallCorrectness,
    InstructionFollowing,
    ConstrainsAdherence,
    LogicalConsistency,
    FinalSolutionCorrectness,
    OverallScore,
}

impl EvalField {
    /// Column name / JSON key of the field
    pub fn key(self) -> &'static str {
        match self {
            Self::ReasoningOfMetricsAndCorrectness => "reasoning_of_metrics_and_correctness",
            Self::LanguageQuality => "language_quality",
            Self::OverallCorrectness => "overall_correctness",
            Self::InstructionFollowing => "instruction_following",
            Self::ConstrainsAdherence => "constrains_adherence",
            Self::LogicalConsistency => "logical_consistency",
            Self::FinalSolutionCorrectness => "final_solution_correctness",
            Self::OverallScore => "overall_score",
        }
    }

    /// Whether the judge must answer this field with a number
    pub fn is_numeric(self) -> bool {
        !matches!(self, Self::ReasoningOfMetricsAndCorrectness)
    }
}

impl fmt::Display for EvalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

const BASIC_FIELDS: [EvalField; 5] = [
    EvalField::ReasoningOfMetricsAndCorrectness,
    EvalField::LanguageQuality,
    EvalField::OverallCorrectness,
    EvalField::InstructionFollowing,
    EvalField::OverallScore,
];

const REASONING_FIELDS: [EvalField; 8] = [
    EvalField::ReasoningOfMetricsAndCorrectness,
    EvalField::LanguageQuality,
    EvalField::OverallCorrectness,
    EvalField::InstructionFollowing,
    EvalField::ConstrainsAdherence,
    EvalField::LogicalConsistency,
    EvalField::FinalSolutionCorrectness,
    EvalField::OverallScore,
];

/// Output contract the judge has to honor for a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeMode {
    Basic,
    ReasoningExtended,
}

impl JudgeMode {
    /// Fields of this contract, in output column order
    pub fn fields(self) -> &'static [EvalField] {
        match self {
            Self::Basic => &BASIC_FIELDS,
            Self::ReasoningExtended => &REASONING_FIELDS,
        }
    }

    pub fn column_names(self) -> Vec<&'static str> {
        self.fields().iter().map(|f| f.key()).collect()
    }
}

impl fmt::Display for JudgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic => f.write_str("basic"),
            Self::ReasoningExtended => f.write_str("reasoning"),
        }
    }
}

/// Value of one evaluation field after normalization
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    /// Value extracted from the judge payload
    Value(Value),
    /// Field could not be extracted
    Absent,
    /// Row failed validation and was never judged
    MissingData,
    /// Worker failed before producing a result
    ProcessingFailed,
}

impl Metric {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Value(Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }

    /// Text written to the output cell
    pub fn to_cell(&self) -> String {
        match self {
            Self::Value(Value::String(s)) => s.clone(),
            Self::Value(other) => other.to_string(),
            Self::Absent => String::new(),
            Self::MissingData => MISSING_DATA_MARKER.to_string(),
            Self::ProcessingFailed => PROCESSING_FAILED_MARKER.to_string(),
        }
    }
}

/// Evaluation of one row, holding exactly the fields of its mode in column order
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    metrics: Vec<(EvalField, Metric)>,
}

impl EvaluationResult {
    /// Result with every field of `mode` set to the same metric
    pub fn filled(mode: JudgeMode, metric: Metric) -> Self {
        Self::from_fn(mode, |_| metric.clone())
    }

    pub fn absent(mode: JudgeMode) -> Self {
        Self::filled(mode, Metric::Absent)
    }

    pub fn missing_data(mode: JudgeMode) -> Self {
        Self::filled(mode, Metric::MissingData)
    }

    pub fn processing_failed(mode: JudgeMode) -> Self {
        Self::filled(mode, Metric::ProcessingFailed)
    }

    pub fn from_fn(mode: JudgeMode, mut f: impl FnMut(EvalField) -> Metric) -> Self {
        let metrics = mode.fields().iter().map(|&field| (field, f(field))).collect();
        Self { metrics }
    }

    #[cfg(test)]
    pub fn get(&self, field: EvalField) -> Option<&Metric> {
        self.metrics
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, m)| m)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EvalField, &Metric)> {
        self.metrics.iter().map(|(f, m)| (*f, m))
    }

    /// Output cells in column order
    pub fn cells(&self) -> Vec<String> {
        self.metrics.iter().map(|(_, m)| m.to_cell()).collect()
    }
}
