//! Sanitizing of judge payloads into [`EvaluationResult`]s

use crate::models::{EvalField, EvaluationResult, JudgeMode, Metric};
use serde_json::{Map, Value};

/// Payload could not be read as a JSON object at all
#[derive(Debug, thiserror::Error)]
pub enum MalformedPayload {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is JSON but not an object")]
    NotAnObject,
}

/// Parse a judge payload and extract every field of `mode`.
///
/// Each field is handled on its own: numeric fields keep only JSON numbers, the
/// reasoning field is taken as is, anything else becomes [`Metric::Absent`].
pub fn normalize(payload: &str, mode: JudgeMode) -> Result<EvaluationResult, MalformedPayload> {
    let parsed: Value = serde_json::from_str(payload)?;
    let object = parsed.as_object().ok_or(MalformedPayload::NotAnObject)?;

    Ok(EvaluationResult::from_fn(mode, |field| extract_field(object, field)))
}

fn extract_field(object: &Map<String, Value>, field: EvalField) -> Metric {
    let Some(value) = object.get(field.key()) else {
        tracing::debug!(field = field.key(), "judge payload is missing field");
        return Metric::Absent;
    };

    match value {
        Value::Null => Metric::Absent,
        Value::Number(_) => Metric::Value(value.clone()),
        _ if !field.is_numeric() => Metric::Value(value.clone()),
        other => {
            tracing::debug!(field = field.key(), value = %other, "discarding non-numeric score");
            Metric::Absent
        }
    }
}
