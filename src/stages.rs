//! File-conversion stages around the judge: preparing raw benchmark tables and
//! extracting reference ids from model outputs.

use crate::table::{Table, TableError, TableWriter};
use crate::validation::{CHOSEN, MODEL_OUTPUT};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

pub const REFERENCES: &str = "References";
pub const MODEL_REFERENCES: &str = "model_References";

static REFERENCE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("reference pattern is valid"));

/// Numeric ids cited as `[n]`, in order of appearance
pub fn extract_references(text: &str) -> Vec<&str> {
    REFERENCE_PATTERN
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect()
}

/// List literal written to the references column, e.g. `['1', '4']`
pub fn format_references(ids: &[&str]) -> String {
    let quoted: Vec<String> = ids.iter().map(|id| format!("'{id}'")).collect();
    format!("[{}]", quoted.join(", "))
}

/// Column derived from another column's cited reference ids
#[derive(Debug, Clone, Copy)]
pub struct ReferenceColumn {
    pub source: &'static str,
    pub target: &'static str,
}

/// Reference column added while preparing a benchmark
pub const PREPARED_REFERENCES: ReferenceColumn = ReferenceColumn {
    source: CHOSEN,
    target: REFERENCES,
};

/// Reference column added while extracting from model outputs
pub const EXTRACTED_REFERENCES: ReferenceColumn = ReferenceColumn {
    source: MODEL_OUTPUT,
    target: MODEL_REFERENCES,
};

/// Copy a table, optionally appending a reference column. Returns the row count.
pub fn copy_table(
    input: &Path,
    output: &Path,
    references: Option<ReferenceColumn>,
) -> Result<usize, TableError> {
    let table = Table::read_path(input)?;

    let extra: Vec<&str> = references.iter().map(|r| r.target).collect();
    if let Some(r) = references {
        table.schema().require(&[r.source])?;
    }

    let mut writer = TableWriter::create(output, table.schema(), &extra)?;
    for row in table.rows() {
        match references {
            Some(r) => {
                let ids = extract_references(row.get(r.source).unwrap_or_default());
                writer.write_row(row, [format_references(&ids)])?;
            }
            None => writer.write_row(row, std::iter::empty::<&str>())?,
        }
    }
    writer.flush()?;

    Ok(writer.rows_written())
}
