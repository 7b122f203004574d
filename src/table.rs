//! Semicolon-delimited benchmark tables

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Field delimiter shared by every table of the pipeline
pub const DELIMITER: u8 = b';';

/// Errors that abandon a whole table
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("cannot open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("cannot create {path}: {source}")]
    Create { path: PathBuf, source: io::Error },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("write error: {0}")]
    Io(#[from] io::Error),

    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("missing required column(s): {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("record {record} has {found} fields but the header has {expected}")]
    RaggedRecord {
        record: usize,
        found: usize,
        expected: usize,
    },
}

/// Column names of a table, trimmed and unique
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<String>,
    index: HashMap<String, usize>,
}

impl Schema {
    /// Build a schema from raw header names, trimming whitespace and a leading BOM
    pub fn new<I, S>(headers: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut columns = Vec::new();
        let mut index = HashMap::new();

        for header in headers {
            let name = header.as_ref().trim_start_matches('\u{feff}').trim().to_string();
            if index.insert(name.clone(), columns.len()).is_some() {
                return Err(TableError::DuplicateColumn(name));
            }
            columns.push(name);
        }

        Ok(Self { columns, index })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.index.contains_key(column)
    }

    /// Fail unless every listed column is present
    pub fn require(&self, required: &[&str]) -> Result<(), TableError> {
        let missing: Vec<String> = required
            .iter()
            .filter(|c| !self.contains(c))
            .map(|c| c.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(TableError::MissingColumns(missing))
        }
    }
}

/// One record bound to its table's schema
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    schema: Arc<Schema>,
    values: Vec<String>,
}

impl Row {
    /// Values beyond the schema are rejected; missing trailing values become empty.
    /// `record` is the 1-based data record number used in errors.
    pub fn new(schema: Arc<Schema>, record: usize, mut values: Vec<String>) -> Result<Self, TableError> {
        if values.len() > schema.len() {
            return Err(TableError::RaggedRecord {
                record,
                found: values.len(),
                expected: schema.len(),
            });
        }
        values.resize(schema.len(), String::new());
        Ok(Self { schema, values })
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.schema
            .position(column)
            .map(|i| self.values[i].as_str())
    }

    /// Value of `column`, treating absent and empty alike
    pub fn non_empty(&self, column: &str) -> Option<&str> {
        self.get(column).filter(|v| !v.is_empty())
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// A fully loaded table
#[derive(Debug, Clone)]
pub struct Table {
    schema: Arc<Schema>,
    rows: Vec<Row>,
}

impl Table {
    /// Read a whole table from `path`
    pub fn read_path(path: &Path) -> Result<Self, TableError> {
        let file = File::open(path).map_err(|source| TableError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::read_from(file)
    }

    pub fn read_from<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let schema = Arc::new(Schema::new(rdr.headers()?.iter())?);

        let mut rows = Vec::new();
        for (idx, record) in rdr.records().enumerate() {
            let record = record?;
            let values = record.iter().map(str::to_string).collect();
            rows.push(Row::new(schema.clone(), idx + 1, values)?);
        }

        Ok(Self { schema, rows })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Writes rows of one schema followed by a fixed set of appended columns
pub struct TableWriter<W: Write> {
    inner: csv::Writer<W>,
    width: usize,
    rows_written: usize,
}

impl TableWriter<File> {
    /// Create (or truncate) the file at `path` and write the header
    pub fn create(path: &Path, schema: &Schema, extra_columns: &[&str]) -> Result<Self, TableError> {
        let file = File::create(path).map_err(|source| TableError::Create {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(file, schema, extra_columns)
    }
}

impl<W: Write> TableWriter<W> {
    pub fn new(writer: W, schema: &Schema, extra_columns: &[&str]) -> Result<Self, TableError> {
        if let Some(dup) = extra_columns.iter().find(|c| schema.contains(c)) {
            return Err(TableError::DuplicateColumn(dup.to_string()));
        }

        let mut inner = csv::WriterBuilder::new()
            .delimiter(DELIMITER)
            .from_writer(writer);

        let header: Vec<&str> = schema
            .columns()
            .iter()
            .map(String::as_str)
            .chain(extra_columns.iter().copied())
            .collect();
        inner.write_record(&header)?;

        Ok(Self {
            inner,
            width: header.len(),
            rows_written: 0,
        })
    }

    /// Append one row: its original values followed by `extras`
    pub fn write_row<I, S>(&mut self, row: &Row, extras: I) -> Result<(), TableError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut record = csv::ByteRecord::new();
        for value in row.values() {
            record.push_field(value.as_bytes());
        }
        for extra in extras {
            record.push_field(extra.as_ref());
        }
        debug_assert_eq!(record.len(), self.width);

        self.inner.write_byte_record(&record)?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn flush(&mut self) -> Result<(), TableError> {
        self.inner.flush()?;
        Ok(())
    }

    /// Flush and hand back the underlying writer
    #[cfg(test)]
    pub fn into_inner(self) -> Result<W, TableError> {
        self.inner
            .into_inner()
            .map_err(|e| TableError::Io(e.into_error()))
    }
}
