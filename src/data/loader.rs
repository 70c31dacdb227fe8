// ============================================================
// Layer 4 — CSV Loader
// ============================================================
// Loads question/answer rows from a CSV file with a header row.
//
// Only two columns matter: `question` and `answer`. Their
// position in the header is irrelevant and any additional
// columns (ids, categories, sources...) are dropped.
//
// Quoted fields may span several lines, which is common for
// long legal answers, and the csv crate handles that for us.
//
// Failure modes (no retry, the caller must fix the input):
//   - file missing / unreadable   → I/O error with the path
//   - header lacks a column       → DatasetError::MissingColumn
//   - row with a wrong field count → csv error with the row number

use anyhow::{Context, Result};
use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use crate::data::DatasetError;
use crate::domain::qa_record::QaRecord;
use crate::domain::traits::RecordSource;

/// Column holding the instruction text
pub const QUESTION_COLUMN: &str = "question";
/// Column holding the expected response
pub const ANSWER_COLUMN: &str = "answer";

/// Loads QaRecords from one CSV file.
/// Implements the RecordSource trait from Layer 3.
pub struct CsvLoader {
    path: PathBuf,
}

impl CsvLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for CsvLoader {
    fn load_all(&self) -> Result<Vec<QaRecord>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Cannot open dataset '{}'", self.path.display()))?;

        let records = read_records(file, &self.path)?;

        tracing::debug!(
            "Loaded {} rows from '{}'",
            records.len(),
            self.path.display()
        );
        Ok(records)
    }
}

/// Parse CSV content from any reader.
/// `origin` is only used in error messages.
pub fn read_records<R: Read>(reader: R, origin: &Path) -> Result<Vec<QaRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .with_context(|| format!("Cannot read CSV header of '{}'", origin.display()))?
        .clone();

    // Resolve both columns before touching any data row
    let question_idx = column_index(&headers, QUESTION_COLUMN, origin)?;
    let answer_idx   = column_index(&headers, ANSWER_COLUMN, origin)?;

    let mut records = Vec::new();
    for (i, row) in rdr.records().enumerate() {
        // +2: one for the header line, one for 1-based numbering
        let row = row.with_context(|| {
            format!("Malformed CSV row {} in '{}'", i + 2, origin.display())
        })?;

        records.push(QaRecord::new(
            row.get(question_idx).unwrap_or_default(),
            row.get(answer_idx).unwrap_or_default(),
        ));
    }

    Ok(records)
}

/// Position of `name` in the header row.
/// A UTF-8 byte order mark on the first header is ignored.
fn column_index(headers: &csv::StringRecord, name: &str, origin: &Path) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim_start_matches('\u{feff}') == name)
        .ok_or_else(|| {
            DatasetError::MissingColumn {
                column: name.to_string(),
                path:   origin.to_path_buf(),
            }
            .into()
        })
}
