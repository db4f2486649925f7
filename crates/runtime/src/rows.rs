//! Materialized result sets.
//!
//! Queries in this system return small aggregated row sets, so results are
//! held fully in memory as typed cells. The rendered (CSV) form of a result
//! is its canonical text: checksums hash it and ground-truth comparison
//! parses it back.

use std::path::Path;

use granary_error::{ErrorCode, GranaryError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One result cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Canonical text form, used for CSV output and checksums. Null renders
    /// as the empty cell.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
        }
    }

    /// Numeric view of the cell, if it has one. Text cells are parsed so
    /// that CSV-sourced truth rows compare numerically.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null | Value::Bool(_) => None,
        }
    }

    fn approx_bytes(&self) -> usize {
        match self {
            Value::Text(s) => 24 + s.len(),
            _ => 16,
        }
    }
}

/// A fully materialized query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Rough in-memory footprint, used as the cache weight.
    pub fn estimated_bytes(&self) -> usize {
        let header: usize = self.columns.iter().map(|c| 24 + c.len()).sum();
        let cells: usize = self
            .rows
            .iter()
            .map(|r| 24 + r.iter().map(Value::approx_bytes).sum::<usize>())
            .sum();
        64 + header + cells
    }

    /// SHA-256 over the rendered header and cells, with unit separators so
    /// cell boundaries cannot alias.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for c in &self.columns {
            hasher.update(c.as_bytes());
            hasher.update([0x1f]);
        }
        hasher.update([0x1e]);
        for row in &self.rows {
            for cell in row {
                hasher.update(cell.render().as_bytes());
                hasher.update([0x1f]);
            }
            hasher.update([0x1e]);
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        use std::fmt::Write;
        for b in digest {
            let _ = write!(out, "{b:02x}");
        }
        out
    }

    /// Write the result as a CSV file with a header row.
    pub fn write_csv(&self, path: &Path) -> Result<(), GranaryError> {
        let mut writer = csv::Writer::from_path(path).map_err(|e| csv_error(path, e))?;
        writer
            .write_record(&self.columns)
            .map_err(|e| csv_error(path, e))?;
        for row in &self.rows {
            let rendered: Vec<String> = row.iter().map(Value::render).collect();
            writer.write_record(&rendered).map_err(|e| csv_error(path, e))?;
        }
        writer.flush().map_err(|e| {
            GranaryError::new(
                ErrorCode::SerializationFailed,
                format!("failed to flush CSV {}: {e}", path.display()),
            )
        })?;
        Ok(())
    }

    /// Read a CSV file (header row required) into a result of text cells.
    /// Used for ground-truth files; numeric comparison happens cell by cell
    /// during verification.
    pub fn from_csv(path: &Path) -> Result<Self, GranaryError> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| csv_error(path, e))?;
        let columns = reader
            .headers()
            .map_err(|e| csv_error(path, e))?
            .iter()
            .map(str::to_string)
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| csv_error(path, e))?;
            rows.push(
                record
                    .iter()
                    .map(|cell| {
                        if cell.is_empty() {
                            Value::Null
                        } else {
                            Value::Text(cell.to_string())
                        }
                    })
                    .collect(),
            );
        }
        Ok(Self { columns, rows })
    }
}

fn csv_error(path: &Path, e: csv::Error) -> GranaryError {
    GranaryError::new(
        ErrorCode::SerializationFailed,
        format!("CSV error for {}: {e}", path.display()),
    )
}
