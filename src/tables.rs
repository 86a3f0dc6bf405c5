//! Table Extractor - Structural Flattening Only
//!
//! Turns the typed ledger documents into row-oriented tables with a fixed
//! schema per table name. No sorting, filtering, or interpretation: rows come
//! out in ledger order and absent fields become empty strings.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::ledger::{HttpStatus, VerificationResult};

pub const PLATFORMS_REGISTRY: &str = "platforms_registry";
pub const SBDB_ATTEMPTS: &str = "sbdb_attempts";
pub const FILE_INTEGRITY: &str = "file_integrity";

pub const PLATFORMS_REGISTRY_COLUMNS: &[&str] = &["category", "name", "role", "type"];
pub const SBDB_ATTEMPTS_COLUMNS: &[&str] =
    &["designation", "error_type", "http_status", "message", "ok", "url"];
pub const FILE_INTEGRITY_COLUMNS: &[&str] = &["filename", "sha256"];

/// A primitive table cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Text(String),
    Bool(bool),
    Integer(i64),
}

impl CellValue {
    /// Rendering used in delimited output.
    pub fn to_field(&self) -> String {
        match self {
            CellValue::Text(s) => s.clone(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Integer(n) => n.to_string(),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

/// One row; cells are in schema order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    cells: Vec<(&'static str, CellValue)>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.cells.iter().find(|(c, _)| *c == column).map(|(_, v)| v)
    }

    pub fn cells(&self) -> impl Iterator<Item = &CellValue> {
        self.cells.iter().map(|(_, v)| v)
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (column, value) in &self.cells {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub rows: Vec<Row>,
}

impl Table {
    fn new(name: &'static str, columns: &'static [&'static str]) -> Self {
        Self {
            name,
            columns,
            rows: Vec::new(),
        }
    }

    fn push(&mut self, values: Vec<CellValue>) {
        debug_assert_eq!(values.len(), self.columns.len());
        let cells = self.columns.iter().copied().zip(values).collect();
        self.rows.push(Row { cells });
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Extract the fixed table set. Every table is present, possibly empty.
pub fn extract_tables(ledger: &VerificationResult) -> BTreeMap<String, Table> {
    let mut tables = BTreeMap::new();
    for table in [
        platforms_registry(ledger),
        sbdb_attempts(ledger),
        file_integrity(ledger),
    ] {
        tables.insert(table.name.to_string(), table);
    }
    tables
}

fn platforms_registry(ledger: &VerificationResult) -> Table {
    let mut table = Table::new(PLATFORMS_REGISTRY, PLATFORMS_REGISTRY_COLUMNS);
    if let Some(snapshot) = &ledger.documents.source_snapshot {
        for category in &snapshot.platforms_registry.categories {
            for item in &category.items {
                table.push(vec![
                    category.name.as_str().into(),
                    item.name.as_str().into(),
                    item.role.as_str().into(),
                    item.kind.as_str().into(),
                ]);
            }
        }
    }
    table
}

fn sbdb_attempts(ledger: &VerificationResult) -> Table {
    let mut table = Table::new(SBDB_ATTEMPTS, SBDB_ATTEMPTS_COLUMNS);
    let Some(snapshot) = &ledger.documents.source_snapshot else {
        return table;
    };

    for attempt in &snapshot.sbdb_attempts {
        let (error_type, http_status, message) = match &attempt.error {
            Some(err) => (
                err.error_type.as_str().into(),
                match &err.http_status {
                    Some(HttpStatus::Code(code)) => CellValue::Integer(*code),
                    Some(HttpStatus::Text(text)) => text.as_str().into(),
                    None => "".into(),
                },
                err.message.as_str().into(),
            ),
            None => ("".into(), "".into(), "".into()),
        };
        table.push(vec![
            attempt.designation.as_str().into(),
            error_type,
            http_status,
            message,
            attempt.ok.into(),
            attempt.url.as_str().into(),
        ]);
    }
    table
}

fn file_integrity(ledger: &VerificationResult) -> Table {
    let mut table = Table::new(FILE_INTEGRITY, FILE_INTEGRITY_COLUMNS);
    if let Some(manifest) = &ledger.documents.manifest {
        for decl in &manifest.files {
            table.push(vec![
                decl.filename.as_str().into(),
                decl.sha256.as_deref().unwrap_or("").into(),
            ]);
        }
    }
    table
}
