use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CatalogEntryId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: CatalogEntryId,
    pub name: String,
    pub price: u64,
    pub description: String,
}

/// Raw catalog row as supplied by the catalog file. Prices arrive as display
/// strings with thousands separators (e.g. `"1,23,990"`) or as plain numbers.
#[derive(Clone, Debug, Deserialize)]
pub struct CatalogRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "Model Name", alias = "model_name")]
    pub name: Option<String>,
    #[serde(alias = "Price")]
    pub price: Value,
    #[serde(alias = "Description")]
    pub description: String,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("could not read catalog file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse catalog file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: serde_json::Error },
    #[error("catalog row {row}: price `{value}` is not a non-negative integer")]
    InvalidPrice { row: usize, value: String },
    #[error("catalog row {row}: description is empty")]
    EmptyDescription { row: usize },
    #[error("catalog row {row}: duplicate id `{id}`")]
    DuplicateId { row: usize, id: String },
}

/// Normalizes a formatted price (`"1,23,990"`, `"₹ 45,000"`, `45000`) to an integer.
pub fn parse_price(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(raw) => {
            let digits = raw
                .chars()
                .filter(|character| !matches!(character, ',' | '_' | ' ' | '\u{a0}'))
                .skip_while(|character| !character.is_ascii_digit() && *character != '-')
                .collect::<String>();
            if digits.is_empty() || !digits.chars().all(|character| character.is_ascii_digit()) {
                return None;
            }
            digits.parse::<u64>().ok()
        }
        _ => None,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn from_rows(rows: Vec<CatalogRow>) -> Result<Self, CatalogError> {
        let mut entries: Vec<CatalogEntry> = Vec::with_capacity(rows.len());

        for (index, row) in rows.into_iter().enumerate() {
            let row_number = index + 1;
            let price = parse_price(&row.price).ok_or_else(|| CatalogError::InvalidPrice {
                row: row_number,
                value: match &row.price {
                    Value::String(raw) => raw.clone(),
                    other => other.to_string(),
                },
            })?;

            let description = row.description.trim().to_string();
            if description.is_empty() {
                return Err(CatalogError::EmptyDescription { row: row_number });
            }

            let id = row
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("row-{row_number}"));
            if entries.iter().any(|entry| entry.id.0 == id) {
                return Err(CatalogError::DuplicateId { row: row_number, id });
            }

            let name = row.name.filter(|name| !name.trim().is_empty()).unwrap_or_else(|| id.clone());

            entries.push(CatalogEntry { id: CatalogEntryId(id), name, price, description });
        }

        Ok(Self { entries })
    }

    pub fn load_json(path: &Path) -> Result<Self, CatalogError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| CatalogError::ReadFile { path: path.to_path_buf(), source })?;
        let rows = serde_json::from_str::<Vec<CatalogRow>>(&raw)
            .map_err(|source| CatalogError::ParseFile { path: path.to_path_buf(), source })?;
        Self::from_rows(rows)
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn find(&self, id: &CatalogEntryId) -> Option<&CatalogEntry> {
        self.entries.iter().find(|entry| &entry.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
