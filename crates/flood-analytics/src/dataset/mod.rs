//! Read-only project table and its categorical reference values.

pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

pub use loader::CsvLoader;

/// One flood-control project. Missing text columns are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectRow {
    /// Position in the source file; defines the stable order
    pub index: usize,
    pub project_id: String,
    pub description: String,
    pub municipality: String,
    pub province: String,
    pub region: String,
    pub contractor: String,
    pub year: Option<i32>,
    pub budget: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Municipality,
    Province,
    Region,
    Contractor,
    ProjectId,
}

impl Column {
    pub fn as_str(&self) -> &'static str {
        match self {
            Column::Municipality => "municipality",
            Column::Province => "province",
            Column::Region => "region",
            Column::Contractor => "contractor",
            Column::ProjectId => "project_id",
        }
    }

    fn value<'a>(&self, row: &'a ProjectRow) -> &'a str {
        match self {
            Column::Municipality => &row.municipality,
            Column::Province => &row.province,
            Column::Region => &row.region,
            Column::Contractor => &row.contractor,
            Column::ProjectId => &row.project_id,
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distinct categorical values handed to the entity extractor.
#[derive(Debug, Clone, Default)]
pub struct ReferenceValues {
    pub municipalities: Vec<String>,
    pub provinces: Vec<String>,
    pub regions: Vec<String>,
    pub contractors: Vec<String>,
    pub project_ids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Dataset {
    rows: Vec<ProjectRow>,
}

impl Dataset {
    /// Build from rows; `index` is reassigned to the given order.
    pub fn new(mut rows: Vec<ProjectRow>) -> Self {
        for (i, row) in rows.iter_mut().enumerate() {
            row.index = i;
        }
        Self { rows }
    }

    pub fn rows(&self) -> &[ProjectRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Non-empty distinct values of a column in first-seen order.
    pub fn distinct(&self, column: Column) -> Vec<String> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .map(|row| column.value(row).trim())
            .filter(|v| !v.is_empty() && seen.insert(v.to_string()))
            .map(str::to_string)
            .collect()
    }

    pub fn reference_values(&self) -> ReferenceValues {
        ReferenceValues {
            municipalities: self.distinct(Column::Municipality),
            provinces: self.distinct(Column::Province),
            regions: self.distinct(Column::Region),
            contractors: self.distinct(Column::Contractor),
            project_ids: self.distinct(Column::ProjectId),
        }
    }
}
