//! CSV loading with tolerant header resolution

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

use super::{Dataset, ProjectRow};

lazy_static! {
    static ref YEAR_REGEX: Regex = Regex::new(r"\b(19|20)\d{2}\b").unwrap();
}

/// Header aliases per field, compared after lowercasing and dropping non-alphanumerics.
const PROJECT_ID_HEADERS: &[&str] = &["projectid", "projectidnumber", "projectnumber", "projectcode", "id"];
const DESCRIPTION_HEADERS: &[&str] = &["projectdescription", "description", "projectname", "name", "title"];
const MUNICIPALITY_HEADERS: &[&str] = &["municipality", "municipalitycity", "citymunicipality", "city", "location"];
const PROVINCE_HEADERS: &[&str] = &["province"];
const REGION_HEADERS: &[&str] = &["region"];
const CONTRACTOR_HEADERS: &[&str] = &["contractor", "contractorname", "winningcontractor"];
const BUDGET_HEADERS: &[&str] = &[
    "approvedbudgetnum",
    "approvedbudgetforcontract",
    "approvedbudget",
    "budget",
    "contractcost",
];
const YEAR_HEADERS: &[&str] = &["fundingyear", "infrayear", "year"];
const START_DATE_HEADERS: &[&str] = &["startdate", "actualstartdate"];

/// Column positions resolved from a header record.
#[derive(Debug, Default)]
struct HeaderMap {
    project_id: Option<usize>,
    description: Option<usize>,
    municipality: Option<usize>,
    province: Option<usize>,
    region: Option<usize>,
    contractor: Option<usize>,
    budget: Option<usize>,
    year: Option<usize>,
    start_date: Option<usize>,
}

impl HeaderMap {
    fn resolve(headers: &csv::StringRecord) -> Self {
        let normalized: Vec<String> = headers.iter().map(normalize_header).collect();
        let find = |candidates: &[&str]| -> Option<usize> {
            candidates
                .iter()
                .find_map(|c| normalized.iter().position(|h| h == c))
        };

        Self {
            project_id: find(PROJECT_ID_HEADERS),
            description: find(DESCRIPTION_HEADERS),
            municipality: find(MUNICIPALITY_HEADERS),
            province: find(PROVINCE_HEADERS),
            region: find(REGION_HEADERS),
            contractor: find(CONTRACTOR_HEADERS),
            budget: find(BUDGET_HEADERS),
            year: find(YEAR_HEADERS),
            start_date: find(START_DATE_HEADERS),
        }
    }

    fn missing(&self) -> Vec<&'static str> {
        [
            ("project_id", self.project_id),
            ("municipality", self.municipality),
            ("province", self.province),
            ("region", self.region),
            ("contractor", self.contractor),
            ("budget", self.budget),
        ]
        .iter()
        .filter(|(_, idx)| idx.is_none())
        .map(|(name, _)| *name)
        .collect()
    }
}

pub struct CsvLoader;

impl CsvLoader {
    pub fn from_path(path: &Path) -> Result<Dataset> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
        let dataset = Self::from_reader(file)
            .with_context(|| format!("Failed to load CSV file: {}", path.display()))?;
        info!("Loaded {} projects from {}", dataset.len(), path.display());
        Ok(dataset)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Dataset> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = reader.headers().context("Failed to read CSV headers")?.clone();
        let map = HeaderMap::resolve(&headers);
        let missing = map.missing();
        if !missing.is_empty() {
            warn!("CSV is missing columns {:?}; those fields stay empty", missing);
        }

        let mut rows = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("Failed to read row {}", idx + 1))?;
            rows.push(parse_row(&record, &map));
        }

        debug!(
            "Parsed {} rows, {} with budget",
            rows.len(),
            rows.iter().filter(|r| r.budget.is_some()).count()
        );
        Ok(Dataset::new(rows))
    }
}

fn parse_row(record: &csv::StringRecord, map: &HeaderMap) -> ProjectRow {
    let field = |idx: Option<usize>| -> String {
        idx.and_then(|i| record.get(i))
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };

    let year = parse_year(&field(map.year)).or_else(|| parse_year(&field(map.start_date)));

    ProjectRow {
        index: 0,
        project_id: field(map.project_id),
        description: field(map.description),
        municipality: field(map.municipality),
        province: field(map.province),
        region: field(map.region),
        contractor: field(map.contractor),
        year,
        budget: parse_budget(&field(map.budget)),
    }
}

fn normalize_header(header: &str) -> String {
    header
        .trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// "₱1,234,567.50" -> 1234567.5; empty or unparseable -> None
pub fn parse_budget(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// First plausible four-digit year in the text ("2021", "2021-03-15", "FY 2019").
pub fn parse_year(raw: &str) -> Option<i32> {
    YEAR_REGEX
        .find(raw)
        .and_then(|m| m.as_str().parse::<i32>().ok())
}
