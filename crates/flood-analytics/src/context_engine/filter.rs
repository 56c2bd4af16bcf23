//! Filter specification derived from merged context slots

use serde::{Deserialize, Serialize};

use crate::context_engine::slots::ContextSlots;
use crate::dataset::{Dataset, ProjectRow};
use crate::utils::TextUtils;

/// Location, contractor and year predicates, ANDed. Re-derivable from slots, so it is what a
/// pagination cursor stores instead of the rows themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub municipality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contractor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_range: Option<(i32, i32)>,
}

impl FilterSpec {
    pub fn from_slots(slots: &ContextSlots) -> Self {
        let e = &slots.entities;
        Self {
            municipality: e.municipality.clone(),
            province: e.province.clone(),
            region: e.region.clone(),
            contractor: e.contractor.clone(),
            // A range takes precedence if both ever coexist
            year: if e.year_range.is_some() { None } else { e.year },
            year_range: e.year_range,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == FilterSpec::default()
    }

    /// Matching rows in stable dataset order.
    pub fn apply<'a>(&self, dataset: &'a Dataset) -> Vec<&'a ProjectRow> {
        let compiled = CompiledFilter::new(self);
        dataset.rows().iter().filter(|row| compiled.matches(row)).collect()
    }

    pub fn matches(&self, row: &ProjectRow) -> bool {
        CompiledFilter::new(self).matches(row)
    }

    /// Scope phrase for answers: "in Quezon City by ALPHA BUILDERS in 2021". Empty when unfiltered.
    pub fn describe(&self) -> String {
        let mut places = Vec::new();
        if let Some(m) = &self.municipality {
            places.push(TextUtils::display_municipality(m));
        }
        if let Some(p) = &self.province {
            places.push(TextUtils::title_case(p));
        }
        if let Some(r) = &self.region {
            places.push(TextUtils::display_region(r));
        }

        let mut parts = Vec::new();
        if !places.is_empty() {
            parts.push(format!("in {}", places.join(", ")));
        }
        if let Some(c) = &self.contractor {
            parts.push(format!("by {}", c));
        }
        if let Some((start, end)) = self.year_range {
            parts.push(format!("from {} to {}", start, end));
        } else if let Some(y) = self.year {
            parts.push(format!("in {}", y));
        }
        parts.join(" ")
    }
}

/// Filter values normalized once per query.
struct CompiledFilter {
    municipality: Option<String>,
    province: Option<String>,
    region: Option<String>,
    contractor: Option<String>,
    year: Option<i32>,
    year_range: Option<(i32, i32)>,
}

impl CompiledFilter {
    fn new(spec: &FilterSpec) -> Self {
        let norm = |v: &Option<String>| v.as_deref().map(TextUtils::normalize);
        Self {
            municipality: norm(&spec.municipality),
            province: norm(&spec.province),
            region: norm(&spec.region),
            contractor: norm(&spec.contractor),
            year: spec.year,
            year_range: spec.year_range,
        }
    }

    fn matches(&self, row: &ProjectRow) -> bool {
        if let Some(m) = &self.municipality {
            if TextUtils::normalize(&row.municipality) != *m {
                return false;
            }
        }
        if let Some(p) = &self.province {
            if TextUtils::normalize(&row.province) != *p {
                return false;
            }
        }
        if let Some(r) = &self.region {
            let row_region = TextUtils::normalize(&row.region);
            // "region iii" also matches "region iii central luzon"
            let prefixed = row_region.starts_with(r.as_str())
                && row_region.as_bytes().get(r.len()) == Some(&b' ');
            if row_region != *r && !prefixed {
                return false;
            }
        }
        if let Some(c) = &self.contractor {
            if TextUtils::normalize(&row.contractor) != *c {
                return false;
            }
        }
        if let Some((start, end)) = self.year_range {
            match row.year {
                Some(y) if y >= start && y <= end => {}
                _ => return false,
            }
        } else if let Some(y) = self.year {
            if row.year != Some(y) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_engine::slots::EntitySet;

    fn row(municipality: &str, region: &str, year: Option<i32>) -> ProjectRow {
        ProjectRow {
            municipality: municipality.into(),
            region: region.into(),
            contractor: "Alpha Builders".into(),
            year,
            ..Default::default()
        }
    }

    #[test]
    fn test_matches_case_insensitively() {
        let spec = FilterSpec {
            municipality: Some("QUEZON CITY".into()),
            contractor: Some("alpha builders".into()),
            ..Default::default()
        };
        assert!(spec.matches(&row("Quezon City", "NCR", None)));
        assert!(!spec.matches(&row("Manila", "NCR", None)));
    }

    #[test]
    fn test_region_prefix_match() {
        let spec = FilterSpec { region: Some("Region III".into()), ..Default::default() };
        assert!(spec.matches(&row("X", "Region III - Central Luzon", None)));
        assert!(spec.matches(&row("X", "REGION III", None)));
        assert!(!spec.matches(&row("X", "Region IV-A", None)));
        assert!(!spec.matches(&row("X", "Region IIIB", None)));
    }

    #[test]
    fn test_year_range_is_inclusive_and_excludes_unknown_years() {
        let spec = FilterSpec { year_range: Some((2018, 2020)), ..Default::default() };
        assert!(spec.matches(&row("X", "", Some(2018))));
        assert!(spec.matches(&row("X", "", Some(2020))));
        assert!(!spec.matches(&row("X", "", Some(2021))));
        assert!(!spec.matches(&row("X", "", None)));
    }

    #[test]
    fn test_from_slots_ignores_project_and_action() {
        let slots = ContextSlots {
            entities: EntitySet {
                municipality: Some("Manila".into()),
                project_id: Some("P1".into()),
                year: Some(2020),
                ..Default::default()
            },
            last_action: None,
        };
        let spec = FilterSpec::from_slots(&slots);
        assert_eq!(spec.municipality.as_deref(), Some("Manila"));
        assert_eq!(spec.year, Some(2020));
        assert_eq!(spec.describe(), "in Manila in 2020");
        assert!(FilterSpec::default().describe().is_empty());
    }
}
