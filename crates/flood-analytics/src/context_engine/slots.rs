//! Context slots: the small set of named values remembered per session.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::TextUtils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKey {
    Municipality,
    Province,
    Region,
    Contractor,
    Year,
    YearRange,
    ProjectId,
    LastAction,
}

impl SlotKey {
    pub const ALL: [SlotKey; 8] = [
        SlotKey::Municipality,
        SlotKey::Province,
        SlotKey::Region,
        SlotKey::Contractor,
        SlotKey::Year,
        SlotKey::YearRange,
        SlotKey::ProjectId,
        SlotKey::LastAction,
    ];

    /// Every key except `last_action`
    pub const FILTERS: [SlotKey; 7] = [
        SlotKey::Municipality,
        SlotKey::Province,
        SlotKey::Region,
        SlotKey::Contractor,
        SlotKey::Year,
        SlotKey::YearRange,
        SlotKey::ProjectId,
    ];

    pub const LOCATIONS: [SlotKey; 3] = [SlotKey::Municipality, SlotKey::Province, SlotKey::Region];

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotKey::Municipality => "municipality",
            SlotKey::Province => "province",
            SlotKey::Region => "region",
            SlotKey::Contractor => "contractor",
            SlotKey::Year => "year",
            SlotKey::YearRange => "year_range",
            SlotKey::ProjectId => "project_id",
            SlotKey::LastAction => "last_action",
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        SlotKey::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| anyhow!("Unknown context slot: {}", s))
    }
}

/// The operation a question asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Count,
    Sum,
    Average,
    TopN,
    LowestN,
    /// Contractors ranked by total approved budget
    TopContractors,
    /// Contractors ranked by number of projects
    TopContractorsByCount,
    /// Municipalities ranked by total approved budget
    TopMunicipalities,
    /// Total budget and project count per year
    TrendByYear,
    List,
    Lookup,
    #[default]
    Unknown,
}

impl Action {
    pub const ALL: [Action; 12] = [
        Action::Count,
        Action::Sum,
        Action::Average,
        Action::TopN,
        Action::LowestN,
        Action::TopContractors,
        Action::TopContractorsByCount,
        Action::TopMunicipalities,
        Action::TrendByYear,
        Action::List,
        Action::Lookup,
        Action::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Count => "count",
            Action::Sum => "sum",
            Action::Average => "average",
            Action::TopN => "top_n",
            Action::LowestN => "lowest_n",
            Action::TopContractors => "top_contractors",
            Action::TopContractorsByCount => "top_contractors_by_count",
            Action::TopMunicipalities => "top_municipalities",
            Action::TrendByYear => "trend_by_year",
            Action::List => "list",
            Action::Lookup => "lookup",
            Action::Unknown => "unknown",
        }
    }

    /// Actions whose result a "more" request can continue.
    pub fn is_listing(&self) -> bool {
        matches!(self, Action::List | Action::TopN | Action::LowestN)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| anyhow!("Unknown action: {}", s))
    }
}

/// Filter-bearing slots. Values are the canonical dataset spelling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySet {
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
    /// Inclusive, start <= end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_range: Option<(i32, i32)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl EntitySet {
    pub fn is_empty(&self) -> bool {
        *self == EntitySet::default()
    }

    pub fn has_location(&self) -> bool {
        self.municipality.is_some() || self.province.is_some() || self.region.is_some()
    }
}

/// Everything remembered for a session between turns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSlots {
    #[serde(flatten)]
    pub entities: EntitySet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<Action>,
}

impl ContextSlots {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.last_action.is_none()
    }

    pub fn contains(&self, key: SlotKey) -> bool {
        self.get_raw(key).is_some()
    }

    /// Keys that currently hold a value, in `SlotKey::ALL` order.
    pub fn keys(&self) -> Vec<SlotKey> {
        SlotKey::ALL.iter().copied().filter(|k| self.contains(*k)).collect()
    }

    /// JSON encoding of one slot value as stored in the `slot_value` column.
    pub fn get_raw(&self, key: SlotKey) -> Option<String> {
        let e = &self.entities;
        let value = match key {
            SlotKey::Municipality => e.municipality.as_ref().map(serde_json::to_string),
            SlotKey::Province => e.province.as_ref().map(serde_json::to_string),
            SlotKey::Region => e.region.as_ref().map(serde_json::to_string),
            SlotKey::Contractor => e.contractor.as_ref().map(serde_json::to_string),
            SlotKey::Year => e.year.as_ref().map(serde_json::to_string),
            SlotKey::YearRange => e.year_range.as_ref().map(serde_json::to_string),
            SlotKey::ProjectId => e.project_id.as_ref().map(serde_json::to_string),
            SlotKey::LastAction => self.last_action.as_ref().map(serde_json::to_string),
        };
        // Serializing strings, integers and unit enums cannot fail
        value.and_then(|r| r.ok())
    }

    /// Decode a stored `slot_value` into its slot.
    pub fn set_raw(&mut self, key: SlotKey, raw: &str) -> Result<()> {
        let ctx = || format!("Invalid stored value for slot {}: {}", key, raw);
        let e = &mut self.entities;
        match key {
            SlotKey::Municipality => e.municipality = Some(serde_json::from_str(raw).with_context(ctx)?),
            SlotKey::Province => e.province = Some(serde_json::from_str(raw).with_context(ctx)?),
            SlotKey::Region => e.region = Some(serde_json::from_str(raw).with_context(ctx)?),
            SlotKey::Contractor => e.contractor = Some(serde_json::from_str(raw).with_context(ctx)?),
            SlotKey::Year => e.year = Some(serde_json::from_str(raw).with_context(ctx)?),
            SlotKey::YearRange => e.year_range = Some(serde_json::from_str(raw).with_context(ctx)?),
            SlotKey::ProjectId => e.project_id = Some(serde_json::from_str(raw).with_context(ctx)?),
            SlotKey::LastAction => self.last_action = Some(serde_json::from_str(raw).with_context(ctx)?),
        }
        Ok(())
    }

    pub fn clear(&mut self, key: SlotKey) {
        let e = &mut self.entities;
        match key {
            SlotKey::Municipality => e.municipality = None,
            SlotKey::Province => e.province = None,
            SlotKey::Region => e.region = None,
            SlotKey::Contractor => e.contractor = None,
            SlotKey::Year => e.year = None,
            SlotKey::YearRange => e.year_range = None,
            SlotKey::ProjectId => e.project_id = None,
            SlotKey::LastAction => self.last_action = None,
        }
    }

    /// Copy every present slot of `partial` over this one.
    pub fn overlay(&mut self, partial: &ContextSlots) {
        let (dst, src) = (&mut self.entities, &partial.entities);
        if src.municipality.is_some() {
            dst.municipality = src.municipality.clone();
        }
        if src.province.is_some() {
            dst.province = src.province.clone();
        }
        if src.region.is_some() {
            dst.region = src.region.clone();
        }
        if src.contractor.is_some() {
            dst.contractor = src.contractor.clone();
        }
        if src.year.is_some() {
            dst.year = src.year;
        }
        if src.year_range.is_some() {
            dst.year_range = src.year_range;
        }
        if src.project_id.is_some() {
            dst.project_id = src.project_id.clone();
        }
        if partial.last_action.is_some() {
            self.last_action = partial.last_action;
        }
    }

    /// One-line description of the active filters, e.g. "Quezon City, Region III, Contractor: X, 2023".
    pub fn summary(&self) -> String {
        let e = &self.entities;
        let mut parts = Vec::new();
        if let Some(m) = &e.municipality {
            parts.push(TextUtils::display_municipality(m));
        }
        if let Some(p) = &e.province {
            parts.push(TextUtils::title_case(p));
        }
        if let Some(r) = &e.region {
            parts.push(TextUtils::display_region(r));
        }
        if let Some(c) = &e.contractor {
            parts.push(format!("Contractor: {}", c));
        }
        if let Some((start, end)) = e.year_range {
            parts.push(format!("{}-{}", start, end));
        } else if let Some(y) = e.year {
            parts.push(y.to_string());
        }
        if let Some(id) = &e.project_id {
            parts.push(format!("Project: {}", id));
        }

        if parts.is_empty() {
            "No active context".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// What has to be written to move stored slots to merged slots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextDelta {
    pub set: ContextSlots,
    pub clear: Vec<SlotKey>,
}

impl ContextDelta {
    pub fn between(stored: &ContextSlots, merged: &ContextSlots) -> Self {
        let mut delta = ContextDelta::default();
        for key in SlotKey::ALL {
            match (stored.get_raw(key), merged.get_raw(key)) {
                (Some(_), None) => delta.clear.push(key),
                (old, Some(new)) if old.as_deref() != Some(new.as_str()) => {
                    // Re-decoding our own encoding cannot fail
                    let _ = delta.set.set_raw(key, &new);
                }
                _ => {}
            }
        }
        delta
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.clear.is_empty()
    }

    /// Apply to an in-memory copy: clears first, then sets.
    pub fn apply_to(&self, slots: &mut ContextSlots) {
        for key in &self.clear {
            slots.clear(*key);
        }
        slots.overlay(&self.set);
    }
}
