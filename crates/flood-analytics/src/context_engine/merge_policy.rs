//! Decides how a turn's extracted entities combine with remembered context.

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::context_engine::entity_extractor::ExtractedEntities;
use crate::context_engine::slots::{Action, ContextDelta, ContextSlots, SlotKey};
use crate::utils::TextUtils;

/// Whether naming one location implicitly drops the other stored location slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationPolicy {
    /// Municipality, province and region are independent slots; only explicit clears remove them
    #[default]
    Stack,
    /// Any named location replaces all stored location slots
    Replace,
}

impl FromStr for LocationPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stack" => Ok(LocationPolicy::Stack),
            "replace" => Ok(LocationPolicy::Replace),
            other => Err(anyhow!("Invalid location policy '{}', expected stack or replace", other)),
        }
    }
}

impl fmt::Display for LocationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LocationPolicy::Stack => "stack",
            LocationPolicy::Replace => "replace",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub merged: ContextSlots,
    pub delta: ContextDelta,
    /// Stored filters were discarded before merging
    pub new_topic: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MergePolicy {
    location_policy: LocationPolicy,
}

impl MergePolicy {
    pub fn new(location_policy: LocationPolicy) -> Self {
        Self { location_policy }
    }

    /// Rules, in order:
    /// 1. a clearing phrase, or a topic keyword naming a location/contractor that differs from
    ///    the stored one, discards every stored filter slot;
    /// 2. extracted slots overwrite stored ones (year and year range replace each other);
    /// 3. a remembered project id is dropped once the question asks for something other than
    ///    a lookup, or names a location or contractor;
    /// 4. everything else is inherited;
    /// 5. `last_action` takes the extracted action unless it is unknown. An inherited lookup
    ///    whose id was just dropped becomes a list of the new filters.
    pub fn merge(&self, extracted: &ExtractedEntities, stored: &ContextSlots) -> MergeOutcome {
        let e = &extracted.entities;
        let new_topic = extracted.signals.clear
            || (extracted.signals.topic && Self::names_different_target(extracted, stored));

        let mut merged = stored.clone();
        if new_topic {
            SlotKey::FILTERS.iter().for_each(|k| merged.clear(*k));
        }
        if self.location_policy == LocationPolicy::Replace && e.has_location() {
            SlotKey::LOCATIONS.iter().for_each(|k| merged.clear(*k));
        }

        if e.year.is_some() {
            merged.clear(SlotKey::YearRange);
        }
        if e.year_range.is_some() {
            merged.clear(SlotKey::Year);
        }
        let leaves_lookup = !matches!(extracted.action, Action::Lookup | Action::Unknown)
            || e.has_location()
            || e.contractor.is_some();
        if e.project_id.is_none() && leaves_lookup {
            merged.clear(SlotKey::ProjectId);
        }
        merged.overlay(&ContextSlots { entities: e.clone(), last_action: None });

        if extracted.action != Action::Unknown {
            merged.last_action = Some(extracted.action);
        } else if merged.last_action == Some(Action::Lookup) && merged.entities.project_id.is_none() {
            merged.last_action = Some(Action::List);
        }

        let delta = ContextDelta::between(stored, &merged);
        debug!(
            "Merged context new_topic={} set={:?} clear={:?}",
            new_topic,
            delta.set.keys(),
            delta.clear
        );

        MergeOutcome { merged, delta, new_topic }
    }

    /// The question names a location or contractor and it is not what is stored.
    fn names_different_target(extracted: &ExtractedEntities, stored: &ContextSlots) -> bool {
        let e = &extracted.entities;
        let s = &stored.entities;
        let differs = |new: &Option<String>, old: &Option<String>| match (new, old) {
            (Some(n), Some(o)) => TextUtils::normalize(n) != TextUtils::normalize(o),
            (Some(_), None) => true,
            _ => false,
        };

        differs(&e.municipality, &s.municipality)
            || differs(&e.province, &s.province)
            || differs(&e.region, &s.region)
            || differs(&e.contractor, &s.contractor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_engine::entity_extractor::Signals;
    use crate::context_engine::slots::EntitySet;

    fn stored() -> ContextSlots {
        ContextSlots {
            entities: EntitySet {
                municipality: Some("Manila".into()),
                contractor: Some("ALPHA BUILDERS".into()),
                year: Some(2021),
                ..Default::default()
            },
            last_action: Some(Action::Count),
        }
    }

    fn extracted(entities: EntitySet, action: Action, signals: Signals) -> ExtractedEntities {
        ExtractedEntities { entities, action, top_n: None, signals }
    }

    #[test]
    fn test_follow_up_inherits_everything() {
        let x = extracted(EntitySet::default(), Action::Sum, Signals { keyword_matched: true, ..Default::default() });
        let out = MergePolicy::default().merge(&x, &stored());
        assert!(!out.new_topic);
        assert_eq!(out.merged.entities, stored().entities);
        assert_eq!(out.merged.last_action, Some(Action::Sum));
        assert_eq!(out.delta.clear, Vec::<SlotKey>::new());
        assert_eq!(out.delta.set.last_action, Some(Action::Sum));
    }

    #[test]
    fn test_topic_keyword_with_new_location_starts_fresh() {
        let x = extracted(
            EntitySet { municipality: Some("Quezon City".into()), ..Default::default() },
            Action::List,
            Signals { topic: true, keyword_matched: true, ..Default::default() },
        );
        let out = MergePolicy::default().merge(&x, &stored());
        assert!(out.new_topic);
        assert_eq!(out.merged.entities.municipality.as_deref(), Some("Quezon City"));
        assert_eq!(out.merged.entities.contractor, None);
        assert_eq!(out.merged.entities.year, None);
        assert_eq!(out.merged.last_action, Some(Action::List));
        assert!(out.delta.clear.contains(&SlotKey::Contractor));
        assert!(out.delta.clear.contains(&SlotKey::Year));
    }

    #[test]
    fn test_topic_keyword_with_same_location_refines() {
        let x = extracted(
            EntitySet { municipality: Some("MANILA".into()), year: Some(2022), ..Default::default() },
            Action::List,
            Signals { topic: true, keyword_matched: true, ..Default::default() },
        );
        let out = MergePolicy::default().merge(&x, &stored());
        assert!(!out.new_topic);
        assert_eq!(out.merged.entities.contractor.as_deref(), Some("ALPHA BUILDERS"));
        assert_eq!(out.merged.entities.year, Some(2022));
    }

    #[test]
    fn test_new_location_without_topic_keyword_overwrites_only_that_slot() {
        let x = extracted(
            EntitySet { municipality: Some("Quezon City".into()), ..Default::default() },
            Action::Unknown,
            Signals::default(),
        );
        let out = MergePolicy::default().merge(&x, &stored());
        assert!(!out.new_topic);
        assert_eq!(out.merged.entities.municipality.as_deref(), Some("Quezon City"));
        assert_eq!(out.merged.entities.contractor.as_deref(), Some("ALPHA BUILDERS"));
        assert_eq!(out.merged.last_action, Some(Action::Count));
    }

    #[test]
    fn test_clear_signal_discards_filters() {
        let x = extracted(EntitySet::default(), Action::Unknown, Signals { clear: true, ..Default::default() });
        let out = MergePolicy::default().merge(&x, &stored());
        assert!(out.new_topic);
        assert!(out.merged.entities.is_empty());
        assert_eq!(out.merged.last_action, Some(Action::Count));
    }

    #[test]
    fn test_year_and_range_replace_each_other() {
        let x = extracted(
            EntitySet { year_range: Some((2018, 2020)), ..Default::default() },
            Action::Unknown,
            Signals::default(),
        );
        let out = MergePolicy::default().merge(&x, &stored());
        assert_eq!(out.merged.entities.year, None);
        assert_eq!(out.merged.entities.year_range, Some((2018, 2020)));
        assert_eq!(out.delta.clear, vec![SlotKey::Year]);
    }

    #[test]
    fn test_location_policy_stack_vs_replace() {
        let mut base = stored();
        base.entities.region = Some("Region III".into());
        let x = extracted(
            EntitySet { municipality: Some("San Fernando".into()), ..Default::default() },
            Action::Unknown,
            Signals::default(),
        );

        let stacked = MergePolicy::new(LocationPolicy::Stack).merge(&x, &base);
        assert_eq!(stacked.merged.entities.region.as_deref(), Some("Region III"));

        let replaced = MergePolicy::new(LocationPolicy::Replace).merge(&x, &base);
        assert_eq!(replaced.merged.entities.region, None);
        assert_eq!(replaced.merged.entities.municipality.as_deref(), Some("San Fernando"));
        assert_eq!(replaced.merged.entities.contractor.as_deref(), Some("ALPHA BUILDERS"));
    }

    #[test]
    fn test_lookup_keeps_filters() {
        let x = extracted(
            EntitySet { project_id: Some("NOPE123X".into()), ..Default::default() },
            Action::Lookup,
            Signals::default(),
        );
        let out = MergePolicy::default().merge(&x, &stored());
        assert_eq!(out.merged.entities.municipality.as_deref(), Some("Manila"));
        assert_eq!(out.merged.entities.contractor.as_deref(), Some("ALPHA BUILDERS"));
        assert_eq!(out.merged.last_action, Some(Action::Lookup));
    }

    #[test]
    fn test_other_question_drops_remembered_project() {
        let mut base = stored();
        base.entities.project_id = Some("MN000001".into());
        base.last_action = Some(Action::Lookup);

        // A bare location after a lookup lists that location instead of repeating the lookup
        let x = extracted(
            EntitySet { municipality: Some("Quezon City".into()), ..Default::default() },
            Action::Unknown,
            Signals::default(),
        );
        let out = MergePolicy::default().merge(&x, &base);
        assert_eq!(out.merged.entities.project_id, None);
        assert_eq!(out.merged.last_action, Some(Action::List));
        assert!(out.delta.clear.contains(&SlotKey::ProjectId));

        let x = extracted(EntitySet::default(), Action::Sum, Signals { keyword_matched: true, ..Default::default() });
        let out = MergePolicy::default().merge(&x, &base);
        assert_eq!(out.merged.entities.project_id, None);
        assert_eq!(out.merged.entities.municipality.as_deref(), Some("Manila"));
        assert_eq!(out.merged.last_action, Some(Action::Sum));

        // A bare follow-up without filters keeps it
        let x = extracted(EntitySet::default(), Action::Unknown, Signals::default());
        let out = MergePolicy::default().merge(&x, &base);
        assert_eq!(out.merged.entities.project_id.as_deref(), Some("MN000001"));
        assert_eq!(out.merged.last_action, Some(Action::Lookup));
    }

    #[test]
    fn test_location_policy_parses() {
        assert_eq!("Replace".parse::<LocationPolicy>().unwrap(), LocationPolicy::Replace);
        assert_eq!(" stack ".parse::<LocationPolicy>().unwrap(), LocationPolicy::Stack);
        assert!("mixed".parse::<LocationPolicy>().is_err());
    }
}
