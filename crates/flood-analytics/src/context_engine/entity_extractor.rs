//! Rule-based entity extraction from a single question.
//!
//! The extractor is a pure function of its configuration, the reference values it was built
//! with, the question text and the optional previous answer. Matching runs on normalized text
//! and every accepted span is consumed, so one phrase never feeds two slots.

use chrono::Datelike;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::context_engine::slots::{Action, EntitySet};
use crate::dataset::ReferenceValues;
use crate::utils::text_utils::ROMAN_NUMERALS;
use crate::utils::{NameMatch, NameMatcher, TextUtils};

lazy_static! {
    static ref PROJECT_ID_REGEX: Regex =
        Regex::new(r"\b[A-Za-z0-9][A-Za-z0-9-]{4,18}[A-Za-z0-9]\b").unwrap();
    /// "project", "project id", "id:", "project no." right before a candidate id
    static ref PROJECT_ID_PREFIX_REGEX: Regex =
        Regex::new(r"(?i)\b(?:project|id|code)(?:\s+(?:id|no\.?|number|code))?\s*[#:]?\s*$").unwrap();
    static ref BACK_REFERENCE_REGEX: Regex =
        Regex::new(r"\b(?:that|this|the same|same) (?:project|one)\b|\bits?\b").unwrap();

    static ref YEAR_RANGE_REGEX: Regex = Regex::new(
        r"\b((?:19|20)\d{2})\s*(?:-|to|and|until|through|thru)\s*((?:19|20)\d{2})\b"
    ).unwrap();
    static ref YEAR_REGEX: Regex = Regex::new(r"\b(?:19|20)\d{2}\b").unwrap();
    static ref FISCAL_YEAR_REGEX: Regex = Regex::new(r"\bfy\s*-?\s*((?:19|20)\d{2})\b").unwrap();

    static ref NCR_REGEX: Regex =
        Regex::new(r"\b(?:ncr|national capital region|metro manila|metropolitan manila)\b").unwrap();
    static ref CAR_REGEX: Regex =
        Regex::new(r"\b(?:cordillera administrative region|cordillera|car)\b").unwrap();
    static ref REGION_SUB_REGEX: Regex = Regex::new(r"\bregion (?:iv|4) ?(a|b)\b").unwrap();
    static ref CALABARZON_REGEX: Regex = Regex::new(r"\bcalabarzon\b").unwrap();
    static ref MIMAROPA_REGEX: Regex = Regex::new(r"\bmimaropa\b").unwrap();
    static ref REGION_NUM_REGEX: Regex = Regex::new(r"\bregion ([0-9]{1,2}|[ivx]{1,5})\b").unwrap();

    static ref TOP_N_REGEX: Regex = Regex::new(
        r"\b(?:top|bottom) (\d{1,3}|one|two|three|four|five|six|seven|eight|nine|ten|fifteen|twenty)\b"
    ).unwrap();
    static ref N_RANKED_REGEX: Regex = Regex::new(
        r"\b(\d{1,3}) (?:highest|largest|biggest|most expensive|lowest|smallest|cheapest|least expensive)\b"
    ).unwrap();
    static ref MORE_COUNT_REGEX: Regex = Regex::new(r"\b(\d{1,3}) more\b|\bnext (\d{1,3})\b").unwrap();
    /// Question asks for one winner rather than a ranking
    static ref SINGLE_WINNER_REGEX: Regex = Regex::new(
        r"\b(?:which|what) (?:contractor|municipality|city|town|project)\b|\bwho is the contractor\b|\bthe (?:contractor|municipality|project) with\b"
    ).unwrap();
    static ref CONTRACTOR_RANK_REGEX: Regex = Regex::new(
        r"\b(?:which|what|who is the) contractors?\b|\b(?:top|highest|biggest|largest|leading)(?: \d{1,3}| [a-z]+)? contractors\b|\bcontractors? (?:by|with the)\b"
    ).unwrap();
    static ref MUNICIPALITY_RANK_REGEX: Regex = Regex::new(
        r"\b(?:which|what) (?:municipality|city|town)\b|\b(?:top|highest|biggest|largest|leading)(?: \d{1,3}| [a-z]+)? (?:municipalities|cities|towns)\b|\b(?:municipalit(?:y|ies)|cities|towns) (?:by|with the)\b"
    ).unwrap();

    static ref TYPO_MAP: HashMap<&'static str, &'static str> = [
        ("budjet", "budget"), ("budgget", "budget"), ("bdgt", "budget"), ("budgt", "budget"),
        ("bugdet", "budget"), ("buget", "budget"), ("budgit", "budget"), ("bduget", "budget"),
        ("aproved", "approved"), ("apprved", "approved"), ("approvd", "approved"),
        ("contrator", "contractor"), ("contructor", "contractor"), ("contractr", "contractor"),
        ("contracter", "contractor"), ("contarctor", "contractor"), ("contrators", "contractors"),
        ("contractrs", "contractors"), ("municpality", "municipality"), ("municipalty", "municipality"),
        ("provnce", "province"), ("provice", "province"), ("reigon", "region"), ("regin", "region"),
        ("regoin", "region"), ("rgion", "region"), ("prject", "project"), ("projet", "project"),
        ("projct", "project"), ("proect", "project"), ("prjcts", "projects"), ("prjects", "projects"),
        ("projcts", "projects"), ("projets", "projects"), ("totl", "total"), ("totle", "total"),
        ("averge", "average"), ("avarage", "average"), ("highst", "highest"), ("higest", "highest"),
        ("heighest", "highest"), ("numbr", "number"), ("nmber", "number"), ("whch", "which"),
        ("wich", "which"), ("hw", "how"), ("hwo", "how"), ("mny", "many"), ("manuy", "many"),
        ("wht", "what"), ("waht", "what"), ("shw", "show"), ("lsit", "list"), ("hwmany", "how many"),
    ]
    .into_iter()
    .collect();
}

const CLEAR_PHRASES: &[&str] = &[
    "clear context", "clear the context", "clear filters", "clear all", "start over", "reset",
    "new search", "forget",
];
const TOPIC_PHRASES: &[&str] = &[
    "list", "show", "find", "search", "display", "what about", "how about", "tell me about",
    "instead", "switch to",
];
const MORE_PHRASES: &[&str] = &[
    "show more", "more projects", "more results", "next page", "load more", "see more", "next 5",
    "next five",
];
const MORE_REPLIES: &[&str] = &[
    "more", "next", "yes", "yes please", "ok", "okay", "sure", "continue", "more please", "y",
];
const COUNT_PHRASES: &[&str] = &["how many", "count", "number of"];
const AVERAGE_PHRASES: &[&str] = &["average", "mean", "avg"];
const SUM_PHRASES: &[&str] = &["total", "sum", "how much", "overall budget", "total cost", "combined"];
const LIST_PHRASES: &[&str] = &[
    "list", "show", "find", "display", "give me", "search", "which projects", "what projects",
];
const TOP_PHRASES: &[&str] = &["top", "highest", "largest", "biggest", "most expensive"];
const LOWEST_PHRASES: &[&str] = &["lowest", "smallest", "cheapest", "least expensive", "bottom"];
const RANK_WORDS: &[&str] = &["top", "highest", "most", "largest", "biggest", "leading"];
const BY_COUNT_PHRASES: &[&str] = &[
    "number of projects", "most projects", "project count", "by count", "by projects", "by number",
];
const TREND_PHRASES: &[&str] = &[
    "trend", "by year", "per year", "each year", "yearly", "year by year", "year over year", "over the years",
];

/// Keyword signals that steer merging and pagination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signals {
    /// Continue the previous list
    pub more: bool,
    /// Explicit request to drop remembered context
    pub clear: bool,
    /// New-topic keyword (list/show/find/instead/...)
    pub topic: bool,
    /// Some action rule fired
    pub keyword_matched: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedEntities {
    #[serde(flatten)]
    pub entities: EntitySet,
    pub action: Action,
    /// Rows asked for: N of a ranking, or the page length of "N more"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_n: Option<usize>,
    pub signals: Signals,
}

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Minimum similarity for the tolerant matching phase
    pub fuzzy_threshold: f64,
    pub min_year: i32,
    pub max_year: i32,
    /// Year that "this year" refers to
    pub reference_year: i32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.85,
            min_year: 1990,
            max_year: 2040,
            reference_year: chrono::Utc::now().year(),
        }
    }
}

/// One entry of the ordered action table. The first rule that applies wins.
pub struct ActionRule {
    pub name: &'static str,
    pub action: Action,
    pub applies: fn(&str, &Signals) -> bool,
}

fn contains_any(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| TextUtils::contains_phrase(text, p))
}

fn more_rule(_: &str, signals: &Signals) -> bool {
    signals.more
}

fn trend_rule(text: &str, _: &Signals) -> bool {
    contains_any(text, TREND_PHRASES)
}

fn contractor_rank_rule(text: &str, _: &Signals) -> bool {
    CONTRACTOR_RANK_REGEX.is_match(text) && contains_any(text, RANK_WORDS)
}

fn contractor_count_rule(text: &str, signals: &Signals) -> bool {
    contractor_rank_rule(text, signals) && contains_any(text, BY_COUNT_PHRASES)
}

fn municipality_rank_rule(text: &str, _: &Signals) -> bool {
    MUNICIPALITY_RANK_REGEX.is_match(text) && contains_any(text, RANK_WORDS)
}

fn lowest_rule(text: &str, _: &Signals) -> bool {
    contains_any(text, LOWEST_PHRASES)
}

fn top_rule(text: &str, _: &Signals) -> bool {
    contains_any(text, TOP_PHRASES)
}

fn count_rule(text: &str, _: &Signals) -> bool {
    contains_any(text, COUNT_PHRASES)
}

fn average_rule(text: &str, _: &Signals) -> bool {
    contains_any(text, AVERAGE_PHRASES)
}

fn sum_rule(text: &str, _: &Signals) -> bool {
    contains_any(text, SUM_PHRASES)
}

fn list_rule(text: &str, _: &Signals) -> bool {
    contains_any(text, LIST_PHRASES)
}

pub static ACTION_RULES: [ActionRule; 11] = [
    ActionRule { name: "more", action: Action::Unknown, applies: more_rule },
    ActionRule { name: "trend_by_year", action: Action::TrendByYear, applies: trend_rule },
    ActionRule { name: "top_contractors_by_count", action: Action::TopContractorsByCount, applies: contractor_count_rule },
    ActionRule { name: "top_contractors", action: Action::TopContractors, applies: contractor_rank_rule },
    ActionRule { name: "top_municipalities", action: Action::TopMunicipalities, applies: municipality_rank_rule },
    ActionRule { name: "lowest_n", action: Action::LowestN, applies: lowest_rule },
    ActionRule { name: "top_n", action: Action::TopN, applies: top_rule },
    ActionRule { name: "count", action: Action::Count, applies: count_rule },
    ActionRule { name: "average", action: Action::Average, applies: average_rule },
    ActionRule { name: "sum", action: Action::Sum, applies: sum_rule },
    ActionRule { name: "list", action: Action::List, applies: list_rule },
];

/// The first applicable rule, if any.
pub fn first_matching_rule(text: &str, signals: &Signals) -> Option<&'static ActionRule> {
    ACTION_RULES.iter().find(|rule| (rule.applies)(text, signals))
}

pub struct EntityExtractor {
    config: ExtractorConfig,
    municipalities: NameMatcher,
    provinces: NameMatcher,
    regions: NameMatcher,
    contractors: NameMatcher,
    /// Uppercased dataset project ids
    project_ids: HashSet<String>,
    /// (display name, dataset value) for mapping region patterns onto dataset spelling
    region_displays: Vec<(String, String)>,
}

impl EntityExtractor {
    pub fn new(reference: &ReferenceValues, config: ExtractorConfig) -> Self {
        let region_displays = reference
            .regions
            .iter()
            .map(|r| (TextUtils::display_region(r), r.clone()))
            .collect();

        Self {
            municipalities: NameMatcher::new(&reference.municipalities),
            provinces: NameMatcher::new(&reference.provinces),
            regions: NameMatcher::new(&reference.regions),
            contractors: NameMatcher::for_contractors(&reference.contractors),
            project_ids: reference.project_ids.iter().map(|id| id.trim().to_uppercase()).collect(),
            region_displays,
            config,
        }
    }

    /// Extract entities, action and signals from `question`.
    ///
    /// `prior_answer` is only consulted for "that project" style back-references.
    /// `has_prior_action` decides whether a question without any action keyword is left
    /// `Unknown` (to inherit) or defaults to `List`.
    pub fn extract(&self, question: &str, prior_answer: Option<&str>, has_prior_action: bool) -> ExtractedEntities {
        let mut out = ExtractedEntities::default();
        let folded = TextUtils::fold_diacritics(question).to_lowercase();

        // An accepted id is scrubbed so its digits cannot read as years
        let raw_id = self.explicit_project_id(question);
        let scrubbed = match &raw_id {
            Some(id) => folded.replace(&id.to_lowercase(), " "),
            None => folded.clone(),
        };
        let scrubbed = FISCAL_YEAR_REGEX.replace_all(&scrubbed, " ${1} ").into_owned();
        let text = correct_typos(&TextUtils::normalize(&scrubbed));

        out.entities.project_id = raw_id.map(|id| id.to_uppercase()).or_else(|| {
            prior_answer
                .filter(|_| BACK_REFERENCE_REGEX.is_match(&text))
                .and_then(|prior| self.answer_project_id(prior))
                .map(|id| id.to_uppercase())
        });

        out.signals.clear = contains_any(&text, CLEAR_PHRASES);
        out.signals.topic = contains_any(&text, TOPIC_PHRASES);
        let more_count = MORE_COUNT_REGEX
            .captures(&text)
            .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .filter(|n| *n > 0);
        out.signals.more =
            MORE_REPLIES.contains(&text.as_str()) || contains_any(&text, MORE_PHRASES) || more_count.is_some();

        self.extract_locations(&text, &mut out.entities);
        self.extract_years(&scrubbed, &mut out.entities);

        let rule = first_matching_rule(&text, &out.signals);
        out.signals.keyword_matched = rule.is_some();
        out.action = match rule {
            Some(rule) => rule.action,
            None if has_prior_action => Action::Unknown,
            None => Action::List,
        };
        if out.entities.project_id.is_some()
            && !out.signals.more
            && (out.action == Action::List || rule.is_none())
        {
            out.action = Action::Lookup;
        }
        out.top_n = match out.action {
            Action::TopN
            | Action::LowestN
            | Action::TopContractors
            | Action::TopContractorsByCount
            | Action::TopMunicipalities => {
                parse_top_n(&text).or_else(|| SINGLE_WINNER_REGEX.is_match(&text).then_some(1))
            }
            _ if out.signals.more => more_count,
            _ => None,
        };

        debug!(
            "Extracted action={} rule={:?} entities={:?}",
            out.action,
            rule.map(|r| r.name),
            out.entities
        );
        out
    }

    /// A token shaped like a project id counts as one when it is a dataset id, follows
    /// "project"/"id", or is the whole question.
    fn explicit_project_id(&self, question: &str) -> Option<String> {
        let whole = question.trim().trim_end_matches(['?', '.', '!']).trim();
        PROJECT_ID_REGEX
            .find_iter(question)
            .find(|m| {
                let token = m.as_str();
                self.project_ids.contains(&token.to_uppercase())
                    || (looks_like_project_id(token)
                        && (token == whole || PROJECT_ID_PREFIX_REGEX.is_match(&question[..m.start()])))
            })
            .map(|m| m.as_str().to_string())
    }

    /// Id mentioned in one of our own answers: a dataset id if there is one, otherwise the
    /// first id-shaped token.
    fn answer_project_id(&self, answer: &str) -> Option<String> {
        PROJECT_ID_REGEX
            .find_iter(answer)
            .map(|m| m.as_str())
            .find(|token| self.project_ids.contains(&token.to_uppercase()))
            .map(str::to_string)
            .or_else(|| find_project_id(answer))
    }

    fn extract_locations(&self, text: &str, entities: &mut EntitySet) {
        let mut work = text.to_string();
        let take = |work: &mut String, hit: &NameMatch| {
            TextUtils::consume_span(work, hit.start, hit.len);
            hit.value.clone()
        };

        if let Some((display, start, len)) = match_region_pattern(&work) {
            TextUtils::consume_span(&mut work, start, len);
            entities.region = Some(self.canonical_region(&display));
        } else if let Some(hit) = self.regions.exact(&work) {
            entities.region = Some(take(&mut work, &hit));
        }
        if let Some(hit) = self.municipalities.exact(&work) {
            entities.municipality = Some(take(&mut work, &hit));
        }
        if let Some(hit) = self.provinces.exact(&work) {
            entities.province = Some(take(&mut work, &hit));
        }
        if let Some(hit) = self.contractors.exact(&work) {
            entities.contractor = Some(take(&mut work, &hit));
        }

        let threshold = self.config.fuzzy_threshold;
        if !entities.has_location() {
            if let Some(hit) = self.municipalities.tolerant(&work, threshold) {
                debug!("Tolerant municipality match {} ({:.2})", hit.value, hit.score);
                entities.municipality = Some(take(&mut work, &hit));
            } else if let Some(hit) = self.provinces.tolerant(&work, threshold) {
                debug!("Tolerant province match {} ({:.2})", hit.value, hit.score);
                entities.province = Some(take(&mut work, &hit));
            }
        }
        if entities.contractor.is_none() {
            if let Some(hit) = self.contractors.tolerant(&work, threshold) {
                debug!("Tolerant contractor match {} ({:.2})", hit.value, hit.score);
                entities.contractor = Some(take(&mut work, &hit));
            }
        }
    }

    fn extract_years(&self, text: &str, entities: &mut EntitySet) {
        let in_range = |y: i32| y >= self.config.min_year && y <= self.config.max_year;

        for caps in YEAR_RANGE_REGEX.captures_iter(text) {
            let a = caps[1].parse::<i32>().ok();
            let b = caps[2].parse::<i32>().ok();
            if let (Some(a), Some(b)) = (a, b) {
                if in_range(a) && in_range(b) {
                    entities.year_range = Some((a.min(b), a.max(b)));
                    return;
                }
            }
        }

        let single = YEAR_REGEX
            .find_iter(text)
            .filter_map(|m| m.as_str().parse::<i32>().ok())
            .find(|y| in_range(*y));
        if let Some(y) = single {
            entities.year = Some(y);
            return;
        }

        let normalized = TextUtils::normalize(text);
        if TextUtils::contains_phrase(&normalized, "this year") {
            entities.year = Some(self.config.reference_year);
        } else if TextUtils::contains_phrase(&normalized, "last year") {
            entities.year = Some(self.config.reference_year - 1);
        }
    }

    /// Dataset spelling for a region display name, or the display name itself.
    fn canonical_region(&self, display: &str) -> String {
        self.region_displays
            .iter()
            .find(|(d, _)| d == display)
            .map(|(_, value)| value.clone())
            .unwrap_or_else(|| display.to_string())
    }
}

/// Apply the keyword typo map to normalized text.
pub fn correct_typos(text: &str) -> String {
    text.split(' ')
        .map(|w| TYPO_MAP.get(w).copied().unwrap_or(w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// 6-20 letters, digits or hyphens with at least one letter and two digits.
fn looks_like_project_id(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_alphabetic()) && token.chars().filter(|c| c.is_ascii_digit()).count() >= 2
}

/// First token shaped like a project id.
pub fn find_project_id(text: &str) -> Option<String> {
    PROJECT_ID_REGEX
        .find_iter(text)
        .map(|m| m.as_str())
        .find(|token| looks_like_project_id(token))
        .map(str::to_string)
}

/// Region aliases recognised without a reference list. Returns (display, start, len).
fn match_region_pattern(text: &str) -> Option<(String, usize, usize)> {
    if let Some(m) = NCR_REGEX.find(text) {
        return Some(("NCR".to_string(), m.start(), m.len()));
    }
    if let Some(m) = CAR_REGEX.find(text) {
        return Some(("CAR".to_string(), m.start(), m.len()));
    }
    if let Some(caps) = REGION_SUB_REGEX.captures(text) {
        let m = caps.get(0)?;
        return Some((format!("Region IV-{}", caps[1].to_uppercase()), m.start(), m.len()));
    }
    if let Some(m) = CALABARZON_REGEX.find(text) {
        return Some(("Region IV-A".to_string(), m.start(), m.len()));
    }
    if let Some(m) = MIMAROPA_REGEX.find(text) {
        return Some(("Region IV-B".to_string(), m.start(), m.len()));
    }
    if let Some(caps) = REGION_NUM_REGEX.captures(text) {
        let m = caps.get(0)?;
        let code = &caps[1];
        let roman = ROMAN_NUMERALS
            .iter()
            .find(|(arabic, roman)| *arabic == code || *roman == code)
            .map(|(_, roman)| *roman)?;
        return Some((format!("Region {}", roman.to_uppercase()), m.start(), m.len()));
    }
    None
}

fn parse_top_n(text: &str) -> Option<usize> {
    let raw = TOP_N_REGEX
        .captures(text)
        .or_else(|| N_RANKED_REGEX.captures(text))
        .map(|caps| caps[1].to_string())?;
    let n = match raw.as_str() {
        "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "fifteen" => 15,
        "twenty" => 20,
        digits => digits.parse().ok()?,
    };
    (n > 0).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> ReferenceValues {
        ReferenceValues {
            municipalities: vec!["Quezon City".into(), "Manila".into(), "San Fernando".into()],
            provinces: vec!["Pampanga".into(), "Quezon".into(), "Metro Manila".into()],
            regions: vec!["Region III".into(), "National Capital Region".into()],
            contractors: vec!["LEGACY CONSTRUCTION CORPORATION".into(), "ALPHA BUILDERS".into()],
            project_ids: vec!["P00001AB".into(), "QC2021A01".into()],
        }
    }

    fn extractor() -> EntityExtractor {
        EntityExtractor::new(
            &reference(),
            ExtractorConfig { reference_year: 2024, ..Default::default() },
        )
    }

    #[test]
    fn test_count_in_municipality() {
        let e = extractor().extract("How many projects are in Quezon City?", None, false);
        assert_eq!(e.action, Action::Count);
        assert_eq!(e.entities.municipality.as_deref(), Some("Quezon City"));
        assert_eq!(e.entities.province, None);
        assert!(e.signals.keyword_matched);
        assert!(!e.signals.topic);
    }

    #[test]
    fn test_region_patterns_consume_their_span() {
        let x = extractor();
        let e = x.extract("total budget in metro manila", None, false);
        assert_eq!(e.entities.region.as_deref(), Some("National Capital Region"));
        assert_eq!(e.entities.municipality, None);
        assert_eq!(e.entities.province, None);

        let e = x.extract("projects in region 3", None, false);
        assert_eq!(e.entities.region.as_deref(), Some("Region III"));

        let e = x.extract("list projects in Region IV-A", None, false);
        assert_eq!(e.entities.region.as_deref(), Some("Region IV-A"));
    }

    #[test]
    fn test_tolerant_match_only_when_exact_fails() {
        let x = extractor();
        let e = x.extract("total budget in Quezn City", None, false);
        assert_eq!(e.entities.municipality.as_deref(), Some("Quezon City"));

        let e = x.extract("projects in Xyzzyville", None, false);
        assert!(!e.entities.has_location());
    }

    #[test]
    fn test_contractor_by_distinctive_part() {
        let e = extractor().extract("how many projects did Legacy get", None, false);
        assert_eq!(e.entities.contractor.as_deref(), Some("LEGACY CONSTRUCTION CORPORATION"));
    }

    #[test]
    fn test_year_range_wins_over_single_years() {
        let x = extractor();
        let e = x.extract("total budget from 2018 to 2020", None, false);
        assert_eq!(e.entities.year_range, Some((2018, 2020)));
        assert_eq!(e.entities.year, None);

        let e = x.extract("projects 2020-2018", None, false);
        assert_eq!(e.entities.year_range, Some((2018, 2020)));

        let e = x.extract("projects in 2021", None, false);
        assert_eq!(e.entities.year, Some(2021));

        let e = x.extract("projects in 1850", None, false);
        assert_eq!(e.entities.year, None);

        let e = x.extract("count projects last year", None, false);
        assert_eq!(e.entities.year, Some(2023));
    }

    #[test]
    fn test_project_id_lookup() {
        let x = extractor();
        // Known dataset id anywhere in the question
        let e = x.extract("Tell me about P00001AB", None, false);
        assert_eq!(e.entities.project_id.as_deref(), Some("P00001AB"));
        assert_eq!(e.action, Action::Lookup);

        // Unknown id after "project"
        let e = x.extract("show project p1000-22lz", None, false);
        assert_eq!(e.entities.project_id.as_deref(), Some("P1000-22LZ"));
        assert_eq!(e.action, Action::Lookup);

        let e = x.extract("details for project id: NOPE123456", None, false);
        assert_eq!(e.entities.project_id.as_deref(), Some("NOPE123456"));

        // The whole question; ids never read as years
        let e = x.extract("P2019ABC?", None, false);
        assert_eq!(e.entities.project_id.as_deref(), Some("P2019ABC"));
        assert_eq!(e.entities.year, None);
        assert_eq!(e.action, Action::Lookup);
        assert!(!e.signals.keyword_matched);

        let e = x.extract("who built QC2021A01", None, false);
        assert_eq!(e.entities.project_id.as_deref(), Some("QC2021A01"));
        assert_eq!(e.entities.year, None);
    }

    #[test]
    fn test_id_shaped_words_are_not_ids() {
        let x = extractor();
        let e = x.extract("How many projects in Quezon City for FY2021?", None, false);
        assert_eq!(e.entities.project_id, None);
        assert_eq!(e.entities.year, Some(2021));
        assert_eq!(e.entities.municipality.as_deref(), Some("Quezon City"));
        assert_eq!(e.action, Action::Count);

        let e = x.extract("how many covid-19 projects in Manila", None, false);
        assert_eq!(e.entities.project_id, None);
        assert_eq!(e.action, Action::Count);

        let e = x.extract("total budget fy 2019 to fy 2020", None, false);
        assert_eq!(e.entities.year_range, Some((2019, 2020)));

        let e = x.extract("list projects like abc123 in Manila", None, false);
        assert_eq!(e.entities.project_id, None);
        assert_eq!(e.action, Action::List);
    }

    #[test]
    fn test_back_reference_uses_prior_answer() {
        let prior = "- P00007ZZ — ALPHA BUILDERS — ₱1,000.00";
        let e = extractor().extract("who built that project?", Some(prior), true);
        assert_eq!(e.entities.project_id.as_deref(), Some("P00007ZZ"));
        assert_eq!(e.action, Action::Lookup);

        let e = extractor().extract("how many projects?", Some(prior), true);
        assert_eq!(e.entities.project_id, None);
    }

    #[test]
    fn test_action_rule_order() {
        let x = extractor();
        assert_eq!(x.extract("top 10 projects by budget", None, false).top_n, Some(10));
        assert_eq!(x.extract("top 10 projects by budget", None, false).action, Action::TopN);
        assert_eq!(x.extract("show the highest budget projects", None, false).action, Action::TopN);
        assert_eq!(x.extract("how many projects in total", None, false).action, Action::Count);
        assert_eq!(x.extract("average budget", None, false).action, Action::Average);
        assert_eq!(x.extract("What's the total budget?", None, false).action, Action::Sum);
        assert_eq!(x.extract("list projects", None, false).action, Action::List);

        assert_eq!(x.extract("5 lowest budget projects", None, false).action, Action::LowestN);
        assert_eq!(x.extract("5 lowest budget projects", None, false).top_n, Some(5));
        assert_eq!(x.extract("total budget per year in Manila", None, false).action, Action::TrendByYear);
        assert_eq!(x.extract("how many projects each year", None, false).action, Action::TrendByYear);

        let rule = first_matching_rule("how many show", &Signals::default()).unwrap();
        assert_eq!(rule.name, "count");
        assert!(first_matching_rule("hello there", &Signals::default()).is_none());
    }

    #[test]
    fn test_group_rankings() {
        let x = extractor();
        let e = x.extract("top 5 contractors by total budget in Region III", None, false);
        assert_eq!(e.action, Action::TopContractors);
        assert_eq!(e.top_n, Some(5));
        assert_eq!(e.entities.region.as_deref(), Some("Region III"));

        let e = x.extract("top 10 contractors by number of projects", None, false);
        assert_eq!(e.action, Action::TopContractorsByCount);
        assert_eq!(e.top_n, Some(10));

        let e = x.extract("Which contractor has the most projects?", None, false);
        assert_eq!(e.action, Action::TopContractorsByCount);
        assert_eq!(e.top_n, Some(1));

        let e = x.extract("which municipality has the highest total budget in region 3", None, false);
        assert_eq!(e.action, Action::TopMunicipalities);
        assert_eq!(e.top_n, Some(1));

        let e = x.extract("which project has the lowest budget", None, false);
        assert_eq!(e.action, Action::LowestN);
        assert_eq!(e.top_n, Some(1));

        // Plain rankings of projects are untouched
        let e = x.extract("top 3 projects in Quezon City", None, false);
        assert_eq!(e.action, Action::TopN);
        assert_eq!(e.top_n, Some(3));
    }

    #[test]
    fn test_more_with_count() {
        let x = extractor();
        let e = x.extract("show 10 more projects", None, true);
        assert!(e.signals.more);
        assert_eq!(e.action, Action::Unknown);
        assert_eq!(e.top_n, Some(10));

        let e = x.extract("next 3", None, true);
        assert!(e.signals.more);
        assert_eq!(e.top_n, Some(3));

        assert_eq!(x.extract("more", None, true).top_n, None);
    }

    #[test]
    fn test_no_keyword_depends_on_prior_action() {
        let x = extractor();
        let e = x.extract("Manila", None, true);
        assert_eq!(e.action, Action::Unknown);
        assert!(!e.signals.keyword_matched);

        let e = x.extract("Manila", None, false);
        assert_eq!(e.action, Action::List);
        assert!(!e.signals.keyword_matched);
    }

    #[test]
    fn test_signals() {
        let x = extractor();
        let e = x.extract("more", None, true);
        assert!(e.signals.more);
        assert_eq!(e.action, Action::Unknown);
        assert!(x.extract("Show more", None, true).signals.more);
        assert!(!x.extract("more than ten projects", None, true).signals.more);

        let e = x.extract("Show me Quezon City instead", None, true);
        assert!(e.signals.topic);
        assert_eq!(e.action, Action::List);

        assert!(x.extract("start over", None, true).signals.clear);
    }

    #[test]
    fn test_typo_correction() {
        assert_eq!(correct_typos("total budjet by contrator"), "total budget by contractor");
        let e = extractor().extract("hw mny projcts in Manila", None, false);
        assert_eq!(e.action, Action::Count);
        assert_eq!(e.entities.municipality.as_deref(), Some("Manila"));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let x = extractor();
        let q = "total budget of Alpha Builders in Pampanga 2019";
        assert_eq!(x.extract(q, None, false), x.extract(q, None, false));
        let e = x.extract(q, None, false);
        assert_eq!(e.entities.contractor.as_deref(), Some("ALPHA BUILDERS"));
        assert_eq!(e.entities.province.as_deref(), Some("Pampanga"));
        assert_eq!(e.entities.year, Some(2019));
    }
}
