//! Turns merged context into a concrete answer over the dataset.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

use crate::context_engine::entity_extractor::ExtractedEntities;
use crate::context_engine::filter::FilterSpec;
use crate::context_engine::pagination::{ListOrder, PageSlice, PageStep, PaginationCursor, Paginator};
use crate::context_engine::slots::{Action, ContextSlots};
use crate::dataset::{Dataset, ProjectRow};
use crate::utils::TextUtils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrencyKind {
    Sum,
    Average,
}

/// Column a grouped answer aggregates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Contractor,
    Municipality,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMetric {
    /// Sum of approved budgets
    Budget,
    /// Number of projects
    Count,
}

/// One group of a grouped answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTotal {
    /// Dataset spelling of the first row seen for the group
    pub name: String,
    pub projects: usize,
    pub with_budget: usize,
    pub total: f64,
    pub formatted: String,
}

impl GroupTotal {
    fn value(&self, metric: GroupMetric) -> f64 {
        match metric {
            GroupMetric::Budget => self.total,
            GroupMetric::Count => self.projects as f64,
        }
    }
}

/// Outcome of a resolved question. Empty, NotFound, EndOfResults, NothingToContinue,
/// NoBudgetData and Clarification are ordinary outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Answer {
    Count {
        count: usize,
    },
    Currency {
        currency: CurrencyKind,
        amount: f64,
        formatted: String,
        /// Rows matching the filter
        matched: usize,
        /// Rows among them that carry a budget
        with_budget: usize,
    },
    Ranked {
        rows: Vec<ProjectRow>,
        #[serde(default = "default_rank_order")]
        order: ListOrder,
        requested: usize,
        matched: usize,
        /// Length of the whole ranking; rows past `rows` are reachable with "more"
        #[serde(default)]
        with_budget: usize,
    },
    Grouped {
        by: GroupBy,
        metric: GroupMetric,
        groups: Vec<GroupTotal>,
        requested: usize,
    },
    Page(PageSlice),
    Project {
        row: ProjectRow,
    },
    Empty,
    NotFound {
        project_id: String,
    },
    NoBudgetData {
        matched: usize,
    },
    EndOfResults {
        total: usize,
    },
    /// "more" when the last answer was not a list or ranking
    NothingToContinue,
    Clarification,
}

fn default_rank_order() -> ListOrder {
    ListOrder::BudgetDesc
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    pub answer: Answer,
    /// Action the answer was computed for
    pub action: Action,
    pub filter: FilterSpec,
    /// Merged context with `last_action` set to the resolved action
    pub context: ContextSlots,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub payload: ResultPayload,
    /// Cursor to persist, if this turn started or advanced a listing
    pub cursor: Option<PaginationCursor>,
}

#[derive(Debug, Clone)]
pub struct QueryResolver {
    dataset: Arc<Dataset>,
    paginator: Paginator,
    default_top_n: usize,
}

impl QueryResolver {
    pub fn new(dataset: Arc<Dataset>, page_size: usize, default_top_n: usize) -> Self {
        Self {
            dataset,
            paginator: Paginator::new(page_size),
            default_top_n: default_top_n.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.paginator.page_size()
    }

    pub fn resolve(
        &self,
        extracted: &ExtractedEntities,
        merged: &ContextSlots,
        cursor: Option<&PaginationCursor>,
    ) -> Resolution {
        let filter = FilterSpec::from_slots(merged);

        if Self::needs_clarification(extracted) {
            return self.finish(Answer::Clarification, Action::Unknown, filter, merged, None);
        }
        if extracted.signals.more {
            return self.continue_listing(extracted, merged, cursor, filter);
        }

        let action = match extracted.action {
            Action::Unknown => merged.last_action.unwrap_or(Action::Unknown),
            other => other,
        };
        debug!("Resolving {} with filter {:?}", action, filter);

        let n = extracted.top_n.unwrap_or(self.default_top_n).max(1);
        match action {
            Action::Count => {
                let count = filter.apply(&self.dataset).len();
                let answer = if count == 0 { Answer::Empty } else { Answer::Count { count } };
                self.finish(answer, action, filter, merged, None)
            }
            Action::Sum | Action::Average => {
                let answer = self.aggregate(&filter, action);
                self.finish(answer, action, filter, merged, None)
            }
            Action::TopN | Action::LowestN => {
                let order = if action == Action::TopN { ListOrder::BudgetDesc } else { ListOrder::BudgetAsc };
                let (answer, next) = self.rank(&filter, order, n);
                self.finish(answer, action, filter, merged, next)
            }
            Action::TopContractors => {
                let answer = self.group(&filter, GroupBy::Contractor, GroupMetric::Budget, Some(n));
                self.finish(answer, action, filter, merged, None)
            }
            Action::TopContractorsByCount => {
                let answer = self.group(&filter, GroupBy::Contractor, GroupMetric::Count, Some(n));
                self.finish(answer, action, filter, merged, None)
            }
            Action::TopMunicipalities => {
                let answer = self.group(&filter, GroupBy::Municipality, GroupMetric::Budget, Some(n));
                self.finish(answer, action, filter, merged, None)
            }
            Action::TrendByYear => {
                let answer = self.group(&filter, GroupBy::Year, GroupMetric::Budget, None);
                self.finish(answer, action, filter, merged, None)
            }
            Action::List => {
                let matching = filter.apply(&self.dataset);
                if matching.is_empty() {
                    return self.finish(Answer::Empty, action, filter, merged, None);
                }
                let (slice, cursor) = self.paginator.first_page(&filter, &matching);
                self.finish(Answer::Page(slice), action, filter, merged, Some(cursor))
            }
            Action::Lookup => match merged.entities.project_id.as_deref() {
                Some(id) => {
                    let answer = self.lookup(id);
                    self.finish(answer, action, filter, merged, None)
                }
                None => self.finish(Answer::Clarification, Action::Unknown, filter, merged, None),
            },
            Action::Unknown => self.finish(Answer::Clarification, Action::Unknown, filter, merged, None),
        }
    }

    /// No action keyword, no remembered action and nothing to filter on. The extractor only
    /// defaults to `list` without a keyword when there is no prior action.
    fn needs_clarification(extracted: &ExtractedEntities) -> bool {
        !extracted.signals.keyword_matched
            && !extracted.signals.more
            && extracted.entities.is_empty()
            && extracted.action == Action::List
    }

    /// "more": next page of the list or ranking answered last. With nothing pending the
    /// remembered action is left alone, unless the request names filters of its own, which
    /// makes it a fresh list.
    fn continue_listing(
        &self,
        extracted: &ExtractedEntities,
        merged: &ContextSlots,
        cursor: Option<&PaginationCursor>,
        filter: FilterSpec,
    ) -> Resolution {
        let action = match merged.last_action.filter(Action::is_listing) {
            Some(action) => action,
            None if extracted.entities.is_empty() => {
                return self.finish(Answer::NothingToContinue, Action::Unknown, filter, merged, None);
            }
            None => Action::List,
        };
        let order = match action {
            Action::TopN => ListOrder::BudgetDesc,
            Action::LowestN => ListOrder::BudgetAsc,
            _ => ListOrder::Dataset,
        };

        let mut rows = filter.apply(&self.dataset);
        if rows.is_empty() {
            return self.finish(Answer::Empty, action, filter, merged, None);
        }
        let matched = rows.len();
        order.arrange(&mut rows);
        if rows.is_empty() {
            return self.finish(Answer::NoBudgetData { matched }, action, filter, merged, None);
        }

        match self.paginator.next_page(cursor, &filter, order, &rows, extracted.top_n) {
            PageStep::Page(slice, next) => self.finish(Answer::Page(slice), action, filter, merged, Some(next)),
            PageStep::EndOfResults { total } => {
                self.finish(Answer::EndOfResults { total }, action, filter, merged, None)
            }
        }
    }

    fn aggregate(&self, filter: &FilterSpec, action: Action) -> Answer {
        let matching = filter.apply(&self.dataset);
        if matching.is_empty() {
            return Answer::Empty;
        }
        let budgets: Vec<f64> = matching.iter().filter_map(|r| r.budget).collect();
        let total: f64 = budgets.iter().sum();

        let (currency, amount) = if action == Action::Average {
            if budgets.is_empty() {
                return Answer::NoBudgetData { matched: matching.len() };
            }
            (CurrencyKind::Average, total / budgets.len() as f64)
        } else {
            (CurrencyKind::Sum, total)
        };

        Answer::Currency {
            currency,
            amount,
            formatted: TextUtils::format_money(amount),
            matched: matching.len(),
            with_budget: budgets.len(),
        }
    }

    /// First `n` budgeted rows in `order`, plus a cursor so "more" continues the ranking.
    fn rank(&self, filter: &FilterSpec, order: ListOrder, n: usize) -> (Answer, Option<PaginationCursor>) {
        let matching = filter.apply(&self.dataset);
        if matching.is_empty() {
            return (Answer::Empty, None);
        }
        let mut ranked = matching.clone();
        order.arrange(&mut ranked);
        if ranked.is_empty() {
            return (Answer::NoBudgetData { matched: matching.len() }, None);
        }

        let rows: Vec<ProjectRow> = ranked.iter().take(n).map(|r| (*r).clone()).collect();
        let cursor = self.paginator.ranked(filter, order, rows.len(), ranked.len());
        let answer = Answer::Ranked {
            rows,
            order,
            requested: n,
            matched: matching.len(),
            with_budget: ranked.len(),
        };
        (answer, Some(cursor))
    }

    /// Totals per contractor, municipality or year. Years come out in calendar order, the
    /// others by `metric`, largest first; equal values keep first-seen order. A request for a
    /// single winner keeps every group tied with it.
    fn group(&self, filter: &FilterSpec, by: GroupBy, metric: GroupMetric, n: Option<usize>) -> Answer {
        let matching = filter.apply(&self.dataset);
        if matching.is_empty() {
            return Answer::Empty;
        }

        let mut groups: Vec<GroupTotal> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for row in &matching {
            let name = match by {
                GroupBy::Contractor => row.contractor.trim().to_string(),
                GroupBy::Municipality => row.municipality.trim().to_string(),
                GroupBy::Year => row.year.map(|y| y.to_string()).unwrap_or_default(),
            };
            if name.is_empty() {
                continue;
            }
            let key = TextUtils::normalize(&name);
            let slot = match index.get(&key) {
                Some(slot) => *slot,
                None => {
                    groups.push(GroupTotal { name, projects: 0, with_budget: 0, total: 0.0, formatted: String::new() });
                    index.insert(key, groups.len() - 1);
                    groups.len() - 1
                }
            };
            let group = &mut groups[slot];
            group.projects += 1;
            if let Some(budget) = row.budget {
                group.total += budget;
                group.with_budget += 1;
            }
        }

        if metric == GroupMetric::Budget && groups.iter().all(|g| g.with_budget == 0) {
            return Answer::NoBudgetData { matched: matching.len() };
        }
        for group in &mut groups {
            group.formatted = TextUtils::format_money(group.total);
        }

        match by {
            GroupBy::Year => groups.sort_by_key(|g| g.name.parse::<i32>().unwrap_or(i32::MAX)),
            _ => groups.sort_by(|a, b| b.value(metric).total_cmp(&a.value(metric))),
        }
        let requested = n.unwrap_or(groups.len());
        match (n, groups.first().map(|g| g.value(metric))) {
            (Some(1), Some(best)) => groups.retain(|g| g.value(metric) == best),
            (Some(n), _) => groups.truncate(n),
            (None, _) => {}
        }

        Answer::Grouped { by, metric, groups, requested }
    }

    fn lookup(&self, project_id: &str) -> Answer {
        self.dataset
            .rows()
            .iter()
            .find(|r| r.project_id.eq_ignore_ascii_case(project_id))
            .map(|row| Answer::Project { row: row.clone() })
            .unwrap_or_else(|| Answer::NotFound { project_id: project_id.to_string() })
    }

    fn finish(
        &self,
        answer: Answer,
        action: Action,
        filter: FilterSpec,
        merged: &ContextSlots,
        cursor: Option<PaginationCursor>,
    ) -> Resolution {
        let mut context = merged.clone();
        if action != Action::Unknown {
            context.last_action = Some(action);
        }
        Resolution {
            payload: ResultPayload { answer, action, filter, context },
            cursor,
        }
    }
}

impl ResultPayload {
    /// User-facing text for this payload.
    pub fn render(&self, page_size: usize) -> String {
        let scope = self.filter.describe();
        let scope = if scope.is_empty() { String::new() } else { format!(" {}", scope) };

        match &self.answer {
            Answer::Count { count } => {
                if *count == 1 {
                    format!("There is 1 flood control project{}.", scope)
                } else {
                    format!("There are {} flood control projects{}.", count, scope)
                }
            }
            Answer::Currency { currency: CurrencyKind::Sum, formatted, matched, with_budget, .. } => {
                let mut text = format!(
                    "The total approved budget{} is {} across {} project{}.",
                    scope,
                    formatted,
                    matched,
                    plural(*matched)
                );
                if with_budget < matched {
                    let missing = matched - with_budget;
                    let _ = write!(text, " {} project{} had no budget data.", missing, plural(missing));
                }
                text
            }
            Answer::Currency { currency: CurrencyKind::Average, formatted, with_budget, .. } => format!(
                "The average approved budget{} is {} across {} project{} with budget data.",
                scope,
                formatted,
                with_budget,
                plural(*with_budget)
            ),
            Answer::Ranked { rows, order, with_budget, .. } => {
                let mut text = match order {
                    ListOrder::BudgetAsc => format!(
                        "{} project{} with the lowest approved budget{}:",
                        rows.len(),
                        plural(rows.len()),
                        scope
                    ),
                    _ => format!("Top {} project{} by approved budget{}:", rows.len(), plural(rows.len()), scope),
                };
                for (i, row) in rows.iter().enumerate() {
                    let _ = write!(text, "\n{}. {}", i + 1, row_line(row));
                }
                let remaining = with_budget.saturating_sub(rows.len());
                if remaining > 0 {
                    let next = remaining.min(page_size.max(1));
                    let _ = write!(text, "\n\nWould you like {} more project{}?", next, plural(next));
                }
                text
            }
            Answer::Grouped { by, metric, groups, requested } => render_groups(*by, *metric, groups, *requested, &scope),
            Answer::Page(slice) => {
                let first = slice.offset + 1;
                let last = slice.offset + slice.rows.len();
                let lead = if slice.offset == 0 { "Projects" } else { "More projects" };
                let ranking = match slice.order {
                    ListOrder::Dataset => "",
                    ListOrder::BudgetDesc => " by highest approved budget",
                    ListOrder::BudgetAsc => " by lowest approved budget",
                };
                let mut text = format!("{}{}{} ({}-{} of {}):", lead, ranking, scope, first, last, slice.total);
                for (i, row) in slice.rows.iter().enumerate() {
                    if slice.order == ListOrder::Dataset {
                        let _ = write!(text, "\n- {}", row_line(row));
                    } else {
                        let _ = write!(text, "\n{}. {}", slice.offset + i + 1, row_line(row));
                    }
                }
                if slice.has_more() {
                    let next = slice.remaining().min(page_size.max(1));
                    let _ = write!(text, "\n\nWould you like {} more project{}?", next, plural(next));
                }
                text
            }
            Answer::Project { row } => describe_project(row),
            Answer::Empty => format!("I couldn't find any flood control projects{}.", scope),
            Answer::NotFound { project_id } => {
                format!("I couldn't find any project with ID {}.", project_id.to_uppercase())
            }
            Answer::NoBudgetData { matched } => format!(
                "I found {} project{}{} but none has a valid approved budget.",
                matched,
                plural(*matched),
                scope
            ),
            Answer::EndOfResults { total } => format!(
                "There are no more projects to show. All {} project{}{} have been listed. \
                 You can ask for another place or a specific contractor.",
                total,
                plural(*total),
                scope
            ),
            Answer::NothingToContinue => "There is no list to continue. Ask me to list or rank projects first, \
                 for example \"show projects in Quezon City\"."
                .to_string(),
            Answer::Clarification => "I'm not sure what you'd like to know. You can ask how many projects \
                 there are, the total or average budget, the top projects by budget, or for a list of \
                 projects in a place, by a contractor or in a given year."
                .to_string(),
        }
    }
}

fn render_groups(by: GroupBy, metric: GroupMetric, groups: &[GroupTotal], requested: usize, scope: &str) -> String {
    let name = |g: &GroupTotal| match by {
        GroupBy::Municipality => TextUtils::display_municipality(&g.name),
        _ => g.name.clone(),
    };
    let amount = |g: &GroupTotal| match metric {
        GroupMetric::Budget => g.formatted.clone(),
        GroupMetric::Count => format!("{} project{}", g.projects, plural(g.projects)),
    };
    let (noun, nouns) = match by {
        GroupBy::Contractor => ("contractor", "contractors"),
        GroupBy::Municipality => ("municipality", "municipalities"),
        GroupBy::Year => ("year", "years"),
    };
    let measure = match metric {
        GroupMetric::Budget => "the highest total approved budget",
        GroupMetric::Count => "the most projects",
    };

    if groups.is_empty() {
        return format!("I couldn't find any {} data{}.", noun, scope);
    }
    if by == GroupBy::Year {
        let mut text = format!("Total approved budget by year{}:", scope);
        for g in groups {
            let _ = write!(text, "\n- {}: {} across {} project{}", g.name, g.formatted, g.projects, plural(g.projects));
        }
        return text;
    }

    match groups {
        [winner] if requested == 1 => {
            format!("The {} with {}{} is {} with {}.", noun, measure, scope, name(winner), amount(winner))
        }
        [first, ..] if requested == 1 => {
            let names: Vec<String> = groups.iter().map(name).collect();
            format!("There is a tie for {}{}: {} with {} each.", measure, scope, names.join(", "), amount(first))
        }
        _ => {
            let ranking = match metric {
                GroupMetric::Budget => "total approved budget",
                GroupMetric::Count => "number of projects",
            };
            let label = if groups.len() == 1 { noun } else { nouns };
            let mut text = format!("Top {} {} by {}{}:", groups.len(), label, ranking, scope);
            for (i, g) in groups.iter().enumerate() {
                let _ = write!(text, "\n{}. {} — {}", i + 1, name(g), amount(g));
                if metric == GroupMetric::Budget {
                    let _ = write!(text, " ({} project{})", g.projects, plural(g.projects));
                }
            }
            text
        }
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn row_line(row: &ProjectRow) -> String {
    let id = if row.project_id.is_empty() { "(no ID)" } else { row.project_id.as_str() };
    let contractor = if row.contractor.is_empty() { "Unknown contractor" } else { row.contractor.as_str() };
    match row.budget {
        Some(b) => format!("{} — {} — {}", id, contractor, TextUtils::format_money(b)),
        None => format!("{} — {}", id, contractor),
    }
}

fn describe_project(row: &ProjectRow) -> String {
    let mut text = format!("Project {}", row.project_id);
    if !row.description.is_empty() {
        let _ = write!(text, ": {}", row.description);
    }

    let place: Vec<String> = [
        (!row.municipality.is_empty()).then(|| TextUtils::display_municipality(&row.municipality)),
        (!row.province.is_empty()).then(|| TextUtils::title_case(&row.province)),
        (!row.region.is_empty()).then(|| TextUtils::display_region(&row.region)),
    ]
    .into_iter()
    .flatten()
    .collect();
    if !place.is_empty() {
        let _ = write!(text, "\nLocation: {}", place.join(", "));
    }
    if !row.contractor.is_empty() {
        let _ = write!(text, "\nContractor: {}", row.contractor);
    }
    if let Some(year) = row.year {
        let _ = write!(text, "\nYear: {}", year);
    }
    match row.budget {
        Some(b) => {
            let _ = write!(text, "\nApproved budget: {}", TextUtils::format_money(b));
        }
        None => text.push_str("\nApproved budget: not available"),
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_engine::entity_extractor::Signals;
    use crate::context_engine::slots::EntitySet;

    fn row(id: &str, municipality: &str, contractor: &str, year: i32, budget: Option<f64>) -> ProjectRow {
        ProjectRow {
            project_id: id.into(),
            description: format!("Flood wall {}", id),
            municipality: municipality.into(),
            province: "Metro Manila".into(),
            region: "National Capital Region".into(),
            contractor: contractor.into(),
            year: Some(year),
            budget,
            ..Default::default()
        }
    }

    fn resolver() -> QueryResolver {
        let rows = vec![
            row("P001", "Quezon City", "ALPHA BUILDERS", 2021, Some(1_000_000.0)),
            row("P002", "Quezon City", "BETA CORP", 2022, Some(3_000_000.0)),
            row("P003", "Manila", "ALPHA BUILDERS", 2021, None),
            row("P004", "Quezon City", "ALPHA BUILDERS", 2023, Some(3_000_000.0)),
            row("P005", "Quezon City", "GAMMA INC", 2021, Some(500_000.0)),
            row("P006", "Quezon City", "BETA CORP", 2020, None),
            row("P007", "Quezon City", "GAMMA INC", 2019, Some(250_000.0)),
        ];
        QueryResolver::new(Arc::new(Dataset::new(rows)), 5, 5)
    }

    fn asked(action: Action, keyword: bool) -> ExtractedEntities {
        ExtractedEntities {
            action,
            signals: Signals { keyword_matched: keyword, ..Default::default() },
            ..Default::default()
        }
    }

    fn in_city(city: &str) -> ContextSlots {
        ContextSlots {
            entities: EntitySet { municipality: Some(city.into()), ..Default::default() },
            last_action: None,
        }
    }

    #[test]
    fn test_count_and_empty() {
        let r = resolver();
        let res = r.resolve(&asked(Action::Count, true), &in_city("Quezon City"), None);
        assert_eq!(res.payload.answer, Answer::Count { count: 6 });
        assert_eq!(res.payload.context.last_action, Some(Action::Count));
        assert_eq!(res.payload.render(5), "There are 6 flood control projects in Quezon City.");

        let res = r.resolve(&asked(Action::Count, true), &in_city("Cebu City"), None);
        assert_eq!(res.payload.answer, Answer::Empty);
    }

    #[test]
    fn test_sum_excludes_missing_budgets() {
        let res = resolver().resolve(&asked(Action::Sum, true), &in_city("Quezon City"), None);
        match &res.payload.answer {
            Answer::Currency { currency, amount, matched, with_budget, formatted } => {
                assert_eq!(*currency, CurrencyKind::Sum);
                assert_eq!(*amount, 7_750_000.0);
                assert_eq!(*matched, 6);
                assert_eq!(*with_budget, 5);
                assert_eq!(formatted, "₱7,750,000.00");
            }
            other => panic!("unexpected answer {:?}", other),
        }
        assert!(res.payload.render(5).contains("1 project had no budget data"));
    }

    #[test]
    fn test_average_without_budgets() {
        let res = resolver().resolve(&asked(Action::Average, true), &in_city("Manila"), None);
        assert_eq!(res.payload.answer, Answer::NoBudgetData { matched: 1 });

        let res = resolver().resolve(&asked(Action::Sum, true), &in_city("Manila"), None);
        assert!(matches!(res.payload.answer, Answer::Currency { amount, .. } if amount == 0.0));
    }

    #[test]
    fn test_top_n_is_stable_on_ties() {
        let mut x = asked(Action::TopN, true);
        x.top_n = Some(2);
        let res = resolver().resolve(&x, &in_city("Quezon City"), None);
        match &res.payload.answer {
            Answer::Ranked { rows, requested, .. } => {
                assert_eq!(*requested, 2);
                let ids: Vec<&str> = rows.iter().map(|r| r.project_id.as_str()).collect();
                assert_eq!(ids, vec!["P002", "P004"]);
            }
            other => panic!("unexpected answer {:?}", other),
        }
    }

    fn more(top_n: Option<usize>) -> ExtractedEntities {
        ExtractedEntities {
            top_n,
            signals: Signals { more: true, keyword_matched: true, ..Default::default() },
            ..Default::default()
        }
    }

    fn ranking(answer: &Answer) -> Vec<&str> {
        match answer {
            Answer::Ranked { rows, .. } => rows.iter().map(|r| r.project_id.as_str()).collect(),
            Answer::Page(slice) => slice.rows.iter().map(|r| r.project_id.as_str()).collect(),
            other => panic!("unexpected answer {:?}", other),
        }
    }

    #[test]
    fn test_list_then_more() {
        let r = resolver();
        let first = r.resolve(&asked(Action::List, true), &in_city("Quezon City"), None);
        let cursor = first.cursor.clone().unwrap();
        assert_eq!(cursor.offset, 0);
        assert_eq!(cursor.total, 6);
        let text = first.payload.render(5);
        assert!(text.starts_with("Projects in Quezon City (1-5 of 6):"));
        assert!(text.contains("- P001 — ALPHA BUILDERS — ₱1,000,000.00"));
        assert!(text.ends_with("Would you like 1 more project?"));

        let more = more(None);
        let mut merged = in_city("Quezon City");
        merged.last_action = Some(Action::List);
        let second = r.resolve(&more, &merged, Some(&cursor));
        match &second.payload.answer {
            Answer::Page(slice) => {
                assert_eq!(slice.offset, 5);
                assert_eq!(slice.rows.len(), 1);
                assert_eq!(slice.rows[0].project_id, "P007");
            }
            other => panic!("unexpected answer {:?}", other),
        }
        assert_eq!(second.payload.action, Action::List);

        let third = r.resolve(&more, &merged, second.cursor.as_ref());
        assert_eq!(third.payload.answer, Answer::EndOfResults { total: 6 });
        assert!(third.cursor.is_none());
    }

    #[test]
    fn test_lookup_found_and_missing() {
        let r = resolver();
        let mut merged = in_city("Manila");
        merged.entities.project_id = Some("p004".into());
        let res = r.resolve(&asked(Action::Lookup, false), &merged, None);
        match &res.payload.answer {
            Answer::Project { row } => assert_eq!(row.project_id, "P004"),
            other => panic!("unexpected answer {:?}", other),
        }
        assert!(res.payload.render(5).contains("Approved budget: ₱3,000,000.00"));

        merged.entities.project_id = Some("NOPE999".into());
        let res = r.resolve(&asked(Action::Lookup, false), &merged, None);
        assert_eq!(res.payload.answer, Answer::NotFound { project_id: "NOPE999".into() });
        assert_eq!(res.payload.context.last_action, Some(Action::Lookup));
        assert_eq!(res.payload.context.entities.municipality.as_deref(), Some("Manila"));
    }

    #[test]
    fn test_clarification_when_nothing_to_go_on() {
        let res = resolver().resolve(&asked(Action::List, false), &ContextSlots::default(), None);
        assert_eq!(res.payload.answer, Answer::Clarification);
        assert_eq!(res.payload.action, Action::Unknown);
        assert!(res.cursor.is_none());
    }

    #[test]
    fn test_inherits_stored_action() {
        let mut merged = in_city("Quezon City");
        merged.last_action = Some(Action::Count);
        let mut x = asked(Action::Unknown, false);
        x.entities.year = Some(2021);
        merged.entities.year = Some(2021);
        let res = resolver().resolve(&x, &merged, None);
        assert_eq!(res.payload.answer, Answer::Count { count: 2 });
    }

    #[test]
    fn test_same_question_same_payload() {
        let r = resolver();
        let a = r.resolve(&asked(Action::Sum, true), &in_city("Quezon City"), None);
        let b = r.resolve(&asked(Action::Sum, true), &in_city("Quezon City"), None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_more_after_count_has_nothing_to_continue() {
        let r = resolver();
        let mut merged = in_city("Quezon City");
        merged.last_action = Some(Action::Count);
        let res = r.resolve(&more(None), &merged, None);
        assert_eq!(res.payload.answer, Answer::NothingToContinue);
        assert_eq!(res.payload.action, Action::Unknown);
        assert_eq!(res.payload.context.last_action, Some(Action::Count));
        assert!(res.cursor.is_none());
        assert!(res.payload.render(5).starts_with("There is no list to continue."));

        // Naming a filter alongside "more" lists it
        let mut x = more(None);
        x.entities.municipality = Some("Quezon City".into());
        let res = r.resolve(&x, &merged, None);
        assert_eq!(res.payload.action, Action::List);
        assert_eq!(ranking(&res.payload.answer).len(), 5);
    }

    #[test]
    fn test_more_continues_a_ranking() {
        let r = resolver();
        let mut x = asked(Action::TopN, true);
        x.top_n = Some(2);
        let first = r.resolve(&x, &in_city("Quezon City"), None);
        assert_eq!(ranking(&first.payload.answer), vec!["P002", "P004"]);
        assert!(first.payload.render(5).ends_with("Would you like 3 more projects?"));
        let cursor = first.cursor.clone().unwrap();
        assert_eq!(cursor.order, ListOrder::BudgetDesc);

        let mut merged = in_city("Quezon City");
        merged.last_action = Some(Action::TopN);
        let second = r.resolve(&more(None), &merged, Some(&cursor));
        assert_eq!(ranking(&second.payload.answer), vec!["P001", "P005", "P007"]);
        assert_eq!(second.payload.action, Action::TopN);
        let text = second.payload.render(5);
        assert!(text.starts_with("More projects by highest approved budget in Quezon City (3-5 of 5):"), "{}", text);
        assert!(text.contains("\n3. P001 — ALPHA BUILDERS — ₱1,000,000.00"), "{}", text);

        let third = r.resolve(&more(None), &merged, second.cursor.as_ref());
        assert_eq!(third.payload.answer, Answer::EndOfResults { total: 5 });
    }

    #[test]
    fn test_lowest_n_and_more_with_count() {
        let r = resolver();
        let mut x = asked(Action::LowestN, true);
        x.top_n = Some(2);
        let first = r.resolve(&x, &in_city("Quezon City"), None);
        assert_eq!(ranking(&first.payload.answer), vec!["P007", "P005"]);
        assert!(first
            .payload
            .render(5)
            .starts_with("2 projects with the lowest approved budget in Quezon City:"));

        let mut merged = in_city("Quezon City");
        merged.last_action = Some(Action::LowestN);
        let second = r.resolve(&more(Some(1)), &merged, first.cursor.as_ref());
        assert_eq!(ranking(&second.payload.answer), vec!["P001"]);
        assert_eq!(second.cursor.as_ref().map(|c| (c.offset, c.len)), Some((2, 1)));
    }

    #[test]
    fn test_contractor_rankings() {
        let r = resolver();
        let mut x = asked(Action::TopContractors, true);
        x.top_n = Some(2);
        let res = r.resolve(&x, &in_city("Quezon City"), None);
        match &res.payload.answer {
            Answer::Grouped { by, metric, groups, .. } => {
                assert_eq!((*by, *metric), (GroupBy::Contractor, GroupMetric::Budget));
                let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
                assert_eq!(names, vec!["ALPHA BUILDERS", "BETA CORP"]);
                assert_eq!(groups[1].projects, 2);
                assert_eq!(groups[1].with_budget, 1);
            }
            other => panic!("unexpected answer {:?}", other),
        }
        assert_eq!(
            res.payload.render(5),
            "Top 2 contractors by total approved budget in Quezon City:\n\
             1. ALPHA BUILDERS — ₱4,000,000.00 (2 projects)\n\
             2. BETA CORP — ₱3,000,000.00 (2 projects)"
        );

        let mut x = asked(Action::TopContractorsByCount, true);
        x.top_n = Some(1);
        let res = r.resolve(&x, &ContextSlots::default(), None);
        assert_eq!(res.payload.render(5), "The contractor with the most projects is ALPHA BUILDERS with 3 projects.");

        // Every Quezon City contractor has two projects
        let res = r.resolve(&x, &in_city("Quezon City"), None);
        assert_eq!(
            res.payload.render(5),
            "There is a tie for the most projects in Quezon City: ALPHA BUILDERS, BETA CORP, GAMMA INC with 2 projects each."
        );
    }

    #[test]
    fn test_municipality_with_highest_total() {
        let mut x = asked(Action::TopMunicipalities, true);
        x.top_n = Some(1);
        let res = resolver().resolve(&x, &ContextSlots::default(), None);
        assert_eq!(
            res.payload.render(5),
            "The municipality with the highest total approved budget is Quezon City with ₱7,750,000.00."
        );

        let res = resolver().resolve(&x, &in_city("Manila"), None);
        assert_eq!(res.payload.answer, Answer::NoBudgetData { matched: 1 });
    }

    #[test]
    fn test_trend_by_year() {
        let res = resolver().resolve(&asked(Action::TrendByYear, true), &ContextSlots::default(), None);
        match &res.payload.answer {
            Answer::Grouped { by: GroupBy::Year, groups, .. } => {
                let years: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
                assert_eq!(years, vec!["2019", "2020", "2021", "2022", "2023"]);
            }
            other => panic!("unexpected answer {:?}", other),
        }
        let text = res.payload.render(5);
        assert!(text.starts_with("Total approved budget by year:"), "{}", text);
        assert!(text.contains("\n- 2021: ₱1,500,000.00 across 3 projects"), "{}", text);
        assert!(text.contains("\n- 2020: ₱0.00 across 1 project"), "{}", text);
        assert_eq!(res.payload.context.last_action, Some(Action::TrendByYear));
    }
}
