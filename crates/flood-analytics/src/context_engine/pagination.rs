//! Per-session pagination over list and ranking results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::context_engine::filter::FilterSpec;
use crate::dataset::ProjectRow;

/// Row order a cursor walks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOrder {
    /// Source file order, every matching row
    #[default]
    Dataset,
    /// Budgeted rows, largest first
    BudgetDesc,
    /// Budgeted rows, smallest first
    BudgetAsc,
}

impl ListOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListOrder::Dataset => "dataset",
            ListOrder::BudgetDesc => "budget_desc",
            ListOrder::BudgetAsc => "budget_asc",
        }
    }

    /// Order `rows` in place. Sorting is stable, so equal budgets keep dataset order.
    pub fn arrange(&self, rows: &mut Vec<&ProjectRow>) {
        match self {
            ListOrder::Dataset => {}
            ListOrder::BudgetDesc => {
                rows.retain(|r| r.budget.is_some());
                rows.sort_by(|a, b| b.budget.unwrap_or(0.0).total_cmp(&a.budget.unwrap_or(0.0)));
            }
            ListOrder::BudgetAsc => {
                rows.retain(|r| r.budget.is_some());
                rows.sort_by(|a, b| a.budget.unwrap_or(0.0).total_cmp(&b.budget.unwrap_or(0.0)));
            }
        }
    }
}

impl fmt::Display for ListOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "dataset" => Ok(ListOrder::Dataset),
            "budget_desc" => Ok(ListOrder::BudgetDesc),
            "budget_asc" => Ok(ListOrder::BudgetAsc),
            other => Err(anyhow::anyhow!("Unknown list order: {}", other)),
        }
    }
}

/// Position in the ordered result list of `filter`; rows are re-derived on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationCursor {
    pub filter: FilterSpec,
    #[serde(default)]
    pub order: ListOrder,
    /// Start of the page last shown
    pub offset: usize,
    /// Rows on the page last shown; 0 means a full page
    #[serde(default)]
    pub len: usize,
    pub total: usize,
}

impl PaginationCursor {
    /// Offset the following page starts at.
    pub fn next_offset(&self, page_size: usize) -> usize {
        let step = if self.len == 0 { page_size } else { self.len };
        self.offset + step
    }
}

/// One page of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSlice {
    pub rows: Vec<ProjectRow>,
    #[serde(default)]
    pub order: ListOrder,
    pub offset: usize,
    pub total: usize,
}

impl PageSlice {
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.offset + self.rows.len())
    }

    pub fn has_more(&self) -> bool {
        self.remaining() > 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageStep {
    Page(PageSlice, PaginationCursor),
    /// Continuation requested past the last row; the stored cursor is left as is
    EndOfResults { total: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    page_size: usize,
}

impl Paginator {
    pub fn new(page_size: usize) -> Self {
        Self { page_size: page_size.max(1) }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// First page of a fresh list request; the cursor is reset to offset 0.
    pub fn first_page(&self, filter: &FilterSpec, matching: &[&ProjectRow]) -> (PageSlice, PaginationCursor) {
        self.page_at(filter, ListOrder::Dataset, matching, 0, self.page_size)
    }

    /// Cursor for a ranking whose first `shown` rows were just displayed.
    pub fn ranked(&self, filter: &FilterSpec, order: ListOrder, shown: usize, total: usize) -> PaginationCursor {
        PaginationCursor { filter: filter.clone(), order, offset: 0, len: shown, total }
    }

    /// "more": advance when the stored cursor belongs to the same filter and order, otherwise
    /// start over. `len` overrides the page size for this step ("10 more").
    pub fn next_page(
        &self,
        cursor: Option<&PaginationCursor>,
        filter: &FilterSpec,
        order: ListOrder,
        matching: &[&ProjectRow],
        len: Option<usize>,
    ) -> PageStep {
        let len = len.unwrap_or(self.page_size).max(1);
        match cursor {
            Some(c) if c.filter == *filter && c.order == order => {
                let offset = c.next_offset(self.page_size);
                if offset >= matching.len() {
                    PageStep::EndOfResults { total: matching.len() }
                } else {
                    let (slice, cursor) = self.page_at(filter, order, matching, offset, len);
                    PageStep::Page(slice, cursor)
                }
            }
            _ => {
                let (slice, cursor) = self.page_at(filter, order, matching, 0, len);
                PageStep::Page(slice, cursor)
            }
        }
    }

    fn page_at(
        &self,
        filter: &FilterSpec,
        order: ListOrder,
        matching: &[&ProjectRow],
        offset: usize,
        len: usize,
    ) -> (PageSlice, PaginationCursor) {
        let total = matching.len();
        let start = offset.min(total);
        let end = (start + len).min(total);
        let rows: Vec<ProjectRow> = matching[start..end].iter().map(|r| (*r).clone()).collect();
        let shown = rows.len();
        (
            PageSlice { rows, order, offset: start, total },
            PaginationCursor { filter: filter.clone(), order, offset: start, len: shown, total },
        )
    }
}
