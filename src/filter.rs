use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::trace;

use crate::schema::{ColumnKind, DisplayRow, EntitySchema};
use crate::sort::{parse_date, parse_number};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Contains,
    NotContains,
    Equals,
    Above,
    Below,
    Between,
}

/// One per-column predicate. A spec with an empty primary operand is
/// inactive and matches everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub op: FilterOp,
    pub value: String,
    #[serde(default)]
    pub value2: Option<String>,
}

impl FilterSpec {
    pub fn new(op: FilterOp, value: impl Into<String>) -> Self {
        FilterSpec {
            op,
            value: value.into(),
            value2: None,
        }
    }

    pub fn between(low: impl Into<String>, high: impl Into<String>) -> Self {
        FilterSpec {
            op: FilterOp::Between,
            value: low.into(),
            value2: Some(high.into()),
        }
    }

    pub fn is_active(&self) -> bool {
        if self.value.trim().is_empty() {
            return false;
        }
        // `between` constrains nothing until both bounds are present.
        if self.op == FilterOp::Between {
            return self
                .value2
                .as_ref()
                .is_some_and(|v| !v.trim().is_empty());
        }
        true
    }
}

/// Typed three-way comparison with the portal's documented quirk: when a
/// number or date operand does not parse, the comparison silently degrades
/// to lexical string order instead of failing. Deliberately preserved, do
/// not "fix" without changing the filter contract.
pub fn compare_or_lexical(kind: ColumnKind, a: &str, b: &str) -> Ordering {
    let typed = match kind {
        ColumnKind::Number => match (parse_number(a), parse_number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
        ColumnKind::Date => match (parse_date(a), parse_date(b)) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => None,
        },
        ColumnKind::Text => None,
    };
    typed.unwrap_or_else(|| a.cmp(b))
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn equals_typed(kind: ColumnKind, cell: &str, operand: &str) -> bool {
    match kind {
        ColumnKind::Number => {
            if let (Some(x), Some(y)) = (parse_number(cell), parse_number(operand)) {
                return x == y;
            }
        }
        ColumnKind::Date => {
            if let (Some(x), Some(y)) = (parse_date(cell), parse_date(operand)) {
                return x == y;
            }
        }
        ColumnKind::Text => {}
    }
    // Same Unicode folding as `contains`, so non-ASCII cells behave alike.
    cell.to_lowercase() == operand.to_lowercase()
}

/// Evaluate one spec against one cell. Never fails on malformed operands.
pub fn matches(spec: &FilterSpec, kind: ColumnKind, cell: &str) -> bool {
    if !spec.is_active() {
        return true;
    }
    match spec.op {
        FilterOp::Contains => contains_ci(cell, &spec.value),
        FilterOp::NotContains => !contains_ci(cell, &spec.value),
        FilterOp::Equals => equals_typed(kind, cell, &spec.value),
        FilterOp::Above => compare_or_lexical(kind, cell, &spec.value) == Ordering::Greater,
        FilterOp::Below => compare_or_lexical(kind, cell, &spec.value) == Ordering::Less,
        FilterOp::Between => {
            // is_active guarantees value2 is present here.
            let high = spec.value2.as_deref().unwrap_or_default();
            compare_or_lexical(kind, cell, &spec.value) != Ordering::Less
                && compare_or_lexical(kind, cell, high) != Ordering::Greater
        }
    }
}

/// AND across every active per-column spec. Specs naming columns the schema
/// does not know are vacuously true.
pub fn matches_column_filters(
    row: &DisplayRow,
    schema: &EntitySchema,
    specs: &HashMap<String, FilterSpec>,
) -> bool {
    specs.iter().all(|(column_id, spec)| {
        match schema.column_index(column_id) {
            Some(idx) => matches(spec, schema.columns[idx].kind, &row.cells[idx]),
            None => {
                trace!("Filter on unknown column {column_id}, ignoring");
                true
            }
        }
    })
}

/// Case-insensitive substring OR across the schema's searchable columns.
/// An empty query matches everything.
pub fn matches_global(row: &DisplayRow, schema: &EntitySchema, query: &str) -> bool {
    if query.trim().is_empty() {
        return true;
    }
    schema
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.searchable)
        .any(|(idx, _)| contains_ci(&row.cells[idx], query))
}
