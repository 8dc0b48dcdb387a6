use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::trace;

use crate::schema::{ColumnKind, DisplayRow, EntitySchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// Single active sort key, last write wins. `key == None` leaves the input
/// order untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub key: Option<String>,
    #[serde(default)]
    pub direction: Direction,
}

impl SortSpec {
    pub fn by(key: &str, direction: Direction) -> Self {
        SortSpec {
            key: Some(key.to_string()),
            direction,
        }
    }
}

pub fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok()
}

// Formats the portal backend actually emits: ISO date, ISO datetime (with
// or without the 'T'), and US month/day/year.
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Parse a cell into seconds since the epoch. `None` when nothing matches.
pub fn parse_date(s: &str) -> Option<i64> {
    let s = s.trim();
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc().timestamp());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d.and_hms_opt(0, 0, 0)?.and_utc().timestamp());
        }
    }
    None
}

/// Ascending three-way comparison of two cells of one column kind.
///
/// Dates compare by parsed timestamp with unparseable values pinned to epoch
/// 0, so they sort first ascending. Numbers compare numerically with
/// unparseable values as 0. Everything else compares case-insensitively.
pub fn compare(kind: ColumnKind, a: &str, b: &str) -> Ordering {
    match kind {
        ColumnKind::Date => {
            let x = parse_date(a).unwrap_or(0);
            let y = parse_date(b).unwrap_or(0);
            x.cmp(&y)
        }
        ColumnKind::Number => {
            let x = parse_number(a).unwrap_or(0.0);
            let y = parse_number(b).unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        ColumnKind::Text => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}

/// Reorder a view (indices into `rows`) by the active sort key. Stable, so
/// equal keys keep their incoming relative order; a `None` key is a no-op.
pub fn sort_view(view: &mut [usize], rows: &[DisplayRow], schema: &EntitySchema, spec: &SortSpec) {
    let Some(key) = &spec.key else {
        return;
    };
    let Some(idx) = schema.column_index(key) else {
        trace!("Sort key {key} not in schema, keeping input order");
        return;
    };
    let kind = schema.columns[idx].kind;
    view.sort_by(|&a, &b| {
        let ord = compare(kind, &rows[a].cells[idx], &rows[b].cells[idx]);
        match spec.direction {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        }
    });
}
