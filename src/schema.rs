use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw backend entity as it arrives from the data source. Never mutated.
pub type Record = serde_json::Map<String, Value>;

// Placeholder values the portal backend stores in lieu of real data. They
// must read as "empty" when cells are composed from several fields.
const SENTINELS: [&str; 2] = ["Need To Update", "All"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    #[default]
    Text,
    Number,
    Date,
}

/// How one cell is extracted from a record. Every rule is pure: missing or
/// null fields normalize to an empty string, the source record is untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellRule {
    /// Read a single field verbatim.
    Field(String),
    /// Join a multi-value field (e.g. a list of assignees) into one string.
    Join {
        field: String,
        #[serde(default = "default_join_sep")]
        sep: String,
    },
    /// Concatenate several source fields, dropping empty and sentinel parts.
    Compose {
        fields: Vec<String>,
        #[serde(default = "default_compose_sep")]
        sep: String,
    },
}

fn default_join_sep() -> String {
    ", ".to_string()
}

fn default_compose_sep() -> String {
    " - ".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub id: String,
    #[serde(default)]
    pub kind: ColumnKind,
    pub rule: CellRule,
    /// Whether the global free-text query scans this column.
    #[serde(default)]
    pub searchable: bool,
}

impl ColumnSpec {
    pub fn text(id: &str, field: &str) -> Self {
        ColumnSpec {
            id: id.to_string(),
            kind: ColumnKind::Text,
            rule: CellRule::Field(field.to_string()),
            searchable: false,
        }
    }

    pub fn number(id: &str, field: &str) -> Self {
        ColumnSpec {
            kind: ColumnKind::Number,
            ..Self::text(id, field)
        }
    }

    pub fn date(id: &str, field: &str) -> Self {
        ColumnSpec {
            kind: ColumnKind::Date,
            ..Self::text(id, field)
        }
    }

    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    pub fn with_rule(mut self, rule: CellRule) -> Self {
        self.rule = rule;
        self
    }
}

/// Canonical column layout for one entity type (job posting, candidate,
/// company, timesheet). One schema per list page, defined at configuration
/// time; the column catalog order is the schema's column order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySchema {
    pub entity: String,
    /// Record field holding the unique record key.
    pub key_field: String,
    pub columns: Vec<ColumnSpec>,
}

impl EntitySchema {
    pub fn catalog(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.id.clone()).collect()
    }

    pub fn column(&self, id: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn column_index(&self, id: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.id == id)
    }

    pub fn record_key(&self, record: &Record) -> String {
        value_to_string(record.get(self.key_field.as_str()))
    }

    /// Project a record into one display row, cells aligned with the
    /// catalog order. Infallible on malformed records.
    pub fn normalize(&self, record: &Record) -> DisplayRow {
        let cells = self
            .columns
            .iter()
            .map(|c| apply_rule(&c.rule, record))
            .collect();
        DisplayRow {
            key: self.record_key(record),
            cells,
        }
    }
}

/// Derived, render-ready projection of a record. Regenerated whenever the
/// record set or schema changes, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayRow {
    pub key: String,
    /// One cell per catalog column, in catalog order.
    pub cells: Vec<String>,
}

fn apply_rule(rule: &CellRule, record: &Record) -> String {
    match rule {
        CellRule::Field(field) => value_to_string(record.get(field.as_str())),
        CellRule::Join { field, sep } => match record.get(field.as_str()) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| value_to_string(Some(v)))
                .filter(|s| !s.is_empty())
                .collect::<Vec<String>>()
                .join(sep),
            other => value_to_string(other),
        },
        CellRule::Compose { fields, sep } => fields
            .iter()
            .map(|f| value_to_string(record.get(f.as_str())))
            .filter(|s| !s.is_empty() && !SENTINELS.contains(&s.as_str()))
            .collect::<Vec<String>>()
            .join(sep),
    }
}

fn value_to_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| value_to_string(Some(v)))
            .filter(|s| !s.is_empty())
            .collect::<Vec<String>>()
            .join(", "),
        Some(Value::Null) | None => String::new(),
        // Nested objects are not displayable, treat them as missing.
        Some(Value::Object(_)) => String::new(),
    }
}
