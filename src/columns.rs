use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, trace};

use crate::domain::GridError;

/// Per-user override of column order and visibility. `order` may be partial
/// or stale relative to the current catalog; `hidden` excludes columns from
/// the resolved sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnPreference {
    #[serde(default)]
    pub order: Vec<String>,
    #[serde(default)]
    pub hidden: Vec<String>,
}

/// Resolve the final ordered, visible column list.
///
/// Saved order entries unknown to the catalog are dropped, catalog columns
/// missing from the saved order are appended in catalog order, hidden
/// columns are removed last. Pure function of its inputs; an all-hidden
/// preference yields an empty (valid) result.
pub fn resolve_columns(catalog: &[String], pref: &ColumnPreference) -> Vec<String> {
    let mut resolved: Vec<String> = Vec::with_capacity(catalog.len());
    for id in &pref.order {
        if catalog.contains(id) && !resolved.contains(id) {
            resolved.push(id.clone());
        }
    }
    for id in catalog {
        if !resolved.contains(id) {
            resolved.push(id.clone());
        }
    }
    resolved.retain(|id| !pref.hidden.contains(id));
    trace!("Resolved {} of {} catalog columns", resolved.len(), catalog.len());
    resolved
}

/// Opaque per-user persistence for column preferences. Last write wins, no
/// transactional guarantees. Swappable so tests run against memory.
pub trait PreferenceStore {
    fn load(&self, user: &str) -> Option<ColumnPreference>;
    fn save(&mut self, user: &str, pref: &ColumnPreference) -> Result<(), GridError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    prefs: HashMap<String, ColumnPreference>,
}

impl PreferenceStore for MemoryStore {
    fn load(&self, user: &str) -> Option<ColumnPreference> {
        self.prefs.get(user).cloned()
    }

    fn save(&mut self, user: &str, pref: &ColumnPreference) -> Result<(), GridError> {
        self.prefs.insert(user.to_string(), pref.clone());
        Ok(())
    }
}

/// File-backed store holding one JSON map of user -> preference. The whole
/// file is rewritten on every save.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStore { path: path.into() }
    }

    fn read_all(&self) -> HashMap<String, ColumnPreference> {
        match fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => HashMap::new(),
        }
    }
}

impl PreferenceStore for JsonFileStore {
    fn load(&self, user: &str) -> Option<ColumnPreference> {
        self.read_all().get(user).cloned()
    }

    fn save(&mut self, user: &str, pref: &ColumnPreference) -> Result<(), GridError> {
        let mut all = self.read_all();
        all.insert(user.to_string(), pref.clone());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&all)?)?;
        debug!("Saved column preference for {} to {:?}", user, self.path);
        Ok(())
    }
}
