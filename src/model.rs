use rayon::prelude::*;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, error, info, trace};

use crate::columns::{ColumnPreference, PreferenceStore, resolve_columns};
use crate::domain::{GridConfig, GridError};
use crate::filter::{FilterSpec, matches_column_filters, matches_global};
use crate::schema::{DisplayRow, EntitySchema, Record};
use crate::sort::{Direction, SortSpec, sort_view};
use crate::source::{DataSource, RecordUpdate, UserContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Loading,
    Ready,
    Error,
}

/// Token identifying one in-flight load. Completions carrying a superseded
/// token are discarded, so a stale response can never overwrite the result
/// of a newer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadToken(u64);

/// Windowed, render-ready view handed to the presentation layer.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    pub columns: Vec<String>,
    pub rows: Vec<SnapshotRow>,
    /// Total filtered+sorted rows, of which `rows` is the leading window.
    pub total: usize,
    pub window: usize,
    pub sort: SortSpec,
    pub filters: HashMap<String, FilterSpec>,
    pub status: Status,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub key: String,
    /// Cells aligned with the snapshot's column list, staged edits applied.
    pub cells: Vec<String>,
    /// Which of `cells` carry an uncommitted edit.
    pub dirty: Vec<bool>,
}

/// Composition root over one entity collection: raw records -> normalized
/// rows -> filtered -> sorted -> windowed slice. Every mutation recomputes
/// the pipeline synchronously from the last-fetched record set; only
/// `load`/`commit_edits` touch the data source.
pub struct TableEngine {
    schema: EntitySchema,
    config: GridConfig,
    status: Status,
    error_message: Option<String>,
    records: Vec<Record>,
    rows: Vec<DisplayRow>,
    /// Filtered + sorted indices into `rows`.
    view: Vec<usize>,
    sort: SortSpec,
    filters: HashMap<String, FilterSpec>,
    query: String,
    preference: ColumnPreference,
    /// Staged cell edits: record key -> column id -> new value.
    pending: HashMap<String, HashMap<String, String>>,
    window: usize,
    generation: u64,
}

impl TableEngine {
    pub fn new(schema: EntitySchema, config: GridConfig) -> Self {
        let window = config.default_window;
        TableEngine {
            schema,
            config,
            status: Status::Idle,
            error_message: None,
            records: Vec::new(),
            rows: Vec::new(),
            view: Vec::new(),
            sort: SortSpec::default(),
            filters: HashMap::new(),
            query: String::new(),
            preference: ColumnPreference::default(),
            pending: HashMap::new(),
            window,
            generation: 0,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn total(&self) -> usize {
        self.view.len()
    }

    pub fn sort(&self) -> &SortSpec {
        &self.sort
    }

    pub fn preference(&self) -> &ColumnPreference {
        &self.preference
    }

    pub fn has_pending_edits(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_edit_count(&self) -> usize {
        self.pending.values().map(|c| c.len()).sum()
    }

    // ------------------------- loading ------------------------- //

    /// Start a load and get the token its completion must present. The
    /// caller performs the actual fetch (possibly off the event loop) and
    /// reports back through `finish_load`.
    pub fn begin_load(&mut self) -> LoadToken {
        self.generation += 1;
        self.status = Status::Loading;
        trace!("Load {} started for {}", self.generation, self.schema.entity);
        LoadToken(self.generation)
    }

    /// Complete a load. Returns false when the token was superseded by a
    /// newer `begin_load`, in which case the result is discarded unseen.
    /// On failure previously displayed data is cleared unless
    /// `keep_on_error` is set.
    pub fn finish_load(
        &mut self,
        token: LoadToken,
        result: Result<Vec<Record>, GridError>,
        keep_on_error: bool,
    ) -> bool {
        if token.0 != self.generation {
            debug!(
                "Discarding stale load {} for {} (current {})",
                token.0, self.schema.entity, self.generation
            );
            return false;
        }
        match result {
            Ok(records) => {
                info!("Loaded {} {} records", records.len(), self.schema.entity);
                self.records = records;
                self.rows = self.records.iter().map(|r| self.schema.normalize(r)).collect();
                self.status = Status::Ready;
                self.error_message = None;
                self.window = self.config.default_window;
                self.recompute();
            }
            Err(e) => {
                error!("Load failed for {}: {}", self.schema.entity, e);
                self.status = Status::Error;
                self.error_message = Some(e.to_string());
                if !keep_on_error {
                    self.records.clear();
                    self.rows.clear();
                    self.view.clear();
                }
            }
        }
        true
    }

    /// Fetch synchronously through the collaborator. Failures land in the
    /// Error state and are also returned; retry is the caller's explicit
    /// decision, never automatic.
    pub fn load(&mut self, source: &dyn DataSource, ctx: &UserContext) -> Result<(), GridError> {
        let token = self.begin_load();
        let entity = self.schema.entity.clone();
        match source.list(&entity, ctx) {
            Ok(records) => {
                self.finish_load(token, Ok(records), false);
                Ok(())
            }
            Err(e) => {
                let surfaced = match &e {
                    GridError::PermissionDenied(m) => GridError::PermissionDenied(m.clone()),
                    GridError::FetchFailed(m) => GridError::FetchFailed(m.clone()),
                    other => GridError::FetchFailed(other.to_string()),
                };
                self.finish_load(token, Err(e), false);
                Err(surfaced)
            }
        }
    }

    // -------------------- pipeline mutations -------------------- //

    pub fn set_sort(&mut self, column_id: &str, direction: Direction) {
        self.sort = SortSpec::by(column_id, direction);
        self.recompute();
    }

    pub fn clear_sort(&mut self) {
        self.sort = SortSpec::default();
        self.recompute();
    }

    /// Install or clear one column's filter. `None` removes it.
    pub fn set_filter(&mut self, column_id: &str, spec: Option<FilterSpec>) {
        match spec {
            Some(spec) => {
                self.filters.insert(column_id.to_string(), spec);
            }
            None => {
                self.filters.remove(column_id);
            }
        }
        self.recompute();
    }

    pub fn set_global_query(&mut self, query: &str) {
        self.query = query.to_string();
        self.recompute();
    }

    pub fn set_column_preference(&mut self, pref: ColumnPreference) {
        self.preference = pref;
        self.recompute();
    }

    /// Read the user's saved preference at mount time.
    pub fn restore_preference(&mut self, store: &dyn PreferenceStore, user: &str) {
        if let Some(pref) = store.load(user) {
            debug!("Restored column preference for {user}");
            self.set_column_preference(pref);
        }
    }

    /// Write-through after a confirmed preference change.
    pub fn save_preference(
        &self,
        store: &mut dyn PreferenceStore,
        user: &str,
    ) -> Result<(), GridError> {
        store.save(user, &self.preference)
    }

    /// Grow the slice exposed to the presentation layer. Client-side only,
    /// never re-fetches.
    pub fn expand_window(&mut self, n: usize) {
        self.window = self.window.saturating_add(n);
    }

    pub fn window(&self) -> usize {
        self.window
    }

    // ---------------------- pending edits ---------------------- //

    /// Stage one cell edit. The underlying record is untouched until
    /// `commit_edits`; the cell renders as dirty in snapshots.
    pub fn stage_edit(
        &mut self,
        record_key: &str,
        column_id: &str,
        value: &str,
    ) -> Result<(), GridError> {
        if self.schema.column(column_id).is_none() {
            return Err(GridError::ValidationFailed(format!(
                "unknown column {column_id}"
            )));
        }
        self.pending
            .entry(record_key.to_string())
            .or_default()
            .insert(column_id.to_string(), value.to_string());
        Ok(())
    }

    /// Throw away all staged edits, e.g. on an explicit reload.
    pub fn discard_edits(&mut self) {
        self.pending.clear();
    }

    /// Batch every staged edit into one update. All-or-nothing: on failure
    /// the whole batch is reported failed and every edit is retained so no
    /// user input is lost. Success clears the batch and reloads.
    pub fn commit_edits(
        &mut self,
        source: &mut dyn DataSource,
        ctx: &UserContext,
    ) -> Result<(), GridError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch: Vec<RecordUpdate> = self
            .pending
            .iter()
            .map(|(key, changes)| RecordUpdate {
                key: key.clone(),
                changes: changes.clone(),
            })
            .collect();
        info!(
            "Committing {} edits across {} records",
            self.pending_edit_count(),
            batch.len()
        );
        match source.update(&batch, ctx) {
            Ok(()) => {
                self.pending.clear();
                self.load(source, ctx)
            }
            Err(e) => {
                error!("Batch update failed, retaining staged edits: {e}");
                Err(e)
            }
        }
    }

    /// Delete records through the collaborator and reload. All-or-nothing
    /// like `commit_edits`; staged edits for the deleted records are
    /// dropped on success, everything is retained on failure.
    pub fn delete_records(
        &mut self,
        keys: &[String],
        source: &mut dyn DataSource,
        ctx: &UserContext,
    ) -> Result<(), GridError> {
        if keys.is_empty() {
            return Ok(());
        }
        info!("Deleting {} {} records", keys.len(), self.schema.entity);
        match source.delete(keys, ctx) {
            Ok(()) => {
                self.pending.retain(|key, _| !keys.contains(key));
                self.load(source, ctx)
            }
            Err(e) => {
                error!("Delete failed, keeping current state: {e}");
                Err(e)
            }
        }
    }

    // ------------------------- pipeline ------------------------- //

    fn recompute(&mut self) {
        let start_time = Instant::now();
        let mut view: Vec<usize> = self
            .rows
            .par_iter()
            .enumerate()
            .filter(|(_, row)| {
                matches_global(row, &self.schema, &self.query)
                    && matches_column_filters(row, &self.schema, &self.filters)
            })
            .map(|(idx, _)| idx)
            .collect();
        sort_view(&mut view, &self.rows, &self.schema, &self.sort);
        self.view = view;
        trace!(
            "Pipeline recomputed: {}/{} rows in {}ms",
            self.view.len(),
            self.rows.len(),
            start_time.elapsed().as_millis()
        );
    }

    // ------------------------- consumers ------------------------ //

    pub fn resolved_columns(&self) -> Vec<String> {
        resolve_columns(&self.schema.catalog(), &self.preference)
    }

    /// Windowed slice for rendering, staged edits overlaid and flagged.
    pub fn snapshot(&self) -> TableSnapshot {
        let columns = self.resolved_columns();
        let indices: Vec<usize> = columns
            .iter()
            .filter_map(|id| self.schema.column_index(id))
            .collect();
        let end = std::cmp::min(self.window, self.view.len());
        let rows = self.view[..end]
            .iter()
            .map(|&ridx| {
                let row = &self.rows[ridx];
                let staged = self.pending.get(&row.key);
                let mut cells = Vec::with_capacity(indices.len());
                let mut dirty = Vec::with_capacity(indices.len());
                for (&cidx, id) in indices.iter().zip(columns.iter()) {
                    match staged.and_then(|c| c.get(id)) {
                        Some(edit) => {
                            cells.push(edit.clone());
                            dirty.push(true);
                        }
                        None => {
                            cells.push(row.cells[cidx].clone());
                            dirty.push(false);
                        }
                    }
                }
                SnapshotRow {
                    key: row.key.clone(),
                    cells,
                    dirty,
                }
            })
            .collect();
        TableSnapshot {
            columns,
            rows,
            total: self.view.len(),
            window: self.window,
            sort: self.sort.clone(),
            filters: self.filters.clone(),
            status: self.status,
            error_message: self.error_message.clone(),
        }
    }

    /// Full filtered+sorted sequence for export collaborators (CSV, PDF).
    /// Saved values only; staged edits are not exported.
    pub fn export_rows(&self) -> (Vec<String>, Vec<Vec<String>>) {
        let columns = self.resolved_columns();
        let indices: Vec<usize> = columns
            .iter()
            .filter_map(|id| self.schema.column_index(id))
            .collect();
        let rows = self
            .view
            .iter()
            .map(|&ridx| {
                indices
                    .iter()
                    .map(|&cidx| self.rows[ridx].cells[cidx].clone())
                    .collect()
            })
            .collect();
        (columns, rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOp;
    use crate::schema::ColumnSpec;
    use serde_json::json;

    fn schema() -> EntitySchema {
        EntitySchema {
            entity: "job".to_string(),
            key_field: "id".to_string(),
            columns: vec![
                ColumnSpec::text("Title", "title").searchable(),
                ColumnSpec::number("Rate", "rate"),
                ColumnSpec::date("Posted", "posted"),
            ],
        }
    }

    fn records(specs: &[(&str, &str, &str, &str)]) -> Vec<Record> {
        specs
            .iter()
            .map(|(id, title, rate, posted)| {
                match json!({"id": id, "title": title, "rate": rate, "posted": posted}) {
                    serde_json::Value::Object(map) => map,
                    _ => unreachable!(),
                }
            })
            .collect()
    }

    struct FakeSource {
        records: Vec<Record>,
        fail_list: bool,
        fail_update: bool,
        fail_delete: bool,
        updates_seen: usize,
    }

    impl FakeSource {
        fn with(records: Vec<Record>) -> Self {
            FakeSource {
                records,
                fail_list: false,
                fail_update: false,
                fail_delete: false,
                updates_seen: 0,
            }
        }
    }

    impl DataSource for FakeSource {
        fn list(&self, _entity: &str, _ctx: &UserContext) -> Result<Vec<Record>, GridError> {
            if self.fail_list {
                Err(GridError::FetchFailed("backend down".to_string()))
            } else {
                Ok(self.records.clone())
            }
        }

        fn update(&mut self, batch: &[RecordUpdate], _ctx: &UserContext) -> Result<(), GridError> {
            self.updates_seen += batch.len();
            if self.fail_update {
                Err(GridError::FetchFailed("update rejected".to_string()))
            } else {
                Ok(())
            }
        }

        fn delete(&mut self, keys: &[String], _ctx: &UserContext) -> Result<(), GridError> {
            if self.fail_delete {
                return Err(GridError::FetchFailed("delete rejected".to_string()));
            }
            self.records.retain(|r| {
                match r.get("id").and_then(|v| v.as_str()) {
                    Some(key) => !keys.iter().any(|k| k == key),
                    None => true,
                }
            });
            Ok(())
        }
    }

    fn engine_with(recs: Vec<Record>) -> TableEngine {
        let mut engine = TableEngine::new(schema(), GridConfig::default());
        let source = FakeSource::with(recs);
        engine.load(&source, &UserContext::default()).unwrap();
        engine
    }

    #[test]
    fn load_moves_idle_to_ready_and_failure_to_error() {
        let mut engine = TableEngine::new(schema(), GridConfig::default());
        assert_eq!(engine.status(), Status::Idle);

        let mut source = FakeSource::with(records(&[("1", "Dev", "50", "2024-01-05")]));
        engine.load(&source, &UserContext::default()).unwrap();
        assert_eq!(engine.status(), Status::Ready);
        assert_eq!(engine.total(), 1);

        source.fail_list = true;
        assert!(engine.load(&source, &UserContext::default()).is_err());
        assert_eq!(engine.status(), Status::Error);
        assert!(engine.error_message().unwrap().contains("backend down"));
        // Default semantics: failed reload clears previously shown data.
        assert_eq!(engine.total(), 0);

        // Manual retry recovers.
        source.fail_list = false;
        engine.load(&source, &UserContext::default()).unwrap();
        assert_eq!(engine.status(), Status::Ready);
    }

    #[test]
    fn load_failure_surfaces_the_source_error_unwrapped() {
        let mut engine = TableEngine::new(schema(), GridConfig::default());
        let mut source = FakeSource::with(Vec::new());
        source.fail_list = true;
        let err = engine.load(&source, &UserContext::default()).unwrap_err();
        // No re-wrapping: the Display stays "fetch failed: backend down".
        assert_eq!(err.to_string(), "fetch failed: backend down");
        assert_eq!(engine.error_message(), Some("fetch failed: backend down"));
    }

    #[test]
    fn delete_removes_records_drops_their_edits_and_reloads() {
        let mut engine = engine_with(records(&[
            ("1", "Dev", "50", "2024-01-05"),
            ("2", "QA", "40", "2024-02-01"),
        ]));
        engine.stage_edit("2", "Rate", "45").unwrap();

        let mut source = FakeSource::with(records(&[
            ("1", "Dev", "50", "2024-01-05"),
            ("2", "QA", "40", "2024-02-01"),
        ]));
        engine
            .delete_records(&["2".to_string()], &mut source, &UserContext::default())
            .unwrap();
        assert_eq!(engine.total(), 1);
        assert_eq!(engine.snapshot().rows[0].key, "1");
        assert!(!engine.has_pending_edits());
    }

    #[test]
    fn failed_delete_keeps_records_and_staged_edits() {
        let mut engine = engine_with(records(&[("1", "Dev", "50", "2024-01-05")]));
        engine.stage_edit("1", "Rate", "55").unwrap();

        let mut source = FakeSource::with(records(&[("1", "Dev", "50", "2024-01-05")]));
        source.fail_delete = true;
        let err =
            engine.delete_records(&["1".to_string()], &mut source, &UserContext::default());
        assert!(err.is_err());
        assert_eq!(engine.total(), 1);
        assert_eq!(engine.pending_edit_count(), 1);
    }

    #[test]
    fn failed_load_can_keep_previous_data_on_request() {
        let mut engine = engine_with(records(&[("1", "Dev", "50", "2024-01-05")]));
        let token = engine.begin_load();
        engine.finish_load(
            token,
            Err(GridError::FetchFailed("flaky".to_string())),
            true,
        );
        assert_eq!(engine.status(), Status::Error);
        assert_eq!(engine.total(), 1);
    }

    #[test]
    fn stale_load_is_discarded_in_favor_of_the_newer_request() {
        let mut engine = TableEngine::new(schema(), GridConfig::default());
        let first = engine.begin_load();
        let second = engine.begin_load();

        // Second (newer) request resolves first.
        assert!(engine.finish_load(second, Ok(records(&[("2", "New", "1", "2024-01-01")])), false));
        // First request resolves late and must be dropped.
        assert!(!engine.finish_load(first, Ok(records(&[("1", "Old", "1", "2024-01-01")])), false));

        assert_eq!(engine.status(), Status::Ready);
        let snap = engine.snapshot();
        assert_eq!(snap.rows.len(), 1);
        assert_eq!(snap.rows[0].key, "2");
    }

    #[test]
    fn pipeline_filters_sorts_and_windows() {
        let mut engine = engine_with(records(&[
            ("1", "Java Developer", "60", "2024-03-01"),
            ("2", "Rust Developer", "90", "2024-01-05"),
            ("3", "Project Manager", "70", "2024-02-01"),
        ]));
        engine.set_global_query("developer");
        engine.set_sort("Posted", Direction::Ascending);
        let snap = engine.snapshot();
        assert_eq!(snap.total, 2);
        assert_eq!(snap.rows[0].key, "2");
        assert_eq!(snap.rows[1].key, "1");

        engine.set_sort("Rate", Direction::Descending);
        let snap = engine.snapshot();
        assert_eq!(snap.rows[0].key, "2");

        engine.set_filter("Rate", Some(FilterSpec::new(FilterOp::Below, "80")));
        assert_eq!(engine.total(), 1);
        engine.set_filter("Rate", None);
        engine.set_global_query("");
        assert_eq!(engine.total(), 3);
    }

    #[test]
    fn window_expands_client_side_and_resets_on_load() {
        let recs: Vec<Record> = (0..40)
            .map(|i| {
                match json!({"id": i.to_string(), "title": "T", "rate": "1", "posted": "2024-01-01"}) {
                    serde_json::Value::Object(map) => map,
                    _ => unreachable!(),
                }
            })
            .collect();
        let mut engine = engine_with(recs.clone());
        assert_eq!(engine.snapshot().rows.len(), 25);

        engine.expand_window(10);
        assert_eq!(engine.snapshot().rows.len(), 35);

        // Reload resets the window to its default size.
        let source = FakeSource::with(recs);
        engine.load(&source, &UserContext::default()).unwrap();
        assert_eq!(engine.snapshot().rows.len(), 25);
    }

    #[test]
    fn snapshot_respects_column_preference_and_flags_dirty_cells() {
        let mut engine = engine_with(records(&[("1", "Dev", "50", "2024-01-05")]));
        engine.set_column_preference(ColumnPreference {
            order: vec!["Rate".to_string(), "Title".to_string()],
            hidden: vec!["Posted".to_string()],
        });
        engine.stage_edit("1", "Rate", "55").unwrap();

        let snap = engine.snapshot();
        assert_eq!(snap.columns, vec!["Rate", "Title"]);
        assert_eq!(snap.rows[0].cells, vec!["55", "Dev"]);
        assert_eq!(snap.rows[0].dirty, vec![true, false]);

        // Exports carry saved values only, over the full sequence.
        let (columns, rows) = engine.export_rows();
        assert_eq!(columns, vec!["Rate", "Title"]);
        assert_eq!(rows, vec![vec!["50".to_string(), "Dev".to_string()]]);
    }

    #[test]
    fn staging_an_edit_on_an_unknown_column_is_rejected() {
        let mut engine = engine_with(records(&[("1", "Dev", "50", "2024-01-05")]));
        assert!(matches!(
            engine.stage_edit("1", "Nope", "x"),
            Err(GridError::ValidationFailed(_))
        ));
    }

    #[test]
    fn failed_commit_retains_every_pending_edit() {
        let mut engine = engine_with(records(&[("1", "Dev", "50", "2024-01-05")]));
        engine.stage_edit("1", "Rate", "55").unwrap();
        engine.stage_edit("1", "Title", "Sr Dev").unwrap();

        let mut source = FakeSource::with(records(&[("1", "Dev", "50", "2024-01-05")]));
        source.fail_update = true;
        let err = engine.commit_edits(&mut source, &UserContext::default());
        assert!(err.is_err());
        assert_eq!(engine.pending_edit_count(), 2);
    }

    #[test]
    fn successful_commit_clears_edits_and_reloads() {
        let mut engine = engine_with(records(&[("1", "Dev", "50", "2024-01-05")]));
        engine.stage_edit("1", "Rate", "55").unwrap();

        let mut source = FakeSource::with(records(&[("1", "Dev", "55", "2024-01-05")]));
        engine.commit_edits(&mut source, &UserContext::default()).unwrap();
        assert!(!engine.has_pending_edits());
        assert_eq!(source.updates_seen, 1);
        assert_eq!(engine.snapshot().rows[0].cells[1], "55");
    }

    #[test]
    fn discard_drops_staged_edits() {
        let mut engine = engine_with(records(&[("1", "Dev", "50", "2024-01-05")]));
        engine.stage_edit("1", "Rate", "55").unwrap();
        engine.discard_edits();
        assert!(!engine.has_pending_edits());
        assert_eq!(engine.snapshot().rows[0].dirty, vec![false, false, false]);
    }
}
