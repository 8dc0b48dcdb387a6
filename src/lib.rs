pub mod columns;
pub mod domain;
pub mod filter;
pub mod model;
pub mod schema;
pub mod sort;
pub mod source;

pub use columns::{ColumnPreference, JsonFileStore, MemoryStore, PreferenceStore, resolve_columns};
pub use domain::{GridConfig, GridError};
pub use filter::{FilterOp, FilterSpec};
pub use model::{LoadToken, SnapshotRow, Status, TableEngine, TableSnapshot};
pub use schema::{CellRule, ColumnKind, ColumnSpec, DisplayRow, EntitySchema, Record};
pub use sort::{Direction, SortSpec};
pub use source::{ApiResponse, DataSource, FileSource, RecordUpdate, UserContext};
