use thiserror::Error;

// Error taxonomy shared by the engine and its collaborators. Pipeline
// internal problems (e.g. unparseable filter operands) are not errors,
// they degrade to the documented string fallback in `filter`/`sort`.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("fetch failed: {0}")]
    FetchFailed(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct GridConfig {
    /// Number of rows exposed to the presentation layer after a fresh load.
    pub default_window: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig { default_window: 25 }
    }
}
