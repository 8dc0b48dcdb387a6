use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

use crate::domain::GridError;
use crate::schema::Record;

/// Caller identity forwarded to the backend with every call.
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    pub user: String,
    pub role: String,
}

impl UserContext {
    pub fn new(user: &str, role: &str) -> Self {
        UserContext {
            user: user.to_string(),
            role: role.to_string(),
        }
    }
}

/// Wire envelope every backend endpoint answers with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn into_result(self) -> Result<T, GridError> {
        if self.success {
            self.data
                .ok_or_else(|| GridError::FetchFailed("response carried no data".to_string()))
        } else {
            Err(GridError::FetchFailed(
                self.message.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }
}

/// One record's worth of staged cell changes, keyed by column id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub key: String,
    pub changes: HashMap<String, String>,
}

/// The upstream data collaborator. The engine only needs these three
/// operation shapes; transport is the implementer's business.
pub trait DataSource {
    fn list(&self, entity: &str, ctx: &UserContext) -> Result<Vec<Record>, GridError>;
    fn update(&mut self, batch: &[RecordUpdate], ctx: &UserContext) -> Result<(), GridError>;
    fn delete(&mut self, keys: &[String], ctx: &UserContext) -> Result<(), GridError>;
}

/// Read-only source over a JSON file holding either a bare record array or
/// a full `ApiResponse` envelope. Backs the CLI front end.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSource { path: path.into() }
    }
}

impl DataSource for FileSource {
    fn list(&self, entity: &str, _ctx: &UserContext) -> Result<Vec<Record>, GridError> {
        let text = fs::read_to_string(&self.path)?;
        let records = match serde_json::from_str::<serde_json::Value>(&text)? {
            serde_json::Value::Array(_) => {
                serde_json::from_str::<Vec<Record>>(&text)?
            }
            _ => serde_json::from_str::<ApiResponse<Vec<Record>>>(&text)?.into_result()?,
        };
        debug!("Listed {} {} records from {:?}", records.len(), entity, self.path);
        Ok(records)
    }

    fn update(&mut self, _batch: &[RecordUpdate], _ctx: &UserContext) -> Result<(), GridError> {
        Err(GridError::PermissionDenied(
            "file source is read-only".to_string(),
        ))
    }

    fn delete(&mut self, _keys: &[String], _ctx: &UserContext) -> Result<(), GridError> {
        Err(GridError::PermissionDenied(
            "file source is read-only".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_maps_failure_to_fetch_error() {
        let resp: ApiResponse<Vec<Record>> = ApiResponse {
            success: false,
            data: None,
            message: Some("session expired".to_string()),
        };
        match resp.into_result() {
            Err(GridError::FetchFailed(msg)) => assert_eq!(msg, "session expired"),
            other => panic!("expected FetchFailed, got {other:?}"),
        }
    }

    #[test]
    fn file_source_accepts_bare_arrays_and_envelopes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = UserContext::new("u1", "admin");

        let bare = dir.path().join("bare.json");
        fs::write(&bare, json!([{"id": "1"}, {"id": "2"}]).to_string()).unwrap();
        assert_eq!(FileSource::new(&bare).list("job", &ctx).unwrap().len(), 2);

        let wrapped = dir.path().join("wrapped.json");
        fs::write(
            &wrapped,
            json!({"success": true, "data": [{"id": "1"}]}).to_string(),
        )
        .unwrap();
        assert_eq!(FileSource::new(&wrapped).list("job", &ctx).unwrap().len(), 1);
    }

    #[test]
    fn file_source_rejects_writes() {
        let mut src = FileSource::new("/nonexistent.json");
        let ctx = UserContext::default();
        assert!(matches!(
            src.update(&[], &ctx),
            Err(GridError::PermissionDenied(_))
        ));
        assert!(matches!(
            src.delete(&["P-1".to_string()], &ctx),
            Err(GridError::PermissionDenied(_))
        ));
    }
}
