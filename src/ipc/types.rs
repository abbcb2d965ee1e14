use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One line on stdin is one request.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Workspace selection is sticky for the life of the process; every migrate
/// call runs against the currently open database.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
