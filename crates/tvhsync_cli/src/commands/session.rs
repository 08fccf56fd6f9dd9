//! Recorded session files.

use serde::Deserialize;
use std::path::Path;
use tvhsync_engine::EngineConfig;
use tvhsync_store::ConnectionSettings;
use tvhsync_testkit::Catalog;

/// A session: what the server holds, and the client state it meets.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Session {
    /// Client connection settings before the sync.
    pub settings: ConnectionSettings,
    /// Engine configuration. Durations are in milliseconds.
    pub config: EngineConfig,
    /// Server data.
    pub catalog: Catalog,
    /// Clock time to sync at (unix seconds). The system clock when absent.
    pub now: Option<i64>,
}

impl Session {
    /// Reads a session file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Err(format!("No session file at {:?}", path).into());
        }
        let text = std::fs::read_to_string(path)?;
        let session = serde_json::from_str(&text)?;
        Ok(session)
    }
}
