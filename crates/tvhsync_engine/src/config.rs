//! Configuration for the sync engine.

use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;
use tvhsync_protocol::CLIENT_HTSP_VERSION;

/// Configuration for an [`Engine`](crate::Engine).
///
/// Durations are read from JSON as milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a command waits for authentication to finish.
    #[serde(deserialize_with = "millis")]
    pub auth_timeout: Duration,
    /// How long a batch (icon warm-up, more events) may take.
    #[serde(deserialize_with = "millis")]
    pub batch_timeout: Duration,
    /// How long a blocking request waits for its response.
    #[serde(deserialize_with = "millis")]
    pub request_timeout: Duration,
    /// How often the receive loop wakes up to check for shutdown.
    #[serde(deserialize_with = "millis")]
    pub poll_interval: Duration,
    /// Worker pool size.
    pub worker_threads: usize,
    /// How far ahead the EPG is synced.
    #[serde(deserialize_with = "millis")]
    pub epg_window: Duration,
    /// How far back the server is asked for EPG changes.
    #[serde(deserialize_with = "millis")]
    pub updates_since: Duration,
    /// How long finished events are kept.
    #[serde(deserialize_with = "millis")]
    pub event_retention: Duration,
    /// Delay before the follow-up fetch of more events.
    #[serde(deserialize_with = "millis")]
    pub incremental_delay: Duration,
    /// Events requested per channel by the follow-up fetch.
    pub incremental_event_count: u32,
    /// Directory for transcoded icons.
    pub icon_dir: PathBuf,
    /// Display density multiplier for the icon target size.
    pub icon_density: f32,
    /// Icon target size at density 1.0, in pixels.
    pub icon_base_size: u32,
    /// Client name sent in `hello`.
    pub client_name: String,
    /// Client version sent in `hello`.
    pub client_version: String,
    /// Protocol version requested in `hello`.
    pub htsp_version: u32,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            auth_timeout: Duration::from_secs(5),
            batch_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            worker_threads: 10,
            epg_window: Duration::from_secs(24 * 60 * 60),
            updates_since: Duration::from_secs(12 * 60 * 60),
            event_retention: Duration::from_secs(24 * 60 * 60),
            incremental_delay: Duration::from_secs(5),
            incremental_event_count: 15,
            icon_dir: std::env::temp_dir().join("tvhsync-icons"),
            icon_density: 1.0,
            icon_base_size: 64,
            client_name: "tvhsync".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            htsp_version: CLIENT_HTSP_VERSION,
        }
    }

    /// Sets the authentication wait bound.
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Sets the batch wait bound.
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the worker pool size.
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    /// Sets the EPG window.
    pub fn with_epg_window(mut self, window: Duration) -> Self {
        self.epg_window = window;
        self
    }

    /// Sets the delay before the follow-up event fetch.
    pub fn with_incremental_delay(mut self, delay: Duration) -> Self {
        self.incremental_delay = delay;
        self
    }

    /// Sets how many events the follow-up fetch requests per channel.
    pub fn with_incremental_event_count(mut self, count: u32) -> Self {
        self.incremental_event_count = count;
        self
    }

    /// Sets the icon cache directory.
    pub fn with_icon_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.icon_dir = dir.into();
        self
    }

    /// Sets the display density.
    pub fn with_icon_density(mut self, density: f32) -> Self {
        self.icon_density = density;
        self
    }

    /// Icon target size in pixels: `round(base × density)`, at least 1.
    pub fn icon_target_size(&self) -> u32 {
        let size = (self.icon_base_size as f32 * self.icon_density).round();
        if size.is_finite() && size >= 1.0 {
            size as u32
        } else {
            1
        }
    }

    pub(crate) fn secs(duration: Duration) -> i64 {
        i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}
