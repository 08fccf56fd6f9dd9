//! Server-side data served by the loopback backend.
//!
//! Records are kept as bare HTSP field maps without a `method`; the
//! backend adds the method when it streams them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tvhsync_protocol::HtspMessage;

/// Everything a loopback server knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    /// Version reported in `hello`.
    pub htsp_version: u32,
    /// Server name reported in `hello`.
    pub server_name: String,
    /// Server version reported in `hello`.
    pub server_version: String,
    /// Required user name. `None` accepts any login.
    pub username: Option<String>,
    /// Required password.
    pub password: Option<String>,
    /// Channel records.
    pub channels: Vec<HtspMessage>,
    /// Tag records, each with its `members`.
    pub tags: Vec<HtspMessage>,
    /// EPG event records.
    pub events: Vec<HtspMessage>,
    /// Recording records.
    pub recordings: Vec<HtspMessage>,
    /// Series recording rules.
    pub autorecs: Vec<HtspMessage>,
    /// Timer recording rules.
    pub timerecs: Vec<HtspMessage>,
    /// Files reachable with `fileOpen`, by path.
    pub files: BTreeMap<String, Vec<u8>>,
    /// HTSP playback profiles.
    pub profiles: Vec<HtspMessage>,
    /// Recording profiles.
    pub dvr_configs: Vec<HtspMessage>,
    /// JSON answered to `api` `profile/list`.
    pub http_profiles: Option<String>,
    /// Free disk space in bytes.
    pub free_disk_space: i64,
    /// Total disk space in bytes.
    pub total_disk_space: i64,
    /// Server time (unix seconds).
    pub time: i64,
    /// Server GMT offset in minutes.
    pub gmt_offset: i64,
    /// Methods the server rejects, with the error it answers.
    pub rejections: BTreeMap<String, String>,
    /// Next id handed out for created records.
    pub next_id: u32,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            htsp_version: 34,
            server_name: "Tvheadend".to_string(),
            server_version: "4.3-2100".to_string(),
            username: None,
            password: None,
            channels: Vec::new(),
            tags: Vec::new(),
            events: Vec::new(),
            recordings: Vec::new(),
            autorecs: Vec::new(),
            timerecs: Vec::new(),
            files: BTreeMap::new(),
            profiles: Vec::new(),
            dvr_configs: Vec::new(),
            http_profiles: None,
            free_disk_space: 0,
            total_disk_space: 0,
            time: 0,
            gmt_offset: 0,
            rejections: BTreeMap::new(),
            next_id: 1000,
        }
    }
}

impl Catalog {
    /// Creates an empty catalog for a current server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reported HTSP version.
    pub fn with_htsp_version(mut self, version: u32) -> Self {
        self.htsp_version = version;
        self
    }

    /// Requires these credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Adds a channel record.
    pub fn with_channel(mut self, channel: HtspMessage) -> Self {
        self.channels.push(channel);
        self
    }

    /// Adds a tag record.
    pub fn with_tag(mut self, tag: HtspMessage) -> Self {
        self.tags.push(tag);
        self
    }

    /// Adds EPG event records.
    pub fn with_events(mut self, events: impl IntoIterator<Item = HtspMessage>) -> Self {
        self.events.extend(events);
        self
    }

    /// Adds a recording record.
    pub fn with_recording(mut self, recording: HtspMessage) -> Self {
        self.recordings.push(recording);
        self
    }

    /// Adds a series recording rule.
    pub fn with_autorec(mut self, rule: HtspMessage) -> Self {
        self.autorecs.push(rule);
        self
    }

    /// Adds a timer recording rule.
    pub fn with_timerec(mut self, rule: HtspMessage) -> Self {
        self.timerecs.push(rule);
        self
    }

    /// Serves `bytes` at `path`.
    pub fn with_file(mut self, path: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.files.insert(path.into(), bytes);
        self
    }

    /// Makes the server reject `method` with `error`.
    pub fn rejecting(mut self, method: impl Into<String>, error: impl Into<String>) -> Self {
        self.rejections.insert(method.into(), error.into());
        self
    }

    /// Parses a catalog from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub(crate) fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}
