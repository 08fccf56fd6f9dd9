//! Domain records.
//!
//! Every record is keyed by a backend-assigned id, except [`ServerProfile`]
//! which has a local numeric id and an optional backend uuid. Text fields
//! the backend may omit are `Option`s so a record can tell "never sent"
//! apart from "sent empty".

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Debug;

/// A record stored in a [`Repository`](crate::Repository).
pub trait Entity: Clone + Debug + Send + Sync + 'static {
    /// Primary key type.
    type Id: Ord + Clone + Debug + Send + Sync + 'static;

    /// Human-readable kind, used in errors and logs.
    const KIND: &'static str;

    /// Returns the primary key.
    fn id(&self) -> Self::Id;
}

/// A broadcast channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Backend channel id.
    pub id: u32,
    /// Display name.
    pub name: Option<String>,
    /// Display number, `"5"` or `"5.1"`, built from the major and minor parts.
    pub number: Option<String>,
    /// Major channel number.
    #[serde(default)]
    pub number_major: Option<i64>,
    /// Minor channel number.
    #[serde(default)]
    pub number_minor: Option<i64>,
    /// Icon reference: an absolute URL or a server-relative path.
    pub icon: Option<String>,
    /// 1-based position in the sync stream that delivered this channel.
    pub server_order: u32,
    /// Event currently on air.
    pub event_id: u32,
    /// Event following the current one.
    pub next_event_id: u32,
}

impl Entity for Channel {
    type Id = u32;
    const KIND: &'static str = "channel";

    fn id(&self) -> u32 {
        self.id
    }
}

/// A channel tag (channel group).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTag {
    /// Backend tag id.
    pub id: u32,
    /// Display name.
    pub name: Option<String>,
    /// Sort index.
    pub index: u32,
    /// Icon reference.
    pub icon: Option<String>,
    /// Local selection flag. Never sent by the backend.
    pub is_selected: bool,
    /// Member channel ids. Replaced wholesale when the backend sends a list.
    pub members: BTreeSet<u32>,
}

impl ChannelTag {
    /// Number of member channels.
    pub fn channel_count(&self) -> usize {
        self.members.len()
    }
}

impl Entity for ChannelTag {
    type Id = u32;
    const KIND: &'static str = "tag";

    fn id(&self) -> u32 {
        self.id
    }
}

/// Membership of a channel in a tag, derived from [`ChannelTag::members`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagChannel {
    /// Tag id.
    pub tag_id: u32,
    /// Channel id.
    pub channel_id: u32,
}

impl TagChannel {
    /// Creates a relation row.
    pub fn new(tag_id: u32, channel_id: u32) -> Self {
        Self { tag_id, channel_id }
    }
}

impl Entity for TagChannel {
    type Id = (u32, u32);
    const KIND: &'static str = "tag-channel";

    fn id(&self) -> (u32, u32) {
        (self.tag_id, self.channel_id)
    }
}

/// An EPG event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    /// Backend event id.
    pub id: u32,
    /// Channel the event airs on.
    pub channel_id: u32,
    /// Start (unix seconds).
    pub start: i64,
    /// Stop (unix seconds).
    pub stop: i64,
    /// Title.
    pub title: Option<String>,
    /// Subtitle.
    pub subtitle: Option<String>,
    /// Short summary.
    pub summary: Option<String>,
    /// Long description.
    pub description: Option<String>,
    /// Image URL.
    pub image: Option<String>,
    /// Series link identifier.
    pub series_link: Option<String>,
    /// Episode text, such as `"Season 2 Episode 5"`.
    pub episode: Option<String>,
    /// DVB content type.
    pub content_type: Option<u32>,
    /// Next event on the same channel, `0` if unknown.
    pub next_event_id: u32,
    /// Recording scheduled for this event, `0` if none.
    pub dvr_id: u32,
}

impl Entity for Program {
    type Id = u32;
    const KIND: &'static str = "program";

    fn id(&self) -> u32 {
        self.id
    }
}

/// A scheduled, running or finished recording.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recording {
    /// Backend recording id.
    pub id: u32,
    /// Channel recorded from, `0` if the channel is gone.
    pub channel_id: u32,
    /// Start (unix seconds).
    pub start: i64,
    /// Stop (unix seconds).
    pub stop: i64,
    /// Minutes recorded before `start`.
    pub start_extra: i64,
    /// Minutes recorded after `stop`.
    pub stop_extra: i64,
    /// Title.
    pub title: Option<String>,
    /// Subtitle.
    pub subtitle: Option<String>,
    /// Summary.
    pub summary: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Backend state: `scheduled`, `recording`, `completed`, `missed`, `invalid`.
    pub state: Option<String>,
    /// Backend error text.
    pub error: Option<String>,
    /// EPG event this recording was created from.
    pub event_id: u32,
    /// Parent series recording rule.
    pub autorec_id: Option<String>,
    /// Parent timer recording rule.
    pub timerec_id: Option<String>,
    /// Whether the entry is enabled.
    pub enabled: bool,
    /// Priority.
    pub priority: u32,
    /// Retention in days.
    pub retention: u32,
    /// Recording profile name.
    pub config_name: Option<String>,
    /// Stream data error count.
    pub data_errors: Option<String>,
}

/// Error text the backend reports for a finished recording whose file is gone.
const FILE_MISSING: &str = "File missing";

impl Recording {
    fn state_is(&self, state: &str) -> bool {
        self.state.as_deref() == Some(state)
    }

    /// Waiting to start.
    pub fn is_scheduled(&self) -> bool {
        self.error.is_none() && self.state_is("scheduled")
    }

    /// Currently recording.
    pub fn is_recording(&self) -> bool {
        self.error.is_none() && self.state_is("recording")
    }

    /// Finished without error.
    pub fn is_completed(&self) -> bool {
        self.error.is_none() && self.state_is("completed")
    }

    /// Finished, but the file has been removed.
    pub fn is_removed(&self) -> bool {
        self.state_is("completed") && self.error.as_deref() == Some(FILE_MISSING)
    }

    /// Never started.
    pub fn is_missed(&self) -> bool {
        self.state_is("missed")
    }

    /// Broken, or finished with an error other than a missing file.
    pub fn is_failed(&self) -> bool {
        self.state_is("invalid")
            || (self.state_is("completed")
                && self.error.is_some()
                && self.error.as_deref() != Some(FILE_MISSING))
    }
}

impl Entity for Recording {
    type Id = u32;
    const KIND: &'static str = "recording";

    fn id(&self) -> u32 {
        self.id
    }
}

/// A series recording rule ("autorec").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRecordingRule {
    /// Backend rule id.
    pub id: String,
    /// Whether the rule is active.
    pub enabled: bool,
    /// Rule name.
    pub name: Option<String>,
    /// Title pattern.
    pub title: Option<String>,
    /// Match the pattern against all text fields.
    pub fulltext: bool,
    /// Target directory.
    pub directory: Option<String>,
    /// Channel restriction, `0` for any.
    pub channel_id: u32,
    /// Earliest start, minutes past midnight.
    pub start: i64,
    /// Latest start, minutes past midnight.
    pub start_window: i64,
    /// Weekday bitmask.
    pub days_of_week: u32,
    /// Priority.
    pub priority: u32,
    /// Minimum duration in seconds.
    pub min_duration: u32,
    /// Maximum duration in seconds.
    pub max_duration: u32,
    /// Retention in days.
    pub retention: u32,
    /// Minutes to start early.
    pub start_extra: i64,
    /// Minutes to stop late.
    pub stop_extra: i64,
    /// Duplicate detection mode.
    pub dup_detect: u32,
    /// Recording profile name.
    pub config_name: Option<String>,
    /// Owner.
    pub owner: Option<String>,
    /// Creator.
    pub creator: Option<String>,
}

impl Entity for SeriesRecordingRule {
    type Id = String;
    const KIND: &'static str = "series rule";

    fn id(&self) -> String {
        self.id.clone()
    }
}

/// A timer recording rule ("timerec").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerRecordingRule {
    /// Backend rule id.
    pub id: String,
    /// Whether the rule is active.
    pub enabled: bool,
    /// Rule name.
    pub name: Option<String>,
    /// Title of the resulting recordings.
    pub title: Option<String>,
    /// Target directory.
    pub directory: Option<String>,
    /// Channel to record from.
    pub channel_id: u32,
    /// Start, minutes past midnight.
    pub start: i64,
    /// Stop, minutes past midnight.
    pub stop: i64,
    /// Weekday bitmask.
    pub days_of_week: u32,
    /// Priority.
    pub priority: u32,
    /// Retention in days.
    pub retention: u32,
    /// Recording profile name.
    pub config_name: Option<String>,
    /// Owner.
    pub owner: Option<String>,
    /// Creator.
    pub creator: Option<String>,
}

impl Entity for TimerRecordingRule {
    type Id = String;
    const KIND: &'static str = "timer rule";

    fn id(&self) -> String {
        self.id.clone()
    }
}

/// What a server profile is used for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    /// Streaming over HTSP.
    #[default]
    HtspPlayback,
    /// Streaming over HTTP.
    HttpPlayback,
    /// Recording.
    Recording,
}

/// A streaming or recording profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProfile {
    /// Local id, assigned on insert.
    pub id: u32,
    /// Backend uuid. Local fallback profiles have none.
    pub uuid: Option<String>,
    /// Name.
    pub name: String,
    /// Comment.
    pub comment: Option<String>,
    /// Usage.
    pub kind: ProfileKind,
}

impl ServerProfile {
    /// Creates a profile without a backend uuid.
    pub fn local(name: impl Into<String>, kind: ProfileKind) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Self::default()
        }
    }
}

impl Entity for ServerProfile {
    type Id = u32;
    const KIND: &'static str = "profile";

    fn id(&self) -> u32 {
        self.id
    }
}

/// Server facts learned during the handshake and the secondary fetches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Server software name.
    pub server_name: Option<String>,
    /// Server software version.
    pub server_version: Option<String>,
    /// Negotiated HTSP version.
    pub htsp_version: u32,
    /// Web root prefix for HTTP URLs.
    pub webroot: Option<String>,
    /// Free recording space in bytes.
    pub free_disk_space: i64,
    /// Total recording space in bytes.
    pub total_disk_space: i64,
    /// Server time (unix seconds).
    pub time: i64,
    /// Offset from GMT in milliseconds, DST removed.
    pub gmt_offset: i64,
    /// Default HTSP playback profile.
    pub htsp_playback_profile_id: Option<u32>,
    /// Default HTTP playback profile.
    pub http_playback_profile_id: Option<u32>,
    /// Default recording profile.
    pub recording_profile_id: Option<u32>,
}

impl ServerStatus {
    /// The default profile id for a kind.
    pub fn default_profile(&self, kind: ProfileKind) -> Option<u32> {
        match kind {
            ProfileKind::HtspPlayback => self.htsp_playback_profile_id,
            ProfileKind::HttpPlayback => self.http_playback_profile_id,
            ProfileKind::Recording => self.recording_profile_id,
        }
    }

    /// Sets the default profile id for a kind.
    pub fn set_default_profile(&mut self, kind: ProfileKind, id: Option<u32>) {
        match kind {
            ProfileKind::HtspPlayback => self.htsp_playback_profile_id = id,
            ProfileKind::HttpPlayback => self.http_playback_profile_id = id,
            ProfileKind::Recording => self.recording_profile_id = id,
        }
    }
}

/// A persisted backend connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Display name.
    pub name: String,
    /// Host name or address.
    pub host: String,
    /// HTSP port.
    pub port: u16,
    /// User name.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Time of the last completed sync (unix seconds).
    pub last_update: i64,
    /// Whether the next sync must re-fetch channels and tags.
    pub sync_required: bool,
}

impl ConnectionSettings {
    /// Creates settings for a host that have never been synced.
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Sets the credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: String::new(),
            port: 9982,
            username: None,
            password: None,
            connect_timeout_secs: 5,
            last_update: 0,
            sync_required: true,
        }
    }
}
