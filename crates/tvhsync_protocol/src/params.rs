//! Parameter types for the command surface.

use crate::message::HtspMessage;

/// Parameters for `getEvents`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    /// Restrict to one channel.
    pub channel_id: Option<u32>,
    /// Start from this event.
    pub event_id: Option<u32>,
    /// Number of events following `event_id` to return.
    pub num_following: Option<u32>,
    /// Latest start time (unix seconds).
    pub max_time: Option<i64>,
    /// Preferred language for text fields.
    pub language: Option<String>,
}

impl EventQuery {
    /// Query for the events following `event_id` on `channel_id`.
    pub fn following(channel_id: u32, event_id: u32, num_following: u32) -> Self {
        Self {
            channel_id: Some(channel_id),
            event_id: Some(event_id),
            num_following: Some(num_following),
            ..Self::default()
        }
    }

    pub(crate) fn apply(&self, msg: HtspMessage) -> HtspMessage {
        msg.with_opt("channelId", self.channel_id)
            .with_opt("eventId", self.event_id)
            .with_opt("numFollowing", self.num_following)
            .with_opt("maxTime", self.max_time)
            .with_opt("language", self.language.clone())
    }
}

/// Parameters for `epgQuery`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpgQuery {
    /// Search text.
    pub query: String,
    /// Restrict to one channel.
    pub channel_id: Option<u32>,
    /// Restrict to one channel tag.
    pub tag_id: Option<u32>,
    /// Restrict to one content type.
    pub content_type: Option<u32>,
    /// Minimum duration in seconds.
    pub min_duration: Option<u32>,
    /// Maximum duration in seconds.
    pub max_duration: Option<u32>,
    /// Preferred language.
    pub language: Option<String>,
    /// Match against the full text instead of the title only.
    pub full: bool,
}

impl EpgQuery {
    /// Title search across all channels.
    pub fn title(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub(crate) fn apply(&self, msg: HtspMessage) -> HtspMessage {
        msg.with("query", self.query.as_str())
            .with_opt("channelId", self.channel_id)
            .with_opt("tagId", self.tag_id)
            .with_opt("contentType", self.content_type)
            .with_opt("minDuration", self.min_duration)
            .with_opt("maxDuration", self.max_duration)
            .with_opt("language", self.language.clone())
            .with("full", self.full)
    }
}

/// EPG fields attached to `enableAsyncMetadata` when events must be synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpgWindow {
    /// Latest event start time to stream (unix seconds).
    pub max_time: i64,
    /// Only stream changes newer than this (unix seconds).
    pub last_update: i64,
}

/// Fields of a scheduled recording, for add and update.
///
/// A recording is created either from an EPG event (`event_id`) or from a
/// channel and time span.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DvrEntryParams {
    /// EPG event to record.
    pub event_id: Option<u32>,
    /// Channel to record from.
    pub channel_id: Option<u32>,
    /// Start time (unix seconds).
    pub start: Option<i64>,
    /// Stop time (unix seconds).
    pub stop: Option<i64>,
    /// Minutes to start early.
    pub start_extra: Option<i64>,
    /// Minutes to stop late.
    pub stop_extra: Option<i64>,
    /// Title.
    pub title: Option<String>,
    /// Subtitle.
    pub subtitle: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Priority.
    pub priority: Option<u32>,
    /// Retention in days.
    pub retention: Option<u32>,
    /// Recording profile name.
    pub config_name: Option<String>,
    /// Whether the entry is enabled.
    pub enabled: Option<bool>,
}

impl DvrEntryParams {
    pub(crate) fn apply(&self, msg: HtspMessage) -> HtspMessage {
        msg.with_opt("eventId", self.event_id)
            .with_opt("channelId", self.channel_id)
            .with_opt("start", self.start)
            .with_opt("stop", self.stop)
            .with_opt("startExtra", self.start_extra)
            .with_opt("stopExtra", self.stop_extra)
            .with_opt("title", self.title.clone())
            .with_opt("subtitle", self.subtitle.clone())
            .with_opt("description", self.description.clone())
            .with_opt("priority", self.priority)
            .with_opt("retention", self.retention)
            .with_opt("configName", self.config_name.clone())
            .with_opt("enabled", self.enabled)
    }
}

/// Fields of a series recording rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutorecParams {
    /// Whether the rule is enabled.
    pub enabled: Option<bool>,
    /// Rule name.
    pub name: Option<String>,
    /// Title pattern.
    pub title: Option<String>,
    /// Match the pattern against all text fields.
    pub fulltext: Option<bool>,
    /// Target directory.
    pub directory: Option<String>,
    /// Channel restriction.
    pub channel_id: Option<u32>,
    /// Earliest start, minutes past midnight.
    pub start: Option<i64>,
    /// Latest start, minutes past midnight.
    pub start_window: Option<i64>,
    /// Bitmask of weekdays, Monday is bit 0.
    pub days_of_week: Option<u32>,
    /// Priority.
    pub priority: Option<u32>,
    /// Minimum duration in seconds.
    pub min_duration: Option<u32>,
    /// Maximum duration in seconds.
    pub max_duration: Option<u32>,
    /// Retention in days.
    pub retention: Option<u32>,
    /// Minutes to start early.
    pub start_extra: Option<i64>,
    /// Minutes to stop late.
    pub stop_extra: Option<i64>,
    /// Duplicate detection mode.
    pub dup_detect: Option<u32>,
    /// Recording profile name.
    pub config_name: Option<String>,
}

impl AutorecParams {
    pub(crate) fn apply(&self, msg: HtspMessage) -> HtspMessage {
        msg.with_opt("enabled", self.enabled)
            .with_opt("name", self.name.clone())
            .with_opt("title", self.title.clone())
            .with_opt("fulltext", self.fulltext)
            .with_opt("directory", self.directory.clone())
            .with_opt("channelId", self.channel_id)
            .with_opt("start", self.start)
            .with_opt("startWindow", self.start_window)
            .with_opt("daysOfWeek", self.days_of_week)
            .with_opt("priority", self.priority)
            .with_opt("minDuration", self.min_duration)
            .with_opt("maxDuration", self.max_duration)
            .with_opt("retention", self.retention)
            .with_opt("startExtra", self.start_extra)
            .with_opt("stopExtra", self.stop_extra)
            .with_opt("dupDetect", self.dup_detect)
            .with_opt("configName", self.config_name.clone())
    }
}

/// Fields of a timer recording rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerecParams {
    /// Whether the rule is enabled.
    pub enabled: Option<bool>,
    /// Rule name.
    pub name: Option<String>,
    /// Title of the resulting recordings.
    pub title: Option<String>,
    /// Target directory.
    pub directory: Option<String>,
    /// Channel to record from.
    pub channel_id: Option<u32>,
    /// Start, minutes past midnight.
    pub start: Option<i64>,
    /// Stop, minutes past midnight.
    pub stop: Option<i64>,
    /// Bitmask of weekdays, Monday is bit 0.
    pub days_of_week: Option<u32>,
    /// Priority.
    pub priority: Option<u32>,
    /// Retention in days.
    pub retention: Option<u32>,
    /// Recording profile name.
    pub config_name: Option<String>,
}

impl TimerecParams {
    pub(crate) fn apply(&self, msg: HtspMessage) -> HtspMessage {
        msg.with_opt("enabled", self.enabled)
            .with_opt("name", self.name.clone())
            .with_opt("title", self.title.clone())
            .with_opt("directory", self.directory.clone())
            .with_opt("channelId", self.channel_id)
            .with_opt("start", self.start)
            .with_opt("stop", self.stop)
            .with_opt("daysOfWeek", self.days_of_week)
            .with_opt("priority", self.priority)
            .with_opt("retention", self.retention)
            .with_opt("configName", self.config_name.clone())
    }
}

/// How a scheduled recording is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveKind {
    /// Cancel a scheduled or running recording, keeping nothing.
    Cancel,
    /// Stop a running recording, keeping what was recorded.
    Stop,
    /// Delete a finished recording and its file.
    Delete,
}

impl RemoveKind {
    /// The request method for this kind of removal.
    pub fn method(self) -> &'static str {
        match self {
            RemoveKind::Cancel => "cancelDvrEntry",
            RemoveKind::Stop => "stopDvrEntry",
            RemoveKind::Delete => "deleteDvrEntry",
        }
    }
}

/// Target of a `getTicket` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketTarget {
    /// Live channel stream.
    Channel(u32),
    /// Recorded file.
    Recording(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_query_sets_only_present_fields() {
        let msg = EventQuery::following(5, 900, 15).apply(HtspMessage::request("getEvents"));
        assert_eq!(msg.u32("channelId"), Some(5));
        assert_eq!(msg.u32("eventId"), Some(900));
        assert_eq!(msg.u32("numFollowing"), Some(15));
        assert!(!msg.contains("maxTime"));
        assert!(!msg.contains("language"));
    }

    #[test]
    fn remove_kind_methods() {
        assert_eq!(RemoveKind::Cancel.method(), "cancelDvrEntry");
        assert_eq!(RemoveKind::Stop.method(), "stopDvrEntry");
        assert_eq!(RemoveKind::Delete.method(), "deleteDvrEntry");
    }

    #[test]
    fn epg_query_always_sends_full_flag() {
        let msg = EpgQuery::title("news").apply(HtspMessage::request("epgQuery"));
        assert_eq!(msg.str("query"), Some("news"));
        assert_eq!(msg.flag("full"), Some(false));
        assert!(!msg.contains("channelId"));
    }
}
