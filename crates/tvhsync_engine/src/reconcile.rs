//! Translation from wire messages to domain records.
//!
//! Every function here is pure: a message and the current record go in,
//! the merged record comes out. Fields absent from the message never
//! overwrite what the record already holds.

use tracing::debug;
use tvhsync_protocol::{HtspMessage, ProtocolResult};
use tvhsync_store::{
    Channel, ChannelTag, Entity, Program, Recording, SeriesRecordingRule, ServerStatus,
    TimerRecordingRule,
};

/// A record that can be built from HTSP messages.
pub trait Reconcile: Entity {
    /// Reads the record id from a message.
    fn id_from(msg: &HtspMessage) -> ProtocolResult<Self::Id>;

    /// A blank record with the given id.
    fn empty(id: Self::Id) -> Self;

    /// Applies every field present in `msg`.
    fn apply(&mut self, msg: &HtspMessage);

    /// Icon reference whose cache file belongs to this record.
    fn icon(&self) -> Option<&str> {
        None
    }
}

/// Merges `msg` into `current`.
///
/// An add without a current record starts from a blank one. An update
/// without a current record is skipped and yields `None`.
pub fn merge<E: Reconcile>(
    msg: &HtspMessage,
    current: Option<E>,
    is_update: bool,
) -> ProtocolResult<Option<E>> {
    let id = E::id_from(msg)?;
    let mut record = match current {
        Some(record) => record,
        None if is_update => {
            debug!(kind = E::KIND, ?id, "update for unknown record skipped");
            return Ok(None);
        }
        None => E::empty(id),
    };
    record.apply(msg);
    Ok(Some(record))
}

fn text(field: &mut Option<String>, msg: &HtspMessage, key: &str) {
    if let Some(value) = msg.str(key) {
        *field = Some(value.to_string());
    }
}

fn uint(field: &mut u32, msg: &HtspMessage, key: &str) {
    if let Some(value) = msg.u32(key) {
        *field = value;
    }
}

fn int(field: &mut i64, msg: &HtspMessage, key: &str) {
    if let Some(value) = msg.i64(key) {
        *field = value;
    }
}

fn flag(field: &mut bool, msg: &HtspMessage, key: &str) {
    if let Some(value) = msg.flag(key) {
        *field = value;
    }
}

/// `"5"`, or `"5.1"` when a minor number is present.
pub fn display_number(major: i64, minor: Option<i64>) -> String {
    match minor {
        Some(minor) if minor > 0 => format!("{major}.{minor}"),
        _ => major.to_string(),
    }
}

impl Reconcile for Channel {
    fn id_from(msg: &HtspMessage) -> ProtocolResult<u32> {
        msg.require_u32("channelId")
    }

    fn empty(id: u32) -> Self {
        Channel {
            id,
            ..Channel::default()
        }
    }

    fn apply(&mut self, msg: &HtspMessage) {
        text(&mut self.name, msg, "channelName");
        let major = msg.i64("channelNumber");
        let minor = msg.i64("channelNumberMinor");
        if major.is_some() || minor.is_some() {
            self.number_major = major.or(self.number_major);
            self.number_minor = minor.or(self.number_minor);
            if let Some(major) = self.number_major {
                self.number = Some(display_number(major, self.number_minor));
            }
        }
        text(&mut self.icon, msg, "channelIcon");
        uint(&mut self.event_id, msg, "eventId");
        uint(&mut self.next_event_id, msg, "nextEventId");
    }

    fn icon(&self) -> Option<&str> {
        self.icon.as_deref()
    }
}

impl Reconcile for ChannelTag {
    fn id_from(msg: &HtspMessage) -> ProtocolResult<u32> {
        msg.require_u32("tagId")
    }

    fn empty(id: u32) -> Self {
        ChannelTag {
            id,
            ..ChannelTag::default()
        }
    }

    fn apply(&mut self, msg: &HtspMessage) {
        text(&mut self.name, msg, "tagName");
        uint(&mut self.index, msg, "tagIndex");
        text(&mut self.icon, msg, "tagIcon");
        if let Some(members) = msg.u32_list("members") {
            self.members = members.into_iter().collect();
        }
    }

    fn icon(&self) -> Option<&str> {
        self.icon.as_deref()
    }
}

impl Reconcile for Program {
    fn id_from(msg: &HtspMessage) -> ProtocolResult<u32> {
        msg.require_u32("eventId")
    }

    fn empty(id: u32) -> Self {
        Program {
            id,
            ..Program::default()
        }
    }

    fn apply(&mut self, msg: &HtspMessage) {
        uint(&mut self.channel_id, msg, "channelId");
        int(&mut self.start, msg, "start");
        int(&mut self.stop, msg, "stop");
        text(&mut self.title, msg, "title");
        text(&mut self.subtitle, msg, "subtitle");
        text(&mut self.summary, msg, "summary");
        text(&mut self.description, msg, "description");
        text(&mut self.image, msg, "image");
        if let Some(uri) = msg.str("serieslinkUri") {
            self.series_link = Some(uri.to_string());
        } else if let Some(id) = msg.i64("serieslinkId") {
            self.series_link = Some(id.to_string());
        }
        text(&mut self.episode, msg, "episodeOnscreen");
        if let Some(content_type) = msg.u32("contentType") {
            self.content_type = Some(content_type);
        }
        uint(&mut self.next_event_id, msg, "nextEventId");
        uint(&mut self.dvr_id, msg, "dvrId");
    }
}

impl Reconcile for Recording {
    fn id_from(msg: &HtspMessage) -> ProtocolResult<u32> {
        msg.require_u32("id")
    }

    fn empty(id: u32) -> Self {
        Recording {
            id,
            enabled: true,
            ..Recording::default()
        }
    }

    fn apply(&mut self, msg: &HtspMessage) {
        uint(&mut self.channel_id, msg, "channel");
        int(&mut self.start, msg, "start");
        int(&mut self.stop, msg, "stop");
        int(&mut self.start_extra, msg, "startExtra");
        int(&mut self.stop_extra, msg, "stopExtra");
        text(&mut self.title, msg, "title");
        text(&mut self.subtitle, msg, "subtitle");
        text(&mut self.summary, msg, "summary");
        text(&mut self.description, msg, "description");
        text(&mut self.state, msg, "state");
        text(&mut self.error, msg, "error");
        uint(&mut self.event_id, msg, "eventId");
        text(&mut self.autorec_id, msg, "autorecId");
        text(&mut self.timerec_id, msg, "timerecId");
        flag(&mut self.enabled, msg, "enabled");
        uint(&mut self.priority, msg, "priority");
        uint(&mut self.retention, msg, "retention");
        text(&mut self.config_name, msg, "configName");
        if let Some(errors) = msg.i64("dataErrors") {
            self.data_errors = Some(errors.to_string());
        } else {
            text(&mut self.data_errors, msg, "dataErrors");
        }
    }
}

impl Reconcile for SeriesRecordingRule {
    fn id_from(msg: &HtspMessage) -> ProtocolResult<String> {
        msg.require_str("id").map(str::to_string)
    }

    fn empty(id: String) -> Self {
        SeriesRecordingRule {
            id,
            enabled: true,
            ..SeriesRecordingRule::default()
        }
    }

    fn apply(&mut self, msg: &HtspMessage) {
        flag(&mut self.enabled, msg, "enabled");
        text(&mut self.name, msg, "name");
        text(&mut self.title, msg, "title");
        flag(&mut self.fulltext, msg, "fulltext");
        text(&mut self.directory, msg, "directory");
        uint(&mut self.channel_id, msg, "channel");
        int(&mut self.start, msg, "start");
        int(&mut self.start_window, msg, "startWindow");
        uint(&mut self.days_of_week, msg, "daysOfWeek");
        uint(&mut self.priority, msg, "priority");
        uint(&mut self.min_duration, msg, "minDuration");
        uint(&mut self.max_duration, msg, "maxDuration");
        uint(&mut self.retention, msg, "retention");
        int(&mut self.start_extra, msg, "startExtra");
        int(&mut self.stop_extra, msg, "stopExtra");
        uint(&mut self.dup_detect, msg, "dupDetect");
        text(&mut self.config_name, msg, "configName");
        text(&mut self.owner, msg, "owner");
        text(&mut self.creator, msg, "creator");
    }
}

impl Reconcile for TimerRecordingRule {
    fn id_from(msg: &HtspMessage) -> ProtocolResult<String> {
        msg.require_str("id").map(str::to_string)
    }

    fn empty(id: String) -> Self {
        TimerRecordingRule {
            id,
            enabled: true,
            ..TimerRecordingRule::default()
        }
    }

    fn apply(&mut self, msg: &HtspMessage) {
        flag(&mut self.enabled, msg, "enabled");
        text(&mut self.name, msg, "name");
        text(&mut self.title, msg, "title");
        text(&mut self.directory, msg, "directory");
        uint(&mut self.channel_id, msg, "channel");
        int(&mut self.start, msg, "start");
        int(&mut self.stop, msg, "stop");
        uint(&mut self.days_of_week, msg, "daysOfWeek");
        uint(&mut self.priority, msg, "priority");
        uint(&mut self.retention, msg, "retention");
        text(&mut self.config_name, msg, "configName");
        text(&mut self.owner, msg, "owner");
        text(&mut self.creator, msg, "creator");
    }
}

/// Applies the `hello` reply.
pub fn apply_hello(status: &mut ServerStatus, msg: &HtspMessage) {
    uint(&mut status.htsp_version, msg, "htspversion");
    text(&mut status.server_name, msg, "servername");
    text(&mut status.server_version, msg, "serverversion");
    text(&mut status.webroot, msg, "webroot");
}

/// Applies a `serverStatus` push.
pub fn apply_server_status(status: &mut ServerStatus, msg: &HtspMessage) {
    apply_hello(status, msg);
    int(&mut status.free_disk_space, msg, "freediskspace");
    int(&mut status.total_disk_space, msg, "totaldiskspace");
}

/// Applies a `getDiskSpace` reply. Missing values read as zero.
pub fn apply_disk_space(status: &mut ServerStatus, msg: &HtspMessage) {
    status.free_disk_space = msg.i64("freediskspace").unwrap_or(0);
    status.total_disk_space = msg.i64("totaldiskspace").unwrap_or(0);
}

/// Applies a `getSysTime` reply.
///
/// The server reports its GMT offset in minutes including daylight saving;
/// the stored offset is in milliseconds with the local DST offset removed.
pub fn apply_system_time(status: &mut ServerStatus, msg: &HtspMessage, dst_offset_ms: i64) {
    let server_offset_ms = msg.i64("gmtoffset").unwrap_or(0) * 60 * 1000;
    status.gmt_offset = server_offset_ms - dst_offset_ms;
    status.time = msg.i64("time").unwrap_or(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tvhsync_protocol::{ProtocolError, Value};

    fn channel_add() -> HtspMessage {
        HtspMessage::request("channelAdd")
            .with("channelId", 101u32)
            .with("channelName", "One")
            .with("channelNumber", 5i64)
            .with("channelNumberMinor", 1i64)
            .with("channelIcon", "imagecache/12")
            .with("eventId", 900u32)
            .with("nextEventId", 901u32)
    }

    #[test]
    fn channel_from_add() {
        let channel: Channel = merge(&channel_add(), None, false).unwrap().unwrap();
        assert_eq!(channel.id, 101);
        assert_eq!(channel.name.as_deref(), Some("One"));
        assert_eq!(channel.number.as_deref(), Some("5.1"));
        assert_eq!(channel.icon(), Some("imagecache/12"));
        assert_eq!((channel.event_id, channel.next_event_id), (900, 901));
    }

    #[test]
    fn partial_update_preserves_absent_fields() {
        let channel: Channel = merge(&channel_add(), None, false).unwrap().unwrap();
        let update = HtspMessage::request("channelUpdate")
            .with("channelId", 101u32)
            .with("eventId", 901u32);
        let updated = merge(&update, Some(channel.clone()), true).unwrap().unwrap();

        assert_eq!(updated.event_id, 901);
        assert_eq!(updated.name, channel.name);
        assert_eq!(updated.number, channel.number);
        assert_eq!(updated.icon, channel.icon);
    }

    #[test]
    fn update_for_unknown_record_is_skipped() {
        let update = HtspMessage::request("channelUpdate").with("channelId", 7u32);
        assert_eq!(merge::<Channel>(&update, None, true).unwrap(), None);
    }

    #[test]
    fn missing_id_is_an_error() {
        let msg = HtspMessage::request("tagAdd").with("tagName", "News");
        assert_eq!(
            merge::<ChannelTag>(&msg, None, false),
            Err(ProtocolError::MissingField("tagId"))
        );
    }

    #[test]
    fn tag_members_are_replaced_and_selection_kept() {
        let mut tag = ChannelTag::empty(3);
        tag.is_selected = true;
        tag.members = [1, 2, 3].into_iter().collect();

        let msg = HtspMessage::request("tagUpdate")
            .with("tagId", 3u32)
            .with("members", vec![Value::from(2u32), Value::from(4u32)]);
        let tag = merge(&msg, Some(tag), true).unwrap().unwrap();

        assert!(tag.is_selected);
        assert_eq!(tag.members.into_iter().collect::<Vec<_>>(), vec![2, 4]);
    }

    #[test]
    fn number_parts_merge_independently() {
        let channel: Channel = merge(&channel_add(), None, false).unwrap().unwrap();

        let major = HtspMessage::request("channelUpdate")
            .with("channelId", 101u32)
            .with("channelNumber", 6i64);
        let channel = merge(&major, Some(channel), true).unwrap().unwrap();
        assert_eq!(channel.number.as_deref(), Some("6.1"));

        let minor = HtspMessage::request("channelUpdate")
            .with("channelId", 101u32)
            .with("channelNumberMinor", 2i64);
        let channel = merge(&minor, Some(channel), true).unwrap().unwrap();
        assert_eq!(channel.number.as_deref(), Some("6.2"));
        assert_eq!((channel.number_major, channel.number_minor), (Some(6), Some(2)));
    }

    #[test]
    fn minor_without_major_keeps_number_unset() {
        let msg = HtspMessage::request("channelAdd")
            .with("channelId", 4u32)
            .with("channelNumberMinor", 3i64);
        let channel: Channel = merge(&msg, None, false).unwrap().unwrap();
        assert_eq!(channel.number, None);
        assert_eq!(channel.number_minor, Some(3));
    }

    #[test]
    fn number_without_minor() {
        assert_eq!(display_number(5, None), "5");
        assert_eq!(display_number(5, Some(0)), "5");
        assert_eq!(display_number(12, Some(3)), "12.3");
    }

    #[test]
    fn recording_fields() {
        let msg = HtspMessage::request("dvrEntryAdd")
            .with("id", 40u32)
            .with("channel", 101u32)
            .with("state", "scheduled")
            .with("autorecId", "rule-1")
            .with("dataErrors", 3i64)
            .with("enabled", 0i64);
        let rec: Recording = merge(&msg, None, false).unwrap().unwrap();
        assert_eq!(rec.channel_id, 101);
        assert!(rec.is_scheduled());
        assert_eq!(rec.autorec_id.as_deref(), Some("rule-1"));
        assert_eq!(rec.data_errors.as_deref(), Some("3"));
        assert!(!rec.enabled);
    }

    #[test]
    fn rule_ids_are_strings() {
        let msg = HtspMessage::request("autorecEntryAdd")
            .with("id", "abc")
            .with("title", "News")
            .with("daysOfWeek", 127u32);
        let rule: SeriesRecordingRule = merge(&msg, None, false).unwrap().unwrap();
        assert_eq!(rule.id, "abc");
        assert!(rule.enabled);
        assert_eq!(rule.days_of_week, 127);
    }

    #[test]
    fn program_series_link_prefers_uri() {
        let msg = HtspMessage::request("eventAdd")
            .with("eventId", 1u32)
            .with("serieslinkId", 77i64)
            .with("serieslinkUri", "crid://x/1");
        let program: Program = merge(&msg, None, false).unwrap().unwrap();
        assert_eq!(program.series_link.as_deref(), Some("crid://x/1"));
    }

    #[test]
    fn system_time_removes_dst() {
        let mut status = ServerStatus::default();
        let msg = HtspMessage::new()
            .with("time", 1_700_000_000i64)
            .with("gmtoffset", 120i64);
        apply_system_time(&mut status, &msg, 3_600_000);
        assert_eq!(status.gmt_offset, 3_600_000);
        assert_eq!(status.time, 1_700_000_000);
    }

    #[test]
    fn disk_space_defaults_to_zero() {
        let mut status = ServerStatus {
            free_disk_space: 5,
            ..ServerStatus::default()
        };
        apply_disk_space(&mut status, &HtspMessage::new().with("totaldiskspace", 10i64));
        assert_eq!((status.free_disk_space, status.total_disk_space), (0, 10));
    }

    fn channel_update() -> impl Strategy<Value = HtspMessage> {
        (
            proptest::option::of("[a-z]{1,8}"),
            proptest::option::of(1i64..999),
            proptest::option::of(0i64..9),
            proptest::option::of("[a-z/]{1,12}"),
            proptest::option::of(any::<u32>()),
            proptest::option::of(any::<u32>()),
        )
            .prop_map(|(name, number, minor, icon, event, next)| {
                HtspMessage::request("channelUpdate")
                    .with("channelId", 9u32)
                    .with_opt("channelName", name)
                    .with_opt("channelNumber", number)
                    .with_opt("channelNumberMinor", minor)
                    .with_opt("channelIcon", icon)
                    .with_opt("eventId", event)
                    .with_opt("nextEventId", next)
            })
    }

    proptest! {
        #[test]
        fn absent_fields_are_never_overwritten(base in channel_update(), update in channel_update()) {
            let before: Channel = merge(&base, None, false).unwrap().unwrap();
            let after = merge(&update, Some(before.clone()), true).unwrap().unwrap();

            if !update.contains("channelName") { prop_assert_eq!(&after.name, &before.name); }
            if !update.contains("channelNumber") { prop_assert_eq!(after.number_major, before.number_major); }
            if !update.contains("channelNumberMinor") { prop_assert_eq!(after.number_minor, before.number_minor); }
            if !update.contains("channelNumber") && !update.contains("channelNumberMinor") {
                prop_assert_eq!(&after.number, &before.number);
            }
            if !update.contains("channelIcon") { prop_assert_eq!(&after.icon, &before.icon); }
            if !update.contains("eventId") { prop_assert_eq!(after.event_id, before.event_id); }
            if !update.contains("nextEventId") { prop_assert_eq!(after.next_event_id, before.next_event_id); }
        }

        #[test]
        fn add_then_update_equals_combined_add(base in channel_update(), update in channel_update()) {
            let added: Channel = merge(&base, None, false).unwrap().unwrap();
            let updated = merge(&update, Some(added), true).unwrap().unwrap();

            let mut combined = base.clone();
            for (key, value) in update.iter() {
                combined.set(key, value.clone());
            }
            let direct: Channel = merge(&combined, None, false).unwrap().unwrap();
            prop_assert_eq!(updated, direct);
        }
    }
}
