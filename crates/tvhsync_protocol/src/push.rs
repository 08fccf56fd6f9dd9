//! Unsolicited server messages.

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::HtspMessage;

/// A message pushed by the server, classified by its `method`.
///
/// Add and update variants keep the full message so the reconciler can
/// apply whichever fields are present. Delete variants carry only the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Push {
    /// A channel tag was added.
    TagAdd(HtspMessage),
    /// A channel tag changed.
    TagUpdate(HtspMessage),
    /// A channel tag was removed.
    TagDelete(u32),
    /// A channel was added.
    ChannelAdd(HtspMessage),
    /// A channel changed.
    ChannelUpdate(HtspMessage),
    /// A channel was removed.
    ChannelDelete(u32),
    /// A recording was added.
    DvrEntryAdd(HtspMessage),
    /// A recording changed.
    DvrEntryUpdate(HtspMessage),
    /// A recording was removed.
    DvrEntryDelete(u32),
    /// A series recording rule was added.
    AutorecEntryAdd(HtspMessage),
    /// A series recording rule changed.
    AutorecEntryUpdate(HtspMessage),
    /// A series recording rule was removed.
    AutorecEntryDelete(String),
    /// A timer recording rule was added.
    TimerecEntryAdd(HtspMessage),
    /// A timer recording rule changed.
    TimerecEntryUpdate(HtspMessage),
    /// A timer recording rule was removed.
    TimerecEntryDelete(String),
    /// An EPG event was added.
    EventAdd(HtspMessage),
    /// An EPG event changed.
    EventUpdate(HtspMessage),
    /// An EPG event was removed.
    EventDelete(u32),
    /// The server finished streaming the initial state.
    InitialSyncCompleted,
    /// Server load and subscription status.
    ServerStatus(HtspMessage),
    /// Server clock and timezone.
    SystemTime(HtspMessage),
    /// Recording storage usage.
    DiskSpace(HtspMessage),
    /// Streaming profiles.
    Profiles(HtspMessage),
    /// Recording profiles.
    DvrConfigs(HtspMessage),
    /// A batch of EPG events.
    Events(HtspMessage),
}

impl Push {
    /// Classifies a message by its `method` field.
    ///
    /// Returns `Ok(None)` for methods this client does not handle, and an
    /// error if the method is missing or a delete carries no usable id.
    pub fn from_message(msg: HtspMessage) -> ProtocolResult<Option<Push>> {
        let method = msg.method().ok_or(ProtocolError::NoMethod)?.to_string();
        let push = match method.as_str() {
            "tagAdd" => Push::TagAdd(msg),
            "tagUpdate" => Push::TagUpdate(msg),
            "tagDelete" => Push::TagDelete(msg.require_u32("tagId")?),
            "channelAdd" => Push::ChannelAdd(msg),
            "channelUpdate" => Push::ChannelUpdate(msg),
            "channelDelete" => Push::ChannelDelete(msg.require_u32("channelId")?),
            "dvrEntryAdd" => Push::DvrEntryAdd(msg),
            "dvrEntryUpdate" => Push::DvrEntryUpdate(msg),
            "dvrEntryDelete" => Push::DvrEntryDelete(msg.require_u32("id")?),
            "autorecEntryAdd" => Push::AutorecEntryAdd(msg),
            "autorecEntryUpdate" => Push::AutorecEntryUpdate(msg),
            "autorecEntryDelete" => Push::AutorecEntryDelete(msg.require_str("id")?.to_string()),
            "timerecEntryAdd" => Push::TimerecEntryAdd(msg),
            "timerecEntryUpdate" => Push::TimerecEntryUpdate(msg),
            "timerecEntryDelete" => Push::TimerecEntryDelete(msg.require_str("id")?.to_string()),
            "eventAdd" => Push::EventAdd(msg),
            "eventUpdate" => Push::EventUpdate(msg),
            "eventDelete" => {
                let id = if msg.contains("eventId") {
                    msg.require_u32("eventId")?
                } else {
                    msg.require_u32("id")?
                };
                Push::EventDelete(id)
            }
            "initialSyncCompleted" => Push::InitialSyncCompleted,
            "serverStatus" => Push::ServerStatus(msg),
            "getSysTime" => Push::SystemTime(msg),
            "getDiskSpace" => Push::DiskSpace(msg),
            "getProfiles" => Push::Profiles(msg),
            "getDvrConfigs" => Push::DvrConfigs(msg),
            "getEvents" => Push::Events(msg),
            _ => return Ok(None),
        };
        Ok(Some(push))
    }

    /// The method name this push was parsed from.
    pub fn method(&self) -> &'static str {
        match self {
            Push::TagAdd(_) => "tagAdd",
            Push::TagUpdate(_) => "tagUpdate",
            Push::TagDelete(_) => "tagDelete",
            Push::ChannelAdd(_) => "channelAdd",
            Push::ChannelUpdate(_) => "channelUpdate",
            Push::ChannelDelete(_) => "channelDelete",
            Push::DvrEntryAdd(_) => "dvrEntryAdd",
            Push::DvrEntryUpdate(_) => "dvrEntryUpdate",
            Push::DvrEntryDelete(_) => "dvrEntryDelete",
            Push::AutorecEntryAdd(_) => "autorecEntryAdd",
            Push::AutorecEntryUpdate(_) => "autorecEntryUpdate",
            Push::AutorecEntryDelete(_) => "autorecEntryDelete",
            Push::TimerecEntryAdd(_) => "timerecEntryAdd",
            Push::TimerecEntryUpdate(_) => "timerecEntryUpdate",
            Push::TimerecEntryDelete(_) => "timerecEntryDelete",
            Push::EventAdd(_) => "eventAdd",
            Push::EventUpdate(_) => "eventUpdate",
            Push::EventDelete(_) => "eventDelete",
            Push::InitialSyncCompleted => "initialSyncCompleted",
            Push::ServerStatus(_) => "serverStatus",
            Push::SystemTime(_) => "getSysTime",
            Push::DiskSpace(_) => "getDiskSpace",
            Push::Profiles(_) => "getProfiles",
            Push::DvrConfigs(_) => "getDvrConfigs",
            Push::Events(_) => "getEvents",
        }
    }
}
