//! Request builders.
//!
//! Each function returns a message with `method` set and every supplied
//! field attached. Sequence numbers are assigned by the dispatcher.

use crate::message::HtspMessage;
use crate::params::{
    AutorecParams, DvrEntryParams, EpgQuery, EpgWindow, EventQuery, RemoveKind, TicketTarget,
    TimerecParams,
};
use sha1::{Digest, Sha1};

/// `hello`: opens the handshake and asks for a protocol version.
pub fn hello(client_name: &str, client_version: &str, htsp_version: u32) -> HtspMessage {
    HtspMessage::request("hello")
        .with("htspversion", htsp_version)
        .with("clientname", client_name)
        .with("clientversion", client_version)
}

/// `authenticate`: proves knowledge of the password for `username`.
pub fn authenticate(username: &str, digest: Vec<u8>) -> HtspMessage {
    HtspMessage::request("authenticate")
        .with("username", username)
        .with("digest", digest)
}

/// Computes `SHA1(password ‖ challenge)`.
pub fn authentication_digest(password: &str, challenge: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    hasher.update(challenge);
    hasher.finalize().to_vec()
}

/// `enableAsyncMetadata`: starts the push stream.
///
/// EPG fields are attached only when a window is given.
pub fn enable_async_metadata(epg: Option<EpgWindow>) -> HtspMessage {
    let msg = HtspMessage::request("enableAsyncMetadata");
    match epg {
        Some(window) => msg
            .with("epg", 1i64)
            .with("epgMaxTime", window.max_time)
            .with("lastUpdate", window.last_update),
        None => msg,
    }
}

/// `getDiskSpace`.
pub fn get_disk_space() -> HtspMessage {
    HtspMessage::request("getDiskSpace")
}

/// `getSysTime`.
pub fn get_sys_time() -> HtspMessage {
    HtspMessage::request("getSysTime")
}

/// `getChannel`.
pub fn get_channel(channel_id: u32) -> HtspMessage {
    HtspMessage::request("getChannel").with("channelId", channel_id)
}

/// `getEvent`.
pub fn get_event(event_id: u32) -> HtspMessage {
    HtspMessage::request("getEvent").with("eventId", event_id)
}

/// `getEvents`.
pub fn get_events(query: &EventQuery) -> HtspMessage {
    query.apply(HtspMessage::request("getEvents"))
}

/// `epgQuery`.
pub fn epg_query(query: &EpgQuery) -> HtspMessage {
    query.apply(HtspMessage::request("epgQuery"))
}

/// `addDvrEntry`.
pub fn add_dvr_entry(params: &DvrEntryParams) -> HtspMessage {
    params.apply(HtspMessage::request("addDvrEntry"))
}

/// `updateDvrEntry`.
pub fn update_dvr_entry(id: u32, params: &DvrEntryParams) -> HtspMessage {
    params.apply(HtspMessage::request("updateDvrEntry").with("id", id))
}

/// `cancelDvrEntry`, `stopDvrEntry` or `deleteDvrEntry`.
pub fn remove_dvr_entry(id: u32, kind: RemoveKind) -> HtspMessage {
    HtspMessage::request(kind.method()).with("id", id)
}

/// `addAutorecEntry`.
pub fn add_autorec_entry(params: &AutorecParams) -> HtspMessage {
    params.apply(HtspMessage::request("addAutorecEntry"))
}

/// `updateAutorecEntry`. Servers below protocol version 25 lack it.
pub fn update_autorec_entry(id: &str, params: &AutorecParams) -> HtspMessage {
    params.apply(HtspMessage::request("updateAutorecEntry").with("id", id))
}

/// `deleteAutorecEntry`.
pub fn delete_autorec_entry(id: &str) -> HtspMessage {
    HtspMessage::request("deleteAutorecEntry").with("id", id)
}

/// `addTimerecEntry`.
pub fn add_timerec_entry(params: &TimerecParams) -> HtspMessage {
    params.apply(HtspMessage::request("addTimerecEntry"))
}

/// `updateTimerecEntry`. Servers below protocol version 25 lack it.
pub fn update_timerec_entry(id: &str, params: &TimerecParams) -> HtspMessage {
    params.apply(HtspMessage::request("updateTimerecEntry").with("id", id))
}

/// `deleteTimerecEntry`.
pub fn delete_timerec_entry(id: &str) -> HtspMessage {
    HtspMessage::request("deleteTimerecEntry").with("id", id)
}

/// `getTicket` for a live channel or a recording.
pub fn get_ticket(target: TicketTarget) -> HtspMessage {
    let msg = HtspMessage::request("getTicket");
    match target {
        TicketTarget::Channel(id) => msg.with("channelId", id),
        TicketTarget::Recording(id) => msg.with("dvrId", id),
    }
}

/// `getProfiles`.
pub fn get_profiles() -> HtspMessage {
    HtspMessage::request("getProfiles")
}

/// `getDvrConfigs`.
pub fn get_dvr_configs() -> HtspMessage {
    HtspMessage::request("getDvrConfigs")
}

/// `api`: a call into the server's web API, answered with JSON text.
pub fn api(path: &str) -> HtspMessage {
    HtspMessage::request("api").with("path", path)
}

/// `fileOpen`.
pub fn file_open(path: &str) -> HtspMessage {
    HtspMessage::request("fileOpen").with("file", path)
}

/// `fileRead`.
pub fn file_read(id: u32, size: i64) -> HtspMessage {
    HtspMessage::request("fileRead").with("id", id).with("size", size)
}

/// `fileClose`.
pub fn file_close(id: u32) -> HtspMessage {
    HtspMessage::request("fileClose").with("id", id)
}
