//! An in-process HTSP server over [`MockTransport`].
//!
//! The backend answers every request the engine sends from a shared
//! [`Catalog`], and mirrors each change it makes as a push, the way a real
//! server confirms commands through the async metadata stream.

use crate::catalog::Catalog;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tvhsync_engine::MockTransport;
use tvhsync_protocol::{requests, HtspMessage, Value, MIN_RULE_UPDATE_VERSION};

/// Challenge bytes sent in every `hello` reply.
pub const CHALLENGE: [u8; 32] = [0x5a; 32];

/// Fields that identify a request rather than describe a record.
const ENVELOPE: &[&str] = &["method", "seq", "id"];

struct ServerState {
    catalog: Catalog,
    open_files: BTreeMap<u32, (Vec<u8>, usize)>,
}

/// A loopback server driving a [`MockTransport`].
pub struct LoopbackBackend {
    state: Arc<Mutex<ServerState>>,
    transport: Arc<MockTransport>,
}

impl LoopbackBackend {
    /// Starts serving `catalog`.
    pub fn new(catalog: Catalog) -> Self {
        let state = Arc::new(Mutex::new(ServerState {
            catalog,
            open_files: BTreeMap::new(),
        }));
        let shared = state.clone();
        let transport = Arc::new(MockTransport::new(move |msg| {
            respond(&mut shared.lock(), msg)
        }));
        Self { state, transport }
    }

    /// The transport to hand to the engine.
    pub fn transport(&self) -> Arc<MockTransport> {
        self.transport.clone()
    }

    /// Sends an unsolicited message on the open link.
    pub fn push(&self, msg: HtspMessage) -> bool {
        self.transport.inject(msg)
    }

    /// A copy of the current catalog.
    pub fn catalog(&self) -> Catalog {
        self.state.lock().catalog.clone()
    }

    /// Changes the catalog in place.
    pub fn update<R>(&self, change: impl FnOnce(&mut Catalog) -> R) -> R {
        change(&mut self.state.lock().catalog)
    }

    /// Methods of every request received so far.
    pub fn received(&self) -> Vec<String> {
        self.transport.sent_methods()
    }

    /// Every request received so far with this method.
    pub fn requests(&self, method: &str) -> Vec<HtspMessage> {
        self.transport
            .sent()
            .into_iter()
            .filter(|m| m.method() == Some(method))
            .collect()
    }
}

fn reply(request: &HtspMessage, mut body: HtspMessage) -> HtspMessage {
    if let Some(seq) = request.seq() {
        body.set_seq(seq);
    }
    body
}

fn success() -> HtspMessage {
    HtspMessage::new().with("success", true)
}

fn rejected(error: &str) -> HtspMessage {
    HtspMessage::new()
        .with("success", false)
        .with("error", error)
}

fn pushed(method: &str, record: &HtspMessage) -> HtspMessage {
    record.clone().with("method", method)
}

fn find<'a>(records: &'a [HtspMessage], key: &str, id: u32) -> Option<&'a HtspMessage> {
    records.iter().find(|r| r.u32(key) == Some(id))
}

fn position(records: &[HtspMessage], id: &Value) -> Option<usize> {
    records.iter().position(|r| r.get("id") == Some(id))
}

/// Copies the record fields of a request. Requests name the channel
/// `channelId`, records name it `channel`.
fn copy_fields(target: &mut HtspMessage, request: &HtspMessage) {
    for (key, value) in request.iter() {
        if ENVELOPE.contains(&key) {
            continue;
        }
        let key = if key == "channelId" { "channel" } else { key };
        target.set(key, value.clone());
    }
}

fn list(records: Vec<HtspMessage>) -> Value {
    Value::from(records.into_iter().map(Value::from).collect::<Vec<_>>())
}

fn respond(state: &mut ServerState, msg: &HtspMessage) -> Vec<HtspMessage> {
    let Some(method) = msg.method() else {
        return Vec::new();
    };
    if let Some(error) = state.catalog.rejections.get(method) {
        return vec![reply(msg, rejected(error))];
    }
    let catalog = &mut state.catalog;
    match method {
        "hello" => vec![reply(
            msg,
            HtspMessage::new()
                .with("htspversion", catalog.htsp_version)
                .with("servername", catalog.server_name.as_str())
                .with("serverversion", catalog.server_version.as_str())
                .with("challenge", CHALLENGE.to_vec()),
        )],
        "authenticate" => vec![reply(msg, authenticate(catalog, msg))],
        "enableAsyncMetadata" => initial_sync(catalog, msg),
        "getDiskSpace" => vec![reply(
            msg,
            HtspMessage::new()
                .with("freediskspace", catalog.free_disk_space)
                .with("totaldiskspace", catalog.total_disk_space),
        )],
        "getSysTime" => vec![reply(
            msg,
            HtspMessage::new()
                .with("time", catalog.time)
                .with("gmtoffset", catalog.gmt_offset),
        )],
        "getProfiles" => vec![reply(
            msg,
            HtspMessage::new().with("profiles", list(catalog.profiles.clone())),
        )],
        "getDvrConfigs" => vec![reply(
            msg,
            HtspMessage::new().with("dvrconfigs", list(catalog.dvr_configs.clone())),
        )],
        "api" => {
            let body = match (msg.str("path"), &catalog.http_profiles) {
                (Some("profile/list"), Some(json)) => {
                    HtspMessage::new().with("response", json.as_str())
                }
                _ => rejected("Unknown API path"),
            };
            vec![reply(msg, body)]
        }
        "getChannel" => {
            let body = msg
                .u32("channelId")
                .and_then(|id| find(&catalog.channels, "channelId", id))
                .cloned()
                .unwrap_or_else(|| rejected("Channel does not exist"));
            vec![reply(msg, body)]
        }
        "getEvent" => {
            let body = msg
                .u32("eventId")
                .and_then(|id| find(&catalog.events, "eventId", id))
                .cloned()
                .unwrap_or_else(|| rejected("Event does not exist"));
            vec![reply(msg, body)]
        }
        "getEvents" => vec![reply(msg, events(catalog, msg))],
        "epgQuery" => vec![reply(msg, epg_query(catalog, msg))],
        "addDvrEntry" => add_dvr_entry(catalog, msg),
        "updateDvrEntry" => update_record(&mut catalog.recordings, msg, "dvrEntryUpdate"),
        "stopDvrEntry" => {
            let stop = msg.clone().with("state", "completed");
            update_record(&mut catalog.recordings, &stop, "dvrEntryUpdate")
        }
        "cancelDvrEntry" | "deleteDvrEntry" => {
            delete_record(&mut catalog.recordings, msg, "dvrEntryDelete")
        }
        "addAutorecEntry" => add_rule(catalog, msg, "auto", "autorecEntryAdd"),
        "addTimerecEntry" => add_rule(catalog, msg, "time", "timerecEntryAdd"),
        "updateAutorecEntry" if catalog.htsp_version >= MIN_RULE_UPDATE_VERSION => {
            update_record(&mut catalog.autorecs, msg, "autorecEntryUpdate")
        }
        "updateTimerecEntry" if catalog.htsp_version >= MIN_RULE_UPDATE_VERSION => {
            update_record(&mut catalog.timerecs, msg, "timerecEntryUpdate")
        }
        "deleteAutorecEntry" => delete_record(&mut catalog.autorecs, msg, "autorecEntryDelete"),
        "deleteTimerecEntry" => delete_record(&mut catalog.timerecs, msg, "timerecEntryDelete"),
        "getTicket" => {
            let path = match (msg.u32("channelId"), msg.u32("dvrId")) {
                (Some(channel), _) => format!("/stream/channelid/{channel}"),
                (None, Some(dvr)) => format!("/dvrfile/{dvr}"),
                (None, None) => return vec![reply(msg, rejected("Invalid arguments"))],
            };
            let ticket = format!("ticket-{}", catalog.allocate_id());
            vec![reply(
                msg,
                HtspMessage::new()
                    .with("path", path)
                    .with("ticket", ticket),
            )]
        }
        "fileOpen" => {
            let body = match msg.str("file").and_then(|path| lookup_file(catalog, path)) {
                Some(bytes) => {
                    let id = catalog.allocate_id();
                    let size = bytes.len() as i64;
                    state.open_files.insert(id, (bytes, 0));
                    HtspMessage::new().with("id", id).with("size", size)
                }
                None => rejected("File not found"),
            };
            vec![reply(msg, body)]
        }
        "fileRead" => {
            let id = msg.u32("id").unwrap_or_default();
            let size = usize::try_from(msg.i64("size").unwrap_or(0)).unwrap_or(0);
            let body = match state.open_files.get_mut(&id) {
                Some((bytes, offset)) => {
                    let end = (*offset + size).min(bytes.len());
                    let chunk = bytes[*offset..end].to_vec();
                    *offset = end;
                    HtspMessage::new().with("data", chunk)
                }
                None => rejected("Unknown file id"),
            };
            vec![reply(msg, body)]
        }
        "fileClose" => {
            let id = msg.u32("id").unwrap_or_default();
            state.open_files.remove(&id);
            vec![reply(msg, HtspMessage::new())]
        }
        _ => vec![reply(msg, rejected("Method not found"))],
    }
}

fn authenticate(catalog: &Catalog, msg: &HtspMessage) -> HtspMessage {
    let (Some(username), Some(password)) = (&catalog.username, &catalog.password) else {
        return HtspMessage::new();
    };
    let expected = requests::authentication_digest(password, &CHALLENGE);
    if msg.str("username") == Some(username.as_str()) && msg.bytes("digest") == Some(expected) {
        HtspMessage::new()
    } else {
        HtspMessage::new().with("noaccess", true)
    }
}

fn initial_sync(catalog: &Catalog, msg: &HtspMessage) -> Vec<HtspMessage> {
    let mut out = vec![reply(msg, HtspMessage::new())];
    out.extend(catalog.tags.iter().map(|t| pushed("tagAdd", t)));
    out.extend(catalog.channels.iter().map(|c| pushed("channelAdd", c)));
    out.extend(catalog.recordings.iter().map(|r| pushed("dvrEntryAdd", r)));
    out.extend(catalog.autorecs.iter().map(|r| pushed("autorecEntryAdd", r)));
    out.extend(catalog.timerecs.iter().map(|r| pushed("timerecEntryAdd", r)));
    if msg.i64("epg") == Some(1) {
        let max_time = msg.i64("epgMaxTime").unwrap_or(i64::MAX);
        out.extend(
            catalog
                .events
                .iter()
                .filter(|e| e.i64("start").unwrap_or(0) <= max_time)
                .map(|e| pushed("eventAdd", e)),
        );
    }
    out.push(HtspMessage::request("initialSyncCompleted"));
    out
}

/// Answers `getEvents`: the chain starting at `eventId`, or every event of
/// a channel.
fn events(catalog: &Catalog, msg: &HtspMessage) -> HtspMessage {
    let mut found = Vec::new();
    if let Some(start) = msg.u32("eventId") {
        let limit = msg.u32("numFollowing").unwrap_or(1) as usize;
        let mut seen = BTreeSet::new();
        let mut next = start;
        while next != 0 && found.len() < limit && seen.insert(next) {
            let Some(event) = find(&catalog.events, "eventId", next) else {
                break;
            };
            found.push(event.clone());
            next = event.u32("nextEventId").unwrap_or(0);
        }
    } else {
        let channel = msg.u32("channelId");
        found.extend(
            catalog
                .events
                .iter()
                .filter(|e| channel.is_none() || e.u32("channelId") == channel)
                .cloned(),
        );
    }
    if let Some(max_time) = msg.i64("maxTime") {
        found.retain(|e| e.i64("start").unwrap_or(0) <= max_time);
    }
    HtspMessage::new().with("events", list(found))
}

fn epg_query(catalog: &Catalog, msg: &HtspMessage) -> HtspMessage {
    let needle = msg.str("query").unwrap_or_default().to_lowercase();
    let channel = msg.u32("channelId");
    let matches: Vec<HtspMessage> = catalog
        .events
        .iter()
        .filter(|e| channel.is_none() || e.u32("channelId") == channel)
        .filter(|e| {
            e.str("title")
                .is_some_and(|title| title.to_lowercase().contains(&needle))
        })
        .cloned()
        .collect();
    if msg.flag("full") == Some(true) {
        HtspMessage::new().with("events", list(matches))
    } else {
        let ids: Vec<Value> = matches
            .iter()
            .filter_map(|e| e.u32("eventId"))
            .map(Value::from)
            .collect();
        HtspMessage::new().with("eventIds", ids)
    }
}

fn add_dvr_entry(catalog: &mut Catalog, msg: &HtspMessage) -> Vec<HtspMessage> {
    let id = catalog.allocate_id();
    let mut record = HtspMessage::new()
        .with("id", id)
        .with("state", "scheduled")
        .with("enabled", true);
    if let Some(event) = msg
        .u32("eventId")
        .and_then(|event| find(&catalog.events, "eventId", event))
    {
        for key in ["start", "stop", "title", "subtitle", "description"] {
            if let Some(value) = event.get(key) {
                record.set(key, value.clone());
            }
        }
        if let Some(channel) = event.u32("channelId") {
            record.set("channel", channel);
        }
    }
    copy_fields(&mut record, msg);
    catalog.recordings.push(record.clone());
    vec![
        reply(msg, success().with("id", id)),
        pushed("dvrEntryAdd", &record),
    ]
}

fn add_rule(catalog: &mut Catalog, msg: &HtspMessage, prefix: &str, push: &str) -> Vec<HtspMessage> {
    let id = format!("{prefix}-{}", catalog.allocate_id());
    let mut record = HtspMessage::new().with("id", id.as_str()).with("enabled", true);
    copy_fields(&mut record, msg);
    if prefix == "auto" {
        catalog.autorecs.push(record.clone());
    } else {
        catalog.timerecs.push(record.clone());
    }
    vec![
        reply(msg, success().with("id", id)),
        pushed(push, &record),
    ]
}

fn update_record(records: &mut [HtspMessage], msg: &HtspMessage, push: &str) -> Vec<HtspMessage> {
    let Some(index) = msg.get("id").and_then(|id| position(records, id)) else {
        return vec![reply(msg, rejected("Entry not found"))];
    };
    let record = &mut records[index];
    copy_fields(record, msg);
    let update = pushed(push, record);
    vec![reply(msg, success()), update]
}

fn delete_record(records: &mut Vec<HtspMessage>, msg: &HtspMessage, push: &str) -> Vec<HtspMessage> {
    let Some(id) = msg.get("id").cloned() else {
        return vec![reply(msg, rejected("Invalid arguments"))];
    };
    let Some(index) = position(records, &id) else {
        return vec![reply(msg, rejected("Entry not found"))];
    };
    records.remove(index);
    let mut delete = HtspMessage::request(push);
    delete.set("id", id);
    vec![reply(msg, success()), delete]
}

fn lookup_file(catalog: &Catalog, path: &str) -> Option<Vec<u8>> {
    catalog
        .files
        .get(path)
        .or_else(|| catalog.files.get(path.trim_start_matches('/')))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{channel, event, tag};
    use std::time::Duration;
    use tvhsync_engine::{Link, Transport};
    use tvhsync_store::ConnectionSettings;

    fn open(backend: &LoopbackBackend) -> Arc<dyn Link> {
        match backend.transport().open(&ConnectionSettings::default()) {
            Ok(link) => link,
            Err(err) => panic!("open failed: {err}"),
        }
    }

    fn call(link: &Arc<dyn Link>, msg: HtspMessage) -> Vec<HtspMessage> {
        link.send(&msg).unwrap();
        let mut out = Vec::new();
        while let Some(msg) = link.recv(Duration::from_millis(20)).unwrap() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn replies_carry_the_request_seq() {
        let backend = LoopbackBackend::new(Catalog::new());
        let link = open(&backend);
        let mut hello = requests::hello("test", "1", 34);
        hello.set_seq(7);
        let replies = call(&link, hello);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].seq(), Some(7));
        assert_eq!(replies[0].bytes("challenge"), Some(CHALLENGE.to_vec()));
    }

    #[test]
    fn wrong_password_gets_noaccess() {
        let backend = LoopbackBackend::new(Catalog::new().with_credentials("admin", "secret"));
        let link = open(&backend);
        let good = requests::authenticate(
            "admin",
            requests::authentication_digest("secret", &CHALLENGE),
        );
        let bad = requests::authenticate(
            "admin",
            requests::authentication_digest("guess", &CHALLENGE),
        );
        assert_eq!(call(&link, good)[0].flag("noaccess"), None);
        assert_eq!(call(&link, bad)[0].flag("noaccess"), Some(true));
    }

    #[test]
    fn initial_sync_streams_in_order() {
        let catalog = Catalog::new()
            .with_tag(tag(1, "News", &[101]))
            .with_channel(channel(101, "One", 1))
            .with_events(vec![event(900, 101, 100, 200, "Early", 0)]);
        let backend = LoopbackBackend::new(catalog);
        let link = open(&backend);

        let without_epg = call(&link, requests::enable_async_metadata(None));
        let methods: Vec<_> = without_epg.iter().map(|m| m.method()).collect();
        assert_eq!(
            methods,
            vec![None, Some("tagAdd"), Some("channelAdd"), Some("initialSyncCompleted")]
        );

        let window = tvhsync_protocol::EpgWindow {
            max_time: 150,
            last_update: 0,
        };
        let with_epg = call(&link, requests::enable_async_metadata(Some(window)));
        assert!(with_epg.iter().any(|m| m.method() == Some("eventAdd")));
    }

    #[test]
    fn event_chain_follows_next_ids() {
        let catalog = Catalog::new().with_events(vec![
            event(1, 5, 0, 10, "a", 2),
            event(2, 5, 10, 20, "b", 3),
            event(3, 5, 20, 30, "c", 0),
        ]);
        let backend = LoopbackBackend::new(catalog);
        let link = open(&backend);
        let query = tvhsync_protocol::EventQuery::following(5, 2, 10);
        let replies = call(&link, requests::get_events(&query));
        let ids: Vec<_> = replies[0]
            .messages("events")
            .iter()
            .filter_map(|e| e.u32("eventId"))
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn created_rules_are_pushed() {
        let backend = LoopbackBackend::new(Catalog::new());
        let link = open(&backend);
        let params = tvhsync_protocol::AutorecParams {
            title: Some("News".to_string()),
            channel_id: Some(101),
            ..Default::default()
        };
        let replies = call(&link, requests::add_autorec_entry(&params));
        assert_eq!(replies[0].flag("success"), Some(true));
        assert_eq!(replies[1].method(), Some("autorecEntryAdd"));
        assert_eq!(replies[1].u32("channel"), Some(101));
        assert_eq!(backend.catalog().autorecs.len(), 1);
    }

    #[test]
    fn rejections_override_handlers() {
        let backend = LoopbackBackend::new(Catalog::new().rejecting("addDvrEntry", "No space"));
        let link = open(&backend);
        let replies = call(
            &link,
            requests::add_dvr_entry(&tvhsync_protocol::DvrEntryParams::default()),
        );
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].str("error"), Some("No space"));
    }

    #[test]
    fn files_are_read_in_chunks() {
        let backend = LoopbackBackend::new(Catalog::new().with_file("imagecache/1", vec![1, 2, 3, 4, 5]));
        let link = open(&backend);
        let opened = call(&link, requests::file_open("/imagecache/1"));
        let id = opened[0].u32("id").unwrap();
        assert_eq!(opened[0].i64("size"), Some(5));
        let first = call(&link, requests::file_read(id, 3));
        let second = call(&link, requests::file_read(id, 3));
        assert_eq!(first[0].bytes("data"), Some(vec![1, 2, 3]));
        assert_eq!(second[0].bytes("data"), Some(vec![4, 5]));
    }
}
