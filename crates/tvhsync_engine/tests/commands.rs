//! Integration tests for the command surface.

use tvhsync_engine::{EngineError, EngineEvent, Ticket};
use tvhsync_protocol::{
    AutorecParams, DvrEntryParams, EpgQuery, EventQuery, RemoveKind, TicketTarget, TimerecParams,
};
use tvhsync_store::Store;
use tvhsync_testkit::prelude::*;

fn guide() -> Catalog {
    Catalog::new()
        .with_channel(channel_with_events(101, "One", 1, 900, 901))
        .with_channel(channel_with_events(102, "Two", 2, 950, 951))
        .with_events(event_chain(101, 900, NOW, 30))
        .with_events(event_chain(102, 950, NOW, 2))
}

fn synced(catalog: Catalog) -> TestEngine {
    let mut engine = TestEngine::new(catalog);
    assert!(engine.sync());
    engine.drain_events();
    engine
}

fn outcome(engine: &mut TestEngine, name: &str) -> Option<EngineEvent> {
    engine.wait_for(|event| {
        matches!(event, EngineEvent::CommandOutcome { command, .. } if command == name)
    })
}

#[test]
fn recording_lifecycle() {
    let mut engine = synced(guide());
    let params = DvrEntryParams {
        event_id: Some(901),
        ..DvrEntryParams::default()
    };
    let id = engine.add_dvr_entry(&params).unwrap().unwrap();
    assert_eq!(
        outcome(&mut engine, "add_dvr_entry"),
        Some(EngineEvent::CommandOutcome {
            command: "add_dvr_entry".to_string(),
            success: true,
            error: None,
        })
    );
    assert!(engine.settle());
    let recording = engine.store.recordings().get_by_id(&id).unwrap().unwrap();
    assert_eq!(recording.title.as_deref(), Some("Show 901"));
    assert_eq!(recording.channel_id, 101);

    let rename = DvrEntryParams {
        title: Some("Renamed".to_string()),
        ..DvrEntryParams::default()
    };
    engine.update_dvr_entry(id, &rename).unwrap();
    assert!(engine.settle());
    let recording = engine.store.recordings().get_by_id(&id).unwrap().unwrap();
    assert_eq!(recording.title.as_deref(), Some("Renamed"));

    engine.remove_dvr_entry(id, RemoveKind::Cancel).unwrap();
    assert!(engine.settle());
    assert!(engine.store.recordings().get_by_id(&id).unwrap().is_none());
    assert_eq!(
        engine.backend.requests("cancelDvrEntry")[0].u32("id"),
        Some(id)
    );
}

#[test]
fn rejected_commands_report_the_server_error() {
    let mut engine = synced(guide().rejecting("addDvrEntry", "No free disk space"));
    let result = engine.add_dvr_entry(&DvrEntryParams::default());
    assert!(matches!(
        result,
        Err(EngineError::ServerRejected(ref e)) if e == "No free disk space"
    ));
    assert_eq!(
        outcome(&mut engine, "add_dvr_entry"),
        Some(EngineEvent::CommandOutcome {
            command: "add_dvr_entry".to_string(),
            success: false,
            error: Some("No free disk space".to_string()),
        })
    );
}

#[test]
fn rule_update_is_native_on_current_servers() {
    let engine = synced(guide());
    let params = AutorecParams {
        title: Some("News".to_string()),
        ..AutorecParams::default()
    };
    let id = engine.add_autorec_entry(&params).unwrap().unwrap();

    let changed = AutorecParams {
        title: Some("Late News".to_string()),
        ..AutorecParams::default()
    };
    let after = engine.update_autorec_entry(&id, &changed).unwrap();
    assert_eq!(after.as_deref(), Some(id.as_str()));
    assert!(engine.settle());

    assert_eq!(engine.backend.requests("updateAutorecEntry").len(), 1);
    assert!(engine.backend.requests("deleteAutorecEntry").is_empty());
    let rule = engine.store.series_rules().get_by_id(&id).unwrap().unwrap();
    assert_eq!(rule.title.as_deref(), Some("Late News"));
}

#[test]
fn rule_update_is_emulated_on_old_servers() {
    let engine = synced(guide().with_htsp_version(24));
    let params = TimerecParams {
        title: Some("Morning".to_string()),
        channel_id: Some(101),
        ..TimerecParams::default()
    };
    let old = engine.add_timerec_entry(&params).unwrap().unwrap();
    assert!(engine.settle());

    let changed = TimerecParams {
        title: Some("Evening".to_string()),
        ..params
    };
    let new = engine.update_timerec_entry(&old, &changed).unwrap().unwrap();
    assert_ne!(new, old);
    assert!(engine.settle());

    let methods: Vec<String> = engine
        .backend
        .received()
        .into_iter()
        .filter(|m| m.contains("Timerec"))
        .collect();
    assert_eq!(
        methods,
        vec!["addTimerecEntry", "deleteTimerecEntry", "addTimerecEntry"]
    );
    let rules = engine.store.timer_rules().get_all().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].id, new);
    assert_eq!(rules[0].title.as_deref(), Some("Evening"));
}

#[test]
fn emulated_update_stops_when_the_delete_fails() {
    let engine = synced(guide().with_htsp_version(24));
    let result = engine.update_autorec_entry("auto-missing", &AutorecParams::default());
    assert!(matches!(result, Err(EngineError::ServerRejected(_))));
    assert!(engine.backend.requests("addAutorecEntry").is_empty());
}

#[test]
fn tickets_are_returned_and_broadcast() {
    let mut engine = synced(guide());
    let ticket = engine.get_ticket(TicketTarget::Channel(101)).unwrap();
    assert_eq!(ticket.path, "/stream/channelid/101");
    assert!(ticket.ticket.starts_with("ticket-"));

    let event = engine.wait_for(|e| matches!(e, EngineEvent::Ticket { .. }));
    assert_eq!(
        event,
        Some(EngineEvent::Ticket {
            path: ticket.path.clone(),
            ticket: ticket.ticket.clone(),
        })
    );

    let Ticket { path, .. } = engine.get_ticket(TicketTarget::Recording(7)).unwrap();
    assert_eq!(path, "/dvrfile/7");
}

#[test]
fn event_queries_save_what_they_fetch() {
    let engine = synced(guide());
    engine.store.programs().remove_all().unwrap();

    let single = engine.get_event(950).unwrap().unwrap();
    assert_eq!(single.title.as_deref(), Some("Show 950"));
    assert!(engine.store.programs().get_by_id(&950).unwrap().is_some());

    let following = engine
        .get_events(&EventQuery::following(101, 903, 3))
        .unwrap();
    let ids: Vec<u32> = following.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![903, 904, 905]);
    assert_eq!(engine.store.programs().count().unwrap(), 4);

    assert!(matches!(
        engine.get_event(12345),
        Err(EngineError::ServerRejected(_))
    ));
}

#[test]
fn epg_search_returns_event_ids() {
    let engine = synced(guide());
    let query = EpgQuery {
        channel_id: Some(102),
        ..EpgQuery::title("show")
    };
    assert_eq!(engine.epg_query(&query).unwrap(), vec![950, 951]);

    let full = EpgQuery {
        full: true,
        ..query
    };
    assert_eq!(engine.epg_query(&full).unwrap(), vec![950, 951]);
}

#[test]
fn get_channel_merges_without_saving() {
    let engine = synced(guide());
    engine.backend.update(|catalog| {
        catalog.channels[0] = channel_with_events(101, "One HD", 1, 900, 901);
    });

    let fetched = engine.get_channel(101).unwrap().unwrap();
    assert_eq!(fetched.name.as_deref(), Some("One HD"));
    assert_eq!(fetched.server_order, 1);
    let stored = engine.store.channels().get_by_id(&101).unwrap().unwrap();
    assert_eq!(stored.name.as_deref(), Some("One"));
}

#[test]
fn disk_space_and_time_refresh_the_status() {
    let engine = synced(guide());
    engine.backend.update(|catalog| {
        catalog.free_disk_space = 10;
        catalog.total_disk_space = 20;
        catalog.time = NOW + 5;
        catalog.gmt_offset = -120;
    });

    let status = engine.get_disk_space().unwrap();
    assert_eq!((status.free_disk_space, status.total_disk_space), (10, 20));

    engine.clock.set_dst_offset_ms(3_600_000);
    let status = engine.get_system_time().unwrap();
    assert_eq!(status.time, NOW + 5);
    assert_eq!(status.gmt_offset, -120 * 60_000 - 3_600_000);
}

#[test]
fn more_events_continue_each_channel() {
    let engine = synced(guide());
    // 25 of the 30 events on channel 101 fall inside the one-day window.
    assert_eq!(engine.store.programs().count().unwrap(), 27);

    let saved = engine.get_more_events(3).unwrap();
    assert_eq!(saved, 3);
    for id in [925, 926, 927] {
        assert!(engine.store.programs().get_by_id(&id).unwrap().is_some());
    }
    let requests = engine.backend.requests("getEvents");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].u32("eventId"), Some(925));
}

#[test]
fn profile_commands_count_changes() {
    let engine = synced(guide());
    engine.backend.update(|catalog| {
        catalog.profiles = vec![profile("p1", "htsp"), profile("p9", "webtv-av1")];
        catalog.dvr_configs = vec![profile("d1", "Movies"), profile("d2", "")];
    });

    // "htsp" is already present as a local fallback.
    assert_eq!(engine.get_profiles().unwrap(), 1);
    assert_eq!(engine.get_profiles().unwrap(), 0);
    assert_eq!(engine.get_dvr_configs().unwrap(), 2);
}

#[test]
fn icon_warmup_on_demand() {
    let catalog = guide()
        .with_channel(channel_with_icon(103, "Three", 3, "imagecache/3"))
        .with_file("imagecache/3", sample_png(128, 128));
    let engine = synced(catalog);
    assert!(eventually(WAIT, || engine.icons().contains("imagecache/3")));
    assert!(engine.icons().remove("imagecache/3"));

    assert!(engine.load_channel_icons().unwrap());
    assert!(engine.icons().contains("imagecache/3"));
}

#[test]
fn commands_after_close_are_refused() {
    let engine = synced(guide());
    engine.close();
    assert!(matches!(
        engine.get_disk_space(),
        Err(EngineError::NotAuthenticated)
    ));
    assert!(matches!(
        engine.get_more_events(5),
        Err(EngineError::NotAuthenticated)
    ));
}
