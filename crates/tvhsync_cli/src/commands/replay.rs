//! Replay command implementation.

use super::session::Session;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use tvhsync_engine::{
    Clock, Engine, EngineEvent, ManualClock, SyncPhase, SyncStatus, SystemClock,
};
use tvhsync_store::{MemoryStore, Snapshot, Store};
use tvhsync_testkit::{eventually, next_event, LoopbackBackend};

/// Why a replay did not produce a result.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The sync did not finish in time.
    #[error("sync did not finish within {0} seconds")]
    Timeout(u64),

    /// The connection failed.
    #[error("connection failed: {0}")]
    Failed(String),
}

/// Counts of a finished replay.
#[derive(Debug, Serialize)]
pub struct ReplaySummary {
    /// Server name and version.
    pub server: String,
    /// Negotiated HTSP version.
    pub htsp_version: u32,
    /// Number of channels.
    pub channels: usize,
    /// Number of channel tags.
    pub tags: usize,
    /// Number of tag membership rows.
    pub tag_channels: usize,
    /// Number of EPG events.
    pub programs: usize,
    /// Number of recordings.
    pub recordings: usize,
    /// Number of series and timer rules.
    pub rules: usize,
    /// Number of server profiles.
    pub profiles: usize,
    /// Status messages seen, in order.
    pub statuses: Vec<String>,
}

impl ReplaySummary {
    fn new(snapshot: &Snapshot, statuses: Vec<String>) -> Self {
        Self {
            server: format!(
                "{} {}",
                snapshot.status.server_name.as_deref().unwrap_or("unknown"),
                snapshot.status.server_version.as_deref().unwrap_or_default()
            )
            .trim_end()
            .to_string(),
            htsp_version: snapshot.status.htsp_version,
            channels: snapshot.channels.len(),
            tags: snapshot.tags.len(),
            tag_channels: snapshot.tag_channels.len(),
            programs: snapshot.programs.len(),
            recordings: snapshot.recordings.len(),
            rules: snapshot.series_rules.len() + snapshot.timer_rules.len(),
            profiles: snapshot.profiles.len(),
            statuses,
        }
    }
}

/// Runs the replay command.
pub fn run(
    path: &Path,
    icons: Option<PathBuf>,
    timeout: u64,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = Session::load(path)?;
    let (snapshot, statuses) = replay(session, icons, Duration::from_secs(timeout))?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        _ => print!("{}", render(&ReplaySummary::new(&snapshot, statuses))),
    }
    Ok(())
}

/// Syncs a fresh store against the session's catalog.
pub fn replay(
    session: Session,
    icons: Option<PathBuf>,
    timeout: Duration,
) -> Result<(Snapshot, Vec<String>), Box<dyn std::error::Error>> {
    let mut config = session.config;
    if let Some(dir) = icons {
        config = config.with_icon_dir(dir);
    }
    let clock = Arc::new(ManualClock::new(
        session.now.unwrap_or_else(|| SystemClock.now()),
    ));
    let backend = LoopbackBackend::new(session.catalog);
    let store = Arc::new(MemoryStore::new(session.settings));
    let engine = Engine::builder(store.clone(), backend.transport())
        .with_config(config)
        .with_clock(clock.clone())
        .build()?;

    let mut events = engine.subscribe();
    engine.connect();
    let mut statuses = Vec::new();
    let connected = next_event(&mut events, timeout, |event| match event {
        EngineEvent::Status { state, message, .. } => {
            statuses.push(message.clone());
            matches!(state, SyncStatus::Connected | SyncStatus::Failed)
        }
        _ => false,
    });
    match connected {
        Some(EngineEvent::Status {
            state: SyncStatus::Failed,
            details,
            message,
        }) => return Err(ReplayError::Failed(details.unwrap_or(message)).into()),
        Some(_) => {}
        None => return Err(ReplayError::Timeout(timeout.as_secs()).into()),
    }

    let now = clock.now();
    let finished = eventually(timeout, || {
        store
            .settings()
            .load()
            .is_ok_and(|s| s.last_update == now && !s.sync_required)
            && engine.sync_phase() == SyncPhase::Idle
    }) && engine.wait_idle(timeout);
    if !finished {
        return Err(ReplayError::Timeout(timeout.as_secs()).into());
    }

    statuses.extend(
        tvhsync_testkit::drain(&mut events)
            .into_iter()
            .filter_map(|event| match event {
                EngineEvent::Status { message, .. } => Some(message),
                _ => None,
            }),
    );
    engine.shutdown();
    let snapshot = store.snapshot()?;
    info!(
        channels = snapshot.channels.len(),
        programs = snapshot.programs.len(),
        "replay finished"
    );
    Ok((snapshot, statuses))
}

fn render(summary: &ReplaySummary) -> String {
    let mut out = format!(
        "server:       {}\nhtsp version: {}\n",
        summary.server, summary.htsp_version
    );
    for (name, count) in [
        ("channels", summary.channels),
        ("tags", summary.tags),
        ("tag members", summary.tag_channels),
        ("events", summary.programs),
        ("recordings", summary.recordings),
        ("rules", summary.rules),
        ("profiles", summary.profiles),
    ] {
        out.push_str(&format!("{name:<13} {count}\n"));
    }
    for status in &summary.statuses {
        out.push_str(&format!("  > {status}\n"));
    }
    out
}
