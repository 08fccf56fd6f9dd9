//! Polling helpers for asserting on background work.

use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tvhsync_engine::{EngineEvent, SyncStatus};

/// Default bound for every wait in tests.
pub const WAIT: Duration = Duration::from_secs(5);

const POLL: Duration = Duration::from_millis(5);

/// Polls `condition` until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(POLL);
    }
}

/// Waits for the first event matching `matches`, discarding the others.
pub fn next_event(
    rx: &mut broadcast::Receiver<EngineEvent>,
    timeout: Duration,
    mut matches: impl FnMut(&EngineEvent) -> bool,
) -> Option<EngineEvent> {
    let deadline = Instant::now() + timeout;
    loop {
        match rx.try_recv() {
            Ok(event) if matches(&event) => return Some(event),
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => return None,
            Err(TryRecvError::Empty) => {
                if Instant::now() >= deadline {
                    return None;
                }
                thread::sleep(POLL);
            }
        }
    }
}

/// Waits for a status event with this state.
pub fn next_status(
    rx: &mut broadcast::Receiver<EngineEvent>,
    state: SyncStatus,
    timeout: Duration,
) -> Option<EngineEvent> {
    next_event(rx, timeout, |event| {
        matches!(event, EngineEvent::Status { state: s, .. } if *s == state)
    })
}

/// Every event received so far.
pub fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}

/// The states of the status events in `events`, in order.
pub fn statuses(events: &[EngineEvent]) -> Vec<SyncStatus> {
    events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::Status { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}
