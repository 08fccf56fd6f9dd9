//! Engine harness for cross-crate tests.
//!
//! Wires an [`Engine`] to a [`LoopbackBackend`], a [`MemoryStore`] and a
//! [`ManualClock`] frozen at [`NOW`].

use crate::backend::LoopbackBackend;
use crate::catalog::Catalog;
use crate::fixtures::NOW;
use crate::wait::{self, eventually, WAIT};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tvhsync_engine::{Clock, Engine, EngineConfig, EngineEvent, ManualClock, SyncPhase, SyncStatus};
use tvhsync_protocol::requests;
use tvhsync_store::{ConnectionSettings, MemoryStore, Store};

/// Configuration with short timeouts and the follow-up fetch pushed out
/// of the way.
pub fn test_config(icon_dir: &Path) -> EngineConfig {
    EngineConfig::new()
        .with_auth_timeout(Duration::from_secs(2))
        .with_request_timeout(Duration::from_secs(2))
        .with_batch_timeout(Duration::from_secs(5))
        .with_worker_threads(4)
        .with_incremental_delay(Duration::from_secs(3600))
        .with_icon_dir(icon_dir)
}

/// Settings for a backend that has never been synced.
pub fn test_settings() -> ConnectionSettings {
    ConnectionSettings::new("test", "localhost", 9982)
}

/// An engine connected to a loopback backend.
pub struct TestEngine {
    /// The engine under test.
    pub engine: Engine,
    /// The server side.
    pub backend: LoopbackBackend,
    /// The store the engine writes.
    pub store: Arc<MemoryStore>,
    /// The engine clock.
    pub clock: Arc<ManualClock>,
    events: broadcast::Receiver<EngineEvent>,
    icon_dir: TempDir,
}

impl TestEngine {
    /// An engine for `catalog` with fresh settings.
    pub fn new(catalog: Catalog) -> Self {
        Self::build(catalog, test_settings(), |config| config)
    }

    /// An engine for `catalog` starting from `settings`.
    pub fn with_settings(catalog: Catalog, settings: ConnectionSettings) -> Self {
        Self::build(catalog, settings, |config| config)
    }

    /// An engine whose configuration is adjusted by `configure`.
    pub fn build(
        catalog: Catalog,
        settings: ConnectionSettings,
        configure: impl FnOnce(EngineConfig) -> EngineConfig,
    ) -> Self {
        let icon_dir = TempDir::new().expect("Failed to create temp directory");
        let backend = LoopbackBackend::new(catalog);
        let store = Arc::new(MemoryStore::new(settings));
        let clock = Arc::new(ManualClock::new(NOW));
        let engine = Engine::builder(store.clone(), backend.transport())
            .with_config(configure(test_config(icon_dir.path())))
            .with_clock(clock.clone())
            .build()
            .expect("Failed to build engine");
        let events = engine.subscribe();
        Self {
            engine,
            backend,
            store,
            clock,
            events,
            icon_dir,
        }
    }

    /// Connects and waits for the sync pass to finish.
    pub fn sync(&mut self) -> bool {
        self.engine.connect();
        self.wait_synced()
    }

    /// Waits until a sync pass has committed at the current clock time and
    /// every push has been handled.
    pub fn wait_synced(&self) -> bool {
        let now = self.clock.now();
        eventually(WAIT, || {
            let settings = match self.store.settings().load() {
                Ok(settings) => settings,
                Err(_) => return false,
            };
            settings.last_update == now
                && !settings.sync_required
                && self.engine.sync_phase() == SyncPhase::Idle
        }) && self.engine.wait_idle(WAIT)
    }

    /// Waits until every push sent so far has been handled.
    ///
    /// A `getSysTime` round trip first makes sure everything the backend
    /// queued before it has been routed onto the push lane.
    pub fn settle(&self) -> bool {
        let dispatcher = self.engine.dispatcher();
        if dispatcher.is_attached()
            && dispatcher
                .request_blocking(requests::get_sys_time(), WAIT)
                .is_err()
        {
            return false;
        }
        self.engine.wait_idle(WAIT)
    }

    /// Waits for a status event with this state.
    pub fn wait_for_status(&mut self, state: SyncStatus) -> Option<EngineEvent> {
        wait::next_status(&mut self.events, state, WAIT)
    }

    /// Waits for the first event matching `matches`.
    pub fn wait_for(&mut self, matches: impl FnMut(&EngineEvent) -> bool) -> Option<EngineEvent> {
        wait::next_event(&mut self.events, WAIT, matches)
    }

    /// Every event received since the last call.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        wait::drain(&mut self.events)
    }

    /// The icon cache directory.
    pub fn icon_dir(&self) -> &Path {
        self.icon_dir.path()
    }
}

impl std::ops::Deref for TestEngine {
    type Target = Engine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}
