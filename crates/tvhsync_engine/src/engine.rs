//! The engine facade: wires the components together and owns their threads.

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::coordinator::{SyncCoordinator, SyncPhase};
use crate::dispatcher::{spawn_push_lane, Dispatcher};
use crate::error::EngineResult;
use crate::events::{EngineEvent, EventSender};
use crate::icons::{HtspFileFetcher, HttpFetcher, IconCache, IconFetcher};
use crate::pool::{PoolHandle, WorkerPool};
use crate::transport::Transport;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use tvhsync_store::Store;

/// Events buffered per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 256;

/// How long shutdown waits for running pool jobs.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Builder for [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    http_fetcher: Option<Arc<dyn IconFetcher>>,
    file_fetcher: Option<Arc<dyn IconFetcher>>,
}

impl EngineBuilder {
    /// Starts a builder for an engine mirroring into `store`.
    pub fn new(store: Arc<dyn Store>, transport: Arc<dyn Transport>) -> Self {
        Self {
            config: EngineConfig::default(),
            store,
            transport,
            clock: Arc::new(SystemClock),
            http_fetcher: None,
            file_fetcher: None,
        }
    }

    /// Sets the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the clock used for sync decisions and pruning.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the fetcher for `http://` and `https://` icons.
    pub fn with_http_fetcher(mut self, fetcher: Arc<dyn IconFetcher>) -> Self {
        self.http_fetcher = Some(fetcher);
        self
    }

    /// Replaces the fetcher for server-relative icons.
    pub fn with_file_fetcher(mut self, fetcher: Arc<dyn IconFetcher>) -> Self {
        self.file_fetcher = Some(fetcher);
        self
    }

    /// Starts the worker pool and the push lane.
    pub fn build(self) -> EngineResult<Engine> {
        let config = self.config;
        let pool = WorkerPool::new(config.worker_threads)?;
        let events = EventSender::new(EVENT_CAPACITY);
        let (dispatcher, lane) = Dispatcher::new(pool.handle());
        let dispatcher = Arc::new(dispatcher);

        let http = self
            .http_fetcher
            .unwrap_or_else(|| Arc::new(HttpFetcher::new(config.request_timeout)));
        let file = self.file_fetcher.unwrap_or_else(|| {
            Arc::new(HtspFileFetcher::new(
                dispatcher.clone(),
                config.request_timeout,
            ))
        });
        let icons = Arc::new(IconCache::new(
            &config,
            self.store.clone(),
            pool.handle(),
            http,
            file,
        ));

        let coordinator = SyncCoordinator::new(
            config.clone(),
            self.clock,
            self.store.clone(),
            dispatcher.clone(),
            icons.clone(),
            events.clone(),
            pool.handle(),
        );
        let push_lane = spawn_push_lane(lane, coordinator.clone())?;
        let connection = ConnectionManager::new(
            config.clone(),
            self.transport,
            dispatcher.clone(),
            self.store.clone(),
            events.clone(),
            pool.handle(),
            coordinator.clone(),
        );

        debug!(workers = config.worker_threads, "engine started");
        Ok(Engine {
            config,
            store: self.store,
            events,
            dispatcher,
            connection,
            coordinator,
            icons,
            jobs: pool.handle(),
            pool: Some(pool),
            push_lane: Some(push_lane),
        })
    }
}

/// A sync engine for one backend connection.
///
/// Created with [`Engine::new`] or [`Engine::builder`], stopped with
/// [`Engine::shutdown`] or by dropping it.
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) events: EventSender,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) connection: Arc<ConnectionManager>,
    pub(crate) coordinator: Arc<SyncCoordinator>,
    pub(crate) icons: Arc<IconCache>,
    pub(crate) jobs: PoolHandle,
    pool: Option<WorkerPool>,
    push_lane: Option<JoinHandle<()>>,
}

impl Engine {
    /// Creates an engine with the default clock and icon fetchers.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
    ) -> EngineResult<Self> {
        EngineBuilder::new(store, transport)
            .with_config(config)
            .build()
    }

    /// Starts a builder.
    pub fn builder(store: Arc<dyn Store>, transport: Arc<dyn Transport>) -> EngineBuilder {
        EngineBuilder::new(store, transport)
    }

    /// Subscribes to the status channel.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// The configuration in use.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The store being mirrored into.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The request dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The icon cache.
    pub fn icons(&self) -> &Arc<IconCache> {
        &self.icons
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Current sync phase.
    pub fn sync_phase(&self) -> SyncPhase {
        self.coordinator.phase()
    }

    /// Waits until every push received so far has been handled.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.dispatcher.barrier(timeout)
    }

    /// Closes the connection and stops every engine thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.connection.close();
        self.coordinator.reset();
        self.dispatcher.close_lane();
        if let Some(lane) = self.push_lane.take() {
            if lane.join().is_err() {
                warn!("push lane panicked");
            }
        }
        if let Some(pool) = self.pool.take() {
            pool.shutdown(SHUTDOWN_GRACE);
        }
        debug!("engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.pool.is_some() {
            self.stop();
        }
    }
}
