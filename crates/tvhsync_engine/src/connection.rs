//! Connection and authentication state machine.
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Authenticated
//!                      |              |                 |
//!                      +--------------+-----------------+--> Failed(..)
//! any state --close()--> Closed
//! ```
//!
//! Every call to [`ConnectionManager::connect`] starts a new generation.
//! Work belonging to an older generation (a slow handshake, a receive loop
//! noticing its link died) is ignored once a newer one exists.

use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, TransportErrorKind};
use crate::events::{EventSender, SyncStatus};
use crate::pool::PoolHandle;
use crate::reconcile::apply_hello;
use crate::transport::{Link, Transport};
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tvhsync_protocol::requests;
use tvhsync_store::Store;

/// Why a connection attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionFailure {
    /// No usable answer from the server.
    Generic,
    /// The server refused the credentials.
    BadCredentials,
    /// The host name could not be resolved.
    Resolve,
    /// The socket could not be opened or broke.
    Socket,
    /// The connection was interrupted.
    Interrupted,
}

impl ConnectionFailure {
    /// Message reported on the status channel.
    pub fn message(self) -> &'static str {
        match self {
            ConnectionFailure::Generic => "Connection failed",
            ConnectionFailure::BadCredentials => "Authentication failed, bad username or password",
            ConnectionFailure::Resolve => "Failed to resolve server address",
            ConnectionFailure::Socket => "Failed to connect to server",
            ConnectionFailure::Interrupted => "Connection was interrupted",
        }
    }
}

impl From<TransportErrorKind> for ConnectionFailure {
    fn from(kind: TransportErrorKind) -> Self {
        match kind {
            TransportErrorKind::Resolve => ConnectionFailure::Resolve,
            TransportErrorKind::Socket => ConnectionFailure::Socket,
            TransportErrorKind::Interrupted => ConnectionFailure::Interrupted,
            TransportErrorKind::Closed | TransportErrorKind::Other => ConnectionFailure::Generic,
        }
    }
}

/// State of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Never connected.
    #[default]
    Disconnected,
    /// Opening the link.
    Connecting,
    /// Link open, handshake running.
    Authenticating,
    /// Ready for commands.
    Authenticated,
    /// The last attempt failed.
    Failed(ConnectionFailure),
    /// Closed on request.
    Closed,
}

impl ConnectionState {
    /// Returns true while a connection is being set up or is usable.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Authenticating
                | ConnectionState::Authenticated
        )
    }

    fn is_pending(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Authenticating
        )
    }
}

/// Observes the connection lifecycle.
pub trait ConnectionListener: Send + Sync {
    /// The handshake finished. Called on the worker pool.
    fn on_authenticated(&self);

    /// The connection failed or was closed.
    fn on_disconnected(&self) {}
}

struct Inner {
    state: ConnectionState,
    generation: u64,
    link: Option<Arc<dyn Link>>,
    receiver: Option<JoinHandle<()>>,
}

struct Failure {
    kind: ConnectionFailure,
    details: String,
}

impl Failure {
    fn new(kind: ConnectionFailure, details: impl Into<String>) -> Self {
        Self {
            kind,
            details: details.into(),
        }
    }

    fn from_request(err: EngineError) -> Self {
        match err {
            EngineError::Transport { kind, message } => Self::new(kind.into(), message),
            other => Self::new(ConnectionFailure::Generic, other.to_string()),
        }
    }
}

/// Owns the link to the backend and runs the handshake.
pub struct ConnectionManager {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn Store>,
    events: EventSender,
    pool: PoolHandle,
    listener: Arc<dyn ConnectionListener>,
    inner: Mutex<Inner>,
    changed: Condvar,
    this: Weak<ConnectionManager>,
}

impl ConnectionManager {
    pub(crate) fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        dispatcher: Arc<Dispatcher>,
        store: Arc<dyn Store>,
        events: EventSender,
        pool: PoolHandle,
        listener: Arc<dyn ConnectionListener>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            transport,
            dispatcher,
            store,
            events,
            pool,
            listener,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                generation: 0,
                link: None,
                receiver: None,
            }),
            changed: Condvar::new(),
            this: this.clone(),
        })
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Starts a new connection, dropping any previous one.
    ///
    /// The handshake runs on the worker pool; progress is reported on the
    /// status channel.
    pub fn connect(&self) {
        let (generation, link, receiver) = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.state = ConnectionState::Connecting;
            self.changed.notify_all();
            (inner.generation, inner.link.take(), inner.receiver.take())
        };
        self.teardown(link, receiver);

        info!(generation, "connecting");
        self.events.status(SyncStatus::Connecting, "Connecting to server", None);

        let this = self.this.clone();
        self.pool.execute(move || {
            if let Some(manager) = this.upgrade() {
                manager.handshake(generation);
            }
        });
    }

    /// Connects again unless a connection is already up or being set up.
    pub fn reconnect(&self) {
        if self.state().is_connected() {
            debug!("reconnect ignored, already connected");
            return;
        }
        self.connect();
    }

    /// Closes the connection. Pending requests are dropped.
    pub fn close(&self) {
        let (link, receiver) = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Closed {
                return;
            }
            inner.generation += 1;
            inner.state = ConnectionState::Closed;
            self.changed.notify_all();
            (inner.link.take(), inner.receiver.take())
        };
        self.teardown(link, receiver);

        info!("connection closed");
        self.events.status(SyncStatus::Closed, "Connection closed", None);
        self.listener.on_disconnected();
    }

    /// Waits up to `timeout` for the handshake to finish.
    ///
    /// Returns false at once if no connection is being set up.
    pub fn wait_authenticated(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            match inner.state {
                ConnectionState::Authenticated => return true,
                state if state.is_pending() => {}
                _ => return false,
            }
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                return inner.state == ConnectionState::Authenticated;
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.lock().generation == generation
    }

    fn handshake(&self, generation: u64) {
        match self.authenticate(generation) {
            Ok(true) => {
                let status = self.store.status().load().unwrap_or_default();
                let details = match (status.server_name, status.server_version) {
                    (Some(name), Some(version)) => Some(format!("{name} {version}")),
                    (Some(name), None) => Some(name),
                    _ => None,
                };
                info!(htsp_version = status.htsp_version, "authenticated");
                self.events.status(SyncStatus::Connected, "Connected", details);
                self.listener.on_authenticated();
            }
            Ok(false) => debug!(generation, "handshake superseded"),
            Err(failure) => self.fail(generation, failure),
        }
    }

    /// Runs `hello` and `authenticate`. Returns false if a newer connection
    /// took over meanwhile.
    fn authenticate(&self, generation: u64) -> Result<bool, Failure> {
        let settings = self
            .store
            .settings()
            .load()
            .map_err(|e| Failure::new(ConnectionFailure::Generic, e.to_string()))?;

        debug!(host = %settings.host, port = settings.port, "opening link");
        let link = self
            .transport
            .open(&settings)
            .map_err(|e| Failure::new(e.kind.into(), e.message))?;
        if !self.install(generation, link) {
            return Ok(false);
        }

        let hello = requests::hello(
            &self.config.client_name,
            &self.config.client_version,
            self.config.htsp_version,
        );
        let reply = self
            .dispatcher
            .request_blocking(hello, self.config.auth_timeout)
            .map_err(Failure::from_request)?;

        let mut status = self.store.status().load().unwrap_or_default();
        apply_hello(&mut status, &reply);
        if let Err(err) = self.store.status().save(&status) {
            warn!(error = %err, "could not save server status");
        }
        debug!(
            htsp_version = status.htsp_version,
            server = status.server_name.as_deref().unwrap_or("?"),
            "hello answered"
        );

        let challenge = reply.bytes("challenge").unwrap_or_default();
        let digest = requests::authentication_digest(
            settings.password.as_deref().unwrap_or_default(),
            &challenge,
        );
        let request =
            requests::authenticate(settings.username.as_deref().unwrap_or_default(), digest);
        let reply = self
            .dispatcher
            .request_blocking(request, self.config.auth_timeout)
            .map_err(Failure::from_request)?;
        if reply.flag("noaccess") == Some(true) {
            return Err(Failure::new(
                ConnectionFailure::BadCredentials,
                "server denied access",
            ));
        }

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return Ok(false);
        }
        inner.state = ConnectionState::Authenticated;
        self.changed.notify_all();
        Ok(true)
    }

    /// Attaches a freshly opened link and starts its receive loop, unless
    /// the attempt is stale.
    fn install(&self, generation: u64, link: Arc<dyn Link>) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            drop(inner);
            link.close();
            return false;
        }
        self.dispatcher.attach(link.clone());
        match spawn_receiver(
            self.this.clone(),
            link.clone(),
            self.dispatcher.clone(),
            generation,
            self.config.poll_interval,
        ) {
            Ok(handle) => inner.receiver = Some(handle),
            Err(err) => warn!(error = %err, "could not start receive loop"),
        }
        inner.link = Some(link);
        inner.state = ConnectionState::Authenticating;
        self.changed.notify_all();
        true
    }

    fn fail(&self, generation: u64, failure: Failure) {
        let (link, receiver) = {
            let mut inner = self.inner.lock();
            if inner.generation != generation
                || matches!(
                    inner.state,
                    ConnectionState::Failed(_) | ConnectionState::Closed
                )
            {
                return;
            }
            inner.state = ConnectionState::Failed(failure.kind);
            self.changed.notify_all();
            (inner.link.take(), inner.receiver.take())
        };
        self.teardown(link, receiver);

        warn!(failure = ?failure.kind, details = %failure.details, "connection failed");
        self.events.status(
            SyncStatus::Failed,
            failure.kind.message(),
            Some(failure.details),
        );
        self.listener.on_disconnected();
    }

    fn teardown(&self, link: Option<Arc<dyn Link>>, receiver: Option<JoinHandle<()>>) {
        if let Some(link) = link {
            link.close();
        }
        self.dispatcher.detach();
        if let Some(handle) = receiver {
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                warn!("receive loop panicked");
            }
        }
    }
}

fn spawn_receiver(
    manager: Weak<ConnectionManager>,
    link: Arc<dyn Link>,
    dispatcher: Arc<Dispatcher>,
    generation: u64,
    poll_interval: Duration,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("tvhsync-recv".to_string())
        .spawn(move || {
            loop {
                match link.recv(poll_interval) {
                    Ok(Some(msg)) => dispatcher.route(msg),
                    Ok(None) => {}
                    Err(err) => {
                        if let Some(manager) = manager.upgrade() {
                            manager.fail(generation, Failure::new(err.kind.into(), err.message));
                        }
                        break;
                    }
                }
                match manager.upgrade() {
                    Some(manager) if manager.is_current(generation) => {}
                    _ => break,
                }
            }
            debug!(generation, "receive loop stopped");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WorkerPool;
    use crate::transport::MockTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tvhsync_protocol::{HtspMessage, MIN_API_VERSION};
    use tvhsync_store::{ConnectionSettings, MemoryStore};

    #[derive(Default)]
    struct Counter {
        authenticated: AtomicUsize,
        disconnected: AtomicUsize,
    }

    impl ConnectionListener for Counter {
        fn on_authenticated(&self) {
            self.authenticated.fetch_add(1, Ordering::SeqCst);
        }

        fn on_disconnected(&self) {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn server(msg: &HtspMessage) -> Vec<HtspMessage> {
        let Some(seq) = msg.seq() else {
            return Vec::new();
        };
        let mut reply = match msg.method() {
            Some("hello") => HtspMessage::new()
                .with("htspversion", MIN_API_VERSION)
                .with("servername", "Tvheadend")
                .with("serverversion", "4.3")
                .with("challenge", vec![1u8, 2, 3]),
            Some("authenticate") if msg.str("username") == Some("intruder") => {
                HtspMessage::new().with("noaccess", 1i64)
            }
            _ => HtspMessage::new(),
        };
        reply.set_seq(seq);
        vec![reply]
    }

    struct Fixture {
        _pool: WorkerPool,
        transport: Arc<MockTransport>,
        store: Arc<MemoryStore>,
        listener: Arc<Counter>,
        events: EventSender,
        manager: Arc<ConnectionManager>,
    }

    fn fixture(transport: MockTransport, username: &str) -> Fixture {
        let pool = WorkerPool::new(4).unwrap();
        let transport = Arc::new(transport);
        let store = Arc::new(MemoryStore::new(
            ConnectionSettings::new("test", "tvh.local", 9982).with_credentials(username, "secret"),
        ));
        let (dispatcher, _lane) = Dispatcher::new(pool.handle());
        let listener = Arc::new(Counter::default());
        let events = EventSender::new(32);
        let config = EngineConfig::new().with_auth_timeout(Duration::from_millis(300));
        let manager = ConnectionManager::new(
            config,
            transport.clone(),
            Arc::new(dispatcher),
            store.clone(),
            events.clone(),
            pool.handle(),
            listener.clone(),
        );
        Fixture {
            _pool: pool,
            transport,
            store,
            listener,
            events,
            manager,
        }
    }

    fn eventually(check: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !check() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        true
    }

    fn settle(manager: &ConnectionManager) -> ConnectionState {
        let deadline = Instant::now() + Duration::from_secs(3);
        while manager.state().is_pending() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        manager.state()
    }

    #[test]
    fn handshake_authenticates_and_records_server() {
        let f = fixture(MockTransport::new(server), "admin");
        let mut rx = f.events.subscribe();
        f.manager.connect();

        assert!(f.manager.wait_authenticated(Duration::from_secs(3)));
        assert!(eventually(|| f.listener.authenticated.load(Ordering::SeqCst) == 1));

        let status = f.store.status().load().unwrap();
        assert_eq!(status.htsp_version, MIN_API_VERSION);
        assert_eq!(status.server_name.as_deref(), Some("Tvheadend"));

        let sent = f.transport.sent();
        assert_eq!(sent[0].method(), Some("hello"));
        assert_eq!(sent[1].method(), Some("authenticate"));
        assert_eq!(sent[1].str("username"), Some("admin"));
        assert_eq!(
            sent[1].bytes("digest").unwrap(),
            requests::authentication_digest("secret", &[1, 2, 3])
        );

        let mut states = Vec::new();
        while let Ok(crate::events::EngineEvent::Status { state, .. }) = rx.try_recv() {
            states.push(state);
        }
        assert_eq!(states, vec![SyncStatus::Connecting, SyncStatus::Connected]);
    }

    #[test]
    fn denied_access_is_bad_credentials() {
        let f = fixture(MockTransport::new(server), "intruder");
        f.manager.connect();

        assert!(!f.manager.wait_authenticated(Duration::from_secs(3)));
        assert_eq!(
            f.manager.state(),
            ConnectionState::Failed(ConnectionFailure::BadCredentials)
        );
        assert!(eventually(|| f.listener.disconnected.load(Ordering::SeqCst) == 1));
        assert_eq!(f.listener.authenticated.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn silent_server_is_generic_failure() {
        let f = fixture(MockTransport::silent(), "admin");
        f.manager.connect();

        assert_eq!(
            settle(&f.manager),
            ConnectionState::Failed(ConnectionFailure::Generic)
        );
    }

    #[test]
    fn open_failure_keeps_its_class() {
        let transport = MockTransport::new(server);
        transport.fail_open(TransportErrorKind::Resolve, "no such host");
        let f = fixture(transport, "admin");
        f.manager.connect();

        assert_eq!(
            settle(&f.manager),
            ConnectionState::Failed(ConnectionFailure::Resolve)
        );
    }

    #[test]
    fn broken_link_fails_connection() {
        let f = fixture(MockTransport::new(server), "admin");
        f.manager.connect();
        assert!(f.manager.wait_authenticated(Duration::from_secs(3)));

        f.transport.break_link(TransportErrorKind::Socket);
        assert!(eventually(|| f.listener.disconnected.load(Ordering::SeqCst) == 1));
        assert_eq!(
            f.manager.state(),
            ConnectionState::Failed(ConnectionFailure::Socket)
        );
    }

    #[test]
    fn reconnect_is_noop_while_connected() {
        let f = fixture(MockTransport::new(server), "admin");
        f.manager.connect();
        assert!(f.manager.wait_authenticated(Duration::from_secs(3)));

        f.manager.reconnect();
        assert_eq!(f.transport.open_count(), 1);

        f.manager.close();
        f.manager.reconnect();
        assert!(f.manager.wait_authenticated(Duration::from_secs(3)));
        assert_eq!(f.transport.open_count(), 2);
    }

    #[test]
    fn wait_fails_fast_without_connection() {
        let f = fixture(MockTransport::new(server), "admin");
        let started = Instant::now();
        assert!(!f.manager.wait_authenticated(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));

        f.manager.connect();
        f.manager.close();
        assert!(!f.manager.wait_authenticated(Duration::from_secs(5)));
        assert_eq!(f.manager.state(), ConnectionState::Closed);
    }

    #[test]
    fn close_is_reported_once() {
        let f = fixture(MockTransport::new(server), "admin");
        f.manager.connect();
        assert!(f.manager.wait_authenticated(Duration::from_secs(3)));

        f.manager.close();
        f.manager.close();
        assert_eq!(f.listener.disconnected.load(Ordering::SeqCst), 1);
    }
}
