//! # tvhsync engine
//!
//! Keeps a local store in sync with a tvheadend backend over HTSP.
//!
//! This crate provides:
//! - A message dispatcher correlating replies by sequence number and
//!   serializing server pushes onto one lane
//! - A connection manager running the hello/authenticate handshake
//! - A sync coordinator buffering the initial sync and flushing it in
//!   dependency order
//! - An icon cache fetching, downsampling and storing channel icons
//! - Default playback and recording profile selection
//! - The [`Engine`] command surface
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tvhsync_engine::{Engine, EngineConfig, MockTransport};
//! use tvhsync_store::{ConnectionSettings, MemoryStore};
//!
//! let settings = ConnectionSettings::new("living room", "tvh.local", 9982);
//! let store = Arc::new(MemoryStore::new(settings));
//! let engine = Engine::new(EngineConfig::new(), store, Arc::new(MockTransport::silent())).unwrap();
//! assert!(!engine.connection_state().is_connected());
//! engine.shutdown();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod buffer;
mod clock;
mod commands;
mod config;
mod connection;
mod coordinator;
mod dispatcher;
mod engine;
mod error;
mod events;
mod icons;
mod pool;
mod profiles;
pub mod reconcile;
mod signal;
mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use commands::Ticket;
pub use config::EngineConfig;
pub use connection::{ConnectionFailure, ConnectionListener, ConnectionState};
pub use coordinator::SyncPhase;
pub use dispatcher::{Dispatcher, PushHandler, ResponseCallback};
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, EngineResult, TransportError, TransportErrorKind};
pub use events::{EngineEvent, SyncStatus};
pub use icons::{
    cache_key, sample_factor, transcode, HtspFileFetcher, HttpFetcher, IconCache, IconFetcher,
};
pub use pool::{PoolHandle, ScheduledJob, WorkerPool};
pub use profiles::{ProfileDefaulter, DEFAULT_RECORDING_PROFILE};
pub use signal::{Completion, Countdown};
pub use transport::{Link, MockTransport, Responder, Transport};
