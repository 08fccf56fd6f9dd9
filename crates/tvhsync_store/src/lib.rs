//! # tvhsync store
//!
//! Domain records mirrored from a TV backend, and the repository contract
//! the sync engine writes them through.
//!
//! This crate provides:
//! - Entity records: channels, tags, programs, recordings, recording rules,
//!   server profiles, server status and connection settings
//! - Repository traits per entity type, plus the [`Store`] aggregate
//! - [`MemoryStore`], a thread-safe in-memory implementation
//!
//! One store instance holds the data of exactly one backend connection.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod model;
mod repository;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryRepository, MemoryStore, Snapshot};
pub use model::{
    Channel, ChannelTag, ConnectionSettings, Entity, ProfileKind, Program, Recording,
    SeriesRecordingRule, ServerProfile, ServerStatus, TagChannel, TimerRecordingRule,
};
pub use repository::{
    ProfileRepository, ProgramRepository, Repository, SettingsRepository, StatusRepository,
    Store, TagChannelRepository,
};
