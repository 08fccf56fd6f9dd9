//! # tvhsync testkit
//!
//! Test utilities for tvhsync.
//!
//! This crate provides:
//! - [`LoopbackBackend`], an in-process HTSP server answering from a [`Catalog`]
//! - [`TestEngine`], an engine wired to a loopback backend, a memory store
//!   and a manual clock
//! - Record builders for channels, tags, events, recordings and rules
//! - Property-based test generators using proptest
//! - Polling helpers for background work and status events
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tvhsync_testkit::prelude::*;
//!
//! #[test]
//! fn channels_are_mirrored() {
//!     let catalog = Catalog::new().with_channel(channel(101, "One", 1));
//!     let mut engine = TestEngine::new(catalog);
//!     assert!(engine.sync());
//!     assert_eq!(engine.store.channels().count().unwrap(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod catalog;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod wait;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::*;
    pub use crate::catalog::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::wait::*;
}

pub use backend::*;
pub use catalog::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use wait::*;
