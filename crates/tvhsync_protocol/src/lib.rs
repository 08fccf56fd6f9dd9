//! # tvhsync protocol
//!
//! Typed HTSP message model for tvhsync.
//!
//! This crate provides:
//! - [`HtspMessage`], a decoded key/value message, and its field [`Value`]s
//! - [`Push`], the closed set of unsolicited server messages
//! - Request builders for every command the engine issues
//! - The authentication digest
//!
//! Wire framing is not handled here; messages arrive already decoded.
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod message;
mod params;
mod push;
pub mod requests;
mod value;

pub use error::{ProtocolError, ProtocolResult};
pub use message::HtspMessage;
pub use params::{
    AutorecParams, DvrEntryParams, EpgQuery, EpgWindow, EventQuery, RemoveKind, TicketTarget,
    TimerecParams,
};
pub use push::Push;
pub use value::Value;

/// HTSP version this client asks for in `hello`.
pub const CLIENT_HTSP_VERSION: u32 = 34;

/// Lowest server version that supports the file-transfer sub-channel.
pub const MIN_FILE_TRANSFER_VERSION: u32 = 10;

/// Lowest server version that supports `updateAutorecEntry`/`updateTimerecEntry`.
pub const MIN_RULE_UPDATE_VERSION: u32 = 25;

/// Lowest server version that answers `api` requests such as `profile/list`.
pub const MIN_API_VERSION: u32 = 26;
