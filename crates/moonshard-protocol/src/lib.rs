//! Wire protocol for Moonshard.
//!
//! This crate defines everything that travels over a connection, for all
//! three kinds of peers in the system:
//!
//! - **Client traffic** ([`ClientMessage`], [`ServerReply`],
//!   [`FileHeader`], [`OnlineList`]): JSON control messages in text
//!   frames, plain-text sentinel replies, and the header that precedes a
//!   relayed file.
//! - **Authority traffic** ([`SessionRecord`], [`AuthorityRequest`],
//!   [`AuthorityReply`]): the session snapshot pulled by every shard.
//! - **Status traffic** ([`ServerInfo`]): the periodic shard report.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) and [`ProtocolError`].
//!
//! # Architecture
//!
//! The protocol layer sits between transport (frames) and the shard
//! (sessions, connections). It does not know about sockets or stores;
//! it only parses and renders messages.
//!
//! ```text
//! Transport (Frame) → Protocol (ClientMessage / ServerReply) → Shard
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod authority;
mod codec;
mod error;
mod reply;
mod status;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use authority::{AuthorityReply, AuthorityRequest, SessionRecord};
pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use reply::ServerReply;
pub use status::{ServerInfo, ServerStatus, SERVER_VERSION};
pub use types::{ClientMessage, FileHeader, OnlineList};
