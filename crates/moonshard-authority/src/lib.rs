//! The Moonshard session authority.
//!
//! Players authenticate here and receive an opaque token; shards poll
//! the authority for the full session list and report back which tokens
//! they still hold.
//!
//! - [`SessionDirectory`]: the in-memory session table and its cleanup
//!   rules.
//! - [`AuthorityServer`]: the `/auth` and `/sessions` WebSocket endpoints.

mod directory;
mod error;
mod server;

pub use directory::{DirectoryCleanup, DirectoryConfig, Issued, SessionDirectory};
pub use error::AuthorityError;
pub use server::{AuthorityConfig, AuthorityServer};
