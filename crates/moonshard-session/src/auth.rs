//! Authentication hook for validating a client's session token.
//!
//! The connection handler does not know where sessions come from. It
//! calls an [`Authenticator`], and in a running shard that is
//! [`ShardSessions`](crate::ShardSessions), which answers from the
//! snapshot-synced store. Tests substitute their own implementation.

use std::future::Future;
use std::sync::Arc;

use crate::{Session, SessionError};

/// Validates a client's session token and returns the session.
///
/// # Trait bounds
///
/// - `Send + Sync` → shared by every connection task of a shard.
/// - The returned future is `Send` so handlers calling it can be spawned
///   on the multi-threaded runtime.
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use moonshard_session::{Authenticator, Session, SessionError};
///
/// /// Accepts any non-empty token and uses it as the user id.
/// struct DevAuthenticator;
///
/// impl Authenticator for DevAuthenticator {
///     async fn authenticate(&self, token: &str) -> Result<Session, SessionError> {
///         if token.is_empty() {
///             return Err(SessionError::AuthFailed("empty token".into()));
///         }
///         Ok(Session {
///             token: token.to_owned(),
///             user_id: token.to_owned(),
///             created_at: Utc::now(),
///             client_address: String::new(),
///         })
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Validates `token`.
    ///
    /// # Returns
    /// - `Ok(Session)`: the token is admitted on this shard
    /// - `Err(SessionError)`: unknown, foreign, queued, or retiring token
    fn authenticate(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Session, SessionError>> + Send;
}

impl<A: Authenticator> Authenticator for Arc<A> {
    fn authenticate(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Session, SessionError>> + Send {
        (**self).authenticate(token)
    }
}
