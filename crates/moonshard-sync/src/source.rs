//! Where session snapshots come from.
//!
//! [`SessionSource`] is the seam between the sync agent and the network.
//! The running system uses [`AuthoritySource`], a persistent WebSocket
//! channel to the authority's `/sessions` endpoint; tests plug in
//! in-memory sources.

use std::future::Future;

use moonshard_protocol::{AuthorityReply, AuthorityRequest, SessionRecord};
use moonshard_transport::{connect, ClientConnection, Connection, Frame};

use crate::SyncError;

/// A request/response channel to the session authority.
pub trait SessionSource: Send + 'static {
    /// Fetches every session the authority knows about.
    fn fetch_snapshot(
        &mut self,
    ) -> impl Future<Output = Result<Vec<SessionRecord>, SyncError>> + Send;

    /// Tells the authority which tokens this shard still holds.
    fn report_active(
        &mut self,
        tokens: Vec<String>,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;
}

// ---------------------------------------------------------------------------
// AuthoritySource
// ---------------------------------------------------------------------------

/// A [`SessionSource`] backed by a WebSocket connection to the authority.
///
/// The connection is opened lazily and dropped on any failure, so the
/// next request after an error dials again.
pub struct AuthoritySource {
    url: String,
    conn: Option<ClientConnection>,
}

impl AuthoritySource {
    /// `url` is the full endpoint, e.g. `ws://127.0.0.1:5004/sessions`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            conn: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns `true` while a channel is open.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn connection(&mut self) -> Result<&ClientConnection, SyncError> {
        if self.conn.is_none() {
            let conn = connect(&self.url)
                .await
                .map_err(|source| SyncError::UpstreamUnavailable {
                    url: self.url.clone(),
                    source,
                })?;
            tracing::info!(url = %self.url, "connected to session authority");
            self.conn = Some(conn);
        }
        self.conn.as_ref().ok_or(SyncError::ChannelClosed)
    }

    /// Sends one text request and waits for its text reply.
    async fn request(&mut self, text: String) -> Result<String, SyncError> {
        let conn = self.connection().await?;
        let result = exchange(conn, &text).await;
        if result.is_err() {
            if let Some(conn) = self.conn.take() {
                let _ = conn.close().await;
            }
        }
        result
    }
}

async fn exchange(conn: &ClientConnection, text: &str) -> Result<String, SyncError> {
    conn.send_text(text).await?;
    loop {
        match conn.recv().await? {
            Some(Frame::Text(reply)) => return Ok(reply),
            Some(Frame::Binary(data)) => {
                tracing::debug!(len = data.len(), "ignoring binary frame from authority");
            }
            None => return Err(SyncError::ChannelClosed),
        }
    }
}

impl SessionSource for AuthoritySource {
    async fn fetch_snapshot(&mut self) -> Result<Vec<SessionRecord>, SyncError> {
        let reply = self.request(AuthorityRequest::GetSessions.render()?).await?;
        Ok(SessionRecord::parse_snapshot(&reply)?)
    }

    async fn report_active(&mut self, tokens: Vec<String>) -> Result<(), SyncError> {
        let request = AuthorityRequest::ActiveTokens(tokens).render()?;
        let reply = self.request(request).await?;
        match reply.parse::<AuthorityReply>() {
            Ok(AuthorityReply::ActiveOk) => Ok(()),
            _ => Err(SyncError::UnexpectedReply(reply)),
        }
    }
}
