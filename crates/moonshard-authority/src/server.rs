//! WebSocket front end of the authority.
//!
//! Two endpoints share one listener:
//!
//! | Path        | Who          | Protocol                                          |
//! |-------------|--------------|---------------------------------------------------|
//! | `/auth`     | players      | `?userId=` or first text frame → `AUTH_SUCCESS:t` |
//! | `/sessions` | shard agents | `GET_SESSIONS` → JSON, `ACTIVE_TOKENS:…` → ack    |
//!
//! Closing an `/auth` socket marks its session inactive. Closing a
//! `/sessions` socket forgets that shard's last report.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use moonshard_protocol::{AuthorityReply, AuthorityRequest, SessionRecord};
use moonshard_tick::{TickConfig, Ticker};
use moonshard_transport::{
    Connection, Frame, Incoming, ServerConnection, Transport, WebSocketTransport,
};
use tokio::sync::watch;

use crate::directory::{DirectoryConfig, SessionDirectory};
use crate::AuthorityError;

/// Settings for an [`AuthorityServer`].
#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    pub bind_addr: String,
    pub directory: DirectoryConfig,
    /// How often inactive sessions are aged out and deleted.
    pub cleanup_interval: Duration,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5004".into(),
            directory: DirectoryConfig::default(),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// The session authority: a [`SessionDirectory`] behind a WebSocket
/// listener.
pub struct AuthorityServer {
    transport: WebSocketTransport,
    directory: Arc<SessionDirectory>,
    config: AuthorityConfig,
}

impl AuthorityServer {
    pub async fn bind(config: AuthorityConfig) -> Result<Self, AuthorityError> {
        let transport = WebSocketTransport::bind(&config.bind_addr).await?;
        let directory = Arc::new(SessionDirectory::new(config.directory.clone()));
        Ok(Self {
            transport,
            directory,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, AuthorityError> {
        self.transport.local_addr().map_err(AuthorityError::LocalAddr)
    }

    pub fn directory(&self) -> Arc<SessionDirectory> {
        Arc::clone(&self.directory)
    }

    /// Accepts connections until `shutdown` flips to `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), AuthorityError> {
        let addr = self.local_addr()?;
        tracing::info!(%addr, "session authority started");

        let cleanup = tokio::spawn(cleanup_loop(
            Arc::clone(&self.directory),
            self.config.cleanup_interval,
            shutdown.clone(),
        ));

        loop {
            if *shutdown.borrow() {
                break;
            }
            let conn = tokio::select! {
                _ = shutdown.changed() => break,
                accepted = self.transport.accept() => accepted,
            };
            match conn {
                Ok(incoming) => {
                    let directory = Arc::clone(&self.directory);
                    tokio::spawn(async move {
                        let conn = match incoming.handshake().await {
                            Ok(conn) => conn,
                            Err(e) => {
                                tracing::debug!(error = %e, "authority handshake failed");
                                return;
                            }
                        };
                        let id = conn.id();
                        if let Err(e) = serve(conn, directory).await {
                            tracing::debug!(conn = %id, error = %e, "authority connection ended");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "authority accept failed"),
            }
        }

        cleanup.abort();
        tracing::info!("session authority stopped");
        Ok(())
    }
}

async fn cleanup_loop(
    directory: Arc<SessionDirectory>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = Ticker::new(TickConfig::every(interval));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.wait_for_tick() => {}
        }
        let outcome = directory.run_cleanup_pass(Utc::now());
        if !outcome.aged_out.is_empty() || !outcome.deleted.is_empty() {
            tracing::info!(
                aged_out = outcome.aged_out.len(),
                deleted = outcome.deleted.len(),
                remaining = directory.len(),
                "authority cleanup"
            );
        }
        ticker.record_run_end();
    }
}

async fn serve(conn: ServerConnection, directory: Arc<SessionDirectory>) -> Result<(), AuthorityError> {
    match conn.path() {
        "/auth" => serve_auth(conn, &directory).await,
        "/sessions" => serve_sessions(conn, &directory).await,
        other => {
            tracing::debug!(path = other, "unknown authority endpoint");
            conn.send_text(&AuthorityReply::UnknownCommand.to_string()).await?;
            conn.close().await?;
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// /auth
// ---------------------------------------------------------------------------

async fn serve_auth(conn: ServerConnection, directory: &SessionDirectory) -> Result<(), AuthorityError> {
    let address = conn
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".into());

    let mut token: Option<String> = None;
    if let Some(user_id) = conn.query().and_then(|q| query_param(q, "userId")) {
        match issue(&conn, directory, &user_id, &address).await? {
            Some(t) => token = Some(t),
            None => return Ok(()),
        }
    }

    let result = auth_loop(&conn, directory, &address, &mut token).await;

    if let Some(token) = token {
        directory.mark_inactive(&token);
    }
    result
}

async fn auth_loop(
    conn: &ServerConnection,
    directory: &SessionDirectory,
    address: &str,
    token: &mut Option<String>,
) -> Result<(), AuthorityError> {
    while let Some(frame) = conn.recv().await? {
        let Frame::Text(text) = frame else {
            continue;
        };
        let text = text.trim();

        if text == "REFRESH" {
            let ok = token.as_deref().is_some_and(|t| directory.refresh(t));
            let reply = if ok {
                AuthorityReply::RefreshOk
            } else {
                AuthorityReply::RefreshFail
            };
            conn.send_text(&reply.to_string()).await?;
        } else if token.is_none() {
            match issue(conn, directory, text, address).await? {
                Some(t) => *token = Some(t),
                None => return Ok(()),
            }
        } else {
            conn.send_text(&AuthorityReply::UnknownCommand.to_string()).await?;
        }
    }
    Ok(())
}

/// Issues a token and replies. Returns `None` (after closing the socket)
/// when the user id is empty.
async fn issue(
    conn: &ServerConnection,
    directory: &SessionDirectory,
    user_id: &str,
    address: &str,
) -> Result<Option<String>, AuthorityError> {
    match directory.authenticate(user_id, address) {
        Some(issued) => {
            let token = issued.token().to_owned();
            conn.send_text(&AuthorityReply::AuthSuccess(token.clone()).to_string())
                .await?;
            Ok(Some(token))
        }
        None => {
            conn.send_text(&AuthorityReply::AuthFail("EmptyUserId".into()).to_string())
                .await?;
            conn.close().await?;
            Ok(None)
        }
    }
}

/// Looks up `key` in a raw `a=1&b=2` query string.
fn query_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        (k == key).then(|| v.to_owned())
    })
}

// ---------------------------------------------------------------------------
// /sessions
// ---------------------------------------------------------------------------

async fn serve_sessions(
    conn: ServerConnection,
    directory: &SessionDirectory,
) -> Result<(), AuthorityError> {
    let reporter = conn.id().into_inner();
    tracing::info!(conn = %conn.id(), "shard sync channel opened");

    let result = sessions_loop(&conn, directory, reporter).await;

    directory.drop_reporter(reporter);
    tracing::info!(conn = %conn.id(), "shard sync channel closed");
    result
}

async fn sessions_loop(
    conn: &ServerConnection,
    directory: &SessionDirectory,
    reporter: u64,
) -> Result<(), AuthorityError> {
    while let Some(frame) = conn.recv().await? {
        let Frame::Text(text) = frame else {
            continue;
        };
        let reply = match AuthorityRequest::parse(&text) {
            Ok(AuthorityRequest::GetSessions) => {
                SessionRecord::render_snapshot(&directory.snapshot())?
            }
            Ok(AuthorityRequest::ActiveTokens(tokens)) => {
                tracing::debug!(reporter, held = tokens.len(), "active tokens reported");
                directory.report_active(reporter, tokens);
                AuthorityReply::ActiveOk.to_string()
            }
            Err(_) => AuthorityReply::UnknownCommand.to_string(),
        };
        conn.send_text(&reply).await?;
    }
    Ok(())
}
