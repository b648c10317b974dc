//! Per-connection protocol: authentication, online list, file relay.
//!
//! Each accepted connection gets its own Tokio task running
//! [`serve_connection`]. The protocol logic itself lives in
//! [`ConnectionProtocolHandler`], which never touches a socket: it takes
//! one inbound event and returns the frames to send, so it can be driven
//! directly from tests.
//!
//! ```text
//!              session_auth ok            promoted by cleanup
//! Connected ──────────────────→ Queued ─────────────────────→ Authenticated
//!     │      session_auth ok (slot free)                            │
//!     ├──────────────────────────────────────────────────────────→ │
//!     │                                                             │
//!     └── invalid token / full / protocol error ──→ Closed ←── close
//! ```
//!
//! While `Authenticated`, at most one upload is in progress.

use std::sync::Arc;

use moonshard_protocol::{ClientMessage, Codec, FileHeader, OnlineList, ServerReply};
use moonshard_session::{Admission, Authenticator};
use moonshard_transport::{Connection, ConnectionId, Frame, ServerConnection};
use tokio::sync::mpsc;

use crate::shard::{ConnectionHandle, Outbound, ShardState};
use crate::transfer::TransferState;
use crate::MoonshardError;

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Open, no valid token yet.
    Connected,
    /// Token valid, waiting in the connection queue.
    Queued { user_id: String },
    /// Token valid and holding an active slot.
    Authenticated { user_id: String },
    /// Closed; every further event is ignored.
    Closed,
}

/// Frames to send in response to one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Step {
    /// Text frames, in order.
    pub send: Vec<String>,
    /// Close the connection after sending.
    pub close: bool,
}

impl Step {
    pub fn none() -> Self {
        Self::default()
    }

    /// A single sentinel reply; terminal replies also close.
    pub fn reply(reply: ServerReply) -> Self {
        Self {
            close: reply.is_terminal(),
            send: vec![reply.to_string()],
        }
    }

    pub fn text(text: String) -> Self {
        Self {
            send: vec![text],
            close: false,
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionProtocolHandler
// ---------------------------------------------------------------------------

/// The protocol state machine of one client connection.
pub struct ConnectionProtocolHandler {
    conn_id: ConnectionId,
    state: Arc<ShardState>,
    /// Handed to the connection store so other tasks can reach us.
    outbound: mpsc::UnboundedSender<Outbound>,
    phase: Phase,
    /// Session token claimed in the shard's sessions until close.
    claimed: Option<String>,
    transfer: Option<TransferState>,
}

impl ConnectionProtocolHandler {
    pub fn new(
        conn_id: ConnectionId,
        state: Arc<ShardState>,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self {
            conn_id,
            state,
            outbound,
            phase: Phase::Connected,
            claimed: None,
            transfer: None,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    /// Returns `true` while an upload is in progress.
    pub fn transfer_in_progress(&self) -> bool {
        self.transfer.is_some()
    }

    fn user_id(&self) -> Option<&str> {
        match &self.phase {
            Phase::Queued { user_id } | Phase::Authenticated { user_id } => Some(user_id),
            Phase::Connected | Phase::Closed => None,
        }
    }

    /// Handles one text frame.
    pub async fn on_text(&mut self, text: &str) -> Step {
        if self.phase == Phase::Closed {
            return Step::none();
        }

        let msg: ClientMessage = match self.state.codec().decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(conn = %self.conn_id, error = %e, "malformed control message");
                return self.violation("malformed message");
            }
        };
        tracing::debug!(conn = %self.conn_id, kind = msg.kind(), "control message");

        match msg {
            ClientMessage::SessionAuth { token } => self.on_session_auth(&token).await,
            _ if !matches!(self.phase, Phase::Authenticated { .. }) => {
                self.violation("not authenticated")
            }
            ClientMessage::ListOnline => self.on_list_online(),
            ClientMessage::FileSendBegin {
                target_user_id,
                file_name,
                file_size,
            } => self.on_file_send_begin(target_user_id, &file_name, file_size),
            ClientMessage::FileSendComplete => self.on_file_send_complete().await,
        }
    }

    /// Handles one binary frame.
    pub fn on_binary(&mut self, data: &[u8]) {
        match &mut self.transfer {
            Some(transfer) => transfer.append(data),
            None => {
                tracing::debug!(
                    conn = %self.conn_id,
                    len = data.len(),
                    "binary frame outside a transfer, discarded"
                );
            }
        }
    }

    /// Handles a promotion out of the connection queue.
    pub fn on_promoted(&mut self) -> Step {
        let Phase::Queued { user_id } = &self.phase else {
            return Step::none();
        };
        let user_id = user_id.clone();
        tracing::info!(conn = %self.conn_id, %user_id, "promoted from queue");
        self.phase = Phase::Authenticated {
            user_id: user_id.clone(),
        };
        Step::reply(ServerReply::SessionOk(user_id))
    }

    /// Tears down the connection. Idempotent.
    ///
    /// Any upload in progress is dropped unsaved. The connection stays in
    /// the store until its grace period runs out.
    pub fn on_close(&mut self) {
        if let Some(transfer) = self.transfer.take() {
            tracing::info!(
                conn = %self.conn_id,
                file = transfer.file_name(),
                received = transfer.received(),
                "transfer discarded on close"
            );
        }
        if matches!(
            self.phase,
            Phase::Queued { .. } | Phase::Authenticated { .. }
        ) {
            self.state
                .connections()
                .mark_for_delayed_removal(&self.conn_id);
        }
        if let Some(token) = self.claimed.take() {
            self.state.sessions().release(&token);
        }
        if self.phase != Phase::Closed {
            tracing::info!(conn = %self.conn_id, user_id = ?self.user_id(), "connection closed");
        }
        self.phase = Phase::Closed;
    }

    // -- message handlers -------------------------------------------------

    async fn on_session_auth(&mut self, token: &str) -> Step {
        if self.phase != Phase::Connected {
            return self.violation("already authenticated");
        }

        let session = match self.state.sessions().authenticate(token).await {
            Ok(session) => session,
            Err(e) => {
                tracing::info!(conn = %self.conn_id, error = %e, "session rejected");
                self.phase = Phase::Closed;
                return Step::reply(ServerReply::SessionInvalid);
            }
        };

        let handle = ConnectionHandle {
            user_id: session.user_id.clone(),
            outbound: self.outbound.clone(),
        };
        let user_id = session.user_id;
        let admission = self.state.connections().try_add(self.conn_id, handle);
        if admission != Admission::Rejected {
            self.state.sessions().claim(token);
            self.claimed = Some(token.to_owned());
        }
        match admission {
            Admission::Accepted => {
                tracing::info!(conn = %self.conn_id, %user_id, "authenticated");
                self.phase = Phase::Authenticated {
                    user_id: user_id.clone(),
                };
                Step::reply(ServerReply::SessionOk(user_id))
            }
            Admission::Queued => {
                tracing::info!(conn = %self.conn_id, %user_id, "shard full, connection queued");
                self.phase = Phase::Queued { user_id };
                Step::reply(ServerReply::SessionQueued)
            }
            Admission::Rejected => {
                tracing::warn!(conn = %self.conn_id, %user_id, "shard and queue full, rejecting");
                self.phase = Phase::Closed;
                Step::reply(ServerReply::ServerFull)
            }
        }
    }

    fn on_list_online(&self) -> Step {
        let list = OnlineList {
            user_ids: self.state.online_users(),
        };
        match self.state.codec().encode(&list) {
            Ok(json) => Step::text(json),
            Err(e) => {
                tracing::error!(conn = %self.conn_id, error = %e, "failed to encode online list");
                Step::none()
            }
        }
    }

    fn on_file_send_begin(&mut self, target_user_id: String, file_name: &str, file_size: u64) -> Step {
        if self.transfer.is_some() {
            return self.violation("transfer already in progress");
        }
        match TransferState::begin(target_user_id, file_name, file_size, self.state.max_file_size()) {
            Ok(transfer) => {
                tracing::info!(
                    conn = %self.conn_id,
                    file = transfer.file_name(),
                    size = file_size,
                    target = transfer.target_user_id(),
                    "transfer started"
                );
                self.transfer = Some(transfer);
                Step::reply(ServerReply::FileReceiveReady)
            }
            Err(e) => {
                tracing::warn!(conn = %self.conn_id, error = %e, "transfer refused");
                Step::reply(ServerReply::file_failed("file too large"))
            }
        }
    }

    async fn on_file_send_complete(&mut self) -> Step {
        let Some(transfer) = self.transfer.take() else {
            return self.violation("no transfer in progress");
        };
        let target = transfer.target_user_id().to_owned();
        let file_name = transfer.file_name().to_owned();

        let bytes = match transfer.finish() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(conn = %self.conn_id, file = %file_name, error = %e, "transfer failed");
                return Step::reply(ServerReply::file_failed("Size mismatch"));
            }
        };

        let path = match self.state.files().save(&file_name, &bytes).await {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(conn = %self.conn_id, file = %file_name, error = %e, "failed to store file");
                return Step::reply(ServerReply::file_failed("storage error"));
            }
        };
        tracing::info!(conn = %self.conn_id, path = %path.display(), size = bytes.len(), "file saved");

        let from = self.user_id().unwrap_or_default().to_owned();
        if self.relay(&from, &target, &file_name, bytes) {
            tracing::info!(conn = %self.conn_id, %target, "file relayed");
            Step::reply(ServerReply::FileSent)
        } else {
            tracing::info!(conn = %self.conn_id, %target, "target not on this shard, saved only");
            Step::reply(ServerReply::FileSentServerOnly)
        }
    }

    /// Hands a finished payload to `target`'s connection task. Only this
    /// shard's connections are searched.
    fn relay(&self, from: &str, target: &str, file_name: &str, bytes: Vec<u8>) -> bool {
        let Some((_, handle)) = self.state.find_user(target) else {
            return false;
        };
        let header = FileHeader::new(from, file_name, bytes.len() as u64);
        handle.outbound.send(Outbound::File { header, bytes }).is_ok()
    }

    fn violation(&mut self, reason: &str) -> Step {
        tracing::warn!(conn = %self.conn_id, reason, "protocol violation");
        self.on_close();
        Step::reply(ServerReply::protocol_error(reason))
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

/// Runs one client connection from accept to close.
///
/// Socket errors end this connection only; they are logged by the caller
/// and never reach other connections.
pub async fn serve_connection(
    conn: ServerConnection,
    state: Arc<ShardState>,
) -> Result<(), MoonshardError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut handler = ConnectionProtocolHandler::new(conn.id(), state, tx);
    tracing::debug!(conn = %conn.id(), peer = ?conn.peer_addr(), "client connected");

    let result = drive(&conn, &mut handler, &mut rx).await;

    handler.on_close();
    let _ = conn.close().await;
    result
}

async fn drive(
    conn: &ServerConnection,
    handler: &mut ConnectionProtocolHandler,
    rx: &mut mpsc::UnboundedReceiver<Outbound>,
) -> Result<(), MoonshardError> {
    loop {
        let step = tokio::select! {
            frame = conn.recv() => match frame? {
                Some(Frame::Text(text)) => handler.on_text(&text).await,
                Some(Frame::Binary(data)) => {
                    handler.on_binary(&data);
                    Step::none()
                }
                None => return Ok(()),
            },
            Some(outbound) = rx.recv() => match outbound {
                Outbound::Promoted => handler.on_promoted(),
                Outbound::File { header, bytes } => {
                    let json = handler.state.codec().encode(&header)?;
                    conn.send_text(&json).await?;
                    conn.send_binary(&bytes).await?;
                    Step::none()
                }
            },
        };

        for text in &step.send {
            conn.send_text(text).await?;
        }
        if step.close {
            return Ok(());
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
