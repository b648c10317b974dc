//! Periodic shard status reports to the gateway.

use std::time::Duration;

use moonshard_protocol::ServerInfo;
use moonshard_transport::{connect, ClientConnection, Connection};
use tokio::time::{timeout, Instant};

use crate::MoonshardError;

/// Upper bound on one gateway dial or send.
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends `server_info:{...}` frames over a persistent WebSocket.
///
/// Without a gateway URL reports are only logged. After a failure the
/// reporter waits `reconnect_delay` before dialing again. A dial or send
/// that takes longer than the gateway timeout counts as a failure.
pub struct StatusReporter {
    gateway_url: Option<String>,
    reconnect_delay: Duration,
    timeout: Duration,
    conn: Option<ClientConnection>,
    next_attempt: Option<Instant>,
}

impl StatusReporter {
    pub fn new(gateway_url: Option<String>, reconnect_delay: Duration) -> Self {
        Self {
            gateway_url,
            reconnect_delay,
            timeout: DEFAULT_GATEWAY_TIMEOUT,
            conn: None,
            next_attempt: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// A reporter that only logs.
    pub fn log_only() -> Self {
        Self::new(None, Duration::from_secs(5))
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Sends one report. Returns `Ok` without sending while waiting out
    /// the reconnect delay.
    pub async fn report(&mut self, info: &ServerInfo) -> Result<(), MoonshardError> {
        let wire = info.to_wire()?;
        let Some(url) = self.gateway_url.clone() else {
            tracing::info!(
                shard = %info.name,
                players = info.players_online,
                status = ?info.status,
                uptime_s = info.uptime_seconds,
                "status"
            );
            return Ok(());
        };

        if self.conn.is_none() {
            if self.next_attempt.is_some_and(|at| Instant::now() < at) {
                tracing::debug!(%url, "gateway reconnect delayed");
                return Ok(());
            }
            let dialed = match timeout(self.timeout, connect(&url)).await {
                Ok(dialed) => dialed.map_err(MoonshardError::from),
                Err(_) => Err(self.timed_out(&url)),
            };
            match dialed {
                Ok(conn) => {
                    tracing::info!(%url, "connected to gateway");
                    self.conn = Some(conn);
                    self.next_attempt = None;
                }
                Err(e) => {
                    self.next_attempt = Some(Instant::now() + self.reconnect_delay);
                    return Err(e);
                }
            }
        }

        let Some(conn) = &self.conn else {
            return Ok(());
        };
        let sent = match timeout(self.timeout, conn.send_text(&wire)).await {
            Ok(sent) => sent.map_err(MoonshardError::from),
            Err(_) => Err(self.timed_out(&url)),
        };
        if let Err(e) = sent {
            // Dropping the connection is enough; a close handshake could
            // stall on the same gateway.
            self.conn = None;
            self.next_attempt = Some(Instant::now() + self.reconnect_delay);
            return Err(e);
        }
        tracing::debug!(shard = %info.name, players = info.players_online, "status reported");
        Ok(())
    }

    fn timed_out(&self, url: &str) -> MoonshardError {
        MoonshardError::GatewayTimeout {
            url: url.to_owned(),
            timeout: self.timeout,
        }
    }
}
