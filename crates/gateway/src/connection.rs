use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    serde_json::Value,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use mcbridge_protocol::{Envelope, now_ms};

use crate::{
    error::{GatewayError, Result},
    pending::{Expired, PendingTable},
};

/// Normal closure status code.
pub const CLOSE_NORMAL: u16 = 1000;

/// A frame queued for the connection's write loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

// ── Server connection ────────────────────────────────────────────────────────

/// One live, authenticated peer session.
///
/// The transport itself is owned by the read/write loops in [`crate::ws`];
/// this handle only queues frames for the writer and tracks replies.
#[derive(Debug)]
pub struct ServerConnection {
    /// Unique per transport session, used to tell an evicted connection from
    /// its replacement.
    pub conn_id: String,
    pub server_id: String,
    pub connected_at: Instant,
    sender: mpsc::UnboundedSender<Outbound>,
    pending: PendingTable,
    last_seen_ms: AtomicI64,
    shutdown: CancellationToken,
}

impl ServerConnection {
    /// Create a connection handle and the receiving end its write loop drains.
    pub fn new(server_id: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (sender, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            conn_id: uuid::Uuid::new_v4().to_string(),
            server_id: server_id.into(),
            connected_at: Instant::now(),
            sender,
            pending: PendingTable::new(),
            last_seen_ms: AtomicI64::new(now_ms()),
            shutdown: CancellationToken::new(),
        });
        (conn, rx)
    }

    /// Queue an envelope for the peer.
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        let frame = envelope.encode()?;
        if self.sender.send(Outbound::Text(frame)).is_err() {
            return Err(GatewayError::ConnectionLost {
                server_id: self.server_id.clone(),
                request_type: envelope.message_type.clone(),
            });
        }
        Ok(())
    }

    /// Send a request and wait for the matching reply, the deadline, or the
    /// loss of this connection, whichever comes first.
    ///
    /// The pending entry is removed on every path, including when the
    /// calling future is dropped mid-wait.
    pub async fn request(
        &self,
        request_type: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let envelope = Envelope::new(request_type, payload);
        let lost = || GatewayError::ConnectionLost {
            server_id: self.server_id.clone(),
            request_type: request_type.to_string(),
        };

        let (_guard, mut rx) = self
            .pending
            .register(&envelope.id, request_type)
            .map_err(|_| lost())?;
        self.send(&envelope)?;
        debug!(
            server_id = %self.server_id,
            request_type,
            id = %envelope.id,
            "request sent"
        );

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(lost()),
            Err(_) => match self.pending.expire(&envelope.id, rx).await {
                Expired::TimedOut => {
                    warn!(
                        server_id = %self.server_id,
                        request_type,
                        id = %envelope.id,
                        ?timeout,
                        "request timed out"
                    );
                    Err(GatewayError::Timeout {
                        server_id: self.server_id.clone(),
                        request_type: request_type.to_string(),
                        timeout,
                    })
                },
                Expired::Replied(reply) => Ok(reply),
                Expired::Lost => Err(lost()),
            },
        }
    }

    /// Ask the write loop to close the transport with `reason`.
    pub fn close(&self, reason: &str) {
        let queued = self.sender.send(Outbound::Close {
            code: CLOSE_NORMAL,
            reason: reason.to_string(),
        });
        if queued.is_err() {
            self.shutdown.cancel();
        }
    }

    /// Stop the loops and fail every pending request as connection-lost.
    /// Returns the number of callers that were still waiting.
    pub fn teardown(&self) -> usize {
        self.shutdown.cancel();
        self.pending.fail_all()
    }

    pub fn touch(&self) {
        self.last_seen_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn last_seen_ms(&self) -> i64 {
        self.last_seen_ms.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    /// Token cancelled when the connection shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
