//! Outward-facing operations for the chat-platform side: request/reply
//! calls into a named game server, text delivery and shutdown.

use std::{sync::Arc, time::Duration};

use {
    serde_json::{Value, json},
    tracing::{debug, info},
};

use mcbridge_protocol::{
    BRIDGE_PLATFORM, BRIDGE_USER_NAME, Envelope, ReplyStatus, RequestKind, Target, types,
};

use crate::{
    connection::ServerConnection,
    error::{GatewayError, Result},
    registry::ConnectionRegistry,
};

/// Close reason sent to peers when the gateway stops.
pub const CLOSE_REASON_SHUTDOWN: &str = "gateway shutting down";

/// Cheap, cloneable handle over the connection registry.
#[derive(Clone)]
pub struct Gateway {
    registry: Arc<ConnectionRegistry>,
    request_timeout: Duration,
}

impl Gateway {
    pub fn new(registry: Arc<ConnectionRegistry>, request_timeout: Duration) -> Self {
        Self {
            registry,
            request_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub async fn lookup_connection(&self, server_id: &str) -> Option<Arc<ServerConnection>> {
        self.registry.get(server_id).await
    }

    pub async fn list_connected_server_ids(&self) -> Vec<String> {
        self.registry.list_server_ids().await
    }

    async fn connection(&self, server_id: &str) -> Result<Arc<ServerConnection>> {
        match self.registry.get(server_id).await {
            Some(conn) => Ok(conn),
            None => Err(GatewayError::NotConnected {
                server_id: server_id.to_string(),
                connected: self.registry.list_server_ids().await,
            }),
        }
    }

    // ── Request / reply ─────────────────────────────────────────────────

    /// Send `request_type` to `server_id` and wait up to `timeout` for the
    /// reply payload.
    pub async fn send_request(
        &self,
        server_id: &str,
        request_type: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let conn = self.connection(server_id).await?;
        conn.request(request_type, payload, timeout).await
    }

    /// Typed request with the configured default timeout.
    pub async fn request(
        &self,
        server_id: &str,
        kind: RequestKind,
        payload: Value,
    ) -> Result<ReplyStatus> {
        let reply = self
            .send_request(server_id, kind.request_type(), payload, self.request_timeout)
            .await?;
        Ok(ReplyStatus::from_payload(reply)?)
    }

    /// Confirm a binding code a player received in game.
    pub async fn send_bind_confirm(
        &self,
        server_id: &str,
        platform: &str,
        code: &str,
        account_id: &str,
    ) -> Result<ReplyStatus> {
        self.request(
            server_id,
            RequestKind::BindConfirm,
            json!({ "platform": platform, "code": code, "accountId": account_id }),
        )
        .await
    }

    /// Which player, if any, a platform account is bound to.
    pub async fn lookup_binding(
        &self,
        server_id: &str,
        platform: &str,
        account_id: &str,
    ) -> Result<ReplyStatus> {
        self.request(
            server_id,
            RequestKind::BindingLookup,
            json!({ "platform": platform, "accountId": account_id }),
        )
        .await
    }

    pub async fn query_membership(&self, server_id: &str, player_uuid: &str) -> Result<ReplyStatus> {
        self.request(
            server_id,
            RequestKind::MembershipQuery,
            json!({ "playerUuid": player_uuid }),
        )
        .await
    }

    pub async fn query_playtime(&self, server_id: &str, player_uuid: &str) -> Result<ReplyStatus> {
        self.request(
            server_id,
            RequestKind::PlaytimeQuery,
            json!({ "playerUuid": player_uuid }),
        )
        .await
    }

    /// The account a player has bound on `platform`.
    pub async fn lookup_external_account(
        &self,
        server_id: &str,
        player_uuid: &str,
        platform: &str,
    ) -> Result<ReplyStatus> {
        self.request(
            server_id,
            RequestKind::ExternalAccountLookup,
            json!({ "playerUuid": player_uuid, "platform": platform }),
        )
        .await
    }

    // ── Text delivery ───────────────────────────────────────────────────

    /// Deliver chat text into a game server, to everyone or to one player.
    /// Returns `false` when `text` is blank and nothing was sent.
    pub async fn send_text(
        &self,
        server_id: &str,
        text: &str,
        target_player: Option<&str>,
    ) -> Result<bool> {
        if text.trim().is_empty() {
            return Ok(false);
        }
        let conn = self.connection(server_id).await?;
        let target = match target_player.filter(|p| !p.is_empty()) {
            Some(uuid) => Target::player(uuid),
            None => Target::Broadcast,
        };
        let envelope = Envelope::new(types::MESSAGE_INCOMING, incoming_payload(text)).with_target(target);
        conn.send(&envelope)?;
        debug!(server_id, id = %envelope.id, "text delivered");
        Ok(true)
    }

    /// Like [`send_text`](Self::send_text), addressed by session id:
    /// `"serverId"` broadcasts, `"serverId:playerUuid"` goes to one player.
    pub async fn send_to_session(&self, session_id: &str, text: &str) -> Result<bool> {
        let (server_id, player) = parse_session_id(session_id);
        self.send_text(server_id, text, player).await
    }

    // ── Shutdown ────────────────────────────────────────────────────────

    /// Close every live connection and fail their pending requests.
    /// Returns how many connections were closed.
    pub async fn shutdown(&self) -> usize {
        let connections = self.registry.drain().await;
        for conn in &connections {
            conn.close(CLOSE_REASON_SHUTDOWN);
            let failed = conn.teardown();
            info!(
                server_id = %conn.server_id,
                conn_id = %conn.conn_id,
                failed_pending = failed,
                "connection closed for shutdown"
            );
        }
        connections.len()
    }
}

fn incoming_payload(text: &str) -> Value {
    json!({
        "content": text,
        "source": { "platform": BRIDGE_PLATFORM, "userName": BRIDGE_USER_NAME },
        "platform": BRIDGE_PLATFORM,
        "username": BRIDGE_USER_NAME,
    })
}

/// Split a session id into server id and optional player uuid.
pub fn parse_session_id(session_id: &str) -> (&str, Option<&str>) {
    match session_id.split_once(':') {
        Some((server, player)) if !player.is_empty() => (server, Some(player)),
        Some((server, _)) => (server, None),
        None => (session_id, None),
    }
}
