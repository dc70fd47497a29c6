//! Platform-neutral events produced from game-server traffic.
//!
//! `MESSAGE_FORWARD` and `BIND_CODE_ISSUED` are registered as ordinary
//! handlers; the resulting [`InboundEvent`]s go out on an `mpsc` channel for
//! the chat-platform side to consume.

use {
    serde_json::Value,
    tokio::sync::mpsc,
    tracing::{debug, info},
};

use mcbridge_protocol::{preview, types};

use crate::{
    dispatch::{HandlerContext, HandlerRegistry},
    error::Result,
};

const UNKNOWN_PLAYER: &str = "Unknown";

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// A player chat line forwarded by a game server.
    Chat {
        server_id: String,
        message_id: String,
        player_name: String,
        content: String,
    },
    /// A game server issued a binding code to one of its players.
    BindCode {
        server_id: String,
        /// `"<serverId>:<playerUuid>"`, the address for direct replies.
        session_id: String,
        code: String,
        player_uuid: String,
        player_name: String,
        expires_at: Option<i64>,
        force: bool,
    },
}

impl InboundEvent {
    pub fn server_id(&self) -> &str {
        match self {
            Self::Chat { server_id, .. } | Self::BindCode { server_id, .. } => server_id,
        }
    }
}

/// Register the `MESSAGE_FORWARD` and `BIND_CODE_ISSUED` handlers, feeding
/// `events`.
pub fn register_event_forwarding(
    handlers: &mut HandlerRegistry,
    events: mpsc::Sender<InboundEvent>,
) -> Result<()> {
    let chat_tx = events.clone();
    handlers.register(types::MESSAGE_FORWARD, move |ctx: HandlerContext| {
        let tx = chat_tx.clone();
        async move {
            if let Some(event) = chat_event(&ctx) {
                forward(&tx, event).await?;
            }
            Ok(())
        }
    })?;

    handlers.register(types::BIND_CODE_ISSUED, move |ctx: HandlerContext| {
        let tx = events.clone();
        async move {
            if let Some(event) = bind_code_event(&ctx) {
                forward(&tx, event).await?;
            }
            Ok(())
        }
    })?;
    Ok(())
}

async fn forward(tx: &mpsc::Sender<InboundEvent>, event: InboundEvent) -> anyhow::Result<()> {
    tx.send(event)
        .await
        .map_err(|_| anyhow::anyhow!("event consumer is gone"))
}

fn chat_event(ctx: &HandlerContext) -> Option<InboundEvent> {
    let env = &ctx.envelope;
    let content = env.payload_str("content").unwrap_or_default();
    if content.trim().is_empty() {
        debug!(server_id = %ctx.server_id, "ignoring empty chat forward");
        return None;
    }
    info!(
        server_id = %ctx.server_id,
        content = %preview(content.trim(), 200),
        "chat forwarded"
    );

    let source = env
        .source
        .as_ref()
        .or_else(|| env.payload.get("source"));
    Some(InboundEvent::Chat {
        server_id: ctx.server_id.clone(),
        message_id: env.id.clone(),
        player_name: player_name(source),
        content: content.to_string(),
    })
}

fn player_name(source: Option<&Value>) -> String {
    let player = source.and_then(|s| s.get("player"));
    ["name", "displayName"]
        .iter()
        .find_map(|key| {
            player
                .and_then(|p| p.get(*key))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
        })
        .unwrap_or(UNKNOWN_PLAYER)
        .to_string()
}

fn bind_code_event(ctx: &HandlerContext) -> Option<InboundEvent> {
    let env = &ctx.envelope;
    let code = env.payload_str("code").filter(|s| !s.is_empty());
    let player_uuid = env.payload_str("playerUuid").filter(|s| !s.is_empty());
    let (Some(code), Some(player_uuid)) = (code, player_uuid) else {
        debug!(server_id = %ctx.server_id, "bind code without code or player, ignoring");
        return None;
    };
    let player_name = env
        .payload_str("playerName")
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_PLAYER);

    Some(InboundEvent::BindCode {
        server_id: ctx.server_id.clone(),
        session_id: format!("{}:{player_uuid}", ctx.server_id),
        code: code.to_string(),
        player_uuid: player_uuid.to_string(),
        player_name: player_name.to_string(),
        expires_at: env.payload.get("expiresAt").and_then(Value::as_i64),
        force: env
            .payload
            .get("force")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}
