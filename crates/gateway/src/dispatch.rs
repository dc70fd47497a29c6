use std::{collections::HashMap, future::Future, panic::AssertUnwindSafe, pin::Pin, sync::Arc};

use {
    futures::FutureExt,
    tracing::{debug, trace, warn},
};

use mcbridge_protocol::{Envelope, preview, types};

use crate::{
    connection::ServerConnection,
    error::{GatewayError, Result},
};

// ── Types ────────────────────────────────────────────────────────────────────

/// Context passed to every message handler.
pub struct HandlerContext {
    pub server_id: String,
    pub envelope: Envelope,
    /// The connection the message arrived on, for handlers that answer.
    pub connection: Arc<ServerConnection>,
}

/// A boxed async message handler.
pub type HandlerFn = Arc<
    dyn Fn(HandlerContext) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

// ── Handler registry ─────────────────────────────────────────────────────────

/// Message type → handler table, built once at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerFn>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `message_type`. Each type may be registered
    /// once; control and response types are reserved.
    pub fn register<F, Fut>(&mut self, message_type: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let message_type = message_type.into();
        if types::is_control(&message_type) || types::is_response(&message_type) {
            return Err(GatewayError::ReservedType(message_type));
        }
        if self.handlers.contains_key(&message_type) {
            return Err(GatewayError::DuplicateHandler(message_type));
        }
        self.handlers
            .insert(message_type, Arc::new(move |ctx| Box::pin(handler(ctx))));
        Ok(())
    }

    pub fn get(&self, message_type: &str) -> Option<HandlerFn> {
        self.handlers.get(message_type).cloned()
    }

    pub fn message_types(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

// ── Routing ──────────────────────────────────────────────────────────────────

/// What the dispatch layer did with one inbound frame.
pub enum Routed {
    /// Not valid JSON or not envelope-shaped; dropped.
    Malformed,
    /// Heartbeat answered with an ack.
    Heartbeat,
    /// Other control message, consumed.
    Control,
    /// Reply matched a pending request and fulfilled it.
    Fulfilled,
    /// Reply-shaped, but nothing was waiting for it.
    Unmatched,
    /// A handler is registered; the call still has to be run.
    Handler(HandlerCall),
    /// Nothing registered for this type.
    Discarded,
}

impl Routed {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::Heartbeat => "heartbeat",
            Self::Control => "control",
            Self::Fulfilled => "fulfilled",
            Self::Unmatched => "unmatched",
            Self::Handler(_) => "handler",
            Self::Discarded => "discarded",
        }
    }
}

/// Route one inbound text frame received on `conn`.
///
/// Control messages and replies are handled right here; handler invocations
/// are returned so the caller decides where they run.
pub fn route(conn: &Arc<ServerConnection>, handlers: &HandlerRegistry, raw: &str) -> Routed {
    conn.touch();
    let envelope = match Envelope::decode(raw) {
        Ok(env) => env,
        Err(e) => {
            warn!(
                server_id = %conn.server_id,
                error = %e,
                raw = %preview(raw, 200),
                "dropping malformed message"
            );
            return Routed::Malformed;
        },
    };
    trace!(server_id = %conn.server_id, message_type = %envelope.message_type, id = %envelope.id, "inbound");

    match envelope.message_type.as_str() {
        types::HEARTBEAT => {
            if let Err(e) = conn.send(&Envelope::heartbeat_ack(&envelope.id)) {
                debug!(server_id = %conn.server_id, error = %e, "heartbeat ack not sent");
            }
            return Routed::Heartbeat;
        },
        t if types::is_control(t) => return Routed::Control,
        _ => {},
    }

    if envelope.is_reply() {
        let fulfilled = envelope
            .reply_to
            .as_deref()
            .is_some_and(|id| conn.pending().fulfill(id, envelope.payload.clone()));
        if fulfilled {
            return Routed::Fulfilled;
        }
        debug!(
            server_id = %conn.server_id,
            message_type = %envelope.message_type,
            reply_to = ?envelope.reply_to,
            "dropping unmatched reply"
        );
        return Routed::Unmatched;
    }

    match handlers.get(&envelope.message_type) {
        Some(handler) => Routed::Handler(HandlerCall {
            handler,
            ctx: HandlerContext {
                server_id: conn.server_id.clone(),
                envelope,
                connection: Arc::clone(conn),
            },
        }),
        None => {
            trace!(server_id = %conn.server_id, message_type = %envelope.message_type, "no handler, discarding");
            Routed::Discarded
        },
    }
}

/// A handler bound to the message it should process.
pub struct HandlerCall {
    handler: HandlerFn,
    ctx: HandlerContext,
}

impl HandlerCall {
    pub fn message_type(&self) -> &str {
        &self.ctx.envelope.message_type
    }

    /// Run the handler. Errors and panics are turned into
    /// [`GatewayError::HandlerFailed`] and logged; they never reach the
    /// transport loop.
    pub async fn run(self) -> Result<()> {
        let message_type = self.ctx.envelope.message_type.clone();
        let server_id = self.ctx.server_id.clone();
        let handler = self.handler;
        let ctx = self.ctx;

        let outcome = AssertUnwindSafe(async move { handler(ctx).await })
            .catch_unwind()
            .await;
        let reason = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => format!("{e:#}"),
            Err(_) => "handler panicked".to_string(),
        };
        warn!(server_id = %server_id, message_type = %message_type, reason = %reason, "handler failed");
        Err(GatewayError::HandlerFailed {
            message_type,
            reason,
        })
    }
}
