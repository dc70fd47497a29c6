//! Gateway: WebSocket server that game servers connect into.
//!
//! Lifecycle:
//! 1. Load config, build the server id → token whitelist
//! 2. Register message handlers (event forwarding and any extras)
//! 3. Bind the HTTP listener (health check + WebSocket path)
//! 4. Per peer: authenticate on upgrade, register, dispatch frames, tear down
//!
//! Callers on the chat-platform side talk to connected servers through
//! [`api::Gateway`].

pub mod api;
pub mod auth;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod pending;
pub mod registry;
pub mod server;
pub mod state;
pub mod ws;

pub use {
    api::Gateway,
    connection::ServerConnection,
    dispatch::{HandlerContext, HandlerRegistry},
    error::{GatewayError, Result},
    events::{InboundEvent, register_event_forwarding},
    registry::ConnectionRegistry,
    server::{RunningGateway, start_gateway},
};
