use std::{sync::Arc, time::Duration};

use mcbridge_config::GatewayConfig;

use crate::{auth::Whitelist, dispatch::HandlerRegistry, registry::ConnectionRegistry};

/// Shared gateway runtime state, wrapped in Arc for use across async tasks.
pub struct GatewayState {
    /// Live peer connections by server id.
    pub registry: Arc<ConnectionRegistry>,
    pub whitelist: Whitelist,
    /// Frozen at startup; handlers are never added while serving.
    pub handlers: Arc<HandlerRegistry>,
    /// WebSocket path peers connect on, with a leading `/`.
    pub path: String,
    /// Transport ping interval; `None` disables pings and half-open detection.
    pub heartbeat: Option<Duration>,
    /// Server version string.
    pub version: String,
}

impl GatewayState {
    pub fn new(
        config: &GatewayConfig,
        registry: Arc<ConnectionRegistry>,
        handlers: HandlerRegistry,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            whitelist: Whitelist::new(config.credentials()),
            handlers: Arc::new(handlers),
            path: config.ws_path(),
            heartbeat: config.heartbeat_interval(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}
