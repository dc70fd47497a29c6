use std::{future::Future, net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::{
            ConnectInfo, Query, State, WebSocketUpgrade, ws::rejection::WebSocketUpgradeRejection,
        },
        http::StatusCode,
        response::{IntoResponse, Json, Response},
        routing::get,
    },
    serde::Deserialize,
    tokio::{net::TcpListener, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use mcbridge_config::GatewayConfig;

use crate::{
    api::Gateway, dispatch::HandlerRegistry, error::GatewayError, registry::ConnectionRegistry,
    state::GatewayState, ws::handle_connection,
};

const HEALTH_PATH: &str = "/health";

#[derive(Debug, Default, Deserialize)]
struct ConnectQuery {
    #[serde(rename = "serverId")]
    server_id: Option<String>,
    token: Option<String>,
}

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(HEALTH_PATH, get(health_handler))
        .route(&state.path, get(ws_upgrade_handler))
        .fallback(not_found_handler)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve `state` on an already bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: Arc<GatewayState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_gateway_app(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

// ── Server startup ───────────────────────────────────────────────────────────

/// A gateway accepting peers in the background.
pub struct RunningGateway {
    pub gateway: Gateway,
    pub local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
}

impl RunningGateway {
    /// Stop accepting, close every live connection, and wait for the server
    /// task to finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        let closed = self.gateway.shutdown().await;
        info!(closed, "gateway stopped");
        self.task.await?
    }
}

/// Bind the configured address and start serving.
pub async fn start_gateway(
    config: &GatewayConfig,
    registry: Arc<ConnectionRegistry>,
    handlers: HandlerRegistry,
) -> anyhow::Result<RunningGateway> {
    let state = GatewayState::new(config, Arc::clone(&registry), handlers);
    if state.path == HEALTH_PATH {
        anyhow::bail!("gateway path {HEALTH_PATH} is reserved for the health check");
    }

    let listener = TcpListener::bind((config.listen_host.as_str(), config.listen_port)).await?;
    let local_addr = listener.local_addr()?;

    // Startup banner.
    let lines = [
        format!("mcbridge gateway v{}", state.version),
        format!("listening on ws://{local_addr}{}", state.path),
        format!(
            "{} handlers registered, heartbeat {}",
            state.handlers.message_types().len(),
            match state.heartbeat {
                Some(period) => format!("{period:?}"),
                None => "off".to_string(),
            }
        ),
    ];
    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));
    log_whitelist(config, &state, local_addr.port());

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(serve(
        listener,
        Arc::clone(&state),
        shutdown.clone().cancelled_owned(),
    ));

    Ok(RunningGateway {
        gateway: Gateway::new(registry, config.request_timeout()),
        local_addr,
        shutdown,
        task,
    })
}

fn log_whitelist(config: &GatewayConfig, state: &GatewayState, port: u16) {
    if state.whitelist.is_empty() {
        warn!("no serverId/token whitelist loaded, every connect will be rejected");
        return;
    }
    info!(
        count = state.whitelist.len(),
        servers = %state.whitelist.server_ids().join(", "),
        "whitelist loaded"
    );
    for url in state
        .whitelist
        .connect_urls(&config.listen_host, port, &state.path)
    {
        info!("allowed: {url}");
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let servers = state.registry.list_server_ids().await;
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "connections": servers.len(),
        "servers": servers,
    }))
}

async fn ws_upgrade_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<ConnectQuery>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    let server_id = match state
        .whitelist
        .authorize_connect(query.server_id.as_deref(), query.token.as_deref())
    {
        Ok(id) => id,
        Err(rejection) => {
            warn!(
                remote_ip = %addr.ip(),
                server_id = query.server_id.as_deref().unwrap_or_default(),
                error = %GatewayError::Unauthorized(rejection),
                "rejected connect"
            );
            return (rejection.status(), rejection.body()).into_response();
        },
    };

    match ws {
        Ok(ws) => ws
            .on_upgrade(move |socket| handle_connection(socket, state, server_id, addr))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn not_found_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}
