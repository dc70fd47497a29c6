mod status_commands;

use std::{path::PathBuf, sync::Arc};

use {
    clap::{Parser, Subcommand},
    serde_json::Value,
    tokio::sync::mpsc,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    mcbridge_client::{BridgeClient, spawn_status_poller},
    mcbridge_config::BridgeConfig,
    mcbridge_gateway::{
        ConnectionRegistry, HandlerRegistry, InboundEvent, register_event_forwarding, start_gateway,
    },
};

#[derive(Parser)]
#[command(name = "mcbridge", about = "mcbridge: chat platform to game server bridge")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Directory to load mcbridge.{toml,yaml,json} from.
    #[arg(long, global = true, env = "MCBRIDGE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the inbound gateway game servers connect to.
    Gateway {
        /// Listen host, overriding the config file.
        #[arg(long)]
        bind: Option<String>,
        /// Listen port, overriding the config file.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Dial the configured game server and keep the connection up.
    Client,
    /// Query the game server's REST status API.
    Status {
        #[command(subcommand)]
        action: Option<status_commands::StatusAction>,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "mcbridge starting");

    if let Some(dir) = cli.config_dir.clone() {
        mcbridge_config::set_config_dir(dir);
    }
    let config = mcbridge_config::discover_and_load();

    match cli.command {
        Commands::Gateway { bind, port } => run_gateway(config, bind, port).await,
        Commands::Client => run_client(config).await,
        Commands::Status { action } => status_commands::handle_status(action, &config.rest).await,
    }
}

async fn run_gateway(
    config: BridgeConfig,
    bind: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let mut gateway_config = config.gateway;
    if let Some(bind) = bind {
        gateway_config.listen_host = bind;
    }
    if let Some(port) = port {
        gateway_config.listen_port = port;
    }

    let (events_tx, mut events_rx) = mpsc::channel(256);
    let mut handlers = HandlerRegistry::new();
    register_event_forwarding(&mut handlers, events_tx)?;

    let running = start_gateway(
        &gateway_config,
        Arc::new(ConnectionRegistry::new()),
        handlers,
    )
    .await?;

    let events = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            log_event(&event);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    let stopped = running.shutdown().await;
    events.abort();
    stopped
}

fn log_event(event: &InboundEvent) {
    match event {
        InboundEvent::Chat {
            server_id,
            player_name,
            content,
            ..
        } => info!(server_id = %server_id, player = %player_name, content = %content, "chat"),
        InboundEvent::BindCode {
            server_id,
            player_name,
            code,
            session_id,
            ..
        } => info!(
            server_id = %server_id,
            player = %player_name,
            code = %code,
            session_id = %session_id,
            "bind code issued"
        ),
    }
}

async fn run_client(config: BridgeConfig) -> anyhow::Result<()> {
    let client_config = config.client;
    if !client_config.enabled {
        warn!("client.enabled is false in config, starting anyway");
    }
    if client_config.websocket_token.is_empty() {
        warn!("client.websocket_token is empty, the server will likely reject us");
    }

    let client = BridgeClient::new(&client_config);
    for message_type in ["chat", "player_join", "player_leave", "status_response"] {
        client.register_handler(message_type, move |msg: Value| async move {
            info!(message_type, player = %msg["player"], message = %msg["message"], "received");
            Ok(())
        })?;
    }
    client.start();

    let poller = client_config
        .status_check_interval()
        .map(|period| spawn_status_poller(client.clone(), period));

    tokio::signal::ctrl_c().await?;
    client.stop().await;
    if let Some(poller) = poller {
        let _ = poller.await;
    }
    Ok(())
}
