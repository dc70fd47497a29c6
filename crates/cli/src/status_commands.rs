use {anyhow::Result, clap::Subcommand, mcbridge_client::RestClient, mcbridge_config::RestConfig};

#[derive(Clone, Copy, Subcommand)]
pub enum StatusAction {
    /// Server status (default).
    Status,
    /// Online players.
    Players,
    /// Static server information.
    Info,
    /// World information.
    World,
}

pub async fn handle_status(action: Option<StatusAction>, config: &RestConfig) -> Result<()> {
    let client = RestClient::new(config)?;
    let value = match action.unwrap_or(StatusAction::Status) {
        StatusAction::Status => client.server_status().await?,
        StatusAction::Players => client.players().await?,
        StatusAction::Info => client.server_info().await?,
        StatusAction::World => client.world_info().await?,
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
