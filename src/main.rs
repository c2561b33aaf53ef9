use anyhow::Result;
use log::info;

use chatrelay::config::AppConfig;
use chatrelay::shared::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env();
    config.log_summary();

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::initialize(config)?;
    let app = chatrelay::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("chatrelay listening on {bind_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
