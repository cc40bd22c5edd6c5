use tracing::info;

use spotflow::error::{Error, Result};
use spotflow::observability::tracing::init_tracing;
use spotflow::{AppConfig, AppService};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let env = std::env::var("SPOTFLOW_ENV").unwrap_or_else(|_| "default".to_string());
    let config = AppConfig::load(&env)?;
    info!(env = %env, exchanges = config.exchanges.len(), "configuration loaded");

    let service = AppService::build(config).await?;
    service.run().await?;

    tokio::signal::ctrl_c().await.map_err(Error::ChannelIo)?;
    info!("interrupt received");
    service.shutdown().await;
    Ok(())
}
