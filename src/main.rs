use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lorahub::application::HttpApplicationBackend;
use lorahub::gateway::GatewayBackend;
use lorahub::storage::RedisStorage;
use lorahub::{api, downlink, uplink, Client, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("lorahub v{}", env!("CARGO_PKG_VERSION"));

    info!(server = %config.redis_server, "connecting to redis");
    let storage = Arc::new(
        RedisStorage::connect(&config.redis_server, &config.redis_password).await?,
    );

    let (gateway, rx_packets) = GatewayBackend::bind(config.gw_port).await?;
    let (application, tx_packets) = HttpApplicationBackend::new();

    let client = Client::new(storage, gateway, Arc::new(application));

    tokio::spawn(uplink::run_uplink_dispatcher(client.clone(), rx_packets));
    tokio::spawn(downlink::run_downlink_dispatcher(client.clone(), tx_packets));

    let admin = tokio::spawn(api::serve(client.clone(), config.admin_port));

    info!("server running, press ctrl-c to stop");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
        res = admin => {
            res??;
        }
    }

    client.gateway_backend().close().await?;
    client.application_backend().close().await?;

    Ok(())
}
