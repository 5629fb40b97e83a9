mod config;
mod database;
mod link;
mod poller;
mod station;
mod weather;

use crate::config::GatewayConfig;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = GatewayConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(config.log_filter.as_str())
        .compact()
        .init();

    let pool = match &config.database_uri {
        Some(uri) => {
            tracing::info!("Connecting to the database...");
            let pool = PgPoolOptions::new().max_connections(5).connect(uri).await?;
            tracing::info!("Database connection created!");
            Some(pool)
        }
        None => {
            tracing::warn!("DATABASE_URI not set, readings are only logged");
            None
        }
    };

    let (sender, receiver) = mpsc::channel(16);
    let store = tokio::spawn(database::store(pool, receiver));

    tracing::info!(
        "Polling {} node(s) every {}s",
        config.nodes.len(),
        config.poll_interval.as_secs()
    );
    tokio::select! {
        result = poller::run(config, sender) => result,
        result = store => result?,
    }
}
