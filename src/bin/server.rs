//! Teller server binary

use teller_core::{Config, Teller};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting teller server");

    // Fee rate and exchange rates are required; missing or
    // non-positive values abort startup here.
    let config = Config::from_env()?;

    let teller = Teller::open(config).await?;
    tracing::info!("Ledger opened successfully");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down teller server");
    teller.shutdown().await?;
    Ok(())
}
