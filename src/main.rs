//! taskman - HTTP server entry point.

use taskman::{api, config::Config, store::TaskStore};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskman=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration: database={}", config.database_url);

    // Verify the database is reachable before accepting traffic
    let store = TaskStore::connect(&config.database_url).await?;
    info!("Application startup complete");

    api::serve(config, store.clone()).await?;

    // Dispose of the connection once the server has drained
    store.close().await;
    info!("Application shutdown");
    Ok(())
}
