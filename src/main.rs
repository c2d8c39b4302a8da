use anyhow::Context;
use dotenv::dotenv;
use tracing::info;

use training_portal::{
    app::create_router,
    app_state::AppState,
    config,
    db::init_store,
    telemetry::{init_telemetry, TelemetryConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    config::init().context("Failed to load configuration")?;
    let config = config::get();

    let telemetry = init_telemetry(Some(TelemetryConfig {
        environment: config.app.environment.to_string(),
        ..TelemetryConfig::default()
    }))
    .await
    .context("Failed to initialize telemetry")?;

    let store = init_store(config.storage, &config.database).await?;

    tokio::fs::create_dir_all(&config.certificates.output_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create certificates directory {}",
                config.certificates.output_dir.display()
            )
        })?;

    let state = AppState::from_config(store, config);
    let app = create_router(state, &config.certificates.output_dir);

    let addr = config.server_addr();
    info!("{} ({}) listening on {}", config.app.name, config.app.environment, addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Failed to serve application")?;

    telemetry.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
