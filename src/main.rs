use anyhow::Context;
use tracing_subscriber::EnvFilter;

use docx2pdf_server::config::AppConfig;
use docx2pdf_server::routes;
use docx2pdf_server::services::sweeper;
use docx2pdf_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    tracing::info!(
        "Configuration loaded (env: {}, work dir: {})",
        std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into()),
        config.storage.work_dir.display()
    );

    let index = config.server.static_dir.join("index.html");
    if !index.is_file() {
        tracing::warn!(
            "{} not found, the browser client will not be served",
            index.display()
        );
    }

    let state = AppState::new(config.clone())
        .await
        .context("Failed to initialise conversion state")?;

    sweeper::spawn(
        state.store.clone(),
        state.orchestrator.clone(),
        state.retention_policy(),
        config.retention.sweep_interval(),
    );
    tracing::info!(
        "Retention: artifacts older than {}s are removed every {}s",
        config.retention.max_age_secs,
        config.retention.sweep_interval().as_secs()
    );

    let app = routes::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
