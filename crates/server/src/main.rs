use anyhow::Context;
use cinemeld_server::config::ServerConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = ServerConfig::from_env();
    info!(db_path = %config.db_path, "opening database");

    let pool = cinemeld_db::open(&config.db_path)
        .await
        .context("failed to open database")?;
    info!("migrations complete");

    let state = cinemeld_server::build_state(&config, pool)
        .await
        .context("failed to initialise cache")?;
    cinemeld_server::spawn_background(&state);

    let abort = state.abort.clone();
    let app = cinemeld_server::routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .context("failed to bind")?;
    info!(addr = %config.bind, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
            abort.abort();
        })
        .await?;
    Ok(())
}
