use axum::routing::{get, post, put};
use axum::Router;
use tracing_subscriber::EnvFilter;

use geoark_search::api;
use geoark_search::config::Config;
use geoark_search::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(
        "Catalog database: {}:{}/{}",
        config.db.host,
        config.db.port,
        config.db.database
    );
    tracing::info!("LLM provider: {} ({})", config.llm.provider, config.llm.base_url);

    // Connect failure here is fatal; everything past this point degrades
    // instead of aborting.
    let state = AppState::new(config.clone()).await?;
    let store = state.store.clone();

    let app = Router::new()
        .route("/api/health", get(api::catalog::health))
        .route("/api/search", post(api::search::search))
        .route("/api/decompose", post(api::search::decompose))
        .route("/api/metadata/search", post(api::catalog::metadata_search))
        .route("/api/columns/search", post(api::catalog::column_search))
        .route("/api/tables/{table}/sample", get(api::catalog::table_sample))
        .route("/api/tables/{table}/stats", get(api::catalog::table_stats))
        .route("/api/join", post(api::catalog::join))
        .route("/api/features", post(api::catalog::features))
        .route("/api/config", get(api::config::get_config))
        .route("/api/config", put(api::config::update_config))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
