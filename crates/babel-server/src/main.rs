mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use babel_api::{AppState, AppStateInner};
use babel_db::Database;
use babel_sync::oracle::WatsonxOracle;
use babel_sync::store::SqliteStore;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "babel_server=debug,babel_api=debug,babel_sync=debug,babel_db=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);
    let store = Arc::new(SqliteStore::new(db));
    let oracle = Arc::new(WatsonxOracle::new(config.watsonx.clone())?);
    info!("Translating with {} at {}", config.watsonx.model_id, config.watsonx.base_url);

    let state: AppState = Arc::new(AppStateInner::new(store, oracle));

    let app = babel_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Babel server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
