mod config;
mod error;
mod routes;

use std::sync::Arc;

use config::AppConfig;
use relay_core::state::{LibSqlStateStore, StateStore};
use relay_core::store::Database;
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relay_api=info".parse().expect("valid directive"))
                .add_directive("relay_core=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting relay-api with config: {:?}", config);

    let db = Database::open(&config.db_path).await?;
    let state_store = match config.state_db_path.as_deref() {
        Some(path) => StateStore::LibSql(LibSqlStateStore::open(path).await?),
        None => StateStore::in_memory(),
    };

    let state = AppState::new(config.clone(), db, state_store);
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("relay-api listening on {}", config.bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
