mod auth;
mod config;
mod error;
mod routes;
mod store;

use std::sync::Arc;

use config::AppConfig;
use routes::{app_router, AppState};
use store::AnalyticsStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("recall_api=info".parse()?)
                .add_directive("recall_core=info".parse()?),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting recall-api with config: {:?}", config);

    let store = AnalyticsStore::open(&config.database_path).await?;
    let state = AppState::new(config, store);
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("recall-api listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
