//! Storefront checkout service

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_checkout::api::{self, AppState};
use storefront_checkout::config::Config;
use storefront_checkout::gateway::MockGateway;
use storefront_checkout::repository::{MemoryStore, PgStore};
use storefront_checkout::services::Repositories;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let repos = match &config.database_url {
        Some(url) => Repositories::from_store(Arc::new(PgStore::connect(url).await?)),
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage");
            Repositories::from_store(Arc::new(MemoryStore::new()))
        }
    };

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, events will not be published");
                None
            }
        },
        None => None,
    };

    let gateway = Arc::new(MockGateway::new(config.mock_gateway_base_url.clone()));
    let state = AppState::build(repos, gateway, nats, config.payment_settings());
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(%addr, currency = %config.currency, "storefront checkout listening");
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, app).await?;
    Ok(())
}
