// API server clippy configuration
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! CallAlly API Server
//!
//! Serves the dashboard, onboarding and auth endpoints and receives the
//! billing and voice provider webhooks.

use std::net::SocketAddr;
use std::sync::Arc;

use callally_api::{build_app, config::LogFormat, AppState, Config};
use callally_shared::{create_pool, run_migrations, MemoryTenantStore, PgTenantStore, TenantStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str =
    "info,callally_api=debug,callally_billing=debug,callally_shared=info";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    tracing::info!("Starting CallAlly API Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(
        json_logs = config.log_format == LogFormat::Json,
        "Configuration loaded"
    );

    let store: Arc<dyn TenantStore> = match config.database_url.as_deref() {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = create_pool(url).await?;
            tracing::info!("Database connection established");

            run_migrations(&pool).await?;
            Arc::new(PgTenantStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set - using in-memory store, data is lost on restart");
            Arc::new(MemoryTenantStore::new())
        }
    };

    if config.vapi.webhook_secret.is_none() {
        tracing::warn!(
            "VAPI_WEBHOOK_SECRET not set - voice webhooks are accepted without authentication"
        );
    }

    // Create application state
    let state = AppState::new(config.clone(), store)?;
    let app = build_app(state);

    // Parse bind address
    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting server on {}", addr);

    // Start the server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
