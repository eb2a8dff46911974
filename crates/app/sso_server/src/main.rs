//! SSO API server binary.

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use sso_api::config::ApiConfig;
use sso_core::cache::Cache;
use sso_core::cache::memory::MemoryCache;
use sso_core::email::LogMailer;
use sso_core::orchestrator::Authenticator;
use sso_core::secrets::TokenCipher;
use sso_core::store::postgres::PgStore;
use tracing::{info, warn};

/// CLI arguments. Flags override the environment.
#[derive(Parser, Debug)]
#[command(name = "sso_server", about = "SSO API server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3100")]
    bind_addr: String,

    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL", default_value = "postgres://localhost:5432/sso")]
    database_url: String,

    /// Redis URL for the shared cache. The in-process cache is used when unset.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 10)]
    max_connections: u32,

    /// Timeout for outbound identity provider and captcha requests, in seconds.
    #[arg(long, default_value_t = 10)]
    http_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,sso_api=debug,sso_core=debug")
            }),
        )
        .init();

    let args = Args::parse();
    let mut config = ApiConfig::from_env();
    config.bind_addr = args.bind_addr;
    config.database_url = args.database_url;
    config.redis_url = args.redis_url.filter(|u| !u.is_empty());

    info!(bind_addr = %config.bind_addr, "starting sso_server");

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.database_url)
        .await?;

    info!("running database migrations");
    sso_core::migrate::migrate(&pool).await?;

    let store = Arc::new(PgStore::new(
        pool,
        TokenCipher::new(&config.token_encryption_key),
    ));
    let cache = build_cache(config.redis_url.as_deref()).await?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.http_timeout_secs))
        .build()?;
    let mailer = Arc::new(LogMailer::new(config.auth.service_name.clone()));

    let auth = Authenticator::from_config(config.auth, store, cache, mailer, http)?;
    let app = sso_api::router(sso_api::AppState::new(auth));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutting down");
    })
    .await?;

    Ok(())
}

/// Redis when configured, the in-process cache otherwise.
#[cfg(feature = "redis")]
async fn build_cache(redis_url: Option<&str>) -> Result<Arc<dyn Cache>, Box<dyn Error>> {
    if let Some(url) = redis_url {
        let cache = sso_core::cache::redis::RedisCache::connect(url).await?;
        info!("using redis cache");
        return Ok(Arc::new(cache));
    }
    Ok(memory_cache())
}

#[cfg(not(feature = "redis"))]
async fn build_cache(redis_url: Option<&str>) -> Result<Arc<dyn Cache>, Box<dyn Error>> {
    if redis_url.is_some() {
        warn!("REDIS_URL is set but redis support is not compiled in");
    }
    Ok(memory_cache())
}

fn memory_cache() -> Arc<dyn Cache> {
    let cache = Arc::new(MemoryCache::new());
    cache.spawn_cleanup_task(Duration::from_secs(60));
    info!("using in-process cache");
    cache
}
