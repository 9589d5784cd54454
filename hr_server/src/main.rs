//! HR authentication server.
//!
//! Serves the login, session and password endpoints over HTTP, backed by
//! PostgreSQL and a shared cache.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Error;
use hr_auth::{
    AuthService,
    cache::{MemoryCache, PgCache, SharedCache},
    db::{Database, PgCredentialStore, PgRoleStore, PgSessionStore},
    otp::{NoopDispatcher, OtpDispatcher},
};
use hr_server::{
    api::{self, AppState},
    config::{CacheBackend, ServerConfig},
    logging,
    mailer::WebhookDispatcher,
    metrics,
};
use pico_args::Arguments;

const HELP: &str = "\
Run the HR authentication server

USAGE:
  hr_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:8080]
  --db-url     URL         Database connection string  [default: env DATABASE_URL]
  --cache      BACKEND     Shared cache: postgres | memory  [default: env CACHE_BACKEND or postgres]

FLAGS:
  -h, --help               Print help information

ENVIRONMENT:
  DATABASE_URL             PostgreSQL connection string
  JWT_ACCESS_SECRET        Access token signing secret (required)
  JWT_REFRESH_SECRET       Refresh token signing secret (required)
  PASSWORD_PEPPER          Password hashing pepper (required)
  TRUSTED_PROXIES          Comma-separated proxy IPs allowed to forward client addresses
  MAIL_WEBHOOK_URL         Endpoint receiving one-time codes and reset tokens
  METRICS_BIND             Prometheus exporter address
  REQUEST_TIMEOUT_SECS     Per-request deadline  [default: 30]
  (See README.md for all configuration options)
";

/// How often expired cache entries are swept
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(300);

struct Args {
    bind: Option<SocketAddr>,
    database_url: Option<String>,
    cache: Option<CacheBackend>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        bind: pargs.opt_value_from_str("--bind")?,
        database_url: pargs.opt_value_from_str("--db-url")?,
        cache: pargs.opt_value_from_str("--cache")?,
    };

    logging::init();

    let config = ServerConfig::from_env(args.bind, args.database_url, args.cache)?;
    config.validate()?;

    tracing::info!(bind = %config.bind, cache = ?config.cache_backend, "Starting HR auth server");

    let db = Database::new(&config.database)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;
    tracing::info!("Database connected successfully");
    let pool = db.pool().clone();

    let cache: Arc<dyn SharedCache> = match config.cache_backend {
        CacheBackend::Postgres => Arc::new(PgCache::new(pool.clone())),
        CacheBackend::Memory => {
            tracing::warn!("In-memory cache selected, revocations are not shared between instances");
            Arc::new(MemoryCache::new())
        }
    };

    let dispatcher: Arc<dyn OtpDispatcher> = match &config.mail_webhook_url {
        Some(url) => Arc::new(
            WebhookDispatcher::new(url.clone())
                .map_err(|e| anyhow::anyhow!("Failed to set up mail webhook: {}", e))?,
        ),
        None => {
            tracing::warn!("MAIL_WEBHOOK_URL not set, one-time codes and reset links are not delivered");
            Arc::new(NoopDispatcher)
        }
    };

    let auth = AuthService::builder(config.auth.clone())
        .cache(cache.clone())
        .credentials(Arc::new(PgCredentialStore::new(pool.clone())))
        .sessions(Arc::new(PgSessionStore::new(pool.clone())))
        .roles(Arc::new(PgRoleStore::new(pool.clone())))
        .dispatcher(dispatcher)
        .request_deadline(config.request_timeout)
        .build()?;

    tokio::spawn(purge_expired_entries(cache));

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).map_err(|e| anyhow::anyhow!(e))?;
        tracing::info!(%addr, "Prometheus exporter listening");
    }

    let state = AppState::new(auth, Some(pool))
        .with_trusted_proxies(config.trusted_proxies.clone())
        .with_request_timeout(config.request_timeout);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", config.bind, e))?;

    tracing::info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    tracing::info!("Shutting down server...");
    db.close().await;

    Ok(())
}

/// Periodically drop expired revocations, codes and rate-limit windows
async fn purge_expired_entries(cache: Arc<dyn SharedCache>) {
    let mut interval = tokio::time::interval(CACHE_PURGE_INTERVAL);
    loop {
        interval.tick().await;
        match cache.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "Purged expired cache entries"),
            Err(e) => tracing::warn!(error = %e, "Cache purge failed"),
        }
    }
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }
}
