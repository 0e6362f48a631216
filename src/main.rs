//! Price ingestion service: binary entrypoint.
//! Loads config, seeds the entity store, and runs the periodic ingestion
//! driver until Ctrl-C.

use agri_price_ingest::config::Config;
use agri_price_ingest::ingest::{spawn_scheduler, EntityStore, HttpFetcher, IngestCoordinator, MemoryStore};
use agri_price_ingest::metrics::Metrics;
use anyhow::Context;
use chrono::Utc;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const ENV_SEED_PATH: &str = "AGRI_SEED_PATH";
const DEFAULT_SEED_PATH: &str = "config/seed.json";
const ENV_METRICS_LISTEN: &str = "METRICS_LISTEN";

/// Compact logs by default; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("agri_price_ingest=info,ingest=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = Config::load_default().context("loading configuration")?;
    tracing::info!(
        concurrency = cfg.crawler.concurrency,
        max_retries = cfg.crawler.max_retries,
        schedule_interval_secs = cfg.crawler.schedule_interval.as_secs(),
        jwt_secret_len = cfg.api.jwt_secret.len(),
        "config loaded"
    );

    let metrics = match std::env::var(ENV_METRICS_LISTEN) {
        Ok(addr) => {
            let addr: SocketAddr = addr.parse().context("parsing METRICS_LISTEN")?;
            Metrics::serve(&cfg.crawler, addr)?;
            tracing::info!(%addr, "prometheus exporter listening");
            None
        }
        Err(_) => Some(Metrics::init(&cfg.crawler)?),
    };

    let seed_path = std::env::var(ENV_SEED_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_SEED_PATH));
    let store = if seed_path.exists() {
        MemoryStore::from_seed_file(&seed_path, Utc::now())?
    } else {
        tracing::warn!(path = %seed_path.display(), "no seed file, starting with an empty store");
        MemoryStore::new()
    };
    store
        .health_check()
        .await
        .context("entity store unreachable at startup")?;
    let store = Arc::new(store);

    let fetcher = HttpFetcher::new(&cfg.crawler)?;
    let coordinator = Arc::new(IngestCoordinator::from_config(
        Arc::clone(&store),
        fetcher,
        &cfg.crawler,
    ));

    let cancel = CancellationToken::new();
    let driver = spawn_scheduler(coordinator, cfg.crawler.schedule_interval, cancel.clone());

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutdown requested");
    cancel.cancel();
    driver.await.context("joining scheduler")?;

    if let Some(m) = metrics {
        tracing::debug!(metrics = %m.render(), "final metrics");
    }
    Ok(())
}
