// src/metrics.rs
use anyhow::{Context, Result};
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

use crate::config::CrawlerConfig;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and publish static crawler settings.
    /// Scrape output is available through `render`.
    pub fn init(crawler: &CrawlerConfig) -> Result<Self> {
        // Use default buckets to avoid API differences across crate versions.
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        publish_static(crawler);
        Ok(Self { handle })
    }

    /// Install the recorder together with the exporter's own HTTP listener.
    /// Must be called inside a Tokio runtime.
    pub fn serve(crawler: &CrawlerConfig, addr: SocketAddr) -> Result<()> {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .with_context(|| format!("prometheus: listen on {addr}"))?;
        publish_static(crawler);
        Ok(())
    }

    /// Prometheus exposition text.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn publish_static(crawler: &CrawlerConfig) {
    crate::ingest::ensure_metrics_described();
    gauge!("ingest_concurrency_limit").set(crawler.concurrency as f64);
    gauge!("ingest_max_retries").set(crawler.max_retries as f64);
}
