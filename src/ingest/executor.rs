// src/ingest/executor.rs
//! Network side of a cycle: resolve the URL, check policy, fetch with bounded
//! fixed-delay retries under a global throttle and concurrency ceiling.

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::CrawlerConfig;
use crate::error::FetchError;
use crate::ingest::robots::{RobotsCache, RobotsRules};
use crate::models::Source;

/// One raw GET. Implementations report transport problems as retryable
/// `FetchError`s and policy refusals as non-retryable ones.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
    fn name(&self) -> &'static str;
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        (**self).fetch(url).await
    }
    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// reqwest-backed fetcher with optional robots.txt enforcement.
pub struct HttpFetcher {
    client: Client,
    user_agent: String,
    timeout: Duration,
    respect_robots: bool,
    robots: RobotsCache,
}

impl HttpFetcher {
    pub fn new(cfg: &CrawlerConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Network(format!("building http client: {e}")))?;
        Ok(Self {
            client,
            user_agent: cfg.user_agent.clone(),
            timeout: cfg.request_timeout,
            respect_robots: cfg.respect_robots_txt,
            robots: RobotsCache::new(),
        })
    }

    /// Rules for the URL's origin. 2xx and 4xx answers are cached; anything
    /// else is returned as an error so the feed is not requested on this attempt.
    async fn robots_for(&self, url: &Url) -> Result<RobotsRules, FetchError> {
        let origin = url.origin().ascii_serialization();
        if let Some(rules) = self.robots.get(&origin).await {
            return Ok(rules);
        }
        let robots_url = format!("{origin}/robots.txt");
        match self.get(&robots_url).await {
            Ok(body) => {
                let rules = RobotsRules::parse(&String::from_utf8_lossy(&body), &self.user_agent);
                self.robots.put(&origin, rules.clone()).await;
                Ok(rules)
            }
            // No robots.txt: everything is allowed.
            Err(FetchError::Status(code)) if (400..500).contains(&code) => {
                let rules = RobotsRules::default();
                self.robots.put(&origin, rules.clone()).await;
                Ok(rules)
            }
            Err(e) => {
                tracing::warn!(target: "ingest", %origin, error = %e, "robots.txt unavailable");
                Err(e)
            }
        }
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let resp = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = resp.bytes().await.map_err(map_reqwest_error)?;
        Ok(body.to_vec())
    }
}

fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(e.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        if self.respect_robots {
            let rules = self.robots_for(&parsed).await?;
            if !rules.is_allowed(parsed.path()) {
                return Err(FetchError::RobotsDisallowed(parsed.path().to_string()));
            }
        }
        self.get(url).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub request_delay: Duration,
    pub concurrency: usize,
    pub disallowed_domains: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from(&CrawlerConfig::default())
    }
}

impl From<&CrawlerConfig> for ExecutorConfig {
    fn from(c: &CrawlerConfig) -> Self {
        Self {
            max_retries: c.max_retries,
            retry_delay: c.retry_delay,
            request_delay: c.request_delay,
            concurrency: c.concurrency.max(1),
            disallowed_domains: c
                .disallowed_domains
                .iter()
                .map(|d| d.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchOutput {
    pub url: String,
    pub body: Vec<u8>,
    pub attempts: u32,
}

pub struct FetchExecutor<F> {
    fetcher: F,
    cfg: ExecutorConfig,
    slots: Semaphore,
    next_start: Mutex<Option<Instant>>,
}

impl<F: Fetcher> FetchExecutor<F> {
    pub fn new(fetcher: F, cfg: ExecutorConfig) -> Self {
        let slots = Semaphore::new(cfg.concurrency.max(1));
        Self {
            fetcher,
            cfg,
            slots,
            next_start: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.cfg
    }

    /// Fetch the source's feed. Makes at most `max_retries + 1` attempts, sleeping
    /// `retry_delay` between them. Never touches the source record.
    pub async fn execute(
        &self,
        source: &Source,
        cancel: &CancellationToken,
    ) -> Result<FetchOutput, FetchError> {
        let url = source.fetch_url();
        self.check_domain(&url)?;

        let max_attempts = self.cfg.max_retries.saturating_add(1);
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            attempt += 1;

            let res = self.attempt(&url, cancel).await;
            match res {
                Ok(body) => {
                    return Ok(FetchOutput {
                        url,
                        body,
                        attempts: attempt,
                    })
                }
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(e) if !e.is_retryable() => {
                    counter!("ingest_fetch_failures_total").increment(1);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        target: "ingest",
                        source_id = source.id(),
                        attempt,
                        max_attempts,
                        error = %e,
                        "fetch attempt failed"
                    );
                    if attempt >= max_attempts {
                        counter!("ingest_fetch_failures_total").increment(1);
                        return Err(FetchError::Exhausted {
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                        _ = tokio::time::sleep(self.cfg.retry_delay) => {}
                    }
                }
            }
        }
    }

    async fn attempt(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>, FetchError> {
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            p = self.slots.acquire() => p.map_err(|_| FetchError::Cancelled)?,
        };
        tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            _ = self.throttle() => {}
        }

        counter!("ingest_fetch_attempts_total").increment(1);
        let t0 = std::time::Instant::now();
        let res = tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            r = self.fetcher.fetch(url) => r,
        };
        histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        res
    }

    /// Reserve the next request start, spacing starts by `request_delay`.
    async fn throttle(&self) {
        if self.cfg.request_delay.is_zero() {
            return;
        }
        let start = {
            let mut next = self.next_start.lock().await;
            let now = Instant::now();
            let start = match *next {
                Some(t) if t > now => t,
                _ => now,
            };
            *next = Some(start + self.cfg.request_delay);
            start
        };
        tokio::time::sleep_until(start).await;
    }

    fn check_domain(&self, url: &str) -> Result<(), FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?
            .to_ascii_lowercase();
        if is_blocked(&host, &self.cfg.disallowed_domains) {
            tracing::info!(target: "ingest", %host, "skipping disallowed domain");
            return Err(FetchError::DisallowedDomain(host));
        }
        Ok(())
    }
}

/// `host` matches a blocked domain exactly or as a subdomain of it.
pub fn is_blocked(host: &str, blocked: &[String]) -> bool {
    blocked.iter().any(|d| {
        host == d
            || host
                .strip_suffix(d.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}
