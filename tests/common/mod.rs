// tests/common/mod.rs
#![allow(dead_code)]

use agri_price_ingest::ingest::{ExecutorConfig, FetchExecutor, Fetcher, IngestCoordinator, MemoryStore, PriceNormalizer};
use agri_price_ingest::models::{FeedConfig, FeedSpec, Product, Record, ScraperConfig, Source, UpdateFrequency};
use agri_price_ingest::FetchError;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type Coord = IngestCoordinator<MemoryStore, Arc<MockFetcher>>;

/// Scripted responses per URL. The last scripted response repeats forever.
pub struct MockFetcher {
    routes: Mutex<HashMap<String, VecDeque<Result<Vec<u8>, FetchError>>>>,
    per_url: Mutex<HashMap<String, usize>>,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
}

/// Counts a fetch as in flight until dropped, even when the fetch is abandoned.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            per_url: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = d;
        self
    }

    pub fn script(self, url: &str, responses: Vec<Result<Vec<u8>, FetchError>>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), responses.into());
        self
    }

    pub fn ok(self, url: &str, body: &str) -> Self {
        self.script(url, vec![Ok(body.as_bytes().to_vec())])
    }

    pub fn failing(self, url: &str, err: FetchError) -> Self {
        self.script(url, vec![Err(err)])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most fetches ever observed running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.per_url.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.per_url.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let _in_flight = InFlight(&self.active);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(url) {
            Some(q) if q.len() > 1 => q.pop_front().unwrap(),
            Some(q) => q.front().cloned().unwrap_or(Err(FetchError::Status(404))),
            None => Err(FetchError::Status(404)),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap()
}

pub fn exec_cfg() -> ExecutorConfig {
    ExecutorConfig {
        max_retries: 3,
        retry_delay: Duration::from_secs(5),
        request_delay: Duration::ZERO,
        concurrency: 4,
        disallowed_domains: Vec::new(),
    }
}

pub fn coordinator(store: Arc<MemoryStore>, fetcher: Arc<MockFetcher>) -> Arc<Coord> {
    Arc::new(IngestCoordinator::new(
        store,
        FetchExecutor::new(fetcher, exec_cfg()),
        PriceNormalizer::default(),
    ))
}

pub fn market_source(id: i64, url: &str, product_id: i64) -> Source {
    Source {
        record: Record {
            id,
            ..Default::default()
        },
        name: format!("market-{id}"),
        url: url.to_string(),
        reliability: 0.7,
        update_frequency: UpdateFrequency::Daily,
        scraper_config: ScraperConfig::Feed(FeedConfig::Market(FeedSpec {
            product_id: Some(product_id),
            location_id: Some(500),
            ..Default::default()
        })),
        ..Default::default()
    }
}

pub fn avocado(id: i64) -> Product {
    Product {
        record: Record {
            id,
            ..Default::default()
        },
        name: "Avocado".into(),
        unit: "kg".into(),
        ..Default::default()
    }
}
