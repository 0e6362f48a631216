// src/ingest/store.rs
//! Entity Store seam. The pipeline only talks to `EntityStore`; `MemoryStore`
//! backs the binary and the tests.

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::StoreError;
use crate::models::{NaturalKey, Price, Product, SoftDelete, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Startup check; failure here is fatal for the binary.
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Sources, excluding soft-deleted ones unless asked.
    async fn list_sources(&self, include_deleted: bool) -> Result<Vec<Source>, StoreError>;

    /// Non-deleted sources whose refresh interval has elapsed.
    async fn due_sources(&self, now: DateTime<Utc>) -> Result<Vec<Source>, StoreError> {
        Ok(self
            .list_sources(false)
            .await?
            .into_iter()
            .filter(|s| s.should_scrape(now))
            .collect())
    }

    async fn get_source(&self, id: i64) -> Result<Source, StoreError>;

    /// Replace a source's fields. The stored deletion marker is kept.
    async fn update_source(&self, source: &Source) -> Result<(), StoreError>;

    /// Set `last_scraped` (and `updated_at`) on the stored row, leaving every
    /// other field as it is now.
    async fn mark_source_scraped(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Non-deleted products.
    async fn list_products(&self) -> Result<Vec<Product>, StoreError>;

    /// Insert, or overwrite the row with the same (source, product, observation date).
    async fn upsert_price(&self, price: Price) -> Result<UpsertOutcome, StoreError>;

    async fn prices_for_source(&self, source_id: i64) -> Result<Vec<Price>, StoreError>;
}

#[derive(Debug, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub products: Vec<Product>,
}

#[derive(Debug, Default)]
struct Inner {
    sources: BTreeMap<i64, Source>,
    products: BTreeMap<i64, Product>,
    prices: Vec<Price>,
    by_key: HashMap<NaturalKey, usize>,
    next_id: i64,
}

impl Inner {
    fn assign_id(&mut self, requested: i64) -> i64 {
        if requested > 0 {
            self.next_id = self.next_id.max(requested);
            return requested;
        }
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a JSON seed file `{ "sources": [...], "products": [...] }`.
    pub fn from_seed_file(path: &Path, now: DateTime<Utc>) -> AnyResult<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading seed data from {}", path.display()))?;
        let seed: SeedData = serde_json::from_str(&content)
            .with_context(|| format!("parsing seed data {}", path.display()))?;
        let store = Self::new();
        for s in seed.sources {
            let id = s.id();
            store
                .insert_source(s, now)
                .with_context(|| format!("seeding source {id}"))?;
        }
        for p in seed.products {
            store.insert_product(p, now)?;
        }
        Ok(store)
    }

    /// Simulate an outage: every call fails with `Unavailable` while set.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked down".into()));
        }
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store mutex poisoned".into()))
    }

    pub fn insert_source(&self, mut source: Source, now: DateTime<Utc>) -> Result<i64, StoreError> {
        source
            .validate()
            .map_err(|e| StoreError::Rejected(e.to_string()))?;
        let mut g = self.lock()?;
        let id = g.assign_id(source.record.id);
        source.record.id = id;
        source.record.before_create(now);
        g.sources.insert(id, source);
        Ok(id)
    }

    pub fn insert_product(&self, mut product: Product, now: DateTime<Utc>) -> Result<i64, StoreError> {
        let mut g = self.lock()?;
        let id = g.assign_id(product.record.id);
        product.record.id = id;
        product.record.before_create(now);
        g.products.insert(id, product);
        Ok(id)
    }

    pub fn soft_delete_source(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut g = self.lock()?;
        let s = g
            .sources
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "source", id })?;
        s.record.mark_deleted(now);
        Ok(())
    }

    pub fn price_count(&self) -> usize {
        self.lock().map(|g| g.prices.len()).unwrap_or(0)
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    async fn list_sources(&self, include_deleted: bool) -> Result<Vec<Source>, StoreError> {
        let g = self.lock()?;
        Ok(g.sources
            .values()
            .filter(|s| include_deleted || !s.is_deleted())
            .cloned()
            .collect())
    }

    async fn get_source(&self, id: i64) -> Result<Source, StoreError> {
        let g = self.lock()?;
        g.sources
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "source", id })
    }

    async fn update_source(&self, source: &Source) -> Result<(), StoreError> {
        source
            .validate()
            .map_err(|e| StoreError::Rejected(e.to_string()))?;
        let mut g = self.lock()?;
        let id = source.id();
        let slot = g
            .sources
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "source", id })?;
        let deleted_at = slot.record.deleted_at;
        *slot = source.clone();
        slot.record.deleted_at = deleted_at;
        Ok(())
    }

    async fn mark_source_scraped(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut g = self.lock()?;
        let slot = g
            .sources
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "source", id })?;
        slot.mark_scraped(now);
        Ok(())
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let g = self.lock()?;
        Ok(g.products.values().filter(|p| !p.is_deleted()).cloned().collect())
    }

    async fn upsert_price(&self, mut price: Price) -> Result<UpsertOutcome, StoreError> {
        let mut g = self.lock()?;
        let key = price.natural_key();
        if let Some(&idx) = g.by_key.get(&key) {
            let existing = &mut g.prices[idx];
            price.record.id = existing.record.id;
            price.record.created_at = existing.record.created_at;
            price.record.deleted_at = existing.record.deleted_at;
            *existing = price;
            return Ok(UpsertOutcome::Updated);
        }
        price.record.id = g.assign_id(0);
        let idx = g.prices.len();
        g.prices.push(price);
        g.by_key.insert(key, idx);
        Ok(UpsertOutcome::Inserted)
    }

    async fn prices_for_source(&self, source_id: i64) -> Result<Vec<Price>, StoreError> {
        let g = self.lock()?;
        let mut out: Vec<Price> = g
            .prices
            .iter()
            .filter(|p| p.source_id == source_id && !p.is_deleted())
            .cloned()
            .collect();
        out.sort_by_key(|p| (p.product_id, p.observation_date));
        Ok(out)
    }
}
