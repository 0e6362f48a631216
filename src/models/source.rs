// src/models/source.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::common::{impl_soft_delete, Record};
use super::price::PriceType;
use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Government,
    Market,
    Association,
    Company,
    Media,
    #[default]
    #[serde(other)]
    Other,
}

/// How often a source publishes new data. Unknown or empty strings fall back
/// to `Daily`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UpdateFrequency {
    Hourly,
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl UpdateFrequency {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Self::Hourly,
            "weekly" => Self::Weekly,
            "monthly" => Self::Monthly,
            _ => Self::Daily,
        }
    }

    /// Minimum age of `last_scraped` before the source is due again.
    pub fn threshold(self) -> Duration {
        match self {
            Self::Hourly => Duration::hours(1),
            Self::Daily => Duration::hours(24),
            Self::Weekly => Duration::hours(168),
            Self::Monthly => Duration::hours(720),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl From<String> for UpdateFrequency {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<UpdateFrequency> for String {
    fn from(f: UpdateFrequency) -> Self {
        f.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    #[default]
    Json,
    Xml,
}

/// Where and how to read prices for one feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSpec {
    pub format: PayloadFormat,
    /// Appended to the source URL.
    pub path: Option<String>,
    pub product_id: Option<i64>,
    pub location_id: Option<i64>,
    pub currency: Option<String>,
    pub unit: Option<String>,
    /// Forces the price type of every observation in the feed.
    pub price_type: Option<PriceType>,
    pub quality: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedConfig {
    Government(FeedSpec),
    Market(FeedSpec),
    Association(FeedSpec),
    Company(FeedSpec),
    Media(FeedSpec),
    Forecast(FeedSpec),
}

impl FeedConfig {
    pub fn spec(&self) -> &FeedSpec {
        match self {
            FeedConfig::Government(s)
            | FeedConfig::Market(s)
            | FeedConfig::Association(s)
            | FeedConfig::Company(s)
            | FeedConfig::Media(s)
            | FeedConfig::Forecast(s) => s,
        }
    }
}

/// Per-source scraper settings: a typed feed description, or an opaque map for
/// scrapers that interpret their own keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScraperConfig {
    Feed(FeedConfig),
    Opaque(HashMap<String, serde_json::Value>),
}

impl Default for ScraperConfig {
    fn default() -> Self {
        ScraperConfig::Opaque(HashMap::new())
    }
}

impl ScraperConfig {
    pub fn feed(&self) -> Option<&FeedConfig> {
        match self {
            ScraperConfig::Feed(f) => Some(f),
            ScraperConfig::Opaque(_) => None,
        }
    }

    /// Feed settings, or defaults for opaque configs.
    pub fn spec(&self) -> FeedSpec {
        self.feed().map(|f| f.spec().clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(flatten)]
    pub record: Record,
    pub name: String,
    pub url: String,
    #[serde(rename = "type", default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reliability: f64,
    #[serde(default)]
    pub update_frequency: UpdateFrequency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scraped: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scraper_config: ScraperConfig,
}

impl_soft_delete!(Source);

impl Source {
    pub fn id(&self) -> i64 {
        self.record.id
    }

    /// Reliability must lie in [0, 1].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(0.0..=1.0).contains(&self.reliability) {
            return Err(ValidationError::ReliabilityOutOfRange {
                source_id: self.record.id,
                value: self.reliability,
            });
        }
        Ok(())
    }

    pub fn should_scrape(&self, now: DateTime<Utc>) -> bool {
        crate::ingest::scheduler::is_due(now, self.last_scraped, self.update_frequency)
    }

    pub fn mark_scraped(&mut self, now: DateTime<Utc>) {
        self.last_scraped = Some(now);
        self.record.before_update(now);
    }

    /// Full fetch URL: base url plus the feed path, if any.
    pub fn fetch_url(&self) -> String {
        match self.scraper_config.feed().and_then(|f| f.spec().path.as_deref()) {
            Some(p) if !p.is_empty() => {
                format!("{}/{}", self.url.trim_end_matches('/'), p.trim_start_matches('/'))
            }
            _ => self.url.clone(),
        }
    }
}
