// src/ingest/normalize.rs
//! Raw feed payload → validated `Price` rows.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use quick_xml::de::from_str as xml_from_str;
use serde::Deserialize;
use std::collections::HashSet;

use crate::error::{NormalizeError, ValidationError};
use crate::models::{
    FeedConfig, PayloadFormat, Price, PriceType, Product, Record, Source, SourceType,
};

/// ISO-4217 codes we accept. Not exhaustive; covers the markets we ingest from.
static CURRENCIES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "USD", "EUR", "GBP", "JPY", "CNY", "CHF", "CAD", "AUD", "NZD", "SEK", "NOK", "DKK",
        "PLN", "CZK", "HUF", "RON", "BGN", "TRY", "RUB", "UAH", "INR", "PKR", "BDT", "LKR",
        "IDR", "MYR", "THB", "VND", "PHP", "SGD", "HKD", "KRW", "TWD", "BRL", "ARS", "CLP",
        "COP", "PEN", "BOB", "PYG", "UYU", "MXN", "GTQ", "HNL", "NIO", "CRC", "DOP", "ZAR",
        "NGN", "GHS", "KES", "UGX", "TZS", "ETB", "XOF", "XAF", "MAD", "EGP", "ILS", "SAR",
        "AED", "QAR", "KWD",
    ]
    .into_iter()
    .collect()
});

pub fn is_known_currency(code: &str) -> bool {
    CURRENCIES.contains(code)
}

/// One observation as it appears in a feed, before validation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Observation {
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default, alias = "date")]
    pub observation_date: Option<String>,
    #[serde(default)]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub location_id: Option<i64>,
    #[serde(default)]
    pub price_type: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonPayload {
    List(Vec<Observation>),
    Wrapped { prices: Vec<Observation> },
    Single(Observation),
}

#[derive(Deserialize)]
struct XmlPayload {
    #[serde(rename = "price", default)]
    price: Vec<Observation>,
}

/// Decode a payload into observations without validating them.
pub fn parse_observations(
    raw: &[u8],
    format: PayloadFormat,
) -> Result<Vec<Observation>, NormalizeError> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| NormalizeError::Payload(format!("payload is not utf-8: {e}")))?;
    if text.trim().is_empty() {
        return Err(NormalizeError::Payload("empty payload".into()));
    }
    match format {
        PayloadFormat::Json => {
            let p: JsonPayload = serde_json::from_str(text)
                .map_err(|e| NormalizeError::Payload(format!("json: {e}")))?;
            Ok(match p {
                JsonPayload::List(v) => v,
                JsonPayload::Wrapped { prices } => prices,
                JsonPayload::Single(o) => vec![o],
            })
        }
        PayloadFormat::Xml => {
            let p: XmlPayload = xml_from_str(text)
                .map_err(|e| NormalizeError::Payload(format!("xml: {e}")))?;
            Ok(p.price)
        }
    }
}

/// Accepts RFC 3339, RFC 2822, `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DD` (midnight UTC).
pub fn parse_observation_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(ndt.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| ndt.and_utc())
}

#[derive(Debug, Default)]
pub struct Normalized {
    pub prices: Vec<Price>,
    pub rejected: Vec<ValidationError>,
    /// Observations that belong to other products.
    pub ignored: usize,
}

#[derive(Debug, Clone)]
pub struct PriceNormalizer {
    clock_skew: chrono::Duration,
}

impl Default for PriceNormalizer {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(300))
    }
}

impl PriceNormalizer {
    pub fn new(clock_skew: std::time::Duration) -> Self {
        Self {
            clock_skew: chrono::Duration::from_std(clock_skew)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
        }
    }

    /// Parse and validate in one step. Untagged observations only count for
    /// `product` when the feed names it.
    pub fn normalize(
        &self,
        raw: &[u8],
        source: &Source,
        product: &Product,
        now: DateTime<Utc>,
    ) -> Result<Normalized, NormalizeError> {
        let format = source.scraper_config.spec().format;
        let obs = parse_observations(raw, format)?;
        self.normalize_observations(&obs, source, product, now)
    }

    /// Validate the observations that belong to `product`. Invalid ones are
    /// dropped and reported; if none survive, the first error is returned.
    pub fn normalize_observations(
        &self,
        observations: &[Observation],
        source: &Source,
        product: &Product,
        now: DateTime<Utc>,
    ) -> Result<Normalized, NormalizeError> {
        let default = source.scraper_config.feed().and_then(|f| f.spec().product_id);
        self.normalize_for(
            observations,
            source,
            std::slice::from_ref(product),
            default,
            now,
        )
    }

    /// Assign every observation to exactly one of `products`. Untagged
    /// observations go to the feed's product, or to the only product there is;
    /// otherwise they are rejected.
    pub fn normalize_batch(
        &self,
        observations: &[Observation],
        source: &Source,
        products: &[Product],
        now: DateTime<Utc>,
    ) -> Result<Normalized, NormalizeError> {
        let default = source
            .scraper_config
            .feed()
            .and_then(|f| f.spec().product_id)
            .or(match products {
                [only] => Some(only.id()),
                _ => None,
            });
        self.normalize_for(observations, source, products, default, now)
    }

    fn normalize_for(
        &self,
        observations: &[Observation],
        source: &Source,
        products: &[Product],
        default_product: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Normalized, NormalizeError> {
        let t0 = std::time::Instant::now();

        let mut out = Normalized::default();
        for o in observations {
            let checked = match target(o, products, default_product) {
                Ok(Some(product)) => self.validate(o, source, product, now),
                Ok(None) => {
                    out.ignored += 1;
                    continue;
                }
                Err(e) => Err(e),
            };
            match checked {
                Ok(p) => out.prices.push(p),
                Err(e) => {
                    tracing::debug!(
                        target: "ingest",
                        source_id = source.id(),
                        error = %e,
                        "observation rejected"
                    );
                    out.rejected.push(e);
                }
            }
        }

        histogram!("ingest_normalize_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("ingest_validation_rejects_total").increment(out.rejected.len() as u64);

        if out.prices.is_empty() && !out.rejected.is_empty() {
            return Err(NormalizeError::Invalid {
                rejected: out.rejected.len(),
                first: out.rejected[0].clone(),
            });
        }
        Ok(out)
    }

    fn validate(
        &self,
        o: &Observation,
        source: &Source,
        product: &Product,
        now: DateTime<Utc>,
    ) -> Result<Price, ValidationError> {
        let spec = source.scraper_config.spec();

        let value = o.value.ok_or(ValidationError::MissingValue)?;
        if !value.is_finite() || value < 0.0 {
            return Err(ValidationError::InvalidValue(value));
        }

        let currency = first_non_empty([o.currency.as_deref(), spec.currency.as_deref()])
            .ok_or(ValidationError::MissingCurrency)?
            .to_ascii_uppercase();
        if currency.len() != 3 || !is_known_currency(&currency) {
            return Err(ValidationError::UnknownCurrency(currency));
        }

        let unit = first_non_empty([
            o.unit.as_deref(),
            spec.unit.as_deref(),
            Some(product.unit.as_str()),
        ])
        .ok_or(ValidationError::EmptyUnit)?;

        let raw_date = o
            .observation_date
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ValidationError::MissingDate)?;
        let observation_date = parse_observation_date(raw_date)
            .ok_or_else(|| ValidationError::BadDate(raw_date.to_string()))?;
        if observation_date > now + self.clock_skew {
            return Err(ValidationError::FutureDate(observation_date.to_rfc3339()));
        }

        let location_id = o
            .location_id
            .or(spec.location_id)
            .ok_or(ValidationError::MissingLocation)?;

        let price_type = price_type_for(source, o.price_type.as_deref());
        let confidence_level = o
            .confidence
            .filter(|c| c.is_finite())
            .unwrap_or(source.reliability)
            .clamp(0.0, 1.0);
        let volume = o.volume.filter(|v| v.is_finite() && *v >= 0.0).unwrap_or(0.0);
        let quality = first_non_empty([o.quality.as_deref(), spec.quality.as_deref()])
            .unwrap_or_default();

        let mut record = Record::default();
        record.before_create(now);

        Ok(Price {
            record,
            product_id: product.id(),
            source_id: source.id(),
            location_id,
            value,
            currency,
            volume,
            unit,
            observation_date,
            price_type,
            quality,
            is_forecast: price_type == PriceType::Forecast,
            confidence_level,
        })
    }
}

fn first_non_empty<const N: usize>(candidates: [Option<&str>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// The product an observation is about. `Ok(None)` means it names a product
/// outside `products`.
fn target<'a>(
    o: &Observation,
    products: &'a [Product],
    default_product: Option<i64>,
) -> Result<Option<&'a Product>, ValidationError> {
    if let Some(id) = o.product_id {
        return Ok(products.iter().find(|p| p.id() == id));
    }
    if let Some(name) = o.product.as_deref().filter(|n| !n.trim().is_empty()) {
        return Ok(products.iter().find(|p| p.matches_name(name)));
    }
    let id = default_product.ok_or(ValidationError::UnresolvedProduct)?;
    Ok(products.iter().find(|p| p.id() == id))
}

/// Forecast feeds always yield forecasts; a feed-level type wins next;
/// government statistics are spot prices; otherwise the observation decides.
fn price_type_for(source: &Source, observed: Option<&str>) -> PriceType {
    let feed = source.scraper_config.feed();
    if let Some(FeedConfig::Forecast(_)) = feed {
        return PriceType::Forecast;
    }
    if let Some(pt) = feed.and_then(|f| f.spec().price_type) {
        return pt;
    }
    let government = matches!(feed, Some(FeedConfig::Government(_)))
        || (feed.is_none() && source.source_type == SourceType::Government);
    if government {
        return PriceType::Spot;
    }
    observed.and_then(PriceType::parse).unwrap_or(PriceType::Spot)
}
