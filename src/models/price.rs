// src/models/price.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::common::{impl_soft_delete, Record};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceType {
    /// Current market price.
    #[default]
    Spot,
    /// Contract / futures price.
    Contract,
    Export,
    /// Predicted price.
    Forecast,
}

impl PriceType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spot" => Some(Self::Spot),
            "contract" => Some(Self::Contract),
            "export" => Some(Self::Export),
            "forecast" => Some(Self::Forecast),
            _ => None,
        }
    }
}

/// Identity of a price observation independent of its surrogate id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey {
    pub source_id: i64,
    pub product_id: i64,
    pub observation_date: DateTime<Utc>,
}

/// One observed (or forecast) price. Rows are append-only; a correction is a
/// new observation, or an upsert of the same natural key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Price {
    #[serde(flatten)]
    pub record: Record,
    pub product_id: i64,
    pub source_id: i64,
    pub location_id: i64,
    pub value: f64,
    pub currency: String,
    #[serde(default)]
    pub volume: f64,
    pub unit: String,
    pub observation_date: DateTime<Utc>,
    #[serde(default)]
    pub price_type: PriceType,
    #[serde(default)]
    pub quality: String,
    #[serde(default)]
    pub is_forecast: bool,
    #[serde(default)]
    pub confidence_level: f64,
}

impl_soft_delete!(Price);

impl Price {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            source_id: self.source_id,
            product_id: self.product_id,
            observation_date: self.observation_date,
        }
    }

    /// Copy with the value scaled by `1 + rate`.
    pub fn adjusted_for_inflation(&self, rate: f64) -> Price {
        Price {
            value: self.value * (1.0 + rate),
            ..self.clone()
        }
    }

    /// Copy expressed in `target` currency. The caller supplies the rate.
    pub fn convert_currency(&self, target: &str, exchange_rate: f64) -> Price {
        Price {
            value: self.value * exchange_rate,
            currency: target.trim().to_ascii_uppercase(),
            ..self.clone()
        }
    }
}
