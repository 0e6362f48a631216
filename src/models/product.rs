// src/models/product.rs
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::common::{impl_soft_delete, Record};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductCategory {
    Fruit,
    Vegetable,
    Grain,
    Coffee,
    Cacao,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Certification {
    Organic,
    FairTrade,
    RainforestAlliance,
    GlobalGap,
}

/// Reference data for a traded commodity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(flatten)]
    pub record: Record,
    pub name: String,
    #[serde(default)]
    pub category: ProductCategory,
    #[serde(default)]
    pub variety: String,
    #[serde(default, rename = "certification")]
    pub certifications: BTreeSet<Certification>,
    /// Month number, 1..=12.
    #[serde(default = "first_month")]
    pub season_start: u32,
    #[serde(default = "last_month")]
    pub season_end: u32,
    #[serde(default)]
    pub unit: String,
}

fn first_month() -> u32 {
    1
}
fn last_month() -> u32 {
    12
}

impl Default for Product {
    fn default() -> Self {
        Self {
            record: Record::default(),
            name: String::new(),
            category: ProductCategory::default(),
            variety: String::new(),
            certifications: BTreeSet::new(),
            season_start: first_month(),
            season_end: last_month(),
            unit: String::new(),
        }
    }
}

impl_soft_delete!(Product);

impl Product {
    pub fn id(&self) -> i64 {
        self.record.id
    }

    /// Seasons with `start > end` wrap across the year boundary (e.g. Nov–Feb).
    pub fn is_in_season(&self, date: DateTime<Utc>) -> bool {
        let month = date.month();
        if self.season_start > self.season_end {
            month >= self.season_start || month <= self.season_end
        } else {
            month >= self.season_start && month <= self.season_end
        }
    }

    pub fn has_certification(&self, cert: Certification) -> bool {
        self.certifications.contains(&cert)
    }

    /// Case-insensitive name match used when feeds tag observations by name.
    pub fn matches_name(&self, name: &str) -> bool {
        self.name.trim().eq_ignore_ascii_case(name.trim())
    }
}
