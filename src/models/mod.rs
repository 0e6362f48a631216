// src/models/mod.rs
//! Entity records shared with the store and downstream readers.

pub mod common;
pub mod location;
pub mod price;
pub mod product;
pub mod source;
pub mod user;

pub use common::{Record, SoftDelete};
pub use location::{Location, LocationTree, LocationType};
pub use price::{NaturalKey, Price, PriceType};
pub use product::{Certification, Product, ProductCategory};
pub use source::{
    FeedConfig, FeedSpec, PayloadFormat, ScraperConfig, Source, SourceType, UpdateFrequency,
};
pub use user::{Role, User};
