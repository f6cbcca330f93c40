//! Page fetch + structured extraction, behind a trait so the pipeline never sees markup.

pub mod markup;
pub mod site;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Brand;

pub use site::SiteClient;

/// A model entry as it appears on a brand page.
#[derive(Debug, Clone, PartialEq)]
pub struct RawModel {
    pub name: String,
    pub url: String,
    pub image_url: Option<String>,
    pub production_years: Option<String>,
}

/// A generation block from a model page. `name` is absent when the block has no
/// distinct name element; `heading` then carries the combined "Name (Years)" text.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawGeneration {
    pub heading: String,
    pub name: Option<String>,
    pub production_years: Option<String>,
    pub url: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BrandIndex {
    pub claimed_count: Option<u32>,
    pub brands: Vec<Brand>,
}

/// Hands out isolated sessions. One session per unit of work; sessions never share
/// cookies or other browsing state, and are released on drop.
#[async_trait]
pub trait ExtractionClient: Send + Sync + 'static {
    type Session: PageSession + 'static;

    async fn open_session(&self) -> Result<Self::Session>;
}

/// Calls are independent: a failure on one URL leaves the session usable for others.
#[async_trait]
pub trait PageSession: Send + Sync {
    async fn fetch_brands(&self, url: &str) -> Result<BrandIndex>;

    async fn fetch_models(&self, url: &str) -> Result<Vec<RawModel>>;

    async fn fetch_generations(&self, url: &str) -> Result<Vec<RawGeneration>>;

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}
