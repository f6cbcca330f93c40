use std::path::Path;

use chrono::Local;
use tracing::info;

use crate::client::{ExtractionClient, PageSession};
use crate::dedupe::dedupe;
use crate::error::{Error, Result};
use crate::models::{Brand, BrandsFile};
use crate::settings::Settings;
use crate::store::write_json_atomic;

const SOURCE: &str = "autoevolution.com";

/// Unique by upper-cased name, sorted by name.
pub fn build_brands_file(brands: Vec<Brand>, claimed_brand_count: Option<u32>) -> BrandsFile {
    let brands: Vec<Brand> = brands
        .into_iter()
        .filter(|b| b.name.chars().count() > 1)
        .collect();
    let mut brands = dedupe(brands, |b| b.name_normalized.clone());
    brands.sort_by(|a, b| a.name.cmp(&b.name));

    BrandsFile {
        source: SOURCE.to_string(),
        extracted_date: Local::now().to_rfc3339(),
        total_brands: brands.len(),
        claimed_brand_count,
        brands_list: brands.iter().map(|b| b.name.clone()).collect(),
        brands_data: brands,
    }
}

/// Visit the brand index, extract the brand list and write `brands_file`.
pub async fn discover_brands<C: ExtractionClient>(client: &C, settings: &Settings) -> Result<BrandsFile> {
    let session = client.open_session().await?;
    let index = session.fetch_brands(&settings.brands_url).await?;
    if index.brands.is_empty() {
        return Err(Error::Parse {
            url: settings.brands_url.clone(),
            reason: "no brand entries found".into(),
        });
    }

    let file = build_brands_file(index.brands, index.claimed_count);
    info!(
        "Found {} unique car brands (site claims {})",
        file.total_brands,
        file.claimed_brand_count.map_or_else(|| "?".to_string(), |n| n.to_string())
    );
    write_json_atomic(&settings.brands_file, &file)?;
    info!("Data saved to {}", settings.brands_file.display());
    Ok(file)
}

/// The pipeline cannot start without a brand list, so every failure here is fatal.
pub fn load_brands(path: &Path) -> Result<Vec<Brand>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::storage(path, e))?;
    let file: BrandsFile = serde_json::from_str(&content).map_err(|e| Error::Format {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    info!("Loaded {} brands from {}", file.brands_data.len(), path.display());
    Ok(file.brands_data)
}
