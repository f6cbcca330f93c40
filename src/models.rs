use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A catalog brand as produced by brand discovery. Read-only input to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brand {
    pub name: String,
    pub name_normalized: String,
    pub url: String,
    #[serde(rename = "in_production", default)]
    pub in_production_count: u32,
    #[serde(rename = "discontinued", default)]
    pub discontinued_count: u32,
    #[serde(default)]
    pub total_models: u32,
}

impl Brand {
    pub fn new(name: &str, url: &str, in_production: u32, discontinued: u32) -> Self {
        Brand {
            name: name.to_string(),
            name_normalized: name.to_uppercase(),
            url: url.to_string(),
            in_production_count: in_production,
            discontinued_count: discontinued,
            total_models: in_production + discontinued,
        }
    }
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// `car_brands.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandsFile {
    pub source: String,
    pub extracted_date: String,
    pub total_brands: usize,
    #[serde(default)]
    pub claimed_brand_count: Option<u32>,
    pub brands_data: Vec<Brand>,
    #[serde(default)]
    pub brands_list: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub production_years: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_image_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generations: Option<Vec<Generation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_count: Option<u32>,
}

impl Model {
    /// Generations when the model fans out into them, `None` when the model is itself a leaf.
    pub fn leaf_generations(&self) -> Option<&[Generation]> {
        self.generations.as_deref().filter(|g| !g.is_empty())
    }

    /// Leaves under this model that carry a downloaded image.
    pub fn images_resolved(&self) -> usize {
        match self.leaf_generations() {
            Some(gens) => gens.iter().filter(|g| g.local_image_path.is_some()).count(),
            None => usize::from(self.local_image_path.is_some()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub name: String,
    #[serde(default)]
    pub production_years: Option<String>,
    pub url: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_image_path: Option<PathBuf>,
}

/// Per-brand outcome; the unit merged and checkpointed by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandResult {
    pub brand_name: String,
    #[serde(default)]
    pub brand_url: String,
    #[serde(default)]
    pub models_count: usize,
    #[serde(default)]
    pub models_with_images: usize,
    #[serde(default)]
    pub car_models: Vec<Model>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BrandResult {
    pub fn completed(brand: &Brand, car_models: Vec<Model>) -> Self {
        let mut result = BrandResult {
            brand_name: brand.name.clone(),
            brand_url: brand.url.clone(),
            models_count: 0,
            models_with_images: 0,
            car_models,
            error: None,
        };
        result.recount();
        result
    }

    /// Terminal failure record: no models, only the error text.
    pub fn failed(brand: &Brand, error: impl fmt::Display) -> Self {
        BrandResult {
            brand_name: brand.name.clone(),
            brand_url: brand.url.clone(),
            models_count: 0,
            models_with_images: 0,
            car_models: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn recount(&mut self) {
        self.models_count = self.car_models.len();
        self.models_with_images = self.car_models.iter().map(Model::images_resolved).sum();
    }
}

/// `car_models.json`, rewritten after every batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Aggregate {
    #[serde(default)]
    pub extraction_date: String,
    #[serde(default)]
    pub total_brands_processed: usize,
    #[serde(default)]
    pub brand_models: Vec<BrandResult>,
}
