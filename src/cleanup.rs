use std::path::Path;

use rayon::prelude::*;
use tracing::info;

use crate::dedupe::dedupe;
use crate::error::Result;
use crate::models::{Aggregate, BrandResult};
use crate::store::{read_aggregate, write_json_atomic};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub brands: usize,
    pub models_before: usize,
    pub models_after: usize,
}

impl CleanupReport {
    pub fn removed(&self) -> usize {
        self.models_before - self.models_after
    }
}

fn clean_brand(brand: &mut BrandResult) {
    let models = std::mem::take(&mut brand.car_models);
    let models: Vec<_> = models.into_iter().filter(|m| !m.url.is_empty()).collect();
    brand.car_models = dedupe(models, |m| m.url.clone());
    for model in &mut brand.car_models {
        if let Some(gens) = model.generations.take() {
            model.generations = Some(dedupe(gens, |g| g.url.clone()));
        }
    }
    brand.recount();
}

/// Drop duplicate models (and generations) by URL and recompute the counters.
pub fn clean(aggregate: &mut Aggregate) -> CleanupReport {
    let models_before = aggregate.brand_models.iter().map(|b| b.car_models.len()).sum();
    aggregate.brand_models.par_iter_mut().for_each(clean_brand);
    let models_after = aggregate.brand_models.iter().map(|b| b.car_models.len()).sum();
    aggregate.total_brands_processed = aggregate.brand_models.len();

    CleanupReport {
        brands: aggregate.brand_models.len(),
        models_before,
        models_after,
    }
}

/// `Ok(None)` when there is no file to clean.
pub fn clean_file(path: &Path) -> Result<Option<CleanupReport>> {
    let Some(mut aggregate) = read_aggregate(path)? else {
        info!("File {} does not exist. No cleanup needed.", path.display());
        return Ok(None);
    };

    let report = clean(&mut aggregate);
    write_json_atomic(path, &aggregate)?;
    info!(
        "Cleanup completed: {} duplicate models removed ({} -> {} across {} brands)",
        report.removed(),
        report.models_before,
        report.models_after,
        report.brands
    );
    Ok(Some(report))
}
