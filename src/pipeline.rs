use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::batch::{batch_count, BatchObserver, BatchScheduler, BatchSink, UnitError};
use crate::brands::load_brands;
use crate::client::ExtractionClient;
use crate::error::Result;
use crate::leaf::fetch_brand;
use crate::models::{Brand, BrandResult};
use crate::settings::Settings;
use crate::store::ResumableStore;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub brands_processed: usize,
    pub brands_errored: usize,
    pub total_models: usize,
    pub models_with_images: usize,
    pub total_generations: usize,
}

impl Summary {
    pub fn of(results: &[BrandResult]) -> Self {
        Summary {
            brands_processed: results.len(),
            brands_errored: results.iter().filter(|r| r.is_error()).count(),
            total_models: results.iter().map(|r| r.models_count).sum(),
            models_with_images: results.iter().map(|r| r.models_with_images).sum(),
            total_generations: results
                .iter()
                .flat_map(|r| &r.car_models)
                .filter_map(|m| m.generations.as_ref())
                .map(Vec::len)
                .sum(),
        }
    }
}

/// Converts unit failures into error records, merges, and checkpoints.
struct StoreSink<'a> {
    store: &'a mut ResumableStore,
}

#[async_trait]
impl BatchSink<Brand, BrandResult> for StoreSink<'_> {
    async fn commit(&mut self, batch: Vec<(Brand, Result<BrandResult, UnitError>)>) -> anyhow::Result<()> {
        let results: Vec<BrandResult> = batch
            .into_iter()
            .map(|(brand, outcome)| outcome.unwrap_or_else(|e| BrandResult::failed(&brand, e)))
            .collect();
        let n = results.len();
        self.store.merge(results);
        self.store.checkpoint().await?;
        info!(
            "Checkpoint #{}: {} new brands ({} total)",
            self.store.checkpoints(),
            n,
            self.store.results().len()
        );
        Ok(())
    }
}

/// The resumable model-extraction run: prior state is loaded and filtered up front,
/// then pending brands go through the scheduler batch by batch.
pub struct ModelsPipeline {
    store: ResumableStore,
    pending: Vec<Brand>,
    total_brands: usize,
    images_dir: PathBuf,
    image_concurrency: usize,
    scheduler: BatchScheduler,
}

impl ModelsPipeline {
    pub fn open(settings: &Settings) -> Result<Self> {
        let brands = load_brands(&settings.brands_file)?;
        let total_brands = brands.len();

        let store = ResumableStore::load(&settings.models_file)
            .retry_errors(settings.retry_errors)
            .checkpoint_retries(settings.checkpoint_retries);
        let pending = store.pending(brands);
        info!("{} brands to process out of {} total brands", pending.len(), total_brands);

        Ok(ModelsPipeline {
            store,
            pending,
            total_brands,
            images_dir: settings.images_dir.clone(),
            image_concurrency: settings.image_concurrency,
            scheduler: BatchScheduler::new(settings.batch_size, settings.unit_timeout())
                .with_pause(settings.batch_pause()),
        })
    }

    pub fn pending(&self) -> &[Brand] {
        &self.pending
    }

    pub fn total_brands(&self) -> usize {
        self.total_brands
    }

    /// Keep only the first `n` pending brands.
    pub fn limit(mut self, n: Option<usize>) -> Self {
        if let Some(n) = n {
            self.pending.truncate(n);
        }
        self
    }

    pub async fn run<C: ExtractionClient>(
        mut self,
        client: Arc<C>,
        observer: &dyn BatchObserver,
    ) -> anyhow::Result<Summary> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            info!("Nothing to process; all brands already have results.");
            return Ok(Summary::of(self.store.results()));
        }
        info!(
            "Scheduling {} brands in {} batches",
            pending.len(),
            batch_count(pending.len(), self.scheduler.batch_size())
        );

        let images_dir = self.images_dir.clone();
        let concurrency = self.image_concurrency;
        let unit = move |brand: Brand| {
            let client = Arc::clone(&client);
            let images_dir = images_dir.clone();
            async move { fetch_brand(client.as_ref(), &brand, &images_dir, concurrency).await }
        };

        let mut sink = StoreSink {
            store: &mut self.store,
        };
        self.scheduler.run(pending, unit, &mut sink, observer).await?;

        Ok(Summary::of(self.store.results()))
    }
}
