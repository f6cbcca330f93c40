use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use futures::stream::{self, StreamExt};
use regex::Regex;
use tracing::{info, warn};

use crate::client::{ExtractionClient, PageSession, RawGeneration, RawModel};
use crate::dedupe::dedupe;
use crate::error::Result;
use crate::images::{fetch_image, ImagePlanner};
use crate::models::{Brand, BrandResult, Generation, Model};

static GENERATIONS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d+)\s+generations?\b").unwrap());

static NAME_YEARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(.+?)\s*\(([^()]*)\)\s*$").unwrap());

/// "3 Generations" → 3. Anything else (plain year ranges, missing text) → None.
pub fn generation_signal(production_years: Option<&str>) -> Option<u32> {
    let caps = GENERATIONS_RE.captures(production_years?)?;
    caps[1].parse().ok()
}

pub fn resolve_generation(raw: RawGeneration) -> Generation {
    let (name, production_years) = match raw.name {
        Some(name) => (name, raw.production_years),
        None => match NAME_YEARS_RE.captures(&raw.heading) {
            Some(caps) => (
                caps[1].to_string(),
                raw.production_years.or_else(|| Some(caps[2].trim().to_string())),
            ),
            None => (raw.heading.trim().to_string(), raw.production_years),
        },
    };
    Generation {
        name,
        production_years,
        url: raw.url,
        image_url: raw.image_url,
        local_image_path: None,
    }
}

fn to_model(raw: RawModel) -> Model {
    Model {
        name: raw.name,
        url: raw.url,
        image_url: raw.image_url,
        production_years: raw.production_years,
        local_image_path: None,
        generations: None,
        generation_count: None,
    }
}

enum Leaf {
    Model(usize),
    Generation(usize, usize),
}

/// Turns one brand page into a `BrandResult`, fanning out into generation pages
/// and downloading one image per leaf.
pub struct LeafFetcher<'a, S: PageSession> {
    session: &'a S,
    images_dir: &'a Path,
    concurrency: usize,
}

impl<'a, S: PageSession> LeafFetcher<'a, S> {
    pub fn new(session: &'a S, images_dir: &'a Path, concurrency: usize) -> Self {
        LeafFetcher {
            session,
            images_dir,
            concurrency: concurrency.max(1),
        }
    }

    /// Errors only when the brand's own page can't be fetched. Generation pages and
    /// images fail softly.
    pub async fn process(&self, brand: &Brand) -> Result<BrandResult> {
        let raw = self.session.fetch_models(&brand.url).await?;
        let raw: Vec<RawModel> = raw.into_iter().filter(|m| !m.url.is_empty()).collect();
        let raw = dedupe(raw, |m| m.url.clone());
        info!("Found {} unique models for {} after removing duplicates", raw.len(), brand.name);

        let mut models: Vec<Model> = raw.into_iter().map(to_model).collect();
        self.attach_generations(&mut models).await;
        self.download_images(brand, &mut models).await;

        Ok(BrandResult::completed(brand, models))
    }

    async fn attach_generations(&self, models: &mut [Model]) {
        let session = self.session;
        let wanted: Vec<(usize, u32, String)> = models
            .iter()
            .enumerate()
            .filter_map(|(i, m)| {
                let n = generation_signal(m.production_years.as_deref())?;
                (n > 1).then(|| (i, n, m.url.clone()))
            })
            .collect();

        let fetched: Vec<_> = stream::iter(wanted)
            .map(|(i, n, url)| async move {
                let gens = match session.fetch_generations(&url).await {
                    Ok(raw) => {
                        let gens: Vec<Generation> = dedupe(raw, |g| g.url.clone())
                            .into_iter()
                            .filter(|g| !g.url.is_empty())
                            .map(resolve_generation)
                            .collect();
                        if gens.is_empty() {
                            warn!("No generations parsed from {}", url);
                            None
                        } else {
                            Some(gens)
                        }
                    }
                    Err(e) => {
                        warn!("Failed to fetch generations from {}: {}", url, e);
                        None
                    }
                };
                (i, n, gens)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        for (i, n, gens) in fetched {
            models[i].generation_count = Some(n);
            models[i].generations = gens;
        }
    }

    async fn download_images(&self, brand: &Brand, models: &mut [Model]) {
        let session = self.session;
        let mut planner = ImagePlanner::new(self.images_dir, &brand.name);
        let mut jobs: Vec<(Leaf, String, PathBuf)> = Vec::new();

        for (i, model) in models.iter().enumerate() {
            match model.leaf_generations() {
                Some(gens) => {
                    for (j, generation) in gens.iter().enumerate() {
                        if let Some(url) = &generation.image_url {
                            let dest = planner.generation_path(&model.name, &generation.name);
                            jobs.push((Leaf::Generation(i, j), url.clone(), dest));
                        }
                    }
                }
                None => {
                    if let Some(url) = &model.image_url {
                        let dest = planner.model_path(&model.name);
                        jobs.push((Leaf::Model(i), url.clone(), dest));
                    }
                }
            }
        }

        let saved: Vec<(Leaf, Option<PathBuf>)> = stream::iter(jobs)
            .map(|(leaf, url, dest)| async move {
                let path = fetch_image(session, &url, &dest).await;
                (leaf, path)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (leaf, path) in saved {
            match leaf {
                Leaf::Model(i) => models[i].local_image_path = path,
                Leaf::Generation(i, j) => {
                    if let Some(gens) = models[i].generations.as_mut() {
                        gens[j].local_image_path = path;
                    }
                }
            }
        }
    }
}

/// One unit of work: open an isolated session, process the brand, release the session.
pub async fn fetch_brand<C: ExtractionClient>(
    client: &C,
    brand: &Brand,
    images_dir: &Path,
    concurrency: usize,
) -> Result<BrandResult> {
    let session = client.open_session().await?;
    LeafFetcher::new(&session, images_dir, concurrency)
        .process(brand)
        .await
}
