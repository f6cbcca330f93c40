use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::models::{Aggregate, Brand, BrandResult};

const BASE_BACKOFF_MS: u64 = 2000;

fn read_if_present(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(c) => Ok(Some(c)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Format {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

/// Read an aggregate file. `Ok(None)` when the file does not exist.
pub fn read_aggregate(path: &Path) -> Result<Option<Aggregate>> {
    let Some(content) = read_if_present(path)? else {
        return Ok(None);
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| Error::Format {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

#[derive(Deserialize)]
struct PriorAggregate {
    #[serde(default)]
    brand_models: Vec<serde_json::Value>,
}

/// Read prior brand results one entry at a time. Entries that do not parse are skipped
/// with a warning so the rest still count as processed.
pub fn read_prior_results(path: &Path) -> Result<Option<Vec<BrandResult>>> {
    let Some(content) = read_if_present(path)? else {
        return Ok(None);
    };
    let prior: PriorAggregate = serde_json::from_str(&content).map_err(|e| Error::Format {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut results = Vec::with_capacity(prior.brand_models.len());
    for (i, entry) in prior.brand_models.into_iter().enumerate() {
        let name = entry
            .get("brand_name")
            .and_then(|n| n.as_str())
            .map(str::to_owned);
        match serde_json::from_value::<BrandResult>(entry) {
            Ok(result) => results.push(result),
            Err(e) => warn!(
                "Skipping unreadable entry #{} ({}) in {}: {}",
                i,
                name.as_deref().unwrap_or("no brand_name"),
                path.display(),
                e
            ),
        }
    }
    Ok(Some(results))
}

/// Write `value` as pretty JSON next to `path`, then rename over it.
/// Readers see either the old file or the new one, never a partial write.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| Error::Format {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::storage(parent, e))?;
    }

    let tmp = tmp_path(path);
    std::fs::write(&tmp, json.as_bytes()).map_err(|e| Error::storage(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        Error::storage(path, e)
    })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Prior results keyed by brand name, checkpointed as a whole after every batch.
pub struct ResumableStore {
    path: PathBuf,
    results: Vec<BrandResult>,
    index: HashMap<String, usize>,
    retry_errors: bool,
    checkpoint_retries: u32,
    checkpoints: usize,
}

impl ResumableStore {
    /// Missing or unreadable prior state starts empty; it never aborts the run.
    pub fn load(path: &Path) -> Self {
        let prior = match read_prior_results(path) {
            Ok(Some(results)) => {
                info!("Loaded existing {} ({} brands)", path.display(), results.len());
                results
            }
            Ok(None) => {
                info!("No existing {}. Starting fresh.", path.display());
                Vec::new()
            }
            Err(e) => {
                warn!("Error loading existing {}: {}. Starting fresh.", path.display(), e);
                Vec::new()
            }
        };

        let mut store = ResumableStore {
            path: path.to_path_buf(),
            results: Vec::new(),
            index: HashMap::new(),
            retry_errors: false,
            checkpoint_retries: 3,
            checkpoints: 0,
        };
        store.merge(prior);
        store
    }

    /// Treat error records as not yet processed, so they are fetched again.
    pub fn retry_errors(mut self, yes: bool) -> Self {
        self.retry_errors = yes;
        self
    }

    pub fn checkpoint_retries(mut self, n: u32) -> Self {
        self.checkpoint_retries = n;
        self
    }

    pub fn results(&self) -> &[BrandResult] {
        &self.results
    }

    pub fn checkpoints(&self) -> usize {
        self.checkpoints
    }

    pub fn processed_keys(&self) -> HashSet<&str> {
        self.results
            .iter()
            .filter(|r| !(self.retry_errors && r.is_error()))
            .map(|r| r.brand_name.as_str())
            .collect()
    }

    pub fn pending(&self, brands: Vec<Brand>) -> Vec<Brand> {
        let done = self.processed_keys();
        brands
            .into_iter()
            .filter(|b| !done.contains(b.name.as_str()))
            .collect()
    }

    /// Last write wins by `brand_name`. Existing keys keep their position; new keys append.
    pub fn merge(&mut self, batch: Vec<BrandResult>) {
        for result in batch {
            match self.index.get(&result.brand_name) {
                Some(&i) => self.results[i] = result,
                None => {
                    self.index.insert(result.brand_name.clone(), self.results.len());
                    self.results.push(result);
                }
            }
        }
    }

    pub fn snapshot(&self) -> Aggregate {
        Aggregate {
            extraction_date: Local::now().to_rfc3339(),
            total_brands_processed: self.results.len(),
            brand_models: self.results.clone(),
        }
    }

    /// Persist the full merged state. Retries with backoff; the final failure is returned
    /// and must stop the run.
    pub async fn checkpoint(&mut self) -> Result<()> {
        let snapshot = self.snapshot();
        let mut attempt = 0;
        loop {
            match write_json_atomic(&self.path, &snapshot) {
                Ok(()) => {
                    self.checkpoints += 1;
                    info!(
                        "Updated {} ({} brands total)",
                        self.path.display(),
                        snapshot.total_brands_processed
                    );
                    return Ok(());
                }
                Err(e) if attempt < self.checkpoint_retries => {
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    warn!(
                        "Checkpoint failed (attempt {}/{}): {}; retrying in {:.1}s",
                        attempt + 1,
                        self.checkpoint_retries,
                        e,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!("Checkpoint failed, giving up: {}", e);
                    return Err(e);
                }
            }
        }
    }
}
