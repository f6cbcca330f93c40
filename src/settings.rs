use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{Error, Result};

const SETTINGS_FILE: &str = "autocatalog";
const ENV_PREFIX: &str = "AUTOCATALOG";

/// Resolved runtime settings: defaults, then `autocatalog.toml`, then `AUTOCATALOG_*` env vars.
/// CLI flags are applied on top by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub base_url: String,
    pub brands_url: String,
    pub brands_file: PathBuf,
    pub models_file: PathBuf,
    pub images_dir: PathBuf,
    pub batch_size: usize,
    pub fetch_timeout_secs: u64,
    pub unit_timeout_secs: u64,
    pub image_concurrency: usize,
    pub batch_pause_ms: u64,
    pub retry_errors: bool,
    pub checkpoint_retries: u32,
    #[serde(default)]
    pub spider_api_key: Option<String>,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let settings: Settings = Self::builder()?
            .add_source(File::with_name(SETTINGS_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(Config::builder()
            .set_default("base_url", "https://www.autoevolution.com")?
            .set_default("brands_url", "https://www.autoevolution.com/cars/")?
            .set_default("brands_file", "car_brands.json")?
            .set_default("models_file", "car_models.json")?
            .set_default("images_dir", "car_images")?
            .set_default("batch_size", 12)?
            .set_default("fetch_timeout_secs", 60)?
            .set_default("unit_timeout_secs", 900)?
            .set_default("image_concurrency", 8)?
            .set_default("batch_pause_ms", 1000)?
            .set_default("retry_errors", false)?
            .set_default("checkpoint_retries", 3)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        if self.image_concurrency == 0 {
            return Err(Error::Config("image_concurrency must be at least 1".into()));
        }
        if self.fetch_timeout_secs == 0 || self.unit_timeout_secs == 0 {
            return Err(Error::Config("timeouts must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs(self.unit_timeout_secs)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

#[cfg(test)]
impl Settings {
    /// Defaults only, no file or environment lookups.
    pub fn for_tests(root: &std::path::Path) -> Self {
        let mut s: Settings = Self::builder()
            .and_then(|b| Ok(b.build()?.try_deserialize()?))
            .unwrap();
        s.brands_file = root.join("car_brands.json");
        s.models_file = root.join("car_models.json");
        s.images_dir = root.join("car_images");
        s.batch_pause_ms = 0;
        s.fetch_timeout_secs = 5;
        s.unit_timeout_secs = 5;
        s
    }
}
