//! Scripted in-memory client for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{BrandIndex, ExtractionClient, PageSession, RawGeneration, RawModel};
use crate::error::{Error, FetchError, Result};

#[derive(Clone, Default)]
struct Script {
    brands: HashMap<String, BrandIndex>,
    models: HashMap<String, Vec<RawModel>>,
    generations: HashMap<String, Vec<RawGeneration>>,
    images: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    stalling: HashSet<String>,
    delay: Duration,
}

#[derive(Default)]
pub struct Stats {
    pub opened: AtomicUsize,
    live: AtomicUsize,
    pub peak: AtomicUsize,
    pub fetched: Mutex<Vec<String>>,
}

impl Stats {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[derive(Clone, Default)]
pub struct MockClient {
    script: Arc<Script>,
    pub stats: Arc<Stats>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&mut self) -> &mut Script {
        Arc::make_mut(&mut self.script)
    }

    pub fn brands(mut self, url: &str, index: BrandIndex) -> Self {
        self.script().brands.insert(url.into(), index);
        self
    }

    pub fn models(mut self, url: &str, models: Vec<RawModel>) -> Self {
        self.script().models.insert(url.into(), models);
        self
    }

    pub fn generations(mut self, url: &str, generations: Vec<RawGeneration>) -> Self {
        self.script().generations.insert(url.into(), generations);
        self
    }

    pub fn image(mut self, url: &str, bytes: &[u8]) -> Self {
        self.script().images.insert(url.into(), bytes.to_vec());
        self
    }

    pub fn fail(mut self, url: &str) -> Self {
        self.script().failing.insert(url.into());
        self
    }

    pub fn panic_on(mut self, url: &str) -> Self {
        self.script().panicking.insert(url.into());
        self
    }

    pub fn stall(mut self, url: &str) -> Self {
        self.script().stalling.insert(url.into());
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.script().delay = delay;
        self
    }
}

pub fn raw_model(name: &str, url: &str, years: Option<&str>, image: Option<&str>) -> RawModel {
    RawModel {
        name: name.into(),
        url: url.into(),
        image_url: image.map(Into::into),
        production_years: years.map(Into::into),
    }
}

pub fn raw_generation(heading: &str, url: &str, image: Option<&str>) -> RawGeneration {
    RawGeneration {
        heading: heading.into(),
        name: None,
        production_years: None,
        url: url.into(),
        image_url: image.map(Into::into),
    }
}

#[async_trait]
impl ExtractionClient for MockClient {
    type Session = MockSession;

    async fn open_session(&self) -> Result<MockSession> {
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        let live = self.stats.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(live, Ordering::SeqCst);
        Ok(MockSession {
            script: Arc::clone(&self.script),
            stats: Arc::clone(&self.stats),
        })
    }
}

pub struct MockSession {
    script: Arc<Script>,
    stats: Arc<Stats>,
}

impl MockSession {
    async fn visit(&self, url: &str) -> Result<()> {
        self.stats.fetched.lock().unwrap().push(url.to_string());
        if !self.script.delay.is_zero() {
            tokio::time::sleep(self.script.delay).await;
        }
        if self.script.stalling.contains(url) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.script.panicking.contains(url) {
            panic!("scripted panic for {url}");
        }
        if self.script.failing.contains(url) {
            return Err(Error::fetch(url, FetchError::Navigation("scripted failure".into())));
        }
        Ok(())
    }
}

#[async_trait]
impl PageSession for MockSession {
    async fn fetch_brands(&self, url: &str) -> Result<BrandIndex> {
        self.visit(url).await?;
        Ok(self.script.brands.get(url).cloned().unwrap_or_default())
    }

    async fn fetch_models(&self, url: &str) -> Result<Vec<RawModel>> {
        self.visit(url).await?;
        Ok(self.script.models.get(url).cloned().unwrap_or_default())
    }

    async fn fetch_generations(&self, url: &str) -> Result<Vec<RawGeneration>> {
        self.visit(url).await?;
        Ok(self.script.generations.get(url).cloned().unwrap_or_default())
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.visit(url).await?;
        self.script
            .images
            .get(url)
            .cloned()
            .ok_or_else(|| Error::fetch(url, FetchError::Status(404)))
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.stats.live.fetch_sub(1, Ordering::SeqCst);
    }
}
