use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tracing::debug;
use url::Url;

use super::markup;
use super::{BrandIndex, ExtractionClient, PageSession, RawGeneration, RawModel};
use crate::error::{Error, FetchError, Result};
use crate::settings::Settings;

const USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 15_0 like Mac OS X) AppleWebKit/605.1.15 \
                          (KHTML, like Gecko) Version/15.0 Mobile/15E148 Safari/604.1";

/// Renders through spider.cloud when an API key is configured, otherwise fetches plain HTML.
pub struct SiteClient {
    spider: Option<Arc<Spider>>,
    base: Url,
    timeout: Duration,
}

impl SiteClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let base = Url::parse(&settings.base_url)
            .map_err(|e| Error::Config(format!("base_url {}: {}", settings.base_url, e)))?;

        let spider = match settings.spider_api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => Some(Arc::new(Spider::new(Some(key.to_string())).map_err(|e| {
                Error::Config(format!("Failed to create Spider client: {}", e))
            })?)),
            None => {
                tracing::info!("No spider API key configured; fetching pages without rendering");
                None
            }
        };

        Ok(SiteClient {
            spider,
            base,
            timeout: settings.fetch_timeout(),
        })
    }
}

#[async_trait]
impl ExtractionClient for SiteClient {
    type Session = SiteSession;

    async fn open_session(&self) -> Result<SiteSession> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::fetch(self.base.as_str(), FetchError::from_reqwest(e, self.timeout)))?;

        Ok(SiteSession {
            spider: self.spider.clone(),
            http,
            base: self.base.clone(),
            timeout: self.timeout,
        })
    }
}

/// One isolated browsing context. Owns its cookie jar; dropped when the unit is done.
pub struct SiteSession {
    spider: Option<Arc<Spider>>,
    http: reqwest::Client,
    base: Url,
    timeout: Duration,
}

impl SiteSession {
    fn absolute(&self, url: &str) -> String {
        self.base
            .join(url)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| url.to_string())
    }

    async fn bounded<T, F>(&self, url: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, FetchError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res.map_err(|e| Error::fetch(url, e)),
            Err(_) => Err(Error::fetch(url, FetchError::Timeout(self.timeout))),
        }
    }

    async fn fetch_html(&self, url: &str) -> Result<(String, Url)> {
        let url = self.absolute(url);
        let page_url = Url::parse(&url).unwrap_or_else(|_| self.base.clone());

        let html = match &self.spider {
            Some(spider) => self.bounded(&url, render(spider, &url)).await?,
            None => self.bounded(&url, plain(&self.http, &url, self.timeout)).await?,
        };
        debug!("Fetched {} ({} bytes)", url, html.len());
        Ok((html, page_url))
    }
}

async fn render(spider: &Spider, url: &str) -> std::result::Result<String, FetchError> {
    let params = RequestParams {
        return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
        ..Default::default()
    };

    let response = spider
        .scrape_url(url, Some(params), "application/json")
        .await
        .map_err(|e| FetchError::Transport(e.to_string()))?;

    let parsed: serde_json::Value = match response.as_str() {
        Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
        None => response,
    };
    let first = parsed.as_array().and_then(|arr| arr.first());

    if let Some(status) = first
        .and_then(|obj| obj.get("status"))
        .and_then(|s| s.as_u64())
        .filter(|s| !(200..300).contains(s))
    {
        return Err(FetchError::Status(status as u16));
    }

    first
        .and_then(|obj| obj.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| FetchError::Navigation("No content in spider response".into()))
}

async fn plain(
    http: &reqwest::Client,
    url: &str,
    deadline: Duration,
) -> std::result::Result<String, FetchError> {
    let wrap = |e: reqwest::Error| FetchError::from_reqwest(e, deadline);
    let response = http.get(url).send().await.map_err(wrap)?;
    let response = response.error_for_status().map_err(wrap)?;
    response.text().await.map_err(wrap)
}

#[async_trait]
impl PageSession for SiteSession {
    async fn fetch_brands(&self, url: &str) -> Result<BrandIndex> {
        let (html, page_url) = self.fetch_html(url).await?;
        Ok(markup::parse_brand_index(&html, &page_url))
    }

    async fn fetch_models(&self, url: &str) -> Result<Vec<RawModel>> {
        let (html, page_url) = self.fetch_html(url).await?;
        Ok(markup::parse_model_list(&html, &page_url))
    }

    async fn fetch_generations(&self, url: &str) -> Result<Vec<RawGeneration>> {
        let (html, page_url) = self.fetch_html(url).await?;
        Ok(markup::parse_generation_list(&html, &page_url))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let url = self.absolute(url);
        let wrap = |e: reqwest::Error| FetchError::from_reqwest(e, self.timeout);
        let fut = async {
            let response = self.http.get(&url).send().await.map_err(wrap)?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status.as_u16()));
            }
            Ok::<_, FetchError>(response.bytes().await.map_err(wrap)?.to_vec())
        };
        self.bounded(&url, fut).await
    }
}

impl Drop for SiteSession {
    fn drop(&mut self) {
        debug!("Released session for {}", self.base);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions_resolve_relative_urls() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::for_tests(dir.path());
        let client = SiteClient::new(&settings).unwrap();
        assert!(client.spider.is_none());

        let session = client.open_session().await.unwrap();
        assert_eq!(session.absolute("/acme/"), "https://www.autoevolution.com/acme/");
        assert_eq!(session.absolute("https://cdn.example/x.jpg"), "https://cdn.example/x.jpg");
    }

    #[tokio::test]
    async fn stalled_download_reports_configured_deadline() {
        // Accepts connections but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::for_tests(dir.path());
        settings.fetch_timeout_secs = 1;
        let session = SiteClient::new(&settings).unwrap().open_session().await.unwrap();

        let err = session
            .fetch_bytes(&format!("http://{addr}/img.jpg"))
            .await
            .unwrap_err();
        match err {
            Error::Fetch {
                source: FetchError::Timeout(d),
                ..
            } => assert_eq!(d, Duration::from_secs(1)),
            other => panic!("expected timeout, got {other}"),
        }
        assert_eq!(
            FetchError::Timeout(Duration::from_secs(1)).to_string(),
            "timed out after 1.0s"
        );
        drop(listener);
    }

    #[test]
    fn bad_base_url_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::for_tests(dir.path());
        settings.base_url = "not a url".into();
        assert!(matches!(SiteClient::new(&settings), Err(Error::Config(_))));
    }
}
