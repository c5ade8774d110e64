use crate::error::FetchError;
use crate::network::HttpHeader;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

/// A top-level document as served.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Address after redirects
    pub url: Url,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub headers: Vec<HttpHeader>,
    pub body: String,
    pub response_time: Duration,
}

impl FetchedPage {
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_ref()
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false)
    }
}

pub struct PageFetcher {
    client: Client,
}

impl PageFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(10)
    }

    pub fn with_timeout(timeout_secs: u64) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!("gqlfinder/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs.div_ceil(2)))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self { client })
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", url, e)))?;
        debug!("Fetching {}", parsed);

        let start = Instant::now();
        let response = self.client.get(parsed).send().await?;
        let response_time = start.elapsed();

        let final_url = response.url().clone();
        let status_code = response.status().as_u16();
        let headers: Vec<HttpHeader> = response
            .headers()
            .iter()
            .map(|(name, value)| HttpHeader {
                name: name.as_str().to_string(),
                value: value.to_str().ok().map(str::to_string),
            })
            .collect();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response.text().await?;

        Ok(FetchedPage {
            url: final_url,
            status_code,
            content_type,
            headers,
            body,
            response_time,
        })
    }
}
