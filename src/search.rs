//! Web search through the Tavily REST API.

use crate::config::SearchConfig;
use crate::constants::{DEFAULT_SEARCH_RESULTS, MAX_EXTRACT_URLS, MAX_SEARCH_RESULTS, UPSTREAM_REQUEST_TIMEOUT};
use crate::error::ServerError;
use crate::resilience::{with_retry, RetryConfig};
use crate::upstream::decode_json;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const SERVICE: &str = "Tavily";

/// Body of `POST /search/tavily/search`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

fn default_max_results() -> u32 {
    DEFAULT_SEARCH_RESULTS
}

impl SearchRequest {
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.query.trim().is_empty() {
            return Err(ServerError::invalid_input("Search query must not be empty"));
        }
        if !(1..=MAX_SEARCH_RESULTS).contains(&self.max_results) {
            return Err(ServerError::invalid_input(format!(
                "max_results must be between 1 and {MAX_SEARCH_RESULTS}"
            )));
        }
        Ok(())
    }
}

/// Body of `POST /search/tavily/extract`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractRequest {
    pub urls: Vec<String>,
}

impl ExtractRequest {
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.urls.is_empty() {
            return Err(ServerError::invalid_input("At least one URL is required"));
        }
        if self.urls.len() > MAX_EXTRACT_URLS {
            return Err(ServerError::invalid_input(format!(
                "At most {MAX_EXTRACT_URLS} URLs can be extracted per request"
            )));
        }
        for url in &self.urls {
            let parsed = Url::parse(url)
                .map_err(|_| ServerError::invalid_input(format!("Invalid URL: '{url}'")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ServerError::invalid_input(format!(
                    "Only http and https URLs can be extracted: '{url}'"
                )));
            }
        }
        Ok(())
    }
}

/// Search results, passed through as Tavily returns them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    #[serde(default)]
    pub results: Vec<Value>,
}

/// Extracted page contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractResponse {
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default)]
    pub failed_results: Vec<Value>,
}

/// A web search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: u32) -> Result<SearchResponse, ServerError>;

    async fn extract(&self, urls: &[String]) -> Result<ExtractResponse, ServerError>;
}

#[derive(Debug, Serialize)]
struct TavilySearchBody<'a> {
    query: &'a str,
    max_results: u32,
    include_answer: bool,
    include_raw_content: bool,
    include_images: bool,
    search_depth: &'a str,
}

#[derive(Debug, Serialize)]
struct TavilyExtractBody<'a> {
    urls: &'a [String],
}

/// Tavily API client.
pub struct TavilyClient {
    http: Client,
    base_url: Url,
    api_key: String,
    retry: RetryConfig,
}

impl TavilyClient {
    /// Build a client, or `None` when no API key is configured.
    pub fn from_config(config: &SearchConfig) -> Result<Option<Self>, ServerError> {
        match &config.tavily_api_key {
            Some(key) => Self::new(&config.tavily_api_base_url, key).map(Some),
            None => Ok(None),
        }
    }

    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, ServerError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ServerError::config(format!("TAVILY_API_BASE_URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ServerError::config(format!(
                "TAVILY_API_BASE_URL: '{base_url}' is not a base URL"
            )));
        }

        let http = Client::builder()
            .timeout(UPSTREAM_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ServerError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            api_key: api_key.into(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self, name: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(name);
        }
        url
    }

    async fn post<B, T>(&self, url: Url, body: &B) -> Result<T, ServerError>
    where
        B: Serialize + Sync,
        T: serde::de::DeserializeOwned + Send,
    {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ServerError::from_reqwest(SERVICE, e))?;
        decode_json(SERVICE, response).await
    }
}

#[async_trait]
impl SearchProvider for TavilyClient {
    async fn search(&self, query: &str, max_results: u32) -> Result<SearchResponse, ServerError> {
        let url = self.endpoint("search");
        let body = TavilySearchBody {
            query,
            max_results,
            include_answer: false,
            include_raw_content: false,
            include_images: false,
            search_depth: "basic",
        };

        let response: SearchResponse =
            with_retry(&self.retry, "web search", || self.post(url.clone(), &body)).await?;
        debug!("Search returned {} results", response.results.len());
        Ok(response)
    }

    async fn extract(&self, urls: &[String]) -> Result<ExtractResponse, ServerError> {
        let url = self.endpoint("extract");
        let body = TavilyExtractBody { urls };

        let response: ExtractResponse =
            with_retry(&self.retry, "extract", || self.post(url.clone(), &body)).await?;
        debug!(
            "Extracted {} pages, {} failed",
            response.results.len(),
            response.failed_results.len()
        );
        Ok(response)
    }
}
