//! News provider HTTP clients.
//!
//! [`NewsApiClient`] talks to a NewsAPI-compatible service (`/v2/everything`,
//! `/v2/top-headlines`, `/v2/top-headlines/sources`). [`GNewsClient`] is the
//! secondary aggregator used by market analysis.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::news::article::{null_as_default, Article};

pub const NEWSAPI_BASE_URL: &str = "https://newsapi.org";
pub const GNEWS_BASE_URL: &str = "https://gnews.io";

/// Languages the provider accepts; anything else becomes `en`.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "ar", "de", "en", "es", "fr", "he", "it", "nl", "no", "pt", "ru", "sv", "ud", "zh",
];

pub fn normalize_language(language: &str) -> &'static str {
    let lower = language.trim().to_lowercase();
    SUPPORTED_LANGUAGES
        .iter()
        .copied()
        .find(|l| *l == lower)
        .unwrap_or("en")
}

/// Which curated outlets a search is restricted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceScope {
    Sources(Vec<String>),
    Domains(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    /// Full-day UTC timestamps.
    pub from: String,
    pub to: String,
    pub language: String,
    pub page_size: usize,
    pub scope: SourceScope,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlinesRequest {
    pub sources: Vec<String>,
    pub language: String,
    pub page_size: usize,
}

/// One entry of the provider's source listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProviderSource {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub category: String,
}

#[async_trait]
pub trait NewsProvider: Send + Sync {
    /// Full-archive search (`/v2/everything`).
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Article>, ProviderError>;

    /// Breaking headlines (`/v2/top-headlines`), no query.
    async fn top_headlines(&self, request: &HeadlinesRequest) -> Result<Vec<Article>, ProviderError>;

    /// The provider's source listing (`/v2/top-headlines/sources`).
    async fn sources(&self) -> Result<Vec<ProviderSource>, ProviderError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArticlesResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    total_results: Option<u64>,
    #[serde(default, deserialize_with = "null_as_default")]
    articles: Vec<Article>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SourcesResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    sources: Vec<ProviderSource>,
    #[serde(default)]
    message: Option<String>,
}

pub struct NewsApiClient {
    api_key: String,
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl NewsApiClient {
    pub fn new(api_key: String, http: reqwest::Client) -> Self {
        Self {
            api_key,
            base_url: NEWSAPI_BASE_URL.to_string(),
            timeout: Duration::from_secs(12),
            http,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// GET `{base_url}{path}` with the key in the `X-Api-Key` header.
    ///
    /// `params` are logged; the key never is.
    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<String, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::MissingKey);
        }
        let url = format!("{}{}", self.base_url, path);
        info!("📰 GET {} {:?}", path, params);

        let response = self
            .http
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .query(params)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Http(e.without_url().to_string()))?;
        debug!("📰 {} -> {}", path, status);

        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        Ok(body)
    }

    fn parse_articles(path: &str, body: &str) -> Result<Vec<Article>, ProviderError> {
        let parsed: ArticlesResponse =
            serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
        if parsed.status.as_deref() == Some("error") {
            return Err(ProviderError::Status {
                status: 200,
                message: parsed.message.unwrap_or_default(),
            });
        }
        if let Some(total) = parsed.total_results {
            info!("📰 {} totalResults={}", path, total);
        }
        Ok(parsed.articles)
    }
}

/// Pull `message` out of a provider error body, or fall back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

#[async_trait]
impl NewsProvider for NewsApiClient {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Article>, ProviderError> {
        let (scope_key, scope_value) = match request.scope {
            SourceScope::Sources(ref ids) => ("sources", ids.join(",")),
            SourceScope::Domains(ref domains) => ("domains", domains.join(",")),
        };
        let params = [
            ("q", request.query.trim().to_string()),
            ("from", request.from.clone()),
            ("to", request.to.clone()),
            ("language", normalize_language(&request.language).to_string()),
            ("pageSize", request.page_size.to_string()),
            ("sortBy", "publishedAt".to_string()),
            (scope_key, scope_value),
        ];
        let body = self.get("/v2/everything", &params).await?;
        Self::parse_articles("everything", &body)
    }

    async fn top_headlines(&self, request: &HeadlinesRequest) -> Result<Vec<Article>, ProviderError> {
        let params = [
            ("language", normalize_language(&request.language).to_string()),
            ("pageSize", request.page_size.to_string()),
            ("sources", request.sources.join(",")),
        ];
        let body = self.get("/v2/top-headlines", &params).await?;
        Self::parse_articles("top-headlines", &body)
    }

    async fn sources(&self) -> Result<Vec<ProviderSource>, ProviderError> {
        let body = self
            .get("/v2/top-headlines/sources", &[("language", "en".to_string())])
            .await?;
        let parsed: SourcesResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::Parse(e.to_string()))?;
        if parsed.status.as_deref() == Some("error") {
            return Err(ProviderError::Status {
                status: 200,
                message: parsed.message.unwrap_or_default(),
            });
        }
        Ok(parsed.sources)
    }
}

/// GNews-compatible keyword search.
pub struct GNewsClient {
    api_key: String,
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GNewsResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    articles: Vec<Article>,
}

impl GNewsClient {
    pub fn new(api_key: String, http: reqwest::Client) -> Self {
        Self {
            api_key,
            base_url: GNEWS_BASE_URL.to_string(),
            timeout: Duration::from_secs(12),
            http,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn search(&self, query: &str, language: &str, max: usize) -> Result<Vec<Article>, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::MissingKey);
        }
        info!("📰 GNews search q={:?} max={}", query, max);

        let response = self
            .http
            .get(format!("{}/api/v4/search", self.base_url))
            .query(&[
                ("q", query.to_string()),
                ("lang", normalize_language(language).to_string()),
                ("max", max.to_string()),
                ("apikey", self.api_key.clone()),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Http(e.without_url().to_string()))?;
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        let parsed: GNewsResponse = serde_json::from_str(&body).map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parsed.articles)
    }
}

#[derive(Debug)]
pub enum ProviderError {
    /// No API key configured. Not retried; surfaced to the caller.
    MissingKey,
    Http(String),
    Status { status: u16, message: String },
    Parse(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::MissingKey => write!(f, "news provider API key is not configured"),
            ProviderError::Http(e) => write!(f, "HTTP error: {e}"),
            ProviderError::Status { status, message } => write!(f, "provider returned {status}: {message}"),
            ProviderError::Parse(e) => write!(f, "Parse error: {e}"),
        }
    }
}

impl std::error::Error for ProviderError {}
