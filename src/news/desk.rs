//! The news pipeline: request text in, brief out.

use std::sync::Arc;

use tracing::info;

use crate::clock::Clock;
use crate::news::brief::BriefRenderer;
use crate::news::fetch::{FetchRequest, Fetcher};
use crate::news::provider::{HeadlinesRequest, NewsProvider, ProviderError, SearchRequest, SourceScope};
use crate::news::query::build_boolean_query;
use crate::news::understanding::{RequestScope, Understanding};
use crate::news::window::{DateWindow, ResolvedWindow};

pub const DEFAULT_MAX_ARTICLES: usize = 8;
pub const DIGEST_HEADLINES: usize = 5;

pub struct NewsDesk {
    understanding: Understanding,
    fetcher: Fetcher,
    renderer: BriefRenderer,
    provider: Arc<dyn NewsProvider>,
    clock: Arc<dyn Clock>,
    max_articles: usize,
    key_tail: Option<String>,
}

impl NewsDesk {
    pub fn new(
        understanding: Understanding,
        fetcher: Fetcher,
        renderer: BriefRenderer,
        provider: Arc<dyn NewsProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            understanding,
            fetcher,
            renderer,
            provider,
            clock,
            max_articles: DEFAULT_MAX_ARTICLES,
            key_tail: None,
        }
    }

    pub fn with_max_articles(mut self, max_articles: usize) -> Self {
        self.max_articles = max_articles.max(1);
        self
    }

    /// Remember a redacted form of the provider key for health reports.
    pub fn with_api_key(mut self, key: &str) -> Self {
        self.key_tail = (!key.trim().is_empty()).then(|| redact(key.trim()));
        self
    }

    pub fn renderer(&self) -> &BriefRenderer {
        &self.renderer
    }

    /// Answer a news request in the user's language.
    ///
    /// Only configuration problems are errors; everything else ends in a
    /// readable reply.
    pub async fn brief(&self, text: &str) -> Result<String, NewsError> {
        let today = self.clock.today();
        let (plan, window, language) = tokio::join!(
            self.understanding.plan(text, today),
            self.understanding.window(text, today),
            self.understanding.language(text),
        );

        let limits = *self.fetcher.limits();
        let resolved = ResolvedWindow::new(window, today, &limits);
        info!(
            "📰 News request lang={} requested={} clamped={}",
            language, resolved.requested, resolved.clamped
        );

        if resolved.is_too_old(today, &limits) {
            let notice = format!(
                "Your requested date range is too old for my news provider. \
                 The earliest I can fetch is {} (UTC). Try a more recent range within the last {} days.",
                limits.floor(today),
                limits.max_days
            );
            return Ok(self.renderer.translate_notice(&notice, &language).await);
        }

        let query = build_boolean_query(&plan);
        let query = if query.is_empty() { text.trim().to_string() } else { query };
        let scope = self.understanding.scope(text, &query).await;
        let query = match scope {
            RequestScope::Generic => String::new(),
            RequestScope::Topical => query,
        };

        let available = self.fetcher.resolver().categories().await?;
        let categories = self.understanding.categories(text, &available, scope).await;
        info!("📰 scope={} query={:?} categories={:?}", scope, query, categories);

        let request = FetchRequest {
            query,
            window: resolved.clamped,
            max_articles: self.max_articles,
            language: self.understanding.canonical_language().to_string(),
            strict: resolved.requested.is_single_day(),
            categories: Some(categories),
        };
        let articles = self.fetcher.fetch(&request).await?;

        if articles.is_empty() {
            let notice = format!(
                "No articles were found from your configured sources for {} (UTC).",
                resolved.clamped
            );
            return Ok(self.renderer.translate_notice(&notice, &language).await);
        }

        Ok(self.renderer.render(&articles, &language).await)
    }

    /// Top headlines from every curated source, untranslated.
    pub async fn headline_brief(&self) -> Result<String, NewsError> {
        let language = self.understanding.canonical_language().to_string();
        let articles = self.fetcher.headlines(DIGEST_HEADLINES, &language).await?;
        if articles.is_empty() {
            return Ok("No fresh headlines from your trusted sources right now. 🥲".to_string());
        }
        Ok(self.renderer.render_headlines(&articles))
    }

    /// Check the provider with minimal requests.
    pub async fn health(&self) -> HealthReport {
        let mut report = HealthReport {
            key: Err(ProviderError::MissingKey.to_string()),
            sources: Vec::new(),
            categories: Vec::new(),
            top_headlines: None,
            everything: None,
        };
        let Some(ref tail) = self.key_tail else {
            return report;
        };
        report.key = Ok(tail.clone());

        let sources = match self.fetcher.resolver().resolve(None).await {
            Ok(sources) => sources,
            Err(e) => {
                report.key = Err(e.to_string());
                return report;
            }
        };
        report.sources = sources.clone();
        report.categories = self.fetcher.resolver().categories().await.unwrap_or_default();

        let language = self.understanding.canonical_language().to_string();
        report.top_headlines = Some(
            self.provider
                .top_headlines(&HeadlinesRequest {
                    sources: sources.clone(),
                    language: language.clone(),
                    page_size: 1,
                })
                .await
                .map(|a| a.len())
                .map_err(|e| e.to_string()),
        );

        let (from, to) = DateWindow::day(self.clock.today()).utc_bounds();
        report.everything = Some(
            self.provider
                .search(&SearchRequest {
                    query: String::new(),
                    from,
                    to,
                    language,
                    page_size: 1,
                    scope: SourceScope::Sources(sources),
                })
                .await
                .map(|a| a.len())
                .map_err(|e| e.to_string()),
        );
        report
    }
}

/// Key tail only, e.g. `…a1b2`.
pub fn redact(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 4 {
        format!("…{}", chars[chars.len() - 4..].iter().collect::<String>())
    } else {
        "****".to_string()
    }
}

#[derive(Debug)]
pub struct HealthReport {
    pub key: Result<String, String>,
    pub sources: Vec<String>,
    pub categories: Vec<String>,
    /// Article count of a one-article request, or the error.
    pub top_headlines: Option<Result<usize, String>>,
    pub everything: Option<Result<usize, String>>,
}

impl std::fmt::Display for HealthReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.key {
            Ok(ref tail) => writeln!(f, "key: {tail}")?,
            Err(ref e) => return write!(f, "key error: {e}"),
        }
        let sources = if self.sources.is_empty() { "(none)".to_string() } else { self.sources.join(",") };
        writeln!(f, "sources: {sources}")?;
        writeln!(f, "categories: {}", self.categories.join(","))?;
        for (name, outcome) in [("top-headlines", &self.top_headlines), ("everything", &self.everything)] {
            match outcome {
                Some(Ok(n)) => writeln!(f, "{name}: ok ({n})")?,
                Some(Err(e)) => writeln!(f, "{name}: error: {e}")?,
                None => writeln!(f, "{name}: skipped")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum NewsError {
    Provider(ProviderError),
}

impl std::fmt::Display for NewsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NewsError::Provider(e) => write!(f, "news provider: {e}"),
        }
    }
}

impl std::error::Error for NewsError {}

impl From<ProviderError> for NewsError {
    fn from(e: ProviderError) -> Self {
        NewsError::Provider(e)
    }
}
