//! Fetching articles through a ladder of provider requests.
//!
//! Each [`FetchStep`] either finds articles or tells the ladder to move on.
//! Steps run in order; the first one that finds anything wins.

use std::sync::Arc;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::news::article::Article;
use crate::news::catalog::SourceResolver;
use crate::news::filter::QualityFilter;
use crate::news::provider::{HeadlinesRequest, NewsProvider, ProviderError, SearchRequest, SourceScope};
use crate::news::window::{clamp, DateWindow, WindowLimits};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStep {
    /// Search restricted to the resolved source ids.
    SearchSources,
    /// Same search restricted to the sources' domains.
    SearchDomains,
    /// Top headlines from the same sources. Only for strict requests about today.
    TodayHeadlines,
    /// Top headlines from every curated source. Only when not strict or after a hard failure.
    GenericHeadlines,
}

impl FetchStep {
    pub const LADDER: [FetchStep; 4] = [
        FetchStep::SearchSources,
        FetchStep::SearchDomains,
        FetchStep::TodayHeadlines,
        FetchStep::GenericHeadlines,
    ];

    fn enabled(self, state: &LadderState) -> bool {
        match self {
            FetchStep::SearchSources | FetchStep::SearchDomains => true,
            FetchStep::TodayHeadlines => state.strict && state.is_today,
            FetchStep::GenericHeadlines => !state.strict || state.failed,
        }
    }
}

impl std::fmt::Display for FetchStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FetchStep::SearchSources => "search(sources)",
            FetchStep::SearchDomains => "search(domains)",
            FetchStep::TodayHeadlines => "top-headlines(today)",
            FetchStep::GenericHeadlines => "top-headlines(all)",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Miss {
    Empty,
    Failed,
}

#[derive(Debug)]
pub enum StepOutcome {
    Found(Vec<Article>),
    TryNext(Miss),
}

struct LadderState {
    strict: bool,
    is_today: bool,
    failed: bool,
}

/// One fetch request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub query: String,
    pub window: DateWindow,
    pub max_articles: usize,
    pub language: String,
    /// The user asked about one specific day; don't substitute generic headlines.
    pub strict: bool,
    pub categories: Option<Vec<String>>,
}

pub struct Fetcher {
    provider: Arc<dyn NewsProvider>,
    resolver: Arc<SourceResolver>,
    filter: QualityFilter,
    limits: WindowLimits,
    clock: Arc<dyn Clock>,
}

impl Fetcher {
    pub fn new(
        provider: Arc<dyn NewsProvider>,
        resolver: Arc<SourceResolver>,
        filter: QualityFilter,
        limits: WindowLimits,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            resolver,
            filter,
            limits,
            clock,
        }
    }

    pub fn resolver(&self) -> &SourceResolver {
        &self.resolver
    }

    pub fn limits(&self) -> &WindowLimits {
        &self.limits
    }

    /// Run the ladder. Provider failures are logged and skipped; only a
    /// missing API key is returned as an error.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Article>, ProviderError> {
        let categories = request.categories.as_deref();
        let sources = self.resolver.resolve(categories).await?;
        if sources.is_empty() {
            return Ok(Vec::new());
        }

        let today = self.clock.today();
        let window = clamp(request.window, today, &self.limits);
        let mut state = LadderState {
            strict: request.strict,
            is_today: window.is_exactly(today),
            failed: false,
        };

        for step in FetchStep::LADDER {
            if !step.enabled(&state) {
                continue;
            }
            match self.run_step(step, request, window, &sources).await? {
                StepOutcome::Found(articles) => {
                    info!("📰 {} found {} articles", step, articles.len());
                    return Ok(articles);
                }
                StepOutcome::TryNext(Miss::Empty) => {
                    info!("📰 {} empty for {} (strict={})", step, window, request.strict);
                }
                StepOutcome::TryNext(Miss::Failed) => state.failed = true,
            }
        }
        Ok(Vec::new())
    }

    /// Top headlines from all curated sources, filtered, at most `limit`.
    pub async fn headlines(&self, limit: usize, language: &str) -> Result<Vec<Article>, ProviderError> {
        let sources = self.resolver.resolve(None).await?;
        if sources.is_empty() {
            return Ok(Vec::new());
        }
        let request = HeadlinesRequest {
            sources,
            language: language.to_string(),
            page_size: limit,
        };
        match self.provider.top_headlines(&request).await {
            Ok(articles) => Ok(self.finish(articles, limit)),
            Err(ProviderError::MissingKey) => Err(ProviderError::MissingKey),
            Err(e) => {
                warn!("📰 Top headlines failed: {e}");
                Ok(Vec::new())
            }
        }
    }

    async fn run_step(
        &self,
        step: FetchStep,
        request: &FetchRequest,
        window: DateWindow,
        sources: &[String],
    ) -> Result<StepOutcome, ProviderError> {
        let (from, to) = window.utc_bounds();
        let search = |scope: SourceScope| SearchRequest {
            query: request.query.clone(),
            from: from.clone(),
            to: to.clone(),
            language: request.language.clone(),
            page_size: request.max_articles,
            scope,
        };
        let headlines = |sources: Vec<String>| HeadlinesRequest {
            sources,
            language: request.language.clone(),
            page_size: request.max_articles,
        };

        let result = match step {
            FetchStep::SearchSources => {
                self.provider
                    .search(&search(SourceScope::Sources(sources.to_vec())))
                    .await
            }
            FetchStep::SearchDomains => {
                let domains = self.resolver.domains(request.categories.as_deref()).await?;
                if domains.is_empty() {
                    return Ok(StepOutcome::TryNext(Miss::Empty));
                }
                self.provider.search(&search(SourceScope::Domains(domains))).await
            }
            FetchStep::TodayHeadlines => self.provider.top_headlines(&headlines(sources.to_vec())).await,
            FetchStep::GenericHeadlines => {
                let all = self.resolver.resolve(None).await?;
                if all.is_empty() {
                    return Ok(StepOutcome::TryNext(Miss::Empty));
                }
                self.provider.top_headlines(&headlines(all)).await
            }
        };

        match result {
            Ok(articles) => {
                let kept = self.finish(articles, request.max_articles);
                if kept.is_empty() {
                    Ok(StepOutcome::TryNext(Miss::Empty))
                } else {
                    Ok(StepOutcome::Found(kept))
                }
            }
            Err(ProviderError::MissingKey) => Err(ProviderError::MissingKey),
            Err(e) => {
                warn!("📰 {} failed: {e}", step);
                Ok(StepOutcome::TryNext(Miss::Failed))
            }
        }
    }

    fn finish(&self, articles: Vec<Article>, limit: usize) -> Vec<Article> {
        let mut kept = self.filter.apply(articles);
        kept.truncate(limit);
        kept
    }
}
