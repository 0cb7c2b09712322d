//! Curated source allow-list resolved against the provider's source catalog.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::news::provider::{NewsProvider, ProviderError};

/// Used when nothing in the allow-list survives resolution.
pub const FALLBACK_SOURCES: &[&str] = &["reuters", "bbc-news", "associated-press"];

pub const GENERAL: &str = "general";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMeta {
    pub url: String,
    pub name: String,
    pub category: String,
}

/// The provider's source listing, keyed by source id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCatalog {
    pub sources: BTreeMap<String, SourceMeta>,
    pub categories: BTreeSet<String>,
}

impl SourceCatalog {
    /// What callers see when the provider listing is unavailable.
    pub fn unavailable() -> Self {
        Self {
            sources: BTreeMap::new(),
            categories: BTreeSet::from([GENERAL.to_string()]),
        }
    }

    pub fn from_listing<I>(listing: I) -> Self
    where
        I: IntoIterator<Item = crate::news::provider::ProviderSource>,
    {
        let mut sources = BTreeMap::new();
        let mut categories = BTreeSet::new();
        for source in listing {
            if source.id.is_empty() {
                continue;
            }
            let category = source.category.trim().to_lowercase();
            if !category.is_empty() {
                categories.insert(category.clone());
            }
            sources.insert(
                source.id,
                SourceMeta {
                    url: source.url,
                    name: source.name,
                    category,
                },
            );
        }
        if categories.is_empty() {
            categories.insert(GENERAL.to_string());
        }
        Self { sources, categories }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    fn category_of(&self, id: &str) -> &str {
        self.sources.get(id).map(|m| m.category.as_str()).unwrap_or("")
    }
}

/// Split on commas, trim, lowercase, spaces to hyphens, dedup in order.
pub fn normalize_allow_list<S: AsRef<str>>(entries: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .flat_map(|e| e.as_ref().split(','))
        .map(|part| part.trim().to_lowercase().replace(' ', "-"))
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

/// Resolve an already-normalized allow-list against a catalog.
///
/// An empty allow-list yields nothing. An empty catalog passes the allow-list
/// through. Otherwise the allow-list is intersected with the catalog and,
/// when categories are given, narrowed to them (then to "general", then left
/// as is). An empty result becomes [`FALLBACK_SOURCES`].
pub fn resolve_sources(allow_list: &[String], catalog: &SourceCatalog, categories: Option<&[String]>) -> Vec<String> {
    if allow_list.is_empty() {
        warn!("📰 Curated source list is empty, nothing to fetch");
        return Vec::new();
    }
    if catalog.is_empty() {
        warn!("📰 Could not validate sources with the provider, using curated list as is");
        return allow_list.to_vec();
    }

    let intersect: Vec<String> = allow_list
        .iter()
        .filter(|id| catalog.sources.contains_key(id.as_str()))
        .cloned()
        .collect();

    let wanted: HashSet<String> = categories
        .unwrap_or_default()
        .iter()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect();

    let allowed = if wanted.is_empty() {
        intersect
    } else {
        let in_category: Vec<String> = intersect
            .iter()
            .filter(|id| wanted.contains(catalog.category_of(id)))
            .cloned()
            .collect();
        if !in_category.is_empty() {
            in_category
        } else {
            let general: Vec<String> = intersect
                .iter()
                .filter(|id| catalog.category_of(id) == GENERAL)
                .cloned()
                .collect();
            if general.is_empty() { intersect } else { general }
        }
    };

    let dropped: Vec<&String> = allow_list.iter().filter(|id| !allowed.contains(id)).collect();
    if !dropped.is_empty() {
        warn!("📰 Dropping unsupported or filtered sources: {:?}", dropped);
    }

    if allowed.is_empty() {
        error!("📰 No curated source survived resolution, using fallback sources");
        return FALLBACK_SOURCES.iter().map(|s| s.to_string()).collect();
    }
    allowed
}

/// Unique hostnames of the given source ids, `www.` stripped, in id order.
pub fn derive_domains(ids: &[String], catalog: &SourceCatalog) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter_map(|id| catalog.sources.get(id))
        .filter_map(|meta| reqwest::Url::parse(meta.url.trim()).ok())
        .filter_map(|url| url.host_str().map(|h| h.to_lowercase()))
        .map(|host| host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
        .filter(|host| !host.is_empty() && seen.insert(host.clone()))
        .collect()
}

struct Cached {
    catalog: SourceCatalog,
    fetched_at: DateTime<Utc>,
}

/// Lazily fetched provider catalog.
///
/// Kept for the process lifetime unless a TTL is set. Failed or empty
/// fetches are not kept, so the next call retries.
pub struct CatalogCache {
    provider: Arc<dyn NewsProvider>,
    clock: Arc<dyn Clock>,
    ttl: Option<Duration>,
    slot: Mutex<Option<Cached>>,
}

impl CatalogCache {
    pub fn new(provider: Arc<dyn NewsProvider>, clock: Arc<dyn Clock>) -> Self {
        Self {
            provider,
            clock,
            ttl: None,
            slot: Mutex::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// The cached catalog, fetching it if missing, empty or expired.
    ///
    /// Only a missing provider key is returned as an error; other failures
    /// give [`SourceCatalog::unavailable`].
    pub async fn get(&self) -> Result<SourceCatalog, ProviderError> {
        let mut slot = self.slot.lock().await;
        if let Some(ref cached) = *slot {
            if !self.expired(cached) {
                return Ok(cached.catalog.clone());
            }
        }
        self.fetch_into(&mut slot).await
    }

    /// Refetch now regardless of what is cached.
    pub async fn refresh(&self) -> Result<SourceCatalog, ProviderError> {
        let mut slot = self.slot.lock().await;
        self.fetch_into(&mut slot).await
    }

    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }

    fn expired(&self, cached: &Cached) -> bool {
        match self.ttl {
            Some(ttl) => {
                let age = self.clock.now().signed_duration_since(cached.fetched_at);
                age.to_std().map(|age| age >= ttl).unwrap_or(false)
            }
            None => false,
        }
    }

    async fn fetch_into(&self, slot: &mut Option<Cached>) -> Result<SourceCatalog, ProviderError> {
        match self.provider.sources().await {
            Ok(listing) => {
                let catalog = SourceCatalog::from_listing(listing);
                info!(
                    "📰 Provider supports {} sources, categories={:?}",
                    catalog.sources.len(),
                    catalog.categories
                );
                *slot = if catalog.is_empty() {
                    None
                } else {
                    Some(Cached {
                        catalog: catalog.clone(),
                        fetched_at: self.clock.now(),
                    })
                };
                Ok(catalog)
            }
            Err(ProviderError::MissingKey) => Err(ProviderError::MissingKey),
            Err(e) => {
                error!("📰 Fetching provider sources failed: {e}");
                *slot = None;
                Ok(SourceCatalog::unavailable())
            }
        }
    }
}

/// The curated allow-list bound to the cached provider catalog.
pub struct SourceResolver {
    allow_list: Vec<String>,
    cache: CatalogCache,
}

impl SourceResolver {
    pub fn new<S: AsRef<str>>(allow_list: &[S], cache: CatalogCache) -> Self {
        Self {
            allow_list: normalize_allow_list(allow_list),
            cache,
        }
    }

    pub fn allow_list(&self) -> &[String] {
        &self.allow_list
    }

    pub fn cache(&self) -> &CatalogCache {
        &self.cache
    }

    pub async fn resolve(&self, categories: Option<&[String]>) -> Result<Vec<String>, ProviderError> {
        if self.allow_list.is_empty() {
            return Ok(resolve_sources(&self.allow_list, &SourceCatalog::unavailable(), categories));
        }
        let catalog = self.cache.get().await?;
        let sources = resolve_sources(&self.allow_list, &catalog, categories);
        info!("📰 Resolved sources: {:?}", sources);
        Ok(sources)
    }

    pub async fn domains(&self, categories: Option<&[String]>) -> Result<Vec<String>, ProviderError> {
        let ids = self.resolve(categories).await?;
        let catalog = self.cache.get().await?;
        let domains = derive_domains(&ids, &catalog);
        if domains.is_empty() {
            warn!("📰 No domains resolved from provider metadata");
        }
        Ok(domains)
    }

    /// Category names the provider reports, `["general"]` when unknown.
    pub async fn categories(&self) -> Result<Vec<String>, ProviderError> {
        let catalog = self.cache.get().await?;
        Ok(catalog.categories.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, FixedClock};
    use crate::news::article::Article;
    use crate::news::provider::{HeadlinesRequest, ProviderSource, SearchRequest};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn source(id: &str, url: &str, category: &str) -> ProviderSource {
        ProviderSource {
            id: id.into(),
            name: id.into(),
            url: url.into(),
            category: category.into(),
        }
    }

    fn catalog() -> SourceCatalog {
        SourceCatalog::from_listing(vec![
            source("reuters", "https://www.reuters.com", "general"),
            source("bbc-news", "https://www.bbc.co.uk/news", "general"),
            source("the-verge", "https://www.theverge.com", "technology"),
            source("wired", "https://www.wired.com", "technology"),
            source("cnbc", "https://www.cnbc.com", "business"),
        ])
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_allow_list() {
        let list = normalize_allow_list(&["BBC News, reuters", " reuters ", "", "the-verge"]);
        assert_eq!(list, ids(&["bbc-news", "reuters", "the-verge"]));
    }

    #[test]
    fn test_resolve_by_category() {
        let allow = ids(&["reuters", "the-verge", "wired", "unknown-outlet"]);
        let resolved = resolve_sources(&allow, &catalog(), Some(&ids(&["Technology"])));
        assert_eq!(resolved, ids(&["the-verge", "wired"]));
    }

    #[test]
    fn test_resolve_falls_back_to_general() {
        let allow = ids(&["reuters", "the-verge"]);
        let resolved = resolve_sources(&allow, &catalog(), Some(&ids(&["sports"])));
        assert_eq!(resolved, ids(&["reuters"]));
    }

    #[test]
    fn test_resolve_keeps_intersection_without_general() {
        let allow = ids(&["the-verge", "cnbc"]);
        let resolved = resolve_sources(&allow, &catalog(), Some(&ids(&["sports"])));
        assert_eq!(resolved, ids(&["the-verge", "cnbc"]));
    }

    #[test]
    fn test_resolve_unsupported_uses_fallback_triplet() {
        let allow = ids(&["nowhere-times"]);
        let resolved = resolve_sources(&allow, &catalog(), None);
        assert_eq!(resolved, ids(FALLBACK_SOURCES));
    }

    #[test]
    fn test_resolve_without_catalog_passes_allow_list() {
        let allow = ids(&["nowhere-times", "reuters"]);
        let resolved = resolve_sources(&allow, &SourceCatalog::unavailable(), Some(&ids(&["technology"])));
        assert_eq!(resolved, allow);
    }

    #[test]
    fn test_empty_allow_list_resolves_to_nothing() {
        assert!(resolve_sources(&[], &catalog(), None).is_empty());
    }

    #[test]
    fn test_derive_domains() {
        let domains = derive_domains(&ids(&["reuters", "bbc-news", "wired", "missing"]), &catalog());
        assert_eq!(domains, ids(&["reuters.com", "bbc.co.uk", "wired.com"]));
    }

    #[test]
    fn test_unavailable_catalog_has_general() {
        let catalog = SourceCatalog::unavailable();
        assert!(catalog.is_empty());
        assert_eq!(catalog.categories.into_iter().collect::<Vec<_>>(), ids(&["general"]));
    }

    struct ListingProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl NewsProvider for ListingProvider {
        async fn search(&self, _: &SearchRequest) -> Result<Vec<Article>, ProviderError> {
            Ok(Vec::new())
        }

        async fn top_headlines(&self, _: &HeadlinesRequest) -> Result<Vec<Article>, ProviderError> {
            Ok(Vec::new())
        }

        async fn sources(&self) -> Result<Vec<ProviderSource>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::Http("connection reset".into()));
            }
            Ok(vec![source("reuters", "https://www.reuters.com", "general")])
        }
    }

    /// A clock tests can move forward.
    struct ManualClock(StdMutex<DateTime<Utc>>);

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn start() -> DateTime<Utc> {
        FixedClock::on(NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()).now()
    }

    #[tokio::test]
    async fn test_cache_fetches_once() {
        let provider = Arc::new(ListingProvider { calls: AtomicUsize::new(0), fail: false });
        let cache = CatalogCache::new(provider.clone(), Arc::new(FixedClock(start())));
        cache.get().await.unwrap();
        cache.get().await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        cache.refresh().await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

        cache.invalidate().await;
        cache.get().await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cache_ttl_expiry() {
        let provider = Arc::new(ListingProvider { calls: AtomicUsize::new(0), fail: false });
        let clock = Arc::new(ManualClock(StdMutex::new(start())));
        let cache = CatalogCache::new(provider.clone(), clock.clone()).with_ttl(Some(Duration::from_secs(3600)));

        cache.get().await.unwrap();
        *clock.0.lock().unwrap() = start() + chrono::Duration::minutes(30);
        cache.get().await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        *clock.0.lock().unwrap() = start() + chrono::Duration::hours(2);
        cache.get().await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_not_cached() {
        let provider = Arc::new(ListingProvider { calls: AtomicUsize::new(0), fail: true });
        let cache = CatalogCache::new(provider.clone(), Arc::new(FixedClock(start())));
        let catalog = cache.get().await.unwrap();
        assert_eq!(catalog, SourceCatalog::unavailable());
        cache.get().await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resolver_categories() {
        let provider = Arc::new(ListingProvider { calls: AtomicUsize::new(0), fail: true });
        let resolver = SourceResolver::new(&["Reuters"], CatalogCache::new(provider, Arc::new(FixedClock(start()))));
        assert_eq!(resolver.categories().await.unwrap(), ids(&["general"]));
        assert_eq!(resolver.resolve(None).await.unwrap(), ids(&["reuters"]));
    }
}
