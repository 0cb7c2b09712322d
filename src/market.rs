//! Market snapshot (stocks + crypto) and the LLM investment analysis built on it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate};
use serde::Deserialize;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::MarketSettings;
use crate::llm::{ChatModel, ChatRequest, Message, Model};
use crate::news::article::Article;
use crate::news::fetch::{FetchRequest, Fetcher};
use crate::news::provider::GNewsClient;
use crate::news::window::DateWindow;

pub const CHART_BASE_URL: &str = "https://query1.finance.yahoo.com";
pub const COINGECKO_BASE_URL: &str = "https://api.coingecko.com";

const USER_AGENT: &str = "Mozilla/5.0 (compatible; newsbrief/0.1)";
const MAX_QUERY_TERMS: usize = 12;
const FALLBACK_QUERY: &str = "markets OR stocks OR crypto OR rates";
const NEWS_LOOKBACK_DAYS: u64 = 14;
const NEWS_MAX_ARTICLES: usize = 20;
pub const ANALYSIS_FAILED: &str = "Could not generate the investment analysis at this time.";

/// Latest daily bar for one ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl std::fmt::Display for DailyBar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} O {:.2} H {:.2} L {:.2} C {:.2} V {:.0}",
            self.date, self.open, self.high, self.low, self.close, self.volume
        )
    }
}

#[derive(Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Deserialize)]
struct ChartError {
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

impl ChartResult {
    /// The newest row with a close price.
    fn latest_bar(&self) -> Option<DailyBar> {
        let quote = self.indicators.quote.first()?;
        let at = |values: &[Option<f64>], i: usize| values.get(i).copied().flatten();
        (0..self.timestamp.len()).rev().find_map(|i| {
            let close = at(&quote.close, i)?;
            let date = DateTime::from_timestamp(self.timestamp[i], 0)?.date_naive();
            Some(DailyBar {
                date,
                open: at(&quote.open, i).unwrap_or(close),
                high: at(&quote.high, i).unwrap_or(close),
                low: at(&quote.low, i).unwrap_or(close),
                close,
                volume: at(&quote.volume, i).unwrap_or(0.0),
            })
        })
    }
}

/// CoinGecko id for a display name: `"Avalanche"` → `avalanche`, `"Shiba Inu"` → `shiba-inu`.
pub fn coin_id(name: &str) -> String {
    name.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join("-")
}

/// Quoted OR-query over the first twelve unique watchlist terms.
pub fn analysis_query(terms: &[String]) -> String {
    let mut seen = std::collections::HashSet::new();
    let picked: Vec<String> = terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty() && seen.insert(t.to_string()))
        .take(MAX_QUERY_TERMS)
        .map(|t| format!("\"{t}\""))
        .collect();
    if picked.is_empty() {
        FALLBACK_QUERY.to_string()
    } else {
        picked.join(" OR ")
    }
}

/// Stock chart and crypto price endpoints.
pub struct MarketData {
    http: reqwest::Client,
    chart_base_url: String,
    coingecko_base_url: String,
    timeout: Duration,
}

impl MarketData {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            chart_base_url: CHART_BASE_URL.to_string(),
            coingecko_base_url: COINGECKO_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_base_urls(mut self, chart: impl Into<String>, coingecko: impl Into<String>) -> Self {
        self.chart_base_url = chart.into().trim_end_matches('/').to_string();
        self.coingecko_base_url = coingecko.into().trim_end_matches('/').to_string();
        self
    }

    pub async fn daily_bar(&self, ticker: &str) -> Result<DailyBar, MarketError> {
        let response = self
            .http
            .get(format!("{}/v8/finance/chart/{}", self.chart_base_url, ticker))
            .query(&[("interval", "1d"), ("range", "1d")])
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| MarketError::Http(e.without_url().to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| MarketError::Http(e.to_string()))?;
        let parsed: ChartResponse = serde_json::from_str(&body).map_err(|e| {
            if status.is_success() {
                MarketError::Parse(e.to_string())
            } else {
                MarketError::Status(status.as_u16())
            }
        })?;

        if let Some(error) = parsed.chart.error {
            return Err(MarketError::Api(error.description));
        }
        parsed
            .chart
            .result
            .unwrap_or_default()
            .first()
            .and_then(ChartResult::latest_bar)
            .ok_or_else(|| MarketError::NoData(ticker.to_string()))
    }

    /// Latest bars for every ticker that answered; failures are logged and skipped.
    pub async fn daily_bars(&self, tickers: &[String]) -> BTreeMap<String, DailyBar> {
        let mut bars = BTreeMap::new();
        for ticker in tickers {
            match self.daily_bar(ticker).await {
                Ok(bar) => {
                    bars.insert(ticker.clone(), bar);
                }
                Err(e) => warn!("📈 Stock fetch failed for {ticker}: {e}"),
            }
        }
        bars
    }

    /// USD spot prices keyed by CoinGecko id. Empty on any failure.
    pub async fn crypto_prices(&self, ids: &[String]) -> BTreeMap<String, f64> {
        if ids.is_empty() {
            return BTreeMap::new();
        }
        match self.fetch_crypto(ids).await {
            Ok(prices) => prices,
            Err(e) => {
                warn!("🪙 Crypto fetch failed: {e}");
                BTreeMap::new()
            }
        }
    }

    async fn fetch_crypto(&self, ids: &[String]) -> Result<BTreeMap<String, f64>, MarketError> {
        let response = self
            .http
            .get(format!("{}/api/v3/simple/price", self.coingecko_base_url))
            .query(&[("ids", ids.join(",")), ("vs_currencies", "usd".to_string())])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| MarketError::Http(e.without_url().to_string()))?;

        if !response.status().is_success() {
            return Err(MarketError::Status(response.status().as_u16()));
        }
        let parsed: BTreeMap<String, BTreeMap<String, f64>> =
            response.json().await.map_err(|e| MarketError::Parse(e.to_string()))?;
        Ok(parsed
            .into_iter()
            .filter_map(|(id, quotes)| quotes.get("usd").map(|usd| (id, *usd)))
            .collect())
    }
}

/// Everything the analysis prompt is built from.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub stocks: BTreeMap<String, DailyBar>,
    pub crypto: BTreeMap<String, f64>,
    pub headlines: Vec<String>,
}

impl Snapshot {
    pub fn prompt(&self) -> String {
        let stocks = if self.stocks.is_empty() {
            "(unavailable)".to_string()
        } else {
            self.stocks
                .iter()
                .map(|(ticker, bar)| format!("{ticker}: {bar}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let crypto = if self.crypto.is_empty() {
            "(unavailable)".to_string()
        } else {
            self.crypto
                .iter()
                .map(|(id, usd)| format!("{id}: ${usd:.2}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let headlines = if self.headlines.is_empty() {
            "(none)".to_string()
        } else {
            self.headlines.iter().map(|h| format!("- {h}")).collect::<Vec<_>>().join("\n")
        };

        format!(
            "You are a pragmatic sell-side macro/quant analyst.\n\
             Summarize the following market data (≤800 words) and propose 3–5 actionable trade ideas.\n\n\
             Stocks (latest daily OHLCV):\n{stocks}\n\n\
             Crypto (USD):\n{crypto}\n\n\
             News headlines (trusted outlets):\n{headlines}\n\n\
             For each idea, include rationale, key risks, a hedge, and an indicative holding horizon."
        )
    }
}

pub struct Analyst {
    market: MarketData,
    fetcher: Fetcher,
    gnews: Option<GNewsClient>,
    model: Arc<dyn ChatModel>,
    settings: MarketSettings,
    clock: Arc<dyn Clock>,
}

impl Analyst {
    pub fn new(
        market: MarketData,
        fetcher: Fetcher,
        model: Arc<dyn ChatModel>,
        settings: MarketSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            market,
            fetcher,
            gnews: None,
            model,
            settings,
            clock,
        }
    }

    /// Secondary aggregator used when the curated sources return nothing.
    pub fn with_gnews(mut self, gnews: GNewsClient) -> Self {
        self.gnews = Some(gnews);
        self
    }

    pub async fn snapshot(&self) -> Snapshot {
        let mut tickers: Vec<String> = self.settings.companies.iter().map(|c| c.ticker.clone()).collect();
        tickers.dedup();
        let coin_ids: Vec<String> = self.settings.crypto.iter().map(|c| coin_id(c)).collect();

        let stocks = self.market.daily_bars(&tickers).await;
        let crypto = self.market.crypto_prices(&coin_ids).await;
        let headlines = self
            .news()
            .await
            .into_iter()
            .map(|a| a.title.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        Snapshot { stocks, crypto, headlines }
    }

    /// Market commentary with trade ideas, written under `role`.
    pub async fn analysis(&self, role: &str) -> String {
        let snapshot = self.snapshot().await;
        info!(
            "📈 Analysis snapshot: {} stocks, {} coins, {} headlines",
            snapshot.stocks.len(),
            snapshot.crypto.len(),
            snapshot.headlines.len()
        );

        let request = ChatRequest::new(Model::Full, vec![Message::system(role), Message::user(snapshot.prompt())])
            .temperature(0.3);
        match self.model.complete(&request).await {
            Ok(text) => text,
            Err(e) => {
                warn!("📈 Analysis generation failed: {e}");
                ANALYSIS_FAILED.to_string()
            }
        }
    }

    async fn news(&self) -> Vec<Article> {
        let terms: Vec<String> = self
            .settings
            .companies
            .iter()
            .map(|c| c.name.clone())
            .chain(self.settings.macro_topics.iter().cloned())
            .chain(self.settings.crypto.iter().cloned())
            .collect();
        let query = analysis_query(&terms);

        let today = self.clock.today();
        let from = today.checked_sub_days(Days::new(NEWS_LOOKBACK_DAYS)).unwrap_or(today);
        let request = FetchRequest {
            query: query.clone(),
            window: DateWindow::new(from, today),
            max_articles: NEWS_MAX_ARTICLES,
            language: "en".to_string(),
            strict: false,
            categories: None,
        };

        let articles = match self.fetcher.fetch(&request).await {
            Ok(articles) => articles,
            Err(e) => {
                warn!("📈 Analysis news failed: {e}");
                Vec::new()
            }
        };
        if !articles.is_empty() {
            return articles;
        }

        let Some(ref gnews) = self.gnews else {
            return articles;
        };
        info!("📈 Curated sources empty, trying GNews");
        match gnews.search(&query, "en", NEWS_MAX_ARTICLES).await {
            Ok(articles) => articles,
            Err(e) => {
                warn!("📈 GNews fallback failed: {e}");
                Vec::new()
            }
        }
    }
}

#[derive(Debug)]
pub enum MarketError {
    Http(String),
    Status(u16),
    Api(String),
    Parse(String),
    NoData(String),
}

impl std::fmt::Display for MarketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketError::Http(e) => write!(f, "HTTP error: {e}"),
            MarketError::Status(s) => write!(f, "unexpected status {s}"),
            MarketError::Api(e) => write!(f, "API error: {e}"),
            MarketError::Parse(e) => write!(f, "Parse error: {e}"),
            MarketError::NoData(t) => write!(f, "no daily data for {t}"),
        }
    }
}

impl std::error::Error for MarketError {}
