use chrono::NaiveDate;
use chrono_tz::Tz;
use cron::Schedule;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use teloxide::types::{ChatId, UserId};

use crate::news::filter::{DEFAULT_URL_DENY, QualityFilter};
use crate::news::provider::{GNEWS_BASE_URL, NEWSAPI_BASE_URL};

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Invalid regex pattern.
    InvalidRegex { pattern: String, source: regex::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::InvalidRegex { pattern, source } => {
                write!(f, "invalid regex pattern '{}': {}", pattern, source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::InvalidRegex { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

/// Sources used when the config does not list any.
pub const DEFAULT_CURATED_SOURCES: &[&str] = &[
    "bbc-news",
    "the-new-york-times",
    "associated-press",
    "reuters",
    "vox",
    "bloomberg",
    "the-wall-street-journal",
    "financial-times",
    "cnbc",
    "the-verge",
    "techcrunch",
    "wired",
    "engadget",
    "cnn",
    "the-washington-post",
    "nbc-news",
    "abc-news",
];

pub const DEFAULT_PERSONA: &str = "You are a friendly, well-informed assistant in a Telegram chat. \
Answer briefly and naturally in the user's language.";

pub const DEFAULT_ANALYST_PROMPT: &str = "You are a rigorous quantitative analyst proficient in interpreting stock, \
cryptocurrency, and economic news data. Please make concise and logical assessments and strategy \
recommendations based on the following market data.";

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    telegram_bot_token: String,
    #[serde(default)]
    openai_api_key: String,
    #[serde(default)]
    newsapi_key: String,
    #[serde(default)]
    gnews_api_key: String,
    /// Receives forwarded WARN/ERROR logs.
    admin_user_id: Option<u64>,
    /// Chat that gets the scheduled digest; no digest when unset.
    digest_chat_id: Option<i64>,
    #[serde(default = "default_digest_schedule")]
    digest_schedule: String,
    #[serde(default = "default_digest_timezone")]
    digest_timezone: String,
    http_proxy: Option<String>,
    https_proxy: Option<String>,
    /// Directory for logs. Defaults to current directory.
    data_dir: Option<String>,
    persona: Option<String>,
    analyst_prompt: Option<String>,
    #[serde(default)]
    curated_sources: Vec<String>,
    #[serde(default)]
    news: NewsFile,
    #[serde(default)]
    conversation: ConversationFile,
    #[serde(default)]
    market: MarketFile,
    #[serde(default)]
    stickers: HashMap<String, String>,
}

#[derive(Deserialize)]
#[serde(default)]
struct NewsFile {
    max_window_days: u32,
    provider_min_date: Option<NaiveDate>,
    http_timeout_secs: u64,
    title_min_chars: usize,
    title_min_alpha: usize,
    description_min_chars: usize,
    /// Empty string disables the URL deny filter.
    url_deny_regex: String,
    max_articles: usize,
    commentary: bool,
    canonical_language: String,
    /// 0 keeps the source catalog until restart.
    catalog_ttl_minutes: u64,
    newsapi_base_url: String,
    gnews_base_url: String,
    openai_base_url: String,
}

impl Default for NewsFile {
    fn default() -> Self {
        Self {
            max_window_days: 30,
            provider_min_date: None,
            http_timeout_secs: 12,
            title_min_chars: 20,
            title_min_alpha: 5,
            description_min_chars: 40,
            url_deny_regex: DEFAULT_URL_DENY.to_string(),
            max_articles: 8,
            commentary: true,
            canonical_language: "en".to_string(),
            catalog_ttl_minutes: 0,
            newsapi_base_url: NEWSAPI_BASE_URL.to_string(),
            gnews_base_url: GNEWS_BASE_URL.to_string(),
            openai_base_url: crate::llm::DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct ConversationFile {
    history_limit: usize,
    threshold_min: u32,
    threshold_max: u32,
}

impl Default for ConversationFile {
    fn default() -> Self {
        Self { history_limit: 500, threshold_min: 1000, threshold_max: 2000 }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct MarketFile {
    companies: Vec<Company>,
    crypto: Vec<String>,
    macro_topics: Vec<String>,
    chart_base_url: String,
    coingecko_base_url: String,
}

impl Default for MarketFile {
    fn default() -> Self {
        Self {
            companies: default_companies(),
            crypto: [
                "Bitcoin", "Ethereum", "BNB", "Solana", "XRP",
                "Cardano", "Dogecoin", "Toncoin", "Polkadot", "Avalanche",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            macro_topics: ["Federal Reserve", "tariff", "trade war"].into_iter().map(String::from).collect(),
            chart_base_url: crate::market::CHART_BASE_URL.to_string(),
            coingecko_base_url: crate::market::COINGECKO_BASE_URL.to_string(),
        }
    }
}

/// A listed company on the market watchlist.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Company {
    pub name: String,
    pub ticker: String,
}

fn default_companies() -> Vec<Company> {
    [
        ("Apple", "AAPL"), ("Microsoft", "MSFT"), ("NVIDIA", "NVDA"), ("AMD", "AMD"),
        ("Google", "GOOGL"), ("Meta", "META"), ("Amazon", "AMZN"), ("Tesla", "TSLA"),
        ("ASML", "ASML"), ("TSMC", "TSM"), ("Pfizer", "PFE"), ("Moderna", "MRNA"),
        ("Johnson & Johnson", "JNJ"), ("UnitedHealth", "UNH"), ("AbbVie", "ABBV"),
        ("Gilead", "GILD"), ("Amgen", "AMGN"), ("Merck", "MRK"),
        ("Lockheed Martin", "LMT"), ("Raytheon", "RTX"), ("Northrop Grumman", "NOC"),
        ("General Dynamics", "GD"), ("Boeing", "BA"), ("Netflix", "NFLX"),
        ("Alibaba", "BABA"), ("Tencent", "TCEHY"), ("Baidu", "BIDU"),
        ("Snap", "SNAP"), ("Zoom", "ZM"),
    ]
    .into_iter()
    .map(|(name, ticker)| Company { name: name.to_string(), ticker: ticker.to_string() })
    .collect()
}

fn default_digest_schedule() -> String {
    // sec min hour day month weekday year
    "0 30 8 * * * *".to_string()
}

fn default_digest_timezone() -> String {
    "UTC".to_string()
}

/// Scheduled headline + analysis digest.
#[derive(Debug, Clone)]
pub struct DigestConfig {
    pub chat_id: ChatId,
    pub schedule: Schedule,
    pub timezone: Tz,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyConfig {
    pub http: Option<String>,
    pub https: Option<String>,
}

impl ProxyConfig {
    pub fn describe(&self) -> String {
        match (&self.http, &self.https) {
            (None, None) => "(none)".to_string(),
            (http, https) => format!(
                "http={} https={}",
                http.as_deref().unwrap_or("-"),
                https.as_deref().unwrap_or("-")
            ),
        }
    }
}

/// News pipeline tunables.
#[derive(Debug, Clone)]
pub struct NewsSettings {
    pub max_window_days: u32,
    pub provider_min_date: Option<NaiveDate>,
    pub http_timeout: Duration,
    /// Title thresholds and the case-insensitive URL deny pattern.
    pub filter: QualityFilter,
    pub max_articles: usize,
    pub commentary: bool,
    pub canonical_language: String,
    pub catalog_ttl: Option<Duration>,
    pub newsapi_base_url: String,
    pub gnews_base_url: String,
    pub openai_base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationSettings {
    pub history_limit: usize,
    pub threshold_min: u32,
    pub threshold_max: u32,
}

#[derive(Debug, Clone)]
pub struct MarketSettings {
    pub companies: Vec<Company>,
    /// Display names, e.g. "Bitcoin".
    pub crypto: Vec<String>,
    pub macro_topics: Vec<String>,
    pub chart_base_url: String,
    pub coingecko_base_url: String,
}

pub struct Config {
    /// Path to the config file
    pub config_path: PathBuf,
    pub telegram_bot_token: String,
    pub openai_api_key: String,
    pub newsapi_key: String,
    pub gnews_api_key: String,
    pub admin_user_id: Option<UserId>,
    pub digest: Option<DigestConfig>,
    pub proxy: ProxyConfig,
    /// Directory for state files (logs).
    pub data_dir: PathBuf,
    pub persona: String,
    pub analyst_prompt: String,
    pub curated_sources: Vec<String>,
    pub news: NewsSettings,
    pub conversation: ConversationSettings,
    pub market: MarketSettings,
    /// Emotion label → Telegram sticker file id.
    pub stickers: HashMap<String, String>,
}

impl Config {
    /// Load from a JSON file, filling unset secrets from the process environment.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |name| std::env::var(name).ok())
    }

    pub fn load_with_env<P, F>(path: P, env: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        let env_string = |value: String, name: &str| -> String {
            if value.trim().is_empty() {
                env(name).map(|v| v.trim().to_string()).unwrap_or_default()
            } else {
                value.trim().to_string()
            }
        };
        let env_optional = |value: Option<String>, name: &str| -> Option<String> {
            value
                .or_else(|| env(name))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let telegram_bot_token = env_string(file.telegram_bot_token, "TELEGRAM_BOT_TOKEN");
        if telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }

        let admin_user_id = match file.admin_user_id {
            Some(id) => Some(UserId(id)),
            None => parse_env_id::<u64>(&env, "ADMIN_USER_ID")?.map(UserId),
        };
        let digest_chat_id = match file.digest_chat_id {
            Some(id) => Some(id),
            None => parse_env_id::<i64>(&env, "DAILY_DIGEST_CHAT_ID")?,
        };

        let digest = match digest_chat_id {
            Some(chat_id) => {
                let schedule = Schedule::from_str(&file.digest_schedule).map_err(|e| {
                    ConfigError::Validation(format!("invalid digest_schedule '{}': {}", file.digest_schedule, e))
                })?;
                let timezone: Tz = file.digest_timezone.parse().map_err(|_| {
                    ConfigError::Validation(format!("unknown digest_timezone '{}'", file.digest_timezone))
                })?;
                Some(DigestConfig { chat_id: ChatId(chat_id), schedule, timezone })
            }
            None => None,
        };

        let news = news_settings(file.news)?;

        let conversation = ConversationSettings {
            history_limit: file.conversation.history_limit,
            threshold_min: file.conversation.threshold_min,
            threshold_max: file.conversation.threshold_max,
        };
        if conversation.history_limit < 2 {
            return Err(ConfigError::Validation("conversation.history_limit must be at least 2".into()));
        }
        if conversation.threshold_min == 0 || conversation.threshold_min > conversation.threshold_max {
            return Err(ConfigError::Validation(
                "conversation thresholds must satisfy 0 < threshold_min <= threshold_max".into(),
            ));
        }

        let curated_sources = if file.curated_sources.is_empty() {
            DEFAULT_CURATED_SOURCES.iter().map(|s| s.to_string()).collect()
        } else {
            file.curated_sources
        };

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            config_path,
            telegram_bot_token,
            openai_api_key: env_string(file.openai_api_key, "OPENAI_API_KEY"),
            newsapi_key: env_string(file.newsapi_key, "NEWSAPI_KEY"),
            gnews_api_key: env_string(file.gnews_api_key, "GNEWS_API_KEY"),
            admin_user_id,
            digest,
            proxy: ProxyConfig {
                http: env_optional(file.http_proxy, "HTTP_PROXY"),
                https: env_optional(file.https_proxy, "HTTPS_PROXY"),
            },
            data_dir,
            persona: file.persona.unwrap_or_else(|| DEFAULT_PERSONA.to_string()),
            analyst_prompt: file.analyst_prompt.unwrap_or_else(|| DEFAULT_ANALYST_PROMPT.to_string()),
            curated_sources,
            news,
            conversation,
            market: MarketSettings {
                companies: file.market.companies,
                crypto: file.market.crypto,
                macro_topics: file.market.macro_topics,
                chart_base_url: file.market.chart_base_url,
                coingecko_base_url: file.market.coingecko_base_url,
            },
            stickers: file
                .stickers
                .into_iter()
                .map(|(emotion, id)| (emotion.to_lowercase(), id))
                .collect(),
        })
    }
}

fn news_settings(file: NewsFile) -> Result<NewsSettings, ConfigError> {
    if file.max_window_days == 0 {
        return Err(ConfigError::Validation("news.max_window_days must be positive".into()));
    }
    if file.max_articles == 0 {
        return Err(ConfigError::Validation("news.max_articles must be positive".into()));
    }
    let canonical_language = file.canonical_language.trim().to_lowercase();
    if canonical_language.is_empty() {
        return Err(ConfigError::Validation("news.canonical_language is required".into()));
    }

    let filter = QualityFilter {
        title_min_chars: file.title_min_chars,
        title_min_alpha: file.title_min_alpha,
        description_min_chars: file.description_min_chars,
        url_deny: None,
    };
    let pattern = file.url_deny_regex.trim().to_string();
    let filter = if pattern.is_empty() {
        filter
    } else {
        filter
            .with_url_deny(&pattern)
            .map_err(|e| ConfigError::InvalidRegex { pattern, source: e })?
    };

    Ok(NewsSettings {
        max_window_days: file.max_window_days,
        provider_min_date: file.provider_min_date,
        http_timeout: Duration::from_secs(file.http_timeout_secs.max(1)),
        filter,
        max_articles: file.max_articles,
        commentary: file.commentary,
        canonical_language,
        catalog_ttl: (file.catalog_ttl_minutes > 0).then(|| Duration::from_secs(file.catalog_ttl_minutes * 60)),
        newsapi_base_url: file.newsapi_base_url,
        gnews_base_url: file.gnews_base_url,
        openai_base_url: file.openai_base_url,
    })
}

fn parse_env_id<T: FromStr>(env: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>, ConfigError> {
    match env(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Validation(format!("{name} must be a numeric id, got '{raw}'"))),
        None => Ok(None),
    }
}
