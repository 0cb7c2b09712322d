//! Turning free-form requests into plans, windows, scopes, categories and languages.
//!
//! [`LlmUnderstanding`] asks a chat model; [`RuleBasedUnderstanding`] needs
//! nothing and always answers. [`Understanding`] puts the two together.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::llm::{self, ChatModel, ChatRequest, Message, Model};
use crate::news::catalog::GENERAL;
use crate::news::plan::{keyword_plan, window_from_json, QueryPlan};
use crate::news::window::{phrase_window, DateWindow};

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\w\-]+").expect("valid regex"));

/// Words that only say "give me news" or "when"; a request made of these alone is generic.
const GENERIC_WORDS: &[&str] = &[
    "news", "headline", "headlines", "latest", "top", "breaking", "today", "todays", "yesterday", "tonight", "this",
    "last", "past", "week", "weeks", "weekend", "month", "days", "ago", "what", "whats", "happened", "happening",
    "going", "are", "the", "any", "some", "new", "show", "tell", "give", "about", "from", "for", "please", "and",
    "with", "recent", "current", "update", "updates", "all", "world",
];

/// Whether a request names subjects or only asks for news in a time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestScope {
    /// Time-only or broad, e.g. "today's news".
    Generic,
    /// Mentions concrete subjects.
    Topical,
}

impl std::fmt::Display for RequestScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestScope::Generic => write!(f, "generic"),
            RequestScope::Topical => write!(f, "topical"),
        }
    }
}

#[async_trait]
pub trait TextUnderstanding: Send + Sync {
    async fn extract_plan(&self, text: &str, today: NaiveDate) -> Result<QueryPlan, UnderstandingError>;

    async fn resolve_window(&self, text: &str, today: NaiveDate) -> Result<DateWindow, UnderstandingError>;

    async fn classify_scope(&self, text: &str, query: &str) -> Result<RequestScope, UnderstandingError>;

    /// Pick from `available`; never returns a category outside it.
    async fn choose_categories(
        &self,
        text: &str,
        available: &[String],
        scope: RequestScope,
    ) -> Result<Vec<String>, UnderstandingError>;

    /// Short lowercase language code such as `en` or `zh`.
    async fn detect_language(&self, text: &str) -> Result<String, UnderstandingError>;
}

#[derive(Debug)]
pub enum UnderstandingError {
    Model(llm::Error),
    Malformed(String),
}

impl std::fmt::Display for UnderstandingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnderstandingError::Model(e) => write!(f, "model call failed: {e}"),
            UnderstandingError::Malformed(reply) => write!(f, "malformed model reply: {reply}"),
        }
    }
}

impl std::error::Error for UnderstandingError {}

impl From<llm::Error> for UnderstandingError {
    fn from(e: llm::Error) -> Self {
        UnderstandingError::Model(e)
    }
}

/// First JSON value of the wanted shape in a reply that may wrap it in prose or code fences.
pub fn first_json(reply: &str, open: char) -> Option<Value> {
    reply.match_indices(open).find_map(|(i, _)| {
        let mut stream = serde_json::Deserializer::from_str(&reply[i..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) if value.is_object() || value.is_array() => Some(value),
            _ => None,
        }
    })
}

const PLAN_PROMPT: &str = "Extract a structured news query plan from the user's text.\n\
Return only JSON with the keys language, time_window, entities, categories, keywords:\n\
- language: \"en\"\n\
- time_window: {\"from\": \"YYYY-MM-DD\", \"to\": \"YYYY-MM-DD\"}, today if the user asks about today\n\
- entities: {\"locations\": [...], \"organizations\": [...], \"people\": [...]}\n\
- categories: high-level topics of one to three words, e.g. technology, finance, sports\n\
- keywords: 6 to 14 concrete English search terms and synonyms, short phrases allowed, no stopwords\n\
No commentary.";

pub struct LlmUnderstanding {
    model: Arc<dyn ChatModel>,
}

impl LlmUnderstanding {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    async fn ask(&self, system: Option<&str>, user: String) -> Result<String, UnderstandingError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(user));
        let request = ChatRequest::new(Model::Mini, messages).temperature(0.0);
        Ok(self.model.complete(&request).await?)
    }
}

#[async_trait]
impl TextUnderstanding for LlmUnderstanding {
    async fn extract_plan(&self, text: &str, today: NaiveDate) -> Result<QueryPlan, UnderstandingError> {
        let reply = self
            .ask(Some(&format!("{PLAN_PROMPT}\nToday is {today} (UTC).")), text.trim().to_string())
            .await?;
        first_json(&reply, '{')
            .and_then(|value| QueryPlan::from_model_json(&value, text, today, "en"))
            .ok_or(UnderstandingError::Malformed(reply))
    }

    async fn resolve_window(&self, text: &str, today: NaiveDate) -> Result<DateWindow, UnderstandingError> {
        let prompt = format!(
            "You resolve dates. Today in UTC is {today}. The user may write in any language.\n\
             Infer the time window of the news they ask for and return only JSON:\n\
             {{\"from\": \"YYYY-MM-DD\", \"to\": \"YYYY-MM-DD\", \"explanation\": \"short reason in English\"}}\n\
             Rules: today means from = to = today; yesterday means today minus one day; \
             N days ago means today minus N days; last week means the seven days before the current week; \
             explicit ranges are used as given; when unclear pick the most recent reasonable window.\n\n\
             User request:\n{text}"
        );
        let reply = self.ask(None, prompt).await?;
        let value = first_json(&reply, '{').ok_or_else(|| UnderstandingError::Malformed(reply.clone()))?;
        if let Some(why) = value.get("explanation").and_then(Value::as_str) {
            debug!("🗓️ Window reason: {why}");
        }
        window_from_json(&value).ok_or(UnderstandingError::Malformed(reply))
    }

    async fn classify_scope(&self, text: &str, query: &str) -> Result<RequestScope, UnderstandingError> {
        let prompt = format!(
            "Classify this news request as generic or topical.\n\
             - generic: only a time or something broad, like \"today's news\", \"last week news\", \"latest headlines\".\n\
             - topical: names specific subjects such as companies, people, places, tickers, policies, products or teams.\n\
             Answer with exactly one word: generic or topical.\n\n\
             User text: {text}\n\
             Proposed query (may be empty): {query}"
        );
        let reply = self.ask(None, prompt).await?;
        let word = reply
            .split_whitespace()
            .next()
            .map(|w| w.trim_matches(|c: char| !c.is_alphabetic()).to_lowercase())
            .unwrap_or_default();
        match word.as_str() {
            "generic" => Ok(RequestScope::Generic),
            "topical" => Ok(RequestScope::Topical),
            _ => Err(UnderstandingError::Malformed(reply)),
        }
    }

    async fn choose_categories(
        &self,
        text: &str,
        available: &[String],
        scope: RequestScope,
    ) -> Result<Vec<String>, UnderstandingError> {
        if available.is_empty() {
            return Ok(vec![GENERAL.to_string()]);
        }
        let mut offered: Vec<&String> = available.iter().collect();
        offered.sort();
        offered.dedup();

        let prompt = format!(
            "Choose the news categories that fit this request.\n\
             Available categories: {offered:?}\n\
             Request type: {scope}\n\
             For generic, time-only requests prefer \"general\" and add others only if most readers would expect them. \
             For topical requests include every relevant category.\n\
             Return only a JSON array, e.g. [\"general\", \"business\"].\n\n\
             User text: {text}"
        );
        let reply = self.ask(None, prompt).await?;
        let Some(Value::Array(items)) = first_json(&reply, '[') else {
            return Err(UnderstandingError::Malformed(reply));
        };

        let mut seen = HashSet::new();
        let chosen: Vec<String> = items
            .iter()
            .filter_map(Value::as_str)
            .map(|c| c.trim().to_lowercase())
            .filter(|c| available.contains(c) && seen.insert(c.clone()))
            .collect();

        if chosen.is_empty() {
            return Ok(vec![GENERAL.to_string()]);
        }
        Ok(chosen)
    }

    async fn detect_language(&self, text: &str) -> Result<String, UnderstandingError> {
        let reply = self
            .ask(
                Some(
                    "Identify the language of the user's text. Reply with only its ISO 639-1 code, \
                     e.g. ar, de, en, es, fr, he, it, nl, no, pt, ru, sv, zh.",
                ),
                format!("Text: \"{text}\""),
            )
            .await?;
        let code = reply
            .split_whitespace()
            .next()
            .map(|w| w.trim_matches(|c: char| !c.is_ascii_alphabetic()).to_lowercase())
            .unwrap_or_default();
        if (2..=3).contains(&code.len()) && code.chars().all(|c| c.is_ascii_lowercase()) {
            Ok(code)
        } else {
            Err(UnderstandingError::Malformed(reply))
        }
    }
}

/// Deterministic understanding with no external calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedUnderstanding;

fn words(text: &str) -> Vec<String> {
    WORD.find_iter(text)
        .map(|m| m.as_str().trim_matches(|c: char| c == '_' || c == '-').to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Guess a language from the script the text is written in.
pub fn script_language(text: &str) -> &'static str {
    let mut counts = [0usize; 5];
    for c in text.chars() {
        let slot = match c {
            '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' => 0,
            '\u{0400}'..='\u{04FF}' => 1,
            '\u{0600}'..='\u{06FF}' => 2,
            '\u{0590}'..='\u{05FF}' => 3,
            c if c.is_ascii_alphabetic() => 4,
            _ => continue,
        };
        counts[slot] += 1;
    }
    let best = counts
        .iter()
        .enumerate()
        .max_by_key(|(_, n)| **n)
        .filter(|(_, n)| **n > 0)
        .map(|(i, _)| i);
    match best {
        Some(0) => "zh",
        Some(1) => "ru",
        Some(2) => "ar",
        Some(3) => "he",
        _ => "en",
    }
}

#[async_trait]
impl TextUnderstanding for RuleBasedUnderstanding {
    async fn extract_plan(&self, text: &str, today: NaiveDate) -> Result<QueryPlan, UnderstandingError> {
        Ok(keyword_plan(text, today, "en"))
    }

    async fn resolve_window(&self, text: &str, today: NaiveDate) -> Result<DateWindow, UnderstandingError> {
        Ok(phrase_window(text, today))
    }

    async fn classify_scope(&self, text: &str, _query: &str) -> Result<RequestScope, UnderstandingError> {
        let topical = words(text)
            .iter()
            .filter(|w| w.chars().count() > 2 && !w.chars().all(|c| c.is_ascii_digit()))
            .any(|w| !GENERIC_WORDS.contains(&w.as_str()));
        Ok(if topical { RequestScope::Topical } else { RequestScope::Generic })
    }

    async fn choose_categories(
        &self,
        text: &str,
        available: &[String],
        _scope: RequestScope,
    ) -> Result<Vec<String>, UnderstandingError> {
        let mut seen = HashSet::new();
        let chosen: Vec<String> = words(text)
            .into_iter()
            .filter(|w| available.contains(w) && seen.insert(w.clone()))
            .collect();
        if chosen.is_empty() {
            return Ok(vec![GENERAL.to_string()]);
        }
        Ok(chosen)
    }

    async fn detect_language(&self, text: &str) -> Result<String, UnderstandingError> {
        Ok(script_language(text).to_string())
    }
}

/// A primary understanding with the rule-based one behind it.
///
/// Every operation is infallible: primary failures are logged and the
/// fallback answers instead. A failed window resolution means today.
pub struct Understanding {
    primary: Option<Arc<dyn TextUnderstanding>>,
    fallback: RuleBasedUnderstanding,
    canonical_language: String,
}

impl Understanding {
    pub fn new(primary: Option<Arc<dyn TextUnderstanding>>, canonical_language: impl Into<String>) -> Self {
        Self {
            primary,
            fallback: RuleBasedUnderstanding,
            canonical_language: canonical_language.into(),
        }
    }

    pub fn rule_based(canonical_language: impl Into<String>) -> Self {
        Self::new(None, canonical_language)
    }

    pub fn canonical_language(&self) -> &str {
        &self.canonical_language
    }

    pub async fn plan(&self, text: &str, today: NaiveDate) -> QueryPlan {
        if let Some(ref primary) = self.primary {
            match primary.extract_plan(text, today).await {
                Ok(plan) => return plan.normalized(&self.canonical_language),
                Err(e) => warn!("🧭 Query planning failed, using keywords: {e}"),
            }
        }
        keyword_plan(text, today, &self.canonical_language)
    }

    pub async fn window(&self, text: &str, today: NaiveDate) -> DateWindow {
        match self.primary {
            Some(ref primary) => match primary.resolve_window(text, today).await {
                Ok(window) => window,
                Err(e) => {
                    warn!("🗓️ Window resolution failed, using today: {e}");
                    DateWindow::day(today)
                }
            },
            None => phrase_window(text, today),
        }
    }

    pub async fn scope(&self, text: &str, query: &str) -> RequestScope {
        if let Some(ref primary) = self.primary {
            match primary.classify_scope(text, query).await {
                Ok(scope) => return scope,
                Err(e) => warn!("🧭 Scope classification failed: {e}"),
            }
        }
        match self.fallback.classify_scope(text, query).await {
            Ok(scope) => scope,
            Err(_) => RequestScope::Generic,
        }
    }

    pub async fn categories(&self, text: &str, available: &[String], scope: RequestScope) -> Vec<String> {
        if let Some(ref primary) = self.primary {
            match primary.choose_categories(text, available, scope).await {
                Ok(chosen) => {
                    info!("🧭 Categories chosen: {:?}", chosen);
                    return chosen;
                }
                Err(e) => warn!("🧭 Category selection failed: {e}"),
            }
        }
        self.fallback
            .choose_categories(text, available, scope)
            .await
            .unwrap_or_else(|_| vec![GENERAL.to_string()])
    }

    pub async fn language(&self, text: &str) -> String {
        if let Some(ref primary) = self.primary {
            match primary.detect_language(text).await {
                Ok(code) => return code,
                Err(e) => warn!("🧭 Language detection failed: {e}"),
            }
        }
        script_language(text).to_string()
    }
}
