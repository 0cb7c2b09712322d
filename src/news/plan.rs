//! Structured news query plans and the keyword fallback that builds them without a model.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::news::window::{phrase_window, DateWindow};

/// Maximum keywords produced by the tokenizer fallback.
pub const MAX_FALLBACK_KEYWORDS: usize = 12;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\w\-]+").expect("valid regex"));

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub organizations: Vec<String>,
    #[serde(default)]
    pub people: Vec<String>,
}

/// What to search for and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    /// Always the canonical pipeline language; output translation happens later.
    pub language: String,
    pub time_window: DateWindow,
    pub entities: Entities,
    pub categories: Vec<String>,
    pub keywords: Vec<String>,
}

impl QueryPlan {
    pub fn empty(language: &str, time_window: DateWindow) -> Self {
        Self {
            language: language.to_string(),
            time_window,
            entities: Entities::default(),
            categories: Vec::new(),
            keywords: Vec::new(),
        }
    }

    /// Build a plan from a model's JSON reply, tolerating missing or mistyped fields.
    ///
    /// A missing or unparseable window falls back to phrase matching on `text`.
    pub fn from_model_json(value: &Value, text: &str, today: NaiveDate, language: &str) -> Option<Self> {
        let object = value.as_object()?;

        let time_window = object
            .get("time_window")
            .and_then(window_from_json)
            .unwrap_or_else(|| phrase_window(text, today));

        let entities = object.get("entities");
        let plan = Self {
            language: language.to_string(),
            time_window,
            entities: Entities {
                locations: string_list(entities.and_then(|e| e.get("locations"))),
                organizations: string_list(entities.and_then(|e| e.get("organizations"))),
                people: string_list(entities.and_then(|e| e.get("people"))),
            },
            categories: string_list(object.get("categories")),
            keywords: string_list(object.get("keywords")),
        };
        Some(plan.normalized(language))
    }

    /// Enforce the plan invariants: canonical language, ordered window,
    /// case-insensitively unique keywords, lowercase unique categories.
    pub fn normalized(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self.time_window = DateWindow::new(self.time_window.from, self.time_window.to);
        self.keywords = dedup_case_insensitive(self.keywords);
        self.categories = dedup_case_insensitive(
            self.categories.into_iter().map(|c| c.trim().to_lowercase()).collect::<Vec<String>>(),
        );
        self
    }
}

/// Parse `{"from": "YYYY-MM-DD", "to": "YYYY-MM-DD"}`; timestamps are cut to their date.
pub fn window_from_json(value: &Value) -> Option<DateWindow> {
    let from = parse_date(value.get("from")?.as_str()?)?;
    let to = parse_date(value.get("to")?.as_str()?)?;
    Some(DateWindow::new(from, to))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let day = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

/// Trim, drop empties, and keep the first spelling of each case-insensitive duplicate.
pub fn dedup_case_insensitive<I>(terms: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    terms
        .into_iter()
        .filter_map(|t| {
            let t = t.trim().to_string();
            (!t.is_empty() && seen.insert(t.to_lowercase())).then_some(t)
        })
        .collect()
}

/// Build a plan from raw text with no model: word tokens longer than two
/// characters become keywords and the window comes from phrase matching.
pub fn keyword_plan(text: &str, today: NaiveDate, language: &str) -> QueryPlan {
    let mut seen = HashSet::new();
    let mut keywords: Vec<String> = TOKEN
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|tok| {
            let key = tok.trim_matches(|c: char| c == ' ' || c == '_' || c == '-').to_lowercase();
            key.chars().count() > 2 && seen.insert(key)
        })
        .take(MAX_FALLBACK_KEYWORDS)
        .map(str::to_string)
        .collect();

    if keywords.is_empty() && !text.trim().is_empty() {
        keywords.push(text.trim().to_string());
    }

    QueryPlan {
        keywords,
        ..QueryPlan::empty(language, phrase_window(text, today))
    }
    .normalized(language)
}
