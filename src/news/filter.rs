//! Drops duplicate and junk articles before rendering.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::news::article::Article;

/// Titles that are only a timestamp, e.g. `3/14/2024 9:00 GMT`.
static TIMESTAMP_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"^\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\s+\d{1,2}:\d{2}\s*(GMT|UTC)?$")
        .case_insensitive(true)
        .build()
        .expect("valid regex")
});

pub const DEFAULT_URL_DENY: &str = r"/(programmes|schedule|live|video)/";

#[derive(Debug, Clone)]
pub struct QualityFilter {
    pub title_min_chars: usize,
    pub title_min_alpha: usize,
    pub description_min_chars: usize,
    pub url_deny: Option<Regex>,
}

impl Default for QualityFilter {
    fn default() -> Self {
        Self {
            title_min_chars: 20,
            title_min_alpha: 5,
            description_min_chars: 40,
            url_deny: RegexBuilder::new(DEFAULT_URL_DENY).case_insensitive(true).build().ok(),
        }
    }
}

impl QualityFilter {
    /// Compile `pattern` case-insensitively as the URL deny list.
    pub fn with_url_deny(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.url_deny = Some(RegexBuilder::new(pattern).case_insensitive(true).build()?);
        Ok(self)
    }

    /// Dedup by URL (first wins) and drop junk. Order is preserved.
    pub fn apply(&self, articles: Vec<Article>) -> Vec<Article> {
        let mut seen = HashSet::new();
        articles
            .into_iter()
            .filter(|a| {
                let url = a.url.trim();
                !url.is_empty() && seen.insert(url.to_string())
            })
            .filter(|a| self.keep(a))
            .collect()
    }

    fn keep(&self, article: &Article) -> bool {
        let title = article.title.trim();
        if title.is_empty() || TIMESTAMP_TITLE.is_match(title) {
            return false;
        }
        if title.chars().filter(|c| c.is_alphabetic()).count() < self.title_min_alpha {
            return false;
        }
        if title.chars().count() < self.title_min_chars
            && article.description.trim().chars().count() < self.description_min_chars
        {
            return false;
        }
        match self.url_deny {
            Some(ref deny) => !deny.is_match(&article.url),
            None => true,
        }
    }
}
