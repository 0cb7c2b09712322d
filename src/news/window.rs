//! Date windows: phrase matching, clamping to the provider lookback, UTC bounds.

use std::sync::LazyLock;

use chrono::{Datelike, Days, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

static DAYS_AGO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,3})\s+days?\s+ago\b").expect("valid regex"));

/// An inclusive range of UTC calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateWindow {
    /// Build a window, forcing `to` up to `from` when reversed.
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to: to.max(from) }
    }

    pub fn day(date: NaiveDate) -> Self {
        Self { from: date, to: date }
    }

    pub fn is_single_day(&self) -> bool {
        self.from == self.to
    }

    pub fn is_exactly(&self, date: NaiveDate) -> bool {
        self.from == date && self.to == date
    }

    /// Full-day UTC timestamp bounds, e.g. `2024-06-10T00:00:00Z`..`2024-06-10T23:59:59Z`.
    pub fn utc_bounds(&self) -> (String, String) {
        (
            format!("{}T00:00:00Z", self.from.format("%Y-%m-%d")),
            format!("{}T23:59:59Z", self.to.format("%Y-%m-%d")),
        )
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} → {}", self.from, self.to)
    }
}

/// How far back the provider lets us search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimits {
    pub max_days: u32,
    /// Provider-specific earliest date; the later of this and `today - max_days` wins.
    pub provider_min_date: Option<NaiveDate>,
}

impl Default for WindowLimits {
    fn default() -> Self {
        Self {
            max_days: 30,
            provider_min_date: None,
        }
    }
}

impl WindowLimits {
    /// Earliest date a request may reach. Never after `today`.
    pub fn floor(&self, today: NaiveDate) -> NaiveDate {
        let by_days = days_before(today, self.max_days as u64);
        let floor = match self.provider_min_date {
            Some(min) if min > by_days => min,
            _ => by_days,
        };
        floor.min(today)
    }
}

/// Clamp a window into `[floor, today]`. Idempotent.
pub fn clamp(window: DateWindow, today: NaiveDate, limits: &WindowLimits) -> DateWindow {
    let start = window.from.max(limits.floor(today)).min(today);
    let end = window.to.min(today);
    let clamped = DateWindow::new(start, end);
    if clamped != window {
        debug!("Clamped window {} to {}", window, clamped);
    }
    clamped
}

/// The window the user asked for and the window we will actually search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedWindow {
    pub requested: DateWindow,
    pub clamped: DateWindow,
}

impl ResolvedWindow {
    pub fn new(requested: DateWindow, today: NaiveDate, limits: &WindowLimits) -> Self {
        Self {
            requested,
            clamped: clamp(requested, today, limits),
        }
    }

    /// The whole request lies before the provider's lookback floor.
    pub fn is_too_old(&self, today: NaiveDate, limits: &WindowLimits) -> bool {
        self.requested.to < limits.floor(today)
    }
}

fn days_before(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN)
}

/// English phrase matching used when no smarter resolver is available.
///
/// Recognizes "yesterday", "N days ago", "last week", "this week" and
/// "this month"; anything else means today.
pub fn phrase_window(text: &str, today: NaiveDate) -> DateWindow {
    let t = text.to_lowercase();

    if t.contains("yesterday") {
        return DateWindow::day(days_before(today, 1));
    }
    if let Some(days) = DAYS_AGO
        .captures(&t)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
    {
        return DateWindow::day(days_before(today, days));
    }
    let since_monday = today.weekday().num_days_from_monday() as u64;
    if t.contains("last week") {
        let start = days_before(today, since_monday + 7);
        let end = start.checked_add_days(Days::new(6)).unwrap_or(start);
        return DateWindow::new(start, end);
    }
    if t.contains("this week") {
        return DateWindow::new(days_before(today, since_monday), today);
    }
    if t.contains("this month") {
        return DateWindow::new(today.with_day(1).unwrap_or(today), today);
    }
    DateWindow::day(today)
}
