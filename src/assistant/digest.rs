//! Scheduled headline and market digest.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tracing::{info, warn};

use crate::assistant::engine::Engine;
use crate::assistant::telegram::TelegramClient;
use crate::clock::Clock;
use crate::config::DigestConfig;

/// Next firing of `schedule` after `after`, evaluated in `tz`.
pub fn next_run(schedule: &Schedule, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|local| local.with_timezone(&Utc))
}

pub struct DigestSchedule {
    schedule: Schedule,
    tz: Tz,
    next: Option<DateTime<Utc>>,
}

impl DigestSchedule {
    pub fn new(schedule: Schedule, tz: Tz, now: DateTime<Utc>) -> Self {
        let next = next_run(&schedule, tz, now);
        Self { schedule, tz, next }
    }

    pub fn next(&self) -> Option<DateTime<Utc>> {
        self.next
    }

    /// True once per firing; afterwards the schedule moves past `now`.
    pub fn due(&mut self, now: DateTime<Utc>) -> bool {
        match self.next {
            Some(at) if now >= at => {
                self.next = next_run(&self.schedule, self.tz, now);
                true
            }
            _ => false,
        }
    }
}

/// Check the schedule every minute and post the digest when it fires.
pub fn spawn(engine: Arc<Engine>, telegram: Arc<TelegramClient>, config: DigestConfig, clock: Arc<dyn Clock>) {
    let mut schedule = DigestSchedule::new(config.schedule, config.timezone, clock.now());
    let chat_id = config.chat_id.0;
    match schedule.next() {
        Some(at) => info!("🗞️ Digest for chat {chat_id} scheduled, next run {at}"),
        None => warn!("🗞️ Digest schedule has no future runs"),
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            if !schedule.due(clock.now()) {
                continue;
            }
            info!("🗞️ Sending digest to {chat_id}");
            for text in engine.digest().await {
                if let Err(e) = telegram.send_text(chat_id, &text, None).await {
                    warn!("Digest send failed: {e}");
                }
            }
        }
    });
}
