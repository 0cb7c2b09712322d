//! Forwards log events to the admin's Telegram chat.
//!
//! WARN and ERROR go out right away. INFO lines are batched and flushed every
//! few seconds or when the batch fills up.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_BATCH_LINES: usize = 50;
const MAX_LOG_CHARS: usize = 4000;

/// Targets whose events are never forwarded, since sending a log message
/// through them would log again.
const MUTED_TARGETS: &[&str] = &["teloxide", "reqwest", "hyper", "h2", "rustls"];

#[derive(Debug, PartialEq, Eq)]
enum Entry {
    /// WARN/ERROR, sent immediately.
    Urgent(String),
    /// INFO, batched.
    Info(String),
}

impl Entry {
    fn from_event(level: Level, target: &str, message: String) -> Option<Self> {
        if level > Level::INFO || MUTED_TARGETS.iter().any(|t| target.starts_with(t)) {
            return None;
        }
        Some(match level {
            Level::ERROR => Entry::Urgent(format!("❌ {message}")),
            Level::WARN => Entry::Urgent(format!("⚠️ {message}")),
            _ => Entry::Info(message),
        })
    }
}

/// Collects INFO lines until flushed or full.
#[derive(Default)]
struct Batch {
    lines: Vec<String>,
}

impl Batch {
    /// Add a line; returns the joined batch when it reached capacity.
    fn push(&mut self, line: String) -> Option<String> {
        self.lines.push(line);
        if self.lines.len() >= MAX_BATCH_LINES {
            self.take()
        } else {
            None
        }
    }

    fn take(&mut self) -> Option<String> {
        if self.lines.is_empty() {
            return None;
        }
        let joined = self.lines.join("\n");
        self.lines.clear();
        Some(joined)
    }
}

fn clip(text: &str) -> String {
    if text.chars().count() > MAX_LOG_CHARS {
        let truncated: String = text.chars().take(MAX_LOG_CHARS).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<Entry>,
}

impl TelegramLogLayer {
    /// Spawns the forwarding task; must be called inside a tokio runtime.
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Entry>();

        tokio::spawn(async move {
            let mut batch = Batch::default();
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);

            loop {
                tokio::select! {
                    entry = rx.recv() => match entry {
                        Some(Entry::Urgent(text)) => send_log(&bot, chat_id, &text).await,
                        Some(Entry::Info(text)) => {
                            if let Some(full) = batch.push(text) {
                                send_log(&bot, chat_id, &full).await;
                            }
                        }
                        None => break,
                    },
                    _ = interval.tick() => {
                        if let Some(pending) = batch.take() {
                            send_log(&bot, chat_id, &pending).await;
                        }
                    }
                }
            }
        });

        Self { tx }
    }
}

async fn send_log(bot: &Bot, chat_id: ChatId, text: &str) {
    if let Err(e) = bot.send_message(chat_id, clip(text)).await {
        eprintln!("Failed to forward log to Telegram: {e}");
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message.push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let Some(entry) = Entry::from_event(*metadata.level(), metadata.target(), visitor.message) else {
            return;
        };
        if self.tx.send(entry).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
