//! Per-conversation chat history and the unprompted-reply counter.

use std::collections::HashMap;

use rand::Rng;
use tokio::sync::Mutex;

use crate::config::ConversationSettings;
use crate::llm::{Message, Role};

/// Picks a reply threshold in `min..=max`.
pub type ThresholdRoll = Box<dyn Fn(u32, u32) -> u32 + Send + Sync>;

/// History is keyed by user id in private chats and chat id in groups.
pub fn conversation_key(chat_id: i64, user_id: i64, is_private: bool) -> i64 {
    if is_private { user_id } else { chat_id }
}

struct ConversationState {
    /// First entry is always the persona system prompt.
    history: Vec<Message>,
    count: u32,
    threshold: u32,
}

pub struct ConversationStore {
    persona: String,
    settings: ConversationSettings,
    roll: ThresholdRoll,
    states: Mutex<HashMap<i64, ConversationState>>,
}

impl ConversationStore {
    pub fn new(persona: impl Into<String>, settings: ConversationSettings) -> Self {
        Self {
            persona: persona.into(),
            settings,
            roll: Box::new(|min, max| rand::rng().random_range(min..=max)),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the random threshold source.
    pub fn with_roll(mut self, roll: impl Fn(u32, u32) -> u32 + Send + Sync + 'static) -> Self {
        self.roll = Box::new(roll);
        self
    }

    pub fn persona(&self) -> &str {
        &self.persona
    }

    fn fresh(&self) -> ConversationState {
        ConversationState {
            history: vec![Message::system(self.persona.clone())],
            count: 0,
            threshold: (self.roll)(self.settings.threshold_min, self.settings.threshold_max),
        }
    }

    /// Count one inbound group message. Returns true when the threshold fired,
    /// in which case the counter restarts with a new threshold.
    pub async fn record_inbound(&self, key: i64) -> bool {
        let mut states = self.states.lock().await;
        let state = states.entry(key).or_insert_with(|| self.fresh());
        state.count += 1;
        if state.count < state.threshold {
            return false;
        }
        state.count = 0;
        state.threshold = (self.roll)(self.settings.threshold_min, self.settings.threshold_max);
        true
    }

    /// Append a user turn and return the history to send to the model.
    pub async fn push_user(&self, key: i64, text: &str) -> Vec<Message> {
        let mut states = self.states.lock().await;
        let state = states.entry(key).or_insert_with(|| self.fresh());
        append_bounded(&mut state.history, Message::user(text), self.settings.history_limit);
        state.history.clone()
    }

    pub async fn push_assistant(&self, key: i64, text: &str) {
        let mut states = self.states.lock().await;
        let state = states.entry(key).or_insert_with(|| self.fresh());
        append_bounded(&mut state.history, Message::assistant(text), self.settings.history_limit);
    }

    #[cfg(test)]
    pub async fn history(&self, key: i64) -> Vec<Message> {
        let mut states = self.states.lock().await;
        states.entry(key).or_insert_with(|| self.fresh()).history.clone()
    }

    /// Forget everything about `key`.
    pub async fn reset(&self, key: i64) {
        self.states.lock().await.remove(&key);
    }
}

/// Push and trim the oldest turns, keeping a leading system prompt.
fn append_bounded(history: &mut Vec<Message>, message: Message, limit: usize) {
    history.push(message);
    let pinned = usize::from(history.first().is_some_and(|m| m.role == Role::System));
    while history.len() > limit.max(pinned + 1) {
        history.remove(pinned);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(limit: usize, threshold: u32) -> ConversationStore {
        let settings = ConversationSettings {
            history_limit: limit,
            threshold_min: 1000,
            threshold_max: 2000,
        };
        ConversationStore::new("You are helpful.", settings).with_roll(move |_, _| threshold)
    }

    #[test]
    fn test_conversation_key() {
        assert_eq!(conversation_key(-100, 7, true), 7);
        assert_eq!(conversation_key(-100, 7, false), -100);
    }

    #[tokio::test]
    async fn test_history_starts_with_persona() {
        let store = store(10, 5);
        let history = store.push_user(1, "hello").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[0].content, "You are helpful.");
        assert_eq!(history[1].content, "hello");
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let store = store(4, 5);
        for i in 0..10 {
            store.push_user(1, &format!("q{i}")).await;
            store.push_assistant(1, &format!("a{i}")).await;
        }
        let history = store.history(1).await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].role, Role::System);
        let rest: Vec<&str> = history[1..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(rest, vec!["a8", "q9", "a9"]);
    }

    #[tokio::test]
    async fn test_threshold_fires_and_resets() {
        let store = store(10, 3);
        assert!(!store.record_inbound(-5).await);
        assert!(!store.record_inbound(-5).await);
        assert!(store.record_inbound(-5).await);
        assert!(!store.record_inbound(-5).await);
        // other keys are independent
        assert!(!store.record_inbound(-6).await);
    }

    #[tokio::test]
    async fn test_default_roll_in_range() {
        let settings = ConversationSettings {
            history_limit: 10,
            threshold_min: 1000,
            threshold_max: 2000,
        };
        let store = ConversationStore::new("p", settings);
        for _ in 0..100 {
            let t = (store.roll)(1000, 2000);
            assert!((1000..=2000).contains(&t));
        }
    }

    #[tokio::test]
    async fn test_reset() {
        let store = store(10, 5);
        store.push_user(1, "remember me").await;
        store.reset(1).await;
        assert_eq!(store.history(1).await.len(), 1);
    }
}
