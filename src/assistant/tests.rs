//! Engine tests with in-memory models and a fake news provider.
//!
//! Run with: cargo test assistant::tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use super::engine::*;
use super::images::ImageModel;
use super::session::ConversationStore;
use super::voice::SpeechModel;
use crate::clock::{Clock, FixedClock};
use crate::config::{ConversationSettings, MarketSettings};
use crate::llm::{self, ChatModel, ChatRequest, Image, RetryPolicy, Role};
use crate::market::{Analyst, MarketData};
use crate::news::provider::{HeadlinesRequest, ProviderSource, SearchRequest};
use crate::news::{
    Article, BriefRenderer, CatalogCache, Fetcher, NewsDesk, NewsProvider, ProviderError, QualityFilter,
    SourceResolver, Understanding, WindowLimits,
};

const PERSONA: &str = "You are a test persona.";
const ANALYST: &str = "You are a test analyst.";

// =============================================================================
// FIXTURES
// =============================================================================

/// Answers by prompt: router, emotion, persona chat and analysis.
/// Anything else (news planning, translation) is "down".
struct Chat {
    route: Mutex<String>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl Chat {
    fn routing(label: &str) -> Arc<Self> {
        Arc::new(Self {
            route: Mutex::new(label.to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn count(&self, pred: impl Fn(&ChatRequest) -> bool) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| pred(r)).count()
    }
}

fn system_of(request: &ChatRequest) -> &str {
    request
        .messages
        .first()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

fn is_router(request: &ChatRequest) -> bool {
    system_of(request).contains("short-answer router")
}

#[async_trait]
impl ChatModel for Chat {
    async fn complete(&self, request: &ChatRequest) -> Result<String, llm::Error> {
        self.requests.lock().unwrap().push(request.clone());
        let system = system_of(request);
        if is_router(request) {
            return Ok(self.route.lock().unwrap().clone());
        }
        if system.contains("emotion analysis") {
            return Ok("Happy.".into());
        }
        if system == PERSONA {
            let vision = request.messages.iter().any(|m| m.image.is_some());
            return Ok(if vision { "a cat on a sofa".into() } else { "chat reply".into() });
        }
        if system == ANALYST {
            return Ok("analysis text".into());
        }
        Err(llm::Error::Http("connection refused".into()))
    }
}

#[derive(Default)]
struct Images {
    generated: Mutex<Vec<(String, String)>>,
    edited: Mutex<Vec<(String, String)>>,
    fail: bool,
}

#[async_trait]
impl ImageModel for Images {
    async fn generate(&self, prompt: &str, size: &str) -> Result<Vec<u8>, llm::Error> {
        self.generated.lock().unwrap().push((prompt.into(), size.into()));
        if self.fail {
            return Err(llm::Error::Api("moderation".into()));
        }
        Ok(vec![1])
    }

    async fn edit(&self, image: &Image, prompt: &str, _size: &str) -> Result<Vec<u8>, llm::Error> {
        self.edited.lock().unwrap().push((image.media_type.clone(), prompt.into()));
        if self.fail {
            return Err(llm::Error::Api("moderation".into()));
        }
        Ok(vec![2])
    }
}

struct Speech {
    transcript: Result<String, ()>,
    speak_ok: bool,
}

#[async_trait]
impl SpeechModel for Speech {
    async fn transcribe(&self, _audio: Vec<u8>) -> Result<String, llm::Error> {
        self.transcript.clone().map_err(|_| llm::Error::Http("timeout".into()))
    }

    async fn speak(&self, _text: &str) -> Result<Vec<u8>, llm::Error> {
        if self.speak_ok { Ok(vec![7, 7]) } else { Err(llm::Error::Api("tts down".into())) }
    }
}

#[derive(Default)]
struct Provider {
    articles: Vec<Article>,
    missing_key: bool,
}

#[async_trait]
impl NewsProvider for Provider {
    async fn search(&self, _request: &SearchRequest) -> Result<Vec<Article>, ProviderError> {
        Ok(self.articles.clone())
    }

    async fn top_headlines(&self, _request: &HeadlinesRequest) -> Result<Vec<Article>, ProviderError> {
        Ok(self.articles.clone())
    }

    async fn sources(&self) -> Result<Vec<ProviderSource>, ProviderError> {
        if self.missing_key {
            return Err(ProviderError::MissingKey);
        }
        Ok(vec![ProviderSource {
            id: "reuters".into(),
            name: "Reuters".into(),
            url: "https://www.reuters.com".into(),
            category: "general".into(),
        }])
    }
}

fn articles() -> Vec<Article> {
    vec![Article::new(
        "Chipmakers rally as export rules ease",
        "https://www.reuters.com/technology/chips-rally",
        "Reuters",
    )]
}

struct Harness {
    chat: Arc<Chat>,
    images: Arc<Images>,
    engine: Engine,
}

struct Setup {
    route: &'static str,
    images: Images,
    speech: Speech,
    provider: Provider,
    threshold: u32,
    stickers: HashMap<String, String>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            route: "chat",
            images: Images::default(),
            speech: Speech { transcript: Ok("what is going on with the markets".into()), speak_ok: true },
            provider: Provider { articles: articles(), missing_key: false },
            threshold: 1000,
            stickers: HashMap::new(),
        }
    }
}

fn harness(setup: Setup) -> Harness {
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::on(NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()));
    let chat = Chat::routing(setup.route);
    let model: Arc<dyn ChatModel> = chat.clone();
    let provider: Arc<dyn NewsProvider> = Arc::new(setup.provider);

    let fetcher = || {
        let cache = CatalogCache::new(provider.clone(), clock.clone());
        let resolver = Arc::new(SourceResolver::new(&["reuters"], cache));
        Fetcher::new(
            provider.clone(),
            resolver,
            QualityFilter::default(),
            WindowLimits::default(),
            clock.clone(),
        )
    };

    let desk = NewsDesk::new(
        Understanding::new(None, "en"),
        fetcher(),
        BriefRenderer::new(None, "en"),
        provider.clone(),
        clock.clone(),
    )
    .with_api_key("newsapi-test-key");

    // no watchlist, so the analyst never reaches the market endpoints
    let settings = MarketSettings {
        companies: Vec::new(),
        crypto: Vec::new(),
        macro_topics: vec!["inflation".into()],
        chart_base_url: "http://127.0.0.1:9".into(),
        coingecko_base_url: "http://127.0.0.1:9".into(),
    };
    let analyst = Analyst::new(
        MarketData::new(reqwest::Client::new()),
        fetcher(),
        model.clone(),
        settings,
        clock.clone(),
    );

    let threshold = setup.threshold;
    let sessions = ConversationStore::new(
        PERSONA,
        ConversationSettings { history_limit: 10, threshold_min: 1, threshold_max: 1000 },
    )
    .with_roll(move |_, _| threshold);

    let images = Arc::new(setup.images);
    let engine = Engine::new(model, images.clone(), Arc::new(setup.speech), desk, analyst, sessions)
        .with_stickers(setup.stickers)
        .with_analyst_prompt(ANALYST)
        .with_retry(RetryPolicy { attempts: 2, base_delay: Duration::from_millis(1) });

    Harness { chat, images, engine }
}

fn private(text: &str) -> Inbound {
    Inbound {
        chat_id: 42,
        user_id: 42,
        is_private: true,
        addressed: false,
        text: text.into(),
    }
}

fn group(text: &str, addressed: bool) -> Inbound {
    Inbound {
        chat_id: -100,
        user_id: 42,
        is_private: false,
        addressed,
        text: text.into(),
    }
}

fn photo() -> Image {
    Image { data: vec![0xFF, 0xD8], media_type: "image/jpeg".into() }
}

fn texts(replies: &[Reply]) -> Vec<&str> {
    replies
        .iter()
        .filter_map(|r| match r {
            Reply::Text(t) => Some(t.as_str()),
            _ => None,
        })
        .collect()
}

// =============================================================================
// CHAT AND GATING
// =============================================================================

mod chat {
    use super::*;

    #[tokio::test]
    async fn test_short_private_message_skips_router() {
        let h = harness(Setup::default());
        let replies = h.engine.handle_text(&private("hi!")).await;

        assert_eq!(replies, vec![Reply::Text("chat reply".into())]);
        assert_eq!(h.chat.count(is_router), 0);
    }

    #[tokio::test]
    async fn test_chat_keeps_history() {
        let h = harness(Setup::default());
        h.engine.handle_text(&private("hi!")).await;
        h.engine.handle_text(&private("thanks")).await;

        let last = h.chat.requests.lock().unwrap().last().cloned().unwrap();
        let turns: Vec<&str> = last.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(turns, vec![PERSONA, "hi!", "chat reply", "thanks"]);
    }

    #[tokio::test]
    async fn test_reset_forgets_history_and_image() {
        let h = harness(Setup::default());
        h.engine.handle_text(&private("hi!")).await;
        h.engine.handle_photo(&private(""), photo()).await;

        assert_eq!(texts(&h.engine.reset(&private("")).await), vec![RESET_DONE]);

        h.engine.handle_text(&private("thanks")).await;
        let last = h.chat.requests.lock().unwrap().last().cloned().unwrap();
        let turns: Vec<&str> = last.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(turns, vec![PERSONA, "thanks"]);
        assert_eq!(texts(&h.engine.edit_command(42, "add a hat").await), vec![NO_RECENT_IMAGE]);
    }

    #[tokio::test]
    async fn test_sticker_follows_reply() {
        let h = harness(Setup {
            stickers: HashMap::from([("happy".to_string(), "STICKER-1".to_string())]),
            ..Setup::default()
        });
        let replies = h.engine.handle_text(&private("hello!")).await;
        assert_eq!(
            replies,
            vec![Reply::Text("chat reply".into()), Reply::Sticker("STICKER-1".into())]
        );
    }

    #[tokio::test]
    async fn test_group_needs_address_or_threshold() {
        let h = harness(Setup::default());
        assert!(h.engine.handle_text(&group("hello all", false)).await.is_empty());
        assert_eq!(texts(&h.engine.handle_text(&group("hello bot", true)).await), vec!["chat reply"]);
    }

    #[tokio::test]
    async fn test_group_threshold_fires() {
        let h = harness(Setup { threshold: 2, ..Setup::default() });
        assert!(h.engine.handle_text(&group("one", false)).await.is_empty());
        assert_eq!(texts(&h.engine.handle_text(&group("two", false)).await), vec!["chat reply"]);
        assert!(h.engine.handle_text(&group("three", false)).await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_route_label_is_chat() {
        let h = harness(Setup { route: "???", ..Setup::default() });
        let replies = h.engine.handle_text(&private("tell me something interesting")).await;
        assert_eq!(texts(&replies), vec!["chat reply"]);
    }
}

// =============================================================================
// NEWS
// =============================================================================

mod news {
    use super::*;

    #[tokio::test]
    async fn test_news_intent_returns_brief_without_history() {
        let h = harness(Setup { route: "news", ..Setup::default() });
        let replies = h.engine.handle_text(&private("what's the latest chip news?")).await;

        let text = texts(&replies)[0];
        assert!(text.contains("Chipmakers rally as export rules ease"), "{text}");
        // the persona model never saw the request
        assert_eq!(h.chat.count(|r| system_of(r) == PERSONA), 0);
    }

    #[tokio::test]
    async fn test_news_failure_is_friendly() {
        let h = harness(Setup {
            route: "news",
            provider: Provider { articles: Vec::new(), missing_key: true },
            ..Setup::default()
        });
        let replies = h.engine.handle_text(&private("any news about the election?")).await;
        assert_eq!(texts(&replies), vec![NEWS_FAILED]);
    }

    #[tokio::test]
    async fn test_digest_sends_headlines_then_analysis() {
        let h = harness(Setup::default());
        let parts = h.engine.digest().await;

        assert_eq!(parts.len(), 2);
        assert!(parts[0].contains("Chipmakers rally"), "{}", parts[0]);
        assert_eq!(parts[1], "analysis text");
    }

    #[tokio::test]
    async fn test_advise_uses_analyst_role() {
        let h = harness(Setup::default());
        assert_eq!(h.engine.advise().await, "analysis text");
        assert_eq!(h.chat.count(|r| system_of(r) == ANALYST), 1);
    }

    #[tokio::test]
    async fn test_news_health_header() {
        let h = harness(Setup::default());
        assert!(h.engine.news_health().await.starts_with("News health:\n"));
    }
}

// =============================================================================
// IMAGES
// =============================================================================

mod images {
    use super::*;

    #[tokio::test]
    async fn test_generate_with_size_hint() {
        let h = harness(Setup::default());
        let replies = h.engine.handle_text(&private("draw a fox in the snow 1024x1536")).await;

        assert_eq!(replies, vec![Reply::Photo(vec![1])]);
        let generated = h.images.generated.lock().unwrap().clone();
        assert_eq!(generated, vec![("draw a fox in the snow".to_string(), "1024x1536".to_string())]);
    }

    #[tokio::test]
    async fn test_generate_failure() {
        let h = harness(Setup {
            images: Images { fail: true, ..Images::default() },
            ..Setup::default()
        });
        let replies = h.engine.handle_text(&private("draw a lighthouse")).await;
        assert_eq!(texts(&replies), vec![GENERATE_FAILED]);
    }

    #[tokio::test]
    async fn test_edit_without_image() {
        let h = harness(Setup { route: "image_edit", ..Setup::default() });
        let replies = h.engine.handle_text(&private("make the background blue please")).await;
        assert_eq!(texts(&replies), vec![NO_IMAGE_TO_EDIT]);
    }

    #[tokio::test]
    async fn test_describe_without_image() {
        let h = harness(Setup { route: "image_describe", ..Setup::default() });
        let replies = h.engine.handle_text(&private("what is in the picture I sent?")).await;
        assert_eq!(texts(&replies), vec![NO_IMAGE_TO_DESCRIBE]);
    }

    #[tokio::test]
    async fn test_photo_without_caption_is_described() {
        let h = harness(Setup::default());
        let replies = h.engine.handle_photo(&private(""), photo()).await;

        assert_eq!(replies, vec![Reply::Text("a cat on a sofa".into())]);
        let vision = h.chat.count(|r| r.messages.iter().any(|m| m.image.is_some()));
        assert_eq!(vision, 1);
    }

    #[tokio::test]
    async fn test_photo_with_edit_caption() {
        let h = harness(Setup { route: "image_edit", ..Setup::default() });
        let replies = h.engine.handle_photo(&private("make it black and white"), photo()).await;

        assert_eq!(replies, vec![Reply::Photo(vec![2])]);
        let edited = h.images.edited.lock().unwrap().clone();
        assert_eq!(edited, vec![("image/jpeg".to_string(), "make it black and white".to_string())]);
    }

    #[tokio::test]
    async fn test_follow_up_edit_uses_cached_photo() {
        let h = harness(Setup { route: "image_edit", ..Setup::default() });
        h.engine.handle_photo(&private(""), photo()).await;
        let replies = h.engine.handle_text(&private("make it red")).await;

        assert_eq!(replies, vec![Reply::Photo(vec![2])]);
    }

    #[tokio::test]
    async fn test_unaddressed_group_photo_is_ignored() {
        let h = harness(Setup::default());
        assert!(h.engine.handle_photo(&group("", false), photo()).await.is_empty());
    }

    #[tokio::test]
    async fn test_edit_command() {
        let h = harness(Setup::default());
        assert_eq!(texts(&h.engine.edit_command(42, "add a hat").await), vec![NO_RECENT_IMAGE]);

        h.engine.handle_photo(&private(""), photo()).await;
        assert_eq!(texts(&h.engine.edit_command(42, "  ").await), vec![EDIT_USAGE]);
        assert_eq!(h.engine.edit_command(42, "add a hat").await, vec![Reply::Photo(vec![2])]);
    }

    #[tokio::test]
    async fn test_edit_failure() {
        let h = harness(Setup {
            images: Images { fail: true, ..Images::default() },
            ..Setup::default()
        });
        h.engine.handle_photo(&private(""), photo()).await;
        assert_eq!(texts(&h.engine.edit_command(42, "add a hat").await), vec![EDIT_FAILED]);
    }
}

// =============================================================================
// VOICE
// =============================================================================

mod voice {
    use super::*;

    #[tokio::test]
    async fn test_voice_note_replies_with_text_then_speech() {
        let h = harness(Setup::default());
        let replies = h.engine.handle_voice(&private(""), vec![0; 16]).await;
        assert_eq!(replies, vec![Reply::Text("chat reply".into()), Reply::Voice(vec![7, 7])]);
    }

    #[tokio::test]
    async fn test_unclear_audio() {
        let h = harness(Setup {
            speech: Speech { transcript: Ok("   ".into()), speak_ok: true },
            ..Setup::default()
        });
        assert_eq!(texts(&h.engine.handle_voice(&private(""), vec![0]).await), vec![UNCLEAR_AUDIO]);

        let h = harness(Setup {
            speech: Speech { transcript: Err(()), speak_ok: true },
            ..Setup::default()
        });
        assert_eq!(texts(&h.engine.handle_voice(&private(""), vec![0]).await), vec![UNCLEAR_AUDIO]);
    }

    #[tokio::test]
    async fn test_voice_image_intent_becomes_chat() {
        let h = harness(Setup { route: "image_generate", ..Setup::default() });
        let replies = h.engine.handle_voice(&private(""), vec![0]).await;
        assert_eq!(texts(&replies), vec!["chat reply"]);
        assert!(h.images.generated.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_speech_failure_keeps_text() {
        let h = harness(Setup {
            speech: Speech { transcript: Ok("how are you doing today".into()), speak_ok: false },
            ..Setup::default()
        });
        let replies = h.engine.handle_voice(&private(""), vec![0]).await;
        assert_eq!(replies, vec![Reply::Text("chat reply".into())]);
    }

    #[tokio::test]
    async fn test_voice_command() {
        let h = harness(Setup::default());
        assert_eq!(texts(&h.engine.voice_command("").await), vec![VOICE_USAGE]);
        assert_eq!(h.engine.voice_command("hello there").await, vec![Reply::Voice(vec![7, 7])]);

        let h = harness(Setup {
            speech: Speech { transcript: Ok(String::new()), speak_ok: false },
            ..Setup::default()
        });
        let replies = h.engine.voice_command("hello there").await;
        assert!(texts(&replies)[0].starts_with("❌ Voice generation failed:"));
    }
}
