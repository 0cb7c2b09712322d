//! The assistant engine: routes each inbound message and produces replies.
//!
//! The engine never talks to Telegram directly. Handlers return [`Reply`]
//! values that the transport delivers in order.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::assistant::images::{DEFAULT_IMAGE_SIZE, ImageModel, extract_image_size, strip_image_size};
use crate::assistant::session::{ConversationStore, conversation_key};
use crate::assistant::voice::SpeechModel;
use crate::classifier::{Intent, RouteContext, classify_emotion, classify_intent};
use crate::llm::{ChatModel, ChatRequest, Image, Message, Model, RetryPolicy, complete_with_retries};
use crate::market::Analyst;
use crate::news::NewsDesk;
use crate::prefilter::{PrefilterResult, prefilter};

const DESCRIBE_PROMPT: &str = "Describe this image.";
const ENHANCE_PROMPT: &str = "Improve quality while keeping original content.";

pub const NEWS_FAILED: &str = "I couldn't fetch the news right now. Run /newshealth to check the news provider.";
pub const GENERATE_FAILED: &str = "😿 Generate failed. Please tweak your prompt or try a standard size.";
pub const EDIT_FAILED: &str = "😿 Edit failed. Try rephrasing or simplify the instruction.";
pub const NO_IMAGE_TO_EDIT: &str = "Send an image first, then tell me how to edit it.";
pub const NO_IMAGE_TO_DESCRIBE: &str = "Please send the image you want me to describe. 🙂";
pub const NO_RECENT_IMAGE: &str = "😿 Can't find a recent image. Send one first, then /edit <what to change>.";
pub const EDIT_USAGE: &str = "Usage: /edit <what to change>";
pub const VOICE_USAGE: &str = "Usage: /voice hello there";
pub const UNCLEAR_AUDIO: &str = "I couldn't hear anything clear in that clip. Mind trying again?";
pub const HEADLINES_FAILED: &str = "Headlines are unavailable right now.";
pub const RESET_DONE: &str = "🧹 Fresh start. I've forgotten our conversation.";

/// Something to send back to the chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Photo(Vec<u8>),
    Voice(Vec<u8>),
    /// Sticker file id.
    Sticker(String),
}

/// One inbound message, independent of the transport.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub chat_id: i64,
    pub user_id: i64,
    pub is_private: bool,
    /// Replies to the bot or mentions it.
    pub addressed: bool,
    /// Message text, or the caption of a photo.
    pub text: String,
}

impl Inbound {
    fn key(&self) -> i64 {
        conversation_key(self.chat_id, self.user_id, self.is_private)
    }
}

pub struct Engine {
    chat: Arc<dyn ChatModel>,
    images: Arc<dyn ImageModel>,
    speech: Arc<dyn SpeechModel>,
    news: NewsDesk,
    analyst: Analyst,
    sessions: ConversationStore,
    /// Latest photo per chat, for follow-up edits.
    last_images: Mutex<HashMap<i64, Image>>,
    stickers: HashMap<String, String>,
    analyst_prompt: String,
    retry: RetryPolicy,
}

impl Engine {
    pub fn new(
        chat: Arc<dyn ChatModel>,
        images: Arc<dyn ImageModel>,
        speech: Arc<dyn SpeechModel>,
        news: NewsDesk,
        analyst: Analyst,
        sessions: ConversationStore,
    ) -> Self {
        Self {
            chat,
            images,
            speech,
            news,
            analyst,
            sessions,
            last_images: Mutex::new(HashMap::new()),
            stickers: HashMap::new(),
            analyst_prompt: crate::config::DEFAULT_ANALYST_PROMPT.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// Emotion label → sticker file id. Empty disables stickers.
    pub fn with_stickers(mut self, stickers: HashMap<String, String>) -> Self {
        self.stickers = stickers;
        self
    }

    pub fn with_analyst_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.analyst_prompt = prompt.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Whether the bot should answer. Group messages always count toward the
    /// unprompted-reply threshold.
    async fn should_respond(&self, msg: &Inbound) -> bool {
        if msg.is_private {
            return true;
        }
        let fired = self.sessions.record_inbound(msg.key()).await;
        if fired {
            info!("🎲 Reply threshold fired in chat {}", msg.chat_id);
        }
        msg.addressed || fired
    }

    async fn route(&self, text: &str, context: RouteContext) -> Intent {
        match prefilter(text, context) {
            PrefilterResult::Obvious(intent) => intent,
            PrefilterResult::Ambiguous => match classify_intent(text, context, self.chat.as_ref()).await {
                Ok(intent) => intent,
                Err(e) => {
                    warn!("🧭 Intent routing failed: {e}");
                    if context.has_attached_image { Intent::ImageDescribe } else { Intent::Chat }
                }
            },
        }
    }

    pub async fn handle_text(&self, msg: &Inbound) -> Vec<Reply> {
        if !self.should_respond(msg).await {
            return Vec::new();
        }
        let text = msg.text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let previous = self.last_images.lock().await.get(&msg.chat_id).cloned();
        let context = RouteContext {
            has_previous_image: previous.is_some(),
            has_attached_image: false,
        };
        let intent = self.route(text, context).await;
        info!("🧭 intent={} prev_img={} chat={}", intent, context.has_previous_image, msg.chat_id);

        match (intent, previous) {
            (Intent::ImageGenerate, _) => vec![self.generate_image(text).await],
            (Intent::ImageEdit, Some(image)) => vec![self.edit_image(&image, text).await],
            (Intent::ImageEdit, None) => vec![Reply::Text(NO_IMAGE_TO_EDIT.into())],
            (Intent::ImageDescribe, Some(image)) => vec![self.describe_image(&image, text).await],
            (Intent::ImageDescribe, None) => vec![Reply::Text(NO_IMAGE_TO_DESCRIBE.into())],
            (Intent::News, _) | (Intent::Chat, _) => {
                let reply = self.answer(msg.key(), text, intent).await;
                self.with_sticker(reply).await
            }
        }
    }

    /// A photo, optionally captioned. The photo becomes the chat's latest image.
    pub async fn handle_photo(&self, msg: &Inbound, image: Image) -> Vec<Reply> {
        if !msg.is_private && !msg.addressed {
            return Vec::new();
        }
        self.last_images.lock().await.insert(msg.chat_id, image.clone());

        let caption = msg.text.trim();
        let context = RouteContext {
            has_previous_image: true,
            has_attached_image: true,
        };
        let intent = self.route(caption, context).await;
        info!("🖼️ Photo intent={} chat={}", intent, msg.chat_id);

        if intent == Intent::ImageEdit {
            let prompt = if caption.is_empty() { ENHANCE_PROMPT } else { caption };
            return vec![self.edit_image(&image, prompt).await];
        }
        let prompt = if caption.is_empty() { DESCRIBE_PROMPT } else { caption };
        vec![self.describe_image(&image, prompt).await]
    }

    /// A voice note: transcribe, answer like text, then speak the answer.
    pub async fn handle_voice(&self, msg: &Inbound, audio: Vec<u8>) -> Vec<Reply> {
        if !msg.is_private && !msg.addressed {
            return Vec::new();
        }

        let transcript = match self.speech.transcribe(audio).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => return vec![Reply::Text(UNCLEAR_AUDIO.into())],
            Err(e) => {
                error!("🎤 Transcription failed: {e}");
                return vec![Reply::Text(UNCLEAR_AUDIO.into())];
            }
        };
        info!("🎤 Voice from {}: {:?}", msg.user_id, transcript);

        let intent = match self.route(&transcript, RouteContext::default()).await {
            Intent::News => Intent::News,
            _ => Intent::Chat,
        };
        let reply = self.answer(msg.key(), &transcript, intent).await;

        let mut replies = vec![Reply::Text(reply.clone())];
        match self.speech.speak(&reply).await {
            Ok(audio) => replies.push(Reply::Voice(audio)),
            Err(e) => warn!("🔊 Speech failed: {e}"),
        }
        if let Some(sticker) = self.sticker_for(&reply).await {
            replies.push(sticker);
        }
        replies
    }

    /// `/edit <instruction>` on the chat's latest image.
    pub async fn edit_command(&self, chat_id: i64, instruction: &str) -> Vec<Reply> {
        let Some(image) = self.last_images.lock().await.get(&chat_id).cloned() else {
            return vec![Reply::Text(NO_RECENT_IMAGE.into())];
        };
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return vec![Reply::Text(EDIT_USAGE.into())];
        }
        vec![self.edit_image(&image, instruction).await]
    }

    /// `/voice <text>`: answer in the persona and reply with speech only.
    pub async fn voice_command(&self, text: &str) -> Vec<Reply> {
        let text = text.trim();
        if text.is_empty() {
            return vec![Reply::Text(VOICE_USAGE.into())];
        }
        let request = ChatRequest::new(
            Model::Full,
            vec![Message::system(self.sessions.persona()), Message::user(text)],
        );
        let reply = complete_with_retries(self.chat.as_ref(), &request, self.retry).await;

        let mut replies = match self.speech.speak(&reply).await {
            Ok(audio) => vec![Reply::Voice(audio)],
            Err(e) => {
                error!("🔊 /voice speech failed: {e}");
                vec![Reply::Text(format!("❌ Voice generation failed: {e}"))]
            }
        };
        if let Some(sticker) = self.sticker_for(&reply).await {
            replies.push(sticker);
        }
        replies
    }

    /// `/reset`: forget the conversation and the chat's cached image.
    pub async fn reset(&self, msg: &Inbound) -> Vec<Reply> {
        self.sessions.reset(msg.key()).await;
        self.last_images.lock().await.remove(&msg.chat_id);
        info!("🧹 Conversation {} reset", msg.key());
        vec![Reply::Text(RESET_DONE.into())]
    }

    /// `/advise`: market analysis under the configured analyst role.
    pub async fn advise(&self) -> String {
        self.analyst.analysis(&self.analyst_prompt).await
    }

    /// `/newshealth`
    pub async fn news_health(&self) -> String {
        format!("News health:\n{}", self.news.health().await)
    }

    /// The scheduled digest: headline brief first, then the analysis.
    pub async fn digest(&self) -> Vec<String> {
        let headlines = match self.news.headline_brief().await {
            Ok(brief) => brief,
            Err(e) => {
                error!("🗞️ Digest headlines failed: {e}");
                HEADLINES_FAILED.to_string()
            }
        };
        vec![headlines, self.advise().await]
    }

    /// News brief or persona chat for one user text.
    async fn answer(&self, key: i64, text: &str, intent: Intent) -> String {
        if intent == Intent::News {
            return match self.news.brief(text).await {
                Ok(brief) => brief,
                Err(e) => {
                    error!("📰 News brief failed for {:?}: {e}", text);
                    NEWS_FAILED.to_string()
                }
            };
        }

        let history = self.sessions.push_user(key, text).await;
        let request = ChatRequest::new(Model::Full, history);
        let reply = complete_with_retries(self.chat.as_ref(), &request, self.retry).await;
        self.sessions.push_assistant(key, &reply).await;
        reply
    }

    async fn generate_image(&self, text: &str) -> Reply {
        let size = extract_image_size(text).unwrap_or_else(|| DEFAULT_IMAGE_SIZE.to_string());
        let prompt = strip_image_size(text);
        match self.images.generate(&prompt, &size).await {
            Ok(png) => Reply::Photo(png),
            Err(e) => {
                error!("🎨 Image generation failed: {e}");
                Reply::Text(GENERATE_FAILED.into())
            }
        }
    }

    async fn edit_image(&self, image: &Image, prompt: &str) -> Reply {
        match self.images.edit(image, prompt, DEFAULT_IMAGE_SIZE).await {
            Ok(png) => Reply::Photo(png),
            Err(e) => {
                error!("🎨 Image edit failed: {e}");
                Reply::Text(EDIT_FAILED.into())
            }
        }
    }

    async fn describe_image(&self, image: &Image, prompt: &str) -> Reply {
        let request = ChatRequest::new(
            Model::Full,
            vec![
                Message::system(self.sessions.persona()),
                Message::user(prompt).with_image(image.data.clone(), image.media_type.clone()),
            ],
        );
        Reply::Text(complete_with_retries(self.chat.as_ref(), &request, self.retry).await)
    }

    async fn with_sticker(&self, reply: String) -> Vec<Reply> {
        let sticker = self.sticker_for(&reply).await;
        let mut replies = vec![Reply::Text(reply)];
        replies.extend(sticker);
        replies
    }

    /// Sticker matching the mood of `reply`, if one is configured.
    async fn sticker_for(&self, reply: &str) -> Option<Reply> {
        if self.stickers.is_empty() || reply.trim().is_empty() {
            return None;
        }
        match classify_emotion(reply, self.chat.as_ref()).await {
            Ok(emotion) => {
                debug!("😶 emotion={emotion}");
                self.stickers.get(&emotion).map(|id| Reply::Sticker(id.clone()))
            }
            Err(e) => {
                debug!("😶 Emotion analysis failed: {e}");
                None
            }
        }
    }
}
