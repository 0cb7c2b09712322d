use crate::llm::{ChatModel, ChatRequest, Error, Message, Model};

/// What the user wants from one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    ImageGenerate,
    ImageEdit,
    ImageDescribe,
    News,
    Chat,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::ImageGenerate => "image_generate",
            Intent::ImageEdit => "image_edit",
            Intent::ImageDescribe => "image_describe",
            Intent::News => "news",
            Intent::Chat => "chat",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Facts about the message that the router can't see in the text.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteContext {
    pub has_previous_image: bool,
    pub has_attached_image: bool,
}

/// Map a router reply to an intent, tolerating near misses.
///
/// Unknown labels become `ImageDescribe` when an image is attached, `Chat` otherwise.
pub fn parse_intent(reply: &str, context: RouteContext) -> Intent {
    let label = reply
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.')
        .to_lowercase();
    match label.as_str() {
        "image_generate" | "image generation" | "generate" | "image-gen" => Intent::ImageGenerate,
        "image_edit" | "image edit" | "edit" => Intent::ImageEdit,
        "image_describe" | "describe" | "analysis" => Intent::ImageDescribe,
        "news" => Intent::News,
        "chat" => Intent::Chat,
        _ if context.has_attached_image => Intent::ImageDescribe,
        _ => Intent::Chat,
    }
}

pub async fn classify_intent(text: &str, context: RouteContext, model: &dyn ChatModel) -> Result<Intent, Error> {
    let system = "You are a short-answer router. The user can speak ANY language.\n\
        Read the user's text and output EXACTLY one label from this set:\n\
        image_generate | image_edit | image_describe | news | chat\n\
        - image_generate: user asks to create an image (no source image required)\n\
        - image_edit: user wants to modify an existing/attached image\n\
        - image_describe: user wants a description/analysis of an image\n\
        - news: user wants headlines, a briefing/report, or topic/period news\n\
        - chat: all other general conversation or Q&A\n\
        Consider the JSON context about the message environment.";
    let env = serde_json::json!({
        "has_prev_image": context.has_previous_image,
        "has_attached_image": context.has_attached_image,
    });

    let request = ChatRequest::new(
        Model::Mini,
        vec![Message::system(system), Message::user(format!("CONTEXT={env}\nTEXT={}", text.trim()))],
    )
    .temperature(0.0);

    let reply = model.complete(&request).await?;
    Ok(parse_intent(&reply, context))
}

/// One lowercase emotion word for `text`, e.g. `happy`.
pub async fn classify_emotion(text: &str, model: &dyn ChatModel) -> Result<String, Error> {
    let request = ChatRequest::new(
        Model::Full,
        vec![
            Message::system(
                "You are an expert in emotion analysis. Analyze the following text and determine the emotion \
                 expressed. Return only one emotion label (e.g., happy, sad, neutral, angry, surprised) \
                 without any additional text.",
            ),
            Message::user(format!("Text: \"{text}\"")),
        ],
    )
    .temperature(0.0);

    let reply = model.complete(&request).await?;
    reply
        .split(|c: char| !c.is_alphabetic())
        .find(|w| !w.is_empty())
        .map(str::to_lowercase)
        .ok_or(Error::Empty)
}
