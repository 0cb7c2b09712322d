//! Rendering articles as a numbered, linked brief.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::llm::{ChatModel, ChatRequest, Message, Model};
use crate::news::article::Article;

pub const NEWS_HEADER: &str = "【📢 News】";
pub const COMMENTS_HEADER: &str = "【💬 Comments】";
pub const HEADLINES_HEADER: &str = "【Headlines】";

/// `N. Title (Source)` followed by the URL line, for every titled article.
pub fn numbered_block(articles: &[Article]) -> String {
    let mut lines = Vec::with_capacity(articles.len() * 2);
    for (i, article) in articles.iter().filter(|a| !a.title.trim().is_empty()).enumerate() {
        let title = article.title.trim();
        let source = article.source.name.trim();
        if source.is_empty() {
            lines.push(format!("{}. {}", i + 1, title));
        } else {
            lines.push(format!("{}. {} ({})", i + 1, title, source));
        }
        let url = article.url.trim();
        if !url.is_empty() {
            lines.push(url.to_string());
        }
    }
    lines.join("\n")
}

/// Whether `language` names the canonical language (`en`, `EN`, `en-US`, ...).
pub fn is_same_language(language: &str, canonical: &str) -> bool {
    let lower = language.trim().to_lowercase();
    let canonical = canonical.to_lowercase();
    lower == canonical || lower.starts_with(&format!("{canonical}-")) || lower.starts_with(&format!("{canonical}_"))
}

pub struct BriefRenderer {
    model: Option<Arc<dyn ChatModel>>,
    canonical_language: String,
    commentary: bool,
}

impl BriefRenderer {
    pub fn new(model: Option<Arc<dyn ChatModel>>, canonical_language: impl Into<String>) -> Self {
        Self {
            model,
            canonical_language: canonical_language.into(),
            commentary: true,
        }
    }

    pub fn with_commentary(mut self, commentary: bool) -> Self {
        self.commentary = commentary;
        self
    }

    /// Header, numbered headlines with links, then optional comments.
    ///
    /// Translation and commentary failures leave the canonical text and drop
    /// the comments section.
    pub async fn render(&self, articles: &[Article], target_language: &str) -> String {
        let canonical = numbered_block(articles);
        let headlines = if is_same_language(target_language, &self.canonical_language) {
            canonical
        } else {
            self.translate(&canonical, target_language).await
        };

        let mut out = format!("{NEWS_HEADER}\n{headlines}");
        if let Some(comments) = self.comment(&headlines, target_language).await {
            out.push_str(&format!("\n\n{COMMENTS_HEADER}\n{comments}"));
        }
        out
    }

    /// Plain headline list for scheduled digests; never translated or commented.
    pub fn render_headlines(&self, articles: &[Article]) -> String {
        format!("{HEADLINES_HEADER}\n{}", numbered_block(articles))
    }

    /// Translate a numbered block, keeping numbering, URLs and proper names.
    pub async fn translate(&self, text: &str, target_language: &str) -> String {
        self.ask_translation(
            "Translate while preserving numbering and URLs exactly. Do not translate proper names.",
            text,
            target_language,
        )
        .await
    }

    /// Translate a short system notice, keeping numbers and dates.
    pub async fn translate_notice(&self, text: &str, target_language: &str) -> String {
        if is_same_language(target_language, &self.canonical_language) {
            return text.to_string();
        }
        self.ask_translation(
            "Translate short system messages. Keep numbers, dates and emoji unchanged.",
            text,
            target_language,
        )
        .await
    }

    async fn ask_translation(&self, instruction: &str, text: &str, target_language: &str) -> String {
        let Some(ref model) = self.model else {
            return text.to_string();
        };
        let request = ChatRequest::new(
            Model::Mini,
            vec![
                Message::system(instruction),
                Message::user(format!("Translate to {target_language}:\n\n{text}")),
            ],
        )
        .temperature(0.0);

        match model.complete(&request).await {
            Ok(translated) => translated,
            Err(e) => {
                warn!("🌐 Translation to {target_language} failed, keeping original: {e}");
                text.to_string()
            }
        }
    }

    async fn comment(&self, headlines: &str, target_language: &str) -> Option<String> {
        if !self.commentary {
            return None;
        }
        let model = self.model.as_ref()?;
        let request = ChatRequest::new(
            Model::Full,
            vec![
                Message::system("You are concise, witty, and safe."),
                Message::user(format!(
                    "{headlines}\n\nWrite one short, witty and safe comment (one or two sentences) for each \
                     numbered headline above, in {target_language}. Keep the numbering and do not translate named entities."
                )),
            ],
        )
        .temperature(0.3);

        match model.complete(&request).await {
            Ok(comments) => Some(comments),
            Err(e) => {
                debug!("💬 Commentary failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replies by request model: `Mini` for translation, `Full` for comments.
    struct ByModel {
        mini: Result<String, ()>,
        full: Result<String, ()>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatModel for ByModel {
        async fn complete(&self, request: &ChatRequest) -> Result<String, llm::Error> {
            let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.seen.lock().unwrap().push(last);
            let reply = match request.model {
                Model::Mini => &self.mini,
                Model::Full => &self.full,
            };
            reply.clone().map_err(|_| llm::Error::Empty)
        }
    }

    fn model(mini: Result<&str, ()>, full: Result<&str, ()>) -> Arc<ByModel> {
        Arc::new(ByModel {
            mini: mini.map(str::to_string),
            full: full.map(str::to_string),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn articles() -> Vec<Article> {
        vec![
            Article::new("Chipmakers rally on strong AI demand", "https://example.com/a", "Reuters"),
            Article::new("Central bank holds rates steady again", "https://example.com/b", ""),
        ]
    }

    #[test]
    fn test_numbered_block() {
        assert_eq!(
            numbered_block(&articles()),
            "1. Chipmakers rally on strong AI demand (Reuters)\nhttps://example.com/a\n\
             2. Central bank holds rates steady again\nhttps://example.com/b"
        );
    }

    #[test]
    fn test_same_language() {
        assert!(is_same_language("EN", "en"));
        assert!(is_same_language("en-US", "en"));
        assert!(!is_same_language("zh", "en"));
    }

    #[tokio::test]
    async fn test_render_canonical_without_model() {
        let renderer = BriefRenderer::new(None, "en");
        let out = renderer.render(&articles(), "en").await;
        assert!(out.starts_with("【📢 News】\n1. Chipmakers"));
        assert!(!out.contains(COMMENTS_HEADER));
    }

    #[tokio::test]
    async fn test_render_translates_and_comments() {
        let m = model(Ok("1. 芯片股大涨\nhttps://example.com/a"), Ok("1. 好消息"));
        let renderer = BriefRenderer::new(Some(m.clone() as Arc<dyn ChatModel>), "en");
        let out = renderer.render(&articles()[..1], "zh").await;
        assert_eq!(out, "【📢 News】\n1. 芯片股大涨\nhttps://example.com/a\n\n【💬 Comments】\n1. 好消息");
        assert!(m.seen.lock().unwrap()[0].starts_with("Translate to zh:"));
    }

    #[tokio::test]
    async fn test_failures_degrade_to_canonical() {
        let m = model(Err(()), Err(()));
        let renderer = BriefRenderer::new(Some(m as Arc<dyn ChatModel>), "en");
        let out = renderer.render(&articles()[..1], "de").await;
        assert_eq!(
            out,
            "【📢 News】\n1. Chipmakers rally on strong AI demand (Reuters)\nhttps://example.com/a"
        );
    }

    #[tokio::test]
    async fn test_commentary_disabled() {
        let m = model(Ok("unused"), Ok("1. Nice"));
        let renderer = BriefRenderer::new(Some(m.clone() as Arc<dyn ChatModel>), "en").with_commentary(false);
        let out = renderer.render(&articles(), "en").await;
        assert!(!out.contains(COMMENTS_HEADER));
        assert!(m.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_render_headlines() {
        let out = BriefRenderer::new(None, "en").render_headlines(&articles()[..1]);
        assert_eq!(out, "【Headlines】\n1. Chipmakers rally on strong AI demand (Reuters)\nhttps://example.com/a");
    }
}
