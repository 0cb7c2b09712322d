use crate::classifier::{Intent, RouteContext};

/// Phrases that unambiguously ask for a new picture.
const IMAGE_KEYWORDS: &[&str] = &["generate image", "draw", "create image", "sketch", "picture"];

/// Anything mentioning these goes to the router, even when short.
const NEWS_KEYWORDS: &[&str] = &["news", "headline", "brief", "新闻", "新聞", "nachrichten", "noticias", "actualités"];

const SHORT_MESSAGE_CHARS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefilterResult {
    Obvious(Intent),
    Ambiguous,
}

/// Cheap routing that skips the model for clear-cut messages.
pub fn prefilter(text: &str, context: RouteContext) -> PrefilterResult {
    let lower = text.trim().to_lowercase();

    if lower.is_empty() {
        return if context.has_attached_image {
            PrefilterResult::Obvious(Intent::ImageDescribe)
        } else {
            PrefilterResult::Obvious(Intent::Chat)
        };
    }

    if NEWS_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return PrefilterResult::Ambiguous;
    }

    if !context.has_attached_image && IMAGE_KEYWORDS.iter().any(|k| contains_phrase(&lower, k)) {
        return PrefilterResult::Obvious(Intent::ImageGenerate);
    }

    // Greetings and one-word replies; with an image around, "make it red" is an edit
    if !context.has_attached_image && !context.has_previous_image && lower.chars().count() < SHORT_MESSAGE_CHARS {
        return PrefilterResult::Obvious(Intent::Chat);
    }

    PrefilterResult::Ambiguous
}

/// `phrase` occurs in `text` delimited by non-alphanumerics ("draw" but not "withdraw").
fn contains_phrase(text: &str, phrase: &str) -> bool {
    text.match_indices(phrase).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + phrase.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_only() -> RouteContext {
        RouteContext::default()
    }

    fn with_photo() -> RouteContext {
        RouteContext { has_previous_image: true, has_attached_image: true }
    }

    #[test]
    fn test_obvious_image_request() {
        assert_eq!(
            prefilter("Please draw a fox in the snow", text_only()),
            PrefilterResult::Obvious(Intent::ImageGenerate)
        );
        assert_eq!(
            prefilter("generate image of a lighthouse 1024x1536", text_only()),
            PrefilterResult::Obvious(Intent::ImageGenerate)
        );
    }

    #[test]
    fn test_image_keywords_with_photo_are_ambiguous() {
        // "make this picture brighter" is an edit, not a new image
        assert_eq!(prefilter("make this picture brighter", with_photo()), PrefilterResult::Ambiguous);
    }

    #[test]
    fn test_image_keywords_need_word_boundaries() {
        assert_eq!(
            prefilter("why did the fund withdraw from China?", text_only()),
            PrefilterResult::Ambiguous
        );
        assert_eq!(
            prefilter("the big picture for chip stocks news", text_only()),
            PrefilterResult::Ambiguous
        );
    }

    #[test]
    fn test_empty_caption() {
        assert_eq!(prefilter("  ", with_photo()), PrefilterResult::Obvious(Intent::ImageDescribe));
        assert_eq!(prefilter("", text_only()), PrefilterResult::Obvious(Intent::Chat));
    }

    #[test]
    fn test_short_messages_are_chat() {
        assert_eq!(prefilter("hi!", text_only()), PrefilterResult::Obvious(Intent::Chat));
        assert_eq!(prefilter("thanks", text_only()), PrefilterResult::Obvious(Intent::Chat));
    }

    #[test]
    fn test_short_text_after_image_goes_to_router() {
        let after_photo = RouteContext { has_previous_image: true, has_attached_image: false };
        assert_eq!(prefilter("make it red", after_photo), PrefilterResult::Ambiguous);
    }

    #[test]
    fn test_short_news_requests_reach_the_router() {
        assert_eq!(prefilter("news?", text_only()), PrefilterResult::Ambiguous);
        assert_eq!(prefilter("科技新闻", text_only()), PrefilterResult::Ambiguous);
    }

    #[test]
    fn test_ambiguous() {
        assert_eq!(
            prefilter("What happened with the chip export rules this week?", text_only()),
            PrefilterResult::Ambiguous
        );
    }
}
