//! Telegram client using teloxide.

use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, MessageId, ReplyParameters};
use tracing::{info, warn};

use crate::assistant::engine::Reply;

/// Telegram's message length limit, in UTF-16 code units.
pub const MAX_MESSAGE_CHARS: usize = 4096;

fn utf16_len(chars: &[char]) -> usize {
    chars.iter().map(|c| c.len_utf16()).sum()
}

/// Split `text` into chunks of at most `limit` UTF-16 code units, preferring
/// to break after a newline in the second half of a chunk.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest: Vec<char> = text.chars().collect();

    while utf16_len(&rest) > limit {
        let mut units = 0;
        let mut end = 0;
        for c in &rest {
            units += c.len_utf16();
            if units > limit {
                break;
            }
            end += 1;
        }
        // a single character wider than the limit still has to go out
        let end = end.max(1);
        let cut = rest[..end]
            .iter()
            .rposition(|&c| c == '\n')
            .filter(|&i| i >= end / 2)
            .map(|i| i + 1)
            .unwrap_or(end);
        chunks.push(rest[..cut].iter().collect());
        rest.drain(..cut);
    }
    if !rest.is_empty() {
        chunks.push(rest.into_iter().collect());
    }
    chunks
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Plain text, split at the message limit. Only the first chunk is a reply.
    pub async fn send_text(&self, chat_id: i64, text: &str, reply_to_message_id: Option<i64>) -> Result<(), String> {
        for (i, chunk) in split_message(text, MAX_MESSAGE_CHARS).into_iter().enumerate() {
            let mut request = self.bot.send_message(ChatId(chat_id), chunk);
            if i == 0
                && let Some(msg_id) = reply_to_message_id
            {
                request = request.reply_parameters(ReplyParameters::new(MessageId(msg_id as i32)));
            }
            request.await.map_err(|e| {
                let msg = format!("Failed to send: {e}");
                warn!("{}", msg);
                msg
            })?;
        }
        Ok(())
    }

    /// Send an image from bytes.
    pub async fn send_image(&self, chat_id: i64, image_data: Vec<u8>, reply_to_message_id: Option<i64>) -> Result<(), String> {
        info!("📷 Sending image to chat {} ({} bytes)", chat_id, image_data.len());
        let input_file = InputFile::memory(image_data).file_name("image.png");

        let mut request = self.bot.send_photo(ChatId(chat_id), input_file);
        if let Some(msg_id) = reply_to_message_id {
            request = request.reply_parameters(ReplyParameters::new(MessageId(msg_id as i32)));
        }

        request.await.map(|_| ()).map_err(|e| {
            let msg = format!("Failed to send image: {e}");
            warn!("{}", msg);
            msg
        })
    }

    /// Send a voice message from bytes (OGG Opus format).
    pub async fn send_voice(&self, chat_id: i64, voice_data: Vec<u8>, reply_to_message_id: Option<i64>) -> Result<(), String> {
        info!("🔊 Sending voice to chat {} ({} bytes)", chat_id, voice_data.len());
        let input_file = InputFile::memory(voice_data).file_name("voice.ogg");

        let mut request = self.bot.send_voice(ChatId(chat_id), input_file);
        if let Some(msg_id) = reply_to_message_id {
            request = request.reply_parameters(ReplyParameters::new(MessageId(msg_id as i32)));
        }

        request.await.map(|_| ()).map_err(|e| {
            let msg = format!("Failed to send voice: {e}");
            warn!("{}", msg);
            msg
        })
    }

    pub async fn send_sticker(&self, chat_id: i64, sticker_file_id: &str) -> Result<(), String> {
        let sticker = InputFile::file_id(FileId(sticker_file_id.to_string()));
        self.bot
            .send_sticker(ChatId(chat_id), sticker)
            .await
            .map(|_| ())
            .map_err(|e| {
                let msg = format!("Failed to send sticker: {e}");
                warn!("{}", msg);
                msg
            })
    }

    /// Deliver engine replies in order. Failures are logged and the rest still go out.
    pub async fn deliver(&self, chat_id: i64, replies: Vec<Reply>, reply_to_message_id: Option<i64>) {
        for reply in replies {
            let result = match reply {
                Reply::Text(text) => self.send_text(chat_id, &text, reply_to_message_id).await,
                Reply::Photo(bytes) => self.send_image(chat_id, bytes, reply_to_message_id).await,
                Reply::Voice(bytes) => self.send_voice(chat_id, bytes, reply_to_message_id).await,
                Reply::Sticker(id) => self.send_sticker(chat_id, &id).await,
            };
            if let Err(e) = result {
                warn!("Reply delivery to {chat_id} failed: {e}");
            }
        }
    }

    /// Download any file by file_id.
    pub async fn download(&self, file_id: &str) -> Result<Vec<u8>, String> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| format!("Failed to get file info: {e}"))?;

        let mut data = Vec::new();
        self.bot
            .download_file(&file.path, &mut data)
            .await
            .map_err(|e| format!("Failed to download file: {e}"))?;

        info!("📥 Downloaded {} ({} bytes)", file.path, data.len());
        Ok(data)
    }

    /// `@username` of the bot, if Telegram answers.
    pub async fn me(&self) -> Result<teloxide::types::Me, String> {
        self.bot.get_me().await.map_err(|e| format!("getMe failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        assert_eq!(split_message("hello", MAX_MESSAGE_CHARS), vec!["hello"]);
        assert!(split_message("", MAX_MESSAGE_CHARS).is_empty());
    }

    #[test]
    fn test_hard_split_counts_chars() {
        let text = "é".repeat(10);
        let chunks = split_message(&text, 4);
        assert_eq!(chunks, vec!["éééé", "éééé", "éé"]);
    }

    #[test]
    fn test_prefers_newline_breaks() {
        let text = "1. first line\n2. second line\n3. third";
        let chunks = split_message(text, 20);
        assert_eq!(chunks[0], "1. first line\n");
        assert!(chunks.iter().all(|c| c.chars().count() <= 20));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_limit_counts_utf16_units() {
        // each emoji is a surrogate pair
        let text = "😀".repeat(3000);
        let chunks = split_message(&text, MAX_MESSAGE_CHARS);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 2048);
        assert!(chunks.iter().all(|c| c.encode_utf16().count() <= MAX_MESSAGE_CHARS));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_odd_limit_never_splits_a_pair() {
        let chunks = split_message("a😀😀", 3);
        assert_eq!(chunks, vec!["a😀", "😀"]);
    }

    #[test]
    fn test_long_brief_fits_limit() {
        let line = format!("{}\n", "x".repeat(99));
        let text = line.repeat(100);
        let chunks = split_message(&text, MAX_MESSAGE_CHARS);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= MAX_MESSAGE_CHARS));
        assert!(chunks[0].ends_with('\n'));
        assert_eq!(chunks.concat(), text);
    }
}
