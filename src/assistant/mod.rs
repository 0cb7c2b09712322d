//! The Telegram assistant: routing, conversations, images, voice and the digest.

pub mod digest;
pub mod engine;
pub mod images;
pub mod session;
pub mod telegram;
pub mod voice;

#[cfg(test)]
mod tests;

pub use engine::{Engine, Inbound, Reply};
pub use images::ImageModel;
pub use session::ConversationStore;
pub use telegram::TelegramClient;
pub use voice::SpeechModel;
