//! Voice note transcription and spoken replies.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::llm::{Client, Error};

/// Tried in order; the next one only runs when the previous call failed.
pub const TRANSCRIBE_MODELS: &[&str] = &["gpt-4o-mini-transcribe", "whisper-1"];
const SPEECH_MODEL: &str = "gpt-4o-mini-tts";
const SPEECH_VOICE: &str = "echo";

#[async_trait]
pub trait SpeechModel: Send + Sync {
    /// Text of an OGG/Opus voice note. Empty when nothing intelligible was said.
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, Error>;

    /// OGG/Opus audio reading `text` aloud.
    async fn speak(&self, text: &str) -> Result<Vec<u8>, Error>;
}

#[derive(Deserialize)]
struct Transcription {
    #[serde(default)]
    text: String,
}

impl Client {
    async fn transcribe_with(&self, model: &str, audio: Vec<u8>) -> Result<String, Error> {
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name("voice.ogg")
            .mime_str("audio/ogg")
            .map_err(|e| Error::Http(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("model", model.to_string())
            .part("file", part);

        let response = self
            .post("/audio/transcriptions")?
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }
        let parsed: Transcription = response.json().await.map_err(|e| Error::Parse(e.to_string()))?;
        Ok(parsed.text.trim().to_string())
    }
}

#[async_trait]
impl SpeechModel for Client {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, Error> {
        let mut last_error = Error::Empty;
        for model in TRANSCRIBE_MODELS {
            match self.transcribe_with(model, audio.clone()).await {
                Ok(text) => {
                    info!("🎤 Transcribed with {model}: {} chars", text.chars().count());
                    return Ok(text);
                }
                Err(e) => {
                    warn!("🎤 Transcription with {model} failed: {e}");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    async fn speak(&self, text: &str) -> Result<Vec<u8>, Error> {
        let response = self
            .post("/audio/speech")?
            .json(&json!({
                "model": SPEECH_MODEL,
                "input": text,
                "voice": SPEECH_VOICE,
                "response_format": "opus",
            }))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }
        let audio = response.bytes().await.map_err(|e| Error::Http(e.to_string()))?;
        if audio.is_empty() {
            return Err(Error::Empty);
        }
        info!("🔊 Synthesized {} bytes of speech", audio.len());
        Ok(audio.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> Client {
        Client::new("sk-test".into(), reqwest::Client::new()).with_base_url(server.uri())
    }

    #[tokio::test]
    async fn test_transcribe_primary_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .and(body_string_contains("gpt-4o-mini-transcribe"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"text":" what's new in tech today? "}"#))
            .expect(1)
            .mount(&server)
            .await;

        let text = client(&server).transcribe(vec![1, 2, 3]).await.unwrap();
        assert_eq!(text, "what's new in tech today?");
    }

    #[tokio::test]
    async fn test_transcribe_falls_back_to_whisper() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .and(body_string_contains("gpt-4o-mini-transcribe"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .and(body_string_contains("whisper-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"text":"hello"}"#))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(client(&server).transcribe(vec![0]).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_transcribe_all_models_fail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let err = client(&server).transcribe(vec![0]).await.unwrap_err();
        assert!(matches!(err, Error::Api(_)));
    }

    #[tokio::test]
    async fn test_speak() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .and(body_partial_json(json!({ "model": "gpt-4o-mini-tts", "voice": "echo", "input": "hi there" })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'O', b'g', b'g', b'S']))
            .mount(&server)
            .await;

        let audio = client(&server).speak("hi there").await.unwrap();
        assert_eq!(audio, b"OggS".to_vec());
    }

    #[tokio::test]
    async fn test_missing_key() {
        let client = Client::new(String::new(), reqwest::Client::new());
        assert!(matches!(client.speak("x").await.unwrap_err(), Error::MissingKey));
    }
}
