//! Image generation and editing through the OpenAI images API.

use std::sync::LazyLock;

use async_trait::async_trait;
use base64::Engine;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::llm::{Client, Error, Image};

const IMAGE_MODEL: &str = "gpt-image-1";
pub const DEFAULT_IMAGE_SIZE: &str = "1024x1024";

static SIZE_HINT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)\s*[x*×]\s*(\d+)").expect("valid regex"));

/// A size hint like `1024x1536` or `1024 * 1536`, normalized to `WxH`.
pub fn extract_image_size(text: &str) -> Option<String> {
    SIZE_HINT
        .captures(text)
        .map(|c| format!("{}x{}", &c[1], &c[2]))
}

/// The prompt with any size hint removed.
pub fn strip_image_size(text: &str) -> String {
    let stripped = SIZE_HINT.replace_all(text, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn upload_name(media_type: &str) -> &'static str {
    match media_type {
        "image/jpeg" | "image/jpg" => "image.jpg",
        "image/webp" => "image.webp",
        _ => "image.png",
    }
}

#[async_trait]
pub trait ImageModel: Send + Sync {
    /// PNG bytes for a new image.
    async fn generate(&self, prompt: &str, size: &str) -> Result<Vec<u8>, Error>;

    /// PNG bytes of `image` changed according to `prompt`.
    async fn edit(&self, image: &Image, prompt: &str, size: &str) -> Result<Vec<u8>, Error>;
}

#[derive(Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

async fn decode_images(response: reqwest::Response) -> Result<Vec<u8>, Error> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Api(format!("{status}: {body}")));
    }
    let parsed: ImagesResponse = response.json().await.map_err(|e| Error::Parse(e.to_string()))?;
    let encoded = parsed
        .data
        .into_iter()
        .find_map(|d| d.b64_json)
        .ok_or(Error::Empty)?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| Error::Parse(format!("base64: {e}")))
}

#[async_trait]
impl ImageModel for Client {
    async fn generate(&self, prompt: &str, size: &str) -> Result<Vec<u8>, Error> {
        info!("🎨 Generating image ({size})");
        let response = self
            .post("/images/generations")?
            .json(&json!({ "model": IMAGE_MODEL, "prompt": prompt, "size": size }))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        decode_images(response).await
    }

    async fn edit(&self, image: &Image, prompt: &str, size: &str) -> Result<Vec<u8>, Error> {
        info!("🎨 Editing image ({} bytes, {size})", image.data.len());
        let part = reqwest::multipart::Part::bytes(image.data.clone())
            .file_name(upload_name(&image.media_type))
            .mime_str(&image.media_type)
            .map_err(|e| Error::Http(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("model", IMAGE_MODEL)
            .text("prompt", prompt.to_string())
            .text("size", size.to_string())
            .part("image", part);

        let response = self
            .post("/images/edits")?
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        decode_images(response).await
    }
}
