//! # Feature: Image Generation
//!
//! Restyles the uploaded product photo with the OpenAI image edit endpoint.
//! Sizes are square, portrait (default, for vertical video) and landscape.
//!
//! - **Version**: 2.0.0
//! - **Since**: 0.2.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 2.0.0: Image edits from a source photo, base64 results
//! - 1.0.0: Initial release with text-to-image generation

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine};
use log::{debug, error, info};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::ReelError;
use crate::upload::ProductImage;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone)]
pub struct ImageGenerator {
    openai_api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSize {
    Square,    // 1024x1024
    #[default]
    Portrait,  // 1024x1536
    Landscape, // 1536x1024
}

impl ImageSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSize::Square => "1024x1024",
            ImageSize::Portrait => "1024x1536",
            ImageSize::Landscape => "1536x1024",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "square" | "1024x1024" => Some(ImageSize::Square),
            "portrait" | "vertical" | "tall" | "1024x1536" => Some(ImageSize::Portrait),
            "landscape" | "wide" | "1536x1024" => Some(ImageSize::Landscape),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageQuality {
    Low,
    Medium,
    #[default]
    High,
    Auto,
}

impl ImageQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageQuality::Low => "low",
            ImageQuality::Medium => "medium",
            ImageQuality::High => "high",
            ImageQuality::Auto => "auto",
        }
    }
}

#[derive(Deserialize, Debug)]
struct ImagesResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize, Debug)]
struct ImageData {
    b64_json: Option<String>,
    url: Option<String>,
    revised_prompt: Option<String>,
}

#[derive(Deserialize, Debug)]
struct OpenAiError {
    error: OpenAiErrorDetails,
}

#[derive(Deserialize, Debug)]
struct OpenAiErrorDetails {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

/// Result of image generation
#[derive(Debug)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub revised_prompt: Option<String>,
}

impl ImageGenerator {
    pub fn new(config: &Config, client: reqwest::Client) -> Self {
        ImageGenerator {
            openai_api_key: config.openai_api_key.clone(),
            model: config.openai_image_model.clone(),
            base_url: OPENAI_BASE_URL.to_string(),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Restyle `source` according to `prompt`
    pub async fn generate_image(
        &self,
        source: &ProductImage,
        prompt: &str,
        size: ImageSize,
        quality: ImageQuality,
    ) -> Result<GeneratedImage> {
        info!(
            "Generating image with {} | Size: {} | Quality: {} | Prompt: '{}'",
            self.model,
            size.as_str(),
            quality.as_str(),
            prompt.chars().take(100).collect::<String>()
        );

        let image_part = Part::bytes(source.bytes.clone())
            .file_name(format!("product.{}", source.extension()))
            .mime_str(source.mime_type())?;

        let form = Form::new()
            .text("model", self.model.clone())
            .text("prompt", prompt.to_string())
            .text("size", size.as_str())
            .text("quality", quality.as_str())
            .text("n", "1")
            .part("image", image_part);

        debug!("Sending request to OpenAI image edit API");
        let response = self
            .client
            .post(format!("{}/images/edits", self.base_url))
            .header("Authorization", format!("Bearer {}", self.openai_api_key))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<OpenAiError>(&response_text) {
                Ok(error_response) => {
                    error!(
                        "OpenAI image API error: {} (type: {:?})",
                        error_response.error.message, error_response.error.error_type
                    );
                    ReelError::Provider {
                        provider: "openai",
                        status: status.as_u16(),
                        message: error_response.error.message,
                    }
                }
                Err(_) => {
                    error!("OpenAI image API error (status {}): {}", status, response_text);
                    ReelError::Provider {
                        provider: "openai",
                        status: status.as_u16(),
                        message: response_text.chars().take(200).collect(),
                    }
                }
            }
            .into());
        }

        let images: ImagesResponse = serde_json::from_str(&response_text)
            .map_err(|e| anyhow::anyhow!("Failed to parse image response: {}", e))?;

        let image_data = images
            .data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No image data in OpenAI response"))?;

        let bytes = match (image_data.b64_json, image_data.url) {
            (Some(b64), _) => STANDARD
                .decode(b64.trim())
                .map_err(|e| anyhow::anyhow!("Invalid base64 image data: {}", e))?,
            (None, Some(url)) => self.download_image(&url).await?,
            (None, None) => {
                error!("No image payload in response: {}", response_text);
                return Err(anyhow::anyhow!("No image payload in OpenAI response"));
            }
        };

        info!("Image generated successfully | Size: {} bytes", bytes.len());
        Ok(GeneratedImage {
            bytes,
            revised_prompt: image_data.revised_prompt,
        })
    }

    /// Download an image from URL to bytes
    pub async fn download_image(&self, url: &str) -> Result<Vec<u8>> {
        debug!("Downloading generated image");
        let response = self.client.get(url).send().await?;

        if response.status().is_success() {
            let bytes = response.bytes().await?;
            info!("Image downloaded | Size: {} bytes", bytes.len());
            Ok(bytes.to_vec())
        } else {
            error!("Failed to download image: {}", response.status());
            Err(anyhow::anyhow!("Failed to download image: {}", response.status()))
        }
    }
}
