//! # Feature: Product Analysis
//!
//! Sends the uploaded photo and product name to a hosted analysis function and
//! reads back a description plus a category/style suggestion. Without a hosted
//! function the OpenAI vision endpoint is called directly with the same contract.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Direct OpenAI vision fallback
//! - 1.0.0: Hosted function client

use anyhow::{anyhow, Result};
use log::{debug, error, info};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::OnceLock;

use crate::config::Config;
use crate::error::{provider_message, ReelError};
use crate::upload::ProductImage;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const VISION_SYSTEM_PROMPT: &str = "You are a product marketing analyst. Look at the product photo \
and answer ONLY with a JSON object of the form \
{\"description\": string, \"category\": string, \"style\": string, \"features\": [string], \"colors\": [string]}. \
The description is two or three sentences a copywriter could use. The category is one of: \
cosmetics, food, fashion, electronics, home, jewelry, generic. The style is a short visual mood \
for a vertical social media ad.";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductAnalysis {
    pub description: String,
    #[serde(default, alias = "suggestedCategory")]
    pub category: Option<String>,
    #[serde(default, alias = "suggestedStyle")]
    pub style: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub colors: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest<'a> {
    image: String,
    product_name: &'a str,
}

#[derive(Clone)]
pub struct AnalysisClient {
    client: reqwest::Client,
    function_url: Option<String>,
    function_key: Option<String>,
    openai_api_key: String,
    openai_base_url: String,
    vision_model: String,
}

impl AnalysisClient {
    pub fn new(config: &Config, client: reqwest::Client) -> Self {
        AnalysisClient {
            client,
            function_url: config.analyze_function_url.clone(),
            function_key: config.analyze_function_key.clone(),
            openai_api_key: config.openai_api_key.clone(),
            openai_base_url: OPENAI_BASE_URL.to_string(),
            vision_model: config.openai_vision_model.clone(),
        }
    }

    pub fn with_openai_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.openai_base_url = base_url.into();
        self
    }

    pub async fn analyze(&self, image: &ProductImage, product_name: &str) -> Result<ProductAnalysis> {
        info!(
            "Analyzing product '{}' | {} bytes | {}",
            product_name,
            image.bytes.len(),
            image.mime_type()
        );

        let analysis = match &self.function_url {
            Some(url) => self.analyze_with_function(url, image, product_name).await?,
            None => self.analyze_with_openai(image, product_name).await?,
        };

        info!(
            "Analysis complete | category: {:?} | style: {:?} | description length: {}",
            analysis.category,
            analysis.style,
            analysis.description.len()
        );
        Ok(analysis)
    }

    async fn analyze_with_function(
        &self,
        url: &str,
        image: &ProductImage,
        product_name: &str,
    ) -> Result<ProductAnalysis> {
        debug!("Posting image to hosted analysis function");
        let mut request = self.client.post(url).json(&AnalyzeRequest {
            image: image.to_data_url(),
            product_name,
        });
        if let Some(key) = &self.function_key {
            request = request
                .header("Authorization", format!("Bearer {}", key))
                .header("apikey", key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!("Analysis function error (status {}): {}", status, body);
            return Err(ReelError::Provider {
                provider: "analysis",
                status: status.as_u16(),
                message: provider_message(&body),
            }
            .into());
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| anyhow!("Failed to parse analysis response: {}", e))?;
        parse_analysis(value)
    }

    async fn analyze_with_openai(&self, image: &ProductImage, product_name: &str) -> Result<ProductAnalysis> {
        debug!("No analysis function configured, calling OpenAI vision ({})", self.vision_model);
        let body = json!({
            "model": self.vision_model,
            "messages": [
                { "role": "system", "content": VISION_SYSTEM_PROMPT },
                { "role": "user", "content": [
                    { "type": "text", "text": format!("Product name: {}", product_name) },
                    { "type": "image_url", "image_url": { "url": image.to_data_url() } }
                ]}
            ],
            "max_tokens": 800,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.openai_base_url))
            .header("Authorization", format!("Bearer {}", self.openai_api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            error!("OpenAI vision error (status {}): {}", status, text);
            return Err(ReelError::Provider {
                provider: "openai",
                status: status.as_u16(),
                message: provider_message(&text),
            }
            .into());
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse OpenAI vision response: {}", e))?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow!("No message content in OpenAI vision response"))?;

        let value: Value = serde_json::from_str(strip_code_fence(content))
            .map_err(|e| anyhow!("Vision model did not answer with JSON: {}", e))?;
        parse_analysis(value)
    }
}

/// Accepts either the analysis object itself or one wrapped in `analysis`/`data`.
pub fn parse_analysis(value: Value) -> Result<ProductAnalysis> {
    let nested = value
        .get("analysis")
        .or_else(|| value.get("data"))
        .filter(|v| v.is_object())
        .cloned();
    let inner = nested.unwrap_or(value);

    let mut analysis: ProductAnalysis = serde_json::from_value(inner)
        .map_err(|e| anyhow!("Analysis response is missing fields: {}", e))?;

    analysis.description = analysis.description.trim().to_string();
    if analysis.description.is_empty() {
        return Err(anyhow!("Analysis response has an empty description"));
    }
    analysis.category = analysis.category.filter(|c| !c.trim().is_empty());
    analysis.style = analysis.style.filter(|s| !s.trim().is_empty());
    Ok(analysis)
}

pub fn strip_code_fence(content: &str) -> &str {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("static regex")
    });
    fence
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or_else(|| content.trim())
}
