//! # Feature: Video Generation
//!
//! Turns prompts (and an optional reference still) into short vertical clips
//! through task-based video APIs. Every provider follows the same shape: submit
//! a task, then poll its status until it is terminal.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.2.0
//! - **Toggleable**: true
//!
//! ## Changelog
//! - 1.2.0: Concurrent fan-out for multi-shot videos
//! - 1.1.0: Runway image-to-video provider
//! - 1.0.0: KIE.ai Veo provider

pub mod kie;
pub mod runway;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::Config;
use crate::error::ReelError;
use crate::polling::{poll_until_terminal, PollOutcome, PollPolicy, TaskState};

pub use kie::KieProvider;
pub use runway::RunwayProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoProviderKind {
    #[default]
    Kie,
    Runway,
}

impl VideoProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoProviderKind::Kie => "kie",
            VideoProviderKind::Runway => "runway",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "kie" | "veo" | "kie.ai" => Some(VideoProviderKind::Kie),
            "runway" | "runwayml" => Some(VideoProviderKind::Runway),
            _ => None,
        }
    }
}

/// One clip to generate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoRequest {
    pub prompt: String,
    /// Publicly reachable URL of the reference still
    pub image_url: Option<String>,
    /// Inline `data:` URL of the reference still
    pub image_data_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoClip {
    pub provider: String,
    pub task_id: String,
    pub prompt: String,
    pub url: String,
}

#[async_trait]
pub trait VideoProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start a generation task and return the provider's task id.
    async fn submit(&self, request: &VideoRequest) -> Result<String>;

    async fn status(&self, task_id: &str) -> Result<TaskState>;
}

#[derive(Clone)]
pub struct VideoGenerator {
    provider: Arc<dyn VideoProvider>,
    policy: PollPolicy,
}

impl VideoGenerator {
    pub fn new(provider: Arc<dyn VideoProvider>, policy: PollPolicy) -> Self {
        VideoGenerator { provider, policy }
    }

    /// Build the generator for `kind`, failing if its API key is missing.
    pub fn from_config(config: &Config, kind: VideoProviderKind, client: reqwest::Client) -> Result<Self> {
        let provider: Arc<dyn VideoProvider> = match kind {
            VideoProviderKind::Kie => {
                let key = config
                    .kie_api_key
                    .clone()
                    .ok_or(ReelError::NotConfigured("KIE_API_KEY"))?;
                Arc::new(KieProvider::new(key, client))
            }
            VideoProviderKind::Runway => {
                let key = config
                    .runway_api_key
                    .clone()
                    .ok_or(ReelError::NotConfigured("RUNWAY_API_KEY"))?;
                Arc::new(RunwayProvider::new(key, client))
            }
        };
        Ok(VideoGenerator::new(provider, config.poll_policy()))
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Submit one clip and poll it to completion.
    pub async fn generate(&self, request: &VideoRequest) -> Result<VideoClip> {
        let name = self.provider.name();
        let task_id = self.provider.submit(request).await?;
        info!("{} task submitted | id: {}", name, task_id);

        let provider = self.provider.as_ref();
        let id = task_id.as_str();
        let label = format!("{} task {}", name, task_id);
        match poll_until_terminal(&label, self.policy, || provider.status(id)).await {
            PollOutcome::Succeeded(url) => {
                info!("{} task {} finished | {}", name, task_id, url);
                Ok(VideoClip {
                    provider: name.to_string(),
                    task_id,
                    prompt: request.prompt.clone(),
                    url,
                })
            }
            PollOutcome::Failed(message) => Err(ReelError::TaskFailed {
                provider: name,
                message,
            }
            .into()),
            PollOutcome::TimedOut { attempts } => Err(ReelError::TimedOut {
                provider: name,
                attempts,
            }
            .into()),
        }
    }

    /// Generate all clips concurrently. Results keep request order and fail
    /// independently.
    pub async fn generate_many(&self, requests: &[VideoRequest]) -> Vec<Result<VideoClip>> {
        info!(
            "Generating {} clip(s) with {}",
            requests.len(),
            self.provider.name()
        );
        let results = join_all(requests.iter().map(|r| self.generate(r))).await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!("{}/{} clip(s) failed", failed, results.len());
        }
        results
    }
}
