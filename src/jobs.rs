//! Job records: what a single product-to-video run has produced so far.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::ProductAnalysis;
use crate::combine::CombinedVideo;
use crate::error::ReelError;
use crate::image_gen::ImageSize;
use crate::styles::PromptSet;
use crate::video_gen::{VideoClip, VideoProviderKind};

pub const MAX_VIDEO_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Uploaded,
    Analyzing,
    DerivingPrompts,
    GeneratingImage,
    GeneratingVideos,
    Combining,
    Completed,
    Failed,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Uploaded => "uploaded",
            JobStage::Analyzing => "analyzing",
            JobStage::DerivingPrompts => "deriving_prompts",
            JobStage::GeneratingImage => "generating_image",
            JobStage::GeneratingVideos => "generating_videos",
            JobStage::Combining => "combining",
            JobStage::Completed => "completed",
            JobStage::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(JobStage::Uploaded),
            "analyzing" => Some(JobStage::Analyzing),
            "deriving_prompts" => Some(JobStage::DerivingPrompts),
            "generating_image" => Some(JobStage::GeneratingImage),
            "generating_videos" => Some(JobStage::GeneratingVideos),
            "combining" => Some(JobStage::Combining),
            "completed" => Some(JobStage::Completed),
            "failed" => Some(JobStage::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Completed | JobStage::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    pub style: Option<String>,
    pub video_count: usize,
    pub provider: VideoProviderKind,
    pub size: ImageSize,
}

impl Default for JobOptions {
    fn default() -> Self {
        JobOptions {
            style: None,
            video_count: 1,
            provider: VideoProviderKind::default(),
            size: ImageSize::default(),
        }
    }
}

impl JobOptions {
    pub fn validate(&self) -> Result<()> {
        if self.video_count > MAX_VIDEO_COUNT {
            return Err(ReelError::invalid(format!(
                "video_count must be between 0 and {}",
                MAX_VIDEO_COUNT
            ))
            .into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub user_id: String,
    pub product_name: String,
    pub stage: JobStage,
    pub options: JobOptions,
    pub analysis: Option<ProductAnalysis>,
    pub prompts: Option<PromptSet>,
    pub image_path: Option<String>,
    pub image_url: Option<String>,
    pub clips: Vec<VideoClip>,
    pub result: Option<CombinedVideo>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub failed_stage: Option<JobStage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(user_id: &str, product_name: &str, options: JobOptions) -> Result<Self> {
        let product_name = product_name.trim();
        if product_name.is_empty() {
            return Err(ReelError::invalid("product name is required").into());
        }
        options.validate()?;

        let now = Utc::now();
        Ok(JobRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            product_name: product_name.to_string(),
            stage: JobStage::Uploaded,
            options,
            analysis: None,
            prompts: None,
            image_path: None,
            image_url: None,
            clips: Vec::new(),
            result: None,
            warnings: Vec::new(),
            error: None,
            failed_stage: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn advance(&mut self, stage: JobStage) {
        self.stage = stage;
        self.updated_at = Utc::now();
    }

    /// Record the failure against the stage that was running.
    pub fn fail(&mut self, error: &str) {
        self.failed_stage = Some(self.stage);
        self.error = Some(error.to_string());
        self.advance(JobStage::Failed);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub stage: JobStage,
    pub level: String,
    pub message: String,
    pub created_at: String,
}
