//! # Feature: Product Reel Pipeline
//!
//! Runs a job through every stage: analyze the photo, pick a style and derive
//! prompts, restyle the still, generate clips, combine them. Each transition is
//! persisted so clients can follow progress by polling the job.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.2.0: Partial clip failures no longer fail the job
//! - 1.1.0: Multi-clip videos with combining
//! - 1.0.0: Analysis, style derivation and still generation

use anyhow::{anyhow, Result};
use log::{error, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analysis::AnalysisClient;
use crate::combine::VideoCombiner;
use crate::config::Config;
use crate::database::Database;
use crate::error::ReelError;
use crate::image_gen::{ImageGenerator, ImageQuality};
use crate::jobs::{JobOptions, JobRecord, JobStage};
use crate::styles::{PromptSet, StyleCatalog};
use crate::upload::{ImageFormat, ProductImage};
use crate::video_gen::{VideoGenerator, VideoProviderKind, VideoRequest};

#[derive(Clone)]
pub struct Pipeline {
    database: Database,
    analysis: AnalysisClient,
    images: ImageGenerator,
    combiner: VideoCombiner,
    videos: HashMap<VideoProviderKind, VideoGenerator>,
    output_dir: PathBuf,
    public_base_url: Option<String>,
}

impl Pipeline {
    pub fn new(
        database: Database,
        analysis: AnalysisClient,
        images: ImageGenerator,
        combiner: VideoCombiner,
        output_dir: impl Into<PathBuf>,
        public_base_url: Option<String>,
    ) -> Self {
        Pipeline {
            database,
            analysis,
            images,
            combiner,
            videos: HashMap::new(),
            output_dir: output_dir.into(),
            public_base_url,
        }
    }

    /// Wire every client from configuration. Video providers without an API key
    /// are left out.
    pub fn from_config(config: &Config, database: Database) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()?;

        let mut pipeline = Pipeline::new(
            database,
            AnalysisClient::new(config, client.clone()),
            ImageGenerator::new(config, client.clone()),
            VideoCombiner::new(config.combine_service_url.clone(), config.poll_policy(), client.clone()),
            &config.output_dir,
            config.public_base_url.clone(),
        );

        for kind in [VideoProviderKind::Kie, VideoProviderKind::Runway] {
            match VideoGenerator::from_config(config, kind, client.clone()) {
                Ok(generator) => pipeline = pipeline.with_video_generator(kind, generator),
                Err(e) => info!("Video provider {} disabled: {}", kind.as_str(), e),
            }
        }

        Ok(pipeline)
    }

    pub fn with_video_generator(mut self, kind: VideoProviderKind, generator: VideoGenerator) -> Self {
        self.videos.insert(kind, generator);
        self
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn supports(&self, kind: VideoProviderKind) -> bool {
        self.videos.contains_key(&kind)
    }

    /// Built-in styles overlaid with the ones stored in the database.
    pub async fn catalog(&self) -> Result<StyleCatalog> {
        let overrides = self.database.list_style_overrides().await?;
        Ok(StyleCatalog::builtin().with_overrides(overrides))
    }

    /// Validate and persist a new job. Nothing runs yet.
    pub async fn create_job(&self, user_id: &str, product_name: &str, options: JobOptions) -> Result<JobRecord> {
        if options.video_count > 0 && !self.supports(options.provider) {
            return Err(ReelError::NotConfigured(match options.provider {
                VideoProviderKind::Kie => "KIE_API_KEY",
                VideoProviderKind::Runway => "RUNWAY_API_KEY",
            })
            .into());
        }
        if let Some(style) = options.style.as_deref() {
            if self.catalog().await?.get(style).is_none() {
                return Err(ReelError::invalid(format!("unknown style '{}'", style)).into());
            }
        }

        let job = JobRecord::new(user_id, product_name, options)?;
        self.database.save_job(&job).await?;
        self.database
            .add_event(&job.id, job.stage, "info", "job created")
            .await?;
        self.database
            .log_usage(user_id, "create_job", Some(&job.product_name))
            .await?;
        info!("Created job {} for '{}'", job.id, job.product_name);
        Ok(job)
    }

    /// Run every stage. Failures are recorded on the returned job rather than
    /// returned as errors.
    pub async fn run(&self, mut job: JobRecord, image: ProductImage) -> JobRecord {
        info!("▶ Running job {} ({})", job.id, job.product_name);

        if let Err(e) = self.run_stages(&mut job, &image).await {
            let message = format!("{:#}", e);
            error!("Job {} failed during {}: {}", job.id, job.stage.as_str(), message);
            let stage = job.stage;
            job.fail(&message);
            self.persist(&job).await;
            self.event(&job.id, stage, "error", &message).await;
        } else {
            let output = job.result.as_ref().and_then(|r| r.primary_url()).unwrap_or("still only");
            info!("✅ Job {} completed | {}", job.id, output);
        }

        job
    }

    async fn run_stages(&self, job: &mut JobRecord, image: &ProductImage) -> Result<()> {
        self.enter(job, JobStage::Analyzing).await;
        let analysis = self.analysis.analyze(image, &job.product_name).await?;
        job.analysis = Some(analysis.clone());

        self.enter(job, JobStage::DerivingPrompts).await;
        let catalog = self.catalog().await?;
        let style = catalog.derive_style(&analysis, job.options.style.as_deref())?;
        let prompts = PromptSet::derive(style, &job.product_name, &analysis, job.options.video_count);
        self.event(&job.id, job.stage, "info", &format!("style {} selected", style.id))
            .await;
        job.prompts = Some(prompts.clone());

        self.enter(job, JobStage::GeneratingImage).await;
        let generated = self
            .images
            .generate_image(image, &prompts.image_prompt, job.options.size, ImageQuality::High)
            .await?;
        if let Some(revised) = generated.revised_prompt.as_deref() {
            self.event(&job.id, job.stage, "info", &format!("image prompt revised: {}", revised))
                .await;
        }
        let still = ProductImage::from_bytes("generated.png", generated.bytes, usize::MAX)?;
        let path = self.write_still(&job.id, &still).await?;
        job.image_path = Some(path.to_string_lossy().to_string());
        job.image_url = self
            .public_base_url
            .as_ref()
            .map(|base| format!("{}/jobs/{}/image", base, job.id));

        if job.options.video_count == 0 {
            self.enter(job, JobStage::Completed).await;
            return Ok(());
        }

        self.enter(job, JobStage::GeneratingVideos).await;
        let generator = self
            .videos
            .get(&job.options.provider)
            .ok_or_else(|| anyhow!("video provider {} is not configured", job.options.provider.as_str()))?;

        let still_data_url = still.to_data_url();
        let requests: Vec<VideoRequest> = prompts
            .video_prompts
            .iter()
            .map(|prompt| VideoRequest {
                prompt: prompt.clone(),
                image_url: job.image_url.clone(),
                image_data_url: Some(still_data_url.clone()),
            })
            .collect();

        let mut last_error = None;
        for (index, result) in generator.generate_many(&requests).await.into_iter().enumerate() {
            match result {
                Ok(clip) => job.clips.push(clip),
                Err(e) => {
                    let warning = format!("clip {} failed: {:#}", index + 1, e);
                    warn!("Job {}: {}", job.id, warning);
                    self.event(&job.id, job.stage, "warn", &warning).await;
                    job.warnings.push(warning);
                    last_error = Some(e);
                }
            }
        }

        if job.clips.is_empty() {
            return Err(last_error.unwrap_or_else(|| anyhow!("no clips were generated")));
        }

        self.enter(job, JobStage::Combining).await;
        let urls: Vec<String> = job.clips.iter().map(|c| c.url.clone()).collect();
        job.result = Some(self.combiner.combine(&urls).await?);

        self.enter(job, JobStage::Completed).await;
        Ok(())
    }

    async fn write_still(&self, job_id: &str, still: &ProductImage) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(format!("{}.{}", job_id, still.extension()));
        tokio::fs::write(&path, &still.bytes).await?;
        info!("Stored still for job {} at {}", job_id, path.display());
        Ok(path)
    }

    /// The generated still of a job together with its MIME type.
    pub async fn load_still(&self, job_id: &str) -> Result<(Vec<u8>, &'static str)> {
        let job = self
            .database
            .get_job(job_id)
            .await?
            .ok_or_else(|| ReelError::NotFound(format!("job {}", job_id)))?;
        let path = job
            .image_path
            .ok_or_else(|| ReelError::NotFound(format!("image for job {}", job_id)))?;

        let bytes = tokio::fs::read(Path::new(&path)).await?;
        let mime = ImageFormat::sniff(&bytes)
            .map(|f| f.mime_type())
            .unwrap_or("application/octet-stream");
        Ok((bytes, mime))
    }

    async fn enter(&self, job: &mut JobRecord, stage: JobStage) {
        job.advance(stage);
        self.persist(job).await;
        self.event(&job.id, stage, "info", &format!("entered {}", stage.as_str()))
            .await;
    }

    // Persistence failures are logged; they must not abort a paid-for generation.
    async fn persist(&self, job: &JobRecord) {
        if let Err(e) = self.database.save_job(job).await {
            error!("Failed to persist job {}: {}", job.id, e);
        }
    }

    async fn event(&self, job_id: &str, stage: JobStage, level: &str, message: &str) {
        if let Err(e) = self.database.add_event(job_id, stage, level, message).await {
            error!("Failed to record event for job {}: {}", job_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combine::CombinedVideo;
    use crate::polling::{PollPolicy, TaskState};
    use crate::upload::tests::tiny_png;
    use crate::video_gen::VideoProvider;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Finishes every task on the first status check; the submissions listed in
    /// `failing` (0-based) are reported as failed.
    struct InstantProvider {
        submitted: AtomicU32,
        failing: Vec<u32>,
    }

    #[async_trait]
    impl VideoProvider for InstantProvider {
        fn name(&self) -> &'static str {
            "instant"
        }

        async fn submit(&self, _request: &VideoRequest) -> Result<String> {
            Ok(self.submitted.fetch_add(1, Ordering::SeqCst).to_string())
        }

        async fn status(&self, task_id: &str) -> Result<TaskState> {
            let n: u32 = task_id.parse()?;
            if self.failing.contains(&n) {
                Ok(TaskState::Failed { message: "moderation".to_string() })
            } else {
                Ok(TaskState::Succeeded { url: format!("https://cdn.example.com/{}.mp4", n) })
            }
        }
    }

    struct Harness {
        pipeline: Pipeline,
        _server: MockServer,
        _output: tempfile::TempDir,
    }

    async fn harness(failing: Vec<u32>, public_base_url: Option<&str>) -> Harness {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "description": "A frosted glass serum bottle with a gold dropper.",
                "category": "skincare"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/images/edits"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "b64_json": STANDARD.encode(tiny_png()),
                    "revised_prompt": "Serum bottle on wet stone"
                }]
            })))
            .mount(&server)
            .await;

        let mut config = Config::from_lookup(|key| match key {
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            _ => None,
        })
        .unwrap();
        config.analyze_function_url = Some(format!("{}/analyze", server.uri()));

        let output = tempfile::tempdir().unwrap();
        let client = reqwest::Client::new();
        let provider = InstantProvider {
            submitted: AtomicU32::new(0),
            failing,
        };
        let pipeline = Pipeline::new(
            Database::in_memory().await.unwrap(),
            AnalysisClient::new(&config, client.clone()),
            ImageGenerator::new(&config, client.clone()).with_base_url(server.uri()),
            VideoCombiner::new(None, PollPolicy::default(), client),
            output.path(),
            public_base_url.map(String::from),
        )
        .with_video_generator(
            VideoProviderKind::Kie,
            VideoGenerator::new(Arc::new(provider), PollPolicy::new(Duration::from_millis(1), 3)),
        );

        Harness {
            pipeline,
            _server: server,
            _output: output,
        }
    }

    fn upload() -> ProductImage {
        ProductImage::from_bytes("serum.png", tiny_png(), 1024).unwrap()
    }

    fn options(video_count: usize) -> JobOptions {
        JobOptions {
            video_count,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_full_run_with_videos() {
        let h = harness(vec![], Some("https://reel.example.com")).await;
        let job = h.pipeline.create_job("u1", "Glow Serum", options(2)).await.unwrap();
        let job = h.pipeline.run(job, upload()).await;

        assert_eq!(job.stage, JobStage::Completed, "error: {:?}", job.error);
        assert_eq!(job.prompts.as_ref().unwrap().style_id, "cosmetics_spa");
        assert_eq!(job.clips.len(), 2);
        assert_eq!(
            job.image_url.as_deref(),
            Some(format!("https://reel.example.com/jobs/{}/image", job.id).as_str())
        );
        assert!(matches!(job.result, Some(CombinedVideo::Playlist { ref urls }) if urls.len() == 2));

        let stored = h.pipeline.database().get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored, job);

        let (bytes, mime) = h.pipeline.load_still(&job.id).await.unwrap();
        assert_eq!(bytes, tiny_png());
        assert_eq!(mime, "image/png");

        let events = h.pipeline.database().get_events(&job.id).await.unwrap();
        assert!(events
            .iter()
            .any(|e| e.stage == JobStage::GeneratingImage && e.message.contains("wet stone")));
        let stages: Vec<JobStage> = events.into_iter().map(|e| e.stage).collect();
        assert!(stages.contains(&JobStage::Combining));
        assert_eq!(stages.last(), Some(&JobStage::Completed));
    }

    #[tokio::test]
    async fn test_still_only_run() {
        let h = harness(vec![], None).await;
        let job = h.pipeline.create_job("u1", "Glow Serum", options(0)).await.unwrap();
        let job = h.pipeline.run(job, upload()).await;

        assert_eq!(job.stage, JobStage::Completed);
        assert!(job.clips.is_empty());
        assert!(job.result.is_none());
        assert!(job.image_path.is_some());
        assert!(job.image_url.is_none());
    }

    #[tokio::test]
    async fn test_partial_clip_failure_continues() {
        let h = harness(vec![1], None).await;
        let job = h.pipeline.create_job("u1", "Glow Serum", options(3)).await.unwrap();
        let job = h.pipeline.run(job, upload()).await;

        assert_eq!(job.stage, JobStage::Completed);
        assert_eq!(job.clips.len(), 2);
        assert_eq!(job.warnings.len(), 1);
        assert!(job.warnings[0].contains("moderation"));
    }

    #[tokio::test]
    async fn test_all_clips_failing_fails_job() {
        let h = harness(vec![0, 1], None).await;
        let job = h.pipeline.create_job("u1", "Glow Serum", options(2)).await.unwrap();
        let job = h.pipeline.run(job, upload()).await;

        assert_eq!(job.stage, JobStage::Failed);
        assert_eq!(job.failed_stage, Some(JobStage::GeneratingVideos));
        assert!(job.error.as_deref().unwrap().contains("moderation"));
    }

    #[tokio::test]
    async fn test_create_job_validation() {
        let h = harness(vec![], None).await;

        let runway = JobOptions {
            provider: VideoProviderKind::Runway,
            ..options(1)
        };
        let err = h.pipeline.create_job("u1", "Serum", runway).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ReelError>(), Some(ReelError::NotConfigured(_))));

        let unknown_style = JobOptions {
            style: Some("vaporwave".to_string()),
            ..options(0)
        };
        assert!(h.pipeline.create_job("u1", "Serum", unknown_style).await.is_err());

        // Still-only jobs never need a video provider
        let still_runway = JobOptions {
            provider: VideoProviderKind::Runway,
            ..options(0)
        };
        assert!(h.pipeline.create_job("u1", "Serum", still_runway).await.is_ok());
    }
}
