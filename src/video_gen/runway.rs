//! Runway image-to-video provider. Every task needs a reference image.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, error};
use serde::{Deserialize, Serialize};

use super::{VideoProvider, VideoRequest};
use crate::error::{provider_message, ReelError};
use crate::polling::TaskState;

const DEFAULT_RUNWAY_URL: &str = "https://api.dev.runwayml.com";
const RUNWAY_VERSION: &str = "2024-11-06";
const DEFAULT_MODEL: &str = "gen4_turbo";

pub struct RunwayProvider {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageToVideoRequest<'a> {
    model: &'a str,
    prompt_image: &'a str,
    prompt_text: &'a str,
    ratio: &'static str,
    duration: u32,
}

#[derive(Deserialize, Debug)]
struct CreatedTask {
    id: String,
}

#[derive(Deserialize, Debug)]
pub struct RunwayTask {
    pub status: String,
    #[serde(default)]
    pub output: Vec<String>,
    #[serde(default)]
    pub failure: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
}

impl RunwayProvider {
    pub fn new(api_key: String, client: reqwest::Client) -> Self {
        RunwayProvider {
            api_key,
            base_url: DEFAULT_RUNWAY_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-Runway-Version", RUNWAY_VERSION)
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            error!("Runway API error (status {}): {}", status, body);
            return Err(ReelError::Provider {
                provider: "runway",
                status: status.as_u16(),
                message: provider_message(&body),
            }
            .into());
        }
        serde_json::from_str(&body).map_err(|e| anyhow!("Failed to parse Runway response: {}", e))
    }
}

#[async_trait]
impl VideoProvider for RunwayProvider {
    fn name(&self) -> &'static str {
        "runway"
    }

    async fn submit(&self, request: &VideoRequest) -> Result<String> {
        if request.prompt.trim().is_empty() {
            return Err(ReelError::invalid("video prompt cannot be empty").into());
        }
        // Inline data works even when the public URL is unreachable from Runway
        let prompt_image = request
            .image_data_url
            .as_deref()
            .or(request.image_url.as_deref())
            .ok_or_else(|| ReelError::invalid("Runway requires a reference image"))?;

        let body = ImageToVideoRequest {
            model: &self.model,
            prompt_image,
            prompt_text: &request.prompt,
            ratio: "720:1280",
            duration: 5,
        };

        debug!("Submitting Runway image_to_video task");
        let response = self
            .authorized(self.client.post(format!("{}/v1/image_to_video", self.base_url)))
            .json(&body)
            .send()
            .await?;

        let created: CreatedTask = Self::read_json(response).await?;
        Ok(created.id)
    }

    async fn status(&self, task_id: &str) -> Result<TaskState> {
        let response = self
            .authorized(self.client.get(format!("{}/v1/tasks/{}", self.base_url, task_id)))
            .send()
            .await?;

        let task: RunwayTask = Self::read_json(response).await?;
        Ok(task_state(&task))
    }
}

pub fn task_state(task: &RunwayTask) -> TaskState {
    match task.status.as_str() {
        "SUCCEEDED" => match task.output.first() {
            Some(url) => TaskState::Succeeded { url: url.clone() },
            None => TaskState::Failed {
                message: "task succeeded without output".to_string(),
            },
        },
        "FAILED" | "CANCELLED" => TaskState::Failed {
            message: task
                .failure
                .clone()
                .unwrap_or_else(|| format!("task {}", task.status.to_lowercase())),
        },
        // PENDING, THROTTLED, RUNNING
        _ => TaskState::Running {
            progress: task.progress.map(|p| (p * 100.0).clamp(0.0, 100.0) as u8),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn task(status: &str, output: &[&str], failure: Option<&str>) -> RunwayTask {
        RunwayTask {
            status: status.to_string(),
            output: output.iter().map(|s| s.to_string()).collect(),
            failure: failure.map(String::from),
            progress: Some(0.5),
        }
    }

    #[test]
    fn test_task_state_mapping() {
        assert_eq!(
            task_state(&task("THROTTLED", &[], None)),
            TaskState::Running { progress: Some(50) }
        );
        assert_eq!(
            task_state(&task("SUCCEEDED", &["https://r/1.mp4"], None)),
            TaskState::Succeeded { url: "https://r/1.mp4".to_string() }
        );
        assert_eq!(
            task_state(&task("CANCELLED", &[], None)),
            TaskState::Failed { message: "task cancelled".to_string() }
        );
        assert_eq!(
            task_state(&task("FAILED", &[], Some("moderation"))),
            TaskState::Failed { message: "moderation".to_string() }
        );
    }

    #[tokio::test]
    async fn test_runway_requires_reference_image() {
        let provider = RunwayProvider::new("rw".to_string(), reqwest::Client::new());
        let err = provider
            .submit(&VideoRequest {
                prompt: "orbit".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<ReelError>(), Some(ReelError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_runway_submit_and_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/image_to_video"))
            .and(header("X-Runway-Version", RUNWAY_VERSION))
            .and(body_partial_json(json!({
                "promptImage": "data:image/png;base64,AAAA",
                "ratio": "720:1280"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "rw-task" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/tasks/rw-task"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "rw-task", "status": "SUCCEEDED", "output": ["https://runway.example/out.mp4"]
            })))
            .mount(&server)
            .await;

        let provider = RunwayProvider::new("rw".to_string(), reqwest::Client::new()).with_base_url(server.uri());
        let id = provider
            .submit(&VideoRequest {
                prompt: "orbit".to_string(),
                image_url: Some("https://reel.example.com/jobs/1/image".to_string()),
                image_data_url: Some("data:image/png;base64,AAAA".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(id, "rw-task");
        assert_eq!(
            provider.status(&id).await.unwrap(),
            TaskState::Succeeded { url: "https://runway.example/out.mp4".to_string() }
        );
    }

    #[tokio::test]
    async fn test_runway_falls_back_to_public_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/image_to_video"))
            .and(body_partial_json(json!({ "promptImage": "https://reel.example.com/jobs/2/image" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "rw-url" })))
            .mount(&server)
            .await;

        let provider = RunwayProvider::new("rw".to_string(), reqwest::Client::new()).with_base_url(server.uri());
        let id = provider
            .submit(&VideoRequest {
                prompt: "orbit".to_string(),
                image_url: Some("https://reel.example.com/jobs/2/image".to_string()),
                image_data_url: None,
            })
            .await
            .unwrap();
        assert_eq!(id, "rw-url");
    }
}
