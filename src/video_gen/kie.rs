//! KIE.ai Veo provider.
//!
//! Responses come in a `{code, msg, data}` envelope; `code` other than 200 is an
//! error even when the HTTP status is 200.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{VideoProvider, VideoRequest};
use crate::error::{provider_message, ReelError};
use crate::polling::TaskState;

const DEFAULT_KIE_URL: &str = "https://api.kie.ai";
const DEFAULT_MODEL: &str = "veo3_fast";

pub struct KieProvider {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    prompt: &'a str,
    model: &'a str,
    aspect_ratio: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    image_urls: Vec<&'a str>,
}

#[derive(Deserialize, Debug)]
struct Envelope {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

impl KieProvider {
    pub fn new(api_key: String, client: reqwest::Client) -> Self {
        KieProvider {
            api_key,
            base_url: DEFAULT_KIE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn read_envelope(&self, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!("KIE API error (status {}): {}", status, body);
            return Err(ReelError::Provider {
                provider: "kie",
                status: status.as_u16(),
                message: provider_message(&body),
            }
            .into());
        }

        let envelope: Envelope = serde_json::from_str(&body)
            .map_err(|e| anyhow!("Failed to parse KIE response: {}", e))?;
        if envelope.code != 200 {
            error!("KIE API rejected request (code {}): {:?}", envelope.code, envelope.msg);
            return Err(ReelError::Provider {
                provider: "kie",
                status: u16::try_from(envelope.code).unwrap_or(500),
                message: envelope.msg.unwrap_or_else(|| "unknown error".to_string()),
            }
            .into());
        }

        envelope
            .data
            .ok_or_else(|| anyhow!("KIE response has no data"))
    }
}

#[async_trait]
impl VideoProvider for KieProvider {
    fn name(&self) -> &'static str {
        "kie"
    }

    async fn submit(&self, request: &VideoRequest) -> Result<String> {
        if request.prompt.trim().is_empty() {
            return Err(ReelError::invalid("video prompt cannot be empty").into());
        }

        let body = GenerateRequest {
            prompt: &request.prompt,
            model: &self.model,
            aspect_ratio: "9:16",
            image_urls: request.image_url.as_deref().into_iter().collect(),
        };

        debug!("Submitting KIE Veo task | reference image: {}", !body.image_urls.is_empty());
        let response = self
            .client
            .post(format!("{}/api/v1/veo/generate", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let data = self.read_envelope(response).await?;
        data["taskId"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("No taskId in KIE submit response"))
    }

    async fn status(&self, task_id: &str) -> Result<TaskState> {
        let response = self
            .client
            .get(format!("{}/api/v1/veo/record-info", self.base_url))
            .query(&[("taskId", task_id)])
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;

        let data = self.read_envelope(response).await?;
        parse_record(&data)
    }
}

/// Interpret a `record-info` payload: successFlag 0 running, 1 done, 2/3 failed.
pub fn parse_record(data: &Value) -> Result<TaskState> {
    let flag = data["successFlag"].as_i64().unwrap_or(0);

    match flag {
        0 => Ok(TaskState::Running {
            progress: data["progress"]
                .as_f64()
                .map(|p| (if p <= 1.0 { p * 100.0 } else { p }).clamp(0.0, 100.0) as u8),
        }),
        1 => {
            let response = &data["response"];
            let urls = if response["resultUrls"].is_array() {
                &response["resultUrls"]
            } else {
                &data["resultUrls"]
            };
            let url = match urls {
                Value::Array(items) => items.iter().find_map(|u| u.as_str()).map(String::from),
                // resultUrls is sometimes a JSON-encoded string
                Value::String(raw) => serde_json::from_str::<Vec<String>>(raw)
                    .ok()
                    .and_then(|v| v.into_iter().next()),
                _ => None,
            };
            match url {
                Some(url) => Ok(TaskState::Succeeded { url }),
                None => Ok(TaskState::Failed {
                    message: "task succeeded without a result URL".to_string(),
                }),
            }
        }
        _ => Ok(TaskState::Failed {
            message: data["errorMessage"]
                .as_str()
                .or_else(|| data["msg"].as_str())
                .unwrap_or("generation failed")
                .to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polling::PollPolicy;
    use crate::video_gen::VideoGenerator;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_record_states() {
        assert_eq!(
            parse_record(&json!({ "successFlag": 0, "progress": 0.4 })).unwrap(),
            TaskState::Running { progress: Some(40) }
        );
        assert_eq!(
            parse_record(&json!({ "successFlag": 1, "response": { "resultUrls": ["https://k/v.mp4"] } })).unwrap(),
            TaskState::Succeeded { url: "https://k/v.mp4".to_string() }
        );
        assert_eq!(
            parse_record(&json!({ "successFlag": 1, "resultUrls": "[\"https://k/w.mp4\"]" })).unwrap(),
            TaskState::Succeeded { url: "https://k/w.mp4".to_string() }
        );
        assert_eq!(
            parse_record(&json!({ "successFlag": 2, "errorMessage": "nsfw" })).unwrap(),
            TaskState::Failed { message: "nsfw".to_string() }
        );
        assert!(matches!(
            parse_record(&json!({ "successFlag": 1, "response": {} })).unwrap(),
            TaskState::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_kie_submit_and_poll() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/veo/generate"))
            .and(header("Authorization", "Bearer kie-key"))
            .and(body_partial_json(json!({
                "aspectRatio": "9:16",
                "imageUrls": ["https://reel.example.com/jobs/1/image"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200, "msg": "success", "data": { "taskId": "veo-1" }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/veo/record-info"))
            .and(query_param("taskId", "veo-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200, "msg": "success", "data": { "taskId": "veo-1", "successFlag": 0 }
            })))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/veo/record-info"))
            .and(query_param("taskId", "veo-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200, "msg": "success",
                "data": { "taskId": "veo-1", "successFlag": 1, "response": { "resultUrls": ["https://cdn.kie.ai/veo-1.mp4"] } }
            })))
            .mount(&server)
            .await;

        let provider = KieProvider::new("kie-key".to_string(), reqwest::Client::new()).with_base_url(server.uri());
        let generator = VideoGenerator::new(Arc::new(provider), PollPolicy::new(Duration::from_millis(1), 10));
        let clip = generator
            .generate(&VideoRequest {
                prompt: "slow orbit".to_string(),
                image_url: Some("https://reel.example.com/jobs/1/image".to_string()),
                image_data_url: None,
            })
            .await
            .unwrap();

        assert_eq!(clip.task_id, "veo-1");
        assert_eq!(clip.url, "https://cdn.kie.ai/veo-1.mp4");
    }

    #[tokio::test]
    async fn test_kie_envelope_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 402, "msg": "Insufficient credits"
            })))
            .mount(&server)
            .await;

        let provider = KieProvider::new("kie-key".to_string(), reqwest::Client::new()).with_base_url(server.uri());
        let err = provider
            .submit(&VideoRequest {
                prompt: "spin".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        match err.downcast_ref::<ReelError>() {
            Some(ReelError::Provider { status, message, .. }) => {
                assert_eq!(*status, 402);
                assert_eq!(message, "Insufficient credits");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
