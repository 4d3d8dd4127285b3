//! # Feature: Video Combining
//!
//! Stitches generated clips into one video through an external combining
//! service. When the service is missing or unavailable the clips are returned as
//! a sequential playlist that the client plays back in order.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.3.0
//! - **Toggleable**: true
//!
//! ## Changelog
//! - 1.1.0: Job-based combining with status polling
//! - 1.0.0: Synchronous combining with playlist fallback

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{provider_message, ReelError};
use crate::polling::{poll_until_terminal, PollOutcome, PollPolicy, TaskState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CombinedVideo {
    /// A single playable file
    Merged { url: String },
    /// Clips to play back to back
    Playlist { urls: Vec<String> },
}

impl CombinedVideo {
    pub fn primary_url(&self) -> Option<&str> {
        match self {
            CombinedVideo::Merged { url } => Some(url),
            CombinedVideo::Playlist { urls } => urls.first().map(String::as_str),
        }
    }
}

#[derive(Clone)]
pub struct VideoCombiner {
    service_url: Option<String>,
    policy: PollPolicy,
    client: reqwest::Client,
}

/// Why the remote combine did not produce a file; unavailable means "use the playlist".
enum CombineAttempt {
    Done(String),
    Unavailable(String),
}

impl VideoCombiner {
    pub fn new(service_url: Option<String>, policy: PollPolicy, client: reqwest::Client) -> Self {
        VideoCombiner {
            service_url: service_url.map(|u| u.trim_end_matches('/').to_string()),
            policy,
            client,
        }
    }

    pub async fn combine(&self, urls: &[String]) -> Result<CombinedVideo> {
        match urls {
            [] => Err(ReelError::invalid("no videos to combine").into()),
            [only] => Ok(CombinedVideo::Merged { url: only.clone() }),
            _ => {
                let Some(service_url) = &self.service_url else {
                    info!("No combine service configured, returning {} clip playlist", urls.len());
                    return Ok(CombinedVideo::Playlist { urls: urls.to_vec() });
                };

                match self.combine_remote(service_url, urls).await? {
                    CombineAttempt::Done(url) => {
                        info!("Combined {} clips | {}", urls.len(), url);
                        Ok(CombinedVideo::Merged { url })
                    }
                    CombineAttempt::Unavailable(reason) => {
                        warn!("Combine service unavailable ({}), falling back to playlist", reason);
                        Ok(CombinedVideo::Playlist { urls: urls.to_vec() })
                    }
                }
            }
        }
    }

    async fn combine_remote(&self, service_url: &str, urls: &[String]) -> Result<CombineAttempt> {
        debug!("Posting {} clips to combine service", urls.len());
        let response = match self
            .client
            .post(service_url)
            .json(&json!({ "videoUrls": urls }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Ok(CombineAttempt::Unavailable(e.to_string())),
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.as_u16() == 404 || status.is_server_error() {
            return Ok(CombineAttempt::Unavailable(format!("status {}", status)));
        }
        if !status.is_success() {
            return Err(ReelError::Provider {
                provider: "combine",
                status: status.as_u16(),
                message: provider_message(&body),
            }
            .into());
        }

        let json: Value = serde_json::from_str(&body)
            .map_err(|e| anyhow!("Failed to parse combine response: {}", e))?;

        if let Some(url) = combined_url(&json) {
            return Ok(CombineAttempt::Done(url));
        }

        let job_id = json["jobId"]
            .as_str()
            .or_else(|| json["id"].as_str())
            .ok_or_else(|| anyhow!("Combine response has neither a URL nor a job id"))?
            .to_string();

        let status_url = format!("{}/status/{}", service_url, job_id);
        let outcome = poll_until_terminal(&format!("combine job {}", job_id), self.policy, || {
            self.job_status(&status_url)
        })
        .await;

        Ok(match outcome {
            PollOutcome::Succeeded(url) => CombineAttempt::Done(url),
            PollOutcome::Failed(message) => CombineAttempt::Unavailable(message),
            PollOutcome::TimedOut { attempts } => {
                CombineAttempt::Unavailable(format!("timed out after {} checks", attempts))
            }
        })
    }

    async fn job_status(&self, status_url: &str) -> Result<TaskState> {
        let response = self.client.get(status_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("combine status check returned {}", status));
        }
        let json: Value = response.json().await?;

        Ok(match json["status"].as_str().unwrap_or("processing") {
            "completed" | "done" | "success" | "succeeded" => match combined_url(&json) {
                Some(url) => TaskState::Succeeded { url },
                None => TaskState::Failed {
                    message: "combine finished without a URL".to_string(),
                },
            },
            "failed" | "error" => TaskState::Failed {
                message: json["error"].as_str().unwrap_or("combine failed").to_string(),
            },
            _ => TaskState::Running {
                progress: json["progress"].as_u64().map(|p| p.min(100) as u8),
            },
        })
    }
}

fn combined_url(json: &Value) -> Option<String> {
    ["url", "videoUrl", "combinedUrl", "outputUrl"]
        .iter()
        .find_map(|key| json[*key].as_str())
        .filter(|u| !u.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn clips() -> Vec<String> {
        vec![
            "https://cdn.example.com/a.mp4".to_string(),
            "https://cdn.example.com/b.mp4".to_string(),
        ]
    }

    fn combiner(url: Option<String>) -> VideoCombiner {
        VideoCombiner::new(url, PollPolicy::new(Duration::from_millis(1), 5), reqwest::Client::new())
    }

    #[tokio::test]
    async fn test_combine_edge_counts() {
        let combiner = combiner(None);
        assert!(combiner.combine(&[]).await.is_err());

        let single = combiner.combine(&clips()[..1]).await.unwrap();
        assert_eq!(single, CombinedVideo::Merged { url: clips()[0].clone() });

        let playlist = combiner.combine(&clips()).await.unwrap();
        assert_eq!(playlist, CombinedVideo::Playlist { urls: clips() });
        assert_eq!(playlist.primary_url(), Some("https://cdn.example.com/a.mp4"));
    }

    #[tokio::test]
    async fn test_combine_direct_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/combine"))
            .and(body_json(json!({ "videoUrls": clips() })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "videoUrl": "https://cdn.example.com/final.mp4" })))
            .mount(&server)
            .await;

        let result = combiner(Some(format!("{}/combine/", server.uri())))
            .combine(&clips())
            .await
            .unwrap();
        assert_eq!(result, CombinedVideo::Merged { url: "https://cdn.example.com/final.mp4".to_string() });
    }

    #[tokio::test]
    async fn test_combine_polls_job() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/combine"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "jobId": "j1" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/combine/status/j1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "processing", "progress": 30 })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/combine/status/j1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "completed", "url": "https://cdn.example.com/j1.mp4" })))
            .mount(&server)
            .await;

        let result = combiner(Some(format!("{}/combine", server.uri())))
            .combine(&clips())
            .await
            .unwrap();
        assert_eq!(result.primary_url(), Some("https://cdn.example.com/j1.mp4"));
    }

    #[tokio::test]
    async fn test_combine_falls_back_when_service_down() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = combiner(Some(server.uri())).combine(&clips()).await.unwrap();
        assert_eq!(result, CombinedVideo::Playlist { urls: clips() });

        // Nothing listens on port 9 of localhost
        let result = combiner(Some("http://127.0.0.1:9/combine".to_string()))
            .combine(&clips())
            .await
            .unwrap();
        assert!(matches!(result, CombinedVideo::Playlist { .. }));
    }

    #[tokio::test]
    async fn test_combine_client_error_is_hard_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({ "error": "unsupported codec" })))
            .mount(&server)
            .await;

        let err = combiner(Some(server.uri())).combine(&clips()).await.unwrap_err();
        assert!(err.to_string().contains("unsupported codec"));
    }

    #[tokio::test]
    async fn test_combine_falls_back_on_missing_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = combiner(Some(server.uri())).combine(&clips()).await.unwrap();
        assert_eq!(result, CombinedVideo::Playlist { urls: clips() });
    }

    #[tokio::test]
    async fn test_combine_falls_back_when_job_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/combine"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "jobId": "j2" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/combine/status/j2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "failed", "error": "ffmpeg crashed" })))
            .mount(&server)
            .await;

        let result = combiner(Some(format!("{}/combine", server.uri())))
            .combine(&clips())
            .await
            .unwrap();
        assert_eq!(result, CombinedVideo::Playlist { urls: clips() });
    }

    #[tokio::test]
    async fn test_combine_falls_back_when_job_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/combine"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "jobId": "j3" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/combine/status/j3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "processing" })))
            .expect(1)
            .mount(&server)
            .await;

        let combiner = VideoCombiner::new(
            Some(format!("{}/combine", server.uri())),
            PollPolicy::new(Duration::from_millis(1), 1),
            reqwest::Client::new(),
        );
        let result = combiner.combine(&clips()).await.unwrap();
        assert_eq!(result, CombinedVideo::Playlist { urls: clips() });
    }
}
