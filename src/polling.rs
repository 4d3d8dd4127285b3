//! # Feature: Task Polling
//!
//! Long-polling loop for third-party task APIs: call the status endpoint, sleep,
//! repeat until the task is terminal or the attempt budget is spent.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false

use anyhow::Result;
use log::{debug, warn};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        PollPolicy {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy::new(Duration::from_secs(5), 60)
    }
}

/// State reported by a single status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Running { progress: Option<u8> },
    Succeeded { url: String },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Succeeded(String),
    Failed(String),
    TimedOut { attempts: u32 },
}

impl PollOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Succeeded(_))
    }
}

/// Poll `check` until it reports a terminal state.
///
/// The first check happens immediately. A check that returns `Err` is logged and
/// spends an attempt; it never aborts the loop on its own.
pub async fn poll_until_terminal<F, Fut>(label: &str, policy: PollPolicy, mut check: F) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<TaskState>>,
{
    for attempt in 1..=policy.max_attempts {
        match check().await {
            Ok(TaskState::Succeeded { url }) => {
                debug!("{} succeeded after {} check(s)", label, attempt);
                return PollOutcome::Succeeded(url);
            }
            Ok(TaskState::Failed { message }) => {
                warn!("{} failed after {} check(s): {}", label, attempt, message);
                return PollOutcome::Failed(message);
            }
            Ok(TaskState::Running { progress }) => {
                debug!(
                    "{} still running | attempt {}/{} | progress {:?}",
                    label, attempt, policy.max_attempts, progress
                );
            }
            Err(e) => {
                warn!("{} status check {} errored: {}", label, attempt, e);
            }
        }

        if attempt < policy.max_attempts {
            sleep(policy.interval).await;
        }
    }

    warn!("{} timed out after {} check(s)", label, policy.max_attempts);
    PollOutcome::TimedOut {
        attempts: policy.max_attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> PollPolicy {
        PollPolicy::new(Duration::from_millis(1), max_attempts)
    }

    #[tokio::test]
    async fn test_poll_succeeds_after_running() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let outcome = poll_until_terminal("test", fast(10), || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Ok(TaskState::Running { progress: Some(50) })
                } else {
                    Ok(TaskState::Succeeded {
                        url: "https://cdn.example.com/clip.mp4".to_string(),
                    })
                }
            }
        })
        .await;

        assert_eq!(outcome, PollOutcome::Succeeded("https://cdn.example.com/clip.mp4".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_reports_failure() {
        let outcome = poll_until_terminal("test", fast(5), || async {
            Ok(TaskState::Failed {
                message: "content policy".to_string(),
            })
        })
        .await;
        assert_eq!(outcome, PollOutcome::Failed("content policy".to_string()));
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_poll_times_out_after_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let outcome = poll_until_terminal("test", fast(4), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(TaskState::Running { progress: None }) }
        })
        .await;

        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 4 });
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_poll_survives_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let outcome = poll_until_terminal("test", fast(5), || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(anyhow::anyhow!("connection reset"))
                } else {
                    Ok(TaskState::Succeeded { url: "u".to_string() })
                }
            }
        })
        .await;

        assert!(outcome.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_policy_has_at_least_one_attempt() {
        assert_eq!(PollPolicy::new(Duration::ZERO, 0).max_attempts, 1);
    }
}
