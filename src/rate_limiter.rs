//! # Feature: Rate Limiting
//!
//! Caps how many generation jobs a client may start per window. Sliding window
//! per client key, kept in a DashMap so handlers can share one limiter.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Report how long until the next slot opens
//! - 1.0.0: Initial release with per-client sliding window rate limiting

use dashmap::DashMap;
use log::debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct RateLimiter {
    requests: Arc<DashMap<String, Vec<Instant>>>,
    max_requests: usize,
    time_window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, time_window: Duration) -> Self {
        RateLimiter {
            requests: Arc::new(DashMap::new()),
            max_requests,
            time_window,
        }
    }

    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    /// Record a request for `client`, or return how long until one is allowed.
    pub fn check(&self, client: &str) -> Result<(), Duration> {
        if self.max_requests == 0 {
            return Ok(());
        }

        let now = Instant::now();
        let mut entry = self.requests.entry(client.to_string()).or_default();
        entry.retain(|&time| now.duration_since(time) < self.time_window);

        if entry.len() < self.max_requests {
            entry.push(now);
            return Ok(());
        }

        let oldest = entry.first().copied().unwrap_or(now);
        Err(self.time_window.saturating_sub(now.duration_since(oldest)))
    }

    /// Drop clients whose whole history has aged out of the window.
    pub fn prune(&self) {
        let now = Instant::now();
        self.requests
            .retain(|_, times| times.iter().any(|&t| now.duration_since(t) < self.time_window));
    }

    pub fn tracked_clients(&self) -> usize {
        self.requests.len()
    }

    pub fn time_window(&self) -> Duration {
        self.time_window
    }

    /// Prune once per window for as long as the task runs. Client keys come
    /// from request headers, so without this the map only grows.
    pub fn spawn_pruner(&self) -> JoinHandle<()> {
        let limiter = self.clone();
        let period = self.time_window.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let before = limiter.tracked_clients();
                limiter.prune();
                let after = limiter.tracked_clients();
                if after < before {
                    debug!("Rate limiter pruned {} idle client(s)", before - after);
                }
            }
        })
    }
}
