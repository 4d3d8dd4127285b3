use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::polling::PollPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub openai_api_key: String,
    pub openai_vision_model: String,
    pub openai_image_model: String,
    pub kie_api_key: Option<String>,
    pub runway_api_key: Option<String>,
    pub analyze_function_url: Option<String>,
    pub analyze_function_key: Option<String>,
    pub combine_service_url: Option<String>,
    pub public_base_url: Option<String>,
    pub database_path: String,
    pub output_dir: String,
    pub log_level: String,
    pub http_port: u16,
    pub poll_interval_secs: u64,
    pub poll_max_attempts: u32,
    pub max_upload_bytes: usize,
    pub require_access: bool,
    pub rate_limit_per_minute: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Config {
            openai_api_key: get("OPENAI_API_KEY")
                .ok_or_else(|| anyhow!("OPENAI_API_KEY environment variable not set"))?,
            openai_vision_model: get("OPENAI_VISION_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
            openai_image_model: get("OPENAI_IMAGE_MODEL").unwrap_or_else(|| "gpt-image-1".to_string()),
            kie_api_key: get("KIE_API_KEY"),
            runway_api_key: get("RUNWAY_API_KEY"),
            analyze_function_url: get("ANALYZE_FUNCTION_URL"),
            analyze_function_key: get("ANALYZE_FUNCTION_KEY"),
            combine_service_url: get("COMBINE_SERVICE_URL"),
            public_base_url: get("PUBLIC_BASE_URL").map(|url| url.trim_end_matches('/').to_string()),
            database_path: get("DATABASE_PATH").unwrap_or_else(|| "productreel.db".to_string()),
            output_dir: get("OUTPUT_DIR").unwrap_or_else(|| "output".to_string()),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            http_port: parse_or(&get, "HTTP_PORT", 8080)?,
            poll_interval_secs: parse_or(&get, "POLL_INTERVAL_SECS", 5)?,
            poll_max_attempts: parse_or(&get, "POLL_MAX_ATTEMPTS", 60)?,
            max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
            require_access: parse_bool(&get, "REQUIRE_ACCESS", false)?,
            rate_limit_per_minute: parse_or(&get, "RATE_LIMIT_PER_MINUTE", 5)?,
        })
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_secs(self.poll_interval_secs),
            self.poll_max_attempts,
        )
    }
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> Result<T>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("Invalid value for {}: '{}' ({})", key, raw, e)),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.trim().to_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(anyhow!("Invalid value for {}: '{}' (expected true/false)", key, v)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_missing_openai_key() {
        let result = Config::from_lookup(lookup(&[]));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_config_with_defaults() {
        let config = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.openai_api_key, "sk-test");
        assert_eq!(config.database_path, "productreel.db");
        assert_eq!(config.output_dir, "output");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.poll_max_attempts, 60);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert!(!config.require_access);
        assert!(config.kie_api_key.is_none());
        assert!(config.combine_service_url.is_none());
    }

    #[test]
    fn test_config_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("KIE_API_KEY", "kie"),
            ("PUBLIC_BASE_URL", "https://reel.example.com/"),
            ("HTTP_PORT", "9000"),
            ("REQUIRE_ACCESS", "yes"),
            ("COMBINE_SERVICE_URL", "  "),
        ]))
        .unwrap();
        assert_eq!(config.kie_api_key.as_deref(), Some("kie"));
        assert_eq!(config.public_base_url.as_deref(), Some("https://reel.example.com"));
        assert_eq!(config.http_port, 9000);
        assert!(config.require_access);
        assert!(config.combine_service_url.is_none());
    }

    #[test]
    fn test_config_rejects_bad_numbers() {
        let result = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("POLL_MAX_ATTEMPTS", "lots"),
        ]));
        assert!(result.unwrap_err().to_string().contains("POLL_MAX_ATTEMPTS"));

        let result = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("REQUIRE_ACCESS", "maybe"),
        ]));
        assert!(result.is_err());
    }
}
