//! # Feature Registry
//!
//! Central registry for pipeline capabilities with version tracking. Whether a
//! toggleable capability is on depends on which providers are configured.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.2.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Enabled state derived from configuration
//! - 1.0.0: Initial feature registry implementation

use serde::Serialize;

use crate::config::Config;

/// Describes a versioned pipeline capability
#[derive(Debug, Clone, Serialize)]
pub struct Feature {
    /// Feature identifier (snake_case)
    pub id: &'static str,
    /// Human-readable name
    pub name: &'static str,
    /// Current semantic version
    pub version: &'static str,
    /// Release in which the feature was added
    pub since: &'static str,
    /// Depends on optional configuration
    pub toggleable: bool,
    /// Brief description
    pub description: &'static str,
}

/// All registered features
pub const FEATURES: &[Feature] = &[
    Feature {
        id: "product_analysis",
        name: "Product Analysis",
        version: "1.1.0",
        since: "0.1.0",
        toggleable: false,
        description: "Vision analysis of the uploaded photo with category and style suggestions",
    },
    Feature {
        id: "style_catalog",
        name: "Style Catalog",
        version: "1.0.0",
        since: "0.1.0",
        toggleable: false,
        description: "Category styles and prompt templates, overridable from the database",
    },
    Feature {
        id: "image_generation",
        name: "Image Generation",
        version: "2.0.0",
        since: "0.2.0",
        toggleable: false,
        description: "Restyled product stills via the OpenAI image edit API",
    },
    Feature {
        id: "video_kie",
        name: "Video Generation (KIE.ai Veo)",
        version: "1.0.0",
        since: "0.2.0",
        toggleable: true,
        description: "Vertical clips from prompts and an optional reference still",
    },
    Feature {
        id: "video_runway",
        name: "Video Generation (Runway)",
        version: "1.0.0",
        since: "0.2.0",
        toggleable: true,
        description: "Image-to-video clips from the generated still",
    },
    Feature {
        id: "video_combine",
        name: "Video Combining",
        version: "1.1.0",
        since: "0.3.0",
        toggleable: true,
        description: "Merges clips into one video, or falls back to a playlist",
    },
    Feature {
        id: "access_gate",
        name: "Access Gate",
        version: "1.0.0",
        since: "0.3.0",
        toggleable: true,
        description: "Only users with granted access may start jobs",
    },
    Feature {
        id: "rate_limiting",
        name: "Rate Limiting",
        version: "1.1.0",
        since: "0.1.0",
        toggleable: false,
        description: "Caps job creation per client per minute",
    },
];

#[derive(Debug, Clone, Serialize)]
pub struct FeatureStatus {
    #[serde(flatten)]
    pub feature: &'static Feature,
    pub enabled: bool,
}

/// Get all registered features
pub fn get_features() -> &'static [Feature] {
    FEATURES
}

/// Get a feature by ID
pub fn get_feature(id: &str) -> Option<&'static Feature> {
    FEATURES.iter().find(|f| f.id == id)
}

pub fn is_enabled(feature: &Feature, config: &Config) -> bool {
    match feature.id {
        "video_kie" => config.kie_api_key.is_some(),
        "video_runway" => config.runway_api_key.is_some(),
        // Without a service the playlist fallback still applies
        "video_combine" => config.combine_service_url.is_some(),
        "access_gate" => config.require_access,
        _ => true,
    }
}

pub fn feature_status(config: &Config) -> Vec<FeatureStatus> {
    FEATURES
        .iter()
        .map(|feature| FeatureStatus {
            feature,
            enabled: is_enabled(feature, config),
        })
        .collect()
}

/// Get service version from Cargo.toml
pub fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &'static [(&'static str, &'static str)]) -> Config {
        Config::from_lookup(|key| {
            if key == "OPENAI_API_KEY" {
                return Some("sk".to_string());
            }
            pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
        })
        .unwrap()
    }

    #[test]
    fn test_get_feature_by_id() {
        assert_eq!(get_feature("video_runway").unwrap().name, "Video Generation (Runway)");
        assert!(get_feature("nonexistent").is_none());
    }

    #[test]
    fn test_feature_ids_unique() {
        let mut ids: Vec<_> = get_features().iter().map(|f| f.id).collect();
        let original_len = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), original_len, "Feature IDs should be unique");
    }

    #[test]
    fn test_enabled_follows_config() {
        let bare = feature_status(&config(&[]));
        let enabled = |statuses: &[FeatureStatus], id: &str| {
            statuses.iter().find(|s| s.feature.id == id).unwrap().enabled
        };
        assert!(enabled(&bare, "image_generation"));
        assert!(!enabled(&bare, "video_kie"));
        assert!(!enabled(&bare, "access_gate"));

        let full = feature_status(&config(&[("KIE_API_KEY", "k"), ("REQUIRE_ACCESS", "true")]));
        assert!(enabled(&full, "video_kie"));
        assert!(enabled(&full, "access_gate"));
        assert!(!enabled(&full, "video_runway"));
    }

    #[test]
    fn test_non_toggleable_always_enabled() {
        let statuses = feature_status(&config(&[]));
        for status in statuses.iter().filter(|s| !s.feature.toggleable) {
            assert!(status.enabled, "{} should be enabled", status.feature.id);
        }
    }
}
