//! Settings type definitions
//!
//! Six named sections stored as JSON blobs in the settings table. Every
//! struct is `#[serde(default)]` so stored values merge over defaults
//! field by field.

use crate::infrastructure::transcode::StreamTimeouts;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The full settings bundle. Reads merge per section over defaults;
/// writes upsert all six sections atomically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsBundle {
    pub global: GlobalSettings,
    pub grok: GrokSettings,
    pub token: TokenSettings,
    pub cache: CacheSettings,
    pub performance: PerformanceSettings,
    pub register: RegisterSettings,
}

/// Gateway-wide behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    /// Public base URL for proxied asset links; empty means "use the
    /// request origin".
    pub base_url: String,
    /// Surface chain-of-thought wrapped in `<think>` markers.
    pub show_thinking: bool,
    /// Tag names suppressed by the stream filter.
    pub filter_tags: Vec<String>,
    /// Render generated videos as a clickable poster block instead of a
    /// bare player.
    pub video_poster_preview: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            show_thinking: true,
            filter_tags: vec![
                "xaiartifact".to_string(),
                "xai:tool_usage_card".to_string(),
            ],
            video_poster_preview: false,
        }
    }
}

/// Upstream connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrokSettings {
    pub base_url: String,
    /// Stored without the `cf_clearance=` prefix; exposed re-prefixed.
    pub cf_clearance: String,
    /// Normalized through an alias map; see [`normalize_image_generation_method`].
    pub image_generation_method: String,
    pub proxy_url: String,
    pub user_agent: String,
    pub models: Vec<String>,
}

impl Default for GrokSettings {
    fn default() -> Self {
        Self {
            base_url: "https://grok.com".to_string(),
            cf_clearance: String::new(),
            image_generation_method: "legacy".to_string(),
            proxy_url: String::new(),
            user_agent: "GrokGate/1.0".to_string(),
            models: vec![
                "grok-3".to_string(),
                "grok-3-thinking".to_string(),
                "grok-4".to_string(),
                "grok-4-heavy".to_string(),
                "grok-4-imagine".to_string(),
            ],
        }
    }
}

/// Token pool tier. Super-tier models may only draw from the super pool;
/// basic-tier models fall back from basic to super.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenTier {
    Super,
    Basic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenEntry {
    pub key_name: String,
    pub token: String,
    pub tier: TokenTier,
}

impl Default for TokenEntry {
    fn default() -> Self {
        Self {
            key_name: String::new(),
            token: String::new(),
            tier: TokenTier::Basic,
        }
    }
}

/// Token pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenSettings {
    pub tokens: Vec<TokenEntry>,
    /// Models restricted to the super pool.
    pub super_models: Vec<String>,
    pub auto_refresh: bool,
    pub refresh_interval_minutes: u64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            super_models: vec!["grok-4-heavy".to_string()],
            auto_refresh: false,
            refresh_interval_minutes: 60,
        }
    }
}

/// Asset cache knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub asset_ttl_seconds: u64,
    pub max_entries: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            asset_ttl_seconds: 86400,
            max_entries: 1024,
        }
    }
}

/// Stream timeout budgets and batch concurrency. Budgets are integer
/// seconds; zero disables a budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    pub first_response_timeout_secs: u64,
    pub chunk_timeout_secs: u64,
    pub total_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub video_idle_timeout_secs: u64,
    pub batch_concurrency: usize,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            first_response_timeout_secs: 30,
            chunk_timeout_secs: 120,
            total_timeout_secs: 600,
            idle_timeout_secs: 60,
            video_idle_timeout_secs: 300,
            batch_concurrency: 5,
        }
    }
}

impl PerformanceSettings {
    pub fn stream_timeouts(&self) -> StreamTimeouts {
        StreamTimeouts {
            first_response: Duration::from_secs(self.first_response_timeout_secs),
            chunk: Duration::from_secs(self.chunk_timeout_secs),
            total: Duration::from_secs(self.total_timeout_secs),
            idle: Duration::from_secs(self.idle_timeout_secs),
            video_idle: Duration::from_secs(self.video_idle_timeout_secs),
        }
    }
}

/// Account registration knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterSettings {
    pub enabled: bool,
    pub email_domain: String,
    pub max_per_day: u32,
}

impl Default for RegisterSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            email_domain: String::new(),
            max_per_day: 10,
        }
    }
}

/// Canonical image generation methods.
pub const IMAGE_METHOD_LEGACY: &str = "legacy";
pub const IMAGE_METHOD_IMAGINE_WS: &str = "imagine_ws_experimental";

/// Case-insensitive alias map onto the closed method set. Unknown values
/// fall back to `legacy`.
pub fn normalize_image_generation_method(raw: &str) -> &'static str {
    match raw.trim().to_lowercase().as_str() {
        "imagine" | "imagine_ws" | "imagine-ws" | "ws" | "experimental"
        | "imagine_ws_experimental" => IMAGE_METHOD_IMAGINE_WS,
        // "legacy", "default", "old", "rest" and anything unrecognized
        _ => IMAGE_METHOD_LEGACY,
    }
}

/// Strip the cookie prefix for storage.
pub fn strip_cf_clearance(raw: &str) -> String {
    raw.trim()
        .strip_prefix("cf_clearance=")
        .unwrap_or(raw.trim())
        .to_string()
}

/// Re-prefix the stored value for use in a Cookie header.
pub fn prefix_cf_clearance(stored: &str) -> String {
    if stored.is_empty() {
        String::new()
    } else {
        format!("cf_clearance={}", stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_merge_over_defaults() {
        // Missing fields take their default values
        let parsed: PerformanceSettings =
            serde_json::from_str(r#"{"idle_timeout_secs": 5}"#).unwrap();
        assert_eq!(parsed.idle_timeout_secs, 5);
        assert_eq!(parsed.chunk_timeout_secs, 120);
    }

    #[test]
    fn test_image_method_aliases() {
        assert_eq!(normalize_image_generation_method("Legacy"), "legacy");
        assert_eq!(normalize_image_generation_method("default"), "legacy");
        assert_eq!(normalize_image_generation_method("unknown-thing"), "legacy");
        assert_eq!(
            normalize_image_generation_method("IMAGINE_WS"),
            "imagine_ws_experimental"
        );
        assert_eq!(
            normalize_image_generation_method("imagine_ws_experimental"),
            "imagine_ws_experimental"
        );
        assert_eq!(
            normalize_image_generation_method("ws"),
            "imagine_ws_experimental"
        );
    }

    #[test]
    fn test_cf_clearance_prefix_round_trip() {
        assert_eq!(strip_cf_clearance("cf_clearance=abc123"), "abc123");
        assert_eq!(strip_cf_clearance("abc123"), "abc123");
        assert_eq!(prefix_cf_clearance("abc123"), "cf_clearance=abc123");
        assert_eq!(prefix_cf_clearance(""), "");
        // save(get()) is stable
        let exposed = prefix_cf_clearance("abc123");
        assert_eq!(strip_cf_clearance(&exposed), "abc123");
    }

    #[test]
    fn test_stream_timeouts_conversion() {
        let perf = PerformanceSettings::default();
        let timeouts = perf.stream_timeouts();
        assert_eq!(timeouts.idle, Duration::from_secs(60));
        assert_eq!(timeouts.video_idle, Duration::from_secs(300));
    }
}
