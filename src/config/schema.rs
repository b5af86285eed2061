//! Configuration schema for Beaver
//!
//! Global configuration lives at `~/.config/beaver/config.toml`; a project
//! may override any key in a `.beaver.toml` next to (or above) its build root.

use crate::store::DEFAULT_DIGEST_FILE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default build manifest name relative to the build root
pub const DEFAULT_MANIFEST: &str = "beaver.toml";

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Build defaults
    pub build: BuildConfig,

    /// Environment variables for command transformations
    pub env: BTreeMap<String, String>,
}

/// General application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Append build events to `.beaver/events.jsonl` in the build root
    pub event_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            event_log: false,
        }
    }
}

/// Build defaults, overridable per invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Maximum parallel transformations (default: CPU count)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    /// Staleness store file, relative to the build root
    pub digest_file: String,

    /// Build manifest file, relative to the build root
    pub manifest: String,

    /// Stop scheduling new work after the first failure
    pub fail_fast: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            digest_file: DEFAULT_DIGEST_FILE.to_string(),
            manifest: DEFAULT_MANIFEST.to_string(),
            fail_fast: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.general.log_format, "text");
        assert!(!config.general.event_log);
        assert_eq!(config.build.digest_file, ".beaverdigests");
        assert_eq!(config.build.manifest, "beaver.toml");
        assert!(config.build.concurrency.is_none());
        assert!(config.env.is_empty());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
[build]
concurrency = 4

[env]
LANG = "C"
"#,
        )
        .unwrap();
        assert_eq!(config.build.concurrency, Some(4));
        assert_eq!(config.build.manifest, "beaver.toml");
        assert_eq!(config.env.get("LANG").map(String::as_str), Some("C"));
    }

    #[test]
    fn serialize_roundtrip() {
        let mut config = Config::default();
        config.build.fail_fast = true;
        config.env.insert("KEY".into(), "value".into());

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
