//! Configuration management for Beaver

pub mod schema;

pub use schema::{BuildConfig, Config, GeneralConfig, DEFAULT_MANIFEST};

use crate::error::{BeaverError, BeaverResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Name of the project-local configuration file
pub const LOCAL_CONFIG_NAME: &str = ".beaver.toml";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("beaver")
            .join("config.toml")
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> BeaverResult<Config> {
        self.load_merged(None).await
    }

    /// Load the global configuration with a local file merged on top
    ///
    /// Tables are merged key by key; any other local value replaces the
    /// global one.
    pub async fn load_merged(&self, local: Option<&Path>) -> BeaverResult<Config> {
        let mut merged = if self.config_path.exists() {
            read_value(&self.config_path).await?
        } else {
            debug!("Config file not found, using defaults");
            toml::Value::Table(toml::map::Map::new())
        };

        let mut source = self.config_path.clone();
        if let Some(local) = local {
            let overlay = read_value(local).await?;
            merge_values(&mut merged, overlay);
            source = local.to_path_buf();
        }

        merged.try_into().map_err(|e: toml::de::Error| BeaverError::ConfigInvalid {
            path: source,
            reason: e.to_string(),
        })
    }

    /// Find the nearest `.beaver.toml` in `start` or one of its ancestors
    pub fn find_local_config(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(LOCAL_CONFIG_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> BeaverResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            BeaverError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> BeaverResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BeaverError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_value(path: &Path) -> BeaverResult<toml::Value> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| BeaverError::io(format!("reading config from {}", path.display()), e))?;

    content
        .parse::<toml::Table>()
        .map(toml::Value::Table)
        .map_err(|e| BeaverError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Deep-merge `overlay` into `base`
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
