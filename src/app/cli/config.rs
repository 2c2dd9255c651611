//! TOML configuration file loading
//!
//! ```toml
//! leading = true
//! cluster_file = "cluster.toml"
//!
//! [controller]
//! pass_period_ms = 1000
//! enable_automatic_trimming = true
//!
//! [logging]
//! level = "debug"
//! format = "ext"
//! ```

use super::args::Args;
use crate::queue::config::QueueControllerDynamicConfig;
use crate::queue::error::QueueError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_DIR_NAME: &str = "queue-agent";
pub const CONFIG_FILE_NAME: &str = "queue-agent.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("The specified configuration file does not exist: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Error reading configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error parsing configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {source}")]
    Invalid {
        #[source]
        source: QueueError,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<PathBuf>,
    pub color: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub leading: bool,
    pub cluster_file: Option<PathBuf>,
    pub controller: QueueControllerDynamicConfig,
    pub logging: LoggingConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            leading: true,
            cluster_file: None,
            controller: QueueControllerDynamicConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// `<config dir>/queue-agent/queue-agent.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

impl AgentConfig {
    pub fn from_toml_str(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config
            .controller
            .validate()
            .map_err(|source| ConfigError::Invalid { source })?;
        Ok(config)
    }

    /// Load `explicit`, which must exist, or the default file if present
    ///
    /// Returns the defaults when neither is available. Relative paths in the
    /// file are resolved against the file's directory.
    pub async fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) if !path.exists() => {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
        let mut config = Self::from_toml_str(&contents, &path)?;
        if let (Some(cluster_file), Some(base)) = (&config.cluster_file, path.parent()) {
            if cluster_file.is_relative() {
                config.cluster_file = Some(base.join(cluster_file));
            }
        }
        Ok(config)
    }

    /// Command-line values override the file
    pub fn apply_args(&mut self, args: &Args) {
        if args.follower {
            self.leading = false;
        }
        if let Some(cluster_file) = &args.cluster_file {
            self.cluster_file = Some(cluster_file.clone());
        }
        if let Some(level) = &args.log_level {
            self.logging.level = Some(level.clone());
        }
        if let Some(format) = &args.log_format {
            self.logging.format = Some(format.clone());
        }
        if let Some(file) = &args.log_file {
            self.logging.file = Some(file.clone());
        }
    }
}
