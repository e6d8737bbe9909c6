use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Label keys used to attribute containers to compose projects
    #[serde(default)]
    pub labels: LabelConfig,

    /// Also track stopped containers found by the inventory scan (default: true)
    #[serde(default = "default_include_stopped")]
    pub include_stopped: bool,

    /// Refresh interval in seconds for the query loop of the binary (default: 2)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    /// Capacity of the registry command queue (default: 256)
    #[serde(default = "default_queue_capacity")]
    pub registry_queue_capacity: usize,

    /// Capacity of the container update broadcast channel (default: 256)
    #[serde(default = "default_queue_capacity")]
    pub update_channel_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelConfig {
    /// Project working directory, its presence marks a container as tracked
    #[serde(default = "default_project_label")]
    pub project: String,

    #[serde(default = "default_project_name_label")]
    pub project_name: String,

    #[serde(default = "default_service_label")]
    pub service: String,
}

fn default_include_stopped() -> bool {
    true
}

fn default_refresh_interval() -> u64 {
    2
}

fn default_queue_capacity() -> usize {
    256
}

fn default_project_label() -> String {
    "com.docker.compose.project.working_dir".to_string()
}

fn default_project_name_label() -> String {
    "com.docker.compose.project".to_string()
}

fn default_service_label() -> String {
    "com.docker.compose.service".to_string()
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            project: default_project_label(),
            project_name: default_project_name_label(),
            service: default_service_label(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            labels: LabelConfig::default(),
            include_stopped: default_include_stopped(),
            refresh_interval: default_refresh_interval(),
            registry_queue_capacity: default_queue_capacity(),
            update_channel_capacity: default_queue_capacity(),
        }
    }
}

impl Config {
    /// Load configuration from file, or use defaults if no file exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(|p| p.to_path_buf()).or_else(|| {
            let default_path = dirs::config_dir()?.join("c8s/config.toml");
            default_path.exists().then_some(default_path)
        });

        let Some(path) = config_path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str::<Config>(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
            .inspect(|config| trace!("loaded config: {config:?}"))
    }
}
