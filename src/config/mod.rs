//! Configuration module for Facemask
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation. Everything the pipeline
//! needs (storage root, size limit, allow-list, classifier models) lives
//! here and is handed to the pipeline at construction.

use crate::format::ImageKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("UPLOAD_ROOT", "/srv/uploads");
/// assert_eq!(expand_env_vars("${UPLOAD_ROOT}"), "/srv/uploads");
/// assert_eq!(expand_env_vars("${MISSING:-uploads}"), "uploads");
/// ```
fn expand_env_vars(s: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}") else {
        return s.to_string();
    };
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);
    result
}

fn deserialize_path_with_env<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(PathBuf::from(expand_env_vars(&s)))
}

fn deserialize_paths_with_env<'de, D>(deserializer: D) -> Result<Vec<PathBuf>, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    Ok(raw
        .iter()
        .map(|s| PathBuf::from(expand_env_vars(s)))
        .collect())
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub anonymizer: AnonymizerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Server address cannot be empty".into(),
            ));
        }

        if self.storage.root.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "Storage root cannot be empty".into(),
            ));
        }

        if self.anonymizer.classifiers.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one classifier model must be configured".into(),
            ));
        }

        if self.upload.max_size == 0 {
            return Err(ConfigError::ValidationError(
                "upload.max_size must be greater than zero".into(),
            ));
        }

        if self.upload.allowed_types.is_empty() {
            return Err(ConfigError::ValidationError(
                "upload.allowed_types cannot be empty".into(),
            ));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
}

/// Where anonymized images are kept until their single download
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(
        default = "default_storage_root",
        deserialize_with = "deserialize_path_with_env"
    )]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("uploads")
}

/// Classifier models run over every upload, in order.
///
/// Each entry is an OpenCV Haar cascade XML file. Later models see the
/// output of earlier ones, so regions blurred by the frontal pass are
/// already blurred when the profile pass runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymizerConfig {
    #[serde(
        default = "default_classifiers",
        deserialize_with = "deserialize_paths_with_env"
    )]
    pub classifiers: Vec<PathBuf>,
}

impl Default for AnonymizerConfig {
    fn default() -> Self {
        Self {
            classifiers: default_classifiers(),
        }
    }
}

fn default_classifiers() -> Vec<PathBuf> {
    vec![
        PathBuf::from("xml/haarcascade_frontalface_default.xml"),
        PathBuf::from("xml/haarcascade_profileface.xml"),
    ]
}

/// Upload acceptance rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<ImageKind>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            allowed_types: default_allowed_types(),
        }
    }
}

fn default_max_size() -> usize {
    15 * 1024 * 1024 // 15MiB
}

fn default_allowed_types() -> Vec<ImageKind> {
    ImageKind::ALL.to_vec()
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}
