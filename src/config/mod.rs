pub mod settings;

pub use settings::{PollOverrides, PollSettings, ReconcileConfig, DEFAULT_RETRY_DELAY_MS};

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::kinds::ResourceKind;

/// Environment variable naming an alternative config file
pub const CONFIG_ENV_VAR: &str = "RECONCILE_CONFIG";

/// Default config file location: ~/.reconcile/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".reconcile")
        .join("config.yaml")
}

/// Errors loading the config file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Unsupported config format: {0} (expected .yaml, .yml or .json)")]
    UnsupportedFormat(PathBuf),

    #[error("Unknown resource kind '{0}' in config overrides")]
    UnknownKind(String),
}

/// On-disk encodings the loader understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("json") => Ok(ConfigFormat::Json),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Parse and validate config text
pub fn parse_config(content: &str, format: ConfigFormat) -> Result<ReconcileConfig, ConfigError> {
    let config: ReconcileConfig = match format {
        ConfigFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?
        }
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?
        }
    };

    if let Some(unknown) = config
        .kinds
        .keys()
        .find(|name| name.parse::<ResourceKind>().is_err())
    {
        return Err(ConfigError::UnknownKind(unknown.clone()));
    }

    Ok(config)
}

impl ReconcileConfig {
    /// Effective settings for `kind`: defaults with that kind's overrides applied
    pub fn settings_for(&self, kind: ResourceKind) -> PollSettings {
        match self.kinds.get(kind.as_str()) {
            Some(overrides) => self.defaults.merged(overrides),
            None => self.defaults.clone(),
        }
    }
}

// ============================================================================
// I/O boundary functions
// ============================================================================

/// Load config from a specific path; the file must exist
pub fn load_config_file(path: &Path) -> Result<ReconcileConfig, ConfigError> {
    let format = ConfigFormat::from_path(path)?;
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    parse_config(&content, format)
}

/// Load config from an explicit path, or from the default location.
///
/// A missing default file yields built-in defaults; a missing explicit file
/// is an error.
pub fn load_config(explicit: Option<&Path>) -> Result<ReconcileConfig, ConfigError> {
    match explicit {
        Some(path) => {
            let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref());
            load_config_file(&expanded)
        }
        None => {
            let path = default_config_path();
            if path.exists() {
                load_config_file(&path)
            } else {
                Ok(ReconcileConfig::default())
            }
        }
    }
}
