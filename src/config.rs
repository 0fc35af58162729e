use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Models accepted at the entry points.
pub const SUPPORTED_MODELS: [&str; 5] = ["gpt-4o-mini", "gpt-4o", "o1", "o1-mini", "o3-mini"];

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    /// Left unset for reasoning models that reject a temperature.
    pub temperature: Option<f32>,
    pub max_tokens: u32,
    /// Upper bound for every single call to the reasoning service.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_owned(),
            temperature: Some(0.0),
            max_tokens: 2000,
            request_timeout_secs: 60,
        }
    }
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum number of controller turns before the loop gives up.
    pub max_turns: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { max_turns: 10 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Rows of the result set shown to the reasoning service.
    pub preview_rows: usize,
    /// Columns of the result set shown to the reasoning service.
    pub preview_columns: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            preview_rows: 50,
            preview_columns: 20,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DatasetSourceConfig {
    /// Apify platform API; the token is read from `APIFY_TOKEN`.
    Apify { base_url: String },
    /// Local directory holding `<id>.json|csv|parquet` files.
    Directory { path: PathBuf },
}

impl Default for DatasetSourceConfig {
    fn default() -> Self {
        Self::Apify {
            base_url: "https://api.apify.com".to_owned(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DatasetConfig {
    /// Table name the dataset is exposed under in SQL.
    pub table_name: String,
    pub source: DatasetSourceConfig,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            table_name: "dataset".to_owned(),
            source: DatasetSourceConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 4321 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub synthesis: SynthesisConfig,
    pub dataset: DatasetConfig,
    pub server: ServerConfig,
}

pub fn get_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("dataset-query").join("config.json"))
}

/// Load configuration from `path`, or from the platform config directory
/// when no path is given. A missing file yields the defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_app_config(path: Option<&Path>) -> Result<AppConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match get_config_path() {
            Some(p) => p,
            None => return Ok(AppConfig::default()),
        },
    };

    if !path.exists() {
        tracing::debug!("No config file at {}, using defaults", path.display());
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config JSON in {}", path.display()))
}

/// # Errors
///
/// Returns an error if the parent directory or the file cannot be written.
pub fn save_app_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;
    Ok(())
}
