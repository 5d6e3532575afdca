use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "config/service.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Read(String, std::io::Error),
    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value for {0}: {1}")]
    InvalidEnv(&'static str, String),
    #[error("Invalid upload retention window: {0}s")]
    InvalidRetention(u64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub allowed_extensions: Vec<String>,
    pub verify_content: bool,
    pub retention_secs: Option<u64>,
    pub sweep_interval_secs: u64,
    pub image: ImageConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub output: ModelOutput,
}

/// What the classifier's final layer produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelOutput {
    Probabilities,
    Logits,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            upload_dir: PathBuf::from("uploads"),
            allowed_extensions: ["png", "jpg", "jpeg", "gif"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            verify_content: false,
            retention_secs: None,
            sweep_interval_secs: 300,
            image: ImageConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            width: 75,
            height: 100,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("model/lesion_classifier.onnx"),
            output: ModelOutput::Probabilities,
        }
    }
}

impl ServiceConfig {
    /// Reads `CONFIG_PATH` (or `config/service.yaml`) and applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&config_path))?;
        config.apply_env_overrides(|key| env::var(key).ok())?;
        config.retention()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!(
                "No config file at {}, using built-in defaults",
                path.display()
            );
            return Ok(Self::default());
        }
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = serde_yaml::from_str(config_str)?;
        Ok(config)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("PORT", port.clone()))?;
        }
        if let Some(dir) = lookup("UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(dir);
        }
        if let Some(model_path) = lookup("MODEL_PATH") {
            self.model.path = PathBuf::from(model_path);
        }
        if let Some(verify) = lookup("VERIFY_CONTENT") {
            self.verify_content = match verify.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => return Err(ConfigError::InvalidEnv("VERIFY_CONTENT", verify)),
            };
        }
        if let Some(secs) = lookup("UPLOAD_RETENTION_SECS") {
            let secs = secs
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("UPLOAD_RETENTION_SECS", secs.clone()))?;
            self.retention_secs = Some(secs);
        }
        Ok(())
    }

    /// Retention window for uploads, if one is configured. The window must be
    /// positive and small enough that `now - window` is still a valid timestamp.
    pub fn retention(&self) -> Result<Option<Duration>, ConfigError> {
        let Some(secs) = self.retention_secs else {
            return Ok(None);
        };
        let window = i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .filter(|window| secs > 0 && Utc::now().checked_sub_signed(*window).is_some())
            .ok_or(ConfigError::InvalidRetention(secs))?;
        Ok(Some(window))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
