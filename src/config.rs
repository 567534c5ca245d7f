//! TOML configuration with environment variable overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub chat: ProviderSettings,
    pub support: ProviderSettings,
    pub judge: ProviderSettings,
    pub embedding: ProviderSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    pub runs_dir: String,
    pub pricing_path: String,
    pub cost_model_path: String,
}

/// One OpenAI-compatible endpoint: chat, support, judge, or embeddings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProviderSettings {
    pub provider: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            storage: StorageConfig::default(),
            chat: ProviderSettings::default(),
            support: ProviderSettings {
                model: "gpt-4o-mini".into(),
                ..ProviderSettings::default()
            },
            judge: ProviderSettings::default(),
            embedding: ProviderSettings {
                model: "text-embedding-3-small".into(),
                ..ProviderSettings::default()
            },
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = default_memrag_dir();
        Self {
            db_path: base.join("memrag.db").to_string_lossy().into_owned(),
            runs_dir: base.join("runs").to_string_lossy().into_owned(),
            pricing_path: base.join("pricing.json").to_string_lossy().into_owned(),
            cost_model_path: base.join("cost_model.json").to_string_lossy().into_owned(),
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            model: "gpt-4o".into(),
        }
    }
}

/// Returns `~/.memrag/`
pub fn default_memrag_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".memrag")
}

/// Returns the default config file path: `~/.memrag/config.toml`
pub fn default_config_path() -> PathBuf {
    default_memrag_dir().join("config.toml")
}

impl AppConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            AppConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (MEMRAG_DB, MEMRAG_LOG_LEVEL,
    /// MEMRAG_API_KEY, MEMRAG_EMBED_API_KEY).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MEMRAG_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MEMRAG_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("MEMRAG_API_KEY") {
            self.chat.api_key = Some(val.clone());
            self.support.api_key = Some(val.clone());
            self.judge.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("MEMRAG_EMBED_API_KEY") {
            self.embedding.api_key = Some(val);
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn resolved_runs_dir(&self) -> PathBuf {
        expand_tilde(&self.storage.runs_dir)
    }

    pub fn resolved_pricing_path(&self) -> PathBuf {
        expand_tilde(&self.storage.pricing_path)
    }

    pub fn resolved_cost_model_path(&self) -> PathBuf {
        expand_tilde(&self.storage.cost_model_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
