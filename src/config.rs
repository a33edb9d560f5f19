//! Pyscribe configuration
//!
//! Loaded from `~/.pyscribe/config.toml` when present. Every key is optional;
//! missing keys take their defaults. Command-line flags and `PYSCRIBE_*`
//! environment variables override the file (see `main.rs`).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agent::{AgentConfig, MAX_RETRIES};
use crate::codegen::GenerationMode;
use crate::ollama::GenerationOptions;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config at {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Model id passed to Ollama
    pub model: String,
    pub ollama_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Start sessions in agent mode
    pub autonomous: bool,
    pub max_retries: u32,
    /// Python executable backing the sandbox
    pub python: PathBuf,
    /// Per-execution timeout in seconds
    pub execution_timeout_secs: u64,
    /// OTLP collector; spans are only exported when set
    pub otlp_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let options = GenerationOptions::default();
        Self {
            model: "llama3.2:1b".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            autonomous: false,
            max_retries: MAX_RETRIES,
            python: PathBuf::from("python3"),
            execution_timeout_secs: 30,
            otlp_endpoint: None,
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    /// A missing default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate(path)?;
        Ok(config)
    }

    /// The config file path: `~/.pyscribe/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".pyscribe").join("config.toml"))
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        if self.model.trim().is_empty() {
            return Err(invalid("model is empty"));
        }
        if self.execution_timeout_secs == 0 {
            return Err(invalid("execution-timeout-secs must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid("temperature must be between 0.0 and 2.0"));
        }
        Ok(())
    }

    pub fn mode(&self) -> GenerationMode {
        if self.autonomous {
            GenerationMode::Autonomous
        } else {
            GenerationMode::SingleShot
        }
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            mode: self.mode(),
            max_retries: self.max_retries,
            execution_timeout_secs: self.execution_timeout_secs,
        }
    }

    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}
