//! Benchmark configuration
//!
//! Loaded from an optional JSON file, then overridden from the environment.
//! The resulting `BenchConfig` is passed explicitly into the orchestrator.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::{EmbeddedLimits, ExternalToolConfig};
use crate::generator::DEFAULT_SYSTEM_PROMPT;
use crate::store::LedgerConfig;

pub const ENV_OLLAMA_URL: &str = "CADBENCH_OLLAMA_URL";
pub const ENV_FREECAD_PATH: &str = "FREECAD_PATH";
pub const ENV_OUTPUT_DIR: &str = "CADBENCH_OUTPUT_DIR";

/// A generator model under benchmark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Display name, used for output directories and records
    pub name: String,
    /// Identifier sent to the backend
    pub id: String,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

/// Code generator backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub base_url: String,
    /// Replaces the built-in system prompt
    pub system_prompt: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            system_prompt: None,
        }
    }
}

impl GeneratorConfig {
    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub output_dir: PathBuf,
    /// Attempt budget per run
    pub max_attempts: usize,
    pub models: Vec<ModelSpec>,
    pub generator: GeneratorConfig,
    pub external: ExternalToolConfig,
    pub embedded: EmbeddedLimits,
    pub ledger: LedgerConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            max_attempts: 3,
            models: vec![
                ModelSpec::new("qwen2.5-coder", "qwen2.5-coder:7b"),
                ModelSpec::new("llama3.2", "llama3.2:3b"),
            ],
            generator: GeneratorConfig::default(),
            external: ExternalToolConfig::default(),
            embedded: EmbeddedLimits::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

/// Error type for configuration loading
#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "cannot read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "invalid config {}: {}", path.display(), source)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl BenchConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// File (if given) plus environment overrides, validated
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (the environment in production)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = non_empty(ENV_OLLAMA_URL) {
            self.generator.base_url = url;
        }
        if let Some(program) = non_empty(ENV_FREECAD_PATH) {
            self.external.program = program;
        }
        if let Some(dir) = non_empty(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".to_string()));
        }
        if self.external.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "external.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.models.is_empty() {
            return Err(ConfigError::Invalid("no models configured".to_string()));
        }
        Ok(())
    }

    /// Models whose name is in `names`, in configuration order; all models when `names` is empty
    pub fn select_models(&self, names: &[String]) -> Result<Vec<ModelSpec>, ConfigError> {
        if names.is_empty() {
            return Ok(self.models.clone());
        }
        if let Some(unknown) = names
            .iter()
            .find(|name| !self.models.iter().any(|m| &m.name == *name))
        {
            return Err(ConfigError::Invalid(format!("unknown model '{}'", unknown)));
        }
        Ok(self
            .models
            .iter()
            .filter(|m| names.contains(&m.name))
            .cloned()
            .collect())
    }
}
