//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::error::Error;

/// Environment variables consulted for the oracle credential, in order
pub const API_KEY_VARS: &[&str] = &["KGLOOP_API_KEY", "ANTHROPIC_API_KEY", "OPENROUTER_API_KEY"];

/// kgloop configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub oracle: OracleConfig,
    pub playbook: PlaybookConfig,
    pub apply: ApplyConfig,
    pub reflector: ReflectorConfig,
    pub quality: QualityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Must stay empty; present only so a key written to the file is detected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub analysis_temperature: f32,
    pub synthesis_temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybookConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    pub auto_apply_low_risk: bool,
    pub lock_timeout_secs: u64,
}

/// Caps on the payload sent to the oracle during analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectorConfig {
    pub sample_relationships: usize,
    pub source_excerpt_chars: usize,
    pub extraction_prompt_chars: usize,
    pub evaluation_prompt_chars: usize,
    pub history_reports: usize,
    pub history_report_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub target_issue_rate: f64,
    pub max_iterations: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "anthropic/claude-sonnet-4.5".to_string(),
            analysis_temperature: 0.3,
            synthesis_temperature: 0.4,
            max_tokens: 16000,
            timeout_secs: 300,
            max_retries: 3,
        }
    }
}

impl Default for PlaybookConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("kg_extraction_playbook"),
        }
    }
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            auto_apply_low_risk: true,
            lock_timeout_secs: 30,
        }
    }
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            sample_relationships: 100,
            source_excerpt_chars: 2000,
            extraction_prompt_chars: 1500,
            evaluation_prompt_chars: 1000,
            history_reports: 2,
            history_report_chars: 3000,
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            target_issue_rate: 0.05,
            max_iterations: 5,
        }
    }
}

impl OracleConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolve_api_key_with(|name| env::var(name).ok())
    }

    /// Resolve the credential through an arbitrary variable lookup
    pub fn resolve_api_key_with<F>(&self, lookup: F) -> anyhow::Result<Option<String>>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.enforce_env_only()?;

        Ok(API_KEY_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .find(|value| !value.trim().is_empty()))
    }

    /// Resolve the credential or fail with [`Error::MissingCredential`]
    pub fn require_api_key(&self) -> crate::Result<String> {
        self.resolved_api_key()
            .map_err(|e| Error::ConfigError(e.to_string()))?
            .ok_or(Error::MissingCredential)
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| {
            opt.map(|key| {
                if key.len() <= 4 {
                    "***".to_string()
                } else {
                    let suffix = &key[key.len() - 4..];
                    format!("***{}", suffix)
                }
            })
        })
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "Oracle API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("KGLOOP_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("kgloop")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.oracle.enforce_env_only()?;
        if !(0.0..=1.0).contains(&self.quality.target_issue_rate) {
            return Err(anyhow!("quality.target_issue_rate must be between 0.0 and 1.0"));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(anyhow!("oracle.timeout_secs must be positive"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "oracle.base_url" => Ok(self.oracle.base_url.clone()),
            "oracle.model" => Ok(self.oracle.model.clone()),
            "oracle.analysis_temperature" => Ok(self.oracle.analysis_temperature.to_string()),
            "oracle.synthesis_temperature" => Ok(self.oracle.synthesis_temperature.to_string()),
            "oracle.max_tokens" => Ok(self.oracle.max_tokens.to_string()),
            "oracle.timeout_secs" => Ok(self.oracle.timeout_secs.to_string()),
            "oracle.max_retries" => Ok(self.oracle.max_retries.to_string()),

            "playbook.root" => Ok(self.playbook.root.display().to_string()),

            "apply.auto_apply_low_risk" => Ok(self.apply.auto_apply_low_risk.to_string()),
            "apply.lock_timeout_secs" => Ok(self.apply.lock_timeout_secs.to_string()),

            "quality.target_issue_rate" => Ok(self.quality.target_issue_rate.to_string()),
            "quality.max_iterations" => Ok(self.quality.max_iterations.to_string()),

            // API key (special handling - show redacted)
            "oracle.api_key" | "api_key" => match self.oracle.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok("(not set - use KGLOOP_API_KEY or ANTHROPIC_API_KEY env var)".to_string()),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `kgloop config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "oracle.base_url" => {
                self.oracle.base_url = value.trim_end_matches('/').to_string();
            }
            "oracle.model" => {
                self.oracle.model = value.to_string();
            }
            "oracle.analysis_temperature" | "oracle.synthesis_temperature" => {
                let temp: f32 = value
                    .parse()
                    .with_context(|| format!("Invalid temperature value: {}", value))?;
                if !(0.0..=2.0).contains(&temp) {
                    return Err(anyhow!("Temperature must be between 0.0 and 2.0"));
                }
                if key == "oracle.analysis_temperature" {
                    self.oracle.analysis_temperature = temp;
                } else {
                    self.oracle.synthesis_temperature = temp;
                }
            }
            "oracle.max_tokens" => {
                self.oracle.max_tokens = value
                    .parse()
                    .with_context(|| format!("Invalid max_tokens value: {}", value))?;
            }
            "oracle.timeout_secs" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
                if secs == 0 {
                    return Err(anyhow!("Timeout must be positive"));
                }
                self.oracle.timeout_secs = secs;
            }
            "oracle.max_retries" => {
                self.oracle.max_retries = value
                    .parse()
                    .with_context(|| format!("Invalid max_retries value: {}", value))?;
            }

            "playbook.root" => {
                self.playbook.root = PathBuf::from(value);
            }

            "apply.auto_apply_low_risk" => {
                self.apply.auto_apply_low_risk = value
                    .parse()
                    .with_context(|| format!("Invalid boolean value: {}", value))?;
            }
            "apply.lock_timeout_secs" => {
                self.apply.lock_timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid lock_timeout_secs value: {}", value))?;
            }

            "quality.target_issue_rate" => {
                let rate: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid target_issue_rate value: {}", value))?;
                if !(0.0..=1.0).contains(&rate) {
                    return Err(anyhow!("Target issue rate must be between 0.0 and 1.0"));
                }
                self.quality.target_issue_rate = rate;
            }
            "quality.max_iterations" => {
                self.quality.max_iterations = value
                    .parse()
                    .with_context(|| format!("Invalid max_iterations value: {}", value))?;
            }

            // API key cannot be set via config
            "oracle.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the KGLOOP_API_KEY or ANTHROPIC_API_KEY environment variable instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `kgloop config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "oracle.base_url",
            "oracle.model",
            "oracle.analysis_temperature",
            "oracle.synthesis_temperature",
            "oracle.max_tokens",
            "oracle.timeout_secs",
            "oracle.max_retries",
            "oracle.api_key",
            "playbook.root",
            "apply.auto_apply_low_risk",
            "apply.lock_timeout_secs",
            "quality.target_issue_rate",
            "quality.max_iterations",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }
}
