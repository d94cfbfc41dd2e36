use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::github::GithubConfig;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudioConfig {
    pub general: GeneralConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub github: GithubConfig,
    pub build: BuildConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,

    /// Where projects and their snapshot history are stored
    pub projects_dir: PathBuf,

    /// Project reopened at startup
    #[serde(default)]
    pub active_project: Option<String>,

    /// Run remaining plan steps without asking first
    #[serde(default = "default_auto_continue")]
    pub auto_continue: bool,
}

fn default_auto_continue() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model used for new projects
    pub default_model: String,

    /// Timeout for a whole generation, in seconds
    pub timeout_seconds: u64,

    pub connect_timeout_seconds: u64,

    pub gemini: GeminiConfig,
    pub ollama: OllamaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    pub poll_interval_seconds: u64,
    pub max_attempts: u32,
}

impl StudioConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.load_env_vars();

        Ok(config)
    }

    /// Save configuration to file, without secrets
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut safe_config = self.clone();
        safe_config.sanitize_for_save();

        let content = toml::to_string_pretty(&safe_config).context("Failed to serialize config")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn studio_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
        Ok(home.join(".oneclick-studio"))
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::studio_dir()?.join("config.toml"))
    }

    fn load_env_vars(&mut self) {
        if self.llm.gemini.api_key.is_none() {
            self.llm.gemini.api_key = std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty());
        }
        if self.github.token.is_empty() {
            if let Ok(token) = std::env::var("GITHUB_TOKEN") {
                self.github.token = token;
            }
        }
    }

    fn sanitize_for_save(&mut self) {
        self.llm.gemini.api_key = None;
        self.github.token.clear();
    }

    /// Applies `key=value` overrides, e.g. from `/config set`.
    pub fn merge_overrides(&mut self, overrides: Vec<(String, String)>) -> Result<()> {
        for (key, value) in overrides {
            match key.as_str() {
                "log_level" => self.general.log_level = value,
                "projects_dir" => self.general.projects_dir = PathBuf::from(value),
                "auto_continue" => self.general.auto_continue = value.parse()?,
                "model" => self.llm.default_model = value,
                "ollama_url" => self.llm.ollama.base_url = value,
                "timeout" => self.llm.timeout_seconds = value.parse()?,
                "github_token" => self.github.token = value,
                "github_owner" => self.github.owner = value,
                "github_repo" => self.github.repo = value,
                "poll_interval" => self.build.poll_interval_seconds = value.parse()?,
                "max_attempts" => self.build.max_attempts = value.parse()?,
                _ => bail!("Unknown config key: {}", key),
            }
        }
        Ok(())
    }
}

impl Default for StudioConfig {
    fn default() -> Self {
        let studio_dir = Self::studio_dir().unwrap_or_else(|_| PathBuf::from(".oneclick-studio"));

        Self {
            general: GeneralConfig {
                log_level: "info".to_string(),
                projects_dir: studio_dir.join("projects"),
                active_project: None,
                auto_continue: true,
            },
            llm: LlmConfig {
                default_model: crate::models::DEFAULT_MODEL.to_string(),
                timeout_seconds: 300,
                connect_timeout_seconds: 10,
                gemini: GeminiConfig {
                    api_key: None,
                    base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                    temperature: 0.1,
                },
                ollama: OllamaConfig {
                    base_url: "http://localhost:11434".to_string(),
                },
            },
            github: GithubConfig::default(),
            build: BuildConfig {
                poll_interval_seconds: 10,
                max_attempts: 120,
            },
        }
    }
}

/// Load or create configuration
pub fn load_or_create_config(path: Option<&Path>) -> Result<StudioConfig> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => StudioConfig::default_path()?,
    };

    if config_path.exists() {
        StudioConfig::load(&config_path)
    } else {
        let mut config = StudioConfig::default();
        config.save(&config_path)?;
        config.load_env_vars();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = StudioConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.build.poll_interval_seconds, 10);
        assert_eq!(config.build.max_attempts, 120);
        assert_eq!(config.llm.ollama.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_save_strips_secrets() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut config = StudioConfig::default();
        config.llm.gemini.api_key = Some("secret-key".to_string());
        config.github.token = "ghp_secret".to_string();
        config.github.owner = "octo".to_string();
        config.save(&config_path).unwrap();

        let raw = std::fs::read_to_string(&config_path).unwrap();
        assert!(!raw.contains("secret-key"));
        assert!(!raw.contains("ghp_secret"));

        let loaded = StudioConfig::load(&config_path).unwrap();
        assert_eq!(loaded.github.owner, "octo");
        assert_eq!(loaded.build.max_attempts, config.build.max_attempts);
    }

    #[test]
    fn test_merge_overrides() {
        let mut config = StudioConfig::default();

        let overrides = vec![
            ("log_level".to_string(), "debug".to_string()),
            ("github_repo".to_string(), "shop".to_string()),
            ("max_attempts".to_string(), "5".to_string()),
        ];

        config.merge_overrides(overrides).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.github.repo, "shop");
        assert_eq!(config.build.max_attempts, 5);

        assert!(config
            .merge_overrides(vec![("nope".to_string(), "1".to_string())])
            .is_err());
        assert!(config
            .merge_overrides(vec![("timeout".to_string(), "soon".to_string())])
            .is_err());
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let config = load_or_create_config(Some(&config_path)).unwrap();
        assert!(config_path.exists());
        assert_eq!(config.llm.default_model, crate::models::DEFAULT_MODEL);
    }
}
