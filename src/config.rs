use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Process-wide settings for repowarden, built once at startup
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    /// GitHub API and authentication settings
    #[serde(default)]
    pub github: GitHubSettings,

    /// Reconciliation behavior
    #[serde(default)]
    pub reconcile: ReconcileSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubSettings {
    /// REST API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Authentication method
    #[serde(default = "default_auth_method")]
    pub auth_method: String, // "auto", "gh_cli", "token"

    /// Environment variables searched for a token, in order
    #[serde(default = "default_token_env")]
    pub token_env: Vec<String>,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Owner/organization override (derived from the mapping file name if null)
    pub owner: Option<String>,
}

/// Reconciliation configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ReconcileSettings {
    /// Compute and log the plan without mutating anything
    #[serde(default)]
    pub dry_run: bool,

    /// Exit with a non-zero status when any operation failed
    #[serde(default)]
    pub fail_on_error: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingSettings {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact", "pretty", "json"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

// Default value functions
fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_auth_method() -> String {
    "auto".to_string()
}
fn default_token_env() -> Vec<String> {
    vec!["GITHUB_TOKEN".to_string(), "GH_TOKEN".to_string()]
}
fn default_user_agent() -> String {
    format!("repowarden/{}", env!("CARGO_PKG_VERSION"))
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            auth_method: default_auth_method(),
            token_env: default_token_env(),
            user_agent: default_user_agent(),
            owner: None,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_true(),
        }
    }
}

impl Settings {
    /// Load settings from the default location, falling back to defaults when absent
    pub fn load_or_default() -> Result<Self> {
        match Self::default_config_path() {
            Ok(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load settings from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {:?}", path))?;

        let mut settings: Settings = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {:?}", path))?;

        settings.expand_values()?;

        Ok(settings)
    }

    /// Get the default settings file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("repowarden").join("config.yml"))
    }

    /// Expand environment variables in string settings
    pub fn expand_values(&mut self) -> Result<()> {
        self.github.api_url = shellexpand::full(&self.github.api_url)
            .context("Failed to expand github.api_url")?
            .trim_end_matches('/')
            .to_string();

        if let Some(owner) = &self.github.owner {
            self.github.owner = Some(
                shellexpand::full(owner)
                    .context("Failed to expand github.owner")?
                    .into_owned(),
            );
        }

        Ok(())
    }

    /// Owner for a mapping file: the settings override, else the file stem
    pub fn owner_for(&self, mapping_path: &Path) -> Option<String> {
        if let Some(owner) = &self.github.owner {
            return Some(owner.clone());
        }

        mapping_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
    }
}
