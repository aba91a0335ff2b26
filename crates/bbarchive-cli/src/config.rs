//! Configuration loading from TOML files

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use bbarchive_core::{Auth, HttpConfig, RetryPolicy};
use bbarchive_crawler::config::{DEFAULT_API_BASE, DEFAULT_WEB_BASE};

/// Settings file for bbarchive
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub source: SourceConfig,
    pub credentials: Vec<CredentialConfig>,
    pub http: HttpSettings,
    /// Literal old → new URL replacements for published documents
    pub url_rewrites: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub path: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub api_base: String,
    pub web_base: String,
    pub owner: String,
    pub repositories: Vec<String>,
    /// Project key used to filter `repos` listings
    pub project: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            web_base: DEFAULT_WEB_BASE.to_string(),
            owner: String::new(),
            repositories: Vec::new(),
            project: None,
        }
    }
}

/// One credential: `username` + `password` (app password) or `token`
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CredentialConfig {
    #[serde(deserialize_with = "deserialize_env_var")]
    pub username: Option<String>,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub password: Option<String>,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub token: Option<String>,
}

impl CredentialConfig {
    pub fn to_auth(&self) -> Result<Auth> {
        match (&self.token, &self.username, &self.password) {
            (Some(token), _, _) => Ok(Auth::Bearer(token.clone())),
            (None, Some(username), Some(password)) => Ok(Auth::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => anyhow::bail!("needs `username` + `password` or `token` (unset environment variable?)"),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub short_backoff_secs: u64,
    pub long_backoff_secs: u64,
    /// Every n-th consecutive failure waits the long backoff
    pub escalate_every: u32,
    pub connect_timeout: u64,
    pub request_timeout: u64,
    pub read_timeout: u64,
    /// Seconds each worker gets to stop after Ctrl-C
    pub join_timeout: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            short_backoff_secs: 5,
            long_backoff_secs: 60,
            escalate_every: 5,
            connect_timeout: 30,
            request_timeout: 120,
            read_timeout: 30,
            join_timeout: 10,
        }
    }
}

impl HttpSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            short_delay: Duration::from_secs(self.short_backoff_secs),
            long_unit: Duration::from_secs(self.long_backoff_secs),
            escalate_every: self.escalate_every.max(1),
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            request_timeout: Duration::from_secs(self.request_timeout),
            read_timeout: Duration::from_secs(self.read_timeout),
            retry: self.retry_policy(),
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

/// `base` with exactly one trailing slash
fn with_trailing_slash(base: &str) -> String {
    format!("{}/", base.trim_end_matches('/'))
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./bbarchive.toml (current directory)
    /// 2. ~/.config/bbarchive/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("bbarchive.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "bbarchive") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn auths(&self) -> Result<Vec<Auth>> {
        self.credentials
            .iter()
            .enumerate()
            .map(|(i, c)| c.to_auth().with_context(|| format!("Credential {i}")))
            .collect()
    }

    /// Runtime configuration for an archive run
    pub fn archive_config(&self) -> Result<bbarchive_crawler::Config> {
        anyhow::ensure!(!self.source.owner.is_empty(), "[source] owner is not set");
        let mut config = bbarchive_crawler::Config::new(&self.project.path, &self.source.owner);
        config.api_base = with_trailing_slash(&self.source.api_base);
        config.web_base = with_trailing_slash(&self.source.web_base);
        config.repositories = self.source.repositories.clone();
        config.project_key = self.source.project.clone();
        config.credentials = self.auths()?;
        config.url_rewrites = self
            .url_rewrites
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        config.retry = self.http.retry_policy();
        config.join_timeout = Duration::from_secs(self.http.join_timeout);
        Ok(config)
    }
}
