//! Service configuration, loaded once at startup and shared read-only

use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::HookError;
use crate::provider::Provider;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";
pub const DEFAULT_CONFIG_PATH: &str = "githook.toml";
const DEFAULT_WORKERS: usize = 4;
const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Deserialize, Clone)]
pub struct HookConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub script: ScriptConfig,
    #[serde(default)]
    pub github: ProviderConfig,
    #[serde(default)]
    pub gitee: ProviderConfig,
    #[serde(default)]
    pub coding: ProviderConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScriptConfig {
    /// Root directory holding one subdirectory per repository.
    pub path: PathBuf,
    /// Optional command prefix the script is launched behind, e.g. `["sudo", "-n"]`.
    #[serde(default)]
    pub launcher: Vec<String>,
}

/// Shared secret and agent marker for one provider.
#[derive(Deserialize, Clone, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub token: String,
    /// Expected agent header; a substring for GitHub, an exact value otherwise.
    /// Falls back to the provider's well-known agent when unset.
    pub agent: Option<String>,
}

impl ProviderConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            agent: None,
        }
    }

    pub fn expected_agent(&self, provider: Provider) -> &str {
        self.agent
            .as_deref()
            .unwrap_or_else(|| provider.default_agent())
    }

    /// Returns true if a non-empty shared secret is configured.
    pub fn has_secret(&self) -> bool {
        !self.token.is_empty()
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("token", &if self.has_secret() { "<redacted>" } else { "<unset>" })
            .field("agent", &self.agent)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Run at most one script per repository at a time.
    #[serde(default)]
    pub serialize_per_repo: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            serialize_per_repo: false,
        }
    }
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SecurityConfig {
    /// Reject deliveries that carry no signature or token at all.
    /// Off by default, which accepts unsigned requests.
    #[serde(default)]
    pub require_signature: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// When set, logs are also written to daily-rolling files in this directory.
    pub directory: Option<PathBuf>,
}

impl HookConfig {
    /// Build a config for the given script root with every other value defaulted.
    pub fn new(script_root: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig::default(),
            script: ScriptConfig {
                path: script_root.into(),
                launcher: Vec::new(),
            },
            github: ProviderConfig::default(),
            gitee: ProviderConfig::default(),
            coding: ProviderConfig::default(),
            dispatch: DispatchConfig::default(),
            security: SecurityConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn provider(&self, provider: Provider) -> &ProviderConfig {
        match provider {
            Provider::Github => &self.github,
            Provider::Gitee => &self.gitee,
            Provider::Coding => &self.coding,
        }
    }

    /// Apply overrides from an environment lookup function.
    ///
    /// Recognised keys: `BIND_ADDRESS`, `SCRIPT_PATH`, `GITHUB_TOKEN`,
    /// `GITEE_TOKEN`, `CODING_TOKEN`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("BIND_ADDRESS") {
            self.server.bind_address = addr;
        }
        if let Some(path) = lookup("SCRIPT_PATH") {
            self.script.path = PathBuf::from(path);
        }
        if let Some(token) = lookup("GITHUB_TOKEN") {
            self.github.token = token;
        }
        if let Some(token) = lookup("GITEE_TOKEN") {
            self.gitee.token = token;
        }
        if let Some(token) = lookup("CODING_TOKEN") {
            self.coding.token = token;
        }
    }

    pub fn validate(&self) -> Result<(), HookError> {
        if self.script.path.as_os_str().is_empty() {
            return Err(HookError::ConfigError("script.path must not be empty".into()));
        }
        if self.dispatch.workers == 0 {
            return Err(HookError::ConfigError(
                "dispatch.workers must be at least 1".into(),
            ));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(HookError::ConfigError(
                "dispatch.queue_capacity must be at least 1".into(),
            ));
        }
        if self.launcher_is_blank() {
            return Err(HookError::ConfigError(
                "script.launcher entries must not be empty".into(),
            ));
        }
        Ok(())
    }

    fn launcher_is_blank(&self) -> bool {
        self.script.launcher.iter().any(|part| part.trim().is_empty())
    }
}

/// Parse configuration from TOML text.
pub fn parse_config(config_str: &str) -> Result<HookConfig, HookError> {
    let config: HookConfig = toml::from_str(config_str)?;
    Ok(config)
}

/// Load, apply environment overrides, and validate the configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<HookConfig, HookError> {
    let path = path.as_ref();
    let config_str = fs::read_to_string(path).map_err(|e| {
        HookError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let mut config = parse_config(&config_str).map_err(|e| {
        HookError::ConfigError(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    config.apply_env(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
