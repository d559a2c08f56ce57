use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::http::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::platform::{EndpointTable, PlatformFamily};
use crate::poll::PollDefaults;

/// Default poll interval for status waits
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Default upper bound on a single status wait
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 600;

/// Default retry budget for front/back identity resolution
pub const DEFAULT_BRIDGE_ATTEMPTS: u32 = 12;

/// Default delay between identity resolution attempts
pub const DEFAULT_BRIDGE_DELAY_SECS: u64 = 5;

/// Default config file location: ~/.stratum/config
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".stratum")
        .join("config")
}

/// Errors that can occur during context operations
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Context '{0}' not found")]
    ContextNotFound(String),

    #[error("No current context set")]
    NoCurrentContext,

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to write config: {0}")]
    WriteError(String),

    #[error("Failed to expand '{0}': {1}")]
    ExpandError(String, String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Keystone password credentials, exchanged for a token on connect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeystoneAuth {
    pub auth_url: String,
    pub username: String,
    /// May reference the environment (`$OS_PASSWORD`)
    pub password: String,
    pub project: String,
    #[serde(default = "default_domain")]
    pub domain: String,
}

fn default_domain() -> String {
    "Default".to_string()
}

impl KeystoneAuth {
    /// Copy with `$VAR` references in the password expanded
    pub fn resolved(&self) -> Result<Self, ContextError> {
        Ok(Self {
            password: expand(&self.password)?,
            ..self.clone()
        })
    }
}

/// A single context: one control plane endpoint and its credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Display name for this context
    pub name: String,
    /// Base URL of the control plane API
    pub url: String,
    pub platform: PlatformFamily,
    /// Static bearer or Keystone token; may reference the environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keystone: Option<KeystoneAuth>,
    /// Namespace used when a descriptor does not name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Per-service base URLs (`network`, `compute`, `volumev3`, `load-balancer`)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub services: HashMap<String, String>,
    /// Endpoint overrides merged over the family defaults
    #[serde(default, skip_serializing_if = "is_empty_table")]
    pub endpoints: EndpointTable,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn is_empty_table(table: &EndpointTable) -> bool {
    table.endpoints.is_empty()
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Poller and bridge timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_bridge_attempts")]
    pub bridge_attempts: u32,
    #[serde(default = "default_bridge_delay")]
    pub bridge_delay_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            bridge_attempts: DEFAULT_BRIDGE_ATTEMPTS,
            bridge_delay_secs: DEFAULT_BRIDGE_DELAY_SECS,
        }
    }
}

fn default_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_timeout() -> u64 {
    DEFAULT_POLL_TIMEOUT_SECS
}

fn default_bridge_attempts() -> u32 {
    DEFAULT_BRIDGE_ATTEMPTS
}

fn default_bridge_delay() -> u64 {
    DEFAULT_BRIDGE_DELAY_SECS
}

impl PollingConfig {
    pub fn poll_defaults(&self) -> PollDefaults {
        PollDefaults {
            interval: Duration::from_secs(self.interval_secs),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// The complete configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Currently active context name
    #[serde(rename = "current-context")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_context: Option<String>,

    /// Map of context name to context definition
    #[serde(default)]
    pub contexts: HashMap<String, Context>,

    #[serde(default)]
    pub polling: PollingConfig,
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Parse config from YAML string
pub fn parse_config(content: &str) -> Result<Config, ContextError> {
    let config: Config =
        serde_yaml::from_str(content).map_err(|e| ContextError::ParseError(e.to_string()))?;
    if config.polling.interval_secs == 0 {
        return Err(ContextError::ParseError(
            "polling.interval_secs must be at least 1".to_string(),
        ));
    }
    Ok(config)
}

/// Serialize config to YAML string
pub fn serialize_config(config: &Config) -> Result<String, ContextError> {
    serde_yaml::to_string(config).map_err(|e| ContextError::WriteError(e.to_string()))
}

/// Add or update a context in the config
pub fn add_context(config: &mut Config, context: Context) {
    config.contexts.insert(context.name.clone(), context);
}

/// Remove a context from the config
pub fn remove_context(config: &mut Config, name: &str) -> Option<Context> {
    let removed = config.contexts.remove(name);
    if config.current_context.as_deref() == Some(name) {
        config.current_context = None;
    }
    removed
}

/// Set the current context
pub fn set_current_context(config: &mut Config, name: &str) -> Result<(), ContextError> {
    if !config.contexts.contains_key(name) {
        return Err(ContextError::ContextNotFound(name.to_string()));
    }
    config.current_context = Some(name.to_string());
    Ok(())
}

/// Get a context by name
pub fn get_context<'a>(config: &'a Config, name: &str) -> Result<&'a Context, ContextError> {
    config
        .contexts
        .get(name)
        .ok_or_else(|| ContextError::ContextNotFound(name.to_string()))
}

/// List all context names, sorted
pub fn list_contexts(config: &Config) -> Vec<&str> {
    let mut names: Vec<&str> = config.contexts.keys().map(|s| s.as_str()).collect();
    names.sort_unstable();
    names
}

/// Expand `$VAR`, `${VAR}` and `~` in a configured value
pub fn expand(value: &str) -> Result<String, ContextError> {
    shellexpand::full(value)
        .map(|s| s.into_owned())
        .map_err(|e| ContextError::ExpandError(value.to_string(), e.to_string()))
}

// ============================================================================
// I/O boundary functions
// ============================================================================

/// Load config from the default location
pub fn load_config() -> Result<Config, ContextError> {
    load_config_from(&default_config_path())
}

/// Load config from a specific path; a missing file is an empty config
pub fn load_config_from(path: &Path) -> Result<Config, ContextError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Save config to the default location
pub fn save_config(config: &Config) -> Result<(), ContextError> {
    save_config_to(config, &default_config_path())
}

/// Save config to a specific path
pub fn save_config_to(config: &Config, path: &Path) -> Result<(), ContextError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serialize_config(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

impl Config {
    /// The active context, or an explicitly named one
    pub fn context(&self, name: Option<&str>) -> Result<&Context, ContextError> {
        let name = match name {
            Some(name) => name,
            None => self
                .current_context
                .as_deref()
                .ok_or(ContextError::NoCurrentContext)?,
        };
        get_context(self, name)
    }
}

impl Context {
    /// Create a new context
    pub fn new(name: impl Into<String>, url: impl Into<String>, platform: PlatformFamily) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            platform,
            token: None,
            keystone: None,
            namespace: None,
            services: HashMap::new(),
            endpoints: EndpointTable::default(),
            timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_service(mut self, service: impl Into<String>, url: impl Into<String>) -> Self {
        self.services.insert(service.into(), url.into());
        self
    }

    pub fn with_keystone(mut self, auth: KeystoneAuth) -> Self {
        self.keystone = Some(auth);
        self
    }

    /// The token with environment references expanded
    pub fn resolved_token(&self) -> Result<Option<String>, ContextError> {
        self.token.as_deref().map(expand).transpose()
    }
}
