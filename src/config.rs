//! Server settings from the environment and the workspace `config.yaml`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

use crate::engine::{ShutdownPolicy, DEFAULT_LOCK_TIMEOUT, DEFAULT_QUIET};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8321;

/// Foundational guidance inherited by projects that do not say otherwise.
pub const DEFAULT_INHERIT: [&str; 2] = ["general", "ai-collaboration"];

/// Process settings, loaded from `WORKSYNC_*` environment variables.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Root of all WorkSync data (WORKSYNC_DATA_ROOT, default `~/.worksync`)
    pub data_root: PathBuf,
    /// Bind address (WORKSYNC_HOST)
    pub host: String,
    /// Bind port (WORKSYNC_PORT)
    pub port: u16,
    /// Regenerate the vault after mutations (WORKSYNC_AUTO_SYNC)
    pub auto_sync: bool,
    /// Quiet interval before a regeneration fires (WORKSYNC_SYNC_DEBOUNCE, seconds)
    pub sync_debounce: Duration,
    /// Bound on the project lock wait (WORKSYNC_LOCK_TIMEOUT, seconds)
    pub lock_timeout: Duration,
    /// Pending regenerations at shutdown (WORKSYNC_SHUTDOWN, flush or drop)
    pub shutdown: ShutdownPolicy,
    /// Bearer token required on `/mcp` (WORKSYNC_API_KEY)
    pub api_key: Option<String>,
    /// Allows serving without an API key (WORKSYNC_DEBUG)
    pub debug: bool,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable source. Unparseable
    /// values fall back to their defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let data_root = var("WORKSYNC_DATA_ROOT")
            .map(|v| expand_home(&v))
            .unwrap_or_else(default_data_root);

        Self {
            data_root,
            host: var("WORKSYNC_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or("WORKSYNC_PORT", var("WORKSYNC_PORT"), DEFAULT_PORT),
            auto_sync: var("WORKSYNC_AUTO_SYNC")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),
            sync_debounce: seconds_or(
                "WORKSYNC_SYNC_DEBOUNCE",
                var("WORKSYNC_SYNC_DEBOUNCE"),
                DEFAULT_QUIET,
            ),
            lock_timeout: seconds_or(
                "WORKSYNC_LOCK_TIMEOUT",
                var("WORKSYNC_LOCK_TIMEOUT"),
                DEFAULT_LOCK_TIMEOUT,
            ),
            shutdown: parse_or("WORKSYNC_SHUTDOWN", var("WORKSYNC_SHUTDOWN"), ShutdownPolicy::Flush),
            api_key: var("WORKSYNC_API_KEY"),
            debug: var("WORKSYNC_DEBUG").map(|v| parse_flag(&v)).unwrap_or(false),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

/// Contents of `<data_root>/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceConfig {
    /// Vault output directory, relative to the data root unless absolute.
    #[serde(default = "default_vault_path")]
    pub vault_path: String,
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectConfig>,
    #[serde(flatten)]
    pub extra: Mapping,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            vault_path: default_vault_path(),
            projects: BTreeMap::new(),
            extra: Mapping::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub guidance: GuidanceConfig,
    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GuidanceConfig {
    /// Foundational guidance names; [`DEFAULT_INHERIT`] when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherit: Option<Vec<String>>,
    /// Project-specific guidance documents.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub project: Vec<ProjectGuidance>,
}

impl GuidanceConfig {
    pub fn inherited(&self) -> Vec<String> {
        match &self.inherit {
            Some(names) => names.clone(),
            None => DEFAULT_INHERIT.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectGuidance {
    pub name: String,
    /// Where `path` is resolved from. Only `repo` is supported.
    #[serde(default = "default_source")]
    pub source: String,
    pub path: String,
}

fn default_vault_path() -> String {
    "./vault".to_string()
}

fn default_source() -> String {
    "repo".to_string()
}

fn default_data_root() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".worksync"))
        .unwrap_or_else(|| PathBuf::from(".worksync"))
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            tracing::warn!(key, value = %raw, error = %e, "Invalid setting, using default");
            default
        }),
    }
}

fn seconds_or(key: &str, value: Option<String>, default: Duration) -> Duration {
    match value {
        None => default,
        Some(raw) => match raw
            .parse::<f64>()
            .ok()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        {
            Some(duration) => duration,
            None => {
                tracing::warn!(key, value = %raw, "Invalid duration, using default");
                default
            }
        },
    }
}
