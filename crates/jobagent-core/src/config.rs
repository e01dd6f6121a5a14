use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000; // agent loop tick
pub const DEFAULT_LOG_FILTER: &str = "jobagent=info";
pub const ENV_PREFIX: &str = "JOBAGENT_";

/// Top-level config (jobagent.toml + JOBAGENT_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobagentConfig {
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Settings applied to a scheduler Agent when it is built from config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Display name. Defaults to `Agent-<id>` when unset.
    pub name: Option<String>,
    /// Polling period of the dispatch loop, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

/// Where job state snapshots are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// When false, no state is loaded on start or dumped on shutdown.
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `tracing_subscriber::EnvFilter` directive used when RUST_LOG is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.jobagent/jobagent.db", home)
}

/// Layered config sources: the TOML file, then `JOBAGENT_*` env vars.
///
/// Nested keys use a double underscore, e.g.
/// `JOBAGENT_AGENT__POLL_INTERVAL_MS=250`. Binaries that extend the config
/// with their own sections extract their own type from this figment.
pub fn figment(config_path: Option<&str>) -> Figment {
    let path = config_path
        .map(String::from)
        .unwrap_or_else(default_config_path);

    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

impl JobagentConfig {
    /// Load config from a TOML file with JOBAGENT_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.jobagent/jobagent.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        figment(config_path)
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.jobagent/jobagent.toml", home)
}
