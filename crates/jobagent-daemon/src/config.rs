use jobagent_core::{config::figment, CoreError, JobagentConfig};
use jobagent_scheduler::ScheduleConfig;
use serde::Deserialize;

/// Daemon config: the shared sections plus the `[[jobs]]` it runs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(flatten)]
    pub base: JobagentConfig,
    #[serde(default)]
    pub jobs: Vec<CommandJob>,
}

/// A shell command run on a schedule.
///
/// ```toml
/// [[jobs]]
/// name = "backup"
/// command = "tar czf /tmp/home.tgz ~"
///
/// [jobs.schedule]
/// interval = 3600
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CommandJob {
    pub name: String,
    pub command: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// The command is killed once it runs this long.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl DaemonConfig {
    pub fn load(config_path: Option<&str>) -> jobagent_core::Result<Self> {
        figment(config_path)
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))
    }
}

pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;

fn bool_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}
