use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Missing or invalid schedule / handler options.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A job with this name is already registered on the agent.
    #[error("Duplicate job name: {name}")]
    DuplicateName { name: String },

    /// Stop was requested on a job that is idle.
    #[error("Job not running: {name}")]
    NotRunning { name: String },

    /// The operation is not allowed in the current lifecycle state
    /// (renaming a running job, starting an agent twice, ...).
    #[error("Invalid state: {0}")]
    State(String),

    /// The OS refused to spawn a job or agent thread.
    #[error("Failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Underlying SQLite / rusqlite error.
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SchedulerError {
    /// Short, stable error code suitable for log correlation.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Configuration(_) => "CONFIGURATION_ERROR",
            SchedulerError::DuplicateName { .. } => "DUPLICATE_NAME",
            SchedulerError::NotRunning { .. } => "NOT_RUNNING",
            SchedulerError::State(_) => "STATE_ERROR",
            SchedulerError::Spawn(_) => "SPAWN_ERROR",
            SchedulerError::Store(_) => "STORE_ERROR",
            SchedulerError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
