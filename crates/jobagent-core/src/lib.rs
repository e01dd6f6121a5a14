//! Shared building blocks for the jobagent workspace: identifier newtypes,
//! the configuration model and the core error type.

pub mod config;
pub mod error;
pub mod types;

pub use config::JobagentConfig;
pub use error::{CoreError, Result};
pub use types::{AgentId, JobId};
