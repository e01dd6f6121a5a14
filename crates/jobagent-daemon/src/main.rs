use jobagent_scheduler::{Agent, SqliteJobStore};
use tracing::{info, warn};

mod command;
mod config;

use config::DaemonConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // load config: JOBAGENT_CONFIG env > ~/.jobagent/jobagent.toml
    let config_path = std::env::var("JOBAGENT_CONFIG").ok();
    let (config, load_error) = match DaemonConfig::load(config_path.as_deref()) {
        Ok(config) => (config, None),
        Err(e) => (DaemonConfig::default(), Some(e)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.base.logging.filter.as_str().into()),
        )
        .init();
    if let Some(e) = load_error {
        warn!("Config load failed ({}), using defaults", e);
    }

    let agent = Agent::with_settings(&config.base.agent);
    let runtime = tokio::runtime::Handle::current();
    for spec in &config.jobs {
        let job = command::register(&agent, spec, &runtime)?;
        info!(job_id = %job.id(), job = %spec.name, command = %spec.command, "command job registered");
    }

    let store = if config.base.store.enabled {
        let path = &config.base.store.path;
        ensure_parent_dir(path);
        info!(path = %path, "opening job store");
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = SqliteJobStore::new(conn)?;
        agent.load_jobs(&store)?;
        Some(store)
    } else {
        None
    };

    agent.start()?;
    info!(
        agent = %agent.name(),
        jobs = agent.get_all_jobs().len(),
        "jobagent running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    // stop() blocks until every running job is idle
    let stopping = agent.clone();
    tokio::task::spawn_blocking(move || stopping.stop()).await??;

    if let Some(store) = &store {
        let dumped = agent.dump_jobs(store)?;
        info!(count = dumped, "job state saved");
    }
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
