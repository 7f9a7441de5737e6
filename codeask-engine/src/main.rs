//! Codeask - terminal entry point.

use anyhow::{Context, Result};
use codeask_common::config::Config;
use codeask_common::logging::init_logging_with_exclusions;
use codeask_common::Validate;
use codeask_engine::cli::{self, StdoutSink};
use codeask_engine::{Engine, HttpAgentRuntime, SessionStore, ThreadBridge};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load_with_env()?;
    config.validate()?;

    // Initialize logging
    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("Codeask v{}", env!("CARGO_PKG_VERSION"));

    let db_path = config.store.resolved_path();
    let store = Arc::new(
        SessionStore::open(&db_path)
            .with_context(|| format!("opening session store at {}", db_path.display()))?,
    );
    tracing::info!(path = %db_path.display(), threads = store.count()?, "Session store ready");

    let runtime = Arc::new(HttpAgentRuntime::new(&config.runtime)?);
    tracing::info!(endpoint = %runtime.endpoint(), "Agent runtime configured");

    let engine = Arc::new(Engine::from_config(&config, store, runtime));
    let bridge = ThreadBridge::new(engine, Arc::new(StdoutSink::new()));

    cli::run(&bridge).await?;
    Ok(())
}
