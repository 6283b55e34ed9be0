use std::path::PathBuf;
use std::sync::Arc;

use fetchd::api::{ApiServer, ApiServerConfig, AppState};
use fetchd::config::AppConfig;
use fetchd::logging;
use fetchd::runner::GrabberTool;
use fetchd::scheduler::Orchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before anything reads them.
    dotenvy::dotenv().ok();

    let log_dir = std::env::var("FETCHD_LOG_DIR").ok().map(PathBuf::from);
    let _log_guard = logging::init(log_dir.as_deref());

    let config = AppConfig::from_env_or_default();
    tracing::info!(
        workers = config.orchestrator.workers,
        tool = %config.tool.binary,
        output_dir = %config.tool.output_dir.display(),
        "fetchd starting"
    );

    let tool = Arc::new(GrabberTool::new(config.tool.clone()));
    let orchestrator = Orchestrator::new(config.orchestrator.clone(), tool);
    orchestrator.start();

    let server = ApiServer::with_state(
        ApiServerConfig::from_env_or_default(),
        AppState::new(orchestrator.clone()),
    );

    // Ctrl-C triggers graceful shutdown of the HTTP server first, then the
    // worker pool (which terminates any running tool processes).
    let cancel = server.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    server.run().await?;
    orchestrator.stop().await;

    tracing::info!("fetchd stopped");
    Ok(())
}
