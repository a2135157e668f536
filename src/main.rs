//! agentdeck entrypoint: bootstraps configuration, storage, and the
//! terminal backend, rehydrates any sessions already running, and serves
//! the HTTP surface until told to shut down.

use std::sync::Arc;

use agentdeck::config::Settings;
use agentdeck::orchestrator::Orchestrator;
use agentdeck::output_log::OutputLog;
use agentdeck::tmux::{TmuxClient, TmuxClientConfig};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "agentdeck", about = "Multiplexing control plane for terminal coding agents")]
struct Cli {
    /// Override the bind address (host:port) from config.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(bind) = cli.bind {
        settings.bind_addr = bind;
    }
    info!(state_dir = %settings.state_dir, bind_addr = %settings.bind_addr, "starting agentdeck");

    let tmux = TmuxClient::with_config(TmuxClientConfig {
        pane_width: settings.tmux_pane_width,
        pane_height: settings.tmux_pane_height,
        scrollback_lines: settings.tmux_scrollback_lines,
        ..Default::default()
    })?;

    let log = Arc::new(OutputLog::open(&settings.db_path())?);
    let orchestrator = Arc::new(Orchestrator::new(tmux, log, settings.clone()));

    orchestrator.load_recent_dirs().await?;
    orchestrator.rehydrate().await?;

    let cancel = CancellationToken::new();
    let capture_task = {
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        let interval = std::time::Duration::from_secs(settings.capture_interval_s.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => orchestrator.tick(),
                }
            }
        })
    };

    let app = agentdeck::http::router(orchestrator.clone());
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!(addr = %settings.bind_addr, "listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    cancel.cancel();
    if let Err(err) = capture_task.await {
        error!(error = %err, "capture loop task panicked");
    }
    orchestrator.output_log().close();

    serve_result.map_err(Into::into)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
