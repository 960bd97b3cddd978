use std::sync::Arc;

use anyhow::Context;
use chanop_controller::config::loader::{DEFAULT_CONFIG_PATH, load_config};
use chanop_controller::manifest::{apply_manifest, load_manifest};
use chanop_controller::observability::{apply_logging_level, init_tracing};
use chanop_controller::{ChannelReconciler, Controller};
use chanop_slack::{RetryingTransport, SlackClient};
use chanop_store::InMemoryChannelStore;
use clap::Parser;
use tokio_util::sync::CancellationToken;

/// Reconciles Channel resources against a Slack workspace.
#[derive(Debug, Parser)]
#[command(name = "chanop", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, env = "CHANOP_CONFIG")]
    config: Option<String>,

    /// Channel manifest loaded into the store at startup
    #[arg(long, env = "CHANOP_MANIFEST")]
    manifest: Option<String>,

    /// Log level, overrides the configured one (RUST_LOG still wins)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    let cli = Cli::parse();
    init_tracing();

    let cfg = load_config(cli.config.as_deref()).context("configuration error")?;
    tracing::info!(
        path = cli.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH),
        api_url = %cfg.slack.api_url,
        retry_max = cfg.transport.retry_max,
        "Configuration loaded"
    );
    apply_logging_level(cli.log_level.as_deref().unwrap_or(&cfg.logging.level));

    let cancel = CancellationToken::new();
    let transport = RetryingTransport::from_policy(cfg.transport.clone())
        .context("failed to build HTTP client")?
        .with_cancellation(cancel.clone());
    let api = Arc::new(SlackClient::with_retrying_transport(
        &cfg.slack.api_url,
        cfg.slack.token.clone(),
        transport,
    ));

    let store = Arc::new(InMemoryChannelStore::new());
    if let Some(path) = cli.manifest.as_deref() {
        let manifest = load_manifest(path).context("manifest error")?;
        apply_manifest(&store, manifest).context("failed to apply manifest")?;
    }
    let reconciler = Arc::new(ChannelReconciler::new(
        store.clone(),
        api,
        &cfg.controller,
    ));
    let controller = Controller::new(reconciler, store, cfg.controller.clone());

    let handle = tokio::spawn(controller.run(cancel.clone()));
    shutdown_signal().await;
    tracing::info!("Shutdown signal received");
    cancel.cancel();

    handle.await.context("controller task failed")??;
    tracing::info!("Controller stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}
