use anyhow::{anyhow, Context};
use clap::Parser;
use screenshot_scout::{setup_logging, Cli, CliRunner};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    setup_logging(args.verbose).map_err(|e| anyhow!("logging setup failed: {e}"))?;

    info!("Starting screenshot-scout v{}", env!("CARGO_PKG_VERSION"));

    let config = args
        .load_config()
        .await
        .with_context(|| format!("loading {}", args.config.display()))?;

    let runner = CliRunner::new(config);

    let (shutdown_tx, _) = broadcast::channel(1);
    let _shutdown_handler = setup_shutdown_handler(shutdown_tx.clone());

    if let Err(e) = runner.run(args.command, shutdown_tx).await {
        error!("Application error: {}", e);
        return Err(e.into());
    }

    info!("screenshot-scout stopped");
    Ok(())
}

fn setup_shutdown_handler(shutdown_tx: broadcast::Sender<()>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                if signal::ctrl_c().await.is_ok() {
                    info!("Received SIGINT");
                    let _ = shutdown_tx.send(());
                }
                return;
            }
        };

        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for SIGINT: {}", e);
                    return;
                }
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }

        let _ = shutdown_tx.send(());
    })
}
