use anyhow::Context;
use clap::Parser;
use page_capture::{load_config, setup_logging, Cli, CliRunner};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    setup_logging(args.verbose);

    info!("Starting page-capture v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)
        .await
        .context("Failed to load configuration")?;

    let cli_runner = CliRunner::new(config);

    let result = tokio::select! {
        result = cli_runner.run(args.command) => result,
        _ = shutdown_signal() => {
            info!("Received shutdown signal");
            Ok(())
        }
    };

    info!("Shutting down...");
    cli_runner.coordinator.shutdown().await;

    if let Err(e) = &result {
        error!("Application error: {:#}", e);
    }

    info!("page-capture stopped");
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
