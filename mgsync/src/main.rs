use anyhow::Context;
use clap::Parser;
use mgsync::{Application, Config, config::Args, telemetry};
use tracing::{error, info};

/// Resolves on SIGTERM or Ctrl+C. A handler that cannot be installed is logged and never fires,
/// so the other signal still stops the gateway.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Cannot listen for Ctrl+C: {}", e);
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
                error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl+C received, draining sync worker and HTTP server"),
        _ = terminate => info!("SIGTERM received, draining sync worker and HTTP server"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // reqwest is built without a default provider
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("a rustls crypto provider is already installed"))?;

    let args = Args::parse();
    let config = Config::load(&args).with_context(|| format!("loading configuration from {}", args.config))?;

    if args.validate {
        println!("Configuration in {} is valid.", args.config);
        return Ok(());
    }

    telemetry::init_telemetry(config.enable_otel_export, config.log_format)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config,
        database = if config.database.is_memory() { "memory" } else { "postgres" },
        upstream = %config.upstream.base_url,
        "Starting Model Garden sync gateway"
    );

    let app = Application::new(config).await.context("initializing gateway")?;
    app.serve(shutdown_signal()).await
}
