//! Facemask - self-destructing image drop with face blurring
//!
//! Accepts image uploads, blurs every detected face and serves each stored
//! result exactly once.

use clap::Parser;
use facemask::{
    config::Config,
    metrics::server::{MetricsServer, MetricsServerConfig},
    server::Server,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Facemask - upload an image, get it back once with every face blurred
#[derive(Parser, Debug)]
#[command(name = "facemask")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(args.log_level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Facemask v{}", facemask::VERSION);

    // Load configuration
    let config = Config::load(&args.config)?;
    info!("Loaded configuration from {:?}", args.config);

    // Metrics listener shares the server's host
    let mut metrics_server = if config.metrics.enabled {
        let host = config
            .server
            .address
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or("0.0.0.0");
        let mut metrics_server = MetricsServer::new(MetricsServerConfig {
            address: format!("{}:{}", host, config.metrics.port),
        });
        let addr = metrics_server.start().await?;
        info!("Metrics available at http://{}/metrics", addr);
        Some(metrics_server)
    } else {
        None
    };

    // Start server
    let server = Server::new(config).await?;
    server.run().await?;

    if let Some(metrics_server) = metrics_server.as_mut() {
        metrics_server.shutdown().await;
    }

    Ok(())
}
