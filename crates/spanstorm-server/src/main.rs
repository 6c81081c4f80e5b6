use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use spanstorm::{ConfigStore, OtlpProtocol, TraceSpammer, TracingConfig};
use spanstorm_server::{run_server, AppState};

#[derive(Parser)]
#[command(name = "spanstorm")]
#[command(about = "Synthetic trace load generator for OTLP backends", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the generator and its control surface
    Serve {
        /// Host to bind the control surface to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port for the control surface
        #[arg(short, long, default_value = "1988")]
        port: u16,

        /// OTLP collector endpoint
        #[arg(long, default_value = "http://localhost:4317/")]
        endpoint: String,

        /// Export protocol: "grpc" or "http-protobuf"
        #[arg(long, default_value = "grpc")]
        protocol: OtlpProtocol,

        /// Root traces per second
        #[arg(long, default_value_t = 3)]
        rate: u32,

        /// Recursive levels below each root
        #[arg(long, default_value_t = 1)]
        depth: u32,

        /// Children per non-leaf span
        #[arg(long, default_value_t = 1)]
        children: u32,

        /// Minimum simulated child duration in milliseconds
        #[arg(long, default_value_t = 10)]
        min_child_ms: u64,

        /// Maximum simulated child duration in milliseconds
        #[arg(long, default_value_t = 100)]
        max_child_ms: u64,

        /// Begin generating immediately instead of waiting for /api/start
        #[arg(long)]
        start: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            endpoint,
            protocol,
            rate,
            depth,
            children,
            min_child_ms,
            max_child_ms,
            start,
        } => {
            let config = TracingConfig {
                endpoint,
                protocol,
                rate_per_second: rate,
                trace_depth: depth,
                children_per_node: children,
                min_child_duration_ms: min_child_ms,
                max_child_duration_ms: max_child_ms,
            };
            serve(host, port, config, start).await
        }
    }
}

async fn serve(host: String, port: u16, config: TracingConfig, start: bool) -> anyhow::Result<()> {
    let store = Arc::new(ConfigStore::new(config).context("invalid initial configuration")?);
    let spammer = TraceSpammer::new(store.clone());
    if start {
        spammer.start();
    }

    let cancel = CancellationToken::new();

    let loop_task = tokio::spawn({
        let spammer = spammer.clone();
        let cancel = cancel.clone();
        async move { spammer.run(cancel).await }
    });

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
            }
            cancel.cancel();
        }
    });

    let state = AppState { store, spammer };
    let result = run_server(&host, port, state, cancel.clone()).await;

    // The loop exits within one suspension point of the cancel.
    cancel.cancel();
    if let Err(err) = loop_task.await {
        tracing::warn!(error = %err, "spammer task ended abnormally");
    }

    result
}
