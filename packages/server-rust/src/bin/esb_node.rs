//! `esb-node`: runs a service domain behind the remote endpoint.
//!
//! # Environment Variables
//!
//! - `ESB_HOST`: bind address (default `0.0.0.0`)
//! - `ESB_PORT`: listen port (default `8080`)
//! - `RUST_LOG`: log filter (default `info`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use esb_core::TransactionManager;
use esb_server::bus::{BusConfig, ServiceDomain};
use esb_server::network::{NetworkConfig, NetworkModule};
use esb_server::transaction::LocalTransactionManager;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Exchange bus node
#[derive(Parser, Debug)]
#[command(name = "esb-node")]
#[command(version, about, long_about = None)]
struct Args {
    /// Bind address
    #[arg(long, env = "ESB_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Listen port (0 picks a free one)
    #[arg(long, env = "ESB_PORT", default_value_t = 8080)]
    port: u16,

    /// Service domain name
    #[arg(long, default_value = "default")]
    domain: String,

    /// Exchanges processed concurrently before load is shed
    #[arg(long, default_value_t = 1000)]
    max_concurrent: u32,

    /// Route accepting remote wire messages
    #[arg(long, default_value = "/remote")]
    remote_path: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    request_timeout: u64,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let bus_config = BusConfig {
        domain: args.domain,
        max_concurrent_exchanges: args.max_concurrent,
    };
    let manager: Arc<dyn TransactionManager> = Arc::new(LocalTransactionManager::new());
    let domain = Arc::new(
        ServiceDomain::builder(bus_config)
            .transaction_manager(manager)
            .build()?,
    );
    domain.start().await?;

    let mut network = NetworkModule::new(
        NetworkConfig {
            host: args.host,
            port: args.port,
            remote_path: args.remote_path,
            request_timeout: Duration::from_secs(args.request_timeout),
        },
        Arc::clone(&domain),
    );
    let port = network.start().await?;
    info!(domain = domain.name(), port, "esb-node started");

    network.serve(shutdown_signal()).await?;
    domain.stop().await?;
    info!("esb-node stopped");
    Ok(())
}
