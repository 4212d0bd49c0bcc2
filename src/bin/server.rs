//! docwire Server Binary
//!
//! Serves the in-memory engine over OP_MSG.

use std::sync::Arc;

use clap::Parser;
use docwire::network::Server;
use docwire::{Engine, ServerConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// docwire reference server
#[derive(Parser, Debug)]
#[command(name = "docwire-server")]
#[command(about = "In-memory document server speaking OP_MSG")]
#[command(version)]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:27017")]
    listen: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Close connections idle for this long (0 = never)
    #[arg(short, long, default_value = "0")]
    read_timeout_ms: u64,
}

#[tokio::main]
async fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,docwire=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("docwire server v{}", docwire::VERSION);
    tracing::info!("Listen address: {}", args.listen);

    // Build config from args
    let config = ServerConfig::builder()
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .read_timeout_ms(args.read_timeout_ms)
        .build();

    let engine = Arc::new(Engine::new());

    let server = match Server::bind(config, engine).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to start server: {}", e);
            std::process::exit(1);
        }
    };

    // Stop accepting on Ctrl+C
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
            shutdown.shutdown();
        }
    });

    if let Err(e) = server.run().await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
