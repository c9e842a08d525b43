//! flashsale Store Server
//!
//! Serves an in-memory shared store (cache entries, locks, id counters)
//! over TCP.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use flashsale::network::Server;
use flashsale::{Config, MemoryStore, SharedStore};
use tracing_subscriber::{fmt, EnvFilter};

/// flashsale shared store
#[derive(Parser, Debug)]
#[command(name = "flashsale-store")]
#[command(about = "Shared key-value store for caches, locks and id counters")]
#[command(version)]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:6380")]
    listen: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Idle connection timeout in milliseconds (0 = never)
    #[arg(short = 't', long, default_value = "5000")]
    idle_timeout_ms: u64,

    /// Seconds between sweeps of expired entries
    #[arg(long, default_value = "60")]
    purge_interval_secs: u64,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,flashsale=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("flashsale store v{}", flashsale::VERSION);

    let config = Config::builder()
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .read_timeout_ms(args.idle_timeout_ms)
        .build();

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let memory = Arc::new(MemoryStore::new());

    // Lazy expiry keeps reads correct; this only reclaims memory
    if args.purge_interval_secs > 0 {
        let memory = Arc::clone(&memory);
        let interval = Duration::from_secs(args.purge_interval_secs);
        thread::spawn(move || loop {
            thread::sleep(interval);
            let purged = memory.purge_expired();
            if purged > 0 {
                tracing::debug!("Purged {} expired entries", purged);
            }
        });
    }

    let store: SharedStore = memory;
    let server = match Server::bind(config, store) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", args.listen, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
