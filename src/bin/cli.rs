//! flashsale CLI Client
//!
//! Command-line interface for the shared store.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use flashsale::{
    lock_key, Config, DistributedLock, IdGenerator, LockHandle, RemoteStore,
    SharedStore, SystemClock,
};

/// flashsale CLI
#[derive(Parser, Debug)]
#[command(name = "flashsale-cli")]
#[command(about = "CLI for the flashsale shared store")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:6380")]
    server: String,

    /// Network timeout in milliseconds
    #[arg(long, default_value = "2000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ping the server
    Ping,

    /// Get a value by key
    Get {
        key: String,
    },

    /// Set a key-value pair
    Set {
        key: String,
        value: String,

        /// Native TTL in milliseconds
        #[arg(long)]
        ttl_ms: Option<u64>,
    },

    /// Delete a key
    Del {
        key: String,
    },

    /// Increment a counter
    Incr {
        key: String,
    },

    /// Try to take lock:<resource>:<id> and print the owner token
    Lock {
        resource: String,
        id: String,

        #[arg(long, default_value = "10000")]
        ttl_ms: u64,
    },

    /// Release lock:<resource>:<id> if <token> still owns it
    Unlock {
        resource: String,
        id: String,
        token: String,
    },

    /// Mint the next identifier in a namespace
    NextId {
        namespace: String,
    },
}

fn main() {
    let args = Args::parse();

    let store: SharedStore = Arc::new(RemoteStore::new(
        args.server.clone(),
        Duration::from_millis(args.timeout_ms),
    ));

    if let Err(e) = run(store, args.command) {
        eprintln!("(error) {}", e);
        std::process::exit(1);
    }
}

fn run(store: SharedStore, command: Commands) -> flashsale::Result<()> {
    match command {
        Commands::Ping => {
            store.ping()?;
            println!("PONG");
        }
        Commands::Get { key } => match store.get(&key)? {
            Some(value) if value.is_empty() => println!("\"\""),
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(nil)"),
        },
        Commands::Set { key, value, ttl_ms } => {
            store.set(&key, value.as_bytes(), ttl_ms.map(Duration::from_millis))?;
            println!("OK");
        }
        Commands::Del { key } => {
            println!("{}", store.delete(&key)? as u8);
        }
        Commands::Incr { key } => {
            println!("{}", store.incr(&key)?);
        }
        Commands::Lock { resource, id, ttl_ms } => {
            let lock = DistributedLock::new(store);
            let key = lock_key(&resource, &id);
            match lock.try_acquire(&key, Duration::from_millis(ttl_ms))? {
                Some(handle) => println!("{}", handle.owner_token()),
                None => println!("(busy)"),
            }
        }
        Commands::Unlock { resource, id, token } => {
            let lock = DistributedLock::new(store);
            let handle = LockHandle::from_parts(lock_key(&resource, &id), token, Duration::ZERO);
            println!("{}", lock.release(&handle)? as u8);
        }
        Commands::NextId { namespace } => {
            let ids = IdGenerator::new(
                store,
                Arc::new(SystemClock),
                Config::default().id_epoch_secs,
            );
            let id = ids.next_id(&namespace)?;
            println!("{} (t={} seq={})", id, id.time_segment(), id.sequence());
        }
    }
    Ok(())
}
