//! TCP Server
//!
//! Accepts connections and hands each one to a handler thread.

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::error::Result;
use crate::protocol::{write_response, Response};
use crate::store::SharedStore;
use super::Connection;

/// How long the accept loop sleeps when no client is waiting
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Cloneable flag that stops a running server
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    /// Ask the server to stop accepting and return from `run`
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// TCP server for the shared store
pub struct Server {
    config: Config,
    store: SharedStore,
    listener: TcpListener,
    shutdown: ShutdownHandle,
    active: Arc<AtomicUsize>,
}

impl Server {
    /// Bind the listen address from `config`
    pub fn bind(config: Config, store: SharedStore) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)?;
        listener.set_nonblocking(true)?;

        tracing::info!("Store server listening on {}", listener.local_addr()?);

        Ok(Self {
            config,
            store,
            listener,
            shutdown: ShutdownHandle::default(),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle that can stop `run` from another thread
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Number of connections currently being served
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Accept connections until shut down (blocking)
    ///
    /// In-flight connections are not interrupted; they end on their own
    /// read timeout or disconnect.
    pub fn run(&self) -> Result<()> {
        while !self.shutdown.is_shutdown() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if self.active.load(Ordering::SeqCst) >= self.config.max_connections {
                        tracing::warn!("Rejecting {}: connection limit reached", peer);
                        let mut stream = stream;
                        let _ = write_response(&mut stream, &Response::connection_limit());
                        continue;
                    }

                    if let Err(e) = self.spawn_connection(stream) {
                        tracing::warn!("Could not serve {}: {}", peer, e);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                }
            }
        }

        tracing::info!("Store server stopped accepting connections");
        Ok(())
    }

    fn spawn_connection(&self, stream: std::net::TcpStream) -> Result<()> {
        // Accepted sockets inherit non-blocking mode from the listener on some platforms
        stream.set_nonblocking(false)?;
        let mut connection = Connection::new(stream, Arc::clone(&self.store))?;
        connection.set_timeouts(self.config.read_timeout_ms, self.config.write_timeout_ms)?;

        let active = Arc::clone(&self.active);
        active.fetch_add(1, Ordering::SeqCst);

        let spawned = thread::Builder::new()
            .name(format!("conn-{}", connection.peer_addr()))
            .spawn(move || {
                if let Err(e) = connection.handle() {
                    tracing::debug!("Connection {} ended with error: {}", connection.peer_addr(), e);
                }
                active.fetch_sub(1, Ordering::SeqCst);
            });

        if let Err(e) = spawned {
            self.active.fetch_sub(1, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok(())
    }
}
