//! Network Module
//!
//! TCP server exposing a shared store to remote clients.
//!
//! ## Architecture
//! - Single acceptor thread polling a shutdown flag
//! - One handler thread per connection, capped at `max_connections`
//! - Commands dispatched through `store::execute`

mod server;
mod connection;

pub use server::{Server, ShutdownHandle};
pub use connection::Connection;
