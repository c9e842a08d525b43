//! Remote store client
//!
//! Speaks the wire protocol to a running store server.

use std::io::{BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{FlashError, Result};
use crate::protocol::{read_response, write_command, Command, Response, Status};
use super::{ttl_to_ms, KvStore};

/// Idle connections kept around for reuse
const MAX_IDLE_CONNECTIONS: usize = 16;

/// One open client connection
struct ClientConn {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl ClientConn {
    fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let sock_addr = addr
            .to_socket_addrs()
            .map_err(|e| FlashError::StoreUnavailable(format!("resolve {}: {}", addr, e)))?
            .next()
            .ok_or_else(|| FlashError::StoreUnavailable(format!("no address for {}", addr)))?;

        let stream = TcpStream::connect_timeout(&sock_addr, timeout)
            .map_err(|e| FlashError::StoreUnavailable(format!("connect {}: {}", addr, e)))?;

        let unavailable = |e: std::io::Error| FlashError::StoreUnavailable(format!("{}: {}", addr, e));
        stream.set_nodelay(true).map_err(unavailable)?;
        stream.set_read_timeout(Some(timeout)).map_err(unavailable)?;
        stream.set_write_timeout(Some(timeout)).map_err(unavailable)?;

        let read_stream = stream.try_clone().map_err(unavailable)?;
        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
        })
    }

    fn round_trip(&mut self, command: &Command) -> Result<Response> {
        write_command(&mut self.writer, command)?;
        read_response(&mut self.reader)
    }
}

/// TCP client implementing `KvStore`
///
/// Any transport failure, or a refusal at the server's connection limit, is
/// reported as `StoreUnavailable` and the connection it happened on is
/// thrown away.
pub struct RemoteStore {
    addr: String,
    timeout: Duration,
    idle: Mutex<Vec<ClientConn>>,
}

impl RemoteStore {
    /// Create a client for `addr`. Connections are opened lazily.
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Create a client and verify the server answers
    pub fn connect(addr: impl Into<String>, timeout: Duration) -> Result<Self> {
        let store = Self::new(addr, timeout);
        store.ping()?;
        Ok(store)
    }

    /// Server address
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn call(&self, command: Command) -> Result<Response> {
        let pooled = self.idle.lock().pop();

        let response = match pooled {
            Some(mut conn) => match conn.round_trip(&command) {
                Ok(response) => {
                    self.recycle(conn);
                    response
                }
                // The server may have closed an idle connection; retry once fresh
                Err(FlashError::Io(e)) => {
                    tracing::debug!("Pooled connection to {} failed: {}", self.addr, e);
                    self.call_fresh(&command)?
                }
                Err(e) => return Err(e),
            },
            None => self.call_fresh(&command)?,
        };

        if let Some(message) = response.error_message() {
            return Err(FlashError::Protocol(format!("server error: {}", message)));
        }
        Ok(response)
    }

    fn call_fresh(&self, command: &Command) -> Result<Response> {
        let mut conn = ClientConn::connect(&self.addr, self.timeout)?;
        match conn.round_trip(command) {
            // Refused at accept; the server has already closed this socket
            Ok(response) if response.is_connection_limit() => Err(FlashError::StoreUnavailable(
                format!("{}: connection limit reached", self.addr),
            )),
            Ok(response) => {
                self.recycle(conn);
                Ok(response)
            }
            Err(FlashError::Io(e)) => {
                Err(FlashError::StoreUnavailable(format!("{}: {}", self.addr, e)))
            }
            Err(e) => Err(e),
        }
    }

    fn recycle(&self, conn: ClientConn) {
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(conn);
        }
    }
}

impl KvStore for RemoteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let response = self.call(Command::Get {
            key: key.as_bytes().to_vec(),
        })?;
        match response.status {
            // An empty stored value travels as an OK with no payload
            Status::Ok => Ok(Some(response.payload.unwrap_or_default())),
            _ => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.call(Command::Set {
            key: key.as_bytes().to_vec(),
            value: value.to_vec(),
            ttl_ms: ttl_to_ms(ttl),
        })?;
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let response = self.call(Command::SetIfAbsent {
            key: key.as_bytes().to_vec(),
            value: value.to_vec(),
            ttl_ms: ttl_to_ms(Some(ttl)),
        })?;
        Ok(response.flag())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let response = self.call(Command::Delete {
            key: key.as_bytes().to_vec(),
        })?;
        Ok(response.flag())
    }

    fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let response = self.call(Command::DeleteIfEquals {
            key: key.as_bytes().to_vec(),
            expected: expected.to_vec(),
        })?;
        Ok(response.flag())
    }

    fn incr(&self, key: &str) -> Result<i64> {
        let response = self.call(Command::Incr {
            key: key.as_bytes().to_vec(),
        })?;
        let payload = response.payload.unwrap_or_default();
        let bytes: [u8; 8] = payload.as_slice().try_into().map_err(|_| {
            FlashError::Protocol(format!("INCR reply of {} bytes", payload.len()))
        })?;
        Ok(i64::from_be_bytes(bytes))
    }

    fn ping(&self) -> Result<()> {
        self.call(Command::Ping)?;
        Ok(())
    }
}
