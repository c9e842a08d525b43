//! Response definitions
//!
//! Represents responses to store clients.

/// Message a server at its connection limit sends before closing
const CONNECTION_LIMIT_MESSAGE: &str = "too many connections";

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    NotFound = 0x01,
    Error = 0x02,
}

/// A response to send to client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code
    pub status: Status,

    /// Optional payload (value for GET, flag byte for SETNX/DEL/DELEQ,
    /// counter for INCR, error message for ERROR)
    pub payload: Option<Vec<u8>>,
}

impl Response {
    /// Create an OK response with optional payload
    pub fn ok(payload: Option<Vec<u8>>) -> Self {
        Self {
            status: Status::Ok,
            payload,
        }
    }

    /// Create a NOT_FOUND response
    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            payload: None,
        }
    }

    /// Create an ERROR response
    pub fn error(message: &str) -> Self {
        Self {
            status: Status::Error,
            payload: Some(message.as_bytes().to_vec()),
        }
    }

    /// ERROR sent to a connection refused at the connection limit
    pub fn connection_limit() -> Self {
        Self::error(CONNECTION_LIMIT_MESSAGE)
    }

    /// True for the reply built by `connection_limit`
    pub fn is_connection_limit(&self) -> bool {
        self.status == Status::Error
            && self.payload.as_deref() == Some(CONNECTION_LIMIT_MESSAGE.as_bytes())
    }

    /// Interpret a one-byte flag payload (`[1]` = true)
    pub fn flag(&self) -> bool {
        matches!(self.payload.as_deref(), Some([1]))
    }

    /// Error message carried by an ERROR response
    pub fn error_message(&self) -> Option<String> {
        match self.status {
            Status::Error => Some(
                self.payload
                    .as_deref()
                    .map(|p| String::from_utf8_lossy(p).into_owned())
                    .unwrap_or_default(),
            ),
            _ => None,
        }
    }
}
