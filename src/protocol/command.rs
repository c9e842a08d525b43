//! Command definitions
//!
//! Represents commands from store clients.

/// Command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    Get = 0x01,
    Set = 0x02,
    Delete = 0x03,
    Ping = 0x04,
    SetIfAbsent = 0x05,
    DeleteIfEquals = 0x06,
    Incr = 0x07,
}

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Get a value by key
    Get { key: Vec<u8> },

    /// Overwrite a value (`ttl_ms == 0` means no native TTL)
    Set {
        key: Vec<u8>,
        value: Vec<u8>,
        ttl_ms: u64,
    },

    /// Delete a key
    Delete { key: Vec<u8> },

    /// Ping (health check)
    Ping,

    /// Atomic set-if-absent with TTL (lock acquire)
    SetIfAbsent {
        key: Vec<u8>,
        value: Vec<u8>,
        ttl_ms: u64,
    },

    /// Atomic compare-and-delete (lock release)
    DeleteIfEquals { key: Vec<u8>, expected: Vec<u8> },

    /// Atomic counter increment
    Incr { key: Vec<u8> },
}

impl Command {
    /// Get the command type
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Get { .. } => CommandType::Get,
            Command::Set { .. } => CommandType::Set,
            Command::Delete { .. } => CommandType::Delete,
            Command::Ping => CommandType::Ping,
            Command::SetIfAbsent { .. } => CommandType::SetIfAbsent,
            Command::DeleteIfEquals { .. } => CommandType::DeleteIfEquals,
            Command::Incr { .. } => CommandType::Incr,
        }
    }
}
