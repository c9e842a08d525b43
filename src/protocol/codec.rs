//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! ### Request (Command) Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Cmd (1)  │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Payload by Command Type
//! - GET / DEL / INCR: key_len (4) + key
//! - SET / SETNX:      key_len (4) + key + ttl_ms (8) + value
//! - DELEQ:            key_len (4) + key + expected
//! - PING:             empty
//!
//! ### Response Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │Status(1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```

use std::io::{Read, Write};

use bytes::{BufMut, BytesMut};

use crate::error::{FlashError, Result};
use super::{Command, Response, Status};

/// Header size: 1 byte command/status + 4 bytes length
pub const HEADER_SIZE: usize = 5;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Size of the TTL field in SET / SETNX payloads
const TTL_SIZE: usize = 8;

// =============================================================================
// Command Encoding/Decoding
// =============================================================================

/// Encode a command to bytes
///
/// Format: cmd_type (1) + payload_len (4) + payload
pub fn encode_command(command: &Command) -> Vec<u8> {
    let mut payload = BytesMut::new();

    match command {
        Command::Get { key } | Command::Delete { key } | Command::Incr { key } => {
            put_key(&mut payload, key);
        }
        Command::Set { key, value, ttl_ms } | Command::SetIfAbsent { key, value, ttl_ms } => {
            payload.reserve(4 + key.len() + TTL_SIZE + value.len());
            put_key(&mut payload, key);
            payload.put_u64(*ttl_ms);
            payload.put_slice(value);
        }
        Command::DeleteIfEquals { key, expected } => {
            put_key(&mut payload, key);
            payload.put_slice(expected);
        }
        Command::Ping => {}
    }

    frame(command.command_type() as u8, &payload)
}

/// Decode a command from bytes
pub fn decode_command(bytes: &[u8]) -> Result<Command> {
    let (cmd_type, payload) = split_frame(bytes, "command")?;

    match cmd_type {
        0x01 => {
            let (key, rest) = take_key(payload, "GET")?;
            expect_empty(rest, "GET")?;
            Ok(Command::Get { key })
        }
        0x02 => {
            let (key, ttl_ms, value) = take_key_ttl_value(payload, "SET")?;
            Ok(Command::Set { key, value, ttl_ms })
        }
        0x03 => {
            let (key, rest) = take_key(payload, "DEL")?;
            expect_empty(rest, "DEL")?;
            Ok(Command::Delete { key })
        }
        0x04 => {
            expect_empty(payload, "PING")?;
            Ok(Command::Ping)
        }
        0x05 => {
            let (key, ttl_ms, value) = take_key_ttl_value(payload, "SETNX")?;
            Ok(Command::SetIfAbsent { key, value, ttl_ms })
        }
        0x06 => {
            let (key, rest) = take_key(payload, "DELEQ")?;
            Ok(Command::DeleteIfEquals {
                key,
                expected: rest.to_vec(),
            })
        }
        0x07 => {
            let (key, rest) = take_key(payload, "INCR")?;
            expect_empty(rest, "INCR")?;
            Ok(Command::Incr { key })
        }
        _ => Err(FlashError::Protocol(format!(
            "Unknown command type: 0x{:02x}",
            cmd_type
        ))),
    }
}

fn put_key(buf: &mut BytesMut, key: &[u8]) {
    buf.put_u32(key.len() as u32);
    buf.put_slice(key);
}

/// Split `key_len (4) + key` off the front of a payload
fn take_key<'a>(payload: &'a [u8], name: &str) -> Result<(Vec<u8>, &'a [u8])> {
    if payload.len() < 4 {
        return Err(FlashError::Protocol(format!(
            "{} command: missing key length",
            name
        )));
    }

    let key_len = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;

    if payload.len() - 4 < key_len {
        return Err(FlashError::Protocol(format!(
            "{} command: incomplete key (expected {}, got {})",
            name,
            key_len,
            payload.len() - 4
        )));
    }

    Ok((payload[4..4 + key_len].to_vec(), &payload[4 + key_len..]))
}

fn take_key_ttl_value(payload: &[u8], name: &str) -> Result<(Vec<u8>, u64, Vec<u8>)> {
    let (key, rest) = take_key(payload, name)?;

    if rest.len() < TTL_SIZE {
        return Err(FlashError::Protocol(format!(
            "{} command: missing ttl",
            name
        )));
    }

    let mut ttl = [0u8; TTL_SIZE];
    ttl.copy_from_slice(&rest[..TTL_SIZE]);

    Ok((key, u64::from_be_bytes(ttl), rest[TTL_SIZE..].to_vec()))
}

fn expect_empty(rest: &[u8], name: &str) -> Result<()> {
    if !rest.is_empty() {
        return Err(FlashError::Protocol(format!(
            "{} command: unexpected trailing {} bytes",
            name,
            rest.len()
        )));
    }
    Ok(())
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a response to bytes
///
/// Format: status (1) + payload_len (4) + payload
pub fn encode_response(response: &Response) -> Vec<u8> {
    let payload = response.payload.as_deref().unwrap_or(&[]);
    frame(response.status as u8, payload)
}

/// Decode a response from bytes
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    let (status_byte, payload) = split_frame(bytes, "response")?;

    let status = match status_byte {
        0x00 => Status::Ok,
        0x01 => Status::NotFound,
        0x02 => Status::Error,
        _ => {
            return Err(FlashError::Protocol(format!(
                "Unknown response status: 0x{:02x}",
                status_byte
            )))
        }
    };

    let payload = if payload.is_empty() {
        None
    } else {
        Some(payload.to_vec())
    };

    Ok(Response { status, payload })
}

// =============================================================================
// Framing
// =============================================================================

fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut message = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    message.put_u8(tag);
    message.put_u32(payload.len() as u32);
    message.put_slice(payload);
    message.to_vec()
}

fn payload_len(header: &[u8], what: &str) -> Result<usize> {
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);

    if len > MAX_PAYLOAD_SIZE {
        return Err(FlashError::Protocol(format!(
            "{} payload too large: {} bytes (max {})",
            what, len, MAX_PAYLOAD_SIZE
        )));
    }

    Ok(len as usize)
}

fn split_frame<'a>(bytes: &'a [u8], what: &str) -> Result<(u8, &'a [u8])> {
    if bytes.len() < HEADER_SIZE {
        return Err(FlashError::Protocol(format!(
            "Incomplete {} header: expected {} bytes, got {}",
            what,
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let len = payload_len(bytes, what)?;
    let total_len = HEADER_SIZE + len;

    if bytes.len() < total_len {
        return Err(FlashError::Protocol(format!(
            "Incomplete {} payload: expected {} bytes, got {}",
            what,
            total_len,
            bytes.len()
        )));
    }

    Ok((bytes[0], &bytes[HEADER_SIZE..total_len]))
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read one complete frame (header + payload) from a stream
fn read_frame<R: Read>(reader: &mut R, what: &str) -> Result<Vec<u8>> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let len = payload_len(&header, what)?;

    let mut message = vec![0u8; HEADER_SIZE + len];
    message[..HEADER_SIZE].copy_from_slice(&header);
    if len > 0 {
        reader.read_exact(&mut message[HEADER_SIZE..])?;
    }

    Ok(message)
}

/// Read a complete command from a stream
///
/// Blocks until a complete command is received or an error occurs
pub fn read_command<R: Read>(reader: &mut R) -> Result<Command> {
    let message = read_frame(reader, "command")?;
    decode_command(&message)
}

/// Write a command to a stream
pub fn write_command<W: Write>(writer: &mut W, command: &Command) -> Result<()> {
    let bytes = encode_command(command);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read a complete response from a stream
pub fn read_response<R: Read>(reader: &mut R) -> Result<Response> {
    let message = read_frame(reader, "response")?;
    decode_response(&message)
}

/// Write a response to a stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    let bytes = encode_response(response);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
