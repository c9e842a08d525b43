//! Protocol Module
//!
//! Defines the wire protocol between store clients and the store server.
//!
//! ## Protocol Format (Simple Binary)
//!
//! ### Request Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Cmd (1)  │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Commands
//! - 0x01: GET    - Payload: key_len (4) + key
//! - 0x02: SET    - Payload: key_len (4) + key + ttl_ms (8) + value
//! - 0x03: DEL    - Payload: key_len (4) + key
//! - 0x04: PING   - Payload: empty
//! - 0x05: SETNX  - Payload: key_len (4) + key + ttl_ms (8) + value
//! - 0x06: DELEQ  - Payload: key_len (4) + key + expected
//! - 0x07: INCR   - Payload: key_len (4) + key
//!
//! ### Response Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │Status(1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Status Codes
//! - 0x00: OK
//! - 0x01: NOT_FOUND
//! - 0x02: ERROR

mod command;
mod response;
mod codec;

pub use command::{Command, CommandType};
pub use response::{Response, Status};
pub use codec::{
    decode_command, decode_response, encode_command, encode_response, read_command,
    read_response, write_command, write_response, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
