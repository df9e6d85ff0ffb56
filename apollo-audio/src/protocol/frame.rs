//! Control frame encoding and decoding.
//!
//! ```text
//!  0        4        6        8                 len-4     len
//!  ┌────────┬────────┬────────┬─────────────────┬─────────┐
//!  │ "APLO" │ length │command │ payload …       │ CRC-32  │
//!  └────────┴────────┴────────┴─────────────────┴─────────┘
//!    magic    u16 LE   u16 LE                     u32 LE
//! ```
//!
//! `length` counts the whole frame. The CRC covers every byte before it
//! and is checked before any other field is looked at, so a corrupted
//! length or command byte is reported as a checksum error rather than
//! misparsed.

use crate::error::{Error, FrameDefect, Result};

use super::command::Command;

pub const MAGIC: [u8; 4] = *b"APLO";

pub const HEADER_LEN: usize = 8;
pub const CHECKSUM_LEN: usize = 4;

/// Header plus checksum with an empty payload.
pub const MIN_FRAME_LEN: usize = HEADER_LEN + CHECKSUM_LEN;

pub const MAX_FRAME_LEN: usize = u16::MAX as usize;
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - MIN_FRAME_LEN;

/// A verified control message. Fields cannot change after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    command: Command,
    payload: Vec<u8>,
}

impl Message {
    pub fn new(command: Command, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::MalformedFrame(FrameDefect::PayloadTooLong {
                len: payload.len(),
            }));
        }
        Ok(Self { command, payload })
    }

    /// For payloads known to fit, such as the fixed-size request layouts.
    pub(crate) fn from_parts(command: Command, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD_LEN);
        Self { command, payload }
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Serialize with a freshly computed checksum.
    pub fn encode(&self) -> Vec<u8> {
        let len = MIN_FRAME_LEN + self.payload.len();
        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&(len as u16).to_le_bytes());
        out.extend_from_slice(&self.command.code().to_le_bytes());
        out.extend_from_slice(&self.payload);
        let crc = crc32(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }
}

/// Build and serialize a frame in one step.
pub fn encode(command: Command, payload: &[u8]) -> Result<Vec<u8>> {
    Ok(Message::new(command, payload.to_vec())?.encode())
}

/// Parse and verify a received frame.
pub fn decode(bytes: &[u8]) -> Result<Message> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(Error::MalformedFrame(FrameDefect::TooShort { len: bytes.len() }));
    }

    let (body, trailer) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    let received = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = crc32(body);
    if received != computed {
        return Err(Error::Checksum { received, computed });
    }

    let declared = usize::from(u16::from_le_bytes([body[4], body[5]]));
    if declared != bytes.len() {
        return Err(Error::MalformedFrame(FrameDefect::LengthMismatch {
            declared,
            actual: bytes.len(),
        }));
    }
    if body[..4] != MAGIC {
        return Err(Error::MalformedFrame(FrameDefect::BadMagic));
    }

    let code = u16::from_le_bytes([body[6], body[7]]);
    let command = Command::from_code(code)
        .ok_or(Error::MalformedFrame(FrameDefect::UnknownCommand(code)))?;

    Ok(Message {
        command,
        payload: body[HEADER_LEN..].to_vec(),
    })
}

/// CRC-32 (IEEE 802.3, reflected polynomial 0xEDB88320).
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}
