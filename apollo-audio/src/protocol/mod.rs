//! Control protocol codec: framing, checksums and the command set.

pub mod command;
pub mod frame;

pub use command::{Command, Request};
pub use frame::{decode, encode, Message};

use crate::error::{Error, Result};

/// Split a response payload into its status word and data.
///
/// A non-zero status is the device refusing the request.
pub fn split_status(payload: &[u8]) -> Result<&[u8]> {
    let status = command::word(payload, 0)?;
    if status != 0 {
        return Err(Error::Device(status));
    }
    Ok(&payload[2..])
}

/// Build a response payload: status word followed by `data`.
pub fn response_payload(status: u16, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + data.len());
    out.extend_from_slice(&status.to_le_bytes());
    out.extend_from_slice(data);
    out
}
