//! Command codes and typed request payloads.
//!
//! [`Request`] is the closed set of operations the host can send. Each
//! variant knows its [`Command`] code and payload layout, so adding a
//! command is a compile error everywhere it is not handled.
//!
//! | command | request payload | response data (after status) |
//! |---------|-----------------|------------------------------|
//! | `Reset` | – | – |
//! | `Get/SetAnalogGain` | input, [raw u16] | raw u16 |
//! | `Get/SetPhantomPower` | input, [on] | on |
//! | `Get/SetInputSource` | channel, [source] | source |
//! | `Get/SetMonitorSource` | [source] | source |
//! | `Get/SetOutputGain` | side, [raw i16] | raw i16 |
//! | `Get/SetMonitorGain` | [raw i16] | raw i16 |
//! | `Get/SetHighPassFilter` | channel, [on, freq u16] | on, freq u16 |
//! | `Get/SetPad` | input, [on] | on |
//!
//! Every response payload starts with a `u16` status; zero means success.
//! Multi-byte fields are little-endian. Gains are in half-dB steps.

use crate::control::{InputSource, MonitorSource, OutputSide};
use crate::error::{Error, FrameDefect, Result};

use super::frame::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    Reset = 0x0001,
    GetAnalogGain = 0x0100,
    SetAnalogGain = 0x0101,
    GetPhantomPower = 0x0110,
    SetPhantomPower = 0x0111,
    GetInputSource = 0x0120,
    SetInputSource = 0x0121,
    GetMonitorSource = 0x0130,
    SetMonitorSource = 0x0131,
    GetOutputGain = 0x0140,
    SetOutputGain = 0x0141,
    GetMonitorGain = 0x0150,
    SetMonitorGain = 0x0151,
    GetHighPassFilter = 0x0160,
    SetHighPassFilter = 0x0161,
    GetPad = 0x0170,
    SetPad = 0x0171,
}

impl Command {
    pub const ALL: [Command; 17] = [
        Command::Reset,
        Command::GetAnalogGain,
        Command::SetAnalogGain,
        Command::GetPhantomPower,
        Command::SetPhantomPower,
        Command::GetInputSource,
        Command::SetInputSource,
        Command::GetMonitorSource,
        Command::SetMonitorSource,
        Command::GetOutputGain,
        Command::SetOutputGain,
        Command::GetMonitorGain,
        Command::SetMonitorGain,
        Command::GetHighPassFilter,
        Command::SetHighPassFilter,
        Command::GetPad,
        Command::SetPad,
    ];

    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

/// A host-to-device request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Reset,
    GetAnalogGain { input: u8 },
    SetAnalogGain { input: u8, raw: u16 },
    GetPhantomPower { input: u8 },
    SetPhantomPower { input: u8, enabled: bool },
    GetInputSource { channel: u8 },
    SetInputSource { channel: u8, source: InputSource },
    GetMonitorSource,
    SetMonitorSource { source: MonitorSource },
    GetOutputGain { side: OutputSide },
    SetOutputGain { side: OutputSide, raw: i16 },
    GetMonitorGain,
    SetMonitorGain { raw: i16 },
    GetHighPassFilter { channel: u8 },
    SetHighPassFilter { channel: u8, enabled: bool, freq_hz: u16 },
    GetPad { input: u8 },
    SetPad { input: u8, enabled: bool },
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::Reset => Command::Reset,
            Request::GetAnalogGain { .. } => Command::GetAnalogGain,
            Request::SetAnalogGain { .. } => Command::SetAnalogGain,
            Request::GetPhantomPower { .. } => Command::GetPhantomPower,
            Request::SetPhantomPower { .. } => Command::SetPhantomPower,
            Request::GetInputSource { .. } => Command::GetInputSource,
            Request::SetInputSource { .. } => Command::SetInputSource,
            Request::GetMonitorSource => Command::GetMonitorSource,
            Request::SetMonitorSource { .. } => Command::SetMonitorSource,
            Request::GetOutputGain { .. } => Command::GetOutputGain,
            Request::SetOutputGain { .. } => Command::SetOutputGain,
            Request::GetMonitorGain => Command::GetMonitorGain,
            Request::SetMonitorGain { .. } => Command::SetMonitorGain,
            Request::GetHighPassFilter { .. } => Command::GetHighPassFilter,
            Request::SetHighPassFilter { .. } => Command::SetHighPassFilter,
            Request::GetPad { .. } => Command::GetPad,
            Request::SetPad { .. } => Command::SetPad,
        }
    }

    pub fn payload(&self) -> Vec<u8> {
        match *self {
            Request::Reset | Request::GetMonitorSource | Request::GetMonitorGain => Vec::new(),
            Request::GetAnalogGain { input }
            | Request::GetPhantomPower { input }
            | Request::GetPad { input } => vec![input],
            Request::GetInputSource { channel } | Request::GetHighPassFilter { channel } => {
                vec![channel]
            }
            Request::SetAnalogGain { input, raw } => {
                let [lo, hi] = raw.to_le_bytes();
                vec![input, lo, hi]
            }
            Request::SetPhantomPower { input, enabled } | Request::SetPad { input, enabled } => {
                vec![input, u8::from(enabled)]
            }
            Request::SetInputSource { channel, source } => vec![channel, source.ordinal()],
            Request::SetMonitorSource { source } => vec![source.ordinal()],
            Request::GetOutputGain { side } => vec![side.ordinal()],
            Request::SetOutputGain { side, raw } => {
                let [lo, hi] = raw.to_le_bytes();
                vec![side.ordinal(), lo, hi]
            }
            Request::SetMonitorGain { raw } => raw.to_le_bytes().to_vec(),
            Request::SetHighPassFilter {
                channel,
                enabled,
                freq_hz,
            } => {
                let [lo, hi] = freq_hz.to_le_bytes();
                vec![channel, u8::from(enabled), lo, hi]
            }
        }
    }

    pub fn to_message(&self) -> Message {
        Message::from_parts(self.command(), self.payload())
    }

    /// Parse a request the way the device does.
    pub fn from_message(message: &Message) -> Result<Self> {
        let p = message.payload();
        let request = match message.command() {
            Command::Reset => Request::Reset,
            Command::GetAnalogGain => Request::GetAnalogGain { input: byte(p, 0)? },
            Command::SetAnalogGain => Request::SetAnalogGain {
                input: byte(p, 0)?,
                raw: u16::from_le_bytes([byte(p, 1)?, byte(p, 2)?]),
            },
            Command::GetPhantomPower => Request::GetPhantomPower { input: byte(p, 0)? },
            Command::SetPhantomPower => Request::SetPhantomPower {
                input: byte(p, 0)?,
                enabled: flag(p, 1)?,
            },
            Command::GetInputSource => Request::GetInputSource { channel: byte(p, 0)? },
            Command::SetInputSource => Request::SetInputSource {
                channel: byte(p, 0)?,
                source: InputSource::from_wire(byte(p, 1)?)?,
            },
            Command::GetMonitorSource => Request::GetMonitorSource,
            Command::SetMonitorSource => Request::SetMonitorSource {
                source: MonitorSource::from_wire(byte(p, 0)?)?,
            },
            Command::GetOutputGain => Request::GetOutputGain {
                side: OutputSide::from_wire(byte(p, 0)?)?,
            },
            Command::SetOutputGain => Request::SetOutputGain {
                side: OutputSide::from_wire(byte(p, 0)?)?,
                raw: i16::from_le_bytes([byte(p, 1)?, byte(p, 2)?]),
            },
            Command::GetMonitorGain => Request::GetMonitorGain,
            Command::SetMonitorGain => Request::SetMonitorGain {
                raw: i16::from_le_bytes([byte(p, 0)?, byte(p, 1)?]),
            },
            Command::GetHighPassFilter => Request::GetHighPassFilter { channel: byte(p, 0)? },
            Command::SetHighPassFilter => Request::SetHighPassFilter {
                channel: byte(p, 0)?,
                enabled: flag(p, 1)?,
                freq_hz: u16::from_le_bytes([byte(p, 2)?, byte(p, 3)?]),
            },
            Command::GetPad => Request::GetPad { input: byte(p, 0)? },
            Command::SetPad => Request::SetPad {
                input: byte(p, 0)?,
                enabled: flag(p, 1)?,
            },
        };
        Ok(request)
    }
}

// ── Payload field helpers ──────────────────────────────────────────────────

pub(crate) fn byte(data: &[u8], index: usize) -> Result<u8> {
    data.get(index).copied().ok_or(Error::MalformedFrame(FrameDefect::ShortPayload {
        needed: index + 1,
        actual: data.len(),
    }))
}

pub(crate) fn flag(data: &[u8], index: usize) -> Result<bool> {
    match byte(data, index)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Error::MalformedFrame(FrameDefect::BadValue {
            field: "flag",
            value: u32::from(other),
        })),
    }
}

pub(crate) fn word(data: &[u8], index: usize) -> Result<u16> {
    Ok(u16::from_le_bytes([byte(data, index)?, byte(data, index + 1)?]))
}
