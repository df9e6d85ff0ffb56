//! Error type shared by every layer of the crate.
//!
//! Every failure is returned to the immediate caller as a typed [`Error`].
//! [`Error::kind`] collapses the variants into the coarse [`ErrorKind`]
//! taxonomy that tools print and log, and [`Error::hint`] gives a one-line
//! remediation for the user.

use core::fmt;
use core::time::Duration;

use thiserror::Error;

use crate::stream::{Direction, StreamState};

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, Error>;

/// Why a control frame could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDefect {
    /// Shorter than header plus checksum.
    TooShort { len: usize },
    /// The length field disagrees with the received byte count.
    LengthMismatch { declared: usize, actual: usize },
    /// The leading sentinel is wrong.
    BadMagic,
    /// The command code is not one this crate knows.
    UnknownCommand(u16),
    /// The payload does not fit in one frame.
    PayloadTooLong { len: usize },
    /// A response carried fewer bytes than its command requires.
    ShortPayload { needed: usize, actual: usize },
    /// A response field is outside the range its type allows.
    BadValue { field: &'static str, value: u32 },
}

impl fmt::Display for FrameDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameDefect::TooShort { len } => write!(f, "frame of {len} bytes is too short"),
            FrameDefect::LengthMismatch { declared, actual } => {
                write!(f, "length field says {declared} bytes, received {actual}")
            }
            FrameDefect::BadMagic => f.write_str("bad magic"),
            FrameDefect::UnknownCommand(code) => write!(f, "unknown command {code:#06x}"),
            FrameDefect::PayloadTooLong { len } => write!(f, "payload of {len} bytes is too long"),
            FrameDefect::ShortPayload { needed, actual } => {
                write!(f, "payload needs {needed} bytes, got {actual}")
            }
            FrameDefect::BadValue { field, value } => {
                write!(f, "{field} value {value} out of range")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid channel {channel} (valid: 1-{max})")]
    InvalidChannel { channel: u8, max: u8 },

    #[error("cannot {op} a {direction} stream in state {state}")]
    InvalidState {
        op: &'static str,
        direction: Direction,
        state: StreamState,
    },

    #[error("could not allocate a {0}-byte transfer buffer")]
    ResourceExhausted(usize),

    #[error("device did not report ready")]
    DeviceNotReady,

    #[error("hardware fault on the {0} stream")]
    HardwareFault(Direction),

    #[error("checksum mismatch: frame carries {received:#010x}, computed {computed:#010x}")]
    Checksum { received: u32, computed: u32 },

    #[error("malformed control frame: {0}")]
    MalformedFrame(FrameDefect),

    #[error("no response within {0:?}")]
    TimedOut(Duration),

    #[error("response to command {expected:#06x} carried command {actual:#06x}")]
    ProtocolDesync { expected: u16, actual: u16 },

    #[error("device rejected the request with status {0:#06x}")]
    Device(u16),

    #[error("device was removed")]
    DeviceGone,

    #[error("aborted by shutdown")]
    Aborted,

    #[error("preset '{0}' does not exist")]
    PresetNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Coarse classification of [`Error`] for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParameter,
    ResourceExhausted,
    DeviceNotReady,
    HardwareFault,
    Checksum,
    MalformedFrame,
    TimedOut,
    ProtocolDesync,
    DeviceError,
    DeviceGone,
    Aborted,
    Io,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidParameter => "invalid parameter",
            ErrorKind::ResourceExhausted => "resource exhausted",
            ErrorKind::DeviceNotReady => "device not ready",
            ErrorKind::HardwareFault => "hardware fault",
            ErrorKind::Checksum => "checksum error",
            ErrorKind::MalformedFrame => "malformed frame",
            ErrorKind::TimedOut => "timed out",
            ErrorKind::ProtocolDesync => "protocol desync",
            ErrorKind::DeviceError => "device error",
            ErrorKind::DeviceGone => "device gone",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Io => "i/o error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidParameter(_)
            | Error::InvalidChannel { .. }
            | Error::InvalidState { .. }
            | Error::PresetNotFound(_) => ErrorKind::InvalidParameter,
            Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Error::DeviceNotReady => ErrorKind::DeviceNotReady,
            Error::HardwareFault(_) => ErrorKind::HardwareFault,
            Error::Checksum { .. } => ErrorKind::Checksum,
            Error::MalformedFrame(_) => ErrorKind::MalformedFrame,
            Error::TimedOut(_) => ErrorKind::TimedOut,
            Error::ProtocolDesync { .. } => ErrorKind::ProtocolDesync,
            Error::Device(_) => ErrorKind::DeviceError,
            Error::DeviceGone => ErrorKind::DeviceGone,
            Error::Aborted => ErrorKind::Aborted,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Remediation text for the user.
    pub fn hint(&self) -> &'static str {
        match self {
            Error::InvalidChannel { .. } => "use a channel number inside the listed range",
            Error::InvalidState { .. } => "follow open, configure, prepare, start order",
            Error::PresetNotFound(_) => "list the preset directory or save the preset first",
            Error::InvalidParameter(_) => "check the value against the supported range",
            Error::ResourceExhausted(_) => "use fewer or smaller periods",
            Error::DeviceNotReady => "check connection and power, then retry",
            Error::HardwareFault(_) => "prepare the stream again; check cabling if it repeats",
            Error::Checksum { .. } | Error::MalformedFrame(_) => {
                "control channel data was corrupted; retry the command"
            }
            Error::TimedOut(_) => "device did not answer; check connection and retry",
            Error::ProtocolDesync { .. } => "control channel was reset; retry the command",
            Error::Device(_) => "the device refused the setting; check the value",
            Error::DeviceGone => "reconnect the device",
            Error::Aborted => "the service is shutting down",
            Error::Io(_) => "check file permissions and paths",
        }
    }
}
