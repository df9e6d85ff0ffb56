//! Typed mixer controls layered on the control session.
//!
//! [`DeviceControl`] is the operation set the configuration store and
//! tools use. Every method validates its channel locally (an
//! `InvalidChannel` error never reaches the wire), converts dB values to
//! the device's half-dB register steps, and performs exactly one
//! [`ControlSession::call`].
//!
//! | control | channels | range |
//! |---------|----------|-------|
//! | analog gain | inputs 1–4 | 0 to 65 dB, clamped |
//! | phantom power / pad | inputs 1–4 | on/off |
//! | input source | channels 1–8 | [`InputSource`] |
//! | high-pass filter | channels 1–8 | on/off, 20–500 Hz |
//! | monitor source | – | [`MonitorSource`] |
//! | output gain | left/right | −96 to 0 dB, clamped |
//! | monitor gain | – | −96 to 0 dB, clamped |

use core::fmt;
use core::str::FromStr;

use crate::constants::*;
use crate::error::{Error, FrameDefect, Result};
use crate::protocol::command::{byte, flag, word};
use crate::protocol::Request;
use crate::session::ControlSession;
use crate::transport::ControlTransport;

// ── Public enums ───────────────────────────────────────────────────────────

/// Signal routed into a logical input channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputSource {
    Analog1,
    Analog2,
    Analog3,
    Analog4,
    Digital1,
    Digital2,
}

impl InputSource {
    pub const ALL: [InputSource; 6] = [
        InputSource::Analog1,
        InputSource::Analog2,
        InputSource::Analog3,
        InputSource::Analog4,
        InputSource::Digital1,
        InputSource::Digital2,
    ];

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.get(usize::from(ordinal)).copied()
    }

    pub(crate) fn from_wire(ordinal: u8) -> Result<Self> {
        Self::from_ordinal(ordinal).ok_or(bad_value("input source", ordinal))
    }

    /// Reset routing: channel `n` (1-based) takes analog input `1 + (n - 1) % 4`.
    pub fn default_for_channel(channel: u8) -> Self {
        Self::ALL[usize::from(channel.saturating_sub(1) % ANALOG_INPUTS)]
    }

    pub fn name(self) -> &'static str {
        match self {
            InputSource::Analog1 => "analog1",
            InputSource::Analog2 => "analog2",
            InputSource::Analog3 => "analog3",
            InputSource::Analog4 => "analog4",
            InputSource::Digital1 => "digital1",
            InputSource::Digital2 => "digital2",
        }
    }
}

/// Source feeding the monitor outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MonitorSource {
    #[default]
    Main,
    Alt,
    Cue,
}

impl MonitorSource {
    pub const ALL: [MonitorSource; 3] =
        [MonitorSource::Main, MonitorSource::Alt, MonitorSource::Cue];

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.get(usize::from(ordinal)).copied()
    }

    pub(crate) fn from_wire(ordinal: u8) -> Result<Self> {
        Self::from_ordinal(ordinal).ok_or(bad_value("monitor source", ordinal))
    }

    pub fn name(self) -> &'static str {
        match self {
            MonitorSource::Main => "main",
            MonitorSource::Alt => "alt",
            MonitorSource::Cue => "cue",
        }
    }
}

/// One side of the main stereo output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputSide {
    Left,
    Right,
}

impl OutputSide {
    pub const ALL: [OutputSide; 2] = [OutputSide::Left, OutputSide::Right];

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_wire(ordinal: u8) -> Result<Self> {
        Self::ALL
            .get(usize::from(ordinal))
            .copied()
            .ok_or(bad_value("output side", ordinal))
    }

    pub fn name(self) -> &'static str {
        match self {
            OutputSide::Left => "l",
            OutputSide::Right => "r",
        }
    }
}

fn bad_value(field: &'static str, value: u8) -> Error {
    Error::MalformedFrame(FrameDefect::BadValue {
        field,
        value: u32::from(value),
    })
}

macro_rules! named_enum_traits {
    ($ty:ident, $what:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                let wanted = s.trim().to_ascii_lowercase();
                $ty::ALL
                    .into_iter()
                    .find(|v| v.name() == wanted)
                    .ok_or_else(|| Error::InvalidParameter(format!("unknown {} '{}'", $what, s)))
            }
        }
    };
}

named_enum_traits!(InputSource, "input source");
named_enum_traits!(MonitorSource, "monitor source");
named_enum_traits!(OutputSide, "output side");

// ── Unit conversion ────────────────────────────────────────────────────────

fn require_finite(value: f32, what: &str) -> Result<f32> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::InvalidParameter(format!("{what} must be a finite number")))
    }
}

/// Clamp to the preamp range and quantize to register steps.
pub fn analog_gain_to_raw(db: f32) -> Result<u16> {
    let db = require_finite(db, "gain")?.clamp(ANALOG_GAIN_MIN_DB, ANALOG_GAIN_MAX_DB);
    Ok((db / GAIN_STEP_DB).round() as u16)
}

pub fn analog_gain_from_raw(raw: u16) -> f32 {
    f32::from(raw) * GAIN_STEP_DB
}

/// Clamp to the attenuator range and quantize to register steps.
pub fn output_gain_to_raw(db: f32) -> Result<i16> {
    let db = require_finite(db, "gain")?.clamp(OUTPUT_GAIN_MIN_DB, OUTPUT_GAIN_MAX_DB);
    Ok((db / GAIN_STEP_DB).round() as i16)
}

pub fn output_gain_from_raw(raw: i16) -> f32 {
    f32::from(raw) * GAIN_STEP_DB
}

/// Clamp to the filter's corner range, whole hertz.
pub fn hpf_freq_to_raw(hz: f32) -> Result<u16> {
    let hz = require_finite(hz, "filter frequency")?.clamp(HPF_FREQ_MIN_HZ, HPF_FREQ_MAX_HZ);
    Ok(hz.round() as u16)
}

fn check_channel(channel: u8, max: u8) -> Result<u8> {
    if (1..=max).contains(&channel) {
        Ok(channel)
    } else {
        Err(Error::InvalidChannel { channel, max })
    }
}

// ── Trait ──────────────────────────────────────────────────────────────────

/// Mixer operations on one device.
///
/// Setters return the value the device was given after clamping and
/// quantization, which is what a following getter will report.
pub trait DeviceControl {
    fn set_analog_gain(&self, input: u8, db: f32) -> Result<f32>;
    fn get_analog_gain(&self, input: u8) -> Result<f32>;

    fn set_phantom_power(&self, input: u8, enabled: bool) -> Result<()>;
    fn get_phantom_power(&self, input: u8) -> Result<bool>;

    fn set_input_source(&self, channel: u8, source: InputSource) -> Result<()>;
    fn get_input_source(&self, channel: u8) -> Result<InputSource>;

    fn set_monitor_source(&self, source: MonitorSource) -> Result<()>;
    fn get_monitor_source(&self) -> Result<MonitorSource>;

    fn set_output_gain(&self, side: OutputSide, db: f32) -> Result<f32>;
    fn get_output_gain(&self, side: OutputSide) -> Result<f32>;

    fn set_monitor_gain(&self, db: f32) -> Result<f32>;
    fn get_monitor_gain(&self) -> Result<f32>;

    /// Returns the corner frequency actually programmed.
    fn set_high_pass_filter(&self, channel: u8, enabled: bool, freq_hz: f32) -> Result<f32>;
    fn get_high_pass_filter(&self, channel: u8) -> Result<(bool, f32)>;

    fn set_pad(&self, input: u8, enabled: bool) -> Result<()>;
    fn get_pad(&self, input: u8) -> Result<bool>;
}

impl<T: ControlTransport> DeviceControl for ControlSession<T> {
    fn set_analog_gain(&self, input: u8, db: f32) -> Result<f32> {
        let input = check_channel(input, ANALOG_INPUTS)?;
        let raw = analog_gain_to_raw(db)?;
        self.call(&Request::SetAnalogGain { input, raw })?;
        Ok(analog_gain_from_raw(raw))
    }

    fn get_analog_gain(&self, input: u8) -> Result<f32> {
        let input = check_channel(input, ANALOG_INPUTS)?;
        let data = self.call(&Request::GetAnalogGain { input })?;
        Ok(analog_gain_from_raw(word(&data, 0)?))
    }

    fn set_phantom_power(&self, input: u8, enabled: bool) -> Result<()> {
        let input = check_channel(input, ANALOG_INPUTS)?;
        self.call(&Request::SetPhantomPower { input, enabled })?;
        Ok(())
    }

    fn get_phantom_power(&self, input: u8) -> Result<bool> {
        let input = check_channel(input, ANALOG_INPUTS)?;
        let data = self.call(&Request::GetPhantomPower { input })?;
        flag(&data, 0)
    }

    fn set_input_source(&self, channel: u8, source: InputSource) -> Result<()> {
        let channel = check_channel(channel, INPUT_CHANNELS)?;
        self.call(&Request::SetInputSource { channel, source })?;
        Ok(())
    }

    fn get_input_source(&self, channel: u8) -> Result<InputSource> {
        let channel = check_channel(channel, INPUT_CHANNELS)?;
        let data = self.call(&Request::GetInputSource { channel })?;
        InputSource::from_wire(byte(&data, 0)?)
    }

    fn set_monitor_source(&self, source: MonitorSource) -> Result<()> {
        self.call(&Request::SetMonitorSource { source })?;
        Ok(())
    }

    fn get_monitor_source(&self) -> Result<MonitorSource> {
        let data = self.call(&Request::GetMonitorSource)?;
        MonitorSource::from_wire(byte(&data, 0)?)
    }

    fn set_output_gain(&self, side: OutputSide, db: f32) -> Result<f32> {
        let raw = output_gain_to_raw(db)?;
        self.call(&Request::SetOutputGain { side, raw })?;
        Ok(output_gain_from_raw(raw))
    }

    fn get_output_gain(&self, side: OutputSide) -> Result<f32> {
        let data = self.call(&Request::GetOutputGain { side })?;
        Ok(output_gain_from_raw(word(&data, 0)? as i16))
    }

    fn set_monitor_gain(&self, db: f32) -> Result<f32> {
        let raw = output_gain_to_raw(db)?;
        self.call(&Request::SetMonitorGain { raw })?;
        Ok(output_gain_from_raw(raw))
    }

    fn get_monitor_gain(&self) -> Result<f32> {
        let data = self.call(&Request::GetMonitorGain)?;
        Ok(output_gain_from_raw(word(&data, 0)? as i16))
    }

    fn set_high_pass_filter(&self, channel: u8, enabled: bool, freq_hz: f32) -> Result<f32> {
        let channel = check_channel(channel, INPUT_CHANNELS)?;
        let freq_hz = hpf_freq_to_raw(freq_hz)?;
        self.call(&Request::SetHighPassFilter {
            channel,
            enabled,
            freq_hz,
        })?;
        Ok(f32::from(freq_hz))
    }

    fn get_high_pass_filter(&self, channel: u8) -> Result<(bool, f32)> {
        let channel = check_channel(channel, INPUT_CHANNELS)?;
        let data = self.call(&Request::GetHighPassFilter { channel })?;
        Ok((flag(&data, 0)?, f32::from(word(&data, 1)?)))
    }

    fn set_pad(&self, input: u8, enabled: bool) -> Result<()> {
        let input = check_channel(input, ANALOG_INPUTS)?;
        self.call(&Request::SetPad { input, enabled })?;
        Ok(())
    }

    fn get_pad(&self, input: u8) -> Result<bool> {
        let input = check_channel(input, ANALOG_INPUTS)?;
        let data = self.call(&Request::GetPad { input })?;
        flag(&data, 0)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
