//! Persistent mirror of the device's mixer settings.
//!
//! [`ConfigStore`] holds a [`Snapshot`] of every setting and writes it
//! through to a flat `key=value` file after each change the device has
//! confirmed:
//!
//! ```text
//! # Apollo Twin Configuration
//! analog_gain1=24.5
//! output_gain_l=-6.0
//! phantom_power1=1
//! input_source5=4
//! hpf_freq2=80.0
//! monitor_source=0
//! ```
//!
//! Loading never fails. A missing or unreadable file yields defaults;
//! unknown keys and unparsable values are logged and skipped, keeping the
//! default for that one setting. Values are normalized to what the device
//! would accept (clamped, quantized to its step size) as they are read.

use core::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::constants::*;
use crate::control::{self, DeviceControl, InputSource, MonitorSource, OutputSide};
use crate::error::{Error, Result};

const HEADER: &str = "# Apollo Twin Configuration";
const PRESET_EXTENSION: &str = "conf";

const INPUTS: usize = ANALOG_INPUTS as usize;
const CHANNELS: usize = INPUT_CHANNELS as usize;

// ── Snapshot ───────────────────────────────────────────────────────────────

/// Every persisted setting. Arrays are indexed by `channel - 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub analog_gain: [f32; INPUTS],
    pub phantom_power: [bool; INPUTS],
    pub pad: [bool; INPUTS],
    pub input_source: [InputSource; CHANNELS],
    pub hpf_enabled: [bool; CHANNELS],
    pub hpf_freq: [f32; CHANNELS],
    /// Left, right.
    pub output_gain: [f32; 2],
    pub monitor_source: MonitorSource,
    pub monitor_gain: f32,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            analog_gain: [ANALOG_GAIN_MIN_DB; INPUTS],
            phantom_power: [false; INPUTS],
            pad: [false; INPUTS],
            input_source: core::array::from_fn(|i| InputSource::default_for_channel(i as u8 + 1)),
            hpf_enabled: [false; CHANNELS],
            hpf_freq: [HPF_FREQ_DEFAULT_HZ; CHANNELS],
            output_gain: [OUTPUT_GAIN_MAX_DB; 2],
            monitor_source: MonitorSource::default(),
            monitor_gain: OUTPUT_GAIN_MAX_DB,
        }
    }
}

impl Snapshot {
    /// Parse configuration text, starting from defaults.
    pub fn parse(text: &str) -> Self {
        let mut snapshot = Self::default();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!(line = number + 1, "configuration line without '=' ignored");
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            match snapshot.set_key(key, value) {
                Ok(true) => {}
                Ok(false) => debug!(key, "unknown configuration key ignored"),
                Err(reason) => warn!(key, value, reason, "invalid configuration value ignored"),
            }
        }
        snapshot
    }

    /// `Ok(false)` for a key this store does not know.
    fn set_key(&mut self, key: &str, value: &str) -> core::result::Result<bool, &'static str> {
        if let Some(i) = indexed(key, "analog_gain", INPUTS) {
            self.analog_gain[i] = analog_db(value)?;
        } else if let Some(i) = indexed(key, "phantom_power", INPUTS) {
            self.phantom_power[i] = switch(value)?;
        } else if let Some(i) = indexed(key, "pad", INPUTS) {
            self.pad[i] = switch(value)?;
        } else if let Some(i) = indexed(key, "input_source", CHANNELS) {
            self.input_source[i] =
                InputSource::from_ordinal(ordinal(value)?).ok_or("no such input source")?;
        } else if let Some(i) = indexed(key, "hpf_enable", CHANNELS) {
            self.hpf_enabled[i] = switch(value)?;
        } else if let Some(i) = indexed(key, "hpf_freq", CHANNELS) {
            self.hpf_freq[i] = hpf_hz(value)?;
        } else if let Some(side) = key
            .strip_prefix("output_gain_")
            .and_then(|name| OutputSide::ALL.into_iter().find(|s| s.name() == name))
        {
            self.output_gain[usize::from(side.ordinal())] = output_db(value)?;
        } else if key == "monitor_source" {
            self.monitor_source =
                MonitorSource::from_ordinal(ordinal(value)?).ok_or("no such monitor source")?;
        } else if key == "monitor_gain" {
            self.monitor_gain = output_db(value)?;
        } else {
            return Ok(false);
        }
        Ok(true)
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{HEADER}")?;
        for (i, db) in self.analog_gain.iter().enumerate() {
            writeln!(f, "analog_gain{}={db:.1}", i + 1)?;
        }
        for (side, db) in OutputSide::ALL.iter().zip(&self.output_gain) {
            writeln!(f, "output_gain_{side}={db:.1}")?;
        }
        for (i, on) in self.phantom_power.iter().enumerate() {
            writeln!(f, "phantom_power{}={}", i + 1, u8::from(*on))?;
        }
        for (i, source) in self.input_source.iter().enumerate() {
            writeln!(f, "input_source{}={}", i + 1, source.ordinal())?;
        }
        for (i, on) in self.hpf_enabled.iter().enumerate() {
            writeln!(f, "hpf_enable{}={}", i + 1, u8::from(*on))?;
        }
        for (i, hz) in self.hpf_freq.iter().enumerate() {
            writeln!(f, "hpf_freq{}={hz:.1}", i + 1)?;
        }
        for (i, on) in self.pad.iter().enumerate() {
            writeln!(f, "pad{}={}", i + 1, u8::from(*on))?;
        }
        writeln!(f, "monitor_source={}", self.monitor_source.ordinal())?;
        writeln!(f, "monitor_gain={:.1}", self.monitor_gain)
    }
}

/// `prefix` followed by a 1-based index up to `count`.
fn indexed(key: &str, prefix: &str, count: usize) -> Option<usize> {
    let n: usize = key.strip_prefix(prefix)?.parse().ok()?;
    (1..=count).contains(&n).then(|| n - 1)
}

fn float(value: &str) -> core::result::Result<f32, &'static str> {
    value
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or("expected a number")
}

fn switch(value: &str) -> core::result::Result<bool, &'static str> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err("expected 0 or 1"),
    }
}

fn ordinal(value: &str) -> core::result::Result<u8, &'static str> {
    value.parse().map_err(|_| "expected an ordinal")
}

fn analog_db(value: &str) -> core::result::Result<f32, &'static str> {
    let raw = control::analog_gain_to_raw(float(value)?).map_err(|_| "expected a number")?;
    Ok(control::analog_gain_from_raw(raw))
}

fn output_db(value: &str) -> core::result::Result<f32, &'static str> {
    let raw = control::output_gain_to_raw(float(value)?).map_err(|_| "expected a number")?;
    Ok(control::output_gain_from_raw(raw))
}

fn hpf_hz(value: &str) -> core::result::Result<f32, &'static str> {
    let raw = control::hpf_freq_to_raw(float(value)?).map_err(|_| "expected a number")?;
    Ok(f32::from(raw))
}

// ── Mutations ──────────────────────────────────────────────────────────────

/// One setting change requested by a user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mutation {
    AnalogGain { input: u8, db: f32 },
    PhantomPower { input: u8, enabled: bool },
    Pad { input: u8, enabled: bool },
    InputSource { channel: u8, source: InputSource },
    HighPassFilter { channel: u8, enabled: bool, freq_hz: f32 },
    OutputGain { side: OutputSide, db: f32 },
    MonitorSource(MonitorSource),
    MonitorGain(f32),
}

/// Zero-based slot for a 1-based channel, checked before any I/O.
fn slot(channel: u8, max: u8) -> Result<usize> {
    if (1..=max).contains(&channel) {
        Ok(usize::from(channel) - 1)
    } else {
        Err(Error::InvalidChannel { channel, max })
    }
}

impl Mutation {
    /// Send to the device, then record the value it accepted.
    fn apply<C: DeviceControl + ?Sized>(self, control: &C, snapshot: &mut Snapshot) -> Result<()> {
        match self {
            Mutation::AnalogGain { input, db } => {
                let i = slot(input, ANALOG_INPUTS)?;
                snapshot.analog_gain[i] = control.set_analog_gain(input, db)?;
            }
            Mutation::PhantomPower { input, enabled } => {
                let i = slot(input, ANALOG_INPUTS)?;
                control.set_phantom_power(input, enabled)?;
                snapshot.phantom_power[i] = enabled;
            }
            Mutation::Pad { input, enabled } => {
                let i = slot(input, ANALOG_INPUTS)?;
                control.set_pad(input, enabled)?;
                snapshot.pad[i] = enabled;
            }
            Mutation::InputSource { channel, source } => {
                let i = slot(channel, INPUT_CHANNELS)?;
                control.set_input_source(channel, source)?;
                snapshot.input_source[i] = source;
            }
            Mutation::HighPassFilter {
                channel,
                enabled,
                freq_hz,
            } => {
                let i = slot(channel, INPUT_CHANNELS)?;
                snapshot.hpf_freq[i] = control.set_high_pass_filter(channel, enabled, freq_hz)?;
                snapshot.hpf_enabled[i] = enabled;
            }
            Mutation::OutputGain { side, db } => {
                let i = usize::from(side.ordinal());
                snapshot.output_gain[i] = control.set_output_gain(side, db)?;
            }
            Mutation::MonitorSource(source) => {
                control.set_monitor_source(source)?;
                snapshot.monitor_source = source;
            }
            Mutation::MonitorGain(db) => {
                snapshot.monitor_gain = control.set_monitor_gain(db)?;
            }
        }
        Ok(())
    }
}

// ── Store ──────────────────────────────────────────────────────────────────

/// Owner of the configuration file and the preset directory.
pub struct ConfigStore {
    path: PathBuf,
    preset_dir: PathBuf,
    snapshot: Snapshot,
}

impl ConfigStore {
    /// A store holding defaults. Nothing is read until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>, preset_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            preset_dir: preset_dir.into(),
            snapshot: Snapshot::default(),
        }
    }

    /// [`new`](Self::new) followed by [`load`](Self::load).
    pub fn open(path: impl Into<PathBuf>, preset_dir: impl Into<PathBuf>) -> Self {
        let mut store = Self::new(path, preset_dir);
        store.load();
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn preset_dir(&self) -> &Path {
        &self.preset_dir
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Re-read the file, falling back to defaults.
    pub fn load(&mut self) -> &Snapshot {
        self.snapshot = read_snapshot(&self.path);
        &self.snapshot
    }

    pub fn save(&self) -> Result<()> {
        write_atomically(&self.path, &self.snapshot)
    }

    /// Apply `mutation` on the device and persist it once the device has
    /// acknowledged. On any device error neither the snapshot nor the
    /// file changes.
    pub fn apply_and_persist<C>(&mut self, control: &C, mutation: Mutation) -> Result<()>
    where
        C: DeviceControl + ?Sized,
    {
        let mut next = self.snapshot;
        mutation.apply(control, &mut next)?;
        self.snapshot = next;
        debug!(?mutation, "setting applied");
        self.save()
    }

    /// Push every stored setting to the device.
    ///
    /// The device may round a stored value to its own step; the stored
    /// value is then replaced by what the device confirmed, so a failure
    /// part way through still leaves the file describing the device.
    pub fn sync<C: DeviceControl + ?Sized>(&mut self, control: &C) -> Result<()> {
        let target = self.snapshot;
        self.push_confirmed(control, &target)?;
        info!("configuration pushed to device");
        Ok(())
    }

    /// Read back the settings the front panel can change (monitor source,
    /// monitor and output levels). Persists and returns `true` if any
    /// differ from the stored values.
    pub fn refresh<C: DeviceControl + ?Sized>(&mut self, control: &C) -> Result<bool> {
        let mut next = self.snapshot;
        next.monitor_source = control.get_monitor_source()?;
        next.monitor_gain = control.get_monitor_gain()?;
        for (side, db) in OutputSide::ALL.into_iter().zip(next.output_gain.iter_mut()) {
            *db = control.get_output_gain(side)?;
        }
        if next == self.snapshot {
            return Ok(false);
        }
        info!(
            monitor = %next.monitor_source,
            monitor_gain = next.monitor_gain,
            "device settings changed"
        );
        self.snapshot = next;
        self.save()?;
        Ok(true)
    }

    // ── Presets ────────────────────────────────────────────────────────

    fn preset_path(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !valid {
            return Err(Error::InvalidParameter(format!(
                "preset name '{name}' may only contain letters, digits, '_' and '-'"
            )));
        }
        Ok(self.preset_dir.join(format!("{name}.{PRESET_EXTENSION}")))
    }

    /// Write the current snapshot as preset `name`.
    pub fn save_preset(&self, name: &str) -> Result<PathBuf> {
        let path = self.preset_path(name)?;
        write_atomically(&path, &self.snapshot)?;
        info!(preset = name, "preset saved");
        Ok(path)
    }

    /// Push preset `name` to the device, then make it the stored
    /// configuration.
    pub fn load_preset<C>(&mut self, name: &str, control: &C) -> Result<()>
    where
        C: DeviceControl + ?Sized,
    {
        let path = self.preset_path(name)?;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::PresetNotFound(name.to_owned()))
            }
            Err(e) => return Err(e.into()),
        };
        let preset = Snapshot::parse(&text);
        self.push_confirmed(control, &preset)?;
        info!(preset = name, "preset loaded");
        Ok(())
    }

    /// Push `target` setting by setting, recording each one in the stored
    /// snapshot only once the device has acknowledged it. Whatever was
    /// confirmed is persisted even when a later setting fails.
    fn push_confirmed<C>(&mut self, control: &C, target: &Snapshot) -> Result<()>
    where
        C: DeviceControl + ?Sized,
    {
        let mut confirmed = self.snapshot;
        let pushed = push(control, target, &mut confirmed);
        if pushed.is_err() && confirmed == self.snapshot {
            return pushed;
        }
        self.snapshot = confirmed;
        let saved = self.save();
        if let Err(err) = &pushed {
            warn!(error = %err, "device accepted part of the configuration");
        }
        pushed.and(saved)
    }

    /// Names of the presets in the preset directory, sorted.
    pub fn presets(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.preset_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == PRESET_EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Stops at the first failure. `confirmed` holds every setting the device
/// acknowledged before it.
fn push<C>(control: &C, target: &Snapshot, confirmed: &mut Snapshot) -> Result<()>
where
    C: DeviceControl + ?Sized,
{
    for (i, input) in (1..=ANALOG_INPUTS).enumerate() {
        confirmed.analog_gain[i] = control.set_analog_gain(input, target.analog_gain[i])?;
        control.set_phantom_power(input, target.phantom_power[i])?;
        confirmed.phantom_power[i] = target.phantom_power[i];
        control.set_pad(input, target.pad[i])?;
        confirmed.pad[i] = target.pad[i];
    }
    for (i, channel) in (1..=INPUT_CHANNELS).enumerate() {
        control.set_input_source(channel, target.input_source[i])?;
        confirmed.input_source[i] = target.input_source[i];
        let (enabled, freq) = (target.hpf_enabled[i], target.hpf_freq[i]);
        confirmed.hpf_freq[i] = control.set_high_pass_filter(channel, enabled, freq)?;
        confirmed.hpf_enabled[i] = enabled;
    }
    for (i, side) in OutputSide::ALL.into_iter().enumerate() {
        confirmed.output_gain[i] = control.set_output_gain(side, target.output_gain[i])?;
    }
    control.set_monitor_source(target.monitor_source)?;
    confirmed.monitor_source = target.monitor_source;
    confirmed.monitor_gain = control.set_monitor_gain(target.monitor_gain)?;
    Ok(())
}

fn read_snapshot(path: &Path) -> Snapshot {
    match fs::read_to_string(path) {
        Ok(text) => Snapshot::parse(&text),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no configuration file, using defaults");
            Snapshot::default()
        }
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "unreadable configuration file, using defaults"
            );
            Snapshot::default()
        }
    }
}

/// Temp file in the target directory, then rename over the target.
fn write_atomically(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut file = NamedTempFile::new_in(dir)?;
    write!(file, "{snapshot}")?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    debug!(path = %path.display(), "configuration saved");
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────
