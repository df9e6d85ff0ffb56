//! Command-line control for an Apollo Twin.
//!
//! Every setting command reads the current value when the value argument
//! is omitted, and otherwise applies it to the device and writes it
//! through to the configuration file.

use std::ops::Range;
use std::process::ExitCode;

use anyhow::Context;
use apollo_audio::control::DeviceControl;
use apollo_audio::{ConfigStore, InputSource, MonitorSource, Mutation, OutputSide};
use apollo_tools::{init_logging, pci, ApolloDevice, CommonArgs};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "apolloctl", version, about = "Control an Apollo Twin audio interface")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Switch {
    On,
    Off,
}

impl From<Switch> for bool {
    fn from(s: Switch) -> bool {
        matches!(s, Switch::On)
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Preamp gain of an analog input in dB (0 to 65)
    Gain {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=4))]
        input: u8,
        #[arg(allow_negative_numbers = true)]
        db: Option<f32>,
    },
    /// 48 V phantom power of an analog input
    Phantom {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=4))]
        input: u8,
        state: Option<Switch>,
    },
    /// Source routed to an input channel (analog1-4, digital1-2)
    Input {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=8))]
        channel: u8,
        source: Option<InputSource>,
    },
    /// Monitor source (main, alt, cue)
    Monitor { source: Option<MonitorSource> },
    /// Save the current configuration as a preset
    Save { preset: String },
    /// Apply a preset to the device and make it the configuration
    Load { preset: String },
    /// Show device registers and every mixer setting
    Status,
    /// List Apollo interfaces on the PCI bus
    Detect,
    /// Hex dump of the register window
    Dump {
        /// Byte offset (decimal or 0x-prefixed hex)
        #[arg(value_parser = parse_number)]
        offset: usize,
        /// Bytes to dump
        #[arg(value_parser = parse_number, default_value = "64")]
        len: usize,
    },
}

fn parse_number(s: &str) -> Result<usize, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("'{s}': {e}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(Level::WARN, cli.common.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<apollo_audio::Error>() {
                Some(apollo) => {
                    eprintln!("error: {}: {apollo}", apollo.kind());
                    eprintln!("hint: {}", apollo.hint());
                }
                None => eprintln!("error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    if let Command::Detect = cli.command {
        return detect();
    }

    let (pci, device) = cli.common.attach()?;
    let control = device.control();
    let mut store = cli.common.config_store();

    match &cli.command {
        Command::Gain { input, db: None } => {
            println!("{:.1}", control.get_analog_gain(*input)?);
        }
        Command::Gain { input, db: Some(db) } => {
            store.apply_and_persist(&*control, Mutation::AnalogGain { input: *input, db: *db })?;
            println!("{:.1}", store.snapshot().analog_gain[usize::from(*input) - 1]);
        }
        Command::Phantom { input, state: None } => {
            println!("{}", on_off(control.get_phantom_power(*input)?));
        }
        Command::Phantom {
            input,
            state: Some(state),
        } => {
            let enabled = bool::from(*state);
            store.apply_and_persist(&*control, Mutation::PhantomPower { input: *input, enabled })?;
        }
        Command::Input { channel, source: None } => {
            println!("{}", control.get_input_source(*channel)?);
        }
        Command::Input {
            channel,
            source: Some(source),
        } => {
            store.apply_and_persist(
                &*control,
                Mutation::InputSource {
                    channel: *channel,
                    source: *source,
                },
            )?;
        }
        Command::Monitor { source: None } => {
            println!("{}", control.get_monitor_source()?);
        }
        Command::Monitor { source: Some(source) } => {
            store.apply_and_persist(&*control, Mutation::MonitorSource(*source))?;
        }
        Command::Save { preset } => {
            let path = store.save_preset(preset)?;
            println!("saved {}", path.display());
        }
        Command::Load { preset } => {
            store.load_preset(preset, &*control)?;
        }
        Command::Status => status(&pci, &device, &store)?,
        Command::Dump { offset, len } => dump(&device, *offset, *len)?,
        Command::Detect => detect()?,
    }
    Ok(())
}

fn detect() -> anyhow::Result<()> {
    let devices = pci::scan(std::path::Path::new(pci::SYSFS_PCI_DEVICES))
        .context("reading the PCI device list")?;
    if devices.is_empty() {
        println!("no Apollo interfaces found");
    }
    for d in devices {
        println!("{}  {:04x}:{:04x}  irq {}", d.bdf, d.vendor, d.device, d.irq);
    }
    Ok(())
}

fn status(pci: &pci::PciDevice, device: &ApolloDevice, store: &ConfigStore) -> anyhow::Result<()> {
    let report = device.status_report()?;
    let control = device.control();

    println!("device      {} (irq {})", pci.bdf, report.irq_line);
    println!("status      {:?}", report.status);
    match report.format {
        Some(format) => println!(
            "clock       {} Hz, {format}, {} channels",
            report.rate, report.channels
        ),
        None => println!(
            "clock       {} Hz, unknown format, {} channels",
            report.rate, report.channels
        ),
    }
    println!("config      {}", store.path().display());
    println!();

    for input in 1..=apollo_audio::constants::ANALOG_INPUTS {
        println!(
            "input {input}     gain {:5.1} dB  phantom {:3}  pad {}",
            control.get_analog_gain(input)?,
            on_off(control.get_phantom_power(input)?),
            on_off(control.get_pad(input)?),
        );
    }
    for channel in 1..=apollo_audio::constants::INPUT_CHANNELS {
        let (hpf, freq) = control.get_high_pass_filter(channel)?;
        println!(
            "channel {channel}   source {:8}  hpf {:3} {freq:.0} Hz",
            control.get_input_source(channel)?.to_string(),
            on_off(hpf),
        );
    }
    for side in OutputSide::ALL {
        println!("output {side}    {:5.1} dB", control.get_output_gain(side)?);
    }
    println!(
        "monitor     {} {:5.1} dB",
        control.get_monitor_source()?,
        control.get_monitor_gain()?
    );
    Ok(())
}

/// Word-aligned byte ranges of up to 16 bytes covering `offset..offset + len`.
fn dump_rows(offset: usize, len: usize) -> impl Iterator<Item = Range<usize>> {
    let start = offset & !0x3;
    let end = offset.saturating_add(len).saturating_add(3) & !0x3;
    (start..end)
        .step_by(16)
        .map(move |row| row..row.saturating_add(16).min(end))
}

fn dump(device: &ApolloDevice, offset: usize, len: usize) -> anyhow::Result<()> {
    for row in dump_rows(offset, len) {
        let mut line = format!("{:08x}:", row.start);
        for word in row.step_by(4) {
            line.push_str(&format!(" {:08x}", device.read_register(word)?));
        }
        println!("{line}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_rows_cover_requested_bytes() {
        let rows: Vec<_> = dump_rows(0x06, 20).collect();
        assert_eq!(rows, vec![0x04..0x14, 0x14..0x1c]);
    }

    #[test]
    fn dump_rows_stop_at_the_top_of_the_address_space() {
        let offset = usize::MAX - 5;
        let rows: Vec<_> = dump_rows(offset, 64).collect();
        assert_eq!(rows, vec![(offset & !0x3)..(usize::MAX & !0x3)]);
    }

    #[test]
    fn numbers_parse_as_decimal_or_hex() {
        assert_eq!(parse_number("64"), Ok(64));
        assert_eq!(parse_number("0x100"), Ok(0x100));
        assert!(parse_number("0xZZ").is_err());
    }
}
