//! Shared plumbing for `apolloctl` and `apollod`: device discovery,
//! BAR0 mapping, common command-line options and logging setup.

pub mod bar;
pub mod pci;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use apollo_audio::{ConfigStore, Device, DevicePresent, NullSink, StdDelay};
use clap::Args;
use tracing::Level;

use crate::bar::BarWindow;
use crate::pci::PciDevice;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/apollo.conf";
pub const DEFAULT_PRESET_DIR: &str = "/etc/apollo/presets";

/// An attached interface as the tools use it.
pub type ApolloDevice = Device<BarWindow, StdDelay>;

/// Options every tool accepts.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// PCI address of the interface (default: the first one found)
    #[arg(long, short = 'd', value_name = "BDF", global = true)]
    pub device: Option<String>,

    /// Configuration file
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// Preset directory
    #[arg(long, value_name = "DIR", default_value = DEFAULT_PRESET_DIR, global = true)]
    pub preset_dir: PathBuf,

    /// Control response timeout in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 100, global = true)]
    pub timeout_ms: u64,

    /// More log output (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl CommonArgs {
    pub fn find_device(&self) -> anyhow::Result<PciDevice> {
        pci::find(Path::new(pci::SYSFS_PCI_DEVICES), self.device.as_deref())
    }

    /// Map the interface's registers and attach to it.
    pub fn attach(&self) -> anyhow::Result<(PciDevice, ApolloDevice)> {
        let pci = self.find_device()?;
        let window = BarWindow::open(&pci.bar0())
            .with_context(|| format!("mapping {}", pci.bar0().display()))?;
        let device = Device::attach_with_timeout(
            DevicePresent {
                window,
                irq_line: pci.irq,
            },
            StdDelay,
            Arc::new(NullSink),
            Duration::from_millis(self.timeout_ms),
        )?;
        Ok((pci, device))
    }

    pub fn config_store(&self) -> ConfigStore {
        ConfigStore::open(&self.config, &self.preset_dir)
    }
}

/// Install the fmt subscriber on stderr. Each `-v` raises `base` one level.
pub fn init_logging(base: Level, verbose: u8) {
    const LEVELS: [Level; 5] = [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE];
    let start = LEVELS.iter().position(|l| *l == base).unwrap_or(1);
    let level = LEVELS[(start + usize::from(verbose)).min(LEVELS.len() - 1)];
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}
