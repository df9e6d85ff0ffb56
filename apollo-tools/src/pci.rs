//! Finding Apollo interfaces in sysfs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use apollo_audio::constants::{PCI_DEVICE_ID, PCI_VENDOR_ID};

pub const SYSFS_PCI_DEVICES: &str = "/sys/bus/pci/devices";

/// One matching PCI function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciDevice {
    /// Bus/device/function address, e.g. `0000:05:00.0`.
    pub bdf: String,
    pub path: PathBuf,
    pub vendor: u16,
    pub device: u16,
    pub irq: u32,
}

impl PciDevice {
    /// Path of the BAR0 resource file.
    pub fn bar0(&self) -> PathBuf {
        self.path.join("resource0")
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_owned())
}

fn read_id(path: &Path) -> Option<u16> {
    let text = read_trimmed(path)?;
    u16::from_str_radix(text.trim_start_matches("0x"), 16).ok()
}

/// Every Apollo function below `root`, sorted by address.
pub fn scan(root: &Path) -> io::Result<Vec<PciDevice>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        let Some(bdf) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
            continue;
        };
        let vendor = read_id(&path.join("vendor"));
        let device = read_id(&path.join("device"));
        let (Some(vendor), Some(device)) = (vendor, device) else {
            continue;
        };
        if vendor != PCI_VENDOR_ID || device != PCI_DEVICE_ID {
            continue;
        }
        let irq = read_trimmed(&path.join("irq"))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        found.push(PciDevice {
            bdf,
            path,
            vendor,
            device,
            irq,
        });
    }
    found.sort_by(|a, b| a.bdf.cmp(&b.bdf));
    Ok(found)
}

/// The device at `bdf`, or the first one found.
pub fn find(root: &Path, bdf: Option<&str>) -> anyhow::Result<PciDevice> {
    let devices = scan(root)?;
    match bdf {
        Some(bdf) => devices
            .into_iter()
            .find(|d| d.bdf == bdf)
            .ok_or_else(|| anyhow::anyhow!("no Apollo interface at {bdf}")),
        None => devices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("no Apollo interface found under {}", root.display())),
    }
}
