//! BAR0 register window mapped from sysfs.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use apollo_audio::{MmioWindow, RegisterIo};
use memmap2::{MmapMut, MmapOptions};

/// The device's register window, mapped shared and uncached through the
/// PCI resource file.
pub struct BarWindow {
    // Keeps the mapping alive for `window`.
    _map: MmapMut,
    window: MmioWindow,
}

impl BarWindow {
    pub fn open(resource: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(resource)?;
        // SAFETY: the resource file maps device registers, which no other
        // code in this process touches; the mapping lives as long as `self`.
        let mut map = unsafe { MmapOptions::new().map_mut(&file)? };
        // SAFETY: `map` is moved into `Self` next to `window` and never
        // unmapped before it.
        let window = unsafe { MmioWindow::new(map.as_mut_ptr(), map.len()) }.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "register window is not word aligned")
        })?;
        Ok(Self { _map: map, window })
    }
}

impl RegisterIo for BarWindow {
    fn len(&self) -> usize {
        self.window.len()
    }

    fn read32(&mut self, offset: usize) -> u32 {
        self.window.read32(offset)
    }

    fn write32(&mut self, offset: usize, value: u32) {
        self.window.write32(offset, value)
    }
}
