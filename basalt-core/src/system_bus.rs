//! Default composition of backing RAM and MMIO devices into a [`Bus`].

use crate::address_range::AddressRange;
use crate::bus::{AccessWidth, Bus, MemoryError};
use crate::resources::{CharConsole, Ram};
use log::debug;

/// Absolute address of the character console device.
pub const CONSOLE_ADDRESS: u32 = 0x1000_0000;

/// A device reachable through the MMIO dispatch table.
///
/// Offsets are relative to the base of the range the device is mapped at.
/// Devices decide which `(offset, width)` pairs they support; unsupported
/// accesses fail with [`MemoryError::AccessFault`].
pub trait MmioDevice {
    fn read(&mut self, offset: u32, width: AccessWidth) -> Result<u32, MemoryError>;
    fn write(&mut self, offset: u32, width: AccessWidth, value: u32) -> Result<(), MemoryError>;
}

/// Identifies every device attached to a [`SystemBus`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Device {
    Console,
}

/// Abstraction of a system's main bus connecting all resources to the core.
///
/// Every access is first checked for natural alignment, then dispatched
/// through the MMIO table, then against backing RAM. Addresses mapped by
/// neither fault. The MMIO ranges are disjoint from the RAM range by
/// construction.
///
/// The default wiring maps a [`CharConsole`] at [`CONSOLE_ADDRESS`].
#[derive(Debug)]
pub struct SystemBus {
    ram_range: AddressRange,
    ram: Ram,
    mmio_map: Vec<(AddressRange, Device)>,
    console: CharConsole,
}

impl SystemBus {
    /// Creates a bus with `size` bytes of RAM based at `base` and the default
    /// MMIO wiring.
    ///
    /// Returns `None` if the RAM region is empty, wraps past the top of the
    /// address space, or overlaps the console.
    pub fn new(base: u32, size: usize) -> Option<Self> {
        let ram = Ram::new(size)?;
        let ram_range = AddressRange::with_size(base, u32::try_from(size).ok()?)?;
        let console_range = AddressRange::with_size(CONSOLE_ADDRESS, 4).unwrap();
        if ram_range.contains(console_range.start()) || console_range.contains(ram_range.start()) {
            return None;
        }
        Some(Self {
            ram_range,
            ram,
            mmio_map: vec![(console_range, Device::Console)],
            console: CharConsole::new(),
        })
    }

    /// The address range covered by backing RAM.
    pub fn ram_range(&self) -> AddressRange {
        self.ram_range
    }

    /// Copies `image` into RAM at absolute address `address`.
    /// Returns `false` (copying nothing) if the image does not fit in RAM.
    pub fn load_image(&mut self, address: u32, image: &[u8]) -> bool {
        if !self.ram_range.contains(address) {
            return false;
        }
        self.ram.load_image(self.ram_range.offset(address), image)
    }

    /// The character console attached to this bus.
    pub fn console(&self) -> &CharConsole {
        &self.console
    }

    pub fn console_mut(&mut self) -> &mut CharConsole {
        &mut self.console
    }

    fn device_of(&mut self, device: Device) -> &mut dyn MmioDevice {
        match device {
            Device::Console => &mut self.console,
        }
    }

    /// Looks up the MMIO device mapped at `address`, if any.
    fn mmio_at(&self, address: u32) -> Option<(Device, u32)> {
        self.mmio_map
            .iter()
            .find(|(range, _)| range.contains(address))
            .map(|(range, device)| (*device, range.offset(address)))
    }

    fn check_alignment(address: u32, width: AccessWidth) -> Result<(), MemoryError> {
        match width.alignment().is_aligned(address) {
            true => Ok(()),
            false => Err(MemoryError::Misaligned),
        }
    }
}

impl Bus for SystemBus {
    fn read(&mut self, address: u32, width: AccessWidth) -> Result<u32, MemoryError> {
        Self::check_alignment(address, width)?;
        if let Some((device, offset)) = self.mmio_at(address) {
            return self.device_of(device).read(offset, width);
        }
        if self.ram_range.contains_access(address, width.bytes()) {
            // The read cannot fail: the access was checked against the RAM range.
            return Ok(self.ram.read(self.ram_range.offset(address), width).unwrap());
        }
        debug!("read fault at {address:#010x}");
        Err(MemoryError::AccessFault)
    }

    fn write(&mut self, address: u32, width: AccessWidth, value: u32) -> Result<(), MemoryError> {
        Self::check_alignment(address, width)?;
        if let Some((device, offset)) = self.mmio_at(address) {
            return self.device_of(device).write(offset, width, value);
        }
        if self.ram_range.contains_access(address, width.bytes()) {
            self.ram
                .write(self.ram_range.offset(address), width, value)
                .unwrap();
            return Ok(());
        }
        debug!("write fault at {address:#010x}");
        Err(MemoryError::AccessFault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ram_access() {
        let mut bus = SystemBus::new(0x1000, 0x100).unwrap();
        bus.write(0x1010, AccessWidth::Word, 0xDEAD_BEEF).unwrap();
        assert_eq!(Ok(0xDEAD_BEEF), bus.read(0x1010, AccessWidth::Word));
        assert_eq!(Ok(0xBEEF), bus.read(0x1010, AccessWidth::Halfword));
    }

    #[test]
    fn test_misaligned_access() {
        let mut bus = SystemBus::new(0, 0x100).unwrap();
        assert_eq!(
            Err(MemoryError::Misaligned),
            bus.read(0x2, AccessWidth::Word)
        );
        assert_eq!(
            Err(MemoryError::Misaligned),
            bus.write(0x1, AccessWidth::Halfword, 0)
        );
    }

    #[test]
    fn test_unmapped_access() {
        let mut bus = SystemBus::new(0, 0x100).unwrap();
        assert_eq!(
            Err(MemoryError::AccessFault),
            bus.read(0x100, AccessWidth::Byte)
        );
        assert_eq!(
            Err(MemoryError::AccessFault),
            bus.read(0x2000_0000, AccessWidth::Word)
        );
        // Aligned access straddling the end of RAM.
        let mut bus = SystemBus::new(0, 0xFE).unwrap();
        assert_eq!(
            Err(MemoryError::AccessFault),
            bus.read(0xFC, AccessWidth::Word)
        );
    }

    #[test]
    fn test_console_dispatch() {
        let mut bus = SystemBus::new(0, 0x100).unwrap();
        bus.write(CONSOLE_ADDRESS, AccessWidth::Byte, b'x' as u32)
            .unwrap();
        assert_eq!(Ok(0), bus.read(CONSOLE_ADDRESS, AccessWidth::Word));
        assert_eq!(b"x", bus.console().output());
        // Only the device base address is mapped.
        assert_eq!(
            Err(MemoryError::AccessFault),
            bus.write(CONSOLE_ADDRESS + 1, AccessWidth::Byte, 0)
        );
        assert_eq!(
            Err(MemoryError::AccessFault),
            bus.write(CONSOLE_ADDRESS + 0x10, AccessWidth::Byte, 0)
        );
    }

    #[test]
    fn test_load_image() {
        let mut bus = SystemBus::new(0x8000, 0x100).unwrap();
        assert!(bus.load_image(0x8004, &[0x13, 0x00, 0x00, 0x00]));
        assert_eq!(Ok(0x13), bus.read_instruction(0x8004));
        assert!(!bus.load_image(0x7FFF, &[0]));
    }
}
