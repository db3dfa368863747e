//! Serial NOR flash slave model.
//!
//! A W25Q-style SPI flash implementing the command subset firmware actually
//! issues over this controller:
//!
//! - 0x9F: JEDEC ID → EF 40 <capacity>
//! - 0x03: Read Data (addr24, then continuous read)
//! - 0x0B: Fast Read (addr24 + 1 dummy, then continuous read)
//! - 0x05: Read Status Register 1 (bit 1 = WEL; never busy)
//! - 0x06 / 0x04: Write Enable / Write Disable
//! - 0x02: Page Program (addr24 + data, wraps within a 256-byte page)
//! - 0xB9 / 0xAB: Power Down / Release Power Down (returns device ID)
//!
//! The chip-select boundary is not carried on the serial bus, so the host
//! forwards chip-select deassertion via [`SerialFlash::deselect`], which ends
//! the current command.

use crate::device::SpiDevice;

const PAGE_SIZE: u32 = 256;

// JEDEC identification (Winbond, SPI NOR; capacity byte derived from size)
const JEDEC_MFR: u8 = 0xEF;
const JEDEC_TYPE: u8 = 0x40;
const DEVICE_ID: u8 = 0x16;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    /// Waiting for a command byte.
    Command,
    /// Accumulating a 24-bit big-endian address for `cmd`.
    Address { cmd: u8, got: u8, addr: u32 },
    /// Fast Read dummy byte before data starts.
    Dummy { addr: u32 },
    /// Streaming read data.
    Read { addr: u32 },
    /// Streaming JEDEC ID bytes.
    JedecId { index: u8 },
    /// Release Power Down: three dummy bytes, then the device ID.
    ReleaseId { index: u8 },
    /// Streaming status register 1.
    Status,
    /// Streaming program data into a page.
    Program { addr: u32 },
    /// Command consumed or unknown; discard until deselect.
    Drain,
}

pub struct SerialFlash {
    data: Vec<u8>,
    phase: Phase,
    write_enabled: bool,
    powered_down: bool,
}

impl SerialFlash {
    /// Create an erased flash of `capacity` bytes (power of two).
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        SerialFlash {
            data: vec![0xFF; capacity],
            phase: Phase::Command,
            write_enabled: false,
            powered_down: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Preload image bytes at `offset`, clamped to capacity.
    pub fn load(&mut self, offset: usize, image: &[u8]) {
        let end = (offset + image.len()).min(self.data.len());
        if end > offset {
            self.data[offset..end].copy_from_slice(&image[..end - offset]);
        }
    }

    pub fn read_byte(&self, addr: usize) -> u8 {
        self.data[addr % self.data.len()]
    }

    pub fn write_enabled(&self) -> bool {
        self.write_enabled
    }

    /// Chip select went high: the command in progress ends. Completing a
    /// page program clears the write-enable latch, as on the real part.
    pub fn deselect(&mut self) {
        if let Phase::Program { .. } = self.phase {
            self.write_enabled = false;
        }
        self.phase = Phase::Command;
    }

    fn mask(&self, addr: u32) -> u32 {
        addr & (self.data.len() as u32 - 1)
    }

    fn command(&mut self, cmd: u8) -> u8 {
        self.phase = match cmd {
            0x03 | 0x0B | 0x02 => Phase::Address { cmd, got: 0, addr: 0 },
            0x9F => Phase::JedecId { index: 0 },
            0x05 => Phase::Status,
            0x06 => {
                self.write_enabled = true;
                Phase::Drain
            }
            0x04 => {
                self.write_enabled = false;
                Phase::Drain
            }
            0xB9 => {
                self.powered_down = true;
                Phase::Drain
            }
            0xAB => {
                self.powered_down = false;
                Phase::ReleaseId { index: 0 }
            }
            _ => Phase::Drain,
        };
        0xFF
    }

    /// Capacity byte of the JEDEC ID, e.g. 0x17 for 8 MiB (2^23).
    fn jedec_capacity(&self) -> u8 {
        self.data.len().trailing_zeros() as u8
    }
}

impl SpiDevice for SerialFlash {
    fn transfer(&mut self, mosi: u8) -> u8 {
        // A powered-down part ignores everything except Release Power Down.
        if self.powered_down && self.phase == Phase::Command && mosi != 0xAB {
            return 0xFF;
        }

        match self.phase {
            Phase::Command => self.command(mosi),

            Phase::Address { cmd, got, addr } => {
                let addr = (addr << 8) | u32::from(mosi);
                if got + 1 < 3 {
                    self.phase = Phase::Address { cmd, got: got + 1, addr };
                } else {
                    let addr = self.mask(addr);
                    self.phase = match cmd {
                        0x0B => Phase::Dummy { addr },
                        0x02 => Phase::Program { addr },
                        _ => Phase::Read { addr },
                    };
                }
                0xFF
            }

            Phase::Dummy { addr } => {
                self.phase = Phase::Read { addr };
                0xFF
            }

            Phase::Read { addr } => {
                let val = self.data[addr as usize];
                self.phase = Phase::Read { addr: self.mask(addr.wrapping_add(1)) };
                val
            }

            Phase::JedecId { index } => {
                let val = match index {
                    0 => JEDEC_MFR,
                    1 => JEDEC_TYPE,
                    2 => self.jedec_capacity(),
                    _ => 0x00,
                };
                self.phase = Phase::JedecId { index: index.saturating_add(1) };
                val
            }

            Phase::ReleaseId { index } => {
                self.phase = Phase::ReleaseId { index: index.saturating_add(1) };
                if index >= 3 { DEVICE_ID } else { 0xFF }
            }

            Phase::Status => (self.write_enabled as u8) << 1,

            Phase::Program { addr } => {
                if self.write_enabled {
                    // Programming clears bits; it never sets them back to 1.
                    self.data[addr as usize] &= mosi;
                    let page = addr & !(PAGE_SIZE - 1);
                    self.phase = Phase::Program { addr: page | ((addr + 1) & (PAGE_SIZE - 1)) };
                }
                0xFF
            }

            Phase::Drain => 0xFF,
        }
    }
}
