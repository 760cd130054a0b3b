//! Core Local Interruptor and the wall-clock timebase it counts.

use crate::bus::Bus;
use log::warn;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

pub const MSIP_ADDR: u32 = 0x0;
pub const MTIMECMP_ADDR_LO: u32 = 0x4000;
pub const MTIMECMP_ADDR_HI: u32 = MTIMECMP_ADDR_LO + 4;
pub const MTIME_ADDR_LO: u32 = 0xBFF8;
pub const MTIME_ADDR_HI: u32 = MTIME_ADDR_LO + 4;

/// A free-running counter of milliseconds since the emulator started.
///
/// Shared between the engine, which only reads it, and whatever drives it (usually a background
/// task ticking every millisecond). Clones refer to the same counter.
#[derive(Debug, Clone, Default)]
pub struct Timebase(Arc<AtomicU64>);

impl Timebase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn advance(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }
}

/// Machine software interrupt and timer unit of the single hart.
#[derive(Debug)]
pub struct Clint {
    timebase: Timebase,
    /// Added to the timebase to get `mtime`, so that the guest can write `mtime`.
    mtime_offset: u64,
    mtimecmp: u64,
    msip: bool,
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum AccessError {
    #[error("unsupported access of {size} bytes at offset {offset:#x}")]
    InvalidAccess { offset: u32, size: usize },
    #[error("no register mapped to offset {0:#x}")]
    AddressInvalid(u32),
}

impl Clint {
    /// Create new CLINT in reset state, with `mtimecmp` at its maximum so no timer interrupt fires.
    pub fn new(timebase: Timebase) -> Self {
        Self {
            timebase,
            mtime_offset: 0,
            mtimecmp: u64::MAX,
            msip: false,
        }
    }

    pub fn mtime(&self) -> u64 {
        self.timebase.now().wrapping_add(self.mtime_offset)
    }

    fn set_mtime(&mut self, value: u64) {
        self.mtime_offset = value.wrapping_sub(self.timebase.now());
    }

    pub fn mtimecmp(&self) -> u64 {
        self.mtimecmp
    }

    /// Level of the machine software interrupt line (MSIP).
    pub fn software_interrupt(&self) -> bool {
        self.msip
    }

    /// Level of the machine timer interrupt line (MTIP).
    pub fn timer_interrupt(&self) -> bool {
        self.mtime() >= self.mtimecmp
    }

    pub fn read_u32(&self, offset: u32) -> Result<u32, AccessError> {
        let value = match offset {
            MSIP_ADDR => self.msip as u32,
            MTIMECMP_ADDR_LO => self.mtimecmp as u32,
            MTIMECMP_ADDR_HI => (self.mtimecmp >> 32) as u32,
            MTIME_ADDR_LO => self.mtime() as u32,
            MTIME_ADDR_HI => (self.mtime() >> 32) as u32,
            _ => return Err(AccessError::AddressInvalid(offset)),
        };
        Ok(value)
    }

    pub fn write_u32(&mut self, offset: u32, value: u32) -> Result<(), AccessError> {
        let value = value as u64;
        match offset {
            MSIP_ADDR => self.msip = value & 1 != 0,
            MTIMECMP_ADDR_LO => self.mtimecmp = (self.mtimecmp & !0xFFFF_FFFF) | value,
            MTIMECMP_ADDR_HI => self.mtimecmp = (self.mtimecmp & 0xFFFF_FFFF) | value << 32,
            MTIME_ADDR_LO => self.set_mtime((self.mtime() & !0xFFFF_FFFF) | value),
            MTIME_ADDR_HI => self.set_mtime((self.mtime() & 0xFFFF_FFFF) | value << 32),
            _ => return Err(AccessError::AddressInvalid(offset)),
        }
        Ok(())
    }

    pub fn read_u64(&self, offset: u32) -> Result<u64, AccessError> {
        match offset {
            MTIMECMP_ADDR_LO => Ok(self.mtimecmp),
            MTIME_ADDR_LO => Ok(self.mtime()),
            _ => Err(AccessError::InvalidAccess { offset, size: 8 }),
        }
    }

    pub fn write_u64(&mut self, offset: u32, value: u64) -> Result<(), AccessError> {
        match offset {
            MTIMECMP_ADDR_LO => self.mtimecmp = value,
            MTIME_ADDR_LO => self.set_mtime(value),
            _ => return Err(AccessError::InvalidAccess { offset, size: 8 }),
        }
        Ok(())
    }
}

impl Bus for Clint {
    /// Supports aligned 32-bit accesses to every register, and 64-bit accesses to `mtime` and
    /// `mtimecmp`.
    fn read(&mut self, buf: &mut [u8], address: u32) {
        let result = match buf.len() {
            4 if address % 4 == 0 => self
                .read_u32(address)
                .map(|value| buf.copy_from_slice(&value.to_le_bytes())),
            8 if address % 8 == 0 => self
                .read_u64(address)
                .map(|value| buf.copy_from_slice(&value.to_le_bytes())),
            size => Err(AccessError::InvalidAccess {
                offset: address,
                size,
            }),
        };
        if let Err(error) = result {
            warn!("clint: read: {error}");
            buf.fill(0);
        }
    }

    fn write(&mut self, address: u32, buf: &[u8]) {
        let result = match *buf {
            [a, b, c, d] if address % 4 == 0 => {
                self.write_u32(address, u32::from_le_bytes([a, b, c, d]))
            }
            [a, b, c, d, e, f, g, h] if address % 8 == 0 => {
                self.write_u64(address, u64::from_le_bytes([a, b, c, d, e, f, g, h]))
            }
            _ => Err(AccessError::InvalidAccess {
                offset: address,
                size: buf.len(),
            }),
        };
        if let Err(error) = result {
            warn!("clint: write: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mtime_follows_timebase() {
        let timebase = Timebase::new();
        let clint = Clint::new(timebase.clone());
        assert_eq!(Ok(0), clint.read_u32(MTIME_ADDR_LO));
        timebase.advance(25);
        assert_eq!(Ok(25), clint.read_u32(MTIME_ADDR_LO));
        timebase.set(0x1_0000_0002);
        assert_eq!(Ok(2), clint.read_u32(MTIME_ADDR_LO));
        assert_eq!(Ok(1), clint.read_u32(MTIME_ADDR_HI));
    }

    #[test]
    fn test_mtime_write() {
        let timebase = Timebase::new();
        let mut clint = Clint::new(timebase.clone());
        timebase.set(100);
        clint.write_u32(MTIME_ADDR_LO, 10).unwrap();
        assert_eq!(10, clint.mtime());
        timebase.advance(5);
        assert_eq!(15, clint.mtime());
        clint.write_u32(MTIME_ADDR_HI, 3).unwrap();
        assert_eq!(3 << 32 | 15, clint.mtime());
    }

    #[test]
    fn test_mtimecmp_halves() {
        let mut clint = Clint::new(Timebase::new());
        assert_eq!(u64::MAX, clint.mtimecmp());
        clint.write_u32(MTIMECMP_ADDR_LO, 0x1234).unwrap();
        assert_eq!(0xFFFF_FFFF_0000_1234, clint.mtimecmp());
        clint.write_u32(MTIMECMP_ADDR_HI, 0).unwrap();
        assert_eq!(0x1234, clint.mtimecmp());
        assert_eq!(Ok(0x1234), clint.read_u64(MTIMECMP_ADDR_LO));
    }

    #[test]
    fn test_timer_interrupt() {
        let timebase = Timebase::new();
        let mut clint = Clint::new(timebase.clone());
        assert!(!clint.timer_interrupt());
        clint.write_u64(MTIMECMP_ADDR_LO, 10).unwrap();
        assert!(!clint.timer_interrupt());
        timebase.set(10);
        assert!(clint.timer_interrupt());
        clint.write_u64(MTIMECMP_ADDR_LO, 20).unwrap();
        assert!(!clint.timer_interrupt());
    }

    #[test]
    fn test_software_interrupt() {
        let mut clint = Clint::new(Timebase::new());
        let mut buf = 3u32.to_le_bytes();
        Bus::write(&mut clint, MSIP_ADDR, &buf);
        assert!(clint.software_interrupt());
        Bus::read(&mut clint, &mut buf, MSIP_ADDR);
        assert_eq!(1, u32::from_le_bytes(buf));
        clint.write_u32(MSIP_ADDR, 0).unwrap();
        assert!(!clint.software_interrupt());
    }

    #[test]
    fn test_invalid_accesses() {
        let mut clint = Clint::new(Timebase::new());
        assert_eq!(Err(AccessError::AddressInvalid(0x8)), clint.read_u32(0x8));
        assert_eq!(
            Err(AccessError::InvalidAccess {
                offset: MSIP_ADDR,
                size: 8
            }),
            clint.write_u64(MSIP_ADDR, 1)
        );
        let mut buf = [0xFF; 2];
        Bus::read(&mut clint, &mut buf, MTIME_ADDR_LO);
        assert_eq!([0, 0], buf);
    }
}
