use std::fmt;
use std::fmt::{Display, Formatter};
use std::ops::RangeInclusive;
use thiserror::Error;

/// A non-empty range in a 32-bit address space bounded inclusively below and above.
///
/// Enforces the invariant that `self.start() <= self.end()`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AddressRange {
    start: u32,
    end: u32,
}

impl Default for AddressRange {
    fn default() -> Self {
        Self::full()
    }
}

impl Display for AddressRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x}]", self.start, self.end)
    }
}

impl AddressRange {
    pub fn new(start: u32, end: u32) -> Result<Self, InvalidBoundsError> {
        (start <= end)
            .then_some(Self { start, end })
            .ok_or(InvalidBoundsError { start, end })
    }

    /// Creates the range `start..start + size`.
    ///
    /// Fails if `size` is zero or the range does not fit below `u32::MAX`.
    pub fn with_size(start: u32, size: u32) -> Result<Self, InvalidBoundsError> {
        let end = size
            .checked_sub(1)
            .and_then(|delta| start.checked_add(delta))
            .ok_or(InvalidBoundsError {
                start,
                end: start.wrapping_add(size),
            })?;
        Self::new(start, end)
    }

    /// Create a new address range covering all possible 32-bit addresses.
    pub fn full() -> Self {
        Self {
            start: 0,
            end: u32::MAX,
        }
    }

    pub fn start(self) -> u32 {
        self.start
    }

    pub fn end(self) -> u32 {
        self.end
    }

    /// Check if an address is contained within this address range.
    pub fn contains(self, address: u32) -> bool {
        self.start <= address && address <= self.end
    }

    /// Check if all of `address..address + len` lies within this range.
    ///
    /// An empty access is contained if `address` is.
    pub fn contains_access(self, address: u32, len: usize) -> bool {
        if !self.contains(address) {
            return false;
        }
        match len.checked_sub(1).map(u32::try_from) {
            None => true,
            Some(Ok(delta)) => self.end - address >= delta,
            Some(Err(_)) => false,
        }
    }

    /// Returns `self.end() - self.start()`, which is the size minus 1.
    ///
    /// This value is always within the range `0..=u32::MAX`.
    pub fn delta(self) -> u32 {
        self.end - self.start
    }

    /// Returns the size of this address range if it is representable by a `usize`, or `None`
    /// otherwise.
    pub fn size(self) -> Option<usize> {
        usize::try_from(self.delta())
            .ok()
            .and_then(|n| n.checked_add(1))
    }
}

impl TryFrom<RangeInclusive<u32>> for AddressRange {
    type Error = InvalidBoundsError;

    fn try_from(value: RangeInclusive<u32>) -> Result<Self, Self::Error> {
        Self::new(*value.start(), *value.end())
    }
}

impl From<AddressRange> for RangeInclusive<u32> {
    fn from(value: AddressRange) -> Self {
        value.start..=value.end
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[error("bounds [{start:#x}, {end:#x}] do not form a valid 32-bit address range")]
pub struct InvalidBoundsError {
    start: u32,
    end: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        assert!(AddressRange::new(5, 4).is_err());
        let range = AddressRange::new(0x1000_0000, 0x1000_00FF).unwrap();
        assert!(range.contains(0x1000_0000));
        assert!(range.contains(0x1000_00FF));
        assert!(!range.contains(0x1000_0100));
        assert_eq!(Some(256), range.size());
        assert_eq!(Some(1 << 32), AddressRange::full().size());
        assert_eq!("[0x10000000, 0x100000ff]", range.to_string());
    }

    #[test]
    fn test_with_size() {
        let range = AddressRange::with_size(0x3000_0000, 320 * 200 * 4).unwrap();
        assert_eq!(0x3003_E7FF, range.end());
        assert!(AddressRange::with_size(0x3000_0000, 0).is_err());
        assert!(AddressRange::with_size(u32::MAX, 2).is_err());
        assert_eq!(u32::MAX, AddressRange::with_size(u32::MAX, 1).unwrap().end());
    }

    #[test]
    fn test_contains_access() {
        let range = AddressRange::new(0x100, 0x1FF).unwrap();
        assert!(range.contains_access(0x100, 4));
        assert!(range.contains_access(0x1FC, 4));
        assert!(!range.contains_access(0x1FE, 4));
        assert!(range.contains_access(0x1FF, 0));
        assert!(!range.contains_access(0x0FF, 1));
        assert!(AddressRange::full().contains_access(u32::MAX, 1));
    }
}
