use crate::AddressRange;
use std::cmp::Ordering;
use thiserror::Error;

/// Generic map of 32-bit address ranges to values of type `T`.
///
/// The ranges cannot overlap. Addresses outside every range are *vacant*; lookups report the
/// largest vacant range around them.
#[derive(Debug)]
pub struct AddressMap<T> {
    ordered_ranges: Vec<(AddressRange, T)>,
}

impl<T> Default for AddressMap<T> {
    fn default() -> Self {
        Self {
            ordered_ranges: Vec::new(),
        }
    }
}

impl<T> AddressMap<T> {
    /// Returns the address range that contains `address`.
    ///
    /// Note that even if `address` maps to a vacant region, that region's range will be returned.
    pub fn range(&self, address: u32) -> AddressRange {
        self.range_value(address).0
    }

    /// Returns the value that the address range containing `address` maps to, or `None` if that
    /// address range is vacant.
    pub fn value(&self, address: u32) -> Option<&T> {
        self.range_value(address).1
    }

    /// Returns the address range that contains `address`, and the value that it maps to.
    ///
    /// The second item will be `None` if `address` is in a vacant region.
    pub fn range_value(&self, address: u32) -> (AddressRange, Option<&T>) {
        match self.ordered_ranges.binary_search_by(|(range, _)| {
            if address < range.start() {
                Ordering::Greater
            } else if address <= range.end() {
                Ordering::Equal
            } else {
                Ordering::Less
            }
        }) {
            Ok(index) => {
                let (range, value) = &self.ordered_ranges[index];
                (*range, Some(value))
            }
            Err(index) => {
                // `index` is the first mapped range above `address`. Neither bound below can
                // overflow, since `address` lies strictly between both neighbours.
                let start = index
                    .checked_sub(1)
                    .and_then(|i| self.ordered_ranges.get(i))
                    .map(|(range, _)| range.end() + 1)
                    .unwrap_or(0);
                let end = self
                    .ordered_ranges
                    .get(index)
                    .map(|(range, _)| range.start() - 1)
                    .unwrap_or(u32::MAX);
                let vacant = AddressRange::new(start, end).unwrap_or_else(|_| AddressRange::full());
                (vacant, None)
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(AddressRange, T)> {
        self.ordered_ranges.iter()
    }
}

impl<T> TryFrom<Vec<(AddressRange, T)>> for AddressMap<T> {
    type Error = AddressMapError;

    fn try_from(mut value: Vec<(AddressRange, T)>) -> Result<Self, Self::Error> {
        value.sort_by_key(|(range, _)| range.start());

        for pair in value.windows(2) {
            let (prev_range, _) = &pair[0];
            let (range, _) = &pair[1];
            if range.start() <= prev_range.end() {
                return Err(AddressMapError::OverlappingAddressRanges {
                    first: *prev_range,
                    second: *range,
                });
            }
        }

        Ok(Self {
            ordered_ranges: value,
        })
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum AddressMapError {
    #[error("address range {first} overlaps with address range {second}")]
    OverlappingAddressRanges {
        first: AddressRange,
        second: AddressRange,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u32, end: u32) -> AddressRange {
        AddressRange::new(start, end).unwrap()
    }

    fn map() -> AddressMap<&'static str> {
        AddressMap::try_from(vec![
            (range(0x1000_0000, 0x1000_00FF), "uart"),
            (range(0x0200_0000, 0x0200_BFFF), "clint"),
            (range(0x0C00_0000, 0x0FFF_FFFF), "plic"),
        ])
        .unwrap()
    }

    #[test]
    fn test_mapped_lookup() {
        let map = map();
        assert_eq!(Some(&"clint"), map.value(0x0200_4000));
        assert_eq!(Some(&"plic"), map.value(0x0FFF_FFFF));
        assert_eq!(
            (range(0x1000_0000, 0x1000_00FF), Some(&"uart")),
            map.range_value(0x1000_0005)
        );
    }

    #[test]
    fn test_vacant_lookup() {
        let map = map();
        assert_eq!((range(0, 0x01FF_FFFF), None), map.range_value(0));
        assert_eq!(range(0x0200_C000, 0x0BFF_FFFF), map.range(0x0300_0000));
        assert_eq!(range(0x1000_0100, u32::MAX), map.range(0x8000_0000));
        assert_eq!(None, map.value(0x1000_0100));
    }

    #[test]
    fn test_empty_map() {
        let map = AddressMap::<()>::default();
        assert_eq!((AddressRange::full(), None), map.range_value(0x1234));
    }

    #[test]
    fn test_overlap_rejected() {
        let result = AddressMap::try_from(vec![
            (range(0x100, 0x1FF), 1),
            (range(0x1FF, 0x2FF), 2),
        ]);
        assert_eq!(
            Err(AddressMapError::OverlappingAddressRanges {
                first: range(0x100, 0x1FF),
                second: range(0x1FF, 0x2FF),
            }),
            result.map(|_| ())
        );
    }
}
