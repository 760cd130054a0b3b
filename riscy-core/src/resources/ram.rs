use crate::bus::Bus;
use std::collections::HashMap;

/// Size of one RAM page in bytes.
pub const PAGE_SIZE: usize = 4096;

const_assert!(PAGE_SIZE.is_power_of_two());

/// Sparse byte-addressable RAM spanning the whole 32-bit address space.
///
/// Pages are allocated on their first write. Bytes that were never written read as zero. Accesses
/// wrap around at the end of the address space, and may cross page boundaries freely.
///
/// This can be categorized as *main memory* according to the types of memory resources defined by
/// the RISC-V spec.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Ram {
    pages: HashMap<u32, Box<[u8; PAGE_SIZE]>>,
}

impl Ram {
    /// Create a new RAM resource with every byte reading as zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pages that are backed by actual memory.
    pub fn allocated_pages(&self) -> usize {
        self.pages.len()
    }

    /// Force RAM back to its reset state, which is all-zeros.
    pub fn reset(&mut self) {
        self.pages.clear();
    }

    /// Reads `buf.len()` bytes starting at `address` into `buf`. Does not have side effects.
    pub fn read(&self, buf: &mut [u8], address: u32) {
        let mut done = 0;
        while done < buf.len() {
            let current = address.wrapping_add(done as u32);
            let (page, offset) = split(current);
            let len = (PAGE_SIZE - offset).min(buf.len() - done);
            let chunk = &mut buf[done..done + len];
            match self.pages.get(&page) {
                Some(data) => chunk.copy_from_slice(&data[offset..offset + len]),
                None => chunk.fill(0),
            }
            done += len;
        }
    }

    /// Writes the bytes of `buf` to consecutive addresses starting at `address`.
    pub fn write(&mut self, address: u32, buf: &[u8]) {
        let mut done = 0;
        while done < buf.len() {
            let current = address.wrapping_add(done as u32);
            let (page, offset) = split(current);
            let len = (PAGE_SIZE - offset).min(buf.len() - done);
            let data = self
                .pages
                .entry(page)
                .or_insert_with(|| Box::new([0; PAGE_SIZE]));
            data[offset..offset + len].copy_from_slice(&buf[done..done + len]);
            done += len;
        }
    }
}

/// Splits an address into its page number and the offset within that page.
fn split(address: u32) -> (u32, usize) {
    (
        address / PAGE_SIZE as u32,
        address as usize & (PAGE_SIZE - 1),
    )
}

impl Bus for Ram {
    fn read(&mut self, buf: &mut [u8], address: u32) {
        Ram::read(self, buf, address);
    }

    fn write(&mut self, address: u32, buf: &[u8]) {
        Ram::write(self, address, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritten_reads_zero() {
        let ram = Ram::new();
        let mut buf = [0xAA; 8];
        ram.read(&mut buf, 0x8000_0000);
        assert_eq!([0; 8], buf);
        assert_eq!(0, ram.allocated_pages());
    }

    #[test]
    fn test_write_then_read() {
        let mut ram = Ram::new();
        ram.write(0x8000_0010, &0xDEAD_BEEF_u32.to_le_bytes());
        let mut buf = [0; 4];
        ram.read(&mut buf, 0x8000_0010);
        assert_eq!(0xDEAD_BEEF, u32::from_le_bytes(buf));
        let mut byte = [0; 1];
        ram.read(&mut byte, 0x8000_0013);
        assert_eq!([0xDE], byte);
        assert_eq!(1, ram.allocated_pages());
    }

    #[test]
    fn test_page_crossing() {
        let mut ram = Ram::new();
        ram.write(0x0000_0FFE, &[1, 2, 3, 4]);
        assert_eq!(2, ram.allocated_pages());
        let mut buf = [0; 4];
        ram.read(&mut buf, 0x0000_0FFE);
        assert_eq!([1, 2, 3, 4], buf);
    }

    #[test]
    fn test_address_space_wraps() {
        let mut ram = Ram::new();
        ram.write(0xFFFF_FFFE, &[1, 2, 3, 4]);
        let mut buf = [0; 2];
        ram.read(&mut buf, 0);
        assert_eq!([3, 4], buf);
    }

    #[test]
    fn test_reset() {
        let mut ram = Ram::new();
        ram.write(0x100, &[7]);
        ram.reset();
        let mut buf = [0xFF];
        ram.read(&mut buf, 0x100);
        assert_eq!([0], buf);
        assert_eq!(0, ram.allocated_pages());
    }
}
