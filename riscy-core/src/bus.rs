//! The interface between the hart and everything it can load from and store to.

use std::fmt::Debug;

/// A byte-addressed bus over the 32-bit physical address space.
///
/// Accesses are made for any `(address, size)` pair; there are no alignment requirements. Values
/// are serialized in little-endian byte order in both directions.
///
/// All accesses must be handled without panics. A slave that does not support a particular access
/// may ignore it (reads then leave `buf` as it is), but must not corrupt anything outside its own
/// simulated state.
///
/// Reads take `&mut self` since reading a device register can have side effects, e.g. a UART
/// receive buffer read consumes the byte, and a PLIC claim read acknowledges the interrupt.
pub trait Bus: Debug {
    /// Invoke a read access for `address` with size `buf.len()`, writing the result to `buf`.
    fn read(&mut self, buf: &mut [u8], address: u32);

    /// Invoke a write access for `address` with size `buf.len()`, reading the data from `buf`.
    fn write(&mut self, address: u32, buf: &[u8]);
}
