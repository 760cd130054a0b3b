use crate::address_map::AddressMap;
use crate::bus::Bus;
use crate::resources::clint::Clint;
use crate::resources::framebuffer::Framebuffer;
use crate::resources::plic::Plic;
use crate::resources::ram::Ram;
use crate::resources::uart::Uart;
use log::warn;

/// Enum that uniquely identifies every memory-mapped device attached to a [`SystemBus`].
///
/// RAM is not in here, it takes every address no device claims.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub(super) enum Resource {
    Clint,
    Plic,
    Uart0,
    Framebuffer,
}

/// Where an accepted access goes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Target {
    Device(Resource),
    Ram,
}

/// Abstraction of a system's main bus connecting all devices to the core.
///
/// This can be thought of as a crossbar providing a single *master* interface for the entire
/// 32-bit physical address space, and delegating requests to the appropriate device's *slave*
/// interface depending on the memory map. Addresses that no device claims go to RAM, so there are
/// no vacant regions.
///
/// Accesses are always in the form of `(address, size)` pairs. The access request is forwarded
/// if and only if the entire address range `address..(address+size)` is contained within the
/// region that `address` is in. Devices see the offset into their region, RAM sees the physical
/// address. Otherwise, the access is not forwarded, reads return zeros, and a warning is logged.
#[derive(Debug)]
pub(super) struct SystemBus {
    pub memory_map: AddressMap<Resource>,
    pub ram: Ram,
    pub clint: Clint,
    pub plic: Plic,
    pub uart0: Uart,
    pub framebuffer: Framebuffer,
}

impl SystemBus {
    /// Validates the `(address, size)` pair, returning `Some((target, mapped_address))` if the
    /// access is accepted, and `None` otherwise.
    fn check_access(&self, address: u32, size: usize) -> Option<(Target, u32)> {
        let (range, resource) = self.memory_map.range_value(address);

        if size
            .checked_sub(1)
            .and_then(|delta| u32::try_from(delta).ok())
            .map(|delta| range.end() - address < delta)
            .unwrap_or(true)
        {
            return None;
        }

        Some(match resource {
            Some(&resource) => (Target::Device(resource), address - range.start()),
            None => (Target::Ram, address),
        })
    }

    fn bus_of(&mut self, target: Target) -> &mut dyn Bus {
        match target {
            Target::Device(Resource::Clint) => &mut self.clint,
            Target::Device(Resource::Plic) => &mut self.plic,
            Target::Device(Resource::Uart0) => &mut self.uart0,
            Target::Device(Resource::Framebuffer) => &mut self.framebuffer,
            Target::Ram => &mut self.ram,
        }
    }
}

impl Bus for SystemBus {
    fn read(&mut self, buf: &mut [u8], address: u32) {
        match self.check_access(address, buf.len()) {
            Some((target, mapped_address)) => self.bus_of(target).read(buf, mapped_address),
            None => {
                warn!(
                    "bus: read of {} bytes at {address:#010x} crosses a region boundary",
                    buf.len()
                );
                buf.fill(0);
            }
        }
    }

    fn write(&mut self, address: u32, buf: &[u8]) {
        match self.check_access(address, buf.len()) {
            Some((target, mapped_address)) => self.bus_of(target).write(mapped_address, buf),
            None => warn!(
                "bus: write of {} bytes at {address:#010x} crosses a region boundary",
                buf.len()
            ),
        }
    }
}
