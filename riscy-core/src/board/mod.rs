//! Provides the virtual machine: a single hart wired to RAM and a small set of devices.

mod system_bus;

use crate::address_map::{AddressMap, AddressMapError};
use crate::address_range::InvalidBoundsError;
use crate::core::{Core, EcallMode, FatalError, SelfTestOutcome, StepResult};
use crate::resources::clint::{Clint, Timebase};
use crate::resources::framebuffer::{Framebuffer, FramebufferHandle, BYTES_PER_PIXEL};
use crate::resources::plic::Plic;
use crate::resources::ram::Ram;
use crate::resources::uart::{Console, Uart};
use crate::AddressRange;
use log::warn;
use system_bus::{Resource, SystemBus};
use thiserror::Error;

pub const CLINT_BASE: u32 = 0x0200_0000;
pub const PLIC_BASE: u32 = 0x0C00_0000;
pub const UART0_BASE: u32 = 0x1000_0000;
pub const FRAMEBUFFER_BASE: u32 = 0x3000_0000;

/// PLIC source the UART interrupt line is wired to.
pub const UART0_IRQ: usize = 10;

/// PLIC context of the M-mode external interrupt line.
const MACHINE_CONTEXT: usize = 0;
/// PLIC context of the S-mode external interrupt line.
const SUPERVISOR_CONTEXT: usize = 1;

/// Every this many steps the UART pulls console input on its own, so that interrupt-driven
/// drivers receive input without polling the line status register.
const UART_POLL_INTERVAL: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Start of the boot image, which is also where the core starts executing.
    pub ram_base: u32,
    /// What an `ecall` instruction does.
    pub ecall_mode: EcallMode,
    pub framebuffer_width: u32,
    pub framebuffer_height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ram_base: crate::core::DEFAULT_RESET_VECTOR,
            ecall_mode: EcallMode::default(),
            framebuffer_width: 320,
            framebuffer_height: 200,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("a {width}x{height} framebuffer does not fit in the address space")]
    FramebufferTooLarge { width: u32, height: u32 },
    #[error("invalid device window")]
    DeviceWindow(#[from] InvalidBoundsError),
    #[error("invalid memory map")]
    MemoryMap(#[from] AddressMapError),
}

/// RISC-V hardware platform with a single-hart core, RAM, a CLINT, a PLIC, a UART and a
/// framebuffer.
///
/// > A RISC-V hardware platform can contain one or more RISC-V-compatible processing cores together
/// > with other non-RISC-V-compatible cores, fixed-function accelerators, various physical memory
/// > structures, I/O devices, and an interconnect structure to allow the components to communicate.
///
/// The board owns everything. The only state shared with other threads is the [`Timebase`] that
/// drives the CLINT, and the framebuffer pixels behind a [`FramebufferHandle`].
#[derive(Debug)]
pub struct Board {
    /// The single core of this board. Multiprocessing is not supported.
    core: Core,
    system_bus: SystemBus,
    timebase: Timebase,
    steps: u64,
}

impl Board {
    pub fn new(
        config: Config,
        console: Box<dyn Console>,
        timebase: Timebase,
    ) -> Result<Self, ConfigError> {
        let Config {
            ram_base,
            ecall_mode,
            framebuffer_width: width,
            framebuffer_height: height,
        } = config;

        let framebuffer_size = width
            .checked_mul(height)
            .and_then(|pixels| pixels.checked_mul(BYTES_PER_PIXEL as u32))
            .ok_or(ConfigError::FramebufferTooLarge { width, height })?;

        let memory_map = AddressMap::try_from(vec![
            (
                AddressRange::new(CLINT_BASE, CLINT_BASE + 0xBFFF)?,
                Resource::Clint,
            ),
            (
                AddressRange::new(PLIC_BASE, PLIC_BASE + 0x03FF_FFFF)?,
                Resource::Plic,
            ),
            (
                AddressRange::new(UART0_BASE, UART0_BASE + 0xFF)?,
                Resource::Uart0,
            ),
            (
                AddressRange::with_size(FRAMEBUFFER_BASE, framebuffer_size)?,
                Resource::Framebuffer,
            ),
        ])?;

        let system_bus = SystemBus {
            memory_map,
            ram: Ram::new(),
            clint: Clint::new(timebase.clone()),
            plic: Plic::new(),
            uart0: Uart::new(console),
            framebuffer: Framebuffer::new(width, height),
        };

        let core = Core::new(
            crate::core::Config {
                reset_vector: ram_base,
                ecall_mode,
            },
            timebase.clone(),
        );

        Ok(Self {
            core,
            system_bus,
            timebase,
            steps: 0,
        })
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut Core {
        &mut self.core
    }

    pub fn ram(&self) -> &Ram {
        &self.system_bus.ram
    }

    pub fn timebase(&self) -> &Timebase {
        &self.timebase
    }

    /// A handle to the pixels, for rendering them on another thread.
    pub fn framebuffer_handle(&self) -> FramebufferHandle {
        self.system_bus.framebuffer.handle()
    }

    /// Number of steps executed since the board was created.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Write a byte buffer into RAM.
    ///
    /// Bytes that fall into device windows are skipped.
    pub fn load_physical(&mut self, base_address: u32, buf: &[u8]) {
        let memory_map = &self.system_bus.memory_map;
        let mut offset = 0;
        while offset < buf.len() {
            let address = base_address.wrapping_add(offset as u32);
            let (range, resource) = memory_map.range_value(address);
            let len = ((range.end() - address) as usize + 1).min(buf.len() - offset);
            let chunk = &buf[offset..offset + len];
            match resource {
                None => self.system_bus.ram.write(address, chunk),
                Some(resource) => {
                    warn!("load: skipping {len} bytes at {address:#010x} in {resource:?} window");
                }
            }
            offset += len;
        }
    }

    /// Execute a single instruction, then deliver a pending interrupt, if any.
    ///
    /// The interrupt lines of the devices are sampled both before the instruction, so `wfi` and
    /// CSR reads of `mip` see the current state, and after it, so that the interrupt is taken right
    /// away.
    pub fn step(&mut self) -> Result<StepResult, FatalError> {
        self.update_interrupt_lines();
        let result = self.core.step(&mut self.system_bus)?;
        self.steps += 1;

        let uart0 = &mut self.system_bus.uart0;
        if self.steps % UART_POLL_INTERVAL == 0 && uart0.rx_interrupt_enabled() {
            uart0.poll_input();
        }

        if result == StepResult::Continue {
            self.update_interrupt_lines();
            self.core.take_interrupt();
        }
        Ok(result)
    }

    /// Run until a self-test program exits, or until `max_steps` steps have been executed.
    ///
    /// Returns `None` if the step limit was hit first.
    pub fn run(&mut self, max_steps: Option<u64>) -> Result<Option<SelfTestOutcome>, FatalError> {
        let mut executed = 0;
        while max_steps.map_or(true, |max| executed < max) {
            if let StepResult::SelfTestExit(outcome) = self.step()? {
                return Ok(Some(outcome));
            }
            executed += 1;
        }
        Ok(None)
    }

    /// Copy the level of every device interrupt line into `mip`.
    fn update_interrupt_lines(&mut self) {
        let bus = &mut self.system_bus;
        bus.plic.set_level(UART0_IRQ, bus.uart0.interrupt_pending());

        let interrupts = &mut self.core.csrs_mut().interrupts;
        interrupts.set_m_soft(bus.clint.software_interrupt());
        interrupts.set_m_timer(bus.clint.timer_interrupt());
        interrupts.set_m_external(bus.plic.context_interrupt(MACHINE_CONTEXT));
        interrupts.set_s_external(bus.plic.context_interrupt(SUPERVISOR_CONTEXT));
    }
}
