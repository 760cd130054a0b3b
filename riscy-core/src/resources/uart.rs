//! Implementation of a 16550-style UART with a pluggable host console.

use crate::bus::Bus;
use bitvec::order::Lsb0;
use bitvec::view::BitView;
use log::warn;
use std::collections::VecDeque;
use std::fmt::Debug;
use thiserror::Error;

/// The host side of the serial line.
///
/// Host I/O errors are the console's own business: a failed read is reported as "no data", and a
/// failed write is dropped.
pub trait Console: Debug + Send {
    /// Emit a byte the guest transmitted.
    fn write_byte(&mut self, byte: u8);

    /// Non-blocking poll for a byte to hand to the guest.
    fn read_byte(&mut self) -> Option<u8>;
}

/// In-memory console, for headless runs and tests.
#[derive(Debug, Default, Clone)]
pub struct BufferConsole {
    pub input: VecDeque<u8>,
    pub output: Vec<u8>,
}

impl BufferConsole {
    pub fn with_input(input: &[u8]) -> Self {
        Self {
            input: input.iter().copied().collect(),
            output: Vec::new(),
        }
    }
}

impl Console for BufferConsole {
    fn write_byte(&mut self, byte: u8) {
        self.output.push(byte);
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.input.pop_front()
    }
}

/// Line Status Register bits.
mod lsr {
    /// Data Ready
    pub const DR: usize = 0;
    /// Transmitter Holding Register Empty
    pub const THRE: usize = 5;
    /// Transmitter Empty
    pub const TEMT: usize = 6;
}

/// Interrupt Enable Register bits.
mod ier {
    /// Enable Received Data Available Interrupt
    pub const ERBFI: usize = 0;
    /// Enable Transmitter Holding Register Empty Interrupt
    pub const ETBEI: usize = 1;
}

const IIR_NO_INTERRUPT: u8 = 0x01;
const IIR_THR_EMPTY: u8 = 0x02;
const IIR_RECEIVED_DATA: u8 = 0x04;
const IIR_FIFOS_ENABLED: u8 = 0xC0;

/// UART device, register compatible with the 16550 as far as a polling or interrupt-driven console
/// driver can tell. There are no FIFOs: a transmitted byte goes straight to the console, and the
/// receiver holds a single byte.
///
/// Resources:
/// - <https://uart16550.readthedocs.io>
/// - <https://github.com/qemu/qemu/blob/master/hw/char/serial.c>
#[derive(Debug)]
pub struct Uart {
    console: Box<dyn Console>,
    /// Receiver Buffer Register
    rbr: u8,
    /// Interrupt Enable Register
    ier: u8,
    /// Line Control Register
    lcr: u8,
    /// Modem Control Register
    mcr: u8,
    /// Line Status Register
    lsr: u8,
    /// Scratch Register
    scr: u8,
    /// FIFO enable bit of the last FIFO Control Register write
    fifo_enabled: bool,
    /// Divisor latch: low byte, high byte, and prescaler division
    divisor: [u8; 3],
    /// A THR-empty interrupt is due, until IIR reports it or THR is written again.
    thre_interrupt: bool,
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum AccessError {
    #[error("cannot write to read-only register {0}")]
    ReadOnly(&'static str),
    #[error("no register mapped to offset {0:#x}")]
    AddressInvalid(u32),
}

impl Uart {
    /// Create new UART in reset state.
    pub fn new(console: Box<dyn Console>) -> Self {
        Self {
            console,
            rbr: 0,
            ier: 0,
            lcr: 0x03,
            mcr: 0,
            lsr: 0x60,
            scr: 0,
            fifo_enabled: false,
            divisor: [0; 3],
            thre_interrupt: false,
        }
    }

    /// Returns `true` if the Divisor Latch Access Bit is `1`.
    fn dlab(&self) -> bool {
        self.lcr.view_bits::<Lsb0>()[7]
    }

    fn data_ready(&self) -> bool {
        self.lsr.view_bits::<Lsb0>()[lsr::DR]
    }

    fn set_data_ready(&mut self, value: bool) {
        self.lsr.view_bits_mut::<Lsb0>().set(lsr::DR, value);
    }

    /// Whether the guest enabled the received data interrupt.
    pub fn rx_interrupt_enabled(&self) -> bool {
        self.ier.view_bits::<Lsb0>()[ier::ERBFI]
    }

    fn tx_interrupt_enabled(&self) -> bool {
        self.ier.view_bits::<Lsb0>()[ier::ETBEI]
    }

    /// The level of the interrupt line going to the PLIC.
    pub fn interrupt_pending(&self) -> bool {
        self.interrupt_id() != IIR_NO_INTERRUPT
    }

    /// The highest priority pending interrupt in IIR encoding, received data first.
    fn interrupt_id(&self) -> u8 {
        if self.rx_interrupt_enabled() && self.data_ready() {
            IIR_RECEIVED_DATA
        } else if self.tx_interrupt_enabled() && self.thre_interrupt {
            IIR_THR_EMPTY
        } else {
            IIR_NO_INTERRUPT
        }
    }

    /// Pulls one byte from the console into the receiver buffer, unless it still holds one.
    pub fn poll_input(&mut self) {
        if self.data_ready() {
            return;
        }
        if let Some(byte) = self.console.read_byte() {
            self.rbr = byte;
            self.set_data_ready(true);
        }
    }

    /// Read the 8-bit register at `offset`, performing any read side effects.
    pub fn read(&mut self, offset: u32) -> Result<u8, AccessError> {
        let dlab = self.dlab();
        let value = match offset {
            0 if dlab => self.divisor[0],
            0 => self.read_rbr(),
            1 if dlab => self.divisor[1],
            1 => self.ier,
            2 if dlab => self.divisor[2],
            2 => self.read_iir(),
            3 => self.lcr,
            4 => self.mcr,
            5 => self.read_lsr(),
            // No modem is attached: CTS, DSR, and DCD are reported as asserted
            6 => 0xB0,
            7 => self.scr,
            _ => return Err(AccessError::AddressInvalid(offset)),
        };
        Ok(value)
    }

    /// Write the 8-bit register at `offset`.
    pub fn write(&mut self, offset: u32, value: u8) -> Result<(), AccessError> {
        let dlab = self.dlab();
        match offset {
            0..=2 if dlab => self.divisor[offset as usize] = value,
            0 => self.write_thr(value),
            1 => self.write_ier(value),
            2 => self.fifo_enabled = value.view_bits::<Lsb0>()[0],
            3 => self.lcr = value,
            4 => self.mcr = value,
            5 => return Err(AccessError::ReadOnly("Line Status Register")),
            6 => return Err(AccessError::ReadOnly("Modem Status Register")),
            7 => self.scr = value,
            _ => return Err(AccessError::AddressInvalid(offset)),
        }
        Ok(())
    }

    /// Reads the Receiver Buffer Register, which empties it.
    fn read_rbr(&mut self) -> u8 {
        self.set_data_ready(false);
        self.rbr
    }

    /// Reads the Line Status Register, first polling the console for input.
    fn read_lsr(&mut self) -> u8 {
        self.poll_input();
        self.lsr
    }

    /// Reads the Interrupt Identification Register.
    ///
    /// Reporting a THR-empty interrupt acknowledges it.
    fn read_iir(&mut self) -> u8 {
        let id = self.interrupt_id();
        if id == IIR_THR_EMPTY {
            self.thre_interrupt = false;
        }
        if self.fifo_enabled {
            id | IIR_FIFOS_ENABLED
        } else {
            id
        }
    }

    /// Transmits a byte. The holding register is empty again right away.
    fn write_thr(&mut self, value: u8) {
        self.console.write_byte(value);
        let bits = self.lsr.view_bits_mut::<Lsb0>();
        bits.set(lsr::THRE, true);
        bits.set(lsr::TEMT, true);
        self.thre_interrupt = true;
    }

    fn write_ier(&mut self, value: u8) {
        let was_enabled = self.tx_interrupt_enabled();
        self.ier = value & 0x0F;
        // Enabling the THR-empty interrupt while THR is empty raises it immediately
        if !was_enabled && self.tx_interrupt_enabled() && self.lsr.view_bits::<Lsb0>()[lsr::THRE]
        {
            self.thre_interrupt = true;
        }
    }
}

impl Bus for Uart {
    /// The registers are 8 bits wide and repeat every 256 bytes. Only the first byte of `buf` is
    /// read, wider reads see zeros in the other bytes.
    fn read(&mut self, buf: &mut [u8], address: u32) {
        let Some((first, rest)) = buf.split_first_mut() else {
            return;
        };
        rest.fill(0);
        match Uart::read(self, address & 0xFF) {
            Ok(value) => *first = value,
            Err(error) => {
                warn!("uart: read at {address:#x}: {error}");
                *first = 0;
            }
        }
    }

    /// Only the first byte of `buf` is written.
    fn write(&mut self, address: u32, buf: &[u8]) {
        let Some(&value) = buf.first() else {
            return;
        };
        if let Err(error) = Uart::write(self, address & 0xFF, value) {
            warn!("uart: write at {address:#x}: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Console whose buffers stay observable after the UART took ownership of it.
    #[derive(Debug, Clone, Default)]
    struct SharedConsole(Arc<Mutex<BufferConsole>>);

    impl Console for SharedConsole {
        fn write_byte(&mut self, byte: u8) {
            self.0.lock().unwrap().write_byte(byte);
        }

        fn read_byte(&mut self) -> Option<u8> {
            self.0.lock().unwrap().read_byte()
        }
    }

    fn uart(input: &[u8]) -> (Uart, SharedConsole) {
        let console = SharedConsole(Arc::new(Mutex::new(BufferConsole::with_input(input))));
        (Uart::new(Box::new(console.clone())), console)
    }

    #[test]
    fn test_thr_write_emits_byte() {
        let (mut uart, console) = uart(&[]);
        uart.write(0, b'h').unwrap();
        uart.write(0, b'i').unwrap();
        assert_eq!(b"hi", console.0.lock().unwrap().output.as_slice());
        let lsr = uart.read(5).unwrap();
        assert_eq!(0x60, lsr & 0x60);
    }

    #[test]
    fn test_dlab_selects_divisor() {
        let (mut uart, console) = uart(&[]);
        uart.write(3, 0x83).unwrap();
        uart.write(0, 0x01).unwrap();
        uart.write(1, 0x02).unwrap();
        uart.write(2, 0x03).unwrap();
        assert_eq!(Ok(0x01), uart.read(0));
        assert_eq!(Ok(0x02), uart.read(1));
        assert_eq!(Ok(0x03), uart.read(2));
        // Nothing was transmitted and IER is untouched
        assert!(console.0.lock().unwrap().output.is_empty());
        uart.write(3, 0x03).unwrap();
        assert_eq!(Ok(0x00), uart.read(1));
    }

    #[test]
    fn test_lsr_read_polls_console() {
        let (mut uart, _) = uart(b"ab");
        let lsr = uart.read(5).unwrap();
        assert_eq!(1, lsr & 1);
        // Polling again does not overwrite the unread byte
        uart.read(5).unwrap();
        assert_eq!(Ok(b'a'), uart.read(0));
        assert_eq!(1, uart.read(5).unwrap() & 1);
        assert_eq!(Ok(b'b'), uart.read(0));
        assert_eq!(0, uart.read(5).unwrap() & 1);
    }

    #[test]
    fn test_rbr_read_clears_data_ready() {
        let (mut uart, _) = uart(b"x");
        uart.poll_input();
        assert_eq!(Ok(b'x'), uart.read(0));
        assert_eq!(0, uart.lsr & 1);
    }

    #[test]
    fn test_rx_interrupt() {
        let (mut uart, _) = uart(b"z");
        uart.poll_input();
        assert!(!uart.interrupt_pending());
        uart.write(1, 0x01).unwrap();
        assert!(uart.interrupt_pending());
        assert_eq!(Ok(IIR_RECEIVED_DATA), uart.read(2));
        uart.read(0).unwrap();
        assert!(!uart.interrupt_pending());
        assert_eq!(Ok(IIR_NO_INTERRUPT), uart.read(2));
    }

    #[test]
    fn test_thre_interrupt_acknowledged_by_iir() {
        let (mut uart, _) = uart(&[]);
        uart.write(1, 0x02).unwrap();
        assert!(uart.interrupt_pending());
        assert_eq!(Ok(IIR_THR_EMPTY), uart.read(2));
        assert!(!uart.interrupt_pending());
        uart.write(0, b'!').unwrap();
        assert!(uart.interrupt_pending());
    }

    #[test]
    fn test_invalid_accesses() {
        let (mut uart, _) = uart(&[]);
        assert_eq!(
            Err(AccessError::ReadOnly("Line Status Register")),
            uart.write(5, 0)
        );
        assert_eq!(Err(AccessError::AddressInvalid(8)), uart.read(8));
    }

    #[test]
    fn test_bus_word_read() {
        let (mut uart, _) = uart(&[]);
        let mut buf = [0xFF; 4];
        Bus::read(&mut uart, &mut buf, 0x105);
        assert_eq!([0x60, 0, 0, 0], buf);
    }
}
