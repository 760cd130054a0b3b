//! Platform-level interrupt controller

use crate::bus::Bus;
use bitvec::array::BitArray;
use bitvec::order::Lsb0;
use bitvec::BitArr;
use log::{debug, warn};
use thiserror::Error;

/// Number of interrupt sources, including the reserved source 0 ("no interrupt").
pub const SOURCES: usize = 64;
/// Number of hart contexts: context 0 is M-mode, context 1 is S-mode.
pub const CONTEXTS: usize = 2;
/// Highest priority a source or threshold can be set to.
pub const MAX_PRIORITY: u32 = 7;

pub const PRIORITY_BASE_ADDR: u32 = 0x0000;
pub const PENDING_BASE_ADDR: u32 = 0x1000;
pub const ENABLES_BASE_ADDR: u32 = 0x2000;
pub const ENABLES_CONTEXT_STRIDE: u32 = 0x80;
pub const CONTEXT_BASE_ADDR: u32 = 0x20_0000;
pub const CONTEXT_STRIDE: u32 = 0x1000;

const WORDS: usize = SOURCES / 32;

type SourceSet = BitArr!(for SOURCES, in u32, Lsb0);

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Plic {
    priorities: [u32; SOURCES],
    /// Current level of every source's interrupt line.
    levels: SourceSet,
    pending: SourceSet,
    /// Sources that have been claimed, but not yet completed.
    in_service: SourceSet,
    enabled: [SourceSet; CONTEXTS],
    thresholds: [u32; CONTEXTS],
}

impl Default for Plic {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum AccessError {
    #[error("misaligned or non-word access of {size} bytes at offset {offset:#x}")]
    InvalidAccess { offset: u32, size: usize },
    #[error("cannot write to read-only register at offset {0:#x}")]
    ReadOnly(u32),
    #[error("no register mapped to offset {0:#x}")]
    AddressInvalid(u32),
}

/// The register an offset maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Register {
    Priority(usize),
    Pending(usize),
    Enable { context: usize, word: usize },
    Threshold(usize),
    ClaimComplete(usize),
}

impl Register {
    fn from_offset(offset: u32) -> Option<Self> {
        const PRIORITY_LAST: u32 = PRIORITY_BASE_ADDR + 4 * SOURCES as u32 - 1;
        const PENDING_LAST: u32 = PENDING_BASE_ADDR + 4 * WORDS as u32 - 1;
        const ENABLES_LAST: u32 = ENABLES_BASE_ADDR + ENABLES_CONTEXT_STRIDE * CONTEXTS as u32 - 1;
        const CONTEXT_LAST: u32 = CONTEXT_BASE_ADDR + CONTEXT_STRIDE * CONTEXTS as u32 - 1;

        let register = match offset {
            PRIORITY_BASE_ADDR..=PRIORITY_LAST => {
                Self::Priority(((offset - PRIORITY_BASE_ADDR) / 4) as usize)
            }
            PENDING_BASE_ADDR..=PENDING_LAST => {
                Self::Pending(((offset - PENDING_BASE_ADDR) / 4) as usize)
            }
            ENABLES_BASE_ADDR..=ENABLES_LAST => {
                let relative = offset - ENABLES_BASE_ADDR;
                let word = ((relative % ENABLES_CONTEXT_STRIDE) / 4) as usize;
                if word >= WORDS {
                    return None;
                }
                Self::Enable {
                    context: (relative / ENABLES_CONTEXT_STRIDE) as usize,
                    word,
                }
            }
            CONTEXT_BASE_ADDR..=CONTEXT_LAST => {
                let relative = offset - CONTEXT_BASE_ADDR;
                let context = (relative / CONTEXT_STRIDE) as usize;
                match relative % CONTEXT_STRIDE {
                    0 => Self::Threshold(context),
                    4 => Self::ClaimComplete(context),
                    _ => return None,
                }
            }
            _ => return None,
        };
        Some(register)
    }
}

impl Plic {
    /// Create new PLIC in reset state: all priorities zero, nothing enabled.
    pub fn new() -> Self {
        Self {
            priorities: [0; SOURCES],
            levels: BitArray::ZERO,
            pending: BitArray::ZERO,
            in_service: BitArray::ZERO,
            enabled: [BitArray::ZERO; CONTEXTS],
            thresholds: [0; CONTEXTS],
        }
    }

    /// Drive the interrupt line of `source`.
    ///
    /// Sources are level-triggered: a source is pending while its line is high and it is not
    /// in service. Source 0 and out-of-range sources are ignored.
    pub fn set_level(&mut self, source: usize, level: bool) {
        if source == 0 || source >= SOURCES {
            return;
        }
        self.levels.set(source, level);
        let in_service = self.in_service[source];
        self.pending.set(source, level && !in_service);
    }

    pub fn is_pending(&self, source: usize) -> bool {
        self.pending.get(source).is_some_and(|bit| *bit)
    }

    /// Highest priority pending source enabled for `context` with a priority above its threshold.
    ///
    /// Ties go to the lowest source number.
    fn best_candidate(&self, context: usize) -> Option<usize> {
        let threshold = self.thresholds[context];
        let mut best: Option<(usize, u32)> = None;
        for source in self.pending.iter_ones() {
            if !self.enabled[context][source] {
                continue;
            }
            let priority = self.priorities[source];
            if priority <= threshold {
                continue;
            }
            if best.map_or(true, |(_, best_priority)| priority > best_priority) {
                best = Some((source, priority));
            }
        }
        best.map(|(source, _)| source)
    }

    /// Whether `context` has an interrupt to claim, i.e. the level of its external interrupt line.
    pub fn context_interrupt(&self, context: usize) -> bool {
        context < CONTEXTS && self.best_candidate(context).is_some()
    }

    /// Claims the best candidate for `context`, returning its source number, or 0 if there is none.
    pub fn claim(&mut self, context: usize) -> u32 {
        if context >= CONTEXTS {
            return 0;
        }
        let Some(source) = self.best_candidate(context) else {
            return 0;
        };
        self.pending.set(source, false);
        self.in_service.set(source, true);
        debug!("plic: context {context} claimed source {source}");
        source as u32
    }

    /// Signals completion of the handler for `source`, allowing it to become pending again.
    pub fn complete(&mut self, source: u32) {
        let source = source as usize;
        if source == 0 || source >= SOURCES || !self.in_service[source] {
            return;
        }
        self.in_service.set(source, false);
        let level = self.levels[source];
        self.pending.set(source, level);
    }

    pub fn read_u32(&mut self, offset: u32) -> Result<u32, AccessError> {
        let register = Register::from_offset(offset).ok_or(AccessError::AddressInvalid(offset))?;
        let value = match register {
            Register::Priority(source) => self.priorities[source],
            Register::Pending(word) => self.pending.as_raw_slice()[word],
            Register::Enable { context, word } => self.enabled[context].as_raw_slice()[word],
            Register::Threshold(context) => self.thresholds[context],
            Register::ClaimComplete(context) => self.claim(context),
        };
        Ok(value)
    }

    pub fn write_u32(&mut self, offset: u32, value: u32) -> Result<(), AccessError> {
        let register = Register::from_offset(offset).ok_or(AccessError::AddressInvalid(offset))?;
        match register {
            // Source 0 does not exist, its priority is hardwired to zero
            Register::Priority(0) => {}
            Register::Priority(source) => self.priorities[source] = value.min(MAX_PRIORITY),
            Register::Pending(_) => return Err(AccessError::ReadOnly(offset)),
            Register::Enable { context, word } => {
                let value = if word == 0 { value & !1 } else { value };
                self.enabled[context].as_raw_mut_slice()[word] = value;
            }
            Register::Threshold(context) => self.thresholds[context] = value.min(MAX_PRIORITY),
            Register::ClaimComplete(_) => self.complete(value),
        }
        Ok(())
    }
}

fn check_word_access(offset: u32, size: usize) -> Result<(), AccessError> {
    if size == 4 && offset % 4 == 0 {
        Ok(())
    } else {
        Err(AccessError::InvalidAccess { offset, size })
    }
}

impl Bus for Plic {
    /// Only naturally aligned 32-bit accesses are supported.
    fn read(&mut self, buf: &mut [u8], address: u32) {
        let result = check_word_access(address, buf.len()).and_then(|()| self.read_u32(address));
        match result {
            Ok(value) => buf.copy_from_slice(&value.to_le_bytes()),
            Err(error) => {
                warn!("plic: read: {error}");
                buf.fill(0);
            }
        }
    }

    fn write(&mut self, address: u32, buf: &[u8]) {
        let result = match buf {
            [a, b, c, d] => check_word_access(address, buf.len())
                .and_then(|()| self.write_u32(address, u32::from_le_bytes([*a, *b, *c, *d]))),
            _ => Err(AccessError::InvalidAccess {
                offset: address,
                size: buf.len(),
            }),
        };
        if let Err(error) = result {
            warn!("plic: write: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UART: usize = 10;

    fn plic_with_uart_enabled(context: usize) -> Plic {
        let mut plic = Plic::new();
        plic.write_u32(4 * UART as u32, 1).unwrap();
        plic.write_u32(
            ENABLES_BASE_ADDR + ENABLES_CONTEXT_STRIDE * context as u32,
            1 << UART,
        )
        .unwrap();
        plic
    }

    #[test]
    fn test_claim_and_complete() {
        let mut plic = plic_with_uart_enabled(0);
        assert!(!plic.context_interrupt(0));
        plic.set_level(UART, true);
        assert!(plic.context_interrupt(0));
        assert!(!plic.context_interrupt(1));
        assert_eq!(1 << UART, plic.read_u32(PENDING_BASE_ADDR).unwrap());

        assert_eq!(Ok(UART as u32), plic.read_u32(CONTEXT_BASE_ADDR + 4));
        assert!(!plic.context_interrupt(0));
        // Still in service, so the high line does not make it pending again
        plic.set_level(UART, true);
        assert!(!plic.is_pending(UART));
        assert_eq!(Ok(0), plic.read_u32(CONTEXT_BASE_ADDR + 4));

        plic.write_u32(CONTEXT_BASE_ADDR + 4, UART as u32).unwrap();
        assert!(plic.is_pending(UART));
        plic.set_level(UART, false);
        assert!(!plic.is_pending(UART));
    }

    #[test]
    fn test_threshold_masks() {
        let mut plic = plic_with_uart_enabled(1);
        plic.set_level(UART, true);
        assert!(plic.context_interrupt(1));
        plic.write_u32(CONTEXT_BASE_ADDR + CONTEXT_STRIDE, 1).unwrap();
        assert!(!plic.context_interrupt(1));
        assert_eq!(Ok(0), plic.read_u32(CONTEXT_BASE_ADDR + CONTEXT_STRIDE + 4));
        plic.write_u32(CONTEXT_BASE_ADDR + CONTEXT_STRIDE, 0).unwrap();
        assert_eq!(
            Ok(UART as u32),
            plic.read_u32(CONTEXT_BASE_ADDR + CONTEXT_STRIDE + 4)
        );
    }

    #[test]
    fn test_priority_ordering() {
        let mut plic = Plic::new();
        for (source, priority) in [(3, 2), (5, 6), (7, 6)] {
            plic.write_u32(4 * source, priority).unwrap();
            plic.set_level(source as usize, true);
        }
        plic.write_u32(ENABLES_BASE_ADDR, u32::MAX).unwrap();
        assert_eq!(5, plic.claim(0));
        assert_eq!(7, plic.claim(0));
        assert_eq!(3, plic.claim(0));
        assert_eq!(0, plic.claim(0));
    }

    #[test]
    fn test_register_legalization() {
        let mut plic = Plic::new();
        plic.write_u32(4, 100).unwrap();
        assert_eq!(Ok(MAX_PRIORITY), plic.read_u32(4));
        plic.write_u32(0, 5).unwrap();
        assert_eq!(Ok(0), plic.read_u32(0));
        plic.write_u32(ENABLES_BASE_ADDR, u32::MAX).unwrap();
        assert_eq!(Ok(u32::MAX - 1), plic.read_u32(ENABLES_BASE_ADDR));
        // Source 0 can never be raised
        plic.set_level(0, true);
        assert!(!plic.is_pending(0));
    }

    #[test]
    fn test_invalid_accesses() {
        let mut plic = Plic::new();
        assert_eq!(
            Err(AccessError::ReadOnly(PENDING_BASE_ADDR)),
            plic.write_u32(PENDING_BASE_ADDR, 1)
        );
        assert_eq!(
            Err(AccessError::AddressInvalid(0x0800)),
            plic.read_u32(0x0800)
        );
        assert_eq!(
            Err(AccessError::AddressInvalid(CONTEXT_BASE_ADDR + 8)),
            plic.read_u32(CONTEXT_BASE_ADDR + 8)
        );
        let mut buf = [0xFF; 2];
        Bus::read(&mut plic, &mut buf, 4);
        assert_eq!([0, 0], buf);
    }
}
