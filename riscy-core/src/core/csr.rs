//! Specifiers of the supported CSRs and the permission-checked CSR bank.
//!
//! Only the registers a single-hart RV32IMA machine with M, S and U modes needs are supported.
//! Floating-point, debug-mode, hypervisor and hardware-performance-monitor CSRs are not.

use super::control::{Delegation, TrapVector};
use super::interrupts::Interrupts;
use super::status::Mstatus;
use super::Exception;
use crate::resources::clint::Timebase;
use crate::{PrivilegeLevel, RawPrivilegeLevel};

/// General 12-bit value representing a CSR specifier. Note that this can hold any 12-bit value,
/// even if the value represents an unsupported or non-existent CSR.
pub type CsrSpecifier = u16;

/// Number of addressable CSRs.
pub const LEN: usize = 1 << 12;

//
// Unprivileged counters/timers (`0xC00..=0xC02`, `0xC80..=0xC82`).
//
/// Cycle counter for RDCYCLE instruction.
pub const CYCLE: CsrSpecifier = 0xC00;
/// Timer for RDTIME instruction.
pub const TIME: CsrSpecifier = 0xC01;
/// Instructions-retired counter for RDINSTRET instruction.
pub const INSTRET: CsrSpecifier = 0xC02;
/// Upper 32 bits of [`CYCLE`], RV32 only.
pub const CYCLEH: CsrSpecifier = 0xC80;
/// Upper 32 bits of [`TIME`], RV32 only.
pub const TIMEH: CsrSpecifier = 0xC81;
/// Upper 32 bits of [`INSTRET`], RV32 only.
pub const INSTRETH: CsrSpecifier = 0xC82;

//
// Supervisor trap setup (`0x100`, `0x104..=0x106`).
//
/// Supervisor status register.
pub const SSTATUS: CsrSpecifier = 0x100;
/// Supervisor interrupt-enable register.
pub const SIE: CsrSpecifier = 0x104;
/// Supervisor trap handler base address.
pub const STVEC: CsrSpecifier = 0x105;
/// Supervisor counter enable.
pub const SCOUNTEREN: CsrSpecifier = 0x106;

/// Supervisor environment configuration register.
pub const SENVCFG: CsrSpecifier = 0x10A;

//
// Supervisor trap handling (`0x140..=0x144`).
//
/// Scratch register for supervisor trap handling.
pub const SSCRATCH: CsrSpecifier = 0x140;
/// Supervisor exception program counter.
pub const SEPC: CsrSpecifier = 0x141;
/// Supervisor trap cause.
pub const SCAUSE: CsrSpecifier = 0x142;
/// Supervisor bad address or instruction.
pub const STVAL: CsrSpecifier = 0x143;
/// Supervisor interrupt pending.
pub const SIP: CsrSpecifier = 0x144;

/// Supervisor address translation and protection.
pub const SATP: CsrSpecifier = 0x180;

//
// Machine information registers (`0xF11..=0xF15`).
//
/// Vendor ID.
pub const MVENDORID: CsrSpecifier = 0xF11;
/// Architecture ID.
pub const MARCHID: CsrSpecifier = 0xF12;
/// Implementation ID.
pub const MIMPID: CsrSpecifier = 0xF13;
/// Hardware thead ID.
pub const MHARTID: CsrSpecifier = 0xF14;
/// Pointer to configuration data structure.
pub const MCONFIGPTR: CsrSpecifier = 0xF15;

//
// Machine trap setup (`0x300..=0x306`, `0x310`).
//
/// Machine status register.
pub const MSTATUS: CsrSpecifier = 0x300;
/// ISA and extensions.
pub const MISA: CsrSpecifier = 0x301;
/// Machine exception delegation register.
pub const MEDELEG: CsrSpecifier = 0x302;
/// Machine interrupt delegation register.
pub const MIDELEG: CsrSpecifier = 0x303;
/// Machine interrupt-enable register.
pub const MIE: CsrSpecifier = 0x304;
/// Machine trap-handle base address.
pub const MTVEC: CsrSpecifier = 0x305;
/// Machine counter enable.
pub const MCOUNTEREN: CsrSpecifier = 0x306;
/// Additional machine status register, RV32 only.
pub const MSTATUSH: CsrSpecifier = 0x310;

//
// Machine trap handling (`0x340..=0x344`).
//
/// Scratch register for machine trap handlers.
pub const MSCRATCH: CsrSpecifier = 0x340;
/// Machine exception program counter.
pub const MEPC: CsrSpecifier = 0x341;
/// Machine trap cause.
pub const MCAUSE: CsrSpecifier = 0x342;
/// Machine bad address or instruction.
pub const MTVAL: CsrSpecifier = 0x343;
/// Machine interrupt pending.
pub const MIP: CsrSpecifier = 0x344;

//
// Machine configuration (`0x30A`, `0x31A`).
//
/// Machine environment configuration register.
pub const MENVCFG: CsrSpecifier = 0x30A;
/// Additional machine environment configuration register, RV32 only.
pub const MENVCFGH: CsrSpecifier = 0x31A;

//
// Machine memory protection (`0x3A0..=0x3A3`, `0x3B0..=0x3BF`). The registers hold their values
// but no protection is enforced.
//
/// First physical memory protection configuration register.
pub const PMPCFG0: CsrSpecifier = 0x3A0;
/// Last supported physical memory protection configuration register.
pub const PMPCFG3: CsrSpecifier = 0x3A3;
/// First physical memory protection address register.
pub const PMPADDR0: CsrSpecifier = 0x3B0;
/// Last supported physical memory protection address register.
pub const PMPADDR15: CsrSpecifier = 0x3BF;

//
// Machine counters/timers (`0xB00`, `0xB02`, `0xB80`, `0xB82`).
//
/// Machine cycle counter.
pub const MCYCLE: CsrSpecifier = 0xB00;
/// Machine instructions-retired counter.
pub const MINSTRET: CsrSpecifier = 0xB02;
/// Upper 32 bits of [`MCYCLE`], RV32 only.
pub const MCYCLEH: CsrSpecifier = 0xB80;
/// Upper 32 bits of [`MINSTRET`], RV32 only.
pub const MINSTRETH: CsrSpecifier = 0xB82;

/// Machine counter-inhibit register.
pub const MCOUNTINHIBIT: CsrSpecifier = 0x320;

/// Value of the misa register: MXL=1 (32-bit) with the A, I, M, S and U extensions.
pub const MISA_VALUE: u32 = (1 << 30)
    | extension_bit(b'A')
    | extension_bit(b'I')
    | extension_bit(b'M')
    | extension_bit(b'S')
    | extension_bit(b'U');

const fn extension_bit(letter: u8) -> u32 {
    1 << (letter - b'A')
}

/// Returns `true` if `specifier` is valid, which is the case if it fits in 12 bits.
pub fn is_valid(specifier: CsrSpecifier) -> bool {
    specifier < 1 << 12
}

/// Returns `true` if `specifier` names a register this hart implements.
pub fn is_supported(specifier: CsrSpecifier) -> bool {
    matches!(
        specifier,
        CYCLE..=INSTRET
            | CYCLEH..=INSTRETH
            | SSTATUS
            | SIE..=SCOUNTEREN
            | SENVCFG
            | SSCRATCH..=SIP
            | SATP
            | MVENDORID..=MCONFIGPTR
            | MSTATUS..=MCOUNTEREN
            | MSTATUSH
            | MENVCFG
            | MENVCFGH
            | MCOUNTINHIBIT
            | MSCRATCH..=MIP
            | PMPCFG0..=PMPCFG3
            | PMPADDR0..=PMPADDR15
            | MCYCLE
            | MINSTRET
            | MCYCLEH
            | MINSTRETH
    )
}

/// Returns `true` if this CSR only supports read access.
///
/// Requires [`is_valid(specifier)`](is_valid), otherwise the return value is undefined.
pub fn is_read_only(specifier: CsrSpecifier) -> bool {
    // The top two bits of a CSR specifier indicate whether the CSR is read-only (0b11) or
    // read/write (0b00, 0b01, 0b10)
    specifier >> 10 == 0b11
}

/// Returns the minimum required privilege level to access this CSR.
///
/// Requires [`is_valid(specifier)`](is_valid), otherwise the return value is undefined.
///
/// Note that this returns a [`RawPrivilegeLevel`], meaning the minimum required privilege level
/// may be a reserved level. This still has a defined meaning: only higher privilege levels are
/// allowed to access the CSR.
pub fn required_privilege_level(specifier: CsrSpecifier) -> RawPrivilegeLevel {
    // Bits `9:8` indicate the minimum required privilege level
    RawPrivilegeLevel::from_u2(((specifier >> 8) & 0b11) as u8)
}

/// The CSR bank of the hart.
///
/// Registers without side effects live in a flat array indexed by specifier. Registers with
/// structure or WARL fields are kept in their own types, and a few are synthesized on read.
#[derive(Debug, Clone)]
pub struct CsrFile {
    storage: Box<[u32; LEN]>,
    pub mstatus: Mstatus,
    pub delegation: Delegation,
    pub interrupts: Interrupts,
    pub mtvec: TrapVector,
    pub stvec: TrapVector,
    timebase: Timebase,
    /// Number of steps taken, exposed as both the cycle and the instret counter.
    retired: u64,
}

impl CsrFile {
    /// Create a CSR bank in its reset state. The time counters follow `timebase`.
    pub fn new(timebase: Timebase) -> Self {
        Self {
            storage: Box::new([0; LEN]),
            mstatus: Mstatus::new(),
            delegation: Delegation::new(),
            interrupts: Interrupts::new(),
            mtvec: TrapVector::default(),
            stvec: TrapVector::default(),
            timebase,
            retired: 0,
        }
    }

    /// Force all registers back to their reset state.
    pub fn reset(&mut self) {
        *self = Self::new(self.timebase.clone());
    }

    /// Read a CSR as guest software at privilege `level` would.
    ///
    /// Fails with [`Exception::IllegalInstruction`] if the CSR does not exist or requires a higher
    /// privilege level.
    pub fn read(&self, specifier: CsrSpecifier, level: PrivilegeLevel) -> Result<u32, Exception> {
        self.check_access(specifier, level)?;
        Ok(self.read_unchecked(specifier))
    }

    /// Write a whole CSR as guest software at privilege `level` would.
    pub fn write(
        &mut self,
        specifier: CsrSpecifier,
        value: u32,
        level: PrivilegeLevel,
    ) -> Result<(), Exception> {
        self.write_masked(specifier, value, u32::MAX, level)
    }

    /// Write only the bits of a CSR selected by `mask`, as done by the set and clear CSR
    /// instructions.
    ///
    /// Fails with [`Exception::IllegalInstruction`] if the CSR does not exist, requires a higher
    /// privilege level or is read-only. The register is left untouched on failure.
    pub fn write_masked(
        &mut self,
        specifier: CsrSpecifier,
        value: u32,
        mask: u32,
        level: PrivilegeLevel,
    ) -> Result<(), Exception> {
        self.check_access(specifier, level)?;
        if is_read_only(specifier) {
            return Err(Exception::IllegalInstruction);
        }
        self.write_unchecked(specifier, value, mask);
        Ok(())
    }

    fn check_access(
        &self,
        specifier: CsrSpecifier,
        level: PrivilegeLevel,
    ) -> Result<(), Exception> {
        if !is_valid(specifier) || !is_supported(specifier) {
            return Err(Exception::IllegalInstruction);
        }
        if level < required_privilege_level(specifier) {
            return Err(Exception::IllegalInstruction);
        }
        if let Some(counter) = unprivileged_counter_index(specifier) {
            // > When the CY, TM, IR, or HPMn bit in the mcounteren register is clear, attempts to
            // > read the cycle, time, instret, or hpmcountern register while executing in S-mode
            // > or U-mode will cause an illegal instruction exception.
            let mcounteren = self.storage[MCOUNTEREN as usize];
            let scounteren = self.storage[SCOUNTEREN as usize];
            if level < PrivilegeLevel::Machine && mcounteren & (1 << counter) == 0 {
                return Err(Exception::IllegalInstruction);
            }
            if level < PrivilegeLevel::Supervisor && scounteren & (1 << counter) == 0 {
                return Err(Exception::IllegalInstruction);
            }
        }
        Ok(())
    }

    fn read_unchecked(&self, specifier: CsrSpecifier) -> u32 {
        match specifier {
            CYCLE | INSTRET | MCYCLE | MINSTRET => self.retired as u32,
            CYCLEH | INSTRETH | MCYCLEH | MINSTRETH => (self.retired >> 32) as u32,
            TIME => self.timebase.now() as u32,
            TIMEH => (self.timebase.now() >> 32) as u32,
            SSTATUS => self.mstatus.read_sstatus(),
            SIE => self.interrupts.read_sie(&self.delegation),
            STVEC => self.stvec.read(),
            SIP => self.interrupts.read_sip(&self.delegation),
            MVENDORID | MARCHID | MIMPID | MHARTID | MCONFIGPTR => 0,
            MSTATUS => self.mstatus.pack(),
            MISA => MISA_VALUE,
            MEDELEG => self.delegation.read_medeleg(),
            MIDELEG => self.delegation.read_mideleg(),
            MIE => self.interrupts.read_mie(),
            MTVEC => self.mtvec.read(),
            // Only little-endian is supported, so MBE and SBE read as zero.
            MSTATUSH => 0,
            MIP => self.interrupts.read_mip(),
            _ => self.storage[specifier as usize],
        }
    }

    fn write_unchecked(&mut self, specifier: CsrSpecifier, value: u32, mask: u32) {
        match specifier {
            MCYCLE | MINSTRET => {
                let low = self.retired as u32 & !mask | value & mask;
                self.retired = self.retired & !0xFFFF_FFFF | low as u64;
            }
            MCYCLEH | MINSTRETH => {
                let high = (self.retired >> 32) as u32 & !mask | value & mask;
                self.retired = self.retired & 0xFFFF_FFFF | (high as u64) << 32;
            }
            SSTATUS => self.mstatus.write_sstatus(value, mask),
            SIE => self.interrupts.write_sie(value, mask, &self.delegation),
            STVEC => self.stvec.write(value, mask),
            SIP => self.interrupts.write_sip(value, mask, &self.delegation),
            MSTATUS => self.mstatus.write(value, mask),
            MEDELEG => self.delegation.write_medeleg(value, mask),
            MIDELEG => self.delegation.write_mideleg(value, mask),
            MIE => self.interrupts.write_mie(value, mask),
            MTVEC => self.mtvec.write(value, mask),
            MIP => self.interrupts.write_mip(value, mask),
            // Writes to misa are ignored, the set of extensions is fixed. The same goes for the
            // endianness bits in mstatush.
            MISA | MSTATUSH => {}
            // > IALIGN=32: the two low bits (mepc[1:0]) are always zero.
            MEPC | SEPC => self.write_storage(specifier, value & !0b11, mask),
            // Only Bare translation is supported. Writing an unsupported MODE has no effect.
            SATP if (self.storage[SATP as usize] & !mask | value & mask) >> 31 != 0 => {}
            _ => self.write_storage(specifier, value, mask),
        }
    }

    fn write_storage(&mut self, specifier: CsrSpecifier, value: u32, mask: u32) {
        let register = &mut self.storage[specifier as usize];
        *register = *register & !mask | value & mask;
    }

    /// Count one more step for the cycle and instret counters.
    pub fn retire(&mut self) {
        self.retired = self.retired.wrapping_add(1);
    }

    pub fn retired(&self) -> u64 {
        self.retired
    }

    /// The trap vector of the trap handler running at `level`.
    pub fn tvec(&self, level: PrivilegeLevel) -> TrapVector {
        match level {
            PrivilegeLevel::Supervisor => self.stvec,
            _ => self.mtvec,
        }
    }

    /// The exception program counter of `level` (sepc or mepc).
    pub fn epc(&self, level: PrivilegeLevel) -> u32 {
        self.storage[trap_register(level, MEPC, SEPC) as usize]
    }

    pub fn set_epc(&mut self, level: PrivilegeLevel, value: u32) {
        self.storage[trap_register(level, MEPC, SEPC) as usize] = value & !0b11;
    }

    /// The trap cause register of `level` (scause or mcause).
    pub fn cause(&self, level: PrivilegeLevel) -> u32 {
        self.storage[trap_register(level, MCAUSE, SCAUSE) as usize]
    }

    pub fn set_cause(&mut self, level: PrivilegeLevel, value: u32) {
        self.storage[trap_register(level, MCAUSE, SCAUSE) as usize] = value;
    }

    /// The trap value register of `level` (stval or mtval).
    pub fn tval(&self, level: PrivilegeLevel) -> u32 {
        self.storage[trap_register(level, MTVAL, STVAL) as usize]
    }

    pub fn set_tval(&mut self, level: PrivilegeLevel, value: u32) {
        self.storage[trap_register(level, MTVAL, STVAL) as usize] = value;
    }
}

fn trap_register(
    level: PrivilegeLevel,
    machine: CsrSpecifier,
    supervisor: CsrSpecifier,
) -> CsrSpecifier {
    match level {
        PrivilegeLevel::Supervisor => supervisor,
        _ => machine,
    }
}

/// Bit index in mcounteren and scounteren that guards an unprivileged counter.
fn unprivileged_counter_index(specifier: CsrSpecifier) -> Option<u32> {
    match specifier {
        CYCLE..=INSTRET => Some((specifier - CYCLE) as u32),
        CYCLEH..=INSTRETH => Some((specifier - CYCLEH) as u32),
        _ => None,
    }
}
