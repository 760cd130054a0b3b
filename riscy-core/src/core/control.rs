use bitvec::{field::BitField, order::Lsb0, view::BitView};

use super::{Exception, Interrupt};

/// Trap Vector Base Address Register (mtvec and stvec).
///
/// > The mtvec register is an MXLEN-bit WARL read/write register that holds trap vector
/// > configuration, consisting of a vector base address (BASE) and a vector mode (MODE).
///
/// > When MODE=Direct, all traps into machine mode cause the pc to be set to the address in the
/// > BASE field. When MODE=Vectored, all synchronous exceptions into machine mode cause the pc to
/// > be set to the address in the BASE field, whereas interrupts cause the pc to be set to the
/// > address in the BASE field plus four times the interrupt cause number.
///
/// Trap delivery here always uses BASE, see [`Core::trap`](super::Core::trap).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrapVector {
    base: u32,
    mode: VectorMode,
}

impl TrapVector {
    pub fn new(base: u32, mode: VectorMode) -> Self {
        Self {
            base: base & !0b11,
            mode,
        }
    }

    pub fn read(&self) -> u32 {
        self.base | self.mode as u32
    }

    pub fn write(&mut self, value: u32, mask: u32) {
        let new_value = self.read() & !mask | value & mask;
        let bits = new_value.view_bits::<Lsb0>();
        let mode = match bits[0..2].load_le::<u8>() {
            0 => VectorMode::Direct,
            1 => VectorMode::Vectored,
            // Reserved MODE. Since this is a WARL register, we can set the register to any legal
            // value here. Choose to preserve the old value, matching the behavior of QEMU.
            _ => return,
        };
        *self = Self::new(new_value, mode);
    }

    /// Returns the vector base address (stored in BASE field), always 4-byte aligned.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Returns the vector mode (stored in MODE field).
    pub fn mode(&self) -> VectorMode {
        self.mode
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorMode {
    #[default]
    Direct = 0,
    Vectored = 1,
}

/// The medeleg and mideleg registers, both **WARL**.
///
/// > By default, all traps at any privilege level are handled in machine mode [...]. To increase
/// > performance, implementations can provide individual read/write bits within medeleg and
/// > mideleg to indicate that certain exceptions and interrupts should be processed directly by a
/// > lower privilege level.
#[derive(Debug, Clone, Default)]
pub struct Delegation {
    medeleg: u32,
    mideleg: u32,
}

impl Delegation {
    // Delegatable exceptions according to QEMU's implementation, minus ecalls from M-mode which
    // can never be delegated.
    #[allow(clippy::identity_op)]
    const DELEGATABLE_EXCEPTIONS_MASK: u32 = 0
        | (1 << Exception::InstructionAddressMisaligned.code())
        | (1 << Exception::InstructionAccessFault.code())
        | (1 << Exception::IllegalInstruction.code())
        | (1 << Exception::Breakpoint.code())
        | (1 << Exception::LoadAddressMisaligned.code())
        | (1 << Exception::LoadAccessFault.code())
        | (1 << Exception::StoreOrAmoAddressMisaligned.code())
        | (1 << Exception::StoreOrAmoAccessFault.code())
        | (1 << Exception::EnvironmentCallFromUMode.code())
        | (1 << Exception::EnvironmentCallFromSMode.code())
        | (1 << Exception::InstructionPageFault.code())
        | (1 << Exception::LoadPageFault.code())
        | (1 << Exception::StoreOrAmoPageFault.code());

    /// Only the supervisor-level interrupts can be delegated.
    #[allow(clippy::identity_op)]
    pub const DELEGATABLE_INTERRUPTS_MASK: u32 = 0
        | (1 << Interrupt::SupervisorSoftwareInterrupt.code())
        | (1 << Interrupt::SupervisorTimerInterrupt.code())
        | (1 << Interrupt::SupervisorExternalInterrupt.code());

    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_medeleg(&self) -> u32 {
        self.medeleg
    }

    pub fn write_medeleg(&mut self, value: u32, mask: u32) {
        let mask = mask & Self::DELEGATABLE_EXCEPTIONS_MASK;
        self.medeleg = self.medeleg & !mask | value & mask;
    }

    pub fn read_mideleg(&self) -> u32 {
        self.mideleg
    }

    pub fn write_mideleg(&mut self, value: u32, mask: u32) {
        let mask = mask & Self::DELEGATABLE_INTERRUPTS_MASK;
        self.mideleg = self.mideleg & !mask | value & mask;
    }

    pub fn should_delegate_exception(&self, exception: Exception) -> bool {
        self.medeleg & (1 << exception.code()) != 0
    }

    pub fn should_delegate_interrupt(&self, interrupt: Interrupt) -> bool {
        self.mideleg & (1 << interrupt.code()) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_vector_encoding() {
        let mut tvec = TrapVector::default();
        tvec.write(0x8000_0101, u32::MAX);
        assert_eq!(0x8000_0100, tvec.base());
        assert_eq!(VectorMode::Vectored, tvec.mode());
        assert_eq!(0x8000_0101, tvec.read());

        tvec.write(0x8000_0200, u32::MAX);
        assert_eq!(VectorMode::Direct, tvec.mode());
        assert_eq!(0x8000_0200, tvec.read());
    }

    #[test]
    fn test_trap_vector_ignores_reserved_modes() {
        let mut tvec = TrapVector::new(0x1000, VectorMode::Direct);
        tvec.write(0x2002, u32::MAX);
        assert_eq!(0x1000, tvec.read());
        tvec.write(0x2003, u32::MAX);
        assert_eq!(0x1000, tvec.read());
    }

    #[test]
    fn test_trap_vector_masked_write() {
        let mut tvec = TrapVector::new(0x1000, VectorMode::Direct);
        tvec.write(0xFFFF_FFFF, 0b1);
        assert_eq!(0x1001, tvec.read());
    }

    #[test]
    fn test_medeleg_excludes_ecall_from_m() {
        let mut delegation = Delegation::new();
        delegation.write_medeleg(u32::MAX, u32::MAX);
        assert_eq!(0xB3FF, delegation.read_medeleg());
        assert!(delegation.should_delegate_exception(Exception::IllegalInstruction));
        assert!(delegation.should_delegate_exception(Exception::EnvironmentCallFromUMode));
        assert!(!delegation.should_delegate_exception(Exception::EnvironmentCallFromMMode));
    }

    #[test]
    fn test_mideleg_covers_supervisor_interrupts() {
        let mut delegation = Delegation::new();
        delegation.write_mideleg(u32::MAX, u32::MAX);
        assert_eq!(0x222, delegation.read_mideleg());
        assert!(delegation.should_delegate_interrupt(Interrupt::SupervisorTimerInterrupt));
        assert!(!delegation.should_delegate_interrupt(Interrupt::MachineTimerInterrupt));
        delegation.write_mideleg(0, 1 << 5);
        assert_eq!(0x202, delegation.read_mideleg());
    }
}
