use log::{debug, warn};

use super::control::VectorMode;
use super::{Core, Exception, Interrupt};
use crate::PrivilegeLevel;

/// Bit of mcause and scause that marks the cause as an interrupt.
pub const INTERRUPT_BIT: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCause {
    Exception(Exception),
    Interrupt(Interrupt),
}

impl TrapCause {
    /// The value written to mcause or scause when this trap is taken.
    pub fn cause_value(&self) -> u32 {
        match self {
            Self::Exception(exception) => exception.code(),
            Self::Interrupt(interrupt) => INTERRUPT_BIT | interrupt.code(),
        }
    }
}

impl From<Exception> for TrapCause {
    fn from(value: Exception) -> Self {
        Self::Exception(value)
    }
}

impl From<Interrupt> for TrapCause {
    fn from(value: Interrupt) -> Self {
        Self::Interrupt(value)
    }
}

impl Core {
    /// Take a trap: switch to the handler's privilege level and jump to its trap vector.
    ///
    /// > By default, all traps at any privilege level are handled in machine mode [...].
    /// > Traps never transition from a more-privileged mode to a less-privileged mode.
    ///
    /// The trap goes to S-mode if its cause is delegated through medeleg or mideleg and the hart
    /// is not in M-mode. The current PC is saved in the handler's epc, so for an exception it
    /// must still point at the faulting instruction, and for an interrupt at the next one.
    ///
    /// Vectored mode is not supported. Interrupts jump to the base address as well.
    pub fn trap(&mut self, cause: TrapCause) {
        let from = self.privilege_level;
        let delegation = &self.csrs.delegation;
        let delegated = from != PrivilegeLevel::Machine
            && match cause {
                TrapCause::Exception(exception) => delegation.should_delegate_exception(exception),
                TrapCause::Interrupt(interrupt) => delegation.should_delegate_interrupt(interrupt),
            };
        let target = match delegated {
            true => PrivilegeLevel::Supervisor,
            false => PrivilegeLevel::Machine,
        };

        let epc = self.registers.pc();
        self.csrs.set_epc(target, epc);

        let mstatus = &mut self.csrs.mstatus;
        match target {
            PrivilegeLevel::Supervisor => {
                mstatus.spie = mstatus.sie;
                mstatus.sie = false;
                mstatus.set_spp_level(from);
            }
            _ => {
                mstatus.mpie = mstatus.mie;
                mstatus.mie = false;
                mstatus.set_mpp_level(from);
            }
        }

        let tvec = self.csrs.tvec(target);
        if tvec.mode() == VectorMode::Vectored {
            warn!(
                "vectored trap mode is not supported, jumping to base {:#010x}",
                tvec.base()
            );
        }
        self.registers.set_pc(tvec.base());
        self.privilege_level = target;

        self.csrs.set_cause(target, cause.cause_value());
        self.csrs.set_tval(target, 0);
        if let TrapCause::Interrupt(interrupt) = cause {
            self.csrs.interrupts.clear_pending(interrupt);
        }

        debug!(
            "trap: {cause:?} from {from} to {target}, epc {epc:#010x}, handler {:#010x}",
            tvec.base()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::control::TrapVector;
    use crate::core::Config;
    use crate::resources::clint::Timebase;

    fn core() -> Core {
        let mut core = Core::new(Config::default(), Timebase::new());
        let csrs = core.csrs_mut();
        csrs.mtvec = TrapVector::new(0x8000_0100, VectorMode::Direct);
        csrs.stvec = TrapVector::new(0x8000_0200, VectorMode::Direct);
        core.registers_mut().set_pc(0x8000_0040);
        core
    }

    #[test]
    fn test_cause_encoding() {
        assert_eq!(
            2,
            TrapCause::from(Exception::IllegalInstruction).cause_value()
        );
        assert_eq!(
            11,
            TrapCause::from(Exception::EnvironmentCallFromMMode).cause_value()
        );
        assert_eq!(
            0x8000_0009,
            TrapCause::from(Interrupt::SupervisorExternalInterrupt).cause_value()
        );
    }

    #[test]
    fn test_exception_to_machine_mode() {
        let mut core = core();
        core.set_privilege_level(PrivilegeLevel::Supervisor);
        core.csrs_mut().mstatus.mie = true;
        core.csrs_mut().set_tval(PrivilegeLevel::Machine, 0x1234);
        core.trap(Exception::IllegalInstruction.into());

        let csrs = core.csrs();
        assert_eq!(PrivilegeLevel::Machine, core.privilege_level());
        assert_eq!(0x8000_0100, core.registers().pc());
        assert_eq!(0x8000_0040, csrs.epc(PrivilegeLevel::Machine));
        assert_eq!(2, csrs.cause(PrivilegeLevel::Machine));
        assert_eq!(0, csrs.tval(PrivilegeLevel::Machine));
        assert_eq!(PrivilegeLevel::Supervisor, csrs.mstatus.mpp_level());
        assert!(csrs.mstatus.mpie);
        assert!(!csrs.mstatus.mie);
    }

    #[test]
    fn test_delegated_exception_to_supervisor_mode() {
        let mut core = core();
        core.set_privilege_level(PrivilegeLevel::User);
        core.csrs_mut()
            .delegation
            .write_medeleg(1 << Exception::EnvironmentCallFromUMode.code(), u32::MAX);
        core.csrs_mut().mstatus.sie = true;
        core.trap(Exception::EnvironmentCallFromUMode.into());

        let csrs = core.csrs();
        assert_eq!(PrivilegeLevel::Supervisor, core.privilege_level());
        assert_eq!(0x8000_0200, core.registers().pc());
        assert_eq!(0x8000_0040, csrs.epc(PrivilegeLevel::Supervisor));
        assert_eq!(8, csrs.cause(PrivilegeLevel::Supervisor));
        assert_eq!(0, csrs.cause(PrivilegeLevel::Machine));
        assert_eq!(PrivilegeLevel::User, csrs.mstatus.spp_level());
        assert!(csrs.mstatus.spie);
        assert!(!csrs.mstatus.sie);
    }

    #[test]
    fn test_delegation_ignored_in_machine_mode() {
        let mut core = core();
        core.csrs_mut()
            .delegation
            .write_medeleg(1 << Exception::IllegalInstruction.code(), u32::MAX);
        core.trap(Exception::IllegalInstruction.into());
        assert_eq!(PrivilegeLevel::Machine, core.privilege_level());
        assert_eq!(0x8000_0100, core.registers().pc());
        assert_eq!(PrivilegeLevel::Machine, core.csrs().mstatus.mpp_level());
    }

    #[test]
    fn test_interrupt_clears_pending_bit() {
        let mut core = core();
        core.set_privilege_level(PrivilegeLevel::User);
        let csrs = core.csrs_mut();
        csrs.delegation.write_mideleg(1 << 1, u32::MAX);
        csrs.interrupts.write_mip(1 << 1, u32::MAX);
        core.trap(Interrupt::SupervisorSoftwareInterrupt.into());

        assert_eq!(PrivilegeLevel::Supervisor, core.privilege_level());
        assert_eq!(
            0x8000_0001,
            core.csrs().cause(PrivilegeLevel::Supervisor)
        );
        assert_eq!(0, core.csrs().interrupts.read_mip());
    }

    #[test]
    fn test_vectored_mode_uses_base() {
        let mut core = core();
        core.csrs_mut().mtvec = TrapVector::new(0x8000_0100, VectorMode::Vectored);
        core.trap(Interrupt::MachineTimerInterrupt.into());
        assert_eq!(0x8000_0100, core.registers().pc());
    }
}
