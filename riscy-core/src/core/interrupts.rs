use bitvec::{array::BitArray, field::BitField, order::Lsb0, view::BitView};

use super::control::Delegation;
use super::status::Mstatus;
use super::Interrupt;
use crate::PrivilegeLevel;

const SUPERVISOR_SOFTWARE_INTERRUPT: usize = Interrupt::SupervisorSoftwareInterrupt.code() as usize;
const MACHINE_SOFTWARE_INTERRUPT: usize = Interrupt::MachineSoftwareInterrupt.code() as usize;
const SUPERVISOR_TIMER_INTERRUPT: usize = Interrupt::SupervisorTimerInterrupt.code() as usize;
const MACHINE_TIMER_INTERRUPT: usize = Interrupt::MachineTimerInterrupt.code() as usize;
const SUPERVISOR_EXTERNAL_INTERRUPT: usize = Interrupt::SupervisorExternalInterrupt.code() as usize;
const MACHINE_EXTERNAL_INTERRUPT: usize = Interrupt::MachineExternalInterrupt.code() as usize;

#[allow(clippy::identity_op)]
const VALID_INTERRUPTS_MASK: u16 = 0
    | (1 << SUPERVISOR_SOFTWARE_INTERRUPT)
    | (1 << MACHINE_SOFTWARE_INTERRUPT)
    | (1 << SUPERVISOR_TIMER_INTERRUPT)
    | (1 << MACHINE_TIMER_INTERRUPT)
    | (1 << SUPERVISOR_EXTERNAL_INTERRUPT)
    | (1 << MACHINE_EXTERNAL_INTERRUPT);

/// Bits of mip that guest software may write. The machine-level bits follow the devices.
#[allow(clippy::identity_op)]
const WRITABLE_MIP_MASK: u16 = 0
    | (1 << SUPERVISOR_SOFTWARE_INTERRUPT)
    | (1 << SUPERVISOR_TIMER_INTERRUPT)
    | (1 << SUPERVISOR_EXTERNAL_INTERRUPT);

/// Bits of sip that S-mode software may write.
const WRITABLE_SIP_MASK: u16 = 1 << SUPERVISOR_SOFTWARE_INTERRUPT;

/// Order in which simultaneously pending interrupts are taken.
///
/// > Multiple simultaneous interrupts destined for M-mode are handled in the following decreasing
/// > priority order: MEI, MSI, MTI, SEI, SSI, STI.
const PRIORITY: [Interrupt; 6] = [
    Interrupt::MachineExternalInterrupt,
    Interrupt::MachineSoftwareInterrupt,
    Interrupt::MachineTimerInterrupt,
    Interrupt::SupervisorExternalInterrupt,
    Interrupt::SupervisorSoftwareInterrupt,
    Interrupt::SupervisorTimerInterrupt,
];

/// The mip and mie registers, and their sip and sie views.
#[derive(Debug, Clone)]
pub struct Interrupts {
    /// Level of the S-mode external interrupt line of the PLIC. ORed with [`Self::seip_internal`]
    /// to become the SEIP field of the final [`Self::mip`] register.
    seip_external: bool,
    /// Software-writable SEIP bit. ORed with [`Self::seip_external`] to become the SEIP field of
    /// the final [`Self::mip`] register.
    seip_internal: bool,

    /// The final mip register as visible from guest software.
    mip: BitArray<[u16; 1], Lsb0>,

    /// The mie register.
    mie: BitArray<[u16; 1], Lsb0>,
}

impl Default for Interrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupts {
    pub fn new() -> Self {
        Self {
            seip_external: false,
            seip_internal: false,
            mip: BitArray::new([0x0000]),
            mie: BitArray::new([0x0000]),
        }
    }

    /// Indicate whether there is an M-level external interrupt pending (MEIP).
    ///
    /// Controlled by the PLIC.
    pub fn set_m_external(&mut self, value: bool) {
        self.mip.set(MACHINE_EXTERNAL_INTERRUPT, value);
    }

    /// Indicate whether there is an S-level external interrupt pending (SEIP).
    ///
    /// Controlled by the PLIC. Note that calling this with `false` does not mean the SEIP field
    /// will be set to `0`, since it is ORed with the (hidden) software-writable SEIP bit.
    pub fn set_s_external(&mut self, value: bool) {
        self.seip_external = value;
        self.update_seip();
    }

    /// Indicate whether there is an M-level timer interrupt pending (MTIP).
    ///
    /// Controlled by the CLINT, based on its mtime and mtimecmp registers.
    pub fn set_m_timer(&mut self, value: bool) {
        self.mip.set(MACHINE_TIMER_INTERRUPT, value);
    }

    /// Indicate whether there is an M-level software interrupt pending (MSIP).
    ///
    /// Controlled by the memory-mapped msip register of the CLINT.
    pub fn set_m_soft(&mut self, value: bool) {
        self.mip.set(MACHINE_SOFTWARE_INTERRUPT, value);
    }

    /// Clear the pending bit of an interrupt that is being taken.
    ///
    /// Bits driven by a device are set again on the next refresh if the device still asserts its
    /// line.
    pub fn clear_pending(&mut self, interrupt: Interrupt) {
        let index = interrupt.code() as usize;
        if index == SUPERVISOR_EXTERNAL_INTERRUPT {
            self.seip_internal = false;
            self.seip_external = false;
        }
        self.mip.set(index, false);
    }

    pub fn is_pending(&self, interrupt: Interrupt) -> bool {
        self.mip[interrupt.code() as usize]
    }

    pub fn read_mip(&self) -> u32 {
        self.mip.load_le::<u16>() as u32
    }

    pub fn write_mip(&mut self, value: u32, mask: u32) {
        let mask = mask as u16 & WRITABLE_MIP_MASK;
        let value = value as u16;
        let mask_bits = mask.view_bits::<Lsb0>();
        let value_bits = value.view_bits::<Lsb0>();

        // Writes to MEIP, MTIP, and MSIP are ignored. Their values are managed by the devices.
        if mask_bits[SUPERVISOR_EXTERNAL_INTERRUPT] {
            self.seip_internal = value_bits[SUPERVISOR_EXTERNAL_INTERRUPT];
            self.update_seip();
        }
        for index in [SUPERVISOR_TIMER_INTERRUPT, SUPERVISOR_SOFTWARE_INTERRUPT] {
            if mask_bits[index] {
                self.mip.set(index, value_bits[index]);
            }
        }
    }

    pub fn read_mie(&self) -> u32 {
        self.mie.load_le::<u16>() as u32
    }

    pub fn write_mie(&mut self, value: u32, mask: u32) {
        let mask = mask as u16 & VALID_INTERRUPTS_MASK;
        let mie = self.mie.load_le::<u16>();
        self.mie.store_le(mie & !mask | value as u16 & mask);
    }

    /// sip is the view of mip restricted to the delegated interrupts.
    pub fn read_sip(&self, delegation: &Delegation) -> u32 {
        self.read_mip() & delegation.read_mideleg()
    }

    pub fn write_sip(&mut self, value: u32, mask: u32, delegation: &Delegation) {
        let mask = mask & delegation.read_mideleg() & WRITABLE_SIP_MASK as u32;
        self.write_mip(value, mask);
    }

    /// sie is the view of mie restricted to the delegated interrupts.
    pub fn read_sie(&self, delegation: &Delegation) -> u32 {
        self.read_mie() & delegation.read_mideleg()
    }

    pub fn write_sie(&mut self, value: u32, mask: u32, delegation: &Delegation) {
        self.write_mie(value, mask & delegation.read_mideleg());
    }

    /// Select the interrupt that should be taken by a hart at `level`, if any.
    ///
    /// > An interrupt i will trap to M-mode (causing the privilege mode to change to M-mode) if all
    /// > of the following are true: (a) either the current privilege mode is M and the MIE bit in
    /// > the mstatus register is set, or the current privilege mode has less privilege than M-mode;
    /// > (b) bit i is set in both mip and mie; and (c) if register mideleg exists, bit i is not set
    /// > in mideleg.
    ///
    /// Delegated interrupts follow the same rule against S-mode and the SIE bit. They are never
    /// taken while in M-mode.
    pub fn pending_interrupt(
        &self,
        level: PrivilegeLevel,
        mstatus: &Mstatus,
        delegation: &Delegation,
    ) -> Option<Interrupt> {
        let pending = self.read_mip() & self.read_mie();
        PRIORITY.into_iter().find(|&interrupt| {
            if pending & (1 << interrupt.code()) == 0 {
                return false;
            }
            if delegation.should_delegate_interrupt(interrupt) {
                level < PrivilegeLevel::Supervisor
                    || (level == PrivilegeLevel::Supervisor && mstatus.sie)
            } else {
                level < PrivilegeLevel::Machine || mstatus.mie
            }
        })
    }

    fn update_seip(&mut self) {
        self.mip.set(
            SUPERVISOR_EXTERNAL_INTERRUPT,
            self.seip_external | self.seip_internal,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_driven_bits_are_read_only() {
        let mut interrupts = Interrupts::new();
        interrupts.write_mip(u32::MAX, u32::MAX);
        assert_eq!(0x222, interrupts.read_mip());
        interrupts.set_m_timer(true);
        interrupts.set_m_external(true);
        interrupts.set_m_soft(true);
        interrupts.write_mip(0, u32::MAX);
        assert_eq!(0x888, interrupts.read_mip());
    }

    #[test]
    fn test_seip_is_ored() {
        let mut interrupts = Interrupts::new();
        interrupts.set_s_external(true);
        interrupts.write_mip(0, 1 << 9);
        assert!(interrupts.is_pending(Interrupt::SupervisorExternalInterrupt));
        interrupts.set_s_external(false);
        assert!(!interrupts.is_pending(Interrupt::SupervisorExternalInterrupt));
        interrupts.write_mip(1 << 9, 1 << 9);
        assert!(interrupts.is_pending(Interrupt::SupervisorExternalInterrupt));
        interrupts.clear_pending(Interrupt::SupervisorExternalInterrupt);
        assert_eq!(0, interrupts.read_mip());
    }

    #[test]
    fn test_mie_valid_bits() {
        let mut interrupts = Interrupts::new();
        interrupts.write_mie(u32::MAX, u32::MAX);
        assert_eq!(0xAAA, interrupts.read_mie());
        interrupts.write_mie(0, 1 << 7);
        assert_eq!(0xA2A, interrupts.read_mie());
    }

    #[test]
    fn test_supervisor_views() {
        let mut delegation = Delegation::new();
        delegation.write_mideleg(1 << 1 | 1 << 5, u32::MAX);
        let mut interrupts = Interrupts::new();
        interrupts.write_mie(u32::MAX, u32::MAX);
        assert_eq!(0x22, interrupts.read_sie(&delegation));

        interrupts.write_sie(0, u32::MAX, &delegation);
        assert_eq!(0xA88, interrupts.read_mie());

        interrupts.write_sip(u32::MAX, u32::MAX, &delegation);
        assert_eq!(0x2, interrupts.read_sip(&delegation));
        interrupts.write_mip(1 << 9, 1 << 9);
        assert_eq!(0x2, interrupts.read_sip(&delegation));
    }

    #[test]
    fn test_machine_interrupt_enabling() {
        let delegation = Delegation::new();
        let mut mstatus = Mstatus::new();
        let mut interrupts = Interrupts::new();
        interrupts.set_m_timer(true);
        assert_eq!(
            None,
            interrupts.pending_interrupt(PrivilegeLevel::User, &mstatus, &delegation)
        );

        interrupts.write_mie(1 << 7, u32::MAX);
        assert_eq!(
            None,
            interrupts.pending_interrupt(PrivilegeLevel::Machine, &mstatus, &delegation)
        );
        assert_eq!(
            Some(Interrupt::MachineTimerInterrupt),
            interrupts.pending_interrupt(PrivilegeLevel::Supervisor, &mstatus, &delegation)
        );
        mstatus.mie = true;
        assert_eq!(
            Some(Interrupt::MachineTimerInterrupt),
            interrupts.pending_interrupt(PrivilegeLevel::Machine, &mstatus, &delegation)
        );
    }

    #[test]
    fn test_delegated_interrupt_enabling() {
        let mut delegation = Delegation::new();
        delegation.write_mideleg(1 << 5, u32::MAX);
        let mut mstatus = Mstatus::new();
        mstatus.mie = true;
        let mut interrupts = Interrupts::new();
        interrupts.write_mie(1 << 5, u32::MAX);
        interrupts.write_mip(1 << 5, u32::MAX);

        let take = |level, mstatus: &Mstatus| {
            interrupts.pending_interrupt(level, mstatus, &delegation)
        };
        assert_eq!(None, take(PrivilegeLevel::Machine, &mstatus));
        assert_eq!(None, take(PrivilegeLevel::Supervisor, &mstatus));
        assert_eq!(
            Some(Interrupt::SupervisorTimerInterrupt),
            take(PrivilegeLevel::User, &mstatus)
        );
        mstatus.sie = true;
        assert_eq!(
            Some(Interrupt::SupervisorTimerInterrupt),
            take(PrivilegeLevel::Supervisor, &mstatus)
        );
    }

    #[test]
    fn test_priority() {
        let delegation = Delegation::new();
        let mstatus = Mstatus::new();
        let mut interrupts = Interrupts::new();
        interrupts.write_mie(u32::MAX, u32::MAX);
        interrupts.write_mip(u32::MAX, u32::MAX);
        interrupts.set_m_timer(true);
        interrupts.set_m_soft(true);

        let take = |interrupts: &Interrupts| {
            interrupts.pending_interrupt(PrivilegeLevel::User, &mstatus, &delegation)
        };
        assert_eq!(Some(Interrupt::MachineSoftwareInterrupt), take(&interrupts));
        interrupts.set_m_external(true);
        assert_eq!(Some(Interrupt::MachineExternalInterrupt), take(&interrupts));
        interrupts.set_m_external(false);
        interrupts.set_m_soft(false);
        interrupts.set_m_timer(false);
        assert_eq!(
            Some(Interrupt::SupervisorExternalInterrupt),
            take(&interrupts)
        );
        interrupts.clear_pending(Interrupt::SupervisorExternalInterrupt);
        assert_eq!(
            Some(Interrupt::SupervisorSoftwareInterrupt),
            take(&interrupts)
        );
        interrupts.clear_pending(Interrupt::SupervisorSoftwareInterrupt);
        assert_eq!(
            Some(Interrupt::SupervisorTimerInterrupt),
            take(&interrupts)
        );
    }
}
