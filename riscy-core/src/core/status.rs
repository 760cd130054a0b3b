use bitvec::{field::BitField, order::Lsb0, view::BitView};

use crate::{PrivilegeLevel, RawPrivilegeLevel};

/// Mask to be applied to mstatus to get sstatus.
pub const SSTATUS_MASK: u32 = 0b1111_1111_1000_1101_1110_0111_0111_0111;

/// The fields of the mstatus register, of which sstatus is a restricted view.
///
/// > The mstatus register is an MXLEN-bit read/write register [...]. The mstatus register keeps
/// > track of and controls the hart’s current operating state. A restricted view of mstatus appears
/// > as the sstatus register in the S-level ISA.
///
/// The fields are plain values so that traps and trap returns can update them directly. Guest
/// writes go through [`Mstatus::write`], which applies the WARL rules. [`Mstatus::pack`] and
/// [`Mstatus::unpack`] convert losslessly between the fields and the register encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mstatus {
    /// S-mode Interrupt Enable.
    pub sie: bool,
    /// M-mode Interrupt Enable.
    pub mie: bool,
    /// S-mode Previous Interrupt Enable.
    pub spie: bool,
    /// U-mode Big Endian.
    pub ube: bool,
    /// M-mode Previous Interrupt Enable.
    pub mpie: bool,
    /// S-mode Previous Privilege: `false` for U-mode, `true` for S-mode.
    pub spp: bool,
    /// V extension Status.
    pub vs: ExtensionContextStatus,
    /// M-mode Previous Privilege.
    pub mpp: RawPrivilegeLevel,
    /// F extension Status.
    pub fs: ExtensionContextStatus,
    /// X extension Status.
    pub xs: ExtensionContextStatus,
    /// Modify PRiVilege.
    pub mprv: bool,
    /// permit Supervisor User Memory access.
    pub sum: bool,
    /// Make eXecutable Readable.
    pub mxr: bool,
    /// Trap Virtual Memory.
    pub tvm: bool,
    /// Timeout Wait.
    pub tw: bool,
    /// Trap SRET.
    pub tsr: bool,
    /// extension Status Dirty.
    pub sd: bool,
}

impl Default for Mstatus {
    fn default() -> Self {
        Self::new()
    }
}

impl Mstatus {
    /// All fields cleared, which is the reset value of the register.
    pub fn new() -> Self {
        Self::unpack(0)
    }

    /// Encode the fields into the 32-bit register layout.
    pub fn pack(&self) -> u32 {
        let mut value = 0u32;
        let bits = value.view_bits_mut::<Lsb0>();
        bits.set(idx::SIE, self.sie);
        bits.set(idx::MIE, self.mie);
        bits.set(idx::SPIE, self.spie);
        bits.set(idx::UBE, self.ube);
        bits.set(idx::MPIE, self.mpie);
        bits.set(idx::SPP, self.spp);
        bits[idx::VS..(idx::VS + 2)].store_le(self.vs as u8);
        bits[idx::MPP..(idx::MPP + 2)].store_le(self.mpp as u8);
        bits[idx::FS..(idx::FS + 2)].store_le(self.fs as u8);
        bits[idx::XS..(idx::XS + 2)].store_le(self.xs as u8);
        bits.set(idx::MPRV, self.mprv);
        bits.set(idx::SUM, self.sum);
        bits.set(idx::MXR, self.mxr);
        bits.set(idx::TVM, self.tvm);
        bits.set(idx::TW, self.tw);
        bits.set(idx::TSR, self.tsr);
        bits.set(idx::SD, self.sd);
        value
    }

    /// Decode the fields from the 32-bit register layout. WPRI bits are dropped.
    pub fn unpack(value: u32) -> Self {
        let bits = value.view_bits::<Lsb0>();
        Self {
            sie: bits[idx::SIE],
            mie: bits[idx::MIE],
            spie: bits[idx::SPIE],
            ube: bits[idx::UBE],
            mpie: bits[idx::MPIE],
            spp: bits[idx::SPP],
            vs: ExtensionContextStatus::from_u2(bits[idx::VS..(idx::VS + 2)].load_le()),
            mpp: RawPrivilegeLevel::from_u2(bits[idx::MPP..(idx::MPP + 2)].load_le()),
            fs: ExtensionContextStatus::from_u2(bits[idx::FS..(idx::FS + 2)].load_le()),
            xs: ExtensionContextStatus::from_u2(bits[idx::XS..(idx::XS + 2)].load_le()),
            mprv: bits[idx::MPRV],
            sum: bits[idx::SUM],
            mxr: bits[idx::MXR],
            tvm: bits[idx::TVM],
            tw: bits[idx::TW],
            tsr: bits[idx::TSR],
            sd: bits[idx::SD],
        }
    }

    /// Write the bits selected by `mask` as a guest would through `csrrw` and friends.
    ///
    /// - MPP is **WARL**: writing the reserved level keeps the previous value.
    /// - UBE is hardwired to zero, this hart is little-endian only.
    /// - XS is read-only zero, there are no custom extensions.
    /// - SD is read-only and recomputed from FS, VS and XS.
    pub fn write(&mut self, value: u32, mask: u32) {
        let mut updated = Self::unpack(self.pack() & !mask | value & mask);
        if updated.mpp.is_reserved() {
            updated.mpp = self.mpp;
        }
        updated.ube = false;
        updated.xs = ExtensionContextStatus::Off;
        updated.update_sd();
        *self = updated;
    }

    /// The sstatus view.
    pub fn read_sstatus(&self) -> u32 {
        self.pack() & SSTATUS_MASK
    }

    pub fn write_sstatus(&mut self, value: u32, mask: u32) {
        self.write(value, mask & SSTATUS_MASK);
    }

    /// The privilege level held by MPP. A reserved level (only possible through direct field
    /// access) is treated as U-mode.
    pub fn mpp_level(&self) -> PrivilegeLevel {
        PrivilegeLevel::try_from(self.mpp).unwrap_or(PrivilegeLevel::User)
    }

    pub fn set_mpp_level(&mut self, level: PrivilegeLevel) {
        self.mpp = level.into();
    }

    /// The privilege level held by SPP.
    pub fn spp_level(&self) -> PrivilegeLevel {
        match self.spp {
            false => PrivilegeLevel::User,
            true => PrivilegeLevel::Supervisor,
        }
    }

    /// Store `level` in SPP. M-mode cannot be represented and is stored as S-mode; traps from
    /// M-mode never target S-mode, so this only happens through a guest mistake.
    pub fn set_spp_level(&mut self, level: PrivilegeLevel) {
        self.spp = level != PrivilegeLevel::User;
    }

    fn update_sd(&mut self) {
        use ExtensionContextStatus::Dirty;
        self.sd = self.fs == Dirty || self.vs == Dirty || self.xs == Dirty;
    }
}

/// Bit indices into mstatus register.
mod idx {
    pub const SIE: usize = 1;
    pub const MIE: usize = 3;
    pub const SPIE: usize = 5;
    pub const UBE: usize = 6;
    pub const MPIE: usize = 7;
    pub const SPP: usize = 8;
    pub const VS: usize = 9;
    pub const MPP: usize = 11;
    pub const FS: usize = 13;
    pub const XS: usize = 15;
    pub const MPRV: usize = 17;
    pub const SUM: usize = 18;
    pub const MXR: usize = 19;
    pub const TVM: usize = 20;
    pub const TW: usize = 21;
    pub const TSR: usize = 22;
    pub const SD: usize = 31;
}

/// Possible values of the extension context status fields (FS, VS, XS) in the mstatus register.
///
/// > | Status | FS and VS Meaning | XS Meaning                   |
/// > | ------ | ----------------- | ---------------------------- |
/// > | 0      | Off               | All off                      |
/// > | 1      | Initial           | None dirty or clean, some on |
/// > | 2      | Clean             | None dirty, some clean       |
/// > | 3      | Dirty             | Some dirty                   |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ExtensionContextStatus {
    #[default]
    Off = 0,
    Initial = 1,
    Clean = 2,
    Dirty = 3,
}

impl ExtensionContextStatus {
    /// Convert the low two bits of `value` into an [`ExtensionContextStatus`].
    pub fn from_u2(value: u8) -> Self {
        match value & 0b11 {
            0 => Self::Off,
            1 => Self::Initial,
            2 => Self::Clean,
            _ => Self::Dirty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_round_trip() {
        let statuses = [
            ExtensionContextStatus::Off,
            ExtensionContextStatus::Initial,
            ExtensionContextStatus::Clean,
            ExtensionContextStatus::Dirty,
        ];
        let levels = [
            RawPrivilegeLevel::User,
            RawPrivilegeLevel::Supervisor,
            RawPrivilegeLevel::Reserved,
            RawPrivilegeLevel::Machine,
        ];
        for (i, (&status, &level)) in statuses.iter().zip(levels.iter()).enumerate() {
            let flag = i % 2 == 0;
            let mstatus = Mstatus {
                sie: flag,
                mie: !flag,
                spie: flag,
                ube: !flag,
                mpie: flag,
                spp: !flag,
                vs: status,
                mpp: level,
                fs: statuses[3 - i],
                xs: status,
                mprv: flag,
                sum: !flag,
                mxr: flag,
                tvm: !flag,
                tw: flag,
                tsr: !flag,
                sd: flag,
            };
            assert_eq!(mstatus, Mstatus::unpack(mstatus.pack()));
        }
    }

    #[test]
    fn test_field_positions() {
        let mstatus = Mstatus {
            mie: true,
            mpp: RawPrivilegeLevel::Machine,
            ..Mstatus::new()
        };
        assert_eq!(0x0000_1808, mstatus.pack());
        assert_eq!(0x8000_0000, Mstatus { sd: true, ..Mstatus::new() }.pack());
        assert!(Mstatus::unpack(1 << 8).spp);
    }

    #[test]
    fn test_unpack_drops_wpri_bits() {
        let mstatus = Mstatus::unpack(u32::MAX);
        assert_eq!(0x807F_FFEA, mstatus.pack());
    }

    #[test]
    fn test_write_keeps_mpp_on_reserved_level() {
        let mut mstatus = Mstatus::new();
        mstatus.write(0b11 << 11, 0b11 << 11);
        assert_eq!(PrivilegeLevel::Machine, mstatus.mpp_level());
        mstatus.write(0b10 << 11, 0b11 << 11);
        assert_eq!(RawPrivilegeLevel::Machine, mstatus.mpp);
        mstatus.write(0b01 << 11, 0b11 << 11);
        assert_eq!(PrivilegeLevel::Supervisor, mstatus.mpp_level());
    }

    #[test]
    fn test_write_computes_sd() {
        let mut mstatus = Mstatus::new();
        mstatus.write(0b11 << 13, u32::MAX);
        assert!(mstatus.sd);
        assert_eq!(0x8000_6000, mstatus.pack());
        mstatus.write(0, 1 << 31);
        assert!(mstatus.sd);
        mstatus.write(0b10 << 13, 0b11 << 13);
        assert!(!mstatus.sd);
    }

    #[test]
    fn test_write_respects_mask_and_read_only_fields() {
        let mut mstatus = Mstatus::new();
        mstatus.write(u32::MAX, 1 << 3);
        assert!(mstatus.mie);
        assert!(!mstatus.sie);
        mstatus.write(u32::MAX, (0b11 << 15) | (1 << 6));
        assert_eq!(ExtensionContextStatus::Off, mstatus.xs);
        assert!(!mstatus.ube);
    }

    #[test]
    fn test_sstatus_view() {
        let mut mstatus = Mstatus::new();
        mstatus.mie = true;
        mstatus.sie = true;
        mstatus.set_mpp_level(PrivilegeLevel::Machine);
        assert_eq!(0b10, mstatus.read_sstatus());
        mstatus.write_sstatus(0, u32::MAX);
        assert!(!mstatus.sie);
        assert!(mstatus.mie);
        assert_eq!(PrivilegeLevel::Machine, mstatus.mpp_level());
        mstatus.write_sstatus(1 << 8, u32::MAX);
        assert_eq!(PrivilegeLevel::Supervisor, mstatus.spp_level());
    }
}
