//! General purpose registers and the program counter.

use std::fmt;

/// The number of `x` registers (`x0` up to `x31`).
pub const LEN: u8 = 32;

/// The 32 integer registers of an RV32 hart plus its program counter.
///
/// > For RV32I, the 32 x registers are each 32 bits wide, i.e., XLEN=32. Register x0 is hardwired
/// > with all bits equal to 0.
///
/// Writes to `x0` are discarded, so there is no way to observe a non-zero `x0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registers {
    x_registers: [u32; LEN as usize],
    pc: u32,
}

impl Default for Registers {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Registers {
    /// All-zero registers with the program counter at `initial_pc`.
    pub fn new(initial_pc: u32) -> Self {
        Self {
            x_registers: [0; LEN as usize],
            pc: initial_pc,
        }
    }

    pub fn x(&self, specifier: Specifier) -> u32 {
        self.x_registers[usize::from(specifier)]
    }

    /// Writes to `x0` are ignored.
    pub fn set_x(&mut self, specifier: Specifier, value: u32) {
        self.replace_x(specifier, value);
    }

    /// Replaces the value of an `x` register, returning its old value.
    ///
    /// Writes to `x0` are ignored and return `0`.
    pub fn replace_x(&mut self, specifier: Specifier, value: u32) -> u32 {
        if specifier == Specifier::X0 {
            0
        } else {
            std::mem::replace(&mut self.x_registers[usize::from(specifier)], value)
        }
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    /// Moves the program counter to the next sequential instruction.
    pub fn advance_pc(&mut self) {
        self.pc = self.pc.wrapping_add(4);
    }
}

/// An `x` register index in `0..32`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Specifier(u8);

impl Specifier {
    /// `zero`
    pub const X0: Self = Self(0);
    /// `ra`, the return address of the standard calling convention.
    pub const RA: Self = Self(1);
    /// `gp`; the self-test protocol reports the failing test number through it.
    pub const GP: Self = Self(3);
    /// `a0`; holds the self-test verdict at an `ecall`.
    pub const A0: Self = Self(10);

    /// Returns `None` if `index > 31`.
    pub fn new<U: TryInto<u8>>(index: U) -> Option<Self> {
        let index = index.try_into().ok()?;
        (index < LEN).then_some(Self(index))
    }

    /// Builds a specifier from the low five bits of `value`.
    pub fn from_u5(value: u8) -> Self {
        const_assert_eq!(LEN, 32);
        Self(value & 0x1F)
    }

    pub fn iter_all() -> impl Iterator<Item = Self> {
        (0..LEN).map(Self)
    }

    /// Name of this register in the standard calling convention.
    pub fn abi_name(self) -> &'static str {
        const NAMES: [&str; LEN as usize] = [
            "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3",
            "a4", "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11",
            "t3", "t4", "t5", "t6",
        ];
        NAMES[self.0 as usize]
    }
}

impl From<Specifier> for u8 {
    fn from(value: Specifier) -> Self {
        value.0
    }
}

impl From<Specifier> for u32 {
    fn from(value: Specifier) -> Self {
        value.0 as u32
    }
}

impl From<Specifier> for usize {
    fn from(value: Specifier) -> Self {
        value.0 as usize
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_to_zero() {
        let mut registers = Registers::default();
        registers.set_x(Specifier::X0, 0xDEAD_BEEF);
        assert_eq!(0, registers.x(Specifier::X0));
        assert_eq!(0, registers.replace_x(Specifier::X0, 7));
        assert_eq!(0, registers.x(Specifier::X0));
    }

    #[test]
    fn test_set_x() {
        let mut registers = Registers::default();
        for specifier in Specifier::iter_all().skip(1) {
            registers.set_x(specifier, u32::from(specifier) * 3);
        }
        assert_eq!(0, registers.x(Specifier::X0));
        for specifier in Specifier::iter_all().skip(1) {
            assert_eq!(u32::from(specifier) * 3, registers.x(specifier));
        }
    }

    #[test]
    fn test_replace_x() {
        let mut registers = Registers::default();
        assert_eq!(0, registers.replace_x(Specifier::A0, 42));
        assert_eq!(42, registers.replace_x(Specifier::A0, 43));
        assert_eq!(43, registers.x(Specifier::A0));
    }

    #[test]
    fn test_pc() {
        let mut registers = Registers::new(0x8000_0000);
        registers.advance_pc();
        assert_eq!(0x8000_0004, registers.pc());
        registers.set_pc(u32::MAX - 1);
        registers.advance_pc();
        assert_eq!(2, registers.pc());
    }

    #[test]
    fn test_specifier() {
        assert_eq!(None, Specifier::new(32));
        assert_eq!(Some(Specifier::A0), Specifier::new(10u32));
        assert_eq!(Specifier::from_u5(3), Specifier::from_u5(35));
        assert_eq!("a0", Specifier::A0.abi_name());
        assert_eq!("x10", Specifier::A0.to_string());
    }
}
