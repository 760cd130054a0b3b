//! Decoding of raw 32-bit instruction words into typed instructions and their mnemonics.
//!
//! Decoding happens in two steps. [`Instruction::decode`] only looks at the opcode to pick the
//! instruction format and extract its fields. [`Instruction::operation`] then resolves the funct
//! fields into the concrete operation. Both steps can fail, and both failures are fatal for the
//! instruction.

use crate::bits::{extract_bits, sign_extend};
use crate::core::csr::CsrSpecifier;
use crate::registers::Specifier;
use std::fmt;
use thiserror::Error;

/// Major opcodes (bits 6:0) of every supported instruction group.
#[allow(clippy::unusual_byte_groupings)]
pub mod opcode {
    pub const LOAD: u8 = 0b00_000_11;
    pub const MISC_MEM: u8 = 0b00_011_11;
    pub const OP_IMM: u8 = 0b00_100_11;
    pub const AUIPC: u8 = 0b00_101_11;
    pub const STORE: u8 = 0b01_000_11;
    pub const AMO: u8 = 0b01_011_11;
    pub const OP: u8 = 0b01_100_11;
    pub const LUI: u8 = 0b01_101_11;
    pub const BRANCH: u8 = 0b11_000_11;
    pub const JALR: u8 = 0b11_001_11;
    pub const JAL: u8 = 0b11_011_11;
    pub const SYSTEM: u8 = 0b11_100_11;
}

/// A decoded instruction, one variant per encoding format.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Instruction {
    R(RType),
    I(IType),
    S(SType),
    B(BType),
    U(UType),
    J(JType),
    Fence(FenceType),
}

/// Register-register operations: OP (base and M extension) and AMO (A extension).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RType {
    pub opcode: u8,
    pub rd: Specifier,
    pub funct3: u8,
    pub rs1: Specifier,
    pub rs2: Specifier,
    pub funct7: u8,
}

/// Register-immediate operations, loads, `jalr`, and everything in the SYSTEM opcode.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct IType {
    pub opcode: u8,
    pub rd: Specifier,
    pub funct3: u8,
    pub rs1: Specifier,
    /// The 12-bit immediate, sign-extended.
    pub imm: i32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SType {
    pub opcode: u8,
    pub funct3: u8,
    pub rs1: Specifier,
    pub rs2: Specifier,
    /// The 12-bit immediate, sign-extended.
    pub imm: i32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BType {
    pub opcode: u8,
    pub funct3: u8,
    pub rs1: Specifier,
    pub rs2: Specifier,
    /// The 13-bit branch offset (bit 0 always clear), sign-extended.
    pub imm: i32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UType {
    pub opcode: u8,
    pub rd: Specifier,
    /// Bits 31:12 of the instruction in place, with bits 11:0 zero.
    pub imm: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct JType {
    pub opcode: u8,
    pub rd: Specifier,
    /// The 21-bit jump offset (bit 0 always clear), sign-extended.
    pub imm: i32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FenceType {
    pub opcode: u8,
    pub rd: Specifier,
    pub funct3: u8,
    pub rs1: Specifier,
    /// Fence mode, bits 31:28.
    pub fm: u8,
    pub predecessor: FenceOrderCombination,
    pub successor: FenceOrderCombination,
}

/// The set of memory and I/O accesses a fence orders.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct FenceOrderCombination {
    pub device_input: bool,
    pub device_output: bool,
    pub memory_reads: bool,
    pub memory_writes: bool,
}

impl FenceOrderCombination {
    /// Decodes a 4-bit `IORW` field.
    pub fn from_u4(value: u8) -> Self {
        Self {
            device_input: value & 0b1000 != 0,
            device_output: value & 0b0100 != 0,
            memory_reads: value & 0b0010 != 0,
            memory_writes: value & 0b0001 != 0,
        }
    }

    pub fn to_u4(self) -> u8 {
        (self.device_input as u8) << 3
            | (self.device_output as u8) << 2
            | (self.memory_reads as u8) << 1
            | self.memory_writes as u8
    }
}

/// Names one of the instruction encoding formats, used in error reporting.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Format {
    R,
    I,
    S,
    B,
    U,
    J,
    Fence,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::R => "R",
            Format::I => "I",
            Format::S => "S",
            Format::B => "B",
            Format::U => "U",
            Format::J => "J",
            Format::Fence => "fence",
        })
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum DecodeError {
    #[error("unsupported opcode {opcode:#09b} in instruction {raw:#010x}")]
    UnsupportedOpcode { raw: u32, opcode: u8 },
    #[error("no {format}-type operation for opcode {opcode:#09b} with funct3 {funct3:#05b}")]
    UnknownOperation { format: Format, opcode: u8, funct3: u8 },
}

impl Instruction {
    /// Splits `raw` into the fields of the format selected by its opcode.
    ///
    /// This does not check the funct fields, see [`Self::operation`] for that.
    pub fn decode(raw: u32) -> Result<Self, DecodeError> {
        let opcode = extract_bits(raw, 0, 6) as u8;
        let instruction = match opcode {
            opcode::OP | opcode::AMO => Self::R(RType {
                opcode,
                rd: rd(raw),
                funct3: funct3(raw),
                rs1: rs1(raw),
                rs2: rs2(raw),
                funct7: extract_bits(raw, 25, 31) as u8,
            }),
            opcode::OP_IMM | opcode::LOAD | opcode::JALR | opcode::SYSTEM => Self::I(IType {
                opcode,
                rd: rd(raw),
                funct3: funct3(raw),
                rs1: rs1(raw),
                imm: i_imm(raw),
            }),
            opcode::STORE => Self::S(SType {
                opcode,
                funct3: funct3(raw),
                rs1: rs1(raw),
                rs2: rs2(raw),
                imm: s_imm(raw),
            }),
            opcode::BRANCH => Self::B(BType {
                opcode,
                funct3: funct3(raw),
                rs1: rs1(raw),
                rs2: rs2(raw),
                imm: b_imm(raw),
            }),
            opcode::LUI | opcode::AUIPC => Self::U(UType {
                opcode,
                rd: rd(raw),
                imm: u_imm(raw),
            }),
            opcode::JAL => Self::J(JType {
                opcode,
                rd: rd(raw),
                imm: j_imm(raw),
            }),
            opcode::MISC_MEM => Self::Fence(FenceType {
                opcode,
                rd: rd(raw),
                funct3: funct3(raw),
                rs1: rs1(raw),
                fm: extract_bits(raw, 28, 31) as u8,
                predecessor: FenceOrderCombination::from_u4(extract_bits(raw, 24, 27) as u8),
                successor: FenceOrderCombination::from_u4(extract_bits(raw, 20, 23) as u8),
            }),
            _ => return Err(DecodeError::UnsupportedOpcode { raw, opcode }),
        };
        Ok(instruction)
    }

    /// Resolves the operation (mnemonic) this instruction encodes.
    pub fn operation(&self) -> Result<Operation, DecodeError> {
        Ok(match self {
            Self::R(r) => Operation::Reg(r.operation()?),
            Self::I(i) => Operation::Imm(i.operation()?),
            Self::S(s) => Operation::Store(s.operation()?),
            Self::B(b) => Operation::Branch(b.operation()?),
            Self::U(u) => Operation::Upper(u.operation()?),
            Self::J(j) => Operation::Jump(j.operation()?),
            Self::Fence(fence) => Operation::Fence(fence.operation()?),
        })
    }

    /// Packs the fields back into a raw instruction word.
    pub fn encode(&self) -> u32 {
        match self {
            Self::R(r) => r.encode(),
            Self::I(i) => i.encode(),
            Self::S(s) => s.encode(),
            Self::B(b) => b.encode(),
            Self::U(u) => u.encode(),
            Self::J(j) => j.encode(),
            Self::Fence(fence) => fence.encode(),
        }
    }

    pub fn format(&self) -> Format {
        match self {
            Self::R(_) => Format::R,
            Self::I(_) => Format::I,
            Self::S(_) => Format::S,
            Self::B(_) => Format::B,
            Self::U(_) => Format::U,
            Self::J(_) => Format::J,
            Self::Fence(_) => Format::Fence,
        }
    }
}

impl RType {
    /// The AMO function select, i.e. `funct7` without the `aq` and `rl` bits.
    pub fn funct5(&self) -> u8 {
        self.funct7 >> 2
    }

    pub fn operation(&self) -> Result<RegOp, DecodeError> {
        let op = match (self.opcode, self.funct7, self.funct3) {
            (opcode::OP, 0b000_0000, 0b000) => RegOp::Add,
            (opcode::OP, 0b010_0000, 0b000) => RegOp::Sub,
            (opcode::OP, 0b000_0000, 0b001) => RegOp::Sll,
            (opcode::OP, 0b000_0000, 0b010) => RegOp::Slt,
            (opcode::OP, 0b000_0000, 0b011) => RegOp::Sltu,
            (opcode::OP, 0b000_0000, 0b100) => RegOp::Xor,
            (opcode::OP, 0b000_0000, 0b101) => RegOp::Srl,
            (opcode::OP, 0b010_0000, 0b101) => RegOp::Sra,
            (opcode::OP, 0b000_0000, 0b110) => RegOp::Or,
            (opcode::OP, 0b000_0000, 0b111) => RegOp::And,
            (opcode::OP, 0b000_0001, 0b000) => RegOp::Mul,
            (opcode::OP, 0b000_0001, 0b001) => RegOp::Mulh,
            (opcode::OP, 0b000_0001, 0b010) => RegOp::Mulhsu,
            (opcode::OP, 0b000_0001, 0b011) => RegOp::Mulhu,
            (opcode::OP, 0b000_0001, 0b100) => RegOp::Div,
            (opcode::OP, 0b000_0001, 0b101) => RegOp::Divu,
            (opcode::OP, 0b000_0001, 0b110) => RegOp::Rem,
            (opcode::OP, 0b000_0001, 0b111) => RegOp::Remu,
            (opcode::AMO, _, 0b010) => match self.funct5() {
                0b00010 => RegOp::LrW,
                0b00011 => RegOp::ScW,
                0b00001 => RegOp::AmoswapW,
                0b00000 => RegOp::AmoaddW,
                0b00100 => RegOp::AmoxorW,
                0b01100 => RegOp::AmoandW,
                0b01000 => RegOp::AmoorW,
                0b10000 => RegOp::AmominW,
                0b10100 => RegOp::AmomaxW,
                0b11000 => RegOp::AmominuW,
                0b11100 => RegOp::AmomaxuW,
                _ => return Err(self.unknown()),
            },
            _ => return Err(self.unknown()),
        };
        Ok(op)
    }

    pub fn encode(&self) -> u32 {
        (self.funct7 as u32) << 25
            | u32::from(self.rs2) << 20
            | u32::from(self.rs1) << 15
            | (self.funct3 as u32) << 12
            | u32::from(self.rd) << 7
            | self.opcode as u32
    }

    fn unknown(&self) -> DecodeError {
        DecodeError::UnknownOperation {
            format: Format::R,
            opcode: self.opcode,
            funct3: self.funct3,
        }
    }
}

impl IType {
    /// The immediate as the raw 12 bits found in the instruction.
    pub fn raw_imm(&self) -> u16 {
        (self.imm as u32 & 0xFFF) as u16
    }

    /// The CSR addressed by a Zicsr instruction.
    pub fn csr(&self) -> CsrSpecifier {
        self.raw_imm()
    }

    /// The shift amount of `slli`, `srli`, and `srai`.
    pub fn shamt(&self) -> u32 {
        self.raw_imm() as u32 & 0x1F
    }

    /// The 5-bit zero-extended immediate of `csrr*i`, which is encoded in the `rs1` field.
    pub fn uimm(&self) -> u32 {
        u32::from(self.rs1)
    }

    pub fn operation(&self) -> Result<ImmOp, DecodeError> {
        let imm_11_5 = self.raw_imm() >> 5;
        let op = match (self.opcode, self.funct3) {
            (opcode::OP_IMM, 0b000) => ImmOp::Addi,
            (opcode::OP_IMM, 0b010) => ImmOp::Slti,
            (opcode::OP_IMM, 0b011) => ImmOp::Sltiu,
            (opcode::OP_IMM, 0b100) => ImmOp::Xori,
            (opcode::OP_IMM, 0b110) => ImmOp::Ori,
            (opcode::OP_IMM, 0b111) => ImmOp::Andi,
            (opcode::OP_IMM, 0b001) if imm_11_5 == 0b000_0000 => ImmOp::Slli,
            (opcode::OP_IMM, 0b101) if imm_11_5 == 0b000_0000 => ImmOp::Srli,
            (opcode::OP_IMM, 0b101) if imm_11_5 == 0b010_0000 => ImmOp::Srai,
            (opcode::LOAD, 0b000) => ImmOp::Lb,
            (opcode::LOAD, 0b001) => ImmOp::Lh,
            (opcode::LOAD, 0b010) => ImmOp::Lw,
            (opcode::LOAD, 0b100) => ImmOp::Lbu,
            (opcode::LOAD, 0b101) => ImmOp::Lhu,
            (opcode::JALR, 0b000) => ImmOp::Jalr,
            (opcode::SYSTEM, 0b000) => match self.raw_imm() {
                0x000 => ImmOp::Ecall,
                0x001 => ImmOp::Ebreak,
                0x102 => ImmOp::Sret,
                0x302 => ImmOp::Mret,
                0x105 => ImmOp::Wfi,
                _ if imm_11_5 == 0b000_1001 => ImmOp::SfenceVma,
                _ => return Err(self.unknown()),
            },
            (opcode::SYSTEM, 0b001) => ImmOp::Csrrw,
            (opcode::SYSTEM, 0b010) => ImmOp::Csrrs,
            (opcode::SYSTEM, 0b011) => ImmOp::Csrrc,
            (opcode::SYSTEM, 0b101) => ImmOp::Csrrwi,
            (opcode::SYSTEM, 0b110) => ImmOp::Csrrsi,
            (opcode::SYSTEM, 0b111) => ImmOp::Csrrci,
            _ => return Err(self.unknown()),
        };
        Ok(op)
    }

    pub fn encode(&self) -> u32 {
        (self.raw_imm() as u32) << 20
            | u32::from(self.rs1) << 15
            | (self.funct3 as u32) << 12
            | u32::from(self.rd) << 7
            | self.opcode as u32
    }

    fn unknown(&self) -> DecodeError {
        DecodeError::UnknownOperation {
            format: Format::I,
            opcode: self.opcode,
            funct3: self.funct3,
        }
    }
}

impl SType {
    pub fn operation(&self) -> Result<StoreOp, DecodeError> {
        match self.funct3 {
            0b000 => Ok(StoreOp::Sb),
            0b001 => Ok(StoreOp::Sh),
            0b010 => Ok(StoreOp::Sw),
            funct3 => Err(DecodeError::UnknownOperation {
                format: Format::S,
                opcode: self.opcode,
                funct3,
            }),
        }
    }

    pub fn encode(&self) -> u32 {
        let imm = self.imm as u32;
        extract_bits(imm, 5, 11) << 25
            | u32::from(self.rs2) << 20
            | u32::from(self.rs1) << 15
            | (self.funct3 as u32) << 12
            | extract_bits(imm, 0, 4) << 7
            | self.opcode as u32
    }
}

impl BType {
    pub fn operation(&self) -> Result<BranchOp, DecodeError> {
        match self.funct3 {
            0b000 => Ok(BranchOp::Beq),
            0b001 => Ok(BranchOp::Bne),
            0b100 => Ok(BranchOp::Blt),
            0b101 => Ok(BranchOp::Bge),
            0b110 => Ok(BranchOp::Bltu),
            0b111 => Ok(BranchOp::Bgeu),
            funct3 => Err(DecodeError::UnknownOperation {
                format: Format::B,
                opcode: self.opcode,
                funct3,
            }),
        }
    }

    pub fn encode(&self) -> u32 {
        let imm = self.imm as u32;
        extract_bits(imm, 12, 12) << 31
            | extract_bits(imm, 5, 10) << 25
            | u32::from(self.rs2) << 20
            | u32::from(self.rs1) << 15
            | (self.funct3 as u32) << 12
            | extract_bits(imm, 1, 4) << 8
            | extract_bits(imm, 11, 11) << 7
            | self.opcode as u32
    }
}

impl UType {
    pub fn operation(&self) -> Result<UpperOp, DecodeError> {
        match self.opcode {
            opcode::LUI => Ok(UpperOp::Lui),
            opcode::AUIPC => Ok(UpperOp::Auipc),
            opcode => Err(DecodeError::UnknownOperation {
                format: Format::U,
                opcode,
                funct3: 0,
            }),
        }
    }

    pub fn encode(&self) -> u32 {
        (self.imm & 0xFFFF_F000) | u32::from(self.rd) << 7 | self.opcode as u32
    }
}

impl JType {
    pub fn operation(&self) -> Result<JumpOp, DecodeError> {
        match self.opcode {
            opcode::JAL => Ok(JumpOp::Jal),
            opcode => Err(DecodeError::UnknownOperation {
                format: Format::J,
                opcode,
                funct3: 0,
            }),
        }
    }

    pub fn encode(&self) -> u32 {
        let imm = self.imm as u32;
        extract_bits(imm, 20, 20) << 31
            | extract_bits(imm, 1, 10) << 21
            | extract_bits(imm, 11, 11) << 20
            | extract_bits(imm, 12, 19) << 12
            | u32::from(self.rd) << 7
            | self.opcode as u32
    }
}

impl FenceType {
    pub fn operation(&self) -> Result<FenceOp, DecodeError> {
        match self.funct3 {
            0b000 => Ok(FenceOp::Fence),
            0b001 => Ok(FenceOp::FenceI),
            funct3 => Err(DecodeError::UnknownOperation {
                format: Format::Fence,
                opcode: self.opcode,
                funct3,
            }),
        }
    }

    pub fn encode(&self) -> u32 {
        ((self.fm & 0xF) as u32) << 28
            | (self.predecessor.to_u4() as u32) << 24
            | (self.successor.to_u4() as u32) << 20
            | u32::from(self.rs1) << 15
            | (self.funct3 as u32) << 12
            | u32::from(self.rd) << 7
            | self.opcode as u32
    }
}

/// A resolved operation, grouped by the format that encodes it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Operation {
    Reg(RegOp),
    Imm(ImmOp),
    Store(StoreOp),
    Branch(BranchOp),
    Upper(UpperOp),
    Jump(JumpOp),
    Fence(FenceOp),
}

impl Operation {
    /// The assembly mnemonic, e.g. `"amoadd.w"`.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Operation::Reg(op) => op.mnemonic(),
            Operation::Imm(op) => op.mnemonic(),
            Operation::Store(op) => op.mnemonic(),
            Operation::Branch(op) => op.mnemonic(),
            Operation::Upper(op) => op.mnemonic(),
            Operation::Jump(op) => op.mnemonic(),
            Operation::Fence(op) => op.mnemonic(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Declares an operation enum together with its mnemonic table.
macro_rules! operations {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $mnemonic:literal,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
        pub enum $name {
            $($variant,)*
        }

        impl $name {
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Self::$variant => $mnemonic,)*
                }
            }
        }
    };
}

operations! {
    /// Operations encoded in the R format.
    RegOp {
        Add => "add",
        Sub => "sub",
        Sll => "sll",
        Slt => "slt",
        Sltu => "sltu",
        Xor => "xor",
        Srl => "srl",
        Sra => "sra",
        Or => "or",
        And => "and",
        Mul => "mul",
        Mulh => "mulh",
        Mulhsu => "mulhsu",
        Mulhu => "mulhu",
        Div => "div",
        Divu => "divu",
        Rem => "rem",
        Remu => "remu",
        LrW => "lr.w",
        ScW => "sc.w",
        AmoswapW => "amoswap.w",
        AmoaddW => "amoadd.w",
        AmoxorW => "amoxor.w",
        AmoandW => "amoand.w",
        AmoorW => "amoor.w",
        AmominW => "amomin.w",
        AmomaxW => "amomax.w",
        AmominuW => "amominu.w",
        AmomaxuW => "amomaxu.w",
    }
}

operations! {
    /// Operations encoded in the I format.
    ImmOp {
        Addi => "addi",
        Slti => "slti",
        Sltiu => "sltiu",
        Xori => "xori",
        Ori => "ori",
        Andi => "andi",
        Slli => "slli",
        Srli => "srli",
        Srai => "srai",
        Lb => "lb",
        Lh => "lh",
        Lw => "lw",
        Lbu => "lbu",
        Lhu => "lhu",
        Jalr => "jalr",
        Ecall => "ecall",
        Ebreak => "ebreak",
        Sret => "sret",
        Mret => "mret",
        Wfi => "wfi",
        SfenceVma => "sfence.vma",
        Csrrw => "csrrw",
        Csrrs => "csrrs",
        Csrrc => "csrrc",
        Csrrwi => "csrrwi",
        Csrrsi => "csrrsi",
        Csrrci => "csrrci",
    }
}

operations! {
    StoreOp {
        Sb => "sb",
        Sh => "sh",
        Sw => "sw",
    }
}

operations! {
    BranchOp {
        Beq => "beq",
        Bne => "bne",
        Blt => "blt",
        Bge => "bge",
        Bltu => "bltu",
        Bgeu => "bgeu",
    }
}

operations! {
    UpperOp {
        Lui => "lui",
        Auipc => "auipc",
    }
}

operations! {
    JumpOp {
        Jal => "jal",
    }
}

operations! {
    FenceOp {
        Fence => "fence",
        FenceI => "fence.i",
    }
}

fn rd(raw: u32) -> Specifier {
    Specifier::from_u5(extract_bits(raw, 7, 11) as u8)
}

fn rs1(raw: u32) -> Specifier {
    Specifier::from_u5(extract_bits(raw, 15, 19) as u8)
}

fn rs2(raw: u32) -> Specifier {
    Specifier::from_u5(extract_bits(raw, 20, 24) as u8)
}

fn funct3(raw: u32) -> u8 {
    extract_bits(raw, 12, 14) as u8
}

/// imm[11:0] = inst[31:20]
fn i_imm(raw: u32) -> i32 {
    sign_extend(extract_bits(raw, 20, 31), 11)
}

/// imm[11:5] = inst[31:25], imm[4:0] = inst[11:7]
fn s_imm(raw: u32) -> i32 {
    sign_extend(extract_bits(raw, 25, 31) << 5 | extract_bits(raw, 7, 11), 11)
}

/// imm[12] = inst[31], imm[11] = inst[7], imm[10:5] = inst[30:25], imm[4:1] = inst[11:8]
fn b_imm(raw: u32) -> i32 {
    let imm = extract_bits(raw, 31, 31) << 12
        | extract_bits(raw, 7, 7) << 11
        | extract_bits(raw, 25, 30) << 5
        | extract_bits(raw, 8, 11) << 1;
    sign_extend(imm, 12)
}

/// imm[31:12] = inst[31:12]
fn u_imm(raw: u32) -> u32 {
    raw & 0xFFFF_F000
}

/// imm[20] = inst[31], imm[19:12] = inst[19:12], imm[11] = inst[20], imm[10:1] = inst[30:21]
fn j_imm(raw: u32) -> i32 {
    let imm = extract_bits(raw, 31, 31) << 20
        | extract_bits(raw, 12, 19) << 12
        | extract_bits(raw, 20, 20) << 11
        | extract_bits(raw, 21, 30) << 1;
    sign_extend(imm, 20)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x(index: u8) -> Specifier {
        Specifier::from_u5(index)
    }

    fn mnemonic(raw: u32) -> &'static str {
        Instruction::decode(raw)
            .unwrap()
            .operation()
            .unwrap()
            .mnemonic()
    }

    #[test]
    fn test_i_imm() {
        assert_eq!(0, i_imm(0x0000_0000));
        assert_eq!(-1, i_imm(0xFFF0_0000));
        assert_eq!(2047, i_imm(2047 << 20));
        assert_eq!(-2048, i_imm(0x8000_0000));
        assert_eq!(-42, i_imm((-42_i32 << 20) as u32));
        // Check other bits are ignored
        assert_eq!(0, i_imm(0x000F_FFFF));
        assert_eq!(1209, i_imm((1209 << 20) | 0x000C_D10A));
    }

    #[test]
    fn test_s_imm() {
        // sw a0, -4(sp)
        assert_eq!(-4, s_imm(0xFEA1_2E23));
        // sb a0, 0(a1)
        assert_eq!(0, s_imm(0x00A5_8023));
        // sw t0, 2047(zero)
        assert_eq!(2047, s_imm(0x7E50_2FA3));
    }

    #[test]
    fn test_decode_r_type() {
        let instruction = Instruction::decode(0x007403B3).unwrap();
        assert_eq!(
            Instruction::R(RType {
                opcode: 0b0110011,
                rd: x(7),
                funct3: 0,
                rs1: x(8),
                rs2: x(7),
                funct7: 0,
            }),
            instruction
        );
        assert_eq!("add", instruction.operation().unwrap().to_string());
    }

    #[test]
    fn test_decode_i_type() {
        let instruction = Instruction::decode(0x06800513).unwrap();
        assert_eq!(
            Instruction::I(IType {
                opcode: 0b0010011,
                rd: x(10),
                funct3: 0,
                rs1: x(0),
                imm: 104,
            }),
            instruction
        );
        assert_eq!("addi", mnemonic(0x06800513));

        let Instruction::I(jalr) = Instruction::decode(0x00008067).unwrap() else {
            panic!("jalr is I-type");
        };
        assert_eq!(x(1), jalr.rs1);
        assert_eq!(x(0), jalr.rd);
        assert_eq!("jalr", mnemonic(0x00008067));
    }

    #[test]
    fn test_decode_csr() {
        let Instruction::I(csrrw) = Instruction::decode(0x30401073).unwrap() else {
            panic!("csrrw is I-type");
        };
        assert_eq!(0x304, csrrw.csr());
        assert_eq!(1, csrrw.funct3);
        assert_eq!("csrrw", mnemonic(0x30401073));

        // csrrs a0, cycle, zero: a CSR address above 0x7FF must not be sign-extended
        let Instruction::I(rdcycle) = Instruction::decode(0xC0002573).unwrap() else {
            panic!("csrrs is I-type");
        };
        assert_eq!(0xC00, rdcycle.csr());
        assert_eq!("csrrs", mnemonic(0xC0002573));
    }

    #[test]
    fn test_decode_j_type() {
        let Instruction::J(jal) = Instruction::decode(0xF99FF06F).unwrap() else {
            panic!("jal is J-type");
        };
        assert_eq!(sign_extend(0b111111111111110011000, 20), jal.imm);
        assert_eq!(-104, jal.imm);
        assert_eq!("jal", mnemonic(0xF99FF06F));
    }

    #[test]
    fn test_decode_s_type() {
        let Instruction::S(sb) = Instruction::decode(0x00a58023).unwrap() else {
            panic!("sb is S-type");
        };
        assert_eq!(x(11), sb.rs1);
        assert_eq!(x(10), sb.rs2);
        assert_eq!(0, sb.imm);
        assert_eq!("sb", mnemonic(0x00a58023));
    }

    #[test]
    fn test_decode_b_type() {
        let Instruction::B(bge) = Instruction::decode(0x06705063).unwrap() else {
            panic!("bge is B-type");
        };
        assert_eq!(x(0), bge.rs1);
        assert_eq!(x(7), bge.rs2);
        assert_eq!(0b0000001100000, bge.imm);
        assert_eq!("bge", mnemonic(0x06705063));
    }

    #[test]
    fn test_decode_u_type() {
        let Instruction::U(lui) = Instruction::decode(0x01643037).unwrap() else {
            panic!("lui is U-type");
        };
        assert_eq!(0b00000001011001000011, lui.imm >> 12);
        assert_eq!(0, lui.imm & 0xFFF);
        assert_eq!("lui", mnemonic(0x01643037));
        assert_eq!("auipc", mnemonic(0x00000297));
    }

    #[test]
    fn test_decode_fence() {
        let Instruction::Fence(fence) = Instruction::decode(0x0ff0000f).unwrap() else {
            panic!("fence has its own format");
        };
        assert_eq!(0xF, fence.predecessor.to_u4());
        assert_eq!(0xF, fence.successor.to_u4());
        assert!(fence.predecessor.device_input && fence.successor.memory_writes);
        assert_eq!("fence", mnemonic(0x0ff0000f));
        assert_eq!("fence.i", mnemonic(0x0000100f));
    }

    #[test]
    fn test_system_mnemonics() {
        assert_eq!("ecall", mnemonic(0x00000073));
        assert_eq!("ebreak", mnemonic(0x00100073));
        assert_eq!("sret", mnemonic(0x10200073));
        assert_eq!("mret", mnemonic(0x30200073));
        assert_eq!("wfi", mnemonic(0x10500073));
        assert_eq!("sfence.vma", mnemonic(0x12000073));
        assert_eq!("csrrwi", mnemonic(0x3402D073));
        assert_eq!("csrrci", mnemonic(0x30047073));
    }

    #[test]
    fn test_extension_mnemonics() {
        assert_eq!("mul", mnemonic(0x02B50533));
        assert_eq!("mulhsu", mnemonic(0x02B52533));
        assert_eq!("divu", mnemonic(0x02B55533));
        assert_eq!("remu", mnemonic(0x02B57533));
        assert_eq!("lr.w", mnemonic(0x1005A52F));
        assert_eq!("sc.w", mnemonic(0x18C5A52F));
        // amoadd.w.aqrl: the ordering bits don't change the operation
        assert_eq!("amoadd.w", mnemonic(0x06C5A52F));
        assert_eq!("amomaxu.w", mnemonic(0xE0C5A52F));
    }

    #[test]
    fn test_shift_immediates() {
        // slli a0, a0, 3
        assert_eq!("slli", mnemonic(0x00351513));
        // srai a0, a0, 31
        let raw = 0x41F55513;
        assert_eq!("srai", mnemonic(raw));
        let Instruction::I(srai) = Instruction::decode(raw).unwrap() else {
            panic!("srai is I-type");
        };
        assert_eq!(31, srai.shamt());
        // slli with imm[11:5] != 0 is reserved
        assert!(matches!(
            Instruction::decode(0x40351513).unwrap().operation(),
            Err(DecodeError::UnknownOperation { format: Format::I, .. })
        ));
    }

    #[test]
    fn test_unsupported_opcode() {
        assert_eq!(
            Err(DecodeError::UnsupportedOpcode {
                raw: 0x0000_0007,
                opcode: 0b0000111,
            }),
            Instruction::decode(0x0000_0007)
        );
        // Compressed instructions are not supported either
        assert!(Instruction::decode(0x0000_4501).is_err());
    }

    #[test]
    fn test_unknown_operation() {
        // OP with funct7 = 0b0000010
        let instruction = Instruction::decode(0x04B50533).unwrap();
        assert_eq!(
            Err(DecodeError::UnknownOperation {
                format: Format::R,
                opcode: opcode::OP,
                funct3: 0,
            }),
            instruction.operation()
        );
        // Branch with funct3 = 0b010
        assert!(Instruction::decode(0x00002063).unwrap().operation().is_err());
        // Store with funct3 = 0b011 (sd)
        assert!(Instruction::decode(0x00003023).unwrap().operation().is_err());
    }

    #[test]
    fn test_encode_round_trip() {
        let instructions = [
            Instruction::R(RType {
                opcode: opcode::AMO,
                rd: x(10),
                funct3: 0b010,
                rs1: x(11),
                rs2: x(12),
                funct7: 0b0000011,
            }),
            Instruction::I(IType {
                opcode: opcode::LOAD,
                rd: x(31),
                funct3: 0b100,
                rs1: x(2),
                imm: -2048,
            }),
            Instruction::S(SType {
                opcode: opcode::STORE,
                funct3: 0b010,
                rs1: x(2),
                rs2: x(1),
                imm: -33,
            }),
            Instruction::B(BType {
                opcode: opcode::BRANCH,
                funct3: 0b111,
                rs1: x(5),
                rs2: x(6),
                imm: -4096,
            }),
            Instruction::U(UType {
                opcode: opcode::AUIPC,
                rd: x(5),
                imm: 0xFFFF_F000,
            }),
            Instruction::J(JType {
                opcode: opcode::JAL,
                rd: x(1),
                imm: 1_048_574,
            }),
            Instruction::Fence(FenceType {
                opcode: opcode::MISC_MEM,
                rd: x(0),
                funct3: 0,
                rs1: x(0),
                fm: 0b1000,
                predecessor: FenceOrderCombination::from_u4(0b0011),
                successor: FenceOrderCombination::from_u4(0b0011),
            }),
        ];
        for instruction in instructions {
            assert_eq!(
                instruction,
                Instruction::decode(instruction.encode()).unwrap()
            );
        }
        for raw in [0x007403B3, 0xF99FF06F, 0x06705063, 0x00a58023, 0x0ff0000f] {
            assert_eq!(raw, Instruction::decode(raw).unwrap().encode());
        }
    }
}
