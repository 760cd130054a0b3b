use log::{debug, info};

use super::csr::CsrSpecifier;
use super::{Core, EcallMode, Exception, ExecutionResult, SelfTestOutcome};
use crate::bus::Bus;
use crate::instruction::{
    BranchOp, DecodeError, FenceOp, ImmOp, Instruction, JumpOp, RegOp, StoreOp, UpperOp,
};
use crate::registers::{Registers, Specifier};
use crate::PrivilegeLevel;

/// Values of `a0` with which a self-test program reports success.
const SELF_TEST_PASS_VALUES: [u32; 2] = [0, 42];

impl Core {
    /// Execute a single instruction on this core.
    ///
    /// This only takes care of the instruction-specific operations, such as updating `x`
    /// registers, updating memory, updating the `pc` register, and depending on the instruction
    /// also updating CSRs. Exceptions are returned, not delivered, and no counters are updated.
    /// See [`Core::step`] for that.
    ///
    /// Fails if the funct fields of `instruction` do not name a supported operation.
    pub fn execute_instruction<B: Bus>(
        &mut self,
        bus: &mut B,
        instruction: Instruction,
    ) -> Result<ExecutionResult, DecodeError> {
        let mut executor = Executor { core: self, bus };
        let result = match instruction {
            Instruction::R(r) => {
                let op = match r.operation()? {
                    RegOp::Add => Executor::add,
                    RegOp::Sub => Executor::sub,
                    RegOp::Sll => Executor::sll,
                    RegOp::Slt => Executor::slt,
                    RegOp::Sltu => Executor::sltu,
                    RegOp::Xor => Executor::xor,
                    RegOp::Srl => Executor::srl,
                    RegOp::Sra => Executor::sra,
                    RegOp::Or => Executor::or,
                    RegOp::And => Executor::and,
                    RegOp::Mul => Executor::mul,
                    RegOp::Mulh => Executor::mulh,
                    RegOp::Mulhsu => Executor::mulhsu,
                    RegOp::Mulhu => Executor::mulhu,
                    RegOp::Div => Executor::div,
                    RegOp::Divu => Executor::divu,
                    RegOp::Rem => Executor::rem,
                    RegOp::Remu => Executor::remu,
                    RegOp::LrW => Executor::lr_w,
                    RegOp::ScW => Executor::sc_w,
                    RegOp::AmoswapW => Executor::amoswap_w,
                    RegOp::AmoaddW => Executor::amoadd_w,
                    RegOp::AmoxorW => Executor::amoxor_w,
                    RegOp::AmoandW => Executor::amoand_w,
                    RegOp::AmoorW => Executor::amoor_w,
                    RegOp::AmominW => Executor::amomin_w,
                    RegOp::AmomaxW => Executor::amomax_w,
                    RegOp::AmominuW => Executor::amominu_w,
                    RegOp::AmomaxuW => Executor::amomaxu_w,
                };
                op(&mut executor, r.rd, r.rs1, r.rs2)
            }
            Instruction::I(i) => match i.operation()? {
                op @ (ImmOp::Addi
                | ImmOp::Slti
                | ImmOp::Sltiu
                | ImmOp::Xori
                | ImmOp::Ori
                | ImmOp::Andi
                | ImmOp::Lb
                | ImmOp::Lh
                | ImmOp::Lw
                | ImmOp::Lbu
                | ImmOp::Lhu
                | ImmOp::Jalr) => {
                    let op = match op {
                        ImmOp::Addi => Executor::addi,
                        ImmOp::Slti => Executor::slti,
                        ImmOp::Sltiu => Executor::sltiu,
                        ImmOp::Xori => Executor::xori,
                        ImmOp::Ori => Executor::ori,
                        ImmOp::Andi => Executor::andi,
                        ImmOp::Lb => Executor::lb,
                        ImmOp::Lh => Executor::lh,
                        ImmOp::Lw => Executor::lw,
                        ImmOp::Lbu => Executor::lbu,
                        ImmOp::Lhu => Executor::lhu,
                        _ => Executor::jalr,
                    };
                    op(&mut executor, i.rd, i.rs1, i.imm)
                }
                op @ (ImmOp::Slli | ImmOp::Srli | ImmOp::Srai) => {
                    let op = match op {
                        ImmOp::Slli => Executor::slli,
                        ImmOp::Srli => Executor::srli,
                        _ => Executor::srai,
                    };
                    op(&mut executor, i.rd, i.rs1, i.shamt())
                }
                op @ (ImmOp::Csrrw | ImmOp::Csrrs | ImmOp::Csrrc) => {
                    let op = match op {
                        ImmOp::Csrrw => Executor::csrrw,
                        ImmOp::Csrrs => Executor::csrrs,
                        _ => Executor::csrrc,
                    };
                    op(&mut executor, i.rd, i.rs1, i.csr())
                }
                op @ (ImmOp::Csrrwi | ImmOp::Csrrsi | ImmOp::Csrrci) => {
                    let op = match op {
                        ImmOp::Csrrwi => Executor::csrrwi,
                        ImmOp::Csrrsi => Executor::csrrsi,
                        _ => Executor::csrrci,
                    };
                    op(&mut executor, i.rd, i.uimm(), i.csr())
                }
                ImmOp::Ecall => executor.ecall(),
                ImmOp::Ebreak => executor.ebreak(),
                ImmOp::Sret => executor.sret(),
                ImmOp::Mret => executor.mret(),
                ImmOp::Wfi => executor.wfi(),
                ImmOp::SfenceVma => executor.sfence_vma(),
            },
            Instruction::S(s) => {
                let op = match s.operation()? {
                    StoreOp::Sb => Executor::sb,
                    StoreOp::Sh => Executor::sh,
                    StoreOp::Sw => Executor::sw,
                };
                op(&mut executor, s.rs2, s.rs1, s.imm)
            }
            Instruction::B(b) => {
                let op = match b.operation()? {
                    BranchOp::Beq => Executor::beq,
                    BranchOp::Bne => Executor::bne,
                    BranchOp::Blt => Executor::blt,
                    BranchOp::Bge => Executor::bge,
                    BranchOp::Bltu => Executor::bltu,
                    BranchOp::Bgeu => Executor::bgeu,
                };
                op(&mut executor, b.rs1, b.rs2, b.imm)
            }
            Instruction::U(u) => {
                let op = match u.operation()? {
                    UpperOp::Lui => Executor::lui,
                    UpperOp::Auipc => Executor::auipc,
                };
                op(&mut executor, u.rd, u.imm)
            }
            Instruction::J(j) => match j.operation()? {
                JumpOp::Jal => executor.jal(j.rd, j.imm),
            },
            Instruction::Fence(fence) => match fence.operation()? {
                FenceOp::Fence => executor.fence(),
                FenceOp::FenceI => executor.fence_i(),
            },
        };
        Ok(result)
    }
}

#[derive(Debug)]
pub(super) struct Executor<'a, B: Bus> {
    pub core: &'a mut Core,
    pub bus: &'a mut B,
}

impl<'a, B: Bus> Executor<'a, B> {
    /// Executes an `addi` instruction.
    ///
    /// Corresponds to the assembly instruction `addi dest src immediate`.
    ///
    /// > ADDI adds the sign-extended 12-bit immediate to register rs1. Arithmetic overflow is
    /// > ignored and the result is simply the low XLEN bits of the result. ADDI rd, rs1, 0 is used
    /// > to implement the MV rd, rs1 assembler pseudoinstruction.
    pub fn addi(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, u32::wrapping_add_signed)
    }

    /// Executes a `slti` instruction.
    ///
    /// Corresponds to the assembly instruction `slti dest src immediate`.
    ///
    /// > SLTI (set less than immediate) places the value 1 in register rd if register rs1 is less
    /// > than the sign-extended immediate when both are treated as signed numbers, else 0 is
    /// > written to rd.
    pub fn slti(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| ((s as i32) < imm) as u32)
    }

    /// Executes a `sltiu` instruction.
    ///
    /// Corresponds to the assembly instruction `sltiu dest src immediate`.
    ///
    /// > SLTIU is similar but compares the values as unsigned numbers (i.e., the immediate is first
    /// > sign-extended to XLEN bits then treated as an unsigned number). Note, SLTIU rd, rs1, 1
    /// > sets rd to 1 if rs1 equals zero, otherwise sets rd to 0 (assembler pseudoinstruction SEQZ
    /// > rd, rs).
    pub fn sltiu(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| (s < imm as u32) as u32)
    }

    /// Executes an `andi` instruction.
    ///
    /// > ANDI, ORI, XORI are logical operations that perform bitwise AND, OR, and XOR on register
    /// > rs1 and the sign-extended 12-bit immediate and place the result in rd.
    pub fn andi(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| s & imm as u32)
    }

    /// Executes an `ori` instruction.
    ///
    /// > ANDI, ORI, XORI are logical operations that perform bitwise AND, OR, and XOR on register
    /// > rs1 and the sign-extended 12-bit immediate and place the result in rd.
    pub fn ori(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| s | imm as u32)
    }

    /// Executes a `xori` instruction.
    ///
    /// > Note, XORI rd, rs1, -1 performs a bitwise logical inversion of register rs1 (assembler
    /// > pseudoinstruction NOT rd, rs).
    pub fn xori(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| s ^ imm as u32)
    }

    /// Executes a `slli` instruction.
    ///
    /// > SLLI is a logical left shift (zeros are shifted into the lower bits).
    pub fn slli(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    ) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| s << shamt)
    }

    /// Executes a `srli` instruction.
    ///
    /// > SRLI is a logical right shift (zeros are shifted into the upper bits).
    pub fn srli(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    ) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| s >> shamt)
    }

    /// Executes a `srai` instruction.
    ///
    /// > SRAI is an arithmetic right shift (the original sign bit is copied into the vacated upper
    /// > bits).
    pub fn srai(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    ) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| {
            ((s as i32) >> shamt) as u32
        })
    }

    /// Executes a `lui` instruction.
    ///
    /// > LUI places the U-immediate value in the top 20 bits of the destination register rd,
    /// > filling in the lowest 12 bits with zeros.
    ///
    /// Note that the bottom 12 bits of `immediate` need not be zero, they will always be discarded.
    pub fn lui(&mut self, dest: Specifier, immediate: u32) -> ExecutionResult {
        let registers = &mut self.core.registers;
        registers.set_x(dest, immediate & 0xFFFF_F000);
        registers.advance_pc();
        ExecutionResult::Ok
    }

    /// Executes an `auipc` instruction.
    ///
    /// > AUIPC forms a 32-bit offset from the 20-bit U-immediate, filling in the lowest 12 bits
    /// > with zeros, adds this offset to the address of the AUIPC instruction, then places the
    /// > result in register rd.
    pub fn auipc(&mut self, dest: Specifier, immediate: u32) -> ExecutionResult {
        let registers = &mut self.core.registers;
        let value = registers.pc().wrapping_add(immediate & 0xFFFF_F000);
        registers.set_x(dest, value);
        registers.advance_pc();
        ExecutionResult::Ok
    }

    /// Executes an `add` instruction.
    ///
    /// > ADD performs the addition of rs1 and rs2.
    pub fn add(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, u32::wrapping_add)
    }

    /// Executes a `sub` instruction.
    ///
    /// > SUB performs the subtraction of rs2 from rs1.
    pub fn sub(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, u32::wrapping_sub)
    }

    /// Executes a `slt` instruction.
    ///
    /// > SLT and SLTU perform signed and unsigned compares respectively, writing 1 to rd if
    /// > rs1 < rs2, 0 otherwise.
    pub fn slt(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| ((s1 as i32) < (s2 as i32)) as u32)
    }

    /// Executes a `sltu` instruction.
    ///
    /// > Note, SLTU rd, x0, rs2 sets rd to 1 if rs2 is not equal to zero, otherwise sets rd to
    /// > zero (assembler pseudoinstruction SNEZ rd, rs).
    pub fn sltu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| (s1 < s2) as u32)
    }

    /// Executes an `and` instruction.
    ///
    /// > AND, OR, and XOR perform bitwise logical operations.
    pub fn and(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 & s2)
    }

    /// Executes an `or` instruction.
    pub fn or(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 | s2)
    }

    /// Executes an `xor` instruction.
    pub fn xor(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 ^ s2)
    }

    /// Executes a `sll` instruction.
    ///
    /// > SLL, SRL, and SRA perform logical left, logical right, and arithmetic right shifts on the
    /// > value in register rs1 by the shift amount held in the lower 5 bits of register rs2.
    pub fn sll(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 << (s2 & 0x1F))
    }

    /// Executes a `srl` instruction.
    pub fn srl(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 >> (s2 & 0x1F))
    }

    /// Executes a `sra` instruction.
    pub fn sra(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i32) >> (s2 & 0x1F)) as u32
        })
    }

    /// Executes a `mul` instruction.
    ///
    /// > MUL performs an XLEN-bit×XLEN-bit multiplication of rs1 by rs2 and places the lower XLEN
    /// > bits in the destination register.
    pub fn mul(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, u32::wrapping_mul)
    }

    /// Executes a `mulh` instruction.
    ///
    /// > MULH, MULHU, and MULHSU perform the same multiplication but return the upper XLEN bits of
    /// > the full 2×XLEN-bit product, for signed×signed, unsigned×unsigned, and
    /// > signed rs1×unsigned rs2 multiplication, respectively.
    pub fn mulh(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i32 as i64 * s2 as i32 as i64) >> 32) as u32
        })
    }

    /// Executes a `mulhsu` instruction.
    pub fn mulhsu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i32 as i64 * s2 as i64) >> 32) as u32
        })
    }

    /// Executes a `mulhu` instruction.
    pub fn mulhu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as u64 * s2 as u64) >> 32) as u32
        })
    }

    /// Executes a `div` instruction.
    ///
    /// > The quotient of division by zero has all bits set [...]. Signed division overflow occurs
    /// > only when the most-negative integer is divided by −1. The quotient of a signed division
    /// > with overflow is equal to the dividend.
    pub fn div(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| match s2 {
            0 => u32::MAX,
            _ => (s1 as i32).wrapping_div(s2 as i32) as u32,
        })
    }

    /// Executes a `divu` instruction.
    pub fn divu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.checked_div(s2).unwrap_or(u32::MAX))
    }

    /// Executes a `rem` instruction.
    ///
    /// > The remainder of division by zero equals the dividend. [...] the remainder is zero for
    /// > signed division overflow.
    pub fn rem(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| match s2 {
            0 => s1,
            _ => (s1 as i32).wrapping_rem(s2 as i32) as u32,
        })
    }

    /// Executes a `remu` instruction.
    pub fn remu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.checked_rem(s2).unwrap_or(s1))
    }

    /// Executes a `jal` instruction.
    ///
    /// > The jump and link (JAL) instruction [...] The offset is sign-extended and added to the
    /// > address of the jump instruction to form the jump target address. JAL stores the address
    /// > of the instruction following the jump ('pc'+4) into register rd.
    pub fn jal(&mut self, dest: Specifier, offset: i32) -> ExecutionResult {
        self.jump_op(dest, |registers| registers.pc().wrapping_add_signed(offset))
    }

    /// Executes a `jalr` instruction.
    ///
    /// The target is `base + offset` as is, the least-significant bit is kept. `base` is read
    /// before `dest` is written, so `jalr ra, 0(ra)` jumps to the old value of `ra`.
    pub fn jalr(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.jump_op(dest, |registers| registers.x(base).wrapping_add_signed(offset))
    }

    pub fn beq(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| s1 == s2)
    }

    pub fn bne(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| s1 != s2)
    }

    pub fn blt(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| (s1 as i32) < (s2 as i32))
    }

    pub fn bltu(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| s1 < s2)
    }

    pub fn bge(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| (s1 as i32) >= (s2 as i32))
    }

    pub fn bgeu(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| s1 >= s2)
    }

    pub fn lb(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |this, address| {
            i8::from_le_bytes(this.read(address)) as u32
        })
    }

    pub fn lbu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |this, address| {
            u8::from_le_bytes(this.read(address)) as u32
        })
    }

    pub fn lh(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |this, address| {
            i16::from_le_bytes(this.read(address)) as u32
        })
    }

    pub fn lhu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |this, address| {
            u16::from_le_bytes(this.read(address)) as u32
        })
    }

    pub fn lw(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |this, address| {
            u32::from_le_bytes(this.read(address))
        })
    }

    pub fn sb(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.store_op(src, base, offset, |this, address, value| {
            this.bus.write(address, &(value as u8).to_le_bytes())
        })
    }

    pub fn sh(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.store_op(src, base, offset, |this, address, value| {
            this.bus.write(address, &(value as u16).to_le_bytes())
        })
    }

    pub fn sw(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.store_op(src, base, offset, |this, address, value| {
            this.bus.write(address, &value.to_le_bytes())
        })
    }

    /// Executes a `lr.w` instruction.
    ///
    /// > LR.W loads a word from the address in rs1, places the sign-extended value in rd, and
    /// > registers a reservation set.
    ///
    /// A previous reservation is replaced, only one can be outstanding.
    pub fn lr_w(&mut self, dest: Specifier, addr: Specifier, _src: Specifier) -> ExecutionResult {
        let address = self.core.registers.x(addr);
        let value = u32::from_le_bytes(self.read(address));
        self.core.reservation = Some(address);
        let registers = &mut self.core.registers;
        registers.set_x(dest, value);
        registers.advance_pc();
        ExecutionResult::Ok
    }

    /// Executes a `sc.w` instruction.
    ///
    /// > SC.W conditionally writes a word in rs2 to the address in rs1: the SC.W succeeds only if
    /// > the reservation is still valid and the reservation set contains the bytes being written.
    /// > If the SC.W succeeds, the instruction writes the word in rs2 to memory, and it writes zero
    /// > to rd. If the SC.W fails, the instruction does not write to memory, and it writes a
    /// > nonzero value to rd. Regardless of success or failure, executing an SC.W instruction
    /// > invalidates any reservation held by this hart.
    pub fn sc_w(&mut self, dest: Specifier, addr: Specifier, src: Specifier) -> ExecutionResult {
        let address = self.core.registers.x(addr);
        let success = self.core.reservation.take() == Some(address);
        if success {
            let value = self.core.registers.x(src);
            self.bus.write(address, &value.to_le_bytes());
        }
        let registers = &mut self.core.registers;
        registers.set_x(dest, u32::from(!success));
        registers.advance_pc();
        ExecutionResult::Ok
    }

    pub fn amoswap_w(
        &mut self,
        dest: Specifier,
        addr: Specifier,
        src: Specifier,
    ) -> ExecutionResult {
        self.amo_op(dest, addr, src, |_, s| s)
    }

    pub fn amoadd_w(
        &mut self,
        dest: Specifier,
        addr: Specifier,
        src: Specifier,
    ) -> ExecutionResult {
        self.amo_op(dest, addr, src, u32::wrapping_add)
    }

    pub fn amoxor_w(
        &mut self,
        dest: Specifier,
        addr: Specifier,
        src: Specifier,
    ) -> ExecutionResult {
        self.amo_op(dest, addr, src, |m, s| m ^ s)
    }

    pub fn amoand_w(
        &mut self,
        dest: Specifier,
        addr: Specifier,
        src: Specifier,
    ) -> ExecutionResult {
        self.amo_op(dest, addr, src, |m, s| m & s)
    }

    pub fn amoor_w(&mut self, dest: Specifier, addr: Specifier, src: Specifier) -> ExecutionResult {
        self.amo_op(dest, addr, src, |m, s| m | s)
    }

    pub fn amomin_w(
        &mut self,
        dest: Specifier,
        addr: Specifier,
        src: Specifier,
    ) -> ExecutionResult {
        self.amo_op(dest, addr, src, |m, s| (m as i32).min(s as i32) as u32)
    }

    pub fn amomax_w(
        &mut self,
        dest: Specifier,
        addr: Specifier,
        src: Specifier,
    ) -> ExecutionResult {
        self.amo_op(dest, addr, src, |m, s| (m as i32).max(s as i32) as u32)
    }

    pub fn amominu_w(
        &mut self,
        dest: Specifier,
        addr: Specifier,
        src: Specifier,
    ) -> ExecutionResult {
        self.amo_op(dest, addr, src, u32::min)
    }

    pub fn amomaxu_w(
        &mut self,
        dest: Specifier,
        addr: Specifier,
        src: Specifier,
    ) -> ExecutionResult {
        self.amo_op(dest, addr, src, u32::max)
    }

    /// Executes a `csrrw` instruction.
    ///
    /// > The CSRRW (Atomic Read/Write CSR) instruction atomically swaps values in the CSRs and
    /// > integer registers. CSRRW reads the old value of the CSR, zero-extends the value to XLEN
    /// > bits, then writes it to integer register rd. The initial value in rs1 is written to the
    /// > CSR.
    pub fn csrrw(&mut self, dest: Specifier, src: Specifier, csr: CsrSpecifier) -> ExecutionResult {
        let value = self.core.registers.x(src);
        self.csr_op(dest, csr, Some((value, u32::MAX)))
    }

    /// Executes a `csrrs` instruction.
    ///
    /// > The initial value in integer register rs1 is treated as a bit mask that specifies bit
    /// > positions to be set in the CSR. [...] If rs1=x0, then the instruction will not write to
    /// > the CSR at all, and so shall not cause any of the side effects that might otherwise occur
    /// > on a CSR write, nor raise illegal instruction exceptions on accesses to read-only CSRs.
    pub fn csrrs(&mut self, dest: Specifier, src: Specifier, csr: CsrSpecifier) -> ExecutionResult {
        let mask = self.core.registers.x(src);
        let write = (src != Specifier::X0).then_some((u32::MAX, mask));
        self.csr_op(dest, csr, write)
    }

    /// Executes a `csrrc` instruction.
    pub fn csrrc(&mut self, dest: Specifier, src: Specifier, csr: CsrSpecifier) -> ExecutionResult {
        let mask = self.core.registers.x(src);
        let write = (src != Specifier::X0).then_some((0, mask));
        self.csr_op(dest, csr, write)
    }

    /// Executes a `csrrwi` instruction.
    pub fn csrrwi(
        &mut self,
        dest: Specifier,
        immediate: u32,
        csr: CsrSpecifier,
    ) -> ExecutionResult {
        self.csr_op(dest, csr, Some((immediate, u32::MAX)))
    }

    /// Executes a `csrrsi` instruction.
    ///
    /// > For both CSRRSI and CSRRCI, if the uimm field is zero, then these instructions will not
    /// > write to the CSR.
    pub fn csrrsi(
        &mut self,
        dest: Specifier,
        immediate: u32,
        csr: CsrSpecifier,
    ) -> ExecutionResult {
        let write = (immediate != 0).then_some((u32::MAX, immediate));
        self.csr_op(dest, csr, write)
    }

    /// Executes a `csrrci` instruction.
    pub fn csrrci(
        &mut self,
        dest: Specifier,
        immediate: u32,
        csr: CsrSpecifier,
    ) -> ExecutionResult {
        let write = (immediate != 0).then_some((0, immediate));
        self.csr_op(dest, csr, write)
    }

    /// Executes an `ecall` instruction, as configured by [`EcallMode`].
    pub fn ecall(&mut self) -> ExecutionResult {
        match self.core.config.ecall_mode {
            EcallMode::SelfTest => {
                let registers = &self.core.registers;
                let outcome = match registers.x(Specifier::A0) {
                    a0 if SELF_TEST_PASS_VALUES.contains(&a0) => SelfTestOutcome::Passed,
                    _ => SelfTestOutcome::Failed {
                        test_id: registers.x(Specifier::GP),
                    },
                };
                info!("self-test ecall at {:#010x}: {outcome}", registers.pc());
                ExecutionResult::SelfTestExit(outcome)
            }
            EcallMode::Ignore => {
                self.core.registers.advance_pc();
                ExecutionResult::Ok
            }
            EcallMode::Trap => ExecutionResult::Exception(Exception::environment_call_from(
                self.core.privilege_level,
            )),
        }
    }

    /// Executes an `ebreak` instruction.
    ///
    /// There is no debugger to return control to, so this only logs and moves on.
    pub fn ebreak(&mut self) -> ExecutionResult {
        debug!("ebreak at {:#010x}", self.core.registers.pc());
        self.core.registers.advance_pc();
        ExecutionResult::Ok
    }

    /// Executes an `mret` instruction.
    ///
    /// > An MRET or SRET instruction is used to return from a trap in M-mode or S-mode
    /// > respectively. When executing an xRET instruction, supposing xPP holds the value y, xIE is
    /// > set to xPIE; the privilege mode is changed to y; xPIE is set to 1; and xPP is set to the
    /// > least-privileged supported mode (U if U-mode is implemented, else M). If y≠M, xRET also
    /// > sets MPRV=0.
    pub fn mret(&mut self) -> ExecutionResult {
        if self.core.privilege_level != PrivilegeLevel::Machine {
            return ExecutionResult::Exception(Exception::IllegalInstruction);
        }
        let mstatus = &mut self.core.csrs.mstatus;
        let target = mstatus.mpp_level();
        mstatus.mie = mstatus.mpie;
        mstatus.mpie = true;
        mstatus.set_mpp_level(PrivilegeLevel::User);
        if target != PrivilegeLevel::Machine {
            mstatus.mprv = false;
        }
        self.trap_return(PrivilegeLevel::Machine, target)
    }

    /// Executes an `sret` instruction.
    ///
    /// > When TSR=1, attempts to execute SRET while executing in S-mode will raise an illegal
    /// > instruction exception.
    pub fn sret(&mut self) -> ExecutionResult {
        let level = self.core.privilege_level;
        let mstatus = &mut self.core.csrs.mstatus;
        if level == PrivilegeLevel::User || (level == PrivilegeLevel::Supervisor && mstatus.tsr) {
            return ExecutionResult::Exception(Exception::IllegalInstruction);
        }
        let target = mstatus.spp_level();
        mstatus.sie = mstatus.spie;
        mstatus.spie = true;
        mstatus.set_spp_level(PrivilegeLevel::User);
        mstatus.mprv = false;
        self.trap_return(PrivilegeLevel::Supervisor, target)
    }

    /// Executes a `wfi` instruction.
    ///
    /// The PC only advances once an interrupt is pending, so the hart keeps executing this `wfi`
    /// until one arrives. Whether it is enabled does not matter.
    ///
    /// > When TW=1, then if WFI is executed in any less-privileged mode, and it does not complete
    /// > within an implementation-specific, bounded time limit, the WFI instruction causes an
    /// > illegal instruction exception.
    pub fn wfi(&mut self) -> ExecutionResult {
        let csrs = &self.core.csrs;
        if csrs.mstatus.tw && self.core.privilege_level != PrivilegeLevel::Machine {
            return ExecutionResult::Exception(Exception::IllegalInstruction);
        }
        if csrs.interrupts.read_mip() != 0 {
            self.core.registers.advance_pc();
        }
        ExecutionResult::Ok
    }

    /// There is no address translation, so there are no cached translations to flush either.
    pub fn sfence_vma(&mut self) -> ExecutionResult {
        self.nop()
    }

    /// Memory accesses complete in program order on this single hart.
    pub fn fence(&mut self) -> ExecutionResult {
        self.nop()
    }

    /// Instruction fetches always see the latest stores.
    pub fn fence_i(&mut self) -> ExecutionResult {
        self.nop()
    }

    fn nop(&mut self) -> ExecutionResult {
        self.core.registers.advance_pc();
        ExecutionResult::Ok
    }

    fn read<const N: usize>(&mut self, address: u32) -> [u8; N] {
        let mut buf = [0; N];
        self.bus.read(&mut buf, address);
        buf
    }

    /// Jumps to the epc of the `from` level and switches to `target`.
    fn trap_return(&mut self, from: PrivilegeLevel, target: PrivilegeLevel) -> ExecutionResult {
        let epc = self.core.csrs.epc(from);
        self.core.registers.set_pc(epc);
        self.core.privilege_level = target;
        debug!("trap return from {from} to {target} at {epc:#010x}");
        ExecutionResult::Ok
    }

    #[inline]
    fn reg_imm_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, i32) -> u32,
    {
        let registers = &mut self.core.registers;
        registers.set_x(dest, op(registers.x(src), immediate));
        registers.advance_pc();
        ExecutionResult::Ok
    }

    #[inline]
    fn reg_shamt_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let registers = &mut self.core.registers;
        registers.set_x(dest, op(registers.x(src), shift_amount_u5 & 0x1F));
        registers.advance_pc();
        ExecutionResult::Ok
    }

    #[inline]
    fn reg_reg_op<F>(
        &mut self,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let registers = &mut self.core.registers;
        registers.set_x(dest, op(registers.x(src1), registers.x(src2)));
        registers.advance_pc();
        ExecutionResult::Ok
    }

    fn jump_op<F>(&mut self, dest: Specifier, compute_target: F) -> ExecutionResult
    where
        F: FnOnce(&Registers) -> u32,
    {
        let registers = &mut self.core.registers;
        // Compute the target before `dest` is overwritten, it may be the base register
        let new_pc = compute_target(registers);
        let old_pc = registers.pc();
        registers.set_pc(new_pc);
        registers.set_x(dest, old_pc.wrapping_add(4));
        ExecutionResult::Ok
    }

    // Takes the branch if `predicate` returns `true`.
    fn cond_branch<P>(
        &mut self,
        src1: Specifier,
        src2: Specifier,
        offset: i32,
        predicate: P,
    ) -> ExecutionResult
    where
        P: FnOnce(u32, u32) -> bool,
    {
        let registers = &mut self.core.registers;
        if predicate(registers.x(src1), registers.x(src2)) {
            let new_pc = registers.pc().wrapping_add_signed(offset);
            registers.set_pc(new_pc);
        } else {
            registers.advance_pc();
        }
        ExecutionResult::Ok
    }

    #[inline]
    fn load_op<F>(
        &mut self,
        dest: Specifier,
        base: Specifier,
        offset: i32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(&mut Self, u32) -> u32,
    {
        let address = self.core.registers.x(base).wrapping_add_signed(offset);
        let value = op(self, address);
        let registers = &mut self.core.registers;
        registers.set_x(dest, value);
        registers.advance_pc();
        ExecutionResult::Ok
    }

    #[inline]
    fn store_op<F>(
        &mut self,
        src: Specifier,
        base: Specifier,
        offset: i32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(&mut Self, u32, u32),
    {
        let registers = &self.core.registers;
        let value = registers.x(src);
        let address = registers.x(base).wrapping_add_signed(offset);
        op(self, address, value);
        self.core.registers.advance_pc();
        ExecutionResult::Ok
    }

    fn amo_op<F>(
        &mut self,
        dest: Specifier,
        addr: Specifier,
        src: Specifier,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let registers = &self.core.registers;
        let address = registers.x(addr);
        let src_value = registers.x(src);
        let old_value = u32::from_le_bytes(self.read(address));
        self.bus
            .write(address, &op(old_value, src_value).to_le_bytes());
        let registers = &mut self.core.registers;
        registers.set_x(dest, old_value);
        registers.advance_pc();
        ExecutionResult::Ok
    }

    /// Reads `csr` into `dest`, then applies `write` as a `(value, mask)` pair, if any.
    ///
    /// Neither `dest` nor the CSR are modified if either access is not allowed.
    fn csr_op(
        &mut self,
        dest: Specifier,
        csr: CsrSpecifier,
        write: Option<(u32, u32)>,
    ) -> ExecutionResult {
        let level = self.core.privilege_level;
        let csrs = &mut self.core.csrs;
        let old_value = match csrs.read(csr, level) {
            Ok(value) => value,
            Err(exception) => return ExecutionResult::Exception(exception),
        };
        if let Some((value, mask)) = write {
            if let Err(exception) = csrs.write_masked(csr, value, mask, level) {
                return ExecutionResult::Exception(exception);
            }
        }
        let registers = &mut self.core.registers;
        registers.set_x(dest, old_value);
        registers.advance_pc();
        ExecutionResult::Ok
    }
}
