//! Provides the RV32IMA hart: its registers, CSR bank, execution engine and trap delivery.

pub mod control;
pub mod csr;
mod execute;
pub mod interrupts;
pub mod status;
pub mod trap;

use crate::bits::word_from_le_bytes;
use crate::bus::Bus;
use crate::instruction::{DecodeError, Instruction};
use crate::registers::Registers;
use crate::resources::clint::Timebase;
use crate::PrivilegeLevel;
use csr::CsrFile;
use log::{log_enabled, trace, Level};
use std::fmt;
use thiserror::Error;

/// Address execution starts at after reset, where the boot image is expected.
pub const DEFAULT_RESET_VECTOR: u32 = 0x8000_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address to which the core's PC register is reset.
    pub reset_vector: u32,
    /// What an `ecall` instruction does.
    pub ecall_mode: EcallMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reset_vector: DEFAULT_RESET_VECTOR,
            ecall_mode: EcallMode::default(),
        }
    }
}

/// Behaviour of the `ecall` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EcallMode {
    /// Treat `ecall` as the end of a self-test program. Register `a0` holds the verdict (`0` or
    /// `42` on success) and `gp` the number of the failing test.
    #[default]
    SelfTest,
    /// Treat `ecall` as a no-op.
    Ignore,
    /// Raise an environment-call exception, as the privileged architecture specifies.
    Trap,
}

/// Verdict reported by a self-test program through `ecall`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfTestOutcome {
    Passed,
    Failed { test_id: u32 },
}

impl fmt::Display for SelfTestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "Test Succeeded"),
            Self::Failed { test_id } => write!(f, "Ecall: testId: {test_id}, Failed"),
        }
    }
}

/// Conditions that stop the hart for good.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FatalError {
    /// An all-zero word was fetched, which usually means execution ran off the loaded image.
    #[error("empty instruction at pc {pc:#010x}")]
    EmptyInstruction { pc: u32 },
    #[error("cannot decode instruction at pc {pc:#010x}")]
    Decode {
        pc: u32,
        #[source]
        source: DecodeError,
    },
}

/// What happened during a single [`Core::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// The instruction executed or trapped, and execution can go on.
    Continue,
    /// A self-test program reported its verdict.
    SelfTestExit(SelfTestOutcome),
}

/// RISC-V core implementing the RV32IMA ISA with M, S and U modes.
///
/// As we don't support hardware multithreading, every core always only has a single hart.
/// We therefore don't model RISC-V harts explicitly, but rather consider [`Core`] to be the whole
/// of a core with a single hart.
///
/// > From the perspective of software running in a given execution environment, a hart is a
/// > resource that autonomously fetches and executes RISC-V instructions within that execution
/// > environment.
///
/// The core does not own its memory. Every operation that touches memory is handed the [`Bus`]
/// it should use.
#[derive(Debug, Clone)]
pub struct Core {
    config: Config,
    registers: Registers,
    csrs: CsrFile,
    privilege_level: PrivilegeLevel,
    /// Address reserved by the last `lr.w`, if any.
    reservation: Option<u32>,
}

impl Core {
    pub fn new(config: Config, timebase: Timebase) -> Self {
        Self {
            registers: Registers::new(config.reset_vector),
            csrs: CsrFile::new(timebase),
            privilege_level: PrivilegeLevel::Machine,
            reservation: None,
            config,
        }
    }

    /// Force this core to its reset state.
    pub fn reset(&mut self) {
        self.registers = Registers::new(self.config.reset_vector);
        self.csrs.reset();
        self.privilege_level = PrivilegeLevel::Machine;
        self.reservation = None;
    }

    /// Provide a read-only view of this core's configuration.
    ///
    /// It is not possible to modify the configuration after creation.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub fn csrs(&self) -> &CsrFile {
        &self.csrs
    }

    pub fn csrs_mut(&mut self) -> &mut CsrFile {
        &mut self.csrs
    }

    pub fn privilege_level(&self) -> PrivilegeLevel {
        self.privilege_level
    }

    pub fn set_privilege_level(&mut self, level: PrivilegeLevel) {
        self.privilege_level = level;
    }

    pub fn reservation(&self) -> Option<u32> {
        self.reservation
    }

    /// Fetch, decode and execute the instruction at the PC, delivering the trap it raises, if
    /// any.
    ///
    /// Interrupts are not sampled here, see [`Self::take_interrupt`].
    pub fn step<B: Bus>(&mut self, bus: &mut B) -> Result<StepResult, FatalError> {
        let pc = self.registers.pc();
        let raw_instruction = self.fetch_instruction(bus, pc);
        if raw_instruction == 0 {
            return Err(FatalError::EmptyInstruction { pc });
        }

        let decode_error = |source| FatalError::Decode { pc, source };
        let instruction = Instruction::decode(raw_instruction).map_err(decode_error)?;
        if log_enabled!(Level::Trace) {
            if let Ok(operation) = instruction.operation() {
                trace!("{pc:#010x}: {raw_instruction:08x} {operation}");
            }
        }
        let result = self
            .execute_instruction(bus, instruction)
            .map_err(decode_error)?;
        self.csrs.retire();

        match result {
            ExecutionResult::Ok => Ok(StepResult::Continue),
            ExecutionResult::Exception(exception) => {
                self.trap(exception.into());
                Ok(StepResult::Continue)
            }
            ExecutionResult::SelfTestExit(outcome) => Ok(StepResult::SelfTestExit(outcome)),
        }
    }

    /// Deliver the highest-priority interrupt that is pending and enabled, if any, and return it.
    pub fn take_interrupt(&mut self) -> Option<Interrupt> {
        let interrupt = self.csrs.interrupts.pending_interrupt(
            self.privilege_level,
            &self.csrs.mstatus,
            &self.csrs.delegation,
        )?;
        self.trap(interrupt.into());
        Some(interrupt)
    }

    /// Instructions are stored as little-endian words. Any address is accepted.
    fn fetch_instruction<B: Bus>(&self, bus: &mut B, address: u32) -> u32 {
        let mut buf = [0; 4];
        bus.read(&mut buf, address);
        word_from_le_bytes(buf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionResult {
    /// Execution went normal
    #[default]
    Ok,
    /// Execution triggered an exception
    Exception(Exception),
    /// A self-test program reported its verdict through `ecall`
    SelfTestExit(SelfTestOutcome),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Exception {
    /// Instruction address is not on a four-byte aligned boundary in memory.
    InstructionAddressMisaligned,
    InstructionAccessFault,
    /// Generic exception used to communicate one of many possible scenarios:
    ///
    /// - Attempt to access a non-existent CSR.
    /// - Attempt to access a CSR without the appropriate privilege level.
    /// - Attempt to write to a read-only CSR.
    /// - Attempt to execute a trap return from a mode that may not.
    IllegalInstruction,
    Breakpoint,
    LoadAddressMisaligned,
    LoadAccessFault,
    StoreOrAmoAddressMisaligned,
    StoreOrAmoAccessFault,
    EnvironmentCallFromUMode,
    EnvironmentCallFromSMode,
    EnvironmentCallFromMMode,
    InstructionPageFault,
    LoadPageFault,
    StoreOrAmoPageFault,
}

impl Exception {
    /// Returns the exception code (cause) for this exception.
    pub const fn code(&self) -> u32 {
        match self {
            Self::InstructionAddressMisaligned => 0,
            Self::InstructionAccessFault => 1,
            Self::IllegalInstruction => 2,
            Self::Breakpoint => 3,
            Self::LoadAddressMisaligned => 4,
            Self::LoadAccessFault => 5,
            Self::StoreOrAmoAddressMisaligned => 6,
            Self::StoreOrAmoAccessFault => 7,
            Self::EnvironmentCallFromUMode => 8,
            Self::EnvironmentCallFromSMode => 9,
            Self::EnvironmentCallFromMMode => 11,
            Self::InstructionPageFault => 12,
            Self::LoadPageFault => 13,
            Self::StoreOrAmoPageFault => 15,
        }
    }

    /// The environment-call exception raised by an `ecall` executed at `level`.
    pub fn environment_call_from(level: PrivilegeLevel) -> Self {
        match level {
            PrivilegeLevel::User => Self::EnvironmentCallFromUMode,
            PrivilegeLevel::Supervisor => Self::EnvironmentCallFromSMode,
            PrivilegeLevel::Machine => Self::EnvironmentCallFromMMode,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Interrupt {
    SupervisorSoftwareInterrupt,
    MachineSoftwareInterrupt,
    SupervisorTimerInterrupt,
    MachineTimerInterrupt,
    SupervisorExternalInterrupt,
    MachineExternalInterrupt,
}

impl Interrupt {
    /// Returns the exception code (cause) for this interrupt.
    pub const fn code(&self) -> u32 {
        match self {
            Self::SupervisorSoftwareInterrupt => 1,
            Self::MachineSoftwareInterrupt => 3,
            Self::SupervisorTimerInterrupt => 5,
            Self::MachineTimerInterrupt => 7,
            Self::SupervisorExternalInterrupt => 9,
            Self::MachineExternalInterrupt => 11,
        }
    }
}
