//! Uniform fault reporting.
//!
//! Grounded on `examples/bolt-os-bolt/sys/kernel/arch/riscv/src/trap.rs`'s `EXCEPTIONS`
//! table: a flat, named list of causes a debugger can print without special-casing.
//! Unlike the teacher (which reports host hardware traps), every variant here
//! describes a condition raised entirely in software against guest state.

use thiserror::Error;

/// Why a memory access was denied.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Access {
    Read,
    Write,
    Execute,
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Access::Read => "read",
            Access::Write => "write",
            Access::Execute => "execute",
        };
        f.write_str(s)
    }
}

/// A guest-visible fault. Addresses are carried as plain `u64`: every width this
/// engine supports (RV32, RV64) fits losslessly, and a width-generic `Fault` would
/// otherwise have to thread `W` through every error site for no benefit.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Error)]
pub enum Fault {
    #[error("protection fault: {access} of {addr:#x} at pc={pc:#x}")]
    ProtectionFault {
        addr: u64,
        pc: u64,
        access: Access,
    },

    #[error("missing page: access to {addr:#x} at pc={pc:#x}")]
    MissingPage { addr: u64, pc: u64 },

    #[error("misaligned instruction fetch at pc={pc:#x}")]
    MisalignedInstruction { pc: u64 },

    #[error("unknown instruction {word:#010x} at pc={pc:#x}")]
    UnknownInstruction { pc: u64, word: u32 },

    #[error("execution space is protected: attempted write at {addr:#x}")]
    ExecutionSpaceProtected { addr: u64 },

    #[error("maximum basic block nesting exceeded at pc={pc:#x}")]
    DeepRecursion { pc: u64 },

    #[error("guest memory budget exhausted (requested {requested} more bytes)")]
    OutOfMemory { requested: u64 },

    #[error("invalid program: {reason}")]
    InvalidProgram { reason: &'static str },

    #[error("unhandled system call {number} at pc={pc:#x}")]
    SystemCallFailed { number: u64, pc: u64 },
}

impl Fault {
    /// The guest program counter at the moment of the fault, when meaningful.
    pub fn pc(&self) -> Option<u64> {
        match *self {
            Fault::ProtectionFault { pc, .. }
            | Fault::MissingPage { pc, .. }
            | Fault::MisalignedInstruction { pc }
            | Fault::UnknownInstruction { pc, .. }
            | Fault::DeepRecursion { pc }
            | Fault::SystemCallFailed { pc, .. } => Some(pc),
            Fault::ExecutionSpaceProtected { .. }
            | Fault::OutOfMemory { .. }
            | Fault::InvalidProgram { .. } => None,
        }
    }
}

/// Why `simulate` returned without a fault.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum StopReason {
    /// The instruction budget for this call was exhausted.
    BudgetExhausted,
    /// The guest asked to stop, typically via an exit syscall.
    Halted { exit_code: i32 },
}
