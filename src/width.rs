//! Build-time address-width parameter.
//!
//! The original engine specializes on the guest's XLEN via C++ templates. Rust has
//! no equivalent partial-specialization story, so the width is instead a marker
//! type implementing [`GuestWidth`]; `Machine<Rv32>` and `Machine<Rv64>` are two
//! concrete monomorphizations sharing all surrounding code. `W = 16` (RV128) is
//! deliberately left unimplemented: no third marker type exists, so attempting to
//! build a 128-bit machine is a compile error rather than a silently wrong one.

use std::fmt;

/// An unsigned guest address/register value, plus the conversions the engine
/// needs to move between it and a width-independent `u64`.
pub trait Address:
    Copy + Clone + Eq + Ord + fmt::Debug + fmt::LowerHex + Default + Send + Sync + 'static
{
    fn from_u64(v: u64) -> Self;
    fn as_u64(self) -> u64;
    /// Reinterprets the value as signed, sign-extended from this type's own width
    /// (not from XLEN — the two coincide for every width this engine implements).
    fn to_signed_i64(self) -> i64;
    fn wrapping_add_u64(self, rhs: u64) -> Self {
        Self::from_u64(self.as_u64().wrapping_add(rhs))
    }
    fn wrapping_add_i64(self, rhs: i64) -> Self {
        Self::from_u64(self.as_u64().wrapping_add(rhs as u64))
    }
}

impl Address for u32 {
    fn from_u64(v: u64) -> Self {
        v as u32
    }
    fn as_u64(self) -> u64 {
        u64::from(self)
    }
    fn to_signed_i64(self) -> i64 {
        i64::from(self as i32)
    }
}

impl Address for u64 {
    fn from_u64(v: u64) -> Self {
        v
    }
    fn as_u64(self) -> u64 {
        self
    }
    fn to_signed_i64(self) -> i64 {
        self as i64
    }
}

/// The set of facts that differ between RV32 and RV64: the register width, the
/// signed counterpart used for arithmetic shifts and comparisons, and XLEN itself.
pub trait GuestWidth: Copy + Clone + Eq + fmt::Debug + Send + Sync + 'static {
    type Addr: Address;

    /// Bits in a general-purpose register.
    const XLEN_BITS: u32;

    /// Bytes in a general-purpose register (`XLEN_BITS / 8`).
    const BYTES: usize;

    /// Name used in log lines and panic messages.
    const NAME: &'static str;
}

/// RV32I/E and friends: 32-bit registers and addresses.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Default)]
pub struct Rv32;

impl GuestWidth for Rv32 {
    type Addr = u32;
    const XLEN_BITS: u32 = 32;
    const BYTES: usize = 4;
    const NAME: &'static str = "rv32";
}

/// RV64I and friends: 64-bit registers and addresses.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Default)]
pub struct Rv64;

impl GuestWidth for Rv64 {
    type Addr = u64;
    const XLEN_BITS: u32 = 64;
    const BYTES: usize = 8;
    const NAME: &'static str = "rv64";
}
