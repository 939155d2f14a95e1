//! Frozen CPU state and its decoding
use core::fmt;

/// General-purpose register numbers used by the crash dump.
pub mod reg {
    pub const AT: usize = 1;
    pub const V0: usize = 2;
    pub const V1: usize = 3;
    pub const A0: usize = 4;
    pub const A1: usize = 5;
    pub const A2: usize = 6;
    pub const A3: usize = 7;
    pub const T0: usize = 8;
    pub const T1: usize = 9;
    pub const T2: usize = 10;
    pub const T3: usize = 11;
    pub const T4: usize = 12;
    pub const T5: usize = 13;
    pub const T6: usize = 14;
    pub const T7: usize = 15;
    pub const S0: usize = 16;
    pub const S1: usize = 17;
    pub const S2: usize = 18;
    pub const S3: usize = 19;
    pub const S4: usize = 20;
    pub const S5: usize = 21;
    pub const S6: usize = 22;
    pub const S7: usize = 23;
    pub const T8: usize = 24;
    pub const T9: usize = 25;
    pub const GP: usize = 28;
    pub const SP: usize = 29;
    pub const S8: usize = 30;
    pub const RA: usize = 31;
}

/// The register file of a thread, saved when it was suspended by a fault or
/// a break.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CpuContext {
    /// General-purpose registers, indexed by register number. `gpr[0]` is
    /// the hard-wired zero register.
    pub gpr: [u64; 32],
    pub pc: u32,
    /// Status register
    pub sr: u32,
    /// The faulting virtual address, if the exception had one
    pub badvaddr: u32,
    /// Cause register
    pub cause: u32,
    /// FPU control/status register
    pub fpcsr: u32,
    /// FPU registers as raw single-precision bit patterns
    pub fpr: [u32; 32],
}

impl CpuContext {
    /// A context with every register cleared.
    pub const ZERO: Self = Self {
        gpr: [0; 32],
        pc: 0,
        sr: 0,
        badvaddr: 0,
        cause: 0,
        fpcsr: 0,
        fpr: [0; 32],
    };

    /// Decode the exception code of the cause register.
    #[inline]
    pub fn exception_cause(&self) -> Option<ExceptionCause> {
        ExceptionCause::from_cause_register(self.cause)
    }

    /// Decode the highest-priority FPU exception recorded in FPCSR.
    #[inline]
    pub fn fpu_exception(&self) -> Option<FpuException> {
        FpuException::from_fpcsr(self.fpcsr)
    }
}

impl Default for CpuContext {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for CpuContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CpuContext")
            .field("pc", &format_args!("{:#010x}", self.pc))
            .field("sr", &format_args!("{:#010x}", self.sr))
            .field("badvaddr", &format_args!("{:#010x}", self.badvaddr))
            .field("cause", &format_args!("{:#010x}", self.cause))
            .field("fpcsr", &format_args!("{:#010x}", self.fpcsr))
            .finish_non_exhaustive()
    }
}

/// The exception code field of the cause register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCause {
    Interrupt,
    TlbModification,
    TlbLoad,
    TlbStore,
    AddressErrorLoad,
    AddressErrorStore,
    BusErrorInstruction,
    BusErrorData,
    Syscall,
    Breakpoint,
    ReservedInstruction,
    CoprocessorUnusable,
    ArithmeticOverflow,
    Trap,
    VirtualCoherencyInstruction,
    FloatingPoint,
    Watchpoint,
    VirtualCoherencyData,
}

impl ExceptionCause {
    /// Decode bits 6..=2 of `cause`. Returns `None` for reserved codes.
    pub fn from_cause_register(cause: u32) -> Option<Self> {
        Some(match (cause >> 2) & 0x1f {
            0 => Self::Interrupt,
            1 => Self::TlbModification,
            2 => Self::TlbLoad,
            3 => Self::TlbStore,
            4 => Self::AddressErrorLoad,
            5 => Self::AddressErrorStore,
            6 => Self::BusErrorInstruction,
            7 => Self::BusErrorData,
            8 => Self::Syscall,
            9 => Self::Breakpoint,
            10 => Self::ReservedInstruction,
            11 => Self::CoprocessorUnusable,
            12 => Self::ArithmeticOverflow,
            13 => Self::Trap,
            14 => Self::VirtualCoherencyInstruction,
            15 => Self::FloatingPoint,
            23 => Self::Watchpoint,
            31 => Self::VirtualCoherencyData,
            _ => return None,
        })
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Interrupt => "Interrupt",
            Self::TlbModification => "TLB modification",
            Self::TlbLoad => "TLB exception on load",
            Self::TlbStore => "TLB exception on store",
            Self::AddressErrorLoad => "Address error on load",
            Self::AddressErrorStore => "Address error on store",
            Self::BusErrorInstruction => "Bus error on inst.",
            Self::BusErrorData => "Bus error on data",
            Self::Syscall => "System call exception",
            Self::Breakpoint => "Breakpoint exception",
            Self::ReservedInstruction => "Reserved instruction",
            Self::CoprocessorUnusable => "Coprocessor unusable",
            Self::ArithmeticOverflow => "Arithmetic overflow",
            Self::Trap => "Trap exception",
            Self::VirtualCoherencyInstruction => "Virtual coherency on inst.",
            Self::FloatingPoint => "Floating point exception",
            Self::Watchpoint => "Watchpoint exception",
            Self::VirtualCoherencyData => "Virtual coherency on data",
        }
    }
}

impl fmt::Display for ExceptionCause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// An FPU exception cause recorded in FPCSR, in decreasing priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FpuException {
    Unimplemented,
    Invalid,
    DivisionByZero,
    Overflow,
    Underflow,
    Inexact,
}

impl FpuException {
    const BY_PRIORITY: [Self; 6] = [
        Self::Unimplemented,
        Self::Invalid,
        Self::DivisionByZero,
        Self::Overflow,
        Self::Underflow,
        Self::Inexact,
    ];

    /// Pick the highest-priority cause bit set among bits 17..=12.
    pub fn from_fpcsr(fpcsr: u32) -> Option<Self> {
        Self::BY_PRIORITY
            .iter()
            .zip((12..=17).rev())
            .find(|&(_, bit)| fpcsr & (1 << bit) != 0)
            .map(|(&e, _)| e)
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Unimplemented => "Unimplemented operation",
            Self::Invalid => "Invalid operation",
            Self::DivisionByZero => "Division by zero",
            Self::Overflow => "Overflow",
            Self::Underflow => "Underflow",
            Self::Inexact => "Inexact operation",
        }
    }
}

impl fmt::Display for FpuException {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.description())
    }
}
