//! Crash dump rendering
use core::fmt;

use super::{context::reg, CrashOutput, ThreadInfo};

/// General-purpose registers in dump order.
const GPR_ORDER: [(&str, usize); 28] = [
    ("AT", reg::AT),
    ("V0", reg::V0),
    ("V1", reg::V1),
    ("A0", reg::A0),
    ("A1", reg::A1),
    ("A2", reg::A2),
    ("A3", reg::A3),
    ("T0", reg::T0),
    ("T1", reg::T1),
    ("T2", reg::T2),
    ("T3", reg::T3),
    ("T4", reg::T4),
    ("T5", reg::T5),
    ("T6", reg::T6),
    ("T7", reg::T7),
    ("S0", reg::S0),
    ("S1", reg::S1),
    ("S2", reg::S2),
    ("S3", reg::S3),
    ("S4", reg::S4),
    ("S5", reg::S5),
    ("S6", reg::S6),
    ("S7", reg::S7),
    ("T8", reg::T8),
    ("T9", reg::T9),
    ("GP", reg::GP),
    ("SP", reg::SP),
    ("S8", reg::S8),
];

/// The crash report of a faulted thread, produced by
/// [`FaultNotifier::poll`].
///
/// `Display` renders the dump. If an error message was registered, it is
/// printed instead of the registers.
///
/// [`FaultNotifier::poll`]: super::FaultNotifier::poll
#[derive(Debug, Clone, Copy)]
pub struct CrashReport<'a> {
    pub thread: &'a ThreadInfo,
    pub error_message: Option<&'static str>,
}

impl CrashReport<'_> {
    /// Write the report to `out` and freeze it.
    pub fn report_to(&self, out: &mut impl CrashOutput) -> fmt::Result {
        let result = fmt::write(out, format_args!("{self}"));
        out.freeze();
        result
    }
}

impl fmt::Display for CrashReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(message) = self.error_message {
            return f.write_str(message);
        }

        let thread = self.thread;
        let cx = &thread.context;

        match cx.exception_cause() {
            Some(cause) => writeln!(f, "THREAD:{}  ({})", thread.id, cause)?,
            None => writeln!(f, "THREAD:{}  (Unknown exception)", thread.id)?,
        }
        writeln!(
            f,
            "PC:{:08X}H   SR:{:08X}H   VA:{:08X}H\n",
            cx.pc, cx.sr, cx.badvaddr
        )?;

        // Three per line, RA on the last line
        for row in GPR_ORDER.chunks(3) {
            for (i, &(name, num)) in row.iter().enumerate() {
                if i > 0 {
                    f.write_str("   ")?;
                }
                write!(f, "{}:{:08X}H", name, cx.gpr[num] as u32)?;
            }
            if row.len() < 3 {
                write!(f, "   RA:{:08X}H", cx.gpr[reg::RA] as u32)?;
            }
            f.write_str("\n")?;
        }
        f.write_str("\n")?;

        write!(f, "FPCSR:{:08X}H", cx.fpcsr)?;
        if let Some(e) = cx.fpu_exception() {
            write!(f, "  ({e})")?;
        }
        f.write_str("\n\n")?;

        for (i, num) in (0..32).step_by(2).enumerate() {
            if i > 0 && i % 3 == 0 {
                f.write_str("\n")?;
            }
            write_float_reg(f, num, cx.fpr[num])?;
        }

        Ok(())
    }
}

/// Zero and normal numbers are printed; anything else (negative zero,
/// subnormals, infinities, NaNs) prints as dashes.
fn write_float_reg(f: &mut fmt::Formatter, num: usize, bits: u32) -> fmt::Result {
    let biased_exponent = (bits >> 23) & 0xff;
    if bits == 0 || (1..=254).contains(&biased_exponent) {
        write!(f, "F{:02}:{:.3e}  ", num, f32::from_bits(bits))
    } else {
        write!(f, "F{num:02}:--------- ")
    }
}
