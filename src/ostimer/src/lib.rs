#![doc = include_str!("./lib.md")]
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(test)]
#[macro_use]
mod test_port;

pub mod error;
pub mod fault;
mod gate;
pub mod mailbox;
pub mod timer;
pub mod utils;

pub use self::{
    error::*,
    gate::{Gate, GateState},
    mailbox::Mailbox,
    timer::{Notify, TimerEntry, TimerGlobals},
};

/// Unsigned integer type representing a tick count used by
/// [a port timer driver]. The period of each tick is defined by the port.
///
/// [a port timer driver]: PortDeadline
pub type Ticks = u32;

/// The largest initial delay or repeat interval accepted by
/// [`TimerEntry::start`]. Half of the counter range, so that the ordering of
/// two deadlines is never ambiguous after wrap-around.
pub const MAX_DELAY: Ticks = Ticks::MAX / 2;

/// Masks and unmasks the timer interrupt.
///
/// # Safety
///
/// These methods are only meant to be called by the timer core.
///
/// The mask returned by `disable_timer_interrupt` must describe the state in
/// effect before the call, so that `restore_timer_interrupt` reinstates
/// exactly that state. In particular, a nested restore must not unmask an
/// interrupt that an outer region masked.
pub unsafe trait PortGate: Sized + 'static {
    /// Opaque record of the interrupt state before a disable.
    type Mask: Copy;

    /// Mask the timer interrupt and return the previous state.
    unsafe fn disable_timer_interrupt() -> Self::Mask;

    /// Reinstate the state recorded in `mask`.
    unsafe fn restore_timer_interrupt(mask: Self::Mask);

    /// Return a flag indicating whether the timer interrupt is masked in the
    /// calling context.
    fn is_timer_interrupt_disabled() -> bool;
}

/// Drives the deadline register.
///
/// # Safety
///
/// The timer core calls the `unsafe` methods only with the gate closed.
/// Implementations must call [`PortToTimer::deadline_interrupt`] when an
/// armed deadline is reached, and must not call it while the gate is closed.
pub unsafe trait PortDeadline {
    /// The maximum value that can be passed to [`Self::set_deadline`].
    const MAX_DEADLINE: Ticks = MAX_DELAY;

    /// Read the free-running tick counter. Wraps around at `Ticks::MAX`.
    fn tick_count() -> Ticks;

    /// Arm the deadline register to fire after `delta` ticks, replacing any
    /// previously armed deadline.
    ///
    /// `delta` is never zero and never exceeds [`Self::MAX_DEADLINE`].
    unsafe fn set_deadline(delta: Ticks);

    /// Make the deadline interrupt pending as soon as possible.
    unsafe fn pend_deadline();

    /// Disarm the deadline register.
    unsafe fn disarm_deadline();
}

/// Implemented by a port type to supply the timer core with its hardware
/// hooks and global state.
pub trait Port: PortGate + PortDeadline {
    /// Get the timer list of this port.
    fn timer_globals() -> &'static TimerGlobals<Self>;
}

/// Methods intended to be called by a port.
///
/// # Safety
///
/// These are only meant to be called by the port.
pub trait PortToTimer {
    /// Prepare the timer list. Called once at boot before the first timer is
    /// started.
    ///
    /// Precondition: The gate is open.
    unsafe fn init();

    /// Expire due timers and deliver their notifications.
    ///
    /// Precondition: The gate is open, an interrupt context
    unsafe fn deadline_interrupt();
}

impl<Traits: Port> PortToTimer for Traits {
    #[inline]
    unsafe fn init() {
        timer::init::<Traits>();
    }

    #[inline]
    unsafe fn deadline_interrupt() {
        timer::handle_deadline::<Traits>();
    }
}
