//! Fault notifier
//!
//! The host posts a [`FaultEvent`] to a [`FaultNotifier`] whenever a
//! monitored thread hits a CPU break or a fault. The consumer then looks for
//! the thread that caused it among the host's threads and renders its frozen
//! register file as a [`CrashReport`].
use core::fmt;

use crate::{
    error::{SendError, SetErrorMessageError},
    gate::{lock_gate, GateCell},
    mailbox::Mailbox,
    Port,
};

mod context;
mod render;

pub use self::{
    context::{reg, CpuContext, ExceptionCause, FpuException},
    render::CrashReport,
};

/// The events the host reports to a [`FaultNotifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum FaultEvent {
    CpuBreak = 1,
    Fault = 2,
}

impl FaultEvent {
    /// The mailbox message carrying the event.
    #[inline]
    pub const fn message(self) -> usize {
        self as usize
    }

    pub fn from_message(message: usize) -> Option<Self> {
        match message {
            1 => Some(Self::CpuBreak),
            2 => Some(Self::Fault),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// Thread state flags set by the host when it suspends a thread.
    pub struct ThreadFlags: u16 {
        /// The thread hit a breakpoint.
        const CPU_BREAK = 1 << 0;
        /// The thread caused a fault.
        const FAULT = 1 << 1;
    }
}

/// Thread priority.
pub type Priority = i32;

/// A thread as seen by the fault notifier.
#[derive(Debug, Clone, Copy)]
pub struct ThreadInfo {
    pub id: u32,
    pub priority: Priority,
    pub flags: ThreadFlags,
    pub context: CpuContext,
}

/// The priorities of threads whose faults are reported. Both ends are
/// exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityBand {
    /// The idle thread's priority
    pub idle: Priority,
    /// The highest application priority
    pub app_max: Priority,
}

impl PriorityBand {
    pub const DEFAULT: Self = Self {
        idle: 0,
        app_max: 127,
    };

    #[inline]
    pub fn contains(&self, priority: Priority) -> bool {
        self.idle < priority && priority < self.app_max
    }
}

impl Default for PriorityBand {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Find the first thread in `threads` that is in `band` and has been
/// suspended by a fault or a break.
pub fn find_faulted<'a>(band: PriorityBand, threads: &'a [ThreadInfo]) -> Option<&'a ThreadInfo> {
    threads.iter().find(|thread| {
        band.contains(thread.priority)
            && thread
                .flags
                .intersects(ThreadFlags::CPU_BREAK | ThreadFlags::FAULT)
    })
}

/// The output device of crash reports.
pub trait CrashOutput: fmt::Write {
    /// Make the output so far permanent (e.g., stop refreshing the screen).
    /// Called once after a report is written.
    fn freeze(&mut self);
}

/// Consumes fault events and produces crash reports.
pub struct FaultNotifier<Traits> {
    mailbox: Mailbox<Traits>,
    band: PriorityBand,
    error_message: GateCell<Traits, Option<&'static str>>,
}

impl<Traits> FaultNotifier<Traits> {
    pub const fn new(band: PriorityBand) -> Self {
        Self {
            mailbox: Mailbox::new(),
            band,
            error_message: GateCell::new(None),
        }
    }

    /// The mailbox fault events are posted to. It holds one event; an event
    /// posted while another is pending is dropped.
    #[inline]
    pub fn mailbox(&self) -> &Mailbox<Traits> {
        &self.mailbox
    }

    #[inline]
    pub fn band(&self) -> PriorityBand {
        self.band
    }
}

impl<Traits: Port> FaultNotifier<Traits> {
    /// Post `event`.
    pub fn notify(&self, event: FaultEvent) -> Result<(), SendError> {
        self.mailbox.send(event.message())
    }

    /// Register a message to print in place of the register dump. Used when
    /// a fault is raised on purpose to report an error.
    pub fn set_error_message(&self, message: &'static str) -> Result<(), SetErrorMessageError> {
        let mut lock = lock_gate::<Traits>()?;
        self.error_message.replace(&mut *lock, Some(message));
        Ok(())
    }

    /// Consume one pending event and look for the faulted thread.
    ///
    /// Returns `None` if there was no event or no thread qualifies. In the
    /// latter case the event is discarded; the next event triggers another
    /// search.
    ///
    /// Also returns `None` without consuming the event if the gate token is
    /// held by the caller.
    pub fn poll<'a>(&self, threads: &'a [ThreadInfo]) -> Option<CrashReport<'a>> {
        let error_message = {
            let lock = lock_gate::<Traits>().ok()?;
            self.error_message.get(&*lock)
        };

        // Both kinds of events are reported the same way
        self.mailbox.try_recv().ok()?;
        let thread = find_faulted(self.band, threads)?;

        Some(CrashReport {
            thread,
            error_message,
        })
    }
}

impl<Traits: Port> fmt::Debug for FaultNotifier<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FaultNotifier")
            .field("mailbox", &self.mailbox)
            .field("band", &self.band)
            .field("error_message", &self.error_message)
            .finish()
    }
}
