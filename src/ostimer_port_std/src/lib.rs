#![doc = include_str!("./lib.md")]
#![deny(unsafe_op_in_unsafe_fn)]
use ostimer::{
    fault::{CrashOutput, FaultNotifier, ThreadInfo},
    Port, PortToTimer, Ticks,
};
use spin::Mutex as SpinMutex;
use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, OnceLock,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

/// Used by `use_port!`
#[doc(hidden)]
pub extern crate ostimer;

/// Implemented on a port type by [`use_port!`].
///
/// # Safety
///
/// Only meant to be implemented by [`use_port!`].
#[doc(hidden)]
pub unsafe trait PortInstance: Port {
    fn port_state() -> &'static State;
}

/// The internal state of the port.
///
/// # Safety
///
/// For the safety information of this type's methods, see the documentation of
/// the corresponding trait methods of `Port*`.
#[doc(hidden)]
pub struct State {
    /// The context holding the gate, or `0` if the gate is open.
    gate_owner: AtomicUsize,
    timer_cmd_send: SpinMutex<Option<mpsc::Sender<TimerCmd>>>,
    timer_join: SpinMutex<Option<JoinHandle<()>>>,
    origin: OnceLock<Instant>,
}

/// The prior gate state returned by [`State::disable_timer_interrupt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateMask {
    /// `true` if this call closed the gate, i.e., the gate was open before.
    owned: bool,
}

enum TimerCmd {
    SetDeadline { at: Instant },
    Disarm,
}

/// Identifies the calling thread as a gate owner. Never zero.
fn context_id() -> usize {
    static NEXT_ID: AtomicUsize = AtomicUsize::new(1);
    thread_local! {
        static CONTEXT_ID: usize = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    }
    CONTEXT_ID.with(|id| *id)
}

#[allow(clippy::missing_safety_doc)]
impl State {
    /// The largest delta passed to `set_deadline`, in microseconds.
    pub const MAX_DEADLINE: Ticks = ostimer::MAX_DELAY;

    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            gate_owner: AtomicUsize::new(0),
            timer_cmd_send: SpinMutex::new(None),
            timer_join: SpinMutex::new(None),
            origin: OnceLock::new(),
        }
    }

    /// Start the simulated deadline hardware and initialize the timer list.
    pub fn port_boot<Traits: PortInstance>(&'static self) {
        // Establish the origin before anyone reads the counter
        self.origin.get_or_init(Instant::now);

        let (timer_cmd_send, timer_cmd_recv) = mpsc::channel();
        log::trace!("starting the timer thread");
        let timer_join_handle = std::thread::spawn(move || {
            let mut next_deadline: Option<Instant> = None;
            loop {
                let recv_result = if let Some(next_deadline) = next_deadline {
                    timer_cmd_recv
                        .recv_timeout(next_deadline.saturating_duration_since(Instant::now()))
                } else {
                    timer_cmd_recv
                        .recv()
                        .map_err(|_| mpsc::RecvTimeoutError::Disconnected)
                };
                match recv_result {
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        break;
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        next_deadline = None;
                        log::debug!("deadline reached");

                        // Safety: We are the port. The gate is open in this
                        // thread, and this thread serves as the interrupt
                        // context.
                        unsafe { <Traits as PortToTimer>::deadline_interrupt() };
                    }
                    Ok(TimerCmd::SetDeadline { at }) => {
                        next_deadline = Some(at);
                    }
                    Ok(TimerCmd::Disarm) => {
                        next_deadline = None;
                    }
                }
            }
        });
        *self.timer_cmd_send.lock() = Some(timer_cmd_send);
        *self.timer_join.lock() = Some(timer_join_handle);

        // Safety: We are the port, and the gate is open
        unsafe { <Traits as PortToTimer>::init() };
    }

    /// Stop the timer thread. Timers stop firing.
    pub fn port_shutdown(&self) {
        // `timer_cmd_recv.recv` will return `Err(_)` when we drop the
        // corresponding sender (`timer_cmd_send`).
        log::trace!("stopping the timer thread");
        *self.timer_cmd_send.lock() = None;
        if let Some(join_handle) = self.timer_join.lock().take() {
            if let Err(e) = join_handle.join() {
                // Propagate a panic that occurred in a notification
                std::panic::resume_unwind(e);
            }
        }
        log::trace!("stopped the timer thread");
    }

    pub unsafe fn disable_timer_interrupt(&self) -> GateMask {
        let me = context_id();
        log::trace!("disable_timer_interrupt (context {me})");

        if self.gate_owner.load(Ordering::Acquire) == me {
            return GateMask { owned: false };
        }

        // Another context may be holding the gate. This is where the deadline
        // interrupt waits for the application, and vice versa.
        while self
            .gate_owner
            .compare_exchange_weak(0, me, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::thread::yield_now();
        }

        GateMask { owned: true }
    }

    pub unsafe fn restore_timer_interrupt(&self, mask: GateMask) {
        log::trace!("restore_timer_interrupt({mask:?})");
        if mask.owned {
            debug_assert_eq!(self.gate_owner.load(Ordering::Relaxed), context_id());
            self.gate_owner.store(0, Ordering::Release);
        }
    }

    pub fn is_timer_interrupt_disabled(&self) -> bool {
        self.gate_owner.load(Ordering::Acquire) == context_id()
    }

    /// Microseconds since boot, truncated to [`Ticks`].
    pub fn tick_count(&self) -> Ticks {
        let origin = *self.origin.get_or_init(Instant::now);
        Instant::now().duration_since(origin).as_micros() as Ticks
    }

    pub unsafe fn set_deadline(&self, delta: Ticks) {
        log::trace!("set_deadline({delta})");
        let at = Instant::now() + Duration::from_micros(delta.into());
        self.send_timer_cmd(TimerCmd::SetDeadline { at });
    }

    pub unsafe fn pend_deadline(&self) {
        log::trace!("pend_deadline");
        self.send_timer_cmd(TimerCmd::SetDeadline { at: Instant::now() });
    }

    pub unsafe fn disarm_deadline(&self) {
        log::trace!("disarm_deadline");
        self.send_timer_cmd(TimerCmd::Disarm);
    }

    fn send_timer_cmd(&self, cmd: TimerCmd) {
        if let Some(timer_cmd_send) = &*self.timer_cmd_send.lock() {
            // The timer thread exits only after the sender is dropped
            let _ = timer_cmd_send.send(cmd);
        } else {
            log::warn!("the deadline register was written before boot or after shutdown");
        }
    }
}

/// Initialize the timer list and start the deadline simulation.
///
/// This also installs `env_logger` unless a logger is already set.
pub fn boot<Traits: PortInstance>() {
    let _ = env_logger::try_init();
    Traits::port_state().port_boot::<Traits>();
}

/// Stop the deadline simulation.
///
/// Note: There is no safe way to boot the simulated system again without
/// restarting an entire process.
pub fn shutdown<Traits: PortInstance>() {
    Traits::port_state().port_shutdown();
}

/// A [`CrashOutput`] that collects the report and emits it through `log` at
/// the `error` level when frozen.
#[derive(Debug, Default)]
pub struct LogCrashOutput {
    text: String,
    frozen: bool,
}

impl LogCrashOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// The report written so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

impl fmt::Write for LogCrashOutput {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.frozen {
            return Err(fmt::Error);
        }
        self.text.push_str(s);
        Ok(())
    }
}

impl CrashOutput for LogCrashOutput {
    fn freeze(&mut self) {
        for line in self.text.lines() {
            log::error!("{line}");
        }
        self.frozen = true;
    }
}

/// Wait for a fault event that can be attributed to one of the threads
/// returned by `threads`, then write its report to `out`.
///
/// `threads` is called again for every event, so it should return a fresh
/// snapshot. Events that no thread qualifies for are discarded.
pub fn run_fault_notifier<Traits: Port>(
    notifier: &FaultNotifier<Traits>,
    mut threads: impl FnMut() -> Vec<ThreadInfo>,
    out: &mut impl CrashOutput,
) -> fmt::Result {
    loop {
        if notifier.mailbox().is_full() {
            let snapshot = threads();
            if let Some(report) = notifier.poll(&snapshot) {
                log::debug!("thread {} faulted", report.thread.id);
                return report.report_to(out);
            }
            log::trace!("fault event with no faulted thread");
        } else {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

/// Instantiate the port. Defines a port type implementing [`ostimer::Port`]
/// along with its static state.
///
/// ```rust,ignore
/// ostimer_port_std::use_port!(unsafe struct SystemTraits);
///
/// static TIMER: ostimer::TimerEntry<SystemTraits> =
///     ostimer::TimerEntry::new(ostimer::Notify::None);
///
/// fn main() {
///     ostimer_port_std::boot::<SystemTraits>();
///     TIMER.start(1_000, 0).unwrap();
/// }
/// ```
#[macro_export]
macro_rules! use_port {
    (unsafe $vis:vis struct $Traits:ident) => {
        $vis struct $Traits;

        mod port_std_impl {
            use super::$Traits;
            use $crate::ostimer::{Port, PortDeadline, PortGate, Ticks, TimerGlobals};
            use $crate::{GateMask, PortInstance, State};

            pub(super) static PORT_STATE: State = State::new();
            static TIMER_GLOBALS: TimerGlobals<$Traits> = TimerGlobals::new();

            unsafe impl PortInstance for $Traits {
                #[inline]
                fn port_state() -> &'static State {
                    &PORT_STATE
                }
            }

            unsafe impl PortGate for $Traits {
                type Mask = GateMask;

                unsafe fn disable_timer_interrupt() -> GateMask {
                    unsafe { PORT_STATE.disable_timer_interrupt() }
                }

                unsafe fn restore_timer_interrupt(mask: GateMask) {
                    unsafe { PORT_STATE.restore_timer_interrupt(mask) }
                }

                fn is_timer_interrupt_disabled() -> bool {
                    PORT_STATE.is_timer_interrupt_disabled()
                }
            }

            unsafe impl PortDeadline for $Traits {
                const MAX_DEADLINE: Ticks = State::MAX_DEADLINE;

                fn tick_count() -> Ticks {
                    PORT_STATE.tick_count()
                }

                unsafe fn set_deadline(delta: Ticks) {
                    unsafe { PORT_STATE.set_deadline(delta) }
                }

                unsafe fn pend_deadline() {
                    unsafe { PORT_STATE.pend_deadline() }
                }

                unsafe fn disarm_deadline() {
                    unsafe { PORT_STATE.disarm_deadline() }
                }
            }

            impl Port for $Traits {
                #[inline]
                fn timer_globals() -> &'static TimerGlobals<Self> {
                    &TIMER_GLOBALS
                }
            }
        }
    };
}
