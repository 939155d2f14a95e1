//! A port for unit tests. Time only moves when [`advance`] is called, and
//! every access to the deadline register is recorded.
use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    Mutex,
};

use crate::{Port, PortToTimer, Ticks};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegWrite {
    Set(Ticks),
    Pend,
    Disarm,
}

type Hook = Box<dyn FnOnce() + Send>;

pub(crate) struct MockState {
    disabled: AtomicBool,
    disable_count: AtomicUsize,
    now: AtomicU32,
    /// Absolute tick count at which the deadline interrupt fires
    armed: Mutex<Option<Ticks>>,
    pended: AtomicBool,
    writes: Mutex<Vec<RegWrite>>,
    /// Run by the next `disable_timer_interrupt` issued with the gate open,
    /// before the interrupt is masked
    before_disable: Mutex<Option<Hook>>,
}

impl MockState {
    pub(crate) const fn new() -> Self {
        Self {
            disabled: AtomicBool::new(false),
            disable_count: AtomicUsize::new(0),
            now: AtomicU32::new(0),
            armed: Mutex::new(None),
            pended: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
            before_disable: Mutex::new(None),
        }
    }

    pub(crate) fn disable(&self) -> bool {
        let was_disabled = self.disabled.load(Ordering::Relaxed);
        if !was_disabled {
            let hook = self.before_disable.lock().unwrap().take();
            if let Some(hook) = hook {
                hook();
            }
        }
        self.disable_count.fetch_add(1, Ordering::Relaxed);
        self.disabled.swap(true, Ordering::Relaxed)
    }

    pub(crate) fn restore(&self, mask: bool) {
        self.disabled.store(mask, Ordering::Relaxed);
    }

    pub(crate) fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    pub(crate) fn now(&self) -> Ticks {
        self.now.load(Ordering::Relaxed)
    }

    pub(crate) fn set_deadline(&self, delta: Ticks) {
        assert!(self.is_disabled(), "register written with the gate open");
        assert_ne!(delta, 0);
        *self.armed.lock().unwrap() = Some(self.now().wrapping_add(delta));
        self.pended.store(false, Ordering::Relaxed);
        self.writes.lock().unwrap().push(RegWrite::Set(delta));
    }

    pub(crate) fn pend(&self) {
        assert!(self.is_disabled(), "register written with the gate open");
        self.pended.store(true, Ordering::Relaxed);
        self.writes.lock().unwrap().push(RegWrite::Pend);
    }

    pub(crate) fn disarm(&self) {
        assert!(self.is_disabled(), "register written with the gate open");
        *self.armed.lock().unwrap() = None;
        self.pended.store(false, Ordering::Relaxed);
        self.writes.lock().unwrap().push(RegWrite::Disarm);
    }

    /// Take the recorded register writes.
    pub(crate) fn take_writes(&self) -> Vec<RegWrite> {
        std::mem::take(&mut *self.writes.lock().unwrap())
    }

    pub(crate) fn disable_count(&self) -> usize {
        self.disable_count.load(Ordering::Relaxed)
    }

    /// Move the counter forward without taking any interrupt, as if the
    /// deadline interrupt were held off by something else.
    pub(crate) fn skip(&self, ticks: Ticks) {
        self.now.fetch_add(ticks, Ordering::Relaxed);
    }

    /// Simulate an interrupt taken right before the next time the gate is
    /// closed.
    pub(crate) fn before_next_disable(&self, hook: impl FnOnce() + Send + 'static) {
        *self.before_disable.lock().unwrap() = Some(Box::new(hook));
    }

    /// Return the tick count at which the next deadline interrupt is due, if
    /// it is due no later than `limit`.
    fn next_fire(&self, limit: Ticks) -> Option<Ticks> {
        let now = self.now();
        if self.pended.load(Ordering::Relaxed) {
            return Some(now);
        }
        let armed = (*self.armed.lock().unwrap())?;
        (armed.wrapping_sub(now) <= limit.wrapping_sub(now)).then_some(armed)
    }

    fn take_deadline(&self) {
        *self.armed.lock().unwrap() = None;
        self.pended.store(false, Ordering::Relaxed);
    }
}

pub(crate) trait MockPort: Port {
    fn mock() -> &'static MockState;
}

/// Let `ticks` ticks pass, taking every deadline interrupt that becomes due
/// at the exact tick it is due.
pub(crate) fn advance<P: MockPort>(ticks: Ticks) {
    let mock = P::mock();
    assert!(!mock.is_disabled(), "time advanced with the gate closed");

    let target = mock.now().wrapping_add(ticks);
    while let Some(at) = mock.next_fire(target) {
        mock.now.store(at, Ordering::Relaxed);
        mock.take_deadline();
        unsafe { P::deadline_interrupt() };
    }
    mock.now.store(target, Ordering::Relaxed);
}

/// Take a deadline interrupt now, whether or not one is due.
pub(crate) fn fire<P: MockPort>() {
    P::mock().take_deadline();
    unsafe { P::deadline_interrupt() };
}

/// Define a port type backed by a fresh [`MockState`].
macro_rules! test_port {
    ($vis:vis struct $Port:ident) => {
        $vis struct $Port;

        const _: () = {
            use $crate::{
                test_port::{MockPort, MockState},
                Port, PortDeadline, PortGate, Ticks, TimerGlobals,
            };

            static STATE: MockState = MockState::new();
            static TIMER_GLOBALS: TimerGlobals<$Port> = TimerGlobals::new();

            impl MockPort for $Port {
                fn mock() -> &'static MockState {
                    &STATE
                }
            }

            unsafe impl PortGate for $Port {
                type Mask = bool;

                unsafe fn disable_timer_interrupt() -> bool {
                    STATE.disable()
                }

                unsafe fn restore_timer_interrupt(mask: bool) {
                    STATE.restore(mask)
                }

                fn is_timer_interrupt_disabled() -> bool {
                    STATE.is_disabled()
                }
            }

            unsafe impl PortDeadline for $Port {
                const MAX_DEADLINE: Ticks = 1 << 20;

                fn tick_count() -> Ticks {
                    STATE.now()
                }

                unsafe fn set_deadline(delta: Ticks) {
                    STATE.set_deadline(delta)
                }

                unsafe fn pend_deadline() {
                    STATE.pend()
                }

                unsafe fn disarm_deadline() {
                    STATE.disarm()
                }
            }

            impl Port for $Port {
                fn timer_globals() -> &'static TimerGlobals<Self> {
                    &TIMER_GLOBALS
                }
            }
        };
    };
}
