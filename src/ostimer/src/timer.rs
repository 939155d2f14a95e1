//! Soft timers
use core::{fmt, ptr, sync::atomic::AtomicBool, sync::atomic::Ordering};

use crate::{
    error::{
        BadParamError, GetRemainingError, SendError, SetTimerIntervalError, StartTimerError,
        StopTimerError,
    },
    gate::{lock_gate, Gate, GateCell, GateState, GateTokenRefMut},
    mailbox::Mailbox,
    utils::Init,
    Port, Ticks, MAX_DELAY,
};

mod list;
#[cfg(test)]
mod tests;

use self::list::Link;

/// What happens when a timer expires.
pub enum Notify<Traits: 'static> {
    /// Nothing. The expiry is only observable through the timer state.
    None,
    /// Call `func(param)` in the interrupt context. The gate is closed during
    /// the call, but the callback may still start or stop timers and post to
    /// mailboxes.
    Callback { func: fn(usize), param: usize },
    /// Post `message` to `mailbox`. The message is dropped if the mailbox is
    /// full.
    Message {
        mailbox: &'static Mailbox<Traits>,
        message: usize,
    },
}

impl<Traits: 'static> Clone for Notify<Traits> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Traits: 'static> Copy for Notify<Traits> {}

impl<Traits: 'static> fmt::Debug for Notify<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::None => f.write_str("None"),
            Self::Callback { func, param } => f
                .debug_struct("Callback")
                .field("func", &(func as *const ()))
                .field("param", &param)
                .finish(),
            Self::Message { mailbox, message } => f
                .debug_struct("Message")
                .field("mailbox", &(mailbox as *const Mailbox<Traits>))
                .field("message", &message)
                .finish(),
        }
    }
}

impl<Traits: Port> Notify<Traits> {
    fn deliver(self) {
        match self {
            Self::None => {}
            Self::Callback { func, param } => func(param),
            Self::Message { mailbox, message } => match mailbox.send(message) {
                // The receiver hasn't caught up. The message is lost.
                Ok(()) | Err(SendError::QueueOverflow) => {}
                // Notifications are delivered with the gate token returned
                Err(SendError::BadContext) => {
                    debug_assert!(false, "notification delivered with the gate token held")
                }
            },
        }
    }
}

/// A soft timer.
///
/// A timer is either *stopped* or *scheduled*. [`start`] schedules it; it
/// stays scheduled until it expires (if it's a one-shot timer) or until
/// [`stop`] is called.
///
/// [`start`]: Self::start
/// [`stop`]: Self::stop
pub struct TimerEntry<Traits: 'static> {
    /// The ring links. `None` iff the timer is stopped.
    link: GateCell<Traits, Option<Link<Traits>>>,

    /// Ticks between the predecessor's deadline and this timer's.
    remaining: GateCell<Traits, Ticks>,

    /// The repeat interval. `0` means one-shot.
    interval: GateCell<Traits, Ticks>,

    /// Mirrors `link.is_some()`. Only written with the gate closed.
    scheduled: AtomicBool,

    notify: Notify<Traits>,
}

impl<Traits: 'static> TimerEntry<Traits> {
    /// Construct a stopped timer.
    pub const fn new(notify: Notify<Traits>) -> Self {
        Self {
            link: GateCell::new(None),
            remaining: GateCell::new(0),
            interval: GateCell::new(0),
            scheduled: AtomicBool::new(false),
            notify,
        }
    }

    /// Get a flag indicating whether the timer is scheduled.
    ///
    /// This does not close the gate. The answer may be outdated by the time
    /// it's returned if the timer interrupt is enabled.
    #[inline]
    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }
}

impl<Traits: Port> TimerEntry<Traits> {
    /// Schedule the timer to expire `delay` ticks from now, and then every
    /// `interval` ticks if `interval` is nonzero.
    ///
    /// If `delay` is zero and `interval` is not, the first expiry happens
    /// after `interval` ticks. If both are zero, the timer expires the next
    /// time the deadline interrupt is handled.
    pub fn start(&'static self, delay: Ticks, interval: Ticks) -> Result<(), StartTimerError> {
        if delay > MAX_DELAY || interval > MAX_DELAY {
            return Err(BadParamError::BadParam.into());
        }

        let mut lock = lock_gate::<Traits>()?;

        if self.link.read(&*lock).is_some() {
            return Err(StartTimerError::AlreadyScheduled);
        }

        self.interval.replace(&mut *lock, interval);

        let delay = if delay == 0 { interval } else { delay };
        insert_timer(lock.borrow_mut(), self, delay);

        Ok(())
    }

    /// Remove the timer from the timer list.
    ///
    /// Fails with `NotScheduled` without closing the gate if the timer is not
    /// scheduled. This is also what a second call returns.
    pub fn stop(&'static self) -> Result<(), StopTimerError> {
        if !self.is_scheduled() {
            return Err(StopTimerError::NotScheduled);
        }

        let mut lock = lock_gate::<Traits>()?;

        // The deadline interrupt may have expired the timer since we checked
        // `scheduled`
        let link = match self.link.get(&*lock) {
            Some(link) => link,
            None => return Err(StopTimerError::NotScheduled),
        };

        let g_timer = Traits::timer_globals();
        let next = link.next.0;
        if !ptr::eq(next, &g_timer.sentinel) {
            // The successor's deadline doesn't change
            let delta = self.remaining.get(&*lock);
            next.remaining
                .replace_with(&mut *lock, |x| x.saturating_add(delta));
        }

        list::unlink(lock.borrow_mut(), self);

        // Stopping the head leaves the register armed for its deadline. The
        // resulting interrupt finds nothing to expire and reprograms the
        // register.
        if list::first(lock.borrow_mut()).is_none()
            && !g_timer.handler_in_progress.get(&*lock)
        {
            // Safety: The gate is closed
            unsafe { Traits::disarm_deadline() };
        }

        Ok(())
    }

    /// Change the repeat interval. This takes effect the next time the
    /// timer expires.
    pub fn set_interval(&self, interval: Ticks) -> Result<(), SetTimerIntervalError> {
        if interval > MAX_DELAY {
            return Err(BadParamError::BadParam.into());
        }

        let mut lock = lock_gate::<Traits>()?;
        self.interval.replace(&mut *lock, interval);
        Ok(())
    }

    /// Get the number of ticks until the timer expires.
    pub fn remaining(&'static self) -> Result<Ticks, GetRemainingError> {
        let mut lock = lock_gate::<Traits>()?;

        if self.link.read(&*lock).is_none() {
            return Err(GetRemainingError::NotScheduled);
        }

        let since_sync = ticks_since_sync(lock.borrow_mut());
        Ok(list::prefix_sum(&*lock, self).saturating_sub(since_sync))
    }
}

impl<Traits: Port> fmt::Debug for TimerEntry<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TimerEntry")
            .field("self", &(self as *const _))
            .field("scheduled", &self.is_scheduled())
            .field("remaining", &self.remaining)
            .field("interval", &self.interval)
            .field("notify", &self.notify)
            .finish()
    }
}

/// The per-port timer list and its bookkeeping.
pub struct TimerGlobals<Traits: 'static> {
    pub(crate) gate: GateState,

    /// The ring anchor. Never scheduled.
    sentinel: TimerEntry<Traits>,

    /// The tick count the ring's deltas are relative to.
    last_sync: GateCell<Traits, Ticks>,

    /// Set while [`handle_deadline`] is running. Suppresses reprogramming
    /// of the deadline register by timer operations called from
    /// notifications.
    handler_in_progress: GateCell<Traits, bool>,
}

impl<Traits: 'static> TimerGlobals<Traits> {
    pub const fn new() -> Self {
        Self {
            gate: GateState::new(),
            sentinel: TimerEntry::new(Notify::None),
            last_sync: GateCell::new(0),
            handler_in_progress: GateCell::new(false),
        }
    }
}

impl<Traits: 'static> Init for TimerGlobals<Traits> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();
}

impl<Traits: Port> fmt::Debug for TimerGlobals<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let lock = match lock_gate::<Traits>() {
            Ok(lock) => lock,
            Err(_) => return f.write_str("TimerGlobals(< locked >)"),
        };

        struct Deltas<'a, Traits: 'static>(&'a crate::gate::GateToken<Traits>);

        impl<Traits: Port> fmt::Debug for Deltas<'_, Traits> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.debug_list()
                    .entries(list::iter(self.0).map(|e| (e as *const _, e.remaining.get(self.0))))
                    .finish()
            }
        }

        f.debug_struct("TimerGlobals")
            .field("last_sync", &self.last_sync.get(&*lock))
            .field(
                "handler_in_progress",
                &self.handler_in_progress.get(&*lock),
            )
            .field("list", &Deltas(&*lock))
            .finish()
    }
}

/// Implements [`PortToTimer::init`].
///
/// [`PortToTimer::init`]: crate::PortToTimer::init
pub(crate) fn init<Traits: Port>() {
    // The precondition includes the gate being open, so this `unwrap` should
    // succeed
    let mut lock = lock_gate::<Traits>().unwrap();
    let g_timer = Traits::timer_globals();

    list::sentinel_link(lock.borrow_mut());
    g_timer
        .last_sync
        .replace(&mut *lock, Traits::tick_count());

    // Safety: The gate is closed
    unsafe { Traits::disarm_deadline() };
}

/// Ticks elapsed since the sync point.
fn ticks_since_sync<Traits: Port>(lock: GateTokenRefMut<'_, Traits>) -> Ticks {
    let last_sync = Traits::timer_globals().last_sync.get(&*lock);
    Traits::tick_count().wrapping_sub(last_sync)
}

/// Link `entry` to expire `delay` ticks from now and update the deadline
/// register if it became the head.
fn insert_timer<Traits: Port>(
    mut lock: GateTokenRefMut<'_, Traits>,
    entry: &'static TimerEntry<Traits>,
    delay: Ticks,
) {
    let g_timer = Traits::timer_globals();

    // An empty list has no deltas to keep, so move the sync point to now
    if list::first(lock.borrow_mut()).is_none() {
        g_timer
            .last_sync
            .replace(&mut *lock.borrow_mut(), Traits::tick_count());
    }

    let since_sync = ticks_since_sync(lock.borrow_mut());
    list::insert_ordered(lock.borrow_mut(), entry, delay.saturating_add(since_sync));

    let is_head = list::first(lock.borrow_mut()).map_or(false, |head| ptr::eq(head, entry));
    if is_head && !g_timer.handler_in_progress.get(&*lock) {
        pend_next_deadline(lock);
    }
}

/// Program the deadline register for the head of the list.
fn pend_next_deadline<Traits: Port>(mut lock: GateTokenRefMut<'_, Traits>) {
    let head = match list::first(lock.borrow_mut()) {
        Some(head) => head,
        None => {
            // Safety: The gate is closed
            unsafe { Traits::disarm_deadline() };
            return;
        }
    };

    let since_sync = ticks_since_sync(lock.borrow_mut());
    let delta = head.remaining.get(&*lock).saturating_sub(since_sync);

    // Safety: The gate is closed
    unsafe {
        if delta == 0 {
            Traits::pend_deadline();
        } else {
            Traits::set_deadline(delta.min(Traits::MAX_DEADLINE));
        }
    }
}

/// Implements [`PortToTimer::deadline_interrupt`].
///
/// Precondition: The gate is open, an interrupt context
///
/// [`PortToTimer::deadline_interrupt`]: crate::PortToTimer::deadline_interrupt
pub(crate) fn handle_deadline<Traits: Port>() {
    // Keep the timer interrupt masked until we are done. The gate token is
    // returned while each notification is delivered so that notifications
    // can use the timer API.
    let _gate = Gate::<Traits>::close();

    // The precondition includes the gate being open, so this `unwrap` should
    // succeed
    let mut lock = lock_gate::<Traits>().unwrap();
    let g_timer = Traits::timer_globals();

    // Bring the deltas up to date
    let now = Traits::tick_count();
    let last_sync = g_timer.last_sync.replace(&mut *lock, now);
    list::consume(lock.borrow_mut(), now.wrapping_sub(last_sync));

    g_timer.handler_in_progress.replace(&mut *lock, true);

    // Only the entries due at this point expire in this run. An entry that a
    // notification starts with no delay is due as well, but it's left for
    // the next run.
    let mut num_due = list::iter(&*lock)
        .take_while(|e| e.remaining.get(&*lock) == 0)
        .count();

    while num_due > 0 {
        let head = match list::first(lock.borrow_mut()) {
            Some(head) if head.remaining.get(&*lock) == 0 => head,
            _ => break,
        };
        num_due -= 1;

        list::unlink(lock.borrow_mut(), head);

        // Rearm relative to the sync point, not to the time at which the
        // previous expiry was actually handled
        let interval = head.interval.get(&*lock);
        if interval != 0 {
            list::insert_ordered(lock.borrow_mut(), head, interval);
        }

        let notify = head.notify;
        drop(lock);

        notify.deliver();

        // Notifications can't keep the token, so this `unwrap` should succeed
        lock = lock_gate::<Traits>().unwrap();
    }

    g_timer.handler_in_progress.replace(&mut *lock, false);

    pend_next_deadline(lock.borrow_mut());
}
