//! Timer interrupt gate
//!
//! Closing the gate masks the timer interrupt. The kernel additionally lends
//! out a unique token while it holds the gate, and every piece of mutable
//! timer state lives in a [`GateCell`] that can only be opened with that
//! token.
use core::{
    fmt,
    marker::PhantomData,
    ops,
    sync::atomic::{AtomicBool, Ordering},
};
use tokenlock::UnsyncTokenLock;

use crate::{error::BadContextError, utils::Init, Port, PortGate};

pub(crate) struct GateTag<Traits>(Traits);

/// The key that "unlocks" [`GateCell`].
pub(crate) type GateToken<Traits> = tokenlock::UnsyncSingletonToken<GateTag<Traits>>;

/// The keyhole type for [`UnsyncTokenLock`] that can be "unlocked" by
/// [`GateToken`].
pub(crate) type GateKeyhole<Traits> = tokenlock::SingletonTokenId<GateTag<Traits>>;

/// Borrowed version of [`GateGuard`]. This is equivalent to
/// `&'a mut GateGuard` but does not consume memory.
///
/// When you pass this to a function, call [`borrow_mut`] first if you need
/// it afterwards; it is not reborrowed automatically.
///
/// [`borrow_mut`]: tokenlock::UnsyncSingletonTokenRefMut::borrow_mut
pub(crate) type GateTokenRefMut<'a, Traits> =
    tokenlock::UnsyncSingletonTokenRefMut<'a, GateTag<Traits>>;

/// Cell type that can be accessed by [`GateToken`] (which can be obtained
/// by [`lock_gate`]).
pub(crate) struct GateCell<Traits, T: ?Sized>(UnsyncTokenLock<T, GateKeyhole<Traits>>);

impl<Traits, T> GateCell<Traits, T> {
    pub(crate) const fn new(x: T) -> Self {
        Self(UnsyncTokenLock::new(GateKeyhole::INIT, x))
    }
}

impl<Traits: Port, T: fmt::Debug> fmt::Debug for GateCell<Traits, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Ok(lock) = lock_gate::<Traits>() {
            f.write_str("GateCell(")?;
            self.0.read(&*lock).fmt(f)?;
            f.write_str(")")
        } else {
            f.write_str("GateCell(< locked >)")
        }
    }
}

impl<Traits, T: Init> Init for GateCell<Traits, T> {
    const INIT: Self = Self(Init::INIT);
}

impl<Traits, T> ops::Deref for GateCell<Traits, T> {
    type Target = UnsyncTokenLock<T, GateKeyhole<Traits>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<Traits, T> ops::DerefMut for GateCell<Traits, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Per-port bookkeeping for the gate token.
pub struct GateState {
    /// `true` while a [`GateGuard`] exists. Only accessed with the gate
    /// closed.
    token_lent: AtomicBool,
}

impl GateState {
    pub(crate) const fn new() -> Self {
        Self {
            token_lent: AtomicBool::new(false),
        }
    }
}

impl Init for GateState {
    const INIT: Self = Self::new();
}

impl fmt::Debug for GateState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("GateState")
            .field("token_lent", &self.token_lent.load(Ordering::Relaxed))
            .finish()
    }
}

/// Close the gate and borrow the gate token.
/// Return `BadContext` if the token is already lent out, i.e., a kernel
/// critical section would be reentered. The gate is left as it was in this
/// case.
pub(crate) fn lock_gate<Traits: Port>() -> Result<GateGuard<Traits>, BadContextError> {
    // Safety: Paired with `restore_timer_interrupt` below or in
    //         `GateGuard::drop`
    let mask = unsafe { Traits::disable_timer_interrupt() };

    let state = &Traits::timer_globals().gate;
    if state.token_lent.swap(true, Ordering::Relaxed) {
        // Safety: Undoes the nested disable above
        unsafe { Traits::restore_timer_interrupt(mask) };
        Err(BadContextError::BadContext)
    } else {
        Ok(GateGuard {
            mask,
            // Safety: `token_lent` was clear, so no other token exists
            token: unsafe { GateToken::new_unchecked() },
        })
    }
}

/// RAII guard for a closed gate with the gate token borrowed.
///
/// [`GateToken`] can be borrowed from this type.
pub(crate) struct GateGuard<Traits: Port> {
    mask: Traits::Mask,
    token: GateToken<Traits>,
}

impl<Traits: Port> GateGuard<Traits> {
    /// Construct a [`GateTokenRefMut`] by borrowing `self`.
    pub(crate) fn borrow_mut(&mut self) -> GateTokenRefMut<'_, Traits> {
        self.token.borrow_mut()
    }
}

impl<Traits: Port> Drop for GateGuard<Traits> {
    fn drop(&mut self) {
        Traits::timer_globals()
            .gate
            .token_lent
            .store(false, Ordering::Relaxed);

        // Safety: `self.mask` was returned by the matching
        //         `disable_timer_interrupt` call
        unsafe { Traits::restore_timer_interrupt(self.mask) };
    }
}

impl<Traits: Port> ops::Deref for GateGuard<Traits> {
    type Target = GateToken<Traits>;
    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl<Traits: Port> ops::DerefMut for GateGuard<Traits> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.token
    }
}

/// RAII guard that keeps the timer interrupt masked.
///
/// Gates nest: dropping an inner `Gate` restores exactly the state that was
/// in effect when it was closed, so the interrupt stays masked until the
/// outermost `Gate` is dropped. Timer operations may be called while a `Gate`
/// is held. They observe a consistent timer list and no deadline interrupt
/// is delivered until the gate opens again.
///
/// ```rust,ignore
/// let gate = Gate::<MyPort>::close();
/// TIMER_A.stop().ok();
/// TIMER_B.start(100, 0)?;
/// drop(gate); // a pending deadline interrupt is taken here
/// ```
#[must_use = "the gate opens again as soon as the guard is dropped"]
pub struct Gate<Traits: PortGate> {
    mask: Traits::Mask,
    /// Restoring the mask from another context is meaningless.
    _no_send: PhantomData<*const ()>,
}

impl<Traits: PortGate> Gate<Traits> {
    /// Mask the timer interrupt until the returned guard is dropped.
    pub fn close() -> Self {
        Self {
            // Safety: Paired with `restore_timer_interrupt` in `drop`
            mask: unsafe { Traits::disable_timer_interrupt() },
            _no_send: PhantomData,
        }
    }

    /// Get a flag indicating whether the timer interrupt is currently masked
    /// in the calling context.
    pub fn is_closed() -> bool {
        Traits::is_timer_interrupt_disabled()
    }
}

impl<Traits: PortGate> Drop for Gate<Traits> {
    fn drop(&mut self) {
        // Safety: `self.mask` was returned by the matching
        //         `disable_timer_interrupt` call
        unsafe { Traits::restore_timer_interrupt(self.mask) };
    }
}

impl<Traits: PortGate> fmt::Debug for Gate<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Gate")
    }
}
