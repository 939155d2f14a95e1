#![allow(clippy::declare_interior_mutable_const)]
use core::sync::atomic::AtomicBool;

/// Trait for types having a constant default value. This is essentially a
/// constant version of `Default`.
///
/// Timer lists, timers, and mailboxes live in `static`s, so every piece of
/// their state must be constructible in a constant context.
pub trait Init {
    /// The default value.
    const INIT: Self;
}

impl<T> Init for Option<T> {
    const INIT: Self = None;
}

impl<T: Init, I: Init> Init for tokenlock::UnsyncTokenLock<T, I> {
    const INIT: Self = Self::new(I::INIT, T::INIT);
}

impl<Tag: ?Sized> Init for tokenlock::SingletonTokenId<Tag> {
    const INIT: Self = Self::new();
}

impl Init for bool {
    const INIT: Self = false;
}

/// Also covers [`Ticks`](crate::Ticks).
impl Init for u32 {
    const INIT: Self = 0;
}

impl Init for usize {
    const INIT: Self = 0;
}

impl Init for AtomicBool {
    const INIT: Self = AtomicBool::new(false);
}
