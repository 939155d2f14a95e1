//! The delta-encoded timer ring
//!
//! The ring is anchored by a sentinel entry owned by [`TimerGlobals`].
//! `sentinel.next == sentinel` means the ring is empty. Each linked entry's
//! `remaining` holds the ticks between its predecessor's deadline (or the
//! sync point, for the head) and its own.
//!
//! [`TimerGlobals`]: super::TimerGlobals
use core::{fmt, ptr, sync::atomic::Ordering};

use super::TimerEntry;
use crate::{
    gate::{GateToken, GateTokenRefMut},
    utils::Ident,
    Port, Ticks,
};

pub(super) type EntryRef<Traits> = Ident<&'static TimerEntry<Traits>>;

/// Circular links of a [`TimerEntry`].
pub(super) struct Link<Traits: 'static> {
    pub(super) prev: EntryRef<Traits>,
    pub(super) next: EntryRef<Traits>,
}

impl<Traits: 'static> Clone for Link<Traits> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Traits: 'static> Copy for Link<Traits> {}

impl<Traits: 'static> fmt::Debug for Link<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Link")
            .field("prev", &self.prev)
            .field("next", &self.next)
            .finish()
    }
}

#[cold]
#[track_caller]
pub(super) fn inconsistent() -> ! {
    panic!("timer list is inconsistent")
}

#[inline]
pub(super) fn sentinel<Traits: Port>() -> &'static TimerEntry<Traits> {
    &Traits::timer_globals().sentinel
}

/// Get the sentinel's link, closing the ring on first use.
pub(super) fn sentinel_link<Traits: Port>(mut lock: GateTokenRefMut<'_, Traits>) -> Link<Traits> {
    let sentinel = sentinel::<Traits>();
    if let Some(link) = sentinel.link.get(&*lock) {
        link
    } else {
        let link = Link {
            prev: Ident(sentinel),
            next: Ident(sentinel),
        };
        sentinel.link.replace(&mut *lock.borrow_mut(), Some(link));
        link
    }
}

fn link_of<Traits: Port>(
    token: &GateToken<Traits>,
    entry: &'static TimerEntry<Traits>,
) -> Link<Traits> {
    match entry.link.get(token) {
        Some(link) => link,
        None => inconsistent(),
    }
}

/// Get the earliest entry, if any.
pub(super) fn first<Traits: Port>(
    mut lock: GateTokenRefMut<'_, Traits>,
) -> Option<&'static TimerEntry<Traits>> {
    let next = sentinel_link(lock.borrow_mut()).next.0;
    if ptr::eq(next, sentinel::<Traits>()) {
        None
    } else {
        Some(next)
    }
}

/// Link `entry` so that its deadline is `delay` ticks after the sync point.
/// Entries with an equal deadline stay ahead of it.
pub(super) fn insert_ordered<Traits: Port>(
    mut lock: GateTokenRefMut<'_, Traits>,
    entry: &'static TimerEntry<Traits>,
    delay: Ticks,
) {
    debug_assert!(entry.link.read(&*lock).is_none());

    let sentinel = sentinel::<Traits>();
    let mut remainder = delay;
    let mut cursor = sentinel_link(lock.borrow_mut()).next.0;

    while !ptr::eq(cursor, sentinel) {
        let delta = cursor.remaining.get(&*lock);
        if delta > remainder {
            break;
        }
        remainder -= delta;
        cursor = link_of(&*lock, cursor).next.0;
    }

    // Splice `entry` in before `cursor`
    let prev = link_of(&*lock, cursor).prev;
    entry.link.replace(
        &mut *lock,
        Some(Link {
            prev,
            next: Ident(cursor),
        }),
    );
    match prev.0.link.write(&mut *lock) {
        Some(link) => link.next = Ident(entry),
        None => inconsistent(),
    }
    match cursor.link.write(&mut *lock) {
        Some(link) => link.prev = Ident(entry),
        None => inconsistent(),
    }

    entry.remaining.replace(&mut *lock, remainder);
    if !ptr::eq(cursor, sentinel) {
        // `remainder < delta` by the loop condition
        cursor
            .remaining
            .replace_with(&mut *lock, |delta| *delta - remainder);
    }

    entry.scheduled.store(true, Ordering::Release);
}

/// Unlink `entry` and clear its link. The successor's delta is not touched.
///
/// Returns the successor.
pub(super) fn unlink<Traits: Port>(
    mut lock: GateTokenRefMut<'_, Traits>,
    entry: &'static TimerEntry<Traits>,
) -> &'static TimerEntry<Traits> {
    let Link { prev, next } = match entry.link.replace(&mut *lock, None) {
        Some(link) => link,
        None => inconsistent(),
    };

    match prev.0.link.write(&mut *lock) {
        Some(link) => link.next = next,
        None => inconsistent(),
    }
    match next.0.link.write(&mut *lock) {
        Some(link) => link.prev = prev,
        None => inconsistent(),
    }

    entry.scheduled.store(false, Ordering::Release);

    next.0
}

/// Subtract `elapsed` ticks from the ring, spilling whatever the head cannot
/// absorb into the following entries. Expired entries end up with a zero
/// delta at the front of the ring.
pub(super) fn consume<Traits: Port>(mut lock: GateTokenRefMut<'_, Traits>, mut elapsed: Ticks) {
    let sentinel = sentinel::<Traits>();
    let mut cursor = sentinel_link(lock.borrow_mut()).next.0;

    while elapsed > 0 && !ptr::eq(cursor, sentinel) {
        let delta = cursor.remaining.get(&*lock);
        let used = delta.min(elapsed);
        cursor.remaining.replace(&mut *lock, delta - used);
        elapsed -= used;
        cursor = link_of(&*lock, cursor).next.0;
    }
}

/// Sum of the deltas from the head up to and including `entry`.
pub(super) fn prefix_sum<Traits: Port>(
    token: &GateToken<Traits>,
    entry: &'static TimerEntry<Traits>,
) -> Ticks {
    let mut sum: Ticks = 0;
    for e in iter(token) {
        sum = sum.saturating_add(e.remaining.get(token));
        if ptr::eq(e, entry) {
            return sum;
        }
    }
    inconsistent()
}

/// Iterate over the linked entries in deadline order.
pub(super) fn iter<Traits: Port>(token: &GateToken<Traits>) -> Iter<'_, Traits> {
    let sentinel = sentinel::<Traits>();
    let cursor = match sentinel.link.read(token) {
        Some(link) if !ptr::eq(link.next.0, sentinel) => Some(link.next.0),
        _ => None,
    };
    Iter { token, cursor }
}

pub(super) struct Iter<'a, Traits: 'static> {
    token: &'a GateToken<Traits>,
    cursor: Option<&'static TimerEntry<Traits>>,
}

impl<Traits: Port> Iterator for Iter<'_, Traits> {
    type Item = &'static TimerEntry<Traits>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.cursor?;
        let next = link_of(self.token, entry).next.0;
        self.cursor = if ptr::eq(next, sentinel::<Traits>()) {
            None
        } else {
            Some(next)
        };
        Some(entry)
    }
}
