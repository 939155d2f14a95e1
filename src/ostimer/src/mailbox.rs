//! Single-slot mailboxes
use core::fmt;

use crate::{
    error::{RecvError, SendError},
    gate::{lock_gate, GateCell},
    utils::Init,
    Port,
};

/// A mailbox holding at most one `usize` message.
///
/// Timers post to a mailbox through [`Notify::Message`]. Sending never
/// blocks: a message sent to a full mailbox is rejected.
///
/// [`Notify::Message`]: crate::Notify::Message
pub struct Mailbox<Traits> {
    slot: GateCell<Traits, Option<usize>>,
}

impl<Traits> Mailbox<Traits> {
    /// Construct an empty mailbox.
    pub const fn new() -> Self {
        Self {
            slot: GateCell::new(None),
        }
    }
}

impl<Traits> Init for Mailbox<Traits> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();
}

impl<Traits: Port> Mailbox<Traits> {
    /// Store `message` in the mailbox.
    pub fn send(&self, message: usize) -> Result<(), SendError> {
        let mut lock = lock_gate::<Traits>()?;
        let slot = self.slot.write(&mut *lock);
        if slot.is_some() {
            return Err(SendError::QueueOverflow);
        }
        *slot = Some(message);
        Ok(())
    }

    /// Take the message out of the mailbox.
    pub fn try_recv(&self) -> Result<usize, RecvError> {
        let mut lock = lock_gate::<Traits>()?;
        self.slot
            .replace(&mut *lock, None)
            .ok_or(RecvError::QueueEmpty)
    }

    /// Get a flag indicating whether the mailbox holds a message.
    pub fn is_full(&self) -> bool {
        lock_gate::<Traits>().map_or(false, |lock| self.slot.read(&*lock).is_some())
    }
}

impl<Traits: Port> fmt::Debug for Mailbox<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Mailbox").field("slot", &self.slot).finish()
    }
}
