//! Single-fire broadcast signal.
//!
//! A [`Signal`] is a channel nobody ever sends on. Firing it drops the only
//! sender, after which every current and future receiver observes a
//! disconnect. Waiters can therefore block on it directly, or put
//! [`Signal::receiver`] into a `crossbeam_channel::select!` next to a mailbox.
use std::sync::{Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};

#[derive(Debug)]
pub struct Signal {
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
        }
    }

    /// Fires the signal. Returns `true` only for the call that actually fired it.
    pub fn fire(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn is_fired(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Blocks until the signal fires.
    pub fn wait(&self) {
        let _ = self.receiver.recv();
    }

    /// Receiver that becomes ready (disconnected) once the signal fires.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}
