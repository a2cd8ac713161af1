/// Default capacity of every mailbox (outbox, socket inbox, accept queue).
pub const DEFAULT_CAPACITY: usize = 128;

/// Mailbox sizing for a [`Transport`](crate::Transport).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Shared outbound mailbox drained by the egress dispatcher.
    pub outbox_capacity: usize,
    /// Private inbound mailbox of each socket.
    pub inbox_capacity: usize,
    /// Queue of accepted sockets per listener.
    pub accept_capacity: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            outbox_capacity: DEFAULT_CAPACITY,
            inbox_capacity: DEFAULT_CAPACITY,
            accept_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl TransportOptions {
    pub fn with_outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity.max(1);
        self
    }

    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity.max(1);
        self
    }

    pub fn with_accept_capacity(mut self, capacity: usize) -> Self {
        self.accept_capacity = capacity.max(1);
        self
    }

    /// Clamps every capacity to at least one slot.
    pub(crate) fn normalized(self) -> Self {
        Self {
            outbox_capacity: self.outbox_capacity.max(1),
            inbox_capacity: self.inbox_capacity.max(1),
            accept_capacity: self.accept_capacity.max(1),
        }
    }
}
