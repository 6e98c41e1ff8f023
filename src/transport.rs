//! Mailbox transport boundary.
//!
//! The master core owns the datagram ring; the handler only queues mailbox
//! operations and polls their outcome on a later cycle. Nothing here may
//! block.

use bytes::Bytes;

use crate::types::SlaveId;

/// Token for a queued mailbox operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingHandle(pub u64);

/// Outcome of a previously queued mailbox operation.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// Still on the wire; poll again next cycle.
    Pending,
    /// Completed. Writes carry an empty payload; reads carry the mailbox
    /// payload, read checks the sync-manager status octet.
    Done(Bytes),
    /// The operation failed; the reason is for logging only.
    Failed(String),
}

/// Non-blocking mailbox access to slaves, provided by the master core.
///
/// `queue_*` only places a datagram in the cycle's frame; the result shows
/// up through [`MailboxTransport::poll`] one or more cycles later.
pub trait MailboxTransport {
    /// Queue a write into the slave's inbound mailbox.
    fn queue_write(&mut self, slave: SlaveId, payload: Bytes) -> PendingHandle;

    /// Queue a fetch of the slave's sync-manager status, to learn whether
    /// its outbound mailbox holds data.
    fn queue_read_check(&mut self, slave: SlaveId) -> PendingHandle;

    /// Queue a read of the slave's outbound mailbox.
    fn queue_read(&mut self, slave: SlaveId) -> PendingHandle;

    /// Poll the outcome of a queued operation.
    fn poll(&mut self, handle: PendingHandle) -> PollOutcome;
}

/// Bit 3 of the sync-manager status octet is set while the slave's outbound
/// mailbox is full.
pub fn mailbox_full(status: &[u8]) -> bool {
    status.first().is_some_and(|octet| octet & 0x08 != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_full_bit() {
        assert!(mailbox_full(&[0x08]));
        assert!(mailbox_full(&[0x0F]));
        assert!(!mailbox_full(&[0x00]));
        assert!(!mailbox_full(&[0xF7]));
        assert!(!mailbox_full(&[]));
    }
}
