//! Request sequence tokens
//!
//! Superseded requests are not cancelled. Each request takes a ticket before it
//! starts, and its result is applied only if no newer ticket has been issued
//! in the meantime.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing ticket dispenser
#[derive(Debug, Default)]
pub struct RequestSequence {
    latest: AtomicU64,
}

/// Proof that a request was started at a given point in the sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

impl RequestSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a ticket newer than every ticket issued before
    pub fn next(&self) -> Ticket {
        Ticket(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// True if no ticket has been issued after `ticket`
    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.latest.load(Ordering::SeqCst) == ticket.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newer_ticket_supersedes_older() {
        let seq = RequestSequence::new();
        let first = seq.next();
        assert!(seq.is_current(first));

        let second = seq.next();
        assert!(second > first);
        assert!(!seq.is_current(first));
        assert!(seq.is_current(second));
    }

    #[tokio::test]
    async fn test_slow_stale_result_is_detected() {
        let seq = std::sync::Arc::new(RequestSequence::new());

        let slow = {
            let seq = seq.clone();
            let ticket = seq.next();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                seq.is_current(ticket)
            })
        };
        let fast_ticket = seq.next();

        assert!(!slow.await.unwrap(), "older request must be reported stale");
        assert!(seq.is_current(fast_ticket));
    }
}
