//! The "next snapshot" slot shared by the receive and apply duties.
//!
//! Holds at most one snapshot. Offering a new one replaces whatever is still
//! waiting, and the wake signal stores at most one permit, so any number of
//! reconfigures arriving between two applies cost exactly one apply.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::Notify;

use crate::protocol::ConfigSnapshot;

/// A received snapshot together with the payload it arrived in.
#[derive(Debug)]
pub struct PendingApply {
    pub snapshot: ConfigSnapshot,
    /// Encoded reconfigure payload, written to the cache after a successful apply.
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct PendingSlot {
    slot: ArcSwapOption<PendingApply>,
    wake: Notify,
}

impl PendingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `next`, replacing any snapshot not yet applied, and signal the wake.
    ///
    /// Returns true if an unapplied snapshot was replaced.
    pub fn offer(&self, next: PendingApply) -> bool {
        let replaced = self.slot.swap(Some(Arc::new(next))).is_some();
        self.wake.notify_one();
        replaced
    }

    /// The waiting snapshot, left in place.
    pub fn peek(&self) -> Option<Arc<PendingApply>> {
        self.slot.load_full()
    }

    /// Clear the slot if it still holds `applied`. A newer snapshot stays for the next wake.
    pub fn clear_if(&self, applied: &Arc<PendingApply>) -> bool {
        let expected = Some(Arc::clone(applied));
        let previous = self.slot.compare_and_swap(&expected, None::<Arc<PendingApply>>);
        matches!(&*previous, Some(current) if Arc::ptr_eq(current, applied))
    }

    /// Wait for the wake signal for at most `poll`. Returns false on timeout.
    pub async fn wait(&self, poll: Duration) -> bool {
        tokio::time::timeout(poll, self.wake.notified()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending(n: u64) -> PendingApply {
        PendingApply {
            snapshot: ConfigSnapshot::new(json!({ "version": n })),
            payload: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_offers_wakes_once_with_latest() {
        let slot = PendingSlot::new();
        assert!(!slot.offer(pending(1)));
        assert!(slot.offer(pending(2)));
        assert!(slot.offer(pending(3)));

        assert!(slot.wait(Duration::from_secs(1)).await);
        let next = slot.peek().unwrap();
        assert_eq!(next.snapshot.config_table(), &json!({ "version": 3 }));
        assert!(slot.clear_if(&next));

        assert!(!slot.wait(Duration::from_secs(1)).await);
        assert!(slot.peek().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_offer_survives_clear() {
        let slot = PendingSlot::new();
        slot.offer(pending(1));
        assert!(slot.wait(Duration::from_secs(1)).await);
        let applying = slot.peek().unwrap();

        slot.offer(pending(2));
        assert!(!slot.clear_if(&applying));

        assert!(slot.wait(Duration::from_secs(1)).await);
        let next = slot.peek().unwrap();
        assert_eq!(next.snapshot.config_table(), &json!({ "version": 2 }));
    }

    #[test]
    fn peek_shares_the_stored_snapshot() {
        let slot = PendingSlot::new();
        slot.offer(pending(7));
        let first = slot.peek().unwrap();
        let second = slot.peek().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(slot.clear_if(&second));
        assert!(!slot.clear_if(&first));
    }
}
