//! One-way shutdown latch.

use std::sync::Arc;

use tokio::sync::watch;

/// Latch that flips to "shutting down" exactly once.
///
/// Clones share the same state. Triggering is idempotent: only the first
/// call reports that it flipped the latch.
#[derive(Debug, Clone)]
pub struct ShutdownLatch {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownLatch {
    /// Create an open latch.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Flip the latch. Returns `true` only for the call that flipped it.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|down| {
            if *down {
                false
            } else {
                *down = true;
                true
            }
        })
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until shutdown is requested.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|down| *down).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_is_one_way_and_idempotent() {
        let latch = ShutdownLatch::new();
        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.triggered().await })
        };

        assert!(!latch.is_triggered());
        assert!(latch.trigger());
        assert!(!latch.clone().trigger());
        assert!(latch.is_triggered());
        tokio_test::assert_ok!(waiter.await);

        // Already-triggered latches resolve immediately.
        latch.triggered().await;
    }
}
