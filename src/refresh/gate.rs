use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds how many refreshes may run at once across all keys.
#[derive(Clone, Debug)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held refresh slot, released on drop.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait up to `timeout` for a slot. `None` means the caller must fall back.
    pub async fn acquire(&self, timeout: Duration) -> Option<GatePermit> {
        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        match tokio::time::timeout(timeout, acquire).await {
            Ok(Ok(permit)) => Some(GatePermit { _permit: permit }),
            Ok(Err(_closed)) => None,
            Err(_elapsed) => None,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out_when_full() {
        let gate = ConcurrencyGate::new(2);
        let first = gate.acquire(Duration::from_millis(10)).await;
        let second = gate.acquire(Duration::from_millis(10)).await;
        assert!(first.is_some() && second.is_some());
        assert_eq!(gate.in_flight(), 2);

        assert!(gate.acquire(Duration::from_millis(500)).await.is_none());

        drop(first);
        assert_eq!(gate.in_flight(), 1);
        assert!(gate.acquire(Duration::from_millis(10)).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_gets_released_slot() {
        let gate = ConcurrencyGate::new(1);
        let held = gate.acquire(Duration::from_millis(10)).await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire(Duration::from_secs(5)).await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(held);

        assert!(waiter.await.unwrap());
    }
}
