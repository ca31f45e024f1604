//! Per-key deduplication of concurrent computations.
//!
//! The first caller for a key spawns the computation and registers a shared channel for its
//! result; later callers for the same key receive a clone of that channel. The computation
//! runs as its own task, so a caller that gives up waiting does not cancel it for the others.

use crate::utils::CallOnDrop;
use futures::future::{FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::trace;

type ResultChannel<T> = Shared<oneshot::Receiver<T>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("computation ended without producing a result")]
pub struct FlightAborted;

struct Ticket<T> {
    started_at: Instant,
    channel: ResultChannel<T>,
}

pub struct SingleFlight<K, T> {
    in_flight: Arc<Mutex<HashMap<K, Ticket<T>>>>,
}

impl<K, T> Default for SingleFlight<K, T> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// A handle on a running computation.
pub struct Flight<T> {
    /// `true` when this caller attached to a computation started by someone else.
    pub joined: bool,
    channel: ResultChannel<T>,
}

impl<T: Clone> Flight<T> {
    pub async fn wait(self) -> Result<T, FlightAborted> {
        self.channel.await.map_err(|_| FlightAborted)
    }
}

fn lock<K, T>(map: &Mutex<HashMap<K, Ticket<T>>>) -> MutexGuard<'_, HashMap<K, Ticket<T>>> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `computation` unless one is already in flight for `key`, in which case the
    /// caller is attached to the running one and `computation` is dropped unpolled.
    ///
    /// NOTE: This function is not `async` on purpose, the computation is spawned eagerly.
    pub fn run_exclusive<F>(&self, key: K, computation: F) -> Flight<T>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let mut in_flight = lock(&self.in_flight);
        if let Some(ticket) = in_flight.get(&key) {
            trace!(
                elapsed = ?ticket.started_at.elapsed(),
                "joined in-flight computation"
            );
            return Flight {
                joined: true,
                channel: ticket.channel.clone(),
            };
        }

        let (sender, receiver) = oneshot::channel();
        let channel = receiver.shared();
        in_flight.insert(
            key.clone(),
            Ticket {
                started_at: Instant::now(),
                channel: channel.clone(),
            },
        );
        drop(in_flight);

        let registry = Arc::clone(&self.in_flight);
        let remove_ticket = CallOnDrop::new(move || {
            lock(&registry).remove(&key);
        });

        tokio::spawn(async move {
            let output = computation.await;
            // Evict before delivering: callers either get a channel that will receive data,
            // or they start a new computation.
            drop(remove_ticket);
            sender.send(output).ok();
        });

        Flight {
            joined: false,
            channel,
        }
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        lock(&self.in_flight).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_computation() {
        let flights: SingleFlight<&'static str, Result<u32, String>> = SingleFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let runs = runs.clone();
                flights.run_exclusive("AAPL", async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(7)
                })
            })
            .collect();

        assert_eq!(handles.iter().filter(|f| !f.joined).count(), 1);
        for flight in handles {
            assert_eq!(flight.wait().await, Ok(Ok(7)));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(flights.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_reach_every_waiter() {
        let flights: SingleFlight<&'static str, Result<u32, String>> = SingleFlight::new();
        let first = flights.run_exclusive("TSLA", async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err("upstream 500".to_string())
        });
        let second = flights.run_exclusive("TSLA", async { Ok(1) });

        assert!(second.joined);
        assert_eq!(first.wait().await, Ok(Err("upstream 500".to_string())));
        assert_eq!(second.wait().await, Ok(Err("upstream 500".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_waiter_does_not_cancel() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counted = runs.clone();
        let impatient = flights.run_exclusive("MSFT", async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            counted.fetch_add(1, Ordering::SeqCst);
            3
        });
        let patient = flights.run_exclusive("MSFT", async { 0 });

        let gave_up = tokio::time::timeout(Duration::from_millis(100), impatient.wait()).await;
        assert!(gave_up.is_err());

        assert_eq!(patient.wait().await, Ok(3));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_computation_after_settle() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();
        assert_eq!(flights.run_exclusive("NVDA", async { 1 }).wait().await, Ok(1));
        assert!(!flights.is_in_flight(&"NVDA"));

        let again = flights.run_exclusive("NVDA", async { 2 });
        assert!(!again.joined);
        assert_eq!(again.wait().await, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_computation_is_reported() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();
        async fn explode() -> u32 {
            panic!("boom")
        }

        let flight = flights.run_exclusive("GME", explode());
        assert_eq!(flight.wait().await, Err(FlightAborted));
        assert!(!flights.is_in_flight(&"GME"));
    }
}
