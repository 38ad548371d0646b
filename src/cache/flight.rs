//! Single-flight groups
//!
//! Collapses concurrent work for the same key: the first caller becomes the
//! leader and runs the work, later callers wait on a watch channel for the
//! leader's outcome. A leader that goes away without completing (dropped or
//! cancelled) closes the channel and waiters see `None`, so they can retry.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

struct Slot<V> {
    id: u64,
    tx: watch::Sender<Option<V>>,
}

struct Inner<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
    next_id: AtomicU64,
}

/// Map of in-flight operations keyed by `K`
pub struct SingleFlight<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for SingleFlight<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }
}

/// Result of [`SingleFlight::join`]
pub enum Join<K: Eq + Hash, V> {
    /// Caller owns the work and must `complete` the guard
    Leader(FlightGuard<K, V>),
    /// Work already in flight
    Follower(FlightWaiter<V>),
}

impl<K: Eq + Hash + Clone, V: Clone> SingleFlight<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Become leader for `key`, or attach to the flight already running
    pub fn join(&self, key: &K) -> Join<K, V> {
        let mut slots = self.inner.slots.lock();
        if let Some(slot) = slots.get(key) {
            return Join::Follower(FlightWaiter {
                rx: slot.tx.subscribe(),
            });
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, _) = watch::channel(None);
        slots.insert(key.clone(), Slot { id, tx });
        Join::Leader(FlightGuard {
            inner: Arc::clone(&self.inner),
            key: Some(key.clone()),
            id,
        })
    }

    /// Number of keys with work in flight
    pub fn len(&self) -> usize {
        self.inner.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.lock().is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.slots.lock().contains_key(key)
    }
}

/// Leadership of one flight. Dropping it without `complete` abandons the flight.
pub struct FlightGuard<K: Eq + Hash, V> {
    inner: Arc<Inner<K, V>>,
    key: Option<K>,
    id: u64,
}

impl<K: Eq + Hash, V> FlightGuard<K, V> {
    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    /// A waiter on this flight's outcome
    pub fn waiter(&self) -> Option<FlightWaiter<V>> {
        let slots = self.inner.slots.lock();
        let slot = slots.get(self.key.as_ref()?)?;
        (slot.id == self.id).then(|| FlightWaiter {
            rx: slot.tx.subscribe(),
        })
    }

    /// Publish the outcome to every waiter and end the flight
    pub fn complete(mut self, value: V) {
        if let Some(slot) = self.take_slot() {
            let _ = slot.tx.send(Some(value));
        }
    }

    fn take_slot(&mut self) -> Option<Slot<V>> {
        let key = self.key.take()?;
        let mut slots = self.inner.slots.lock();
        match slots.get(&key) {
            Some(slot) if slot.id == self.id => slots.remove(&key),
            _ => None,
        }
    }
}

impl<K: Eq + Hash, V> Drop for FlightGuard<K, V> {
    fn drop(&mut self) {
        // Dropping the sender wakes waiters with a closed channel.
        self.take_slot();
    }
}

/// Receiving side of a flight
pub struct FlightWaiter<V> {
    rx: watch::Receiver<Option<V>>,
}

impl<V: Clone> FlightWaiter<V> {
    /// Wait for the leader's outcome; `None` if the leader abandoned the flight
    pub async fn wait(mut self) -> Option<V> {
        let outcome = match self.rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_join_leads() {
        let flights: SingleFlight<String, u32> = SingleFlight::new();
        let key = "k".to_string();

        let Join::Leader(guard) = flights.join(&key) else {
            panic!("first join must lead");
        };
        let Join::Follower(waiter) = flights.join(&key) else {
            panic!("second join must follow");
        };
        assert!(flights.contains(&key));

        guard.complete(7);
        assert_eq!(waiter.wait().await, Some(7));
        assert!(flights.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_flight_releases_waiters() {
        let flights: SingleFlight<String, u32> = SingleFlight::new();
        let key = "k".to_string();

        let Join::Leader(guard) = flights.join(&key) else {
            panic!("first join must lead");
        };
        let Join::Follower(waiter) = flights.join(&key) else {
            panic!("second join must follow");
        };
        drop(guard);

        assert_eq!(waiter.wait().await, None);
        assert!(matches!(flights.join(&key), Join::Leader(_)));
    }

    #[tokio::test]
    async fn test_many_waiters_one_leader() {
        let flights: SingleFlight<u32, String> = SingleFlight::new();
        let Join::Leader(guard) = flights.join(&1) else {
            panic!("first join must lead");
        };

        let waiters: Vec<_> = (0..50)
            .map(|_| match flights.join(&1) {
                Join::Follower(w) => tokio::spawn(w.wait()),
                Join::Leader(_) => panic!("only one leader"),
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(5)).await;
        guard.complete("done".to_string());

        for w in waiters {
            assert_eq!(w.await.unwrap().as_deref(), Some("done"));
        }
    }

    #[tokio::test]
    async fn test_guard_waiter() {
        let flights: SingleFlight<u32, u32> = SingleFlight::new();
        let Join::Leader(guard) = flights.join(&1) else {
            panic!("first join must lead");
        };
        let own = guard.waiter().unwrap();
        guard.complete(3);
        assert_eq!(own.wait().await, Some(3));
    }
}
