// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Single-Flight
//!
//! Keyed de-duplication of concurrent async work: the first caller for a key
//! starts the work, every caller that arrives while it is in flight awaits the
//! same result.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** The one synchronization primitive behind both the
//!   per-conversation compression lock and the per-cache-key pending
//!   connection map.
//!
//! The map only holds weak handles. Callers hold the strong ones, so an entry
//! whose callers were all cancelled cannot pin the work. The work itself
//! removes its entry when it finishes or is dropped, which means a caller that
//! arrives afterwards always starts a fresh attempt.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use parking_lot::Mutex;

type SharedWork<V> = Shared<BoxFuture<'static, V>>;

struct Entry<V> {
    generation: u64,
    work: WeakShared<BoxFuture<'static, V>>,
}

/// Whether this caller started the work or joined an attempt already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    Owner,
    Joined,
}

pub struct SingleFlight<K, V> {
    inflight: Arc<Mutex<HashMap<K, Entry<V>>>>,
    next_generation: Arc<AtomicU64>,
}

impl<K, V> Clone for SingleFlight<K, V> {
    fn clone(&self) -> Self {
        Self {
            inflight: Arc::clone(&self.inflight),
            next_generation: Arc::clone(&self.next_generation),
        }
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Runs `make()` unless work for `key` is already in flight, in which case
    /// the caller awaits that work instead. `make` is only called by the owner.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        self.run_with_role(key, make).await.0
    }

    pub async fn run_with_role<F, Fut>(&self, key: K, make: F) -> (V, FlightRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (work, role) = self.join_or_start(key, make);
        (work.await, role)
    }

    fn join_or_start<F, Fut>(&self, key: K, make: F) -> (SharedWork<V>, FlightRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let mut map = self.inflight.lock();

        if let Some(existing) = map.get(&key).and_then(|entry| entry.work.upgrade()) {
            return (existing, FlightRole::Joined);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let inflight = Arc::clone(&self.inflight);
        let owned_key = key.clone();
        let inner = make();

        let work: SharedWork<V> = async move {
            let _release = scopeguard::guard((), move |_| {
                let mut map = inflight.lock();
                if map.get(&owned_key).map(|e| e.generation) == Some(generation) {
                    map.remove(&owned_key);
                }
            });
            inner.await
        }
        .boxed()
        .shared();

        // A freshly built Shared has not completed, so downgrade always succeeds.
        if let Some(weak) = work.downgrade() {
            map.insert(key, Entry { generation, work: weak });
        }

        (work, FlightRole::Owner)
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        // Upgraded handles are dropped outside the lock: dropping the last one
        // runs the release guard, which takes the lock itself.
        let handle = self.inflight.lock().get(key).and_then(|entry| entry.work.upgrade());
        handle.is_some()
    }

    /// Number of live entries. Entries whose callers all went away count as gone.
    pub fn in_flight_len(&self) -> usize {
        let live: Vec<SharedWork<V>> = {
            let map = self.inflight.lock();
            map.values().filter_map(|entry| entry.work.upgrade()).collect()
        };
        live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let flight: SingleFlight<String, usize> = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = flight.clone();
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                flight
                    .run("conv-1".to_string(), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        7
                    })
                    .await
            }));
        }

        while !flight.is_in_flight(&"conv-1".to_string()) {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_waiters();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flight.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_entry_removed_after_completion() {
        let flight: SingleFlight<&'static str, Result<u8, String>> = SingleFlight::new();

        let (first, role) = flight
            .run_with_role("k", || async { Err::<u8, String>("refused".into()) })
            .await;
        assert!(first.is_err());
        assert_eq!(role, FlightRole::Owner);
        assert!(!flight.is_in_flight(&"k"));

        let (second, role) = flight.run_with_role("k", || async { Ok::<u8, String>(1) }).await;
        assert_eq!(second, Ok(1));
        assert_eq!(role, FlightRole::Owner);
    }

    #[tokio::test]
    async fn test_cancelled_owner_does_not_pin_entry() {
        let flight: SingleFlight<&'static str, u8> = SingleFlight::new();

        let pending = flight.clone();
        let handle = tokio::spawn(async move {
            pending
                .run("k", || async {
                    futures::future::pending::<()>().await;
                    0
                })
                .await
        });
        while !flight.is_in_flight(&"k") {
            tokio::task::yield_now().await;
        }
        handle.abort();
        let _ = handle.await;

        assert!(!flight.is_in_flight(&"k"));
        assert_eq!(flight.run("k", || async { 5 }).await, 5);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let flight: SingleFlight<u32, u32> = SingleFlight::new();
        let (a, b) = tokio::join!(flight.run(1, || async { 10 }), flight.run(2, || async { 20 }));
        assert_eq!((a, b), (10, 20));
    }
}
