//! Per-shard admission control: a bounded active set, a bounded FIFO
//! queue, and a delayed-removal set.
//!
//! [`ShardStore`] is generic over key and value so the same structure
//! backs both the session store (keyed by token) and the connection
//! store (keyed by connection id).
//!
//! # Lifecycle
//!
//! ```text
//! try_add ──→ Accepted ──────────────┐
//!    │                               │  mark_for_delayed_removal
//!    ├──→ Queued ──(slot frees)──→ Accepted
//!    │       │                       │
//!    │       └──(mark + grace)───────┤
//!    └──→ Rejected                   ▼
//!                          run_cleanup_pass (age >= grace)
//!                                    │
//!                                    ▼
//!                        hard delete, promote queue front
//! ```
//!
//! # Concurrency
//!
//! There is no store-wide lock. Active entries live in a `DashMap`
//! (sharded internal locking), and capacity is tracked by a separate
//! atomic slot counter that is claimed with a compare-and-swap before an
//! entry is inserted, so `count() <= max_active` holds under any
//! interleaving. Only the queue has a mutex, and it is taken when an
//! admission overflows or a slot is handed to the queue front. Lock order
//! is always queue → map shard; no map guard is held while the queue
//! lock is taken.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

/// Capacity and grace-period limits for one [`ShardStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of active entries. Clamped to at least 1.
    pub max_active: usize,
    /// Maximum number of queued entries. Zero disables queuing.
    pub max_queued: usize,
    /// How long an entry marked for removal stays known before cleanup
    /// hard-deletes it.
    pub grace_period: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_active: 1000,
            max_queued: 100,
            grace_period: Duration::from_secs(600),
        }
    }
}

impl StoreConfig {
    /// Returns a copy with every field inside its valid range.
    pub fn validated(mut self) -> Self {
        self.max_active = self.max_active.max(1);
        self
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of [`ShardStore::try_add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The entry is active.
    Accepted,
    /// The active set is full; the entry waits in the FIFO queue.
    Queued,
    /// Both the active set and the queue are full. Nothing was stored.
    Rejected,
}

/// What a single [`ShardStore::run_cleanup_pass`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupOutcome<K> {
    /// Keys hard-deleted because their grace period elapsed.
    pub removed: Vec<K>,
    /// Keys moved from the queue into the active set, in promotion order.
    pub promoted: Vec<K>,
}

impl<K> Default for CleanupOutcome<K> {
    fn default() -> Self {
        Self {
            removed: Vec::new(),
            promoted: Vec::new(),
        }
    }
}

impl<K> CleanupOutcome<K> {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.promoted.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ShardStore
// ---------------------------------------------------------------------------

/// Bounded active set + FIFO admission queue + delayed-removal set.
pub struct ShardStore<K, V> {
    config: StoreConfig,
    active: DashMap<K, V>,
    /// Claimed active slots. Always `>= active.len()` and `<= max_active`.
    slots: AtomicUsize,
    queue: Mutex<VecDeque<(K, V)>>,
    /// Mirror of `queue.len()`, written under the queue lock. Lets
    /// `try_add` skip the lock when nobody is waiting.
    queued: AtomicUsize,
    pending: DashMap<K, Instant>,
}

impl<K, V> ShardStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an empty store. The config is validated first.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config: config.validated(),
            active: DashMap::new(),
            slots: AtomicUsize::new(0),
            queue: Mutex::new(VecDeque::new()),
            queued: AtomicUsize::new(0),
            pending: DashMap::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Tries to admit `key`. Never blocks on I/O and never waits for
    /// capacity.
    ///
    /// Adding a key that is already active or queued keeps the stored
    /// value and returns the current placement. Either way a pending
    /// removal marker on the key is cleared, so a key that comes back
    /// within its grace period is revived rather than re-admitted.
    pub fn try_add(&self, key: K, value: V) -> Admission {
        if self.active.contains_key(&key) {
            self.pending.remove(&key);
            return Admission::Accepted;
        }

        // Fast path: nobody is waiting, so taking a free slot cannot jump
        // the queue.
        if self.queued.load(Ordering::Acquire) == 0 && self.claim_slot() {
            return self.insert_claimed(key, value);
        }

        let mut queue = self.queue.lock();
        if queue.iter().any(|(queued, _)| *queued == key) {
            self.pending.remove(&key);
            return Admission::Queued;
        }
        // A slot may have been freed after the fast path gave up. Queued
        // entries that are pending removal never get promoted, so they do
        // not hold a free slot back.
        let waiting = queue.iter().any(|(queued, _)| !self.pending.contains_key(queued));
        if !waiting && self.claim_slot() {
            drop(queue);
            return self.insert_claimed(key, value);
        }
        if queue.len() < self.config.max_queued {
            queue.push_back((key, value));
            self.queued.store(queue.len(), Ordering::Release);
            return Admission::Queued;
        }
        Admission::Rejected
    }

    /// Marks `key` for hard deletion once the grace period has elapsed.
    ///
    /// Idempotent: the first mark's timestamp wins. Active and queued
    /// membership is untouched. Returns `true` if a new marker was
    /// recorded; unknown keys are ignored.
    pub fn mark_for_delayed_removal(&self, key: &K) -> bool {
        self.mark_for_delayed_removal_at(key, Instant::now())
    }

    /// [`mark_for_delayed_removal`](Self::mark_for_delayed_removal) with
    /// an explicit timestamp.
    pub fn mark_for_delayed_removal_at(&self, key: &K, at: Instant) -> bool {
        if !self.is_known(key) {
            return false;
        }
        match self.pending.entry(key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(at);
                true
            }
        }
    }

    /// Hard-deletes `key` immediately, wherever it is, and promotes from
    /// the queue if an active slot was freed. Returns `true` if the key
    /// was present.
    pub fn remove(&self, key: &K) -> bool {
        self.pending.remove(key);
        if self.active.remove(key).is_some() {
            self.release_and_promote();
            return true;
        }
        self.remove_queued(key)
    }

    /// Hard-deletes every entry whose removal mark is at least one grace
    /// period older than `now`, promoting from the queue into each freed
    /// slot in FIFO order.
    pub fn run_cleanup_pass(&self, now: Instant) -> CleanupOutcome<K> {
        let grace = self.config.grace_period;
        let is_expired =
            |marked: &Instant| now.saturating_duration_since(*marked) >= grace;

        let expired: Vec<K> = self
            .pending
            .iter()
            .filter(|entry| is_expired(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut outcome = CleanupOutcome::default();
        for key in expired {
            // Re-check: the key may have been revived since the scan.
            if self.pending.remove_if(&key, |_, marked| is_expired(marked)).is_none() {
                continue;
            }
            if self.active.remove(&key).is_some() {
                outcome.removed.push(key);
                outcome.promoted.extend(self.release_and_promote());
            } else if self.remove_queued(&key) {
                outcome.removed.push(key);
            }
        }
        // Slots can also be free without a removal in this pass, e.g. after
        // a lost race with a concurrent `try_add` that then failed.
        outcome.promoted.extend(self.promote_available());
        outcome
    }

    /// Number of active entries (including those pending removal).
    pub fn count(&self) -> usize {
        self.active.len()
    }

    /// Number of queued entries.
    pub fn queued_count(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Number of keys carrying a removal marker.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if `key` is active.
    pub fn contains(&self, key: &K) -> bool {
        self.active.contains_key(key)
    }

    /// Returns `true` if `key` is waiting in the queue.
    pub fn is_queued(&self, key: &K) -> bool {
        self.queue.lock().iter().any(|(queued, _)| queued == key)
    }

    /// Returns `true` if `key` is active or queued.
    pub fn is_known(&self, key: &K) -> bool {
        self.contains(key) || self.is_queued(key)
    }

    pub fn is_pending_removal(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    /// A copy of the active value for `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.active.get(key).map(|entry| entry.value().clone())
    }

    /// Active entries that are not marked for removal.
    pub fn live_entries(&self) -> Vec<(K, V)> {
        self.active
            .iter()
            .filter(|entry| !self.pending.contains_key(entry.key()))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Keys of every active entry, pending or not.
    pub fn active_keys(&self) -> Vec<K> {
        self.active.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Keys waiting in the queue, front first.
    pub fn queued_keys(&self) -> Vec<K> {
        self.queue.lock().iter().map(|(key, _)| key.clone()).collect()
    }

    // -- internals --------------------------------------------------------

    fn claim_slot(&self) -> bool {
        let max = self.config.max_active;
        self.slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < max).then_some(used + 1)
            })
            .is_ok()
    }

    fn release_slot(&self) {
        self.slots.fetch_sub(1, Ordering::AcqRel);
    }

    /// Inserts into active using an already-claimed slot.
    fn insert_claimed(&self, key: K, value: V) -> Admission {
        match self.active.entry(key) {
            Entry::Occupied(entry) => {
                // Lost a race with an identical key; give the slot back.
                self.pending.remove(entry.key());
                drop(entry);
                self.release_slot();
            }
            Entry::Vacant(entry) => {
                entry.insert(value);
            }
        }
        Admission::Accepted
    }

    fn remove_queued(&self, key: &K) -> bool {
        let mut queue = self.queue.lock();
        let Some(index) = queue.iter().position(|(queued, _)| queued == key) else {
            return false;
        };
        queue.remove(index);
        self.queued.store(queue.len(), Ordering::Release);
        true
    }

    /// Releases one slot and immediately offers it to the queue front.
    ///
    /// The release happens under the queue lock, so the only competitor
    /// for the freed slot is a fast-path `try_add`, which only runs while
    /// the queue is empty.
    fn release_and_promote(&self) -> Option<K> {
        let mut queue = self.queue.lock();
        self.release_slot();
        self.promote_locked(&mut queue)
    }

    fn promote_available(&self) -> Vec<K> {
        let mut queue = self.queue.lock();
        let mut promoted = Vec::new();
        while let Some(key) = self.promote_locked(&mut queue) {
            promoted.push(key);
        }
        promoted
    }

    /// Moves the oldest queued entry that is not pending removal into the
    /// active set. The slot is claimed before anything leaves the queue,
    /// so a failed claim leaves the queue exactly as it was.
    fn promote_locked(&self, queue: &mut VecDeque<(K, V)>) -> Option<K> {
        loop {
            let index = queue
                .iter()
                .position(|(key, _)| !self.pending.contains_key(key))?;
            if !self.claim_slot() {
                return None;
            }
            let Some((key, value)) = queue.remove(index) else {
                self.release_slot();
                return None;
            };
            self.queued.store(queue.len(), Ordering::Release);
            match self.active.entry(key.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(value);
                    return Some(key);
                }
                Entry::Occupied(_) => {
                    // Already active through another path; drop the
                    // duplicate and try the next one.
                    self.release_slot();
                }
            }
        }
    }
}

impl<K, V> Default for ShardStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for `ShardStore`.
    //!
    //! Time is injected through `mark_for_delayed_removal_at` and
    //! `run_cleanup_pass(now)`, so grace periods are exercised without
    //! sleeping.

    use std::sync::Arc;

    use super::*;

    fn store(max_active: usize, max_queued: usize) -> ShardStore<String, u32> {
        ShardStore::new(StoreConfig {
            max_active,
            max_queued,
            grace_period: Duration::from_secs(600),
        })
    }

    fn key(s: &str) -> String {
        s.to_owned()
    }

    // =====================================================================
    // try_add()
    // =====================================================================

    #[test]
    fn test_try_add_capacity_scenario_accepts_queues_then_rejects() {
        let store = store(2, 1);
        assert_eq!(store.try_add(key("t1"), 1), Admission::Accepted);
        assert_eq!(store.try_add(key("t2"), 2), Admission::Accepted);
        assert_eq!(store.try_add(key("t3"), 3), Admission::Queued);
        assert_eq!(store.try_add(key("t4"), 4), Admission::Rejected);

        assert_eq!(store.count(), 2);
        assert_eq!(store.queued_count(), 1);
        assert!(!store.is_known(&key("t4")), "rejected entries are not stored");
    }

    #[test]
    fn test_try_add_existing_active_key_keeps_original_value() {
        let store = store(2, 0);
        store.try_add(key("a"), 1);
        assert_eq!(store.try_add(key("a"), 99), Admission::Accepted);
        assert_eq!(store.get(&key("a")), Some(1));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_try_add_existing_queued_key_is_not_queued_twice() {
        let store = store(1, 3);
        store.try_add(key("a"), 1);
        assert_eq!(store.try_add(key("b"), 2), Admission::Queued);
        assert_eq!(store.try_add(key("b"), 2), Admission::Queued);
        assert_eq!(store.queued_count(), 1);
    }

    #[test]
    fn test_try_add_zero_queue_rejects_when_full() {
        let store = store(1, 0);
        store.try_add(key("a"), 1);
        assert_eq!(store.try_add(key("b"), 2), Admission::Rejected);
    }

    #[test]
    fn test_try_add_revives_entry_marked_for_removal() {
        let store = store(1, 0);
        store.try_add(key("a"), 1);
        let t0 = Instant::now();
        assert!(store.mark_for_delayed_removal_at(&key("a"), t0));

        assert_eq!(store.try_add(key("a"), 1), Admission::Accepted);
        assert!(!store.is_pending_removal(&key("a")));

        let outcome = store.run_cleanup_pass(t0 + Duration::from_secs(3600));
        assert!(outcome.removed.is_empty());
        assert!(store.contains(&key("a")));
    }

    #[test]
    fn test_try_add_free_slot_behind_retiring_queue_entry_is_accepted() {
        let store = store(1, 1);
        assert_eq!(store.try_add(key("a"), 1), Admission::Accepted);
        assert_eq!(store.try_add(key("b"), 2), Admission::Queued);

        let t0 = Instant::now();
        store.mark_for_delayed_removal_at(&key("a"), t0);
        store.mark_for_delayed_removal_at(&key("b"), t0 + Duration::from_secs(300));
        let outcome = store.run_cleanup_pass(t0 + Duration::from_secs(600));
        assert_eq!(outcome.removed, vec![key("a")]);
        assert!(outcome.promoted.is_empty());
        assert_eq!(store.count(), 0);
        assert_eq!(store.queued_count(), 1);

        assert_eq!(store.try_add(key("c"), 3), Admission::Accepted);
        assert_eq!(store.count(), 1);
        assert!(store.is_queued(&key("b")));
    }

    #[test]
    fn test_try_add_live_queue_entry_keeps_fifo_order() {
        let store = store(1, 2);
        store.try_add(key("a"), 1);
        store.try_add(key("b"), 2);
        store.remove(&key("a"));
        // `b` took the freed slot, so `c` has to wait.
        assert!(store.contains(&key("b")));
        assert_eq!(store.try_add(key("c"), 3), Admission::Queued);
    }

    #[test]
    fn test_try_add_concurrent_storm_never_exceeds_limits() {
        let store = Arc::new(store(8, 4));
        let handles: Vec<_> = (0..16)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.try_add(format!("{t}-{i}"), i);
                        assert!(store.count() <= 8);
                        assert!(store.queued_count() <= 4);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.count(), 8);
        assert_eq!(store.queued_count(), 4);
    }

    // =====================================================================
    // mark_for_delayed_removal()
    // =====================================================================

    #[test]
    fn test_mark_is_idempotent_first_timestamp_wins() {
        let store = store(2, 0);
        store.try_add(key("a"), 1);
        let t0 = Instant::now();
        assert!(store.mark_for_delayed_removal_at(&key("a"), t0));
        assert!(!store.mark_for_delayed_removal_at(&key("a"), t0 + Duration::from_secs(500)));

        // Expires relative to the first mark.
        let outcome = store.run_cleanup_pass(t0 + Duration::from_secs(600));
        assert_eq!(outcome.removed, vec![key("a")]);
    }

    #[test]
    fn test_mark_unknown_key_is_ignored() {
        let store = store(2, 0);
        assert!(!store.mark_for_delayed_removal(&key("ghost")));
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_mark_does_not_change_membership() {
        let store = store(2, 0);
        store.try_add(key("a"), 1);
        store.mark_for_delayed_removal(&key("a"));
        assert!(store.contains(&key("a")));
        assert_eq!(store.count(), 1);
        assert!(store.live_entries().is_empty());
    }

    // =====================================================================
    // run_cleanup_pass()
    // =====================================================================

    #[test]
    fn test_cleanup_keeps_entry_until_grace_elapses() {
        let store = store(2, 0);
        store.try_add(key("a"), 1);
        let t0 = Instant::now();
        store.mark_for_delayed_removal_at(&key("a"), t0);

        let outcome = store.run_cleanup_pass(t0 + Duration::from_secs(599));
        assert!(outcome.is_empty());
        assert!(store.is_known(&key("a")));

        let outcome = store.run_cleanup_pass(t0 + Duration::from_secs(601));
        assert_eq!(outcome.removed, vec![key("a")]);
        assert!(!store.is_known(&key("a")));
        assert!(!store.is_pending_removal(&key("a")));
    }

    #[test]
    fn test_cleanup_promotes_queued_entry_into_freed_slot() {
        let store = store(2, 1);
        store.try_add(key("t1"), 1);
        store.try_add(key("t2"), 2);
        store.try_add(key("t3"), 3);
        store.try_add(key("t4"), 4);

        let t0 = Instant::now();
        store.mark_for_delayed_removal_at(&key("t1"), t0);
        let outcome = store.run_cleanup_pass(t0 + Duration::from_secs(600));

        assert_eq!(outcome.removed, vec![key("t1")]);
        assert_eq!(outcome.promoted, vec![key("t3")]);
        assert!(store.contains(&key("t3")));
        assert_eq!(store.count(), 2);
        assert_eq!(store.queued_count(), 0);
    }

    #[test]
    fn test_cleanup_promotes_in_fifo_order() {
        let store = store(1, 3);
        store.try_add(key("a"), 0);
        store.try_add(key("b"), 1);
        store.try_add(key("c"), 2);

        let t0 = Instant::now();
        store.mark_for_delayed_removal_at(&key("a"), t0);
        let outcome = store.run_cleanup_pass(t0 + Duration::from_secs(600));
        assert_eq!(outcome.promoted, vec![key("b")]);
        assert!(store.is_queued(&key("c")));

        store.mark_for_delayed_removal_at(&key("b"), t0);
        let outcome = store.run_cleanup_pass(t0 + Duration::from_secs(600));
        assert_eq!(outcome.promoted, vec![key("c")]);
    }

    #[test]
    fn test_cleanup_removes_expired_queued_entry_without_promoting_it() {
        let store = store(1, 2);
        store.try_add(key("a"), 0);
        store.try_add(key("b"), 1);
        store.try_add(key("c"), 2);

        let t0 = Instant::now();
        store.mark_for_delayed_removal_at(&key("b"), t0);
        let outcome = store.run_cleanup_pass(t0 + Duration::from_secs(600));
        assert_eq!(outcome.removed, vec![key("b")]);
        assert!(outcome.promoted.is_empty());
        assert_eq!(store.queued_count(), 1);
    }

    #[test]
    fn test_promotion_skips_queued_entries_pending_removal() {
        let store = store(1, 2);
        store.try_add(key("a"), 0);
        store.try_add(key("b"), 1);
        store.try_add(key("c"), 2);

        let t0 = Instant::now();
        store.mark_for_delayed_removal_at(&key("a"), t0);
        store.mark_for_delayed_removal_at(&key("b"), t0 + Duration::from_secs(300));
        let outcome = store.run_cleanup_pass(t0 + Duration::from_secs(600));

        assert_eq!(outcome.promoted, vec![key("c")]);
        assert!(store.is_queued(&key("b")));
    }

    // =====================================================================
    // remove()
    // =====================================================================

    #[test]
    fn test_remove_active_promotes_queue_front() {
        let store = store(1, 1);
        store.try_add(key("a"), 0);
        store.try_add(key("b"), 1);

        assert!(store.remove(&key("a")));
        assert!(store.contains(&key("b")));
        assert_eq!(store.queued_count(), 0);
        assert!(!store.remove(&key("a")));
    }

    #[test]
    fn test_remove_frees_slot_for_fast_path() {
        let store = store(1, 0);
        store.try_add(key("a"), 0);
        store.remove(&key("a"));
        assert_eq!(store.try_add(key("b"), 1), Admission::Accepted);
    }

    #[test]
    fn test_config_validated_clamps_zero_capacity() {
        let store: ShardStore<String, u32> = ShardStore::new(StoreConfig {
            max_active: 0,
            max_queued: 0,
            grace_period: Duration::ZERO,
        });
        assert_eq!(store.config().max_active, 1);
        assert_eq!(store.try_add(key("a"), 1), Admission::Accepted);
    }
}
