//! Shared first-seen set for tokens.
//!
//! [`DedupStore`] is the single serialization point deciding which caller
//! "owns" a token: for any token value, exactly one call to
//! [`DedupStore::try_insert`] over the life of the store returns `true`, no
//! matter how many connections race on it. Tokens are never removed.
//!
//! The store also carries the duplicate counter. Both counters are read by the
//! stats reporter through [`DedupStore::snapshot`]; the two values are each
//! consistent on their own but are not read under a common lock.

use crate::types::Token;
use parking_lot::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use std::collections::HashSet;

/// Result of observing a token through [`DedupStore::observe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Observation {
    /// The caller won the insert and must persist the token.
    FirstSeen,
    /// The token was already present; the duplicate counter was bumped.
    Duplicate,
}

/// Point-in-time counters read from a [`DedupStore`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub unique: u64,
    pub duplicates: u64,
}

/// Concurrent set of accepted tokens plus a duplicate counter.
///
/// Shared by every connection worker through an `Arc`. All methods take
/// `&self`.
#[derive(Debug, Default)]
pub struct DedupStore {
    seen: Mutex<HashSet<Token>>,
    duplicates: AtomicU64,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-sizes the set for `capacity` tokens.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: Mutex::new(HashSet::with_capacity(capacity)),
            duplicates: AtomicU64::new(0),
        }
    }

    /// Inserts `token` if absent.
    ///
    /// Returns `true` if this call inserted it and `false` if it was already
    /// present. The duplicate counter is left untouched; callers that get
    /// `false` are expected to call [`record_duplicate`](Self::record_duplicate),
    /// or use [`observe`](Self::observe) which does both.
    pub fn try_insert(&self, token: Token) -> bool {
        self.seen.lock().insert(token)
    }

    /// Increments the duplicate counter by one.
    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    /// Inserts `token`, counting it as a duplicate if it was already present.
    pub fn observe(&self, token: Token) -> Observation {
        if self.try_insert(token) {
            Observation::FirstSeen
        } else {
            self.record_duplicate();
            Observation::Duplicate
        }
    }

    /// Returns `true` if `token` has been inserted.
    pub fn contains(&self, token: Token) -> bool {
        self.seen.lock().contains(&token)
    }

    /// Number of distinct tokens inserted so far.
    pub fn size(&self) -> u64 {
        self.seen.lock().len() as u64
    }

    /// Number of duplicate observations recorded so far.
    pub fn duplicate_count(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    /// Reads both counters. Not atomic across the pair.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            unique: self.size(),
            duplicates: self.duplicate_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn token(s: &str) -> Token {
        s.parse().unwrap()
    }

    #[test]
    fn first_insert_wins_then_duplicates() {
        let store = DedupStore::new();
        let t = token("123456789");

        assert!(store.try_insert(t));
        assert!(!store.try_insert(t));
        assert!(!store.try_insert(t));
        assert!(store.contains(t));
        assert_eq!(store.size(), 1);
        // try_insert alone never counts duplicates.
        assert_eq!(store.duplicate_count(), 0);
    }

    #[test]
    fn observe_counts_duplicates() {
        let store = DedupStore::new();
        let a = token("000000001");
        let b = token("000000002");

        assert_eq!(store.observe(a), Observation::FirstSeen);
        assert_eq!(store.observe(a), Observation::Duplicate);
        assert_eq!(store.observe(b), Observation::FirstSeen);
        assert_eq!(store.observe(a), Observation::Duplicate);

        assert_eq!(
            store.snapshot(),
            StoreSnapshot {
                unique: 2,
                duplicates: 2
            }
        );
    }

    #[test]
    fn concurrent_inserts_have_a_single_winner() {
        const THREADS: usize = 16;
        const TRIALS: u32 = 200;

        let store = Arc::new(DedupStore::new());

        for trial in 0..TRIALS {
            let t = Token::from_value(trial).unwrap();
            let barrier = Arc::new(Barrier::new(THREADS));

            let winners: usize = (0..THREADS)
                .map(|_| {
                    let store = Arc::clone(&store);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        store.observe(t) == Observation::FirstSeen
                    })
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|h| usize::from(h.join().unwrap()))
                .sum();

            assert_eq!(winners, 1, "trial {trial} had {winners} winners");
        }

        assert_eq!(store.size(), u64::from(TRIALS));
        assert_eq!(
            store.duplicate_count(),
            u64::from(TRIALS) * (THREADS as u64 - 1)
        );
    }
}
