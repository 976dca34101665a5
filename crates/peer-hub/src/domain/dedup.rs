//! # Recent Message Cache
//!
//! Remembers the ids of recently dispatched application frames so a
//! retransmit whose acknowledgement was lost is acknowledged again but not
//! handed to the handler twice.
//!
//! ## Bound
//!
//! Memory is capped by count, not time: once `capacity` ids are held, the
//! oldest is forgotten for each new one. A sender's retry ceiling is far
//! shorter than the time it takes to cycle the cache at any realistic rate.
//!
//! ## Sharing
//!
//! A hub that is restarted in-process under a new transport identity can be
//! handed the previous incarnation's cache, so frames the old identity
//! handled but never acknowledged are not handled again.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

/// Cache handle shared between hub incarnations serving one account.
pub type SharedRecentMessages = Arc<Mutex<RecentMessages>>;

/// Bounded set of recently seen message ids.
pub struct RecentMessages {
    seen: HashSet<Uuid>,
    order: VecDeque<Uuid>,
    capacity: usize,
}

impl RecentMessages {
    /// Default number of ids remembered.
    pub const DEFAULT_CAPACITY: usize = 65_536;

    /// Cache remembering at most `capacity` ids (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: HashSet::with_capacity(capacity.min(4096)),
            order: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Record `id`. Returns `false` if it was already present.
    #[must_use]
    pub fn insert(&mut self, id: Uuid) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    /// Check for `id` without recording it.
    #[must_use]
    pub fn contains(&self, id: &Uuid) -> bool {
        self.seen.contains(id)
    }

    /// Number of ids held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl RecentMessages {
    /// Shareable cache remembering at most `capacity` ids.
    pub fn shared(capacity: usize) -> SharedRecentMessages {
        Arc::new(Mutex::new(Self::new(capacity)))
    }
}

impl Default for RecentMessages {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
