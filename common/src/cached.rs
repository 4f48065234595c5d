//! Dedup cache for in-flight work keyed by block hash
//!
//! The first party to see a hash `accept`s it and receives the only
//! [`Cached`] handle for that hash. Anyone else asking for the same hash
//! gets a [`PendingHandle`] and waits for the same outcome instead of
//! repeating the work. Resolving a handle removes the hash from the arena
//! and wakes every subscriber.

use crate::hash::BlockHash;
use crate::rose_tree::{forest_values, RoseTree};
use dashmap::{mapref::entry::Entry, DashMap};
use std::{fmt, sync::Arc};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{trace, warn};

/// Final outcome of work on a hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Work finished; the hash is now known to the frontier
    Success(BlockHash),
    /// Work was abandoned or rejected
    Failure,
}

/// Observable state of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Pending,
    Done(Outcome),
}

#[derive(Debug, Error)]
pub enum CacheError {
    /// Someone else already owns the work for this hash
    #[error("{} is already being processed", .0.hash())]
    AlreadyPending(PendingHandle),
}

type StateSender = Arc<watch::Sender<CacheState>>;

/// Shared arena of pending hashes. Cloning shares the arena.
#[derive(Clone, Default)]
pub struct DedupCache {
    entries: Arc<DashMap<BlockHash, StateSender>>,
}

impl fmt::Debug for DedupCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedupCache").field("pending", &self.entries.len()).finish()
    }
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the work for `hash`, carrying `value` until it is resolved.
    ///
    /// Fails with the existing subscription if the hash is already pending.
    pub fn accept<T>(&self, hash: BlockHash, value: T) -> Result<Cached<T>, CacheError> {
        match self.entries.entry(hash) {
            Entry::Occupied(existing) => Err(CacheError::AlreadyPending(PendingHandle {
                hash,
                receiver: existing.get().subscribe(),
            })),
            Entry::Vacant(slot) => {
                let (sender, _) = watch::channel(CacheState::Pending);
                let sender = Arc::new(sender);
                slot.insert(sender.clone());
                trace!(%hash, "accepted into dedup cache");
                Ok(Cached {
                    value,
                    guard: PendingGuard {
                        hash,
                        cache: self.clone(),
                        sender: Some(sender),
                    },
                })
            }
        }
    }

    /// Subscription to the work on `hash`, if any is pending
    pub fn pending(&self, hash: &BlockHash) -> Option<PendingHandle> {
        self.entries.get(hash).map(|sender| PendingHandle {
            hash: *hash,
            receiver: sender.subscribe(),
        })
    }

    pub fn is_pending(&self, hash: &BlockHash) -> bool {
        self.entries.contains_key(hash)
    }

    /// Number of pending hashes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn finish(&self, hash: BlockHash, sender: &StateSender, outcome: Outcome) {
        self.entries.remove_if(&hash, |_, current| Arc::ptr_eq(current, sender));
        sender.send_replace(CacheState::Done(outcome));
    }
}

/// Subscription to someone else's in-flight work
#[derive(Debug, Clone)]
pub struct PendingHandle {
    hash: BlockHash,
    receiver: watch::Receiver<CacheState>,
}

impl PendingHandle {
    pub fn hash(&self) -> BlockHash {
        self.hash
    }

    pub fn state(&self) -> CacheState {
        *self.receiver.borrow()
    }

    /// Wait for the final outcome
    pub async fn subscribe(mut self) -> Outcome {
        match self.receiver.wait_for(|state| matches!(state, CacheState::Done(_))).await {
            Ok(state) => match *state {
                CacheState::Done(outcome) => outcome,
                CacheState::Pending => Outcome::Failure,
            },
            // Owner vanished without resolving
            Err(_) => Outcome::Failure,
        }
    }
}

/// Owned handle over a value whose work is pending in the cache.
///
/// Dropping a handle that was never resolved marks the hash as failed.
#[derive(Debug)]
pub struct Cached<T> {
    value: T,
    guard: PendingGuard,
}

impl<T> Cached<T> {
    pub fn hash(&self) -> BlockHash {
        self.guard.hash
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// Subscription to this handle's eventual outcome
    pub fn subscribe(&self) -> PendingHandle {
        PendingHandle {
            hash: self.guard.hash,
            receiver: match &self.guard.sender {
                Some(sender) => sender.subscribe(),
                None => watch::channel(CacheState::Done(Outcome::Failure)).1,
            },
        }
    }

    /// Replace the carried value, keeping the same pending entry
    pub fn transform<U>(self, f: impl FnOnce(T) -> U) -> Cached<U> {
        let Cached { value, guard } = self;
        Cached {
            value: f(value),
            guard,
        }
    }

    /// Deliver `outcome` to every subscriber and release the hash
    pub fn resolve(self, outcome: Outcome) -> T {
        let Cached { value, mut guard } = self;
        guard.finish(outcome);
        value
    }

    pub fn invalidate_with_failure(self) -> T {
        self.resolve(Outcome::Failure)
    }
}

/// Mark every handle in `forest` as failed, returning how many were released
pub fn invalidate_forest<T>(forest: Vec<RoseTree<Cached<T>>>) -> usize {
    let handles = forest_values(forest);
    let count = handles.len();
    for handle in handles {
        handle.invalidate_with_failure();
    }
    count
}

#[derive(Debug)]
struct PendingGuard {
    hash: BlockHash,
    cache: DedupCache,
    sender: Option<StateSender>,
}

impl PendingGuard {
    fn finish(&mut self, outcome: Outcome) {
        if let Some(sender) = self.sender.take() {
            trace!(hash = %self.hash, ?outcome, "resolved dedup cache entry");
            self.cache.finish(self.hash, &sender, outcome);
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.sender.is_some() {
            warn!(hash = %self.hash, "cached work dropped while pending, marking failed");
            self.finish(Outcome::Failure);
        }
    }
}
