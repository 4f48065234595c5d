//! Transition validation against the latest frontier snapshot

use std::sync::Arc;

use keystone_common::{
    cached::{CacheError, Cached, DedupCache},
    consensus::{Consensus, Selection},
    verification::{Candidate, ProofVerified, TransitionRejection, TransitionValidator},
};
use tracing::trace;

use crate::FrontierReader;

/// Decides whether a proof-verified block is new work for the frontier and,
/// if so, claims its hash in the dedup cache.
pub struct FrontierTransitionValidator {
    reader: FrontierReader,
    cache: DedupCache,
    consensus: Arc<dyn Consensus>,
}

impl FrontierTransitionValidator {
    pub fn new(reader: FrontierReader, cache: DedupCache, consensus: Arc<dyn Consensus>) -> Self {
        Self {
            reader,
            cache,
            consensus,
        }
    }
}

impl TransitionValidator for FrontierTransitionValidator {
    fn validate_transition(&self, verified: ProofVerified) -> Result<Cached<Candidate>, TransitionRejection> {
        let Some(snapshot) = self.reader.snapshot() else {
            return Err(TransitionRejection::Disconnected);
        };

        let candidate = Candidate::new(verified);
        let hash = candidate.hash();
        if snapshot.contains(&hash) {
            return Err(TransitionRejection::InFrontier(hash));
        }

        // Anything the root beats can never attach
        let root = snapshot.root();
        if self.consensus.select(root.consensus_state(), candidate.block().consensus_state()) != Selection::Take {
            trace!(%hash, root = %root.hash(), "candidate loses to the frontier root");
            return Err(TransitionRejection::Disconnected);
        }

        self.cache.accept(hash, candidate).map_err(|CacheError::AlreadyPending(handle)| TransitionRejection::InProcess(handle))
    }
}
