//! Validation of one peer's ancestry path

use keystone_common::{
    cached::{Cached, Outcome},
    reputation::PeerAction,
    verification::{Candidate, TransitionRejection},
    Block, BlockHash, PeerId,
};
use tracing::trace;

use crate::catchup_error::PeerError;
use crate::JobRunner;

/// Result of validating a single block of a path
pub(crate) enum Step {
    /// Already known to the frontier: the walk can stop here
    Known(BlockHash),
    /// New work, now claimed in the dedup cache
    Accepted(Cached<Candidate>),
}

/// Accepted part of a path, anchored at a block the frontier knows
#[derive(Debug)]
pub(crate) struct VerifiedPath {
    pub anchor: BlockHash,
    /// Oldest first; the first element's parent is `anchor`
    pub path: Vec<Cached<Candidate>>,
}

impl JobRunner {
    /// Validate `blocks` (oldest first) from the newest backwards, stopping at
    /// the first block the frontier already knows.
    ///
    /// On failure every handle accepted so far is released before returning.
    pub(crate) async fn walk_path(&self, peer: PeerId, blocks: Vec<Block>) -> Result<VerifiedPath, PeerError> {
        let mut accepted: Vec<Cached<Candidate>> = Vec::new();

        for block in blocks.into_iter().rev() {
            let expected = accepted.last().map(|newer| newer.value().parent_hash());
            if let Some(expected) = expected.filter(|expected| *expected != block.hash()) {
                self.penalise(peer, PeerAction::ViolatedProtocol, "catchup path is not a chain").await;
                release(accepted);
                return Err(PeerError::BrokenPath { hash: expected });
            }

            match self.verify_transition(peer, block).await {
                Ok(Step::Known(anchor)) => {
                    accepted.reverse();
                    trace!(%anchor, accepted = accepted.len(), "path reached a known block");
                    return Ok(VerifiedPath {
                        anchor,
                        path: accepted,
                    });
                }
                Ok(Step::Accepted(cached)) => accepted.push(cached),
                Err(e) => {
                    release(accepted);
                    return Err(e);
                }
            }
        }

        self.penalise(peer, PeerAction::DisconnectedChain, "catchup path never reaches a known block").await;
        release(accepted);
        Err(PeerError::NoKnownAncestor)
    }

    /// Proof check, then context check against the frontier
    pub(crate) async fn verify_transition(&self, peer: PeerId, block: Block) -> Result<Step, PeerError> {
        let hash = block.hash();
        let verified = match self.proof_validator.validate_proof(block).await {
            Ok(verified) => verified,
            Err(e) => {
                self.penalise(peer, PeerAction::GossipedInvalidTransition, &e.to_string()).await;
                return Err(e.into());
            }
        };

        match self.transition_validator.validate_transition(verified) {
            Ok(cached) => Ok(Step::Accepted(cached)),
            Err(TransitionRejection::InFrontier(hash)) => Ok(Step::Known(hash)),
            Err(TransitionRejection::InProcess(handle)) => {
                trace!(%hash, "waiting on in-flight validation");
                match handle.subscribe().await {
                    Outcome::Success(hash) => Ok(Step::Known(hash)),
                    Outcome::Failure => Err(PeerError::PreviousAttemptFailed(hash)),
                }
            }
            Err(TransitionRejection::InvalidProof) => {
                self.penalise(peer, PeerAction::GossipedInvalidTransition, "invalid transition").await;
                Err(PeerError::InvalidTransition(hash))
            }
            Err(TransitionRejection::Disconnected) => {
                self.penalise(peer, PeerAction::DisconnectedChain, "catchup path does not connect").await;
                Err(PeerError::Disconnected(hash))
            }
        }
    }
}

fn release(accepted: Vec<Cached<Candidate>>) {
    for cached in accepted {
        cached.invalidate_with_failure();
    }
}
