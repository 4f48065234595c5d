//! Catchup errors

use keystone_common::{verification::ProofError, BlockHash};
use keystone_module_transition_frontier::BuildError;
use thiserror::Error;

/// Why a catchup job failed
#[derive(Debug, Error)]
pub enum CatchupError {
    #[error("frontier not initialised")]
    NoFrontier,

    #[error("no peer could supply the ancestry of {target}: [{}]", .failures.join("; "))]
    AllPeersFailed { target: BlockHash, failures: Vec<String> },

    #[error("could not build breadcrumbs for {target}: {source}")]
    Build {
        target: BlockHash,
        #[source]
        source: BuildError,
    },
}

/// Why one peer's attempt failed; the job moves on to the next peer
#[derive(Debug, Error)]
pub(crate) enum PeerError {
    #[error("no data")]
    NoData,

    #[error("request failed: {0:#}")]
    Network(anyhow::Error),

    #[error("path ends at {got} instead of {expected}")]
    TerminalMismatch { expected: BlockHash, got: BlockHash },

    #[error("path is not a chain at {hash}")]
    BrokenPath { hash: BlockHash },

    #[error(transparent)]
    InvalidProof(#[from] ProofError),

    #[error("transition {0} was rejected as invalid")]
    InvalidTransition(BlockHash),

    #[error("{0} does not connect to the frontier")]
    Disconnected(BlockHash),

    #[error("previous attempt on {0} failed")]
    PreviousAttemptFailed(BlockHash),

    #[error("path never reaches a known block")]
    NoKnownAncestor,
}
