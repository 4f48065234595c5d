//! Block production errors

use std::time::Duration;

use keystone_common::{ledger::LedgerError, BlockHash};
use keystone_module_transition_frontier::{BuildError, FrontierError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("build cancelled")]
    Cancelled,

    #[error("frontier has no best tip")]
    NoBestTip,

    #[error("diff does not apply to the best tip: {0}")]
    Ledger(#[from] LedgerError),

    #[error("produced block does not build: {0}")]
    Build(#[from] BuildError),

    #[error("prover failed: {0:#}")]
    Prover(#[source] anyhow::Error),

    #[error("submission queue closed")]
    SubmissionClosed,

    #[error(transparent)]
    Frontier(#[from] FrontierError),

    /// Our own block never reached the frontier. Fatal.
    #[error("block {hash} not in the frontier {timeout:?} after submission")]
    DeliveryTimeout { hash: BlockHash, timeout: Duration },
}
