//! Fork-choice and block production capability
//!
//! The selection rule and the slot lottery are supplied by the consensus
//! implementation; the frontier, catchup and producer only ever call through
//! this trait.

use crate::ledger::LedgerSummary;
use crate::types::{BlockHeader, BlockTime, ConsensusState, Keypair, PeerId};
use crate::hash::{Hash, LedgerHash};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of comparing an existing chain with a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Keep,
    Take,
}

/// Slot assignment won by the local producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalData {
    pub global_slot: u64,
    pub epoch: u64,
    pub vrf_output: Hash<32>,
}

/// What the producer should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextProposal {
    /// Nothing to produce before the given time
    CheckAgain(BlockTime),
    /// Produce immediately
    ProposeNow(ProposalData),
    /// Produce at the given time
    Propose(BlockTime, ProposalData),
}

/// Local consensus state that must be fetched before producing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStateSync {
    /// Epoch ledgers the local state is missing
    pub epoch_ledgers: Vec<LedgerHash>,
}

#[async_trait]
pub trait Consensus: Send + Sync {
    /// Fork choice between the chain ending at `existing` and the one ending at `candidate`
    fn select(&self, existing: &ConsensusState, candidate: &ConsensusState) -> Selection;

    /// Decide when the local producer next gets to build on `tip`
    fn next_proposal(&self, now: BlockTime, tip: &ConsensusState, keypair: &Keypair)
        -> NextProposal;

    /// Produce the header following `previous` for a freshly applied ledger
    fn generate_transition(
        &self,
        previous: &BlockHeader,
        ledger: &LedgerSummary,
        now: BlockTime,
        proposal: &ProposalData,
        keypair: &Keypair,
    ) -> BlockHeader;

    /// Local state that must be synchronised before producing on `tip`, if any
    fn required_local_state_sync(&self, tip: &ConsensusState) -> Option<LocalStateSync>;

    /// Fetch the missing local state from `peers`
    async fn sync_local_state(&self, peers: Vec<PeerId>, sync: LocalStateSync) -> Result<()>;
}
