//! Consensus fakes

use std::{collections::VecDeque, sync::Mutex, time::Duration};

use anyhow::{bail, Result};
use async_trait::async_trait;
use keystone_common::{
    consensus::{Consensus, LocalStateSync, NextProposal, ProposalData, Selection},
    ledger::LedgerSummary,
    BlockHeader, BlockTime, ConsensusState, Keypair, PeerId,
};

/// Longer chain wins, ties go to the larger VRF output
#[derive(Debug, Clone, Copy, Default)]
pub struct LongestChain;

impl LongestChain {
    fn header_after(
        previous: &BlockHeader,
        ledger: &LedgerSummary,
        now: BlockTime,
        proposal: &ProposalData,
        keypair: &Keypair,
    ) -> BlockHeader {
        BlockHeader {
            previous_hash: previous.hash(),
            ledger_hash: ledger.ledger_hash,
            timestamp: now,
            producer: keypair.public_key,
            consensus_state: ConsensusState {
                blockchain_length: previous.consensus_state.blockchain_length + 1,
                global_slot: proposal.global_slot,
                epoch: proposal.epoch,
                last_vrf_output: proposal.vrf_output,
            },
        }
    }
}

#[async_trait]
impl Consensus for LongestChain {
    fn select(&self, existing: &ConsensusState, candidate: &ConsensusState) -> Selection {
        let better = (candidate.blockchain_length, candidate.last_vrf_output)
            > (existing.blockchain_length, existing.last_vrf_output);
        if better {
            Selection::Take
        } else {
            Selection::Keep
        }
    }

    fn next_proposal(&self, now: BlockTime, _: &ConsensusState, _: &Keypair) -> NextProposal {
        NextProposal::CheckAgain(now.saturating_add(Duration::from_secs(3600)))
    }

    fn generate_transition(
        &self,
        previous: &BlockHeader,
        ledger: &LedgerSummary,
        now: BlockTime,
        proposal: &ProposalData,
        keypair: &Keypair,
    ) -> BlockHeader {
        Self::header_after(previous, ledger, now, proposal, keypair)
    }

    fn required_local_state_sync(&self, _: &ConsensusState) -> Option<LocalStateSync> {
        None
    }

    async fn sync_local_state(&self, _: Vec<PeerId>, _: LocalStateSync) -> Result<()> {
        Ok(())
    }
}

/// Longest-chain selection with scripted proposal decisions.
///
/// Each `next_proposal` pops the next scripted answer; once the script runs
/// out it answers `CheckAgain` an hour later.
#[derive(Debug, Default)]
pub struct ScriptedConsensus {
    proposals: Mutex<VecDeque<NextProposal>>,
    pending_sync: Mutex<Option<LocalStateSync>>,
    fail_sync: bool,
    calls: Mutex<ConsensusCalls>,
}

#[derive(Debug, Default, Clone)]
pub struct ConsensusCalls {
    pub next_proposal: usize,
    pub generate_transition: usize,
    pub sync_local_state: Vec<Vec<PeerId>>,
}

impl ScriptedConsensus {
    pub fn new(proposals: impl IntoIterator<Item = NextProposal>) -> Self {
        Self {
            proposals: Mutex::new(proposals.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Require a local state sync before the first proposal check
    pub fn requiring_sync(mut self, sync: LocalStateSync, fail: bool) -> Self {
        self.pending_sync = Mutex::new(Some(sync));
        self.fail_sync = fail;
        self
    }

    pub fn push(&self, proposal: NextProposal) {
        self.proposals.lock().unwrap().push_back(proposal);
    }

    pub fn calls(&self) -> ConsensusCalls {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Consensus for ScriptedConsensus {
    fn select(&self, existing: &ConsensusState, candidate: &ConsensusState) -> Selection {
        LongestChain.select(existing, candidate)
    }

    fn next_proposal(&self, now: BlockTime, tip: &ConsensusState, keypair: &Keypair) -> NextProposal {
        self.calls.lock().unwrap().next_proposal += 1;
        self.proposals
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| LongestChain.next_proposal(now, tip, keypair))
    }

    fn generate_transition(
        &self,
        previous: &BlockHeader,
        ledger: &LedgerSummary,
        now: BlockTime,
        proposal: &ProposalData,
        keypair: &Keypair,
    ) -> BlockHeader {
        self.calls.lock().unwrap().generate_transition += 1;
        LongestChain::header_after(previous, ledger, now, proposal, keypair)
    }

    fn required_local_state_sync(&self, _: &ConsensusState) -> Option<LocalStateSync> {
        self.pending_sync.lock().unwrap().clone()
    }

    async fn sync_local_state(&self, peers: Vec<PeerId>, _: LocalStateSync) -> Result<()> {
        self.calls.lock().unwrap().sync_local_state.push(peers);
        if self.fail_sync {
            bail!("epoch ledger unavailable");
        }
        *self.pending_sync.lock().unwrap() = None;
        Ok(())
    }
}

/// Proposal data for slot `slot`, epoch 0
pub fn proposal(slot: u64, vrf: u8) -> ProposalData {
    ProposalData {
        global_slot: slot,
        epoch: 0,
        vrf_output: keystone_common::Hash::new([vrf; 32]),
    }
}
