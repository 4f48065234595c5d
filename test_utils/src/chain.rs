//! Block factories. Every block carries a coinbase-only diff so ledgers
//! stay consistent with the headers that commit to them.

use keystone_common::{
    ledger::{Ledger, LedgerDiff},
    verification::{Candidate, ProofVerified},
    Block, BlockHash, BlockHeader, BlockTime, ConsensusState, Hash, Proof, PublicKey,
};

pub const FUNDED_BALANCE: u64 = 1_000_000;
pub const COINBASE: u64 = 100;
pub const SLOT_MILLIS: u64 = 1_000;

pub fn key(n: u8) -> PublicKey {
    PublicKey::new([n; 32])
}

/// Ledger with accounts 1 to 4 funded
pub fn genesis_ledger() -> Ledger {
    Ledger::genesis((1..=4).map(|n| (key(n), FUNDED_BALANCE)))
}

pub fn genesis() -> (Block, Ledger) {
    let ledger = genesis_ledger();
    let header = BlockHeader {
        previous_hash: BlockHash::default(),
        ledger_hash: ledger.hash(),
        timestamp: BlockTime::from_millis(0),
        producer: key(0),
        consensus_state: ConsensusState {
            blockchain_length: 1,
            ..ConsensusState::default()
        },
    };
    let block = Block {
        header,
        proof: Proof::default(),
        diff: LedgerDiff::coinbase_only(key(0), 0),
    };
    (block, ledger)
}

/// Child of `parent`. Siblings built with different seeds have distinct hashes;
/// a higher seed wins length ties under [`LongestChain`](crate::consensus::LongestChain).
pub fn child(parent: &Block, ledger: &Ledger, seed: u8) -> (Block, Ledger) {
    let diff = LedgerDiff::coinbase_only(key(seed), COINBASE);
    let next = ledger.apply_diff(&diff).expect("coinbase-only diff applies");
    let parent_state = parent.consensus_state();
    let header = BlockHeader {
        previous_hash: parent.hash(),
        ledger_hash: next.hash(),
        timestamp: BlockTime::from_millis(parent.header.timestamp.as_millis() + SLOT_MILLIS),
        producer: key(seed),
        consensus_state: ConsensusState {
            blockchain_length: parent_state.blockchain_length + 1,
            global_slot: parent_state.global_slot + 1,
            epoch: parent_state.epoch,
            last_vrf_output: Hash::new([seed; 32]),
        },
    };
    let block = Block {
        header,
        proof: Proof(vec![seed]),
        diff,
    };
    (block, next)
}

/// `len` blocks extending `parent`, oldest first
pub fn extend(parent: &Block, ledger: &Ledger, len: usize, seed: u8) -> Vec<(Block, Ledger)> {
    let mut out: Vec<(Block, Ledger)> = Vec::with_capacity(len);
    for _ in 0..len {
        let (prev_block, prev_ledger) = match out.last() {
            Some((block, ledger)) => (block, ledger),
            None => (parent, ledger),
        };
        let next = child(prev_block, prev_ledger, seed);
        out.push(next);
    }
    out
}

/// Just the blocks of [`extend`]
pub fn extend_blocks(parent: &Block, ledger: &Ledger, len: usize, seed: u8) -> Vec<Block> {
    extend(parent, ledger, len, seed).into_iter().map(|(block, _)| block).collect()
}

pub fn verified(block: &Block) -> ProofVerified {
    ProofVerified::assume_verified(block.clone())
}

pub fn candidate(block: &Block) -> Candidate {
    Candidate::new(verified(block))
}

/// Same block with a header committing to a different ledger
pub fn with_wrong_ledger_hash(block: &Block) -> Block {
    let mut block = block.clone();
    block.header.ledger_hash = Hash::new([0xee; 32]);
    block
}
