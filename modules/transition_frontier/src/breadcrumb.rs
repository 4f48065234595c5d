//! Breadcrumb: a validated block together with the ledger it produces.

use keystone_common::{
    ledger::Ledger, verification::ProofVerified, Block, BlockHash, BlockHeader, ConsensusState,
};

use crate::breadcrumb_builder::BuildError;

/// Immutable once created. Only the breadcrumb builder creates
/// non-root breadcrumbs, always from a parent breadcrumb's ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breadcrumb {
    hash: BlockHash,
    block: Block,
    ledger: Ledger,
}

impl Breadcrumb {
    pub(crate) fn new(block: Block, ledger: Ledger) -> Self {
        Self {
            hash: block.hash(),
            block,
            ledger,
        }
    }

    /// Breadcrumb for a finalised root block and the ledger it committed to.
    ///
    /// Fails if `ledger` does not hash to the header's ledger hash.
    pub fn root(verified: ProofVerified, ledger: Ledger) -> Result<Self, BuildError> {
        let block = verified.into_block();
        let actual = ledger.hash();
        if actual != block.header.ledger_hash {
            return Err(BuildError::LedgerHashMismatch {
                hash: block.hash(),
                expected: block.header.ledger_hash,
                actual,
            });
        }
        Ok(Self::new(block, ledger))
    }

    pub fn hash(&self) -> BlockHash {
        self.hash
    }

    pub fn parent_hash(&self) -> BlockHash {
        self.block.parent_hash()
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn header(&self) -> &BlockHeader {
        &self.block.header
    }

    pub fn consensus_state(&self) -> &ConsensusState {
        &self.block.header.consensus_state
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }
}
