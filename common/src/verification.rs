//! Proof and transition validation capabilities

use crate::cached::{Cached, PendingHandle};
use crate::hash::{BlockHash, LedgerHash};
use crate::ledger::{Coinbase, LedgerDiff};
use crate::types::{Block, BlockHeader, Proof};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid proof for block {hash}: {reason}")]
pub struct ProofError {
    pub hash: BlockHash,
    pub reason: String,
}

/// A block whose proof has been checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofVerified {
    block: Block,
}

impl ProofVerified {
    /// Mark `block` as proof-verified without checking anything.
    ///
    /// # Preconditions
    ///
    /// The caller must know the proof is valid for exactly this block:
    /// either a [`ProofValidator`] has just accepted it, or the proof was
    /// returned by the local [`Prover`] for this header. Every other path
    /// must go through a validator.
    pub fn assume_verified(block: Block) -> Self {
        Self { block }
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn into_block(self) -> Block {
        self.block
    }
}

#[async_trait]
pub trait ProofValidator: Send + Sync {
    async fn validate_proof(&self, block: Block) -> Result<ProofVerified, ProofError>;
}

/// Pre-proof block contents handed to the prover
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPackage {
    pub header: BlockHeader,
    pub diff: LedgerDiff,
}

/// Ledger transition the prover must attest to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProverWitness {
    pub previous_ledger_hash: LedgerHash,
    pub next_ledger_hash: LedgerHash,
    pub coinbase: Coinbase,
}

#[async_trait]
pub trait Prover: Send + Sync {
    /// Prove the transition from `prev_header` to `next_header`
    async fn prove(
        &self,
        prev_header: BlockHeader,
        prev_proof: Proof,
        next_header: BlockHeader,
        package: BlockPackage,
        witness: ProverWitness,
    ) -> Result<Proof>;
}

/// A proof-verified block accepted for building on the frontier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    hash: BlockHash,
    block: Block,
}

impl Candidate {
    pub fn new(verified: ProofVerified) -> Self {
        let block = verified.into_block();
        Self {
            hash: block.hash(),
            block,
        }
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

    pub fn into_block(self) -> Block {
        self.block
    }
}

/// Why a block was not accepted as a new candidate
#[derive(Debug, Error)]
pub enum TransitionRejection {
    #[error("block {0} is already in the frontier")]
    InFrontier(BlockHash),

    #[error("block {} is already being processed", .0.hash())]
    InProcess(PendingHandle),

    #[error("invalid proof")]
    InvalidProof,

    #[error("block does not connect to the frontier")]
    Disconnected,
}

pub trait TransitionValidator: Send + Sync {
    /// Check a proof-verified block against the frontier and claim its hash
    fn validate_transition(
        &self,
        verified: ProofVerified,
    ) -> Result<Cached<Candidate>, TransitionRejection>;
}
