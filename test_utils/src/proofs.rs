//! Proof validator and prover fakes

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use keystone_common::{
    verification::{BlockPackage, ProofError, ProofValidator, ProofVerified, Prover, ProverWitness},
    Block, BlockHash, BlockHeader, Proof,
};

/// Accepts every proof except those of blocks marked as rejected
#[derive(Debug, Default)]
pub struct FakeProofValidator {
    rejected: Mutex<HashSet<BlockHash>>,
    calls: Mutex<Vec<BlockHash>>,
}

impl FakeProofValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&self, hash: BlockHash) {
        self.rejected.lock().unwrap().insert(hash);
    }

    /// Blocks validated so far, in order
    pub fn calls(&self) -> Vec<BlockHash> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProofValidator for FakeProofValidator {
    async fn validate_proof(&self, block: Block) -> Result<ProofVerified, ProofError> {
        let hash = block.hash();
        self.calls.lock().unwrap().push(hash);
        if self.rejected.lock().unwrap().contains(&hash) {
            return Err(ProofError {
                hash,
                reason: "proof does not verify".to_string(),
            });
        }
        Ok(ProofVerified::assume_verified(block))
    }
}

/// Prover returning the next header's hash as the proof after an optional delay
#[derive(Debug, Default)]
pub struct FakeProver {
    delay: Duration,
    fail: bool,
    started: AtomicUsize,
    finished: AtomicUsize,
}

impl FakeProver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prover for FakeProver {
    async fn prove(
        &self,
        _prev_header: BlockHeader,
        _prev_proof: Proof,
        next_header: BlockHeader,
        _package: BlockPackage,
        _witness: ProverWitness,
    ) -> Result<Proof> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("prover crashed");
        }
        Ok(Proof(next_header.hash().to_vec()))
    }
}
