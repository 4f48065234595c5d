//! Keystone common types

use crate::hash::{BlockHash, Hash, LedgerHash};
use crate::ledger::LedgerDiff;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Account and block producer identity
#[derive(
    Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PublicKey(Hash<32>);

impl PublicKey {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(Hash::new(bytes))
    }

    pub fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Local block production identity. Key material lives with the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keypair {
    pub public_key: PublicKey,
}

/// Peer identity as handed out by the network layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Wall-clock time in milliseconds since the Unix epoch
#[derive(
    Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BlockTime(pub u64);

impl BlockTime {
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Time from `earlier` until `self`, zero if `earlier` is later
    pub fn saturating_duration_since(&self, earlier: BlockTime) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    pub fn saturating_add(&self, duration: Duration) -> BlockTime {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        BlockTime(self.0.saturating_add(millis))
    }
}

impl fmt::Display for BlockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Consensus data carried by every header.
///
/// Only the consensus capability interprets these fields; the rest of the
/// node treats them as opaque and passes them to `select`.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusState {
    /// Number of blocks from genesis to this block inclusive
    pub blockchain_length: u64,
    /// Slot this block was produced in, counted from genesis
    pub global_slot: u64,
    pub epoch: u64,
    /// Tie-breaking output of the producer's slot lottery
    pub last_vrf_output: Hash<32>,
}

/// Block header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub previous_hash: BlockHash,
    /// Hash of the ledger after applying this block's diff
    pub ledger_hash: LedgerHash,
    pub timestamp: BlockTime,
    pub producer: PublicKey,
    pub consensus_state: ConsensusState,
}

impl BlockHeader {
    /// Block hash: Blake2b-256 over every header field
    pub fn hash(&self) -> BlockHash {
        let cs = &self.consensus_state;
        BlockHash::digest_of([
            self.previous_hash.as_ref(),
            self.ledger_hash.as_ref(),
            self.timestamp.as_millis().to_be_bytes().as_slice(),
            self.producer.as_slice(),
            cs.blockchain_length.to_be_bytes().as_slice(),
            cs.global_slot.to_be_bytes().as_slice(),
            cs.epoch.to_be_bytes().as_slice(),
            cs.last_vrf_output.as_ref(),
        ])
    }
}

/// Opaque proof of a header transition
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof(pub Vec<u8>);

/// A complete block as exchanged with peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub proof: Proof,
    pub diff: LedgerDiff,
}

impl Block {
    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    pub fn parent_hash(&self) -> BlockHash {
        self.header.previous_hash
    }

    pub fn consensus_state(&self) -> &ConsensusState {
        &self.header.consensus_state
    }
}
