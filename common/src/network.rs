//! Peer network capability used by catchup and local state sync

use crate::hash::BlockHash;
use crate::types::{Block, PeerId};
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Network: Send + Sync {
    /// Up to `n` distinct peers, randomly chosen
    async fn random_peers(&self, n: usize) -> Vec<PeerId>;

    /// Ask `peer` for the ancestry of `hash`, ordered oldest first and ending
    /// at `hash`. `None` if the peer does not have it.
    async fn catchup_transition(&self, peer: PeerId, hash: BlockHash)
        -> Result<Option<Vec<Block>>>;
}
