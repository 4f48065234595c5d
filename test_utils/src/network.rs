//! Scripted peer network

use std::{collections::HashMap, sync::Mutex, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use keystone_common::{network::Network, Block, BlockHash, PeerId};
use rand::seq::SliceRandom;

#[derive(Debug, Clone)]
enum Reply {
    Blocks(Option<Vec<Block>>),
    Error(String),
}

/// Network whose peers answer every catchup request with a fixed reply.
///
/// Unknown peers answer `None`. `random_peers` hands out peers in the
/// order they were added unless shuffling is switched on.
#[derive(Debug, Default)]
pub struct ScriptedNetwork {
    peers: Vec<PeerId>,
    replies: HashMap<PeerId, Reply>,
    delay: Option<Duration>,
    shuffle: bool,
    requests: Mutex<Vec<(PeerId, BlockHash)>>,
    peer_requests: Mutex<Vec<usize>>,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` peers that have nothing
    pub fn with_empty_peers(mut self, count: u64) -> Self {
        let start = self.peers.len() as u64;
        for id in start..start + count {
            self.peers.push(PeerId(id));
        }
        self
    }

    /// Add a peer answering with `blocks`, oldest first
    pub fn with_peer(mut self, peer: PeerId, blocks: Option<Vec<Block>>) -> Self {
        self.peers.push(peer);
        self.replies.insert(peer, Reply::Blocks(blocks));
        self
    }

    pub fn with_failing_peer(mut self, peer: PeerId, reason: &str) -> Self {
        self.peers.push(peer);
        self.replies.insert(peer, Reply::Error(reason.to_string()));
        self
    }

    /// Delay every catchup reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn shuffled(mut self) -> Self {
        self.shuffle = true;
        self
    }

    /// Catchup requests received so far, in order
    pub fn requests(&self) -> Vec<(PeerId, BlockHash)> {
        self.requests.lock().unwrap().clone()
    }

    /// Sizes asked of `random_peers`, in order
    pub fn peer_requests(&self) -> Vec<usize> {
        self.peer_requests.lock().unwrap().clone()
    }

    /// Total number of calls made to the network
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len() + self.peer_requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn random_peers(&self, n: usize) -> Vec<PeerId> {
        self.peer_requests.lock().unwrap().push(n);
        let mut peers = self.peers.clone();
        if self.shuffle {
            peers.shuffle(&mut rand::rng());
        }
        peers.truncate(n);
        peers
    }

    async fn catchup_transition(&self, peer: PeerId, hash: BlockHash) -> Result<Option<Vec<Block>>> {
        self.requests.lock().unwrap().push((peer, hash));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.replies.get(&peer) {
            Some(Reply::Blocks(blocks)) => Ok(blocks.clone()),
            Some(Reply::Error(reason)) => Err(anyhow!("{reason}")),
            None => Ok(None),
        }
    }
}
