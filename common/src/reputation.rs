//! Peer reputation
//! Penalties recorded by catchup feed an in-memory score per peer

use crate::types::PeerId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::{fmt, sync::Arc};
use tracing::{debug, info};

/// Score below which a peer is banned
pub const DEFAULT_BAN_THRESHOLD: i64 = -100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerAction {
    /// Sent a block whose proof did not verify
    GossipedInvalidTransition,
    /// Sent ancestry that does not connect to our chain
    DisconnectedChain,
    /// Broke the request/response contract
    ViolatedProtocol,
    SentUsefulData,
}

impl PeerAction {
    pub fn score_delta(&self) -> i64 {
        match self {
            PeerAction::GossipedInvalidTransition => -100,
            PeerAction::DisconnectedChain => -10,
            PeerAction::ViolatedProtocol => -50,
            PeerAction::SentUsefulData => 1,
        }
    }
}

impl fmt::Display for PeerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerAction::GossipedInvalidTransition => "gossiped-invalid-transition",
            PeerAction::DisconnectedChain => "disconnected-chain",
            PeerAction::ViolatedProtocol => "violated-protocol",
            PeerAction::SentUsefulData => "sent-useful-data",
        };
        f.write_str(name)
    }
}

#[async_trait]
pub trait Reputation: Send + Sync {
    async fn record(&self, peer: PeerId, action: PeerAction, reason: &str);
}

/// In-memory reputation with a ban threshold
#[derive(Clone)]
pub struct PeerScores {
    scores: Arc<DashMap<PeerId, i64>>,
    ban_threshold: i64,
}

impl Default for PeerScores {
    fn default() -> Self {
        Self::new(DEFAULT_BAN_THRESHOLD)
    }
}

impl PeerScores {
    pub fn new(ban_threshold: i64) -> Self {
        Self {
            scores: Arc::new(DashMap::new()),
            ban_threshold,
        }
    }

    pub fn score(&self, peer: PeerId) -> i64 {
        self.scores.get(&peer).map(|score| *score).unwrap_or(0)
    }

    pub fn is_banned(&self, peer: PeerId) -> bool {
        self.score(peer) <= self.ban_threshold
    }
}

#[async_trait]
impl Reputation for PeerScores {
    async fn record(&self, peer: PeerId, action: PeerAction, reason: &str) {
        let delta = action.score_delta();
        let score = {
            let mut entry = self.scores.entry(peer).or_insert(0);
            *entry = entry.saturating_add(delta);
            *entry
        };

        debug!(%peer, %action, score, "Peer score updated: {reason}");
        if score <= self.ban_threshold && score - delta > self.ban_threshold {
            info!(%peer, score, "Peer banned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn penalties_accumulate_until_ban() {
        let scores = PeerScores::default();
        let peer = PeerId(7);

        scores.record(peer, PeerAction::DisconnectedChain, "test").await;
        assert_eq!(scores.score(peer), -10);
        assert!(!scores.is_banned(peer));

        scores.record(peer, PeerAction::GossipedInvalidTransition, "test").await;
        assert!(scores.is_banned(peer));
        assert!(!scores.is_banned(PeerId(8)));
    }
}
