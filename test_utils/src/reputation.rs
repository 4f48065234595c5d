//! Reputation recorder

use std::sync::Mutex;

use async_trait::async_trait;
use keystone_common::{
    reputation::{PeerAction, Reputation},
    PeerId,
};

#[derive(Debug, Default)]
pub struct RecordingReputation {
    records: Mutex<Vec<(PeerId, PeerAction)>>,
}

impl RecordingReputation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(PeerId, PeerAction)> {
        self.records.lock().unwrap().clone()
    }

    pub fn actions_for(&self, peer: PeerId) -> Vec<PeerAction> {
        self.records().into_iter().filter(|(p, _)| *p == peer).map(|(_, a)| a).collect()
    }
}

#[async_trait]
impl Reputation for RecordingReputation {
    async fn record(&self, peer: PeerId, action: PeerAction, _reason: &str) {
        self.records.lock().unwrap().push((peer, action));
    }
}
