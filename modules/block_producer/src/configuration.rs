use std::time::Duration;

use anyhow::Result;
use config::Config;

const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 15;
const DEFAULT_SYNC_PEERS: usize = 3;
const DEFAULT_MAX_TRANSACTIONS: usize = 128;
const DEFAULT_SUBMISSION_QUEUE_DEPTH: usize = 16;
const DEFAULT_COINBASE_AMOUNT: u64 = 720;

#[derive(Clone, Debug, serde::Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ProducerConfig {
    /// Time a submitted block has to appear in the frontier
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
    /// Peers asked during local state sync
    #[serde(default = "default_sync_peers")]
    pub sync_peers: usize,
    #[serde(default = "default_max_transactions")]
    pub max_transactions: usize,
    #[serde(default = "default_submission_queue_depth")]
    pub submission_queue_depth: usize,
    #[serde(default = "default_coinbase_amount")]
    pub coinbase_amount: u64,
}

fn default_delivery_timeout_secs() -> u64 {
    DEFAULT_DELIVERY_TIMEOUT_SECS
}

fn default_sync_peers() -> usize {
    DEFAULT_SYNC_PEERS
}

fn default_max_transactions() -> usize {
    DEFAULT_MAX_TRANSACTIONS
}

fn default_submission_queue_depth() -> usize {
    DEFAULT_SUBMISSION_QUEUE_DEPTH
}

fn default_coinbase_amount() -> u64 {
    DEFAULT_COINBASE_AMOUNT
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_secs: DEFAULT_DELIVERY_TIMEOUT_SECS,
            sync_peers: DEFAULT_SYNC_PEERS,
            max_transactions: DEFAULT_MAX_TRANSACTIONS,
            submission_queue_depth: DEFAULT_SUBMISSION_QUEUE_DEPTH,
            coinbase_amount: DEFAULT_COINBASE_AMOUNT,
        }
    }
}

impl ProducerConfig {
    pub fn try_load(config: &Config) -> Result<Self> {
        let full_config = Config::builder().add_source(config.clone()).build()?;
        Ok(full_config.try_deserialize()?)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}
