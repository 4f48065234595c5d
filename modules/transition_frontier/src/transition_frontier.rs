//! Keystone transition frontier
//! Bounded tree of validated, ledger-applied blocks. One writer mutates it;
//! everyone else reads immutable snapshots.

pub mod breadcrumb;
pub mod breadcrumb_builder;
pub mod configuration;
pub mod frontier_error;
pub mod frontier_tree;
pub mod processor;
pub mod transition_validator;

use std::sync::Arc;

use keystone_common::{consensus::Consensus, BlockHash};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

pub use breadcrumb::Breadcrumb;
pub use breadcrumb_builder::{build_breadcrumb, build_subtrees, BuildError};
pub use configuration::FrontierConfig;
pub use frontier_error::FrontierError;
pub use frontier_tree::{FrontierSnapshot, FrontierTree, InsertOutcome};
pub use processor::{CatchupForest, FrontierProcessor};
pub use transition_validator::FrontierTransitionValidator;

type SnapshotSender = watch::Sender<Option<Arc<FrontierSnapshot>>>;
type SnapshotReceiver = watch::Receiver<Option<Arc<FrontierSnapshot>>>;

/// Bounded queue carrying catchup output to the frontier processor
pub fn catchup_output_queue(config: &FrontierConfig) -> (mpsc::Sender<CatchupForest>, mpsc::Receiver<CatchupForest>) {
    mpsc::channel(config.output_queue_depth.max(1))
}

/// The single mutation entry point of the frontier.
///
/// Every successful mutation publishes a fresh snapshot to all readers.
pub struct FrontierWriter {
    tree: Option<FrontierTree>,
    publisher: SnapshotSender,
}

impl FrontierWriter {
    /// Frontier rooted at `root` with finality depth `k`
    pub fn new(root: Breadcrumb, k: u64, consensus: Arc<dyn Consensus>) -> (Self, FrontierReader) {
        let (mut writer, reader) = Self::empty();
        writer.initialise(root, k, consensus);
        (writer, reader)
    }

    /// Frontier rooted at `root` with the configured finality depth
    pub fn from_config(root: Breadcrumb, config: &FrontierConfig, consensus: Arc<dyn Consensus>) -> (Self, FrontierReader) {
        Self::new(root, config.security_parameter, consensus)
    }

    /// Frontier before bootstrap: readers see no snapshot until [`initialise`](Self::initialise)
    pub fn empty() -> (Self, FrontierReader) {
        let (publisher, receiver) = watch::channel(None);
        (
            Self {
                tree: None,
                publisher,
            },
            FrontierReader { receiver },
        )
    }

    /// Install a root, replacing whatever frontier was there
    pub fn initialise(&mut self, root: Breadcrumb, k: u64, consensus: Arc<dyn Consensus>) {
        info!(root = %root.hash(), k, "frontier initialised");
        self.tree = Some(FrontierTree::new(root, k, consensus));
        self.publish();
    }

    pub fn insert(&mut self, breadcrumb: Breadcrumb) -> Result<InsertOutcome, FrontierError> {
        let tree = self.tree.as_mut().ok_or(FrontierError::Uninitialised)?;
        let outcome = tree.insert(breadcrumb)?;
        if !outcome.pruned.is_empty() {
            debug!(hash = %outcome.hash, pruned = outcome.pruned.len(), "frontier pruned");
        }
        self.publish();
        Ok(outcome)
    }

    pub fn snapshot(&self) -> Option<&FrontierSnapshot> {
        self.tree.as_ref().map(FrontierTree::snapshot)
    }

    pub fn reader(&self) -> FrontierReader {
        FrontierReader {
            receiver: self.publisher.subscribe(),
        }
    }

    fn publish(&self) {
        if let Some(tree) = &self.tree {
            self.publisher.send_replace(Some(Arc::new(tree.snapshot().clone())));
        }
    }
}

/// Cloneable read access to the latest published snapshot
#[derive(Debug, Clone)]
pub struct FrontierReader {
    receiver: SnapshotReceiver,
}

impl FrontierReader {
    pub fn snapshot(&self) -> Option<Arc<FrontierSnapshot>> {
        self.receiver.borrow().clone()
    }

    /// Wait until the frontier has been initialised
    pub async fn wait_for_snapshot(&self) -> Result<Arc<FrontierSnapshot>, FrontierError> {
        let mut receiver = self.receiver.clone();
        let snapshot = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| FrontierError::Closed)?;
        snapshot.clone().ok_or(FrontierError::Closed)
    }

    /// Wait until a breadcrumb with `hash` is in the frontier
    pub async fn wait_for_hash(&self, hash: BlockHash) -> Result<Arc<Breadcrumb>, FrontierError> {
        let mut receiver = self.receiver.clone();
        let snapshot = receiver
            .wait_for(|snapshot| snapshot.as_ref().is_some_and(|s| s.contains(&hash)))
            .await
            .map_err(|_| FrontierError::Closed)?;
        snapshot.as_ref().and_then(|s| s.get(&hash).cloned()).ok_or(FrontierError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_common::{
        ledger::{Ledger, LedgerDiff},
        Block,
    };
    use keystone_test_utils::{chain, consensus::LongestChain};
    use std::time::Duration;

    fn genesis_writer() -> (FrontierWriter, FrontierReader, Block, Ledger) {
        let (genesis, ledger) = chain::genesis();
        let root = Breadcrumb::root(chain::verified(&genesis), ledger.clone()).unwrap();
        let (writer, reader) = FrontierWriter::new(root, 10, Arc::new(LongestChain));
        (writer, reader, genesis, ledger)
    }

    #[test]
    fn root_with_wrong_ledger_is_refused() {
        let (genesis, _) = chain::genesis();
        let ledger = chain::genesis_ledger()
            .apply_diff(&LedgerDiff::coinbase_only(chain::key(9), 1))
            .unwrap();
        assert!(matches!(
            Breadcrumb::root(chain::verified(&genesis), ledger),
            Err(BuildError::LedgerHashMismatch { .. })
        ));
    }

    #[test]
    fn empty_frontier_has_no_snapshot_and_refuses_inserts() {
        let (mut writer, reader) = FrontierWriter::empty();
        assert!(reader.snapshot().is_none());

        let (genesis, ledger) = chain::genesis();
        let (block, next) = chain::child(&genesis, &ledger, 1);
        assert_eq!(writer.insert(Breadcrumb::new(block, next)), Err(FrontierError::Uninitialised));
    }

    #[tokio::test]
    async fn initialise_wakes_snapshot_waiters() {
        let (mut writer, reader) = FrontierWriter::empty();
        let waiter = tokio::spawn({
            let reader = reader.clone();
            async move { reader.wait_for_snapshot().await }
        });

        let (genesis, ledger) = chain::genesis();
        writer.initialise(Breadcrumb::new(genesis.clone(), ledger), 3, Arc::new(LongestChain));

        let snapshot = waiter.await.unwrap().unwrap();
        assert_eq!(snapshot.root().hash(), genesis.hash());
        assert_eq!(snapshot.k(), 3);
    }

    #[tokio::test]
    async fn readers_keep_their_snapshot_across_inserts() {
        let (mut writer, reader, genesis, ledger) = genesis_writer();
        let before = reader.snapshot().unwrap();

        let (block, next) = chain::child(&genesis, &ledger, 1);
        writer.insert(Breadcrumb::new(block.clone(), next)).unwrap();

        assert_eq!(before.len(), 1);
        let after = reader.snapshot().unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after.best_tip().hash(), block.hash());
        assert_eq!(writer.reader().snapshot().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn wait_for_hash_resolves_on_insert() {
        let (mut writer, reader, genesis, ledger) = genesis_writer();
        let (block, next) = chain::child(&genesis, &ledger, 1);
        let hash = block.hash();

        let waiter = tokio::spawn(async move { reader.wait_for_hash(hash).await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        writer.insert(Breadcrumb::new(block, next)).unwrap();
        let breadcrumb = waiter.await.unwrap().unwrap();
        assert_eq!(breadcrumb.hash(), hash);
    }

    #[tokio::test]
    async fn wait_for_present_hash_is_immediate() {
        let (_writer, reader, genesis, _) = genesis_writer();
        let found = tokio::time::timeout(Duration::from_millis(10), reader.wait_for_hash(genesis.hash()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.hash(), genesis.hash());
    }

    #[tokio::test]
    async fn wait_for_hash_fails_when_writer_goes_away() {
        let (writer, reader, _, _) = genesis_writer();
        let waiter = tokio::spawn(async move { reader.wait_for_hash(BlockHash::new([7; 32])).await });
        tokio::task::yield_now().await;
        drop(writer);
        assert_eq!(waiter.await.unwrap(), Err(FrontierError::Closed));
    }
}
