//! Frontier processor: the daemon that owns the frontier writer.
//! Catchup forests and self-produced breadcrumbs are serialised through it.

use keystone_common::{
    cached::{invalidate_forest, Cached, Outcome},
    rose_tree::RoseTree,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{Breadcrumb, FrontierError, FrontierWriter};

/// Built catchup output, rooted at breadcrumbs whose parents are in the frontier
pub type CatchupForest = Vec<RoseTree<Cached<Breadcrumb>>>;

pub struct FrontierProcessor {
    writer: FrontierWriter,
}

impl FrontierProcessor {
    pub fn new(writer: FrontierWriter) -> Self {
        Self { writer }
    }

    /// Insert everything arriving on either queue until both close
    pub async fn run(
        mut self,
        mut catchup_rx: mpsc::Receiver<CatchupForest>,
        mut produced_rx: mpsc::Receiver<Breadcrumb>,
    ) {
        let mut catchup_open = true;
        let mut produced_open = true;

        while catchup_open || produced_open {
            tokio::select! {
                forest = catchup_rx.recv(), if catchup_open => match forest {
                    Some(forest) => {
                        let inserted = self.apply_forest(forest);
                        debug!(inserted, "applied catchup forest");
                    }
                    None => catchup_open = false,
                },
                breadcrumb = produced_rx.recv(), if produced_open => match breadcrumb {
                    Some(breadcrumb) => self.apply_produced(breadcrumb),
                    None => produced_open = false,
                },
            }
        }

        info!("frontier processor stopped");
    }

    /// Insert a forest parent-first, returning how many breadcrumbs went in.
    ///
    /// Each node is resolved as soon as it is in the frontier. A node that
    /// cannot be inserted fails together with its descendants.
    pub fn apply_forest(&mut self, forest: CatchupForest) -> usize {
        forest.into_iter().map(|tree| self.apply_tree(tree)).sum()
    }

    fn apply_tree(&mut self, tree: RoseTree<Cached<Breadcrumb>>) -> usize {
        let RoseTree { value, children } = tree;
        let hash = value.hash();

        match self.writer.insert(value.value().clone()) {
            Ok(_) | Err(FrontierError::AlreadyPresent { .. }) => {
                value.resolve(Outcome::Success(hash));
                1 + children.into_iter().map(|child| self.apply_tree(child)).sum::<usize>()
            }
            Err(e) => {
                value.invalidate_with_failure();
                let released = invalidate_forest(children);
                warn!(%hash, released, "dropping catchup subtree: {e}");
                0
            }
        }
    }

    pub fn apply_produced(&mut self, breadcrumb: Breadcrumb) {
        let hash = breadcrumb.hash();
        match self.writer.insert(breadcrumb) {
            Ok(outcome) => info!(%hash, best_tip = outcome.best_tip_changed, "added produced block"),
            Err(e) => warn!(%hash, "produced block not added: {e}"),
        }
    }
}
