//! Frontier tree data structure for the volatile window above the finalised root.
//!
//! The best tip follows the pluggable fork-choice rule. Whenever a retained
//! breadcrumb sits more than k generations below the root, the root moves
//! one step towards the best tip and everything that no longer descends from
//! the new root is dropped in the same step.

use std::sync::Arc;

use imbl::HashMap;
use keystone_common::{
    consensus::{Consensus, Selection},
    BlockHash,
};
use tracing::debug;

use crate::breadcrumb::Breadcrumb;
use crate::frontier_error::FrontierError;

/// A breadcrumb's position in the tree
#[derive(Debug, Clone)]
pub struct FrontierNode {
    pub breadcrumb: Arc<Breadcrumb>,
    /// Generations since the root the frontier started from
    pub height: u64,
    pub children: Vec<BlockHash>,
}

/// Immutable point-in-time view of the frontier.
///
/// Built on persistent maps, so cloning one is cheap and never observes a
/// later insertion.
#[derive(Debug, Clone)]
pub struct FrontierSnapshot {
    nodes: HashMap<BlockHash, FrontierNode>,
    root: Arc<Breadcrumb>,
    best_tip: Arc<Breadcrumb>,
    /// Height of the current root; grows by one per root advance
    root_generation: u64,
    k: u64,
}

impl FrontierSnapshot {
    pub fn root(&self) -> &Arc<Breadcrumb> {
        &self.root
    }

    pub fn best_tip(&self) -> &Arc<Breadcrumb> {
        &self.best_tip
    }

    pub fn get(&self, hash: &BlockHash) -> Option<&Arc<Breadcrumb>> {
        self.nodes.get(hash).map(|node| &node.breadcrumb)
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Finality depth
    pub fn k(&self) -> u64 {
        self.k
    }

    pub fn root_generation(&self) -> u64 {
        self.root_generation
    }

    /// Generations between the root and `hash`
    pub fn depth_of(&self, hash: &BlockHash) -> Option<u64> {
        self.nodes.get(hash).map(|node| node.height - self.root_generation)
    }

    /// Depth of the deepest retained breadcrumb
    pub fn max_depth(&self) -> u64 {
        self.nodes.values().map(|node| node.height - self.root_generation).max().unwrap_or(0)
    }

    pub fn successors(&self, hash: &BlockHash) -> Vec<BlockHash> {
        self.nodes.get(hash).map(|node| node.children.clone()).unwrap_or_default()
    }

    /// Hashes from `hash` back to the root inclusive; empty if unknown
    pub fn path_to_root(&self, hash: BlockHash) -> Vec<BlockHash> {
        let mut path = Vec::new();
        let mut current = hash;
        while let Some(node) = self.nodes.get(&current) {
            path.push(current);
            if current == self.root.hash() {
                break;
            }
            current = node.breadcrumb.parent_hash();
        }
        path
    }

    /// Breadcrumbs from the root to the best tip
    pub fn best_chain(&self) -> Vec<Arc<Breadcrumb>> {
        let mut chain: Vec<_> = self
            .path_to_root(self.best_tip.hash())
            .iter()
            .filter_map(|hash| self.get(hash).cloned())
            .collect();
        chain.reverse();
        chain
    }

    /// Child of the root on the path towards `target`, `None` if `target` is the root
    fn successor_towards(&self, target: BlockHash) -> Option<BlockHash> {
        let root = self.root.hash();
        let mut current = target;
        loop {
            if current == root {
                return None;
            }
            let parent = self.nodes.get(&current)?.breadcrumb.parent_hash();
            if parent == root {
                return Some(current);
            }
            current = parent;
        }
    }
}

/// What an insertion changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOutcome {
    pub hash: BlockHash,
    pub best_tip_changed: bool,
    /// Breadcrumbs removed by a root advance, including old roots
    pub pruned: Vec<BlockHash>,
}

/// Mutable frontier. Operations are single-threaded; the owning
/// writer handles publication to readers.
pub struct FrontierTree {
    state: FrontierSnapshot,
    consensus: Arc<dyn Consensus>,
}

impl FrontierTree {
    /// Create a frontier holding only `root`.
    ///
    /// `k` is the finality depth: no breadcrumb is retained more than
    /// `k` generations below the root.
    pub fn new(root: Breadcrumb, k: u64, consensus: Arc<dyn Consensus>) -> Self {
        let root = Arc::new(root);
        let mut nodes = HashMap::new();
        nodes.insert(
            root.hash(),
            FrontierNode {
                breadcrumb: root.clone(),
                height: 0,
                children: Vec::new(),
            },
        );
        Self {
            state: FrontierSnapshot {
                nodes,
                best_tip: root.clone(),
                root,
                root_generation: 0,
                k,
            },
            consensus,
        }
    }

    /// Current state, cheap to clone into a published snapshot
    pub fn snapshot(&self) -> &FrontierSnapshot {
        &self.state
    }

    /// Add a breadcrumb whose parent is already present.
    ///
    /// Updates the best tip through fork choice and, if the depth bound is
    /// crossed, advances the root and prunes in the same call.
    pub fn insert(&mut self, breadcrumb: Breadcrumb) -> Result<InsertOutcome, FrontierError> {
        let hash = breadcrumb.hash();
        if self.state.nodes.contains_key(&hash) {
            return Err(FrontierError::AlreadyPresent { hash });
        }

        let parent_hash = breadcrumb.parent_hash();
        let Some(parent) = self.state.nodes.get_mut(&parent_hash) else {
            return Err(FrontierError::ParentNotFound { hash: parent_hash });
        };
        parent.children.push(hash);
        let height = parent.height + 1;

        let breadcrumb = Arc::new(breadcrumb);
        self.state.nodes.insert(
            hash,
            FrontierNode {
                breadcrumb: breadcrumb.clone(),
                height,
                children: Vec::new(),
            },
        );

        let best_tip_changed = self
            .consensus
            .select(self.state.best_tip.consensus_state(), breadcrumb.consensus_state())
            == Selection::Take;
        if best_tip_changed {
            debug!(%hash, "new best tip");
            self.state.best_tip = breadcrumb;
        }

        let pruned = self.advance_root();
        Ok(InsertOutcome {
            hash,
            best_tip_changed,
            pruned,
        })
    }

    /// Move the root towards the best tip until the depth bound holds again.
    fn advance_root(&mut self) -> Vec<BlockHash> {
        let mut pruned = Vec::new();
        while self.state.max_depth() > self.state.k {
            let old_root = self.state.root.hash();
            let Some(next_root) = self.state.successor_towards(self.state.best_tip.hash()) else {
                // Fork choice still prefers the root itself: drop what grew past k
                pruned.extend(self.prune_deeper_than_k());
                break;
            };

            let siblings: Vec<BlockHash> =
                self.state.successors(&old_root).into_iter().filter(|h| *h != next_root).collect();
            for sibling in siblings {
                pruned.extend(self.remove_subtree(sibling));
            }
            self.state.nodes.remove(&old_root);
            pruned.push(old_root);

            let Some(new_root) = self.state.get(&next_root).cloned() else {
                break;
            };
            self.state.root = new_root;
            self.state.root_generation += 1;
            debug!(
                root = %next_root,
                root_generation = self.state.root_generation,
                "advanced frontier root"
            );
        }
        pruned
    }

    fn prune_deeper_than_k(&mut self) -> Vec<BlockHash> {
        let k = self.state.k;
        let too_deep: Vec<BlockHash> = self
            .state
            .nodes
            .iter()
            .filter(|(_, node)| node.height - self.state.root_generation > k)
            .map(|(hash, _)| *hash)
            .collect();
        too_deep.into_iter().flat_map(|hash| self.remove_subtree(hash)).collect()
    }

    /// Remove a breadcrumb and all its descendants, detaching it from its parent
    fn remove_subtree(&mut self, hash: BlockHash) -> Vec<BlockHash> {
        let Some(parent_hash) = self.state.nodes.get(&hash).map(|n| n.breadcrumb.parent_hash())
        else {
            return Vec::new();
        };
        if let Some(parent) = self.state.nodes.get_mut(&parent_hash) {
            parent.children.retain(|child| *child != hash);
        }

        let mut removed = Vec::new();
        let mut stack = vec![hash];
        while let Some(h) = stack.pop() {
            if let Some(node) = self.state.nodes.remove(&h) {
                stack.extend(node.children);
                removed.push(h);
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_common::{ledger::Ledger, Block};
    use keystone_test_utils::{chain, consensus::LongestChain};

    struct Fixture {
        tree: FrontierTree,
        genesis: Block,
        ledger: Ledger,
    }

    fn make_tree(k: u64) -> Fixture {
        let (genesis, ledger) = chain::genesis();
        let root = Breadcrumb::new(genesis.clone(), ledger.clone());
        Fixture {
            tree: FrontierTree::new(root, k, Arc::new(LongestChain)),
            genesis,
            ledger,
        }
    }

    /// Extend `parent` by `len` blocks, inserting each; returns the blocks
    fn grow(tree: &mut FrontierTree, parent: &Block, ledger: &Ledger, len: usize, seed: u8) -> Vec<Block> {
        chain::extend(parent, ledger, len, seed)
            .into_iter()
            .map(|(block, ledger)| {
                tree.insert(Breadcrumb::new(block.clone(), ledger)).unwrap();
                block
            })
            .collect()
    }

    #[test]
    fn test_new_creates_single_node_tree() {
        let f = make_tree(5);
        let snapshot = f.tree.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.root().hash(), f.genesis.hash());
        assert_eq!(snapshot.best_tip().hash(), f.genesis.hash());
        assert_eq!(snapshot.max_depth(), 0);
    }

    #[test]
    fn test_insert_with_unknown_parent_fails() {
        let mut f = make_tree(5);
        let (orphan_parent, orphan_ledger) = chain::child(&f.genesis, &f.ledger, 1);
        let (orphan, ledger) = chain::child(&orphan_parent, &orphan_ledger, 1);

        let err = f.tree.insert(Breadcrumb::new(orphan, ledger)).unwrap_err();
        assert_eq!(
            err,
            FrontierError::ParentNotFound {
                hash: orphan_parent.hash()
            }
        );
        assert_eq!(f.tree.snapshot().len(), 1);
    }

    #[test]
    fn test_insert_twice_fails() {
        let mut f = make_tree(5);
        let (block, ledger) = chain::child(&f.genesis, &f.ledger, 1);
        f.tree.insert(Breadcrumb::new(block.clone(), ledger.clone())).unwrap();
        assert_eq!(
            f.tree.insert(Breadcrumb::new(block.clone(), ledger)),
            Err(FrontierError::AlreadyPresent { hash: block.hash() })
        );
    }

    #[test]
    fn test_best_tip_follows_longer_branch() {
        let mut f = make_tree(10);
        let (genesis, ledger) = (f.genesis.clone(), f.ledger.clone());
        let short = grow(&mut f.tree, &genesis, &ledger, 2, 1);
        assert_eq!(f.tree.snapshot().best_tip().hash(), short[1].hash());

        let long = grow(&mut f.tree, &genesis, &ledger, 3, 2);
        let snapshot = f.tree.snapshot();
        assert_eq!(snapshot.best_tip().hash(), long[2].hash());
        assert_eq!(snapshot.best_chain().len(), 4);
    }

    #[test]
    fn test_shorter_branch_does_not_take_best_tip() {
        let mut f = make_tree(10);
        let (genesis, ledger) = (f.genesis.clone(), f.ledger.clone());
        let long = grow(&mut f.tree, &genesis, &ledger, 3, 1);
        let (fork, fork_ledger) = chain::child(&genesis, &ledger, 9);

        let outcome = f.tree.insert(Breadcrumb::new(fork, fork_ledger)).unwrap();
        assert!(!outcome.best_tip_changed);
        assert_eq!(f.tree.snapshot().best_tip().hash(), long[2].hash());
    }

    #[test]
    fn test_root_advances_past_k_and_prunes_losing_sibling() {
        let mut f = make_tree(2);
        let (genesis, ledger) = (f.genesis.clone(), f.ledger.clone());
        let (loser, loser_ledger) = chain::child(&genesis, &ledger, 9);
        f.tree.insert(Breadcrumb::new(loser.clone(), loser_ledger)).unwrap();

        let main = chain::extend(&genesis, &ledger, 3, 1);
        for (block, ledger) in &main[..2] {
            f.tree.insert(Breadcrumb::new(block.clone(), ledger.clone())).unwrap();
        }
        assert_eq!(f.tree.snapshot().root_generation(), 0);

        let (third, third_ledger) = main[2].clone();
        let outcome = f.tree.insert(Breadcrumb::new(third, third_ledger)).unwrap();

        let snapshot = f.tree.snapshot();
        assert_eq!(snapshot.root().hash(), main[0].0.hash());
        assert_eq!(snapshot.root_generation(), 1);
        assert!(!snapshot.contains(&genesis.hash()));
        assert!(!snapshot.contains(&loser.hash()));
        assert!(outcome.pruned.contains(&genesis.hash()));
        assert!(outcome.pruned.contains(&loser.hash()));
        assert_eq!(snapshot.max_depth(), 2);
    }

    #[test]
    fn test_fork_below_new_root_is_kept() {
        let mut f = make_tree(3);
        let (genesis, ledger) = (f.genesis.clone(), f.ledger.clone());
        let main = grow(&mut f.tree, &genesis, &ledger, 2, 1);

        // Fork off the first main block survives when the root moves onto it
        let first_ledger = f.tree.snapshot().get(&main[0].hash()).unwrap().ledger().clone();
        let fork = grow(&mut f.tree, &main[0], &first_ledger, 1, 7);
        let tip = f.tree.snapshot().best_tip().clone();
        grow(&mut f.tree, tip.block(), tip.ledger(), 2, 1);

        let snapshot = f.tree.snapshot();
        assert_eq!(snapshot.root().hash(), main[0].hash());
        assert!(snapshot.contains(&fork[0].hash()));
        assert_eq!(snapshot.successors(&main[0].hash()).len(), 2);
    }

    #[test]
    fn test_depth_never_exceeds_k_and_root_generation_never_decreases() {
        let k = 3;
        let mut f = make_tree(k);
        let (mut parent, mut ledger) = (f.genesis.clone(), f.ledger.clone());
        let mut last_root_generation = 0;

        for seed in 1..20u8 {
            // Occasionally start a side branch from the current root
            if seed % 4 == 0 {
                let root = f.tree.snapshot().root().clone();
                let (side, side_ledger) = chain::child(root.block(), root.ledger(), seed + 100);
                f.tree.insert(Breadcrumb::new(side, side_ledger)).unwrap();
            }
            let (block, next_ledger) = chain::child(&parent, &ledger, 1);
            f.tree.insert(Breadcrumb::new(block.clone(), next_ledger.clone())).unwrap();
            parent = block;
            ledger = next_ledger;

            let snapshot = f.tree.snapshot();
            assert!(snapshot.max_depth() <= k);
            assert!(snapshot.root_generation() >= last_root_generation);
            last_root_generation = snapshot.root_generation();
        }
        assert_eq!(f.tree.snapshot().root_generation(), 19 - k);
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_inserts() {
        let mut f = make_tree(5);
        let before = f.tree.snapshot().clone();
        let (genesis, ledger) = (f.genesis.clone(), f.ledger.clone());
        let added = grow(&mut f.tree, &genesis, &ledger, 2, 1);

        assert_eq!(before.len(), 1);
        assert!(!before.contains(&added[0].hash()));
        assert_eq!(f.tree.snapshot().len(), 3);
    }

    #[test]
    fn test_path_to_root() {
        let mut f = make_tree(5);
        let (genesis, ledger) = (f.genesis.clone(), f.ledger.clone());
        let added = grow(&mut f.tree, &genesis, &ledger, 3, 1);

        let path = f.tree.snapshot().path_to_root(added[2].hash());
        assert_eq!(
            path,
            vec![added[2].hash(), added[1].hash(), added[0].hash(), genesis.hash()]
        );
        assert_eq!(f.tree.snapshot().depth_of(&added[2].hash()), Some(3));
    }
}
