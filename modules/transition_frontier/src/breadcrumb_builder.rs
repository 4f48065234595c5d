//! Breadcrumb builder
//!
//! Applies candidate diffs onto parent ledgers. Whole forests are built
//! all-or-nothing: either every node gets a breadcrumb or the call fails and
//! every pending cache entry in the forest is released.

use keystone_common::{
    cached::{invalidate_forest, Cached},
    ledger::LedgerError,
    rose_tree::RoseTree,
    verification::Candidate,
    BlockHash, LedgerHash,
};
use thiserror::Error;
use tracing::debug;

use crate::breadcrumb::Breadcrumb;
use crate::frontier_tree::FrontierSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("parent {hash} is not in the frontier")]
    ParentMissing { hash: BlockHash },

    #[error("block {hash} expects parent {expected}, offered {got}")]
    ParentMismatch {
        hash: BlockHash,
        expected: BlockHash,
        got: BlockHash,
    },

    #[error("diff of block {hash} does not apply: {source}")]
    Ledger {
        hash: BlockHash,
        #[source]
        source: LedgerError,
    },

    #[error("block {hash} commits to ledger {expected} but its diff produces {actual}")]
    LedgerHashMismatch {
        hash: BlockHash,
        expected: LedgerHash,
        actual: LedgerHash,
    },

    #[error("forest of depth {depth} exceeds the finality depth {k}")]
    TooDeep { depth: usize, k: u64 },
}

/// Apply `candidate` on top of `parent`
pub fn build_breadcrumb(parent: &Breadcrumb, candidate: &Candidate) -> Result<Breadcrumb, BuildError> {
    let hash = candidate.hash();
    if candidate.parent_hash() != parent.hash() {
        return Err(BuildError::ParentMismatch {
            hash,
            expected: candidate.parent_hash(),
            got: parent.hash(),
        });
    }

    let block = candidate.block();
    let ledger = parent
        .ledger()
        .apply_diff(&block.diff)
        .map_err(|source| BuildError::Ledger { hash, source })?;

    let actual = ledger.hash();
    if actual != block.header.ledger_hash {
        return Err(BuildError::LedgerHashMismatch {
            hash,
            expected: block.header.ledger_hash,
            actual,
        });
    }

    Ok(Breadcrumb::new(block.clone(), ledger))
}

/// Build every candidate in `forest`, whose roots are children of `initial_hash`.
///
/// Each node's breadcrumb is built on its tree parent's, the roots on the
/// snapshot's breadcrumb at `initial_hash`. On any failure nothing is
/// returned and every cache entry in `forest` is invalidated.
pub fn build_subtrees(
    snapshot: &FrontierSnapshot,
    initial_hash: BlockHash,
    forest: Vec<RoseTree<Cached<Candidate>>>,
) -> Result<Vec<RoseTree<Cached<Breadcrumb>>>, BuildError> {
    let built = match build_forest(snapshot, initial_hash, &forest) {
        Ok(built) => built,
        Err(e) => {
            let released = invalidate_forest(forest);
            debug!(%initial_hash, released, "breadcrumb build failed: {e}");
            return Err(e);
        }
    };

    Ok(forest.into_iter().zip(built).map(|(candidates, breadcrumbs)| attach(candidates, breadcrumbs)).collect())
}

fn build_forest(
    snapshot: &FrontierSnapshot,
    initial_hash: BlockHash,
    forest: &[RoseTree<Cached<Candidate>>],
) -> Result<Vec<RoseTree<Breadcrumb>>, BuildError> {
    if forest.is_empty() {
        return Ok(Vec::new());
    }

    let depth = forest.iter().map(RoseTree::depth).max().unwrap_or(0);
    if depth as u64 > snapshot.k() {
        return Err(BuildError::TooDeep {
            depth,
            k: snapshot.k(),
        });
    }

    let parent = snapshot.get(&initial_hash).ok_or(BuildError::ParentMissing { hash: initial_hash })?;
    forest.iter().map(|tree| build_tree(parent, tree)).collect()
}

fn build_tree(parent: &Breadcrumb, tree: &RoseTree<Cached<Candidate>>) -> Result<RoseTree<Breadcrumb>, BuildError> {
    let breadcrumb = build_breadcrumb(parent, tree.value.value())?;
    let children = tree
        .children
        .iter()
        .map(|child| build_tree(&breadcrumb, child))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RoseTree::new(breadcrumb, children))
}

/// Move each built breadcrumb into the cache handle of its candidate
fn attach(candidates: RoseTree<Cached<Candidate>>, built: RoseTree<Breadcrumb>) -> RoseTree<Cached<Breadcrumb>> {
    let RoseTree {
        value: breadcrumb,
        children: built_children,
    } = built;
    let children = candidates
        .children
        .into_iter()
        .zip(built_children)
        .map(|(candidate, breadcrumb)| attach(candidate, breadcrumb))
        .collect();
    RoseTree::new(candidates.value.transform(|_| breadcrumb), children)
}
