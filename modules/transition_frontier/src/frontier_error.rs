//! Error types for transition frontier operations.

use keystone_common::BlockHash;

/// Errors returned by [`FrontierTree`](crate::frontier_tree::FrontierTree) and the frontier handles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrontierError {
    /// The breadcrumb's parent hash is not present in the frontier.
    #[error("parent not found: {hash}")]
    ParentNotFound { hash: BlockHash },

    /// A breadcrumb with this hash is already in the frontier.
    #[error("already present: {hash}")]
    AlreadyPresent { hash: BlockHash },

    /// No root has been installed yet.
    #[error("frontier not initialised")]
    Uninitialised,

    /// The frontier writer has shut down.
    #[error("frontier closed")]
    Closed,
}
