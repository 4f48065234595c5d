// Keystone common library - main library exports

pub mod cached;
pub mod clock;
pub mod consensus;
pub mod hash;
pub mod ledger;
pub mod network;
pub mod pools;
pub mod reputation;
pub mod rose_tree;
pub mod types;
pub mod verification;

// Flattened re-exports
pub use self::hash::{BlockHash, Hash, LedgerHash};
pub use self::types::*;
