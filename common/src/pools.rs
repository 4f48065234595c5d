//! Transaction and completed-work pools consulted when building a block

use crate::ledger::{Payment, WorkStatement};

pub trait TransactionPool: Send + Sync {
    /// Up to `limit` pending transactions, best first
    fn transactions(&self, limit: usize) -> Vec<Payment>;
}

pub trait SnarkPool: Send + Sync {
    /// Completed work statements available for purchase
    fn completed_work(&self) -> Vec<WorkStatement>;
}
