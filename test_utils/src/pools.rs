//! Fixed transaction and work pools

use keystone_common::{
    ledger::{Payment, WorkStatement},
    pools::{SnarkPool, TransactionPool},
};

#[derive(Debug, Clone, Default)]
pub struct StaticPools {
    pub transactions: Vec<Payment>,
    pub completed_work: Vec<WorkStatement>,
}

impl TransactionPool for StaticPools {
    fn transactions(&self, limit: usize) -> Vec<Payment> {
        self.transactions.iter().take(limit).cloned().collect()
    }
}

impl SnarkPool for StaticPools {
    fn completed_work(&self) -> Vec<WorkStatement> {
        self.completed_work.clone()
    }
}
