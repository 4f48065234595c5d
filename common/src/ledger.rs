//! Account ledger and the transaction-and-work diff applied per block
//! Uses imbl collections so every breadcrumb can hold its own snapshot cheaply

use crate::hash::{Hash, LedgerHash};
use crate::types::PublicKey;
use imbl::OrdMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-account state
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub balance: u64,
    pub nonce: u64,
}

/// A signed payment between two accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub from: PublicKey,
    pub to: PublicKey,
    pub amount: u64,
    pub fee: u64,
    pub nonce: u64,
}

/// A completed off-chain work statement bought by the block producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkStatement {
    pub id: Hash<32>,
    pub prover: PublicKey,
    pub fee: u64,
}

/// Block reward paid to the producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coinbase {
    pub receiver: PublicKey,
    pub amount: u64,
}

/// Everything a block changes in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDiff {
    pub transactions: Vec<Payment>,
    pub completed_work: Vec<WorkStatement>,
    pub coinbase: Coinbase,
}

impl LedgerDiff {
    /// Diff carrying only the coinbase
    pub fn coinbase_only(receiver: PublicKey, amount: u64) -> Self {
        Self {
            transactions: Vec::new(),
            completed_work: Vec::new(),
            coinbase: Coinbase { receiver, amount },
        }
    }

    /// Total fees paid by the transactions in this diff
    pub fn transaction_fees(&self) -> Option<u64> {
        self.transactions.iter().try_fold(0u64, |acc, tx| acc.checked_add(tx.fee))
    }
}

/// What consensus sees of a freshly applied ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub ledger_hash: LedgerHash,
    pub supply_increase: u64,
}

/// Reasons a diff cannot be applied
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("unknown sender account {0}")]
    UnknownAccount(PublicKey),

    #[error("bad nonce for {account}: expected {expected}, got {got}")]
    BadNonce {
        account: PublicKey,
        expected: u64,
        got: u64,
    },

    #[error("insufficient balance for {account}: has {balance}, needs {needed}")]
    InsufficientBalance {
        account: PublicKey,
        balance: u64,
        needed: u64,
    },

    #[error("work fees {work_fees} exceed coinbase amount {coinbase}")]
    MalformedCoinbase { work_fees: u64, coinbase: u64 },

    #[error("balance overflow")]
    Overflow,
}

/// Immutable account ledger. Clones share structure.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    accounts: OrdMap<PublicKey, Account>,
}

impl Ledger {
    /// Build a ledger from initial balances
    pub fn genesis(balances: impl IntoIterator<Item = (PublicKey, u64)>) -> Self {
        let accounts = balances
            .into_iter()
            .map(|(key, balance)| (key, Account { balance, nonce: 0 }))
            .collect();
        Self { accounts }
    }

    pub fn account(&self, key: &PublicKey) -> Option<Account> {
        self.accounts.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Deterministic hash over all accounts in key order
    pub fn hash(&self) -> LedgerHash {
        let mut encoded = Vec::with_capacity(self.accounts.len() * 48);
        for (key, account) in self.accounts.iter() {
            encoded.extend_from_slice(key.as_slice());
            encoded.extend_from_slice(&account.balance.to_be_bytes());
            encoded.extend_from_slice(&account.nonce.to_be_bytes());
        }
        LedgerHash::digest_of([encoded.as_slice()])
    }

    /// Apply a diff, returning the resulting ledger.
    ///
    /// All-or-nothing: on error `self` is untouched and no partial result
    /// escapes.
    pub fn apply_diff(&self, diff: &LedgerDiff) -> Result<Ledger, LedgerError> {
        let work_fees = diff
            .completed_work
            .iter()
            .try_fold(0u64, |acc, work| acc.checked_add(work.fee))
            .ok_or(LedgerError::Overflow)?;
        if work_fees > diff.coinbase.amount {
            return Err(LedgerError::MalformedCoinbase {
                work_fees,
                coinbase: diff.coinbase.amount,
            });
        }

        let mut next = self.clone();
        let mut collected_fees = 0u64;

        for payment in &diff.transactions {
            let mut sender =
                next.account(&payment.from).ok_or(LedgerError::UnknownAccount(payment.from))?;
            if sender.nonce != payment.nonce {
                return Err(LedgerError::BadNonce {
                    account: payment.from,
                    expected: sender.nonce,
                    got: payment.nonce,
                });
            }
            let needed = payment.amount.checked_add(payment.fee).ok_or(LedgerError::Overflow)?;
            if sender.balance < needed {
                return Err(LedgerError::InsufficientBalance {
                    account: payment.from,
                    balance: sender.balance,
                    needed,
                });
            }
            sender.balance -= needed;
            sender.nonce += 1;
            next.accounts.insert(payment.from, sender);
            next.credit(payment.to, payment.amount)?;
            collected_fees = collected_fees.checked_add(payment.fee).ok_or(LedgerError::Overflow)?;
        }

        for work in &diff.completed_work {
            next.credit(work.prover, work.fee)?;
        }

        let producer_reward = (diff.coinbase.amount - work_fees)
            .checked_add(collected_fees)
            .ok_or(LedgerError::Overflow)?;
        next.credit(diff.coinbase.receiver, producer_reward)?;

        Ok(next)
    }

    /// Summary of this ledger as the result of applying `diff`
    pub fn summary(&self, diff: &LedgerDiff) -> LedgerSummary {
        LedgerSummary {
            ledger_hash: self.hash(),
            supply_increase: diff.coinbase.amount,
        }
    }

    fn credit(&mut self, key: PublicKey, amount: u64) -> Result<(), LedgerError> {
        let mut account = self.account(&key).unwrap_or_default();
        account.balance = account.balance.checked_add(amount).ok_or(LedgerError::Overflow)?;
        self.accounts.insert(key, account);
        Ok(())
    }
}
