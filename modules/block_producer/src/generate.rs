//! Build pipeline: diff, header, proof, submission and delivery confirmation

use std::{sync::Arc, time::Duration};

use keystone_common::{
    clock::Clock,
    consensus::{Consensus, ProposalData, Selection},
    ledger::{Coinbase, LedgerDiff},
    pools::{SnarkPool, TransactionPool},
    verification::{BlockPackage, Candidate, ProofVerified, Prover, ProverWitness},
    Block, BlockHash, Keypair,
};
use keystone_module_transition_frontier::{build_breadcrumb, Breadcrumb, FrontierReader};
use tokio::{
    sync::{mpsc, Mutex},
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::producer_error::ProducerError;

/// Everything a build needs besides its proposal and cancellation token
pub(crate) struct BuildContext {
    pub consensus: Arc<dyn Consensus>,
    pub prover: Arc<dyn Prover>,
    pub transaction_pool: Arc<dyn TransactionPool>,
    pub snark_pool: Arc<dyn SnarkPool>,
    pub clock: Arc<dyn Clock>,
    pub frontier: FrontierReader,
    pub submission_tx: mpsc::Sender<Breadcrumb>,
    /// Held from submission until delivery is confirmed
    pub submit_lock: Mutex<()>,
    pub max_transactions: usize,
    pub coinbase_amount: u64,
    pub delivery_timeout: Duration,
}

fn ensure_live(token: &CancellationToken) -> Result<(), ProducerError> {
    if token.is_cancelled() {
        Err(ProducerError::Cancelled)
    } else {
        Ok(())
    }
}

impl BuildContext {
    /// Build, prove and submit a block on the current best tip, then wait for
    /// it to appear in the frontier.
    pub(crate) async fn generate_next_state(
        &self,
        keypair: &Keypair,
        proposal: ProposalData,
        token: CancellationToken,
    ) -> Result<BlockHash, ProducerError> {
        ensure_live(&token)?;
        let snapshot = self.frontier.snapshot().ok_or(ProducerError::NoBestTip)?;
        let tip = snapshot.best_tip().clone();
        let root = snapshot.root().clone();
        drop(snapshot);

        // Diff application is a single synchronous step
        let diff = self.assemble_diff(keypair);
        let ledger = tip.ledger().apply_diff(&diff)?;
        debug!(
            transactions = diff.transactions.len(),
            work = diff.completed_work.len(),
            "applied diff to best tip"
        );
        ensure_live(&token)?;

        let summary = ledger.summary(&diff);
        let header = self.consensus.generate_transition(
            tip.header(),
            &summary,
            self.clock.now(),
            &proposal,
            keypair,
        );
        debug_assert!(
            self.consensus.select(tip.consensus_state(), &header.consensus_state) == Selection::Take
                && self.consensus.select(root.consensus_state(), &header.consensus_state) == Selection::Take,
            "generated block must be preferred over its parent and the root"
        );
        ensure_live(&token)?;

        let package = BlockPackage {
            header: header.clone(),
            diff: diff.clone(),
        };
        let witness = ProverWitness {
            previous_ledger_hash: tip.header().ledger_hash,
            next_ledger_hash: summary.ledger_hash,
            coinbase: diff.coinbase.clone(),
        };

        // Once issued the proof runs to completion; cancellation only abandons it
        let prover = self.prover.clone();
        let prev_header = tip.header().clone();
        let prev_proof = tip.block().proof.clone();
        let next_header = header.clone();
        let proving = tokio::spawn(async move {
            prover.prove(prev_header, prev_proof, next_header, package, witness).await
        });
        let proof = tokio::select! {
            joined = proving => joined
                .map_err(|e| ProducerError::Prover(e.into()))?
                .map_err(ProducerError::Prover)?,
            _ = token.cancelled() => {
                debug!("abandoning proof for cancelled build");
                return Err(ProducerError::Cancelled);
            }
        };
        ensure_live(&token)?;

        let block = Block { header, proof, diff };
        // The proof was produced by our own prover for exactly this header
        let candidate = Candidate::new(ProofVerified::assume_verified(block));
        let breadcrumb = build_breadcrumb(&tip, &candidate)?;
        let hash = breadcrumb.hash();

        let _submitting = self.submit_lock.lock().await;
        ensure_live(&token)?;
        self.submission_tx.send(breadcrumb).await.map_err(|_| ProducerError::SubmissionClosed)?;
        info!(%hash, slot = proposal.global_slot, "submitted produced block");

        match timeout(self.delivery_timeout, self.frontier.wait_for_hash(hash)).await {
            Ok(delivered) => {
                delivered?;
                Ok(hash)
            }
            Err(_) => {
                error!(%hash, timeout = ?self.delivery_timeout, "produced block never reached the frontier");
                Err(ProducerError::DeliveryTimeout {
                    hash,
                    timeout: self.delivery_timeout,
                })
            }
        }
    }

    /// Pool transactions, purchasable completed work and our coinbase
    fn assemble_diff(&self, keypair: &Keypair) -> LedgerDiff {
        let transactions = self.transaction_pool.transactions(self.max_transactions);

        let mut work_fees = 0u64;
        let completed_work = self
            .snark_pool
            .completed_work()
            .into_iter()
            .filter(|work| match work_fees.checked_add(work.fee) {
                Some(total) if total <= self.coinbase_amount => {
                    work_fees = total;
                    true
                }
                _ => false,
            })
            .collect();

        LedgerDiff {
            transactions,
            completed_work,
            coinbase: Coinbase {
                receiver: keypair.public_key,
                amount: self.coinbase_amount,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_common::{
        ledger::{Payment, WorkStatement},
        BlockTime, Hash,
    };
    use keystone_module_transition_frontier::FrontierWriter;
    use keystone_test_utils::{
        chain::{self, key},
        clock::TokioClock,
        consensus::{proposal, LongestChain},
        pools::StaticPools,
        proofs::FakeProver,
    };

    struct Fixture {
        context: BuildContext,
        writer: FrontierWriter,
        submissions: mpsc::Receiver<Breadcrumb>,
        prover: Arc<FakeProver>,
    }

    fn fixture(pools: StaticPools, prover: FakeProver) -> Fixture {
        let (genesis, ledger) = chain::genesis();
        let root = Breadcrumb::root(chain::verified(&genesis), ledger).unwrap();
        let (writer, reader) = FrontierWriter::new(root, 10, Arc::new(LongestChain));
        let (submission_tx, submissions) = mpsc::channel(4);
        let prover = Arc::new(prover);
        let pools = Arc::new(pools);
        Fixture {
            context: BuildContext {
                consensus: Arc::new(LongestChain),
                prover: prover.clone(),
                transaction_pool: pools.clone(),
                snark_pool: pools,
                clock: Arc::new(TokioClock::starting_at(BlockTime::from_millis(10_000))),
                frontier: reader,
                submission_tx,
                submit_lock: Mutex::new(()),
                max_transactions: 2,
                coinbase_amount: 720,
                delivery_timeout: Duration::from_secs(15),
            },
            writer,
            submissions,
            prover,
        }
    }

    fn keypair() -> Keypair {
        Keypair { public_key: key(7) }
    }

    fn payment(nonce: u64) -> Payment {
        Payment {
            from: key(1),
            to: key(2),
            amount: 10,
            fee: 1,
            nonce,
        }
    }

    fn work(n: u8, fee: u64) -> WorkStatement {
        WorkStatement {
            id: Hash::new([n; 32]),
            prover: key(3),
            fee,
        }
    }

    #[tokio::test]
    async fn diff_is_bounded_by_pool_limit_and_coinbase() {
        let pools = StaticPools {
            transactions: (0..5).map(payment).collect(),
            completed_work: vec![work(1, 500), work(2, 300), work(3, 200)],
        };
        let f = fixture(pools, FakeProver::new());

        let diff = f.context.assemble_diff(&keypair());
        assert_eq!(diff.transactions.len(), 2);
        assert_eq!(diff.completed_work, vec![work(1, 500), work(3, 200)]);
        assert_eq!(diff.coinbase.receiver, key(7));
        assert_eq!(diff.coinbase.amount, 720);
    }

    #[tokio::test]
    async fn builds_and_submits_on_best_tip() {
        let pools = StaticPools {
            transactions: vec![payment(0)],
            completed_work: Vec::new(),
        };
        let mut f = fixture(pools, FakeProver::new());
        let genesis_hash = f.writer.snapshot().unwrap().root().hash();

        // Stand in for the frontier processor
        let mut writer = f.writer;
        let mut submissions = f.submissions;
        let inserter = tokio::spawn(async move {
            let breadcrumb = submissions.recv().await.unwrap();
            writer.insert(breadcrumb).unwrap();
            writer
        });

        let hash = f
            .context
            .generate_next_state(&keypair(), proposal(1, 9), CancellationToken::new())
            .await
            .unwrap();
        f.writer = inserter.await.unwrap();

        let snapshot = f.writer.snapshot().unwrap();
        let produced = snapshot.get(&hash).unwrap();
        assert_eq!(produced.parent_hash(), genesis_hash);
        assert_eq!(produced.header().producer, key(7));
        assert_eq!(produced.block().proof.0, hash.to_vec());
        assert_eq!(produced.ledger().account(&key(1)).unwrap().nonce, 1);
        assert_eq!(f.prover.finished(), 1);
    }

    #[tokio::test]
    async fn cancelled_build_does_nothing() {
        let mut f = fixture(StaticPools::default(), FakeProver::new());
        let token = CancellationToken::new();
        token.cancel();

        let result = f.context.generate_next_state(&keypair(), proposal(1, 9), token).await;
        assert!(matches!(result, Err(ProducerError::Cancelled)));
        assert_eq!(f.prover.started(), 0);
        assert!(f.submissions.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_proving_abandons_without_interrupting() {
        let mut f = fixture(StaticPools::default(), FakeProver::new().with_delay(Duration::from_secs(5)));
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });

        let result = f.context.generate_next_state(&keypair(), proposal(1, 9), token).await;
        assert!(matches!(result, Err(ProducerError::Cancelled)));
        assert_eq!(f.prover.started(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(f.prover.finished(), 1);
        assert!(f.submissions.try_recv().is_err());
    }

    #[tokio::test]
    async fn diff_that_does_not_apply_fails_the_build() {
        let pools = StaticPools {
            transactions: vec![payment(5)],
            completed_work: Vec::new(),
        };
        let f = fixture(pools, FakeProver::new());

        let result = f.context.generate_next_state(&keypair(), proposal(1, 9), CancellationToken::new()).await;
        assert!(matches!(result, Err(ProducerError::Ledger(_))));
        assert_eq!(f.prover.started(), 0);
    }

    #[tokio::test]
    async fn prover_failure_is_reported() {
        let f = fixture(StaticPools::default(), FakeProver::failing());
        let result = f.context.generate_next_state(&keypair(), proposal(1, 9), CancellationToken::new()).await;
        assert!(matches!(result, Err(ProducerError::Prover(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn block_that_never_lands_times_out() {
        let mut f = fixture(StaticPools::default(), FakeProver::new());
        let start = tokio::time::Instant::now();

        let result = f.context.generate_next_state(&keypair(), proposal(1, 9), CancellationToken::new()).await;
        assert!(matches!(result, Err(ProducerError::DeliveryTimeout { .. })));
        assert!(start.elapsed() >= Duration::from_secs(15));
        // It was submitted, just never inserted
        assert!(f.submissions.try_recv().is_ok());
    }
}
