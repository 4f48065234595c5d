//! Keystone block producer module
//! Decides when the local key gets to propose and runs one build at a time
//! against the frontier's best tip.

pub mod configuration;
mod generate;
pub mod producer_error;
pub mod task_slot;
pub mod timer_slot;

use std::{sync::Arc, time::Duration};

use keystone_common::{
    clock::Clock,
    consensus::{Consensus, LocalStateSync, NextProposal, ProposalData},
    network::Network,
    pools::{SnarkPool, TransactionPool},
    verification::Prover,
    BlockHash, Keypair,
};
use keystone_module_transition_frontier::{Breadcrumb, FrontierReader};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

pub use configuration::ProducerConfig;
use generate::BuildContext;
pub use producer_error::ProducerError;
use task_slot::TaskSlot;
use timer_slot::TimerSlot;

const SYNC_RETRY_DELAY: Duration = Duration::from_secs(5);
const EVENT_QUEUE_DEPTH: usize = 32;

/// Capabilities the producer calls out to
#[derive(Clone)]
pub struct ProducerCollaborators {
    pub consensus: Arc<dyn Consensus>,
    pub prover: Arc<dyn Prover>,
    pub transaction_pool: Arc<dyn TransactionPool>,
    pub snark_pool: Arc<dyn SnarkPool>,
    pub network: Arc<dyn Network>,
    pub clock: Arc<dyn Clock>,
}

/// Bounded queue carrying produced breadcrumbs to the frontier processor
pub fn submission_queue(config: &ProducerConfig) -> (mpsc::Sender<Breadcrumb>, mpsc::Receiver<Breadcrumb>) {
    mpsc::channel(config.submission_queue_depth.max(1))
}

#[derive(Debug)]
enum ProducerEvent {
    CheckForProposal,
    Propose(ProposalData),
    BuildSettled {
        id: u64,
        result: Result<BlockHash, ProducerError>,
    },
}

/// Lets the node controller poke a running producer
#[derive(Clone)]
pub struct ProducerHandle {
    events: mpsc::Sender<ProducerEvent>,
}

impl ProducerHandle {
    /// Re-run the proposal check, for example after the best tip changed.
    /// A resulting build supersedes the one in flight.
    ///
    /// Returns false once the producer has stopped.
    pub async fn recheck(&self) -> bool {
        self.events.send(ProducerEvent::CheckForProposal).await.is_ok()
    }
}

pub struct BlockProducer {
    keypair: Option<Keypair>,
    sync_peers: usize,
    network: Arc<dyn Network>,
    context: Arc<BuildContext>,
    events_tx: mpsc::Sender<ProducerEvent>,
    events_rx: mpsc::Receiver<ProducerEvent>,
    timer: TimerSlot<ProducerEvent>,
    builds: TaskSlot,
    current_build: u64,
}

impl BlockProducer {
    pub fn new(
        config: ProducerConfig,
        keypair: Option<Keypair>,
        collaborators: ProducerCollaborators,
        frontier: FrontierReader,
        submission_tx: mpsc::Sender<Breadcrumb>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let context = Arc::new(BuildContext {
            consensus: collaborators.consensus,
            prover: collaborators.prover,
            transaction_pool: collaborators.transaction_pool,
            snark_pool: collaborators.snark_pool,
            clock: collaborators.clock,
            frontier,
            submission_tx,
            submit_lock: Mutex::new(()),
            max_transactions: config.max_transactions,
            coinbase_amount: config.coinbase_amount,
            delivery_timeout: config.delivery_timeout(),
        });

        Self {
            keypair,
            sync_peers: config.sync_peers,
            network: collaborators.network,
            context,
            timer: TimerSlot::new(events_tx.clone()),
            events_tx,
            events_rx,
            builds: TaskSlot::new(),
            current_build: 0,
        }
    }

    pub fn handle(&self) -> ProducerHandle {
        ProducerHandle {
            events: self.events_tx.clone(),
        }
    }

    /// Run the proposal cycle until the submission queue closes.
    ///
    /// Returns an error only for a produced block that never reached the
    /// frontier; proposing halts rather than risk producing twice.
    pub async fn run(mut self) -> Result<(), ProducerError> {
        let submissions = self.context.submission_tx.clone();
        let Some(keypair) = self.keypair.clone() else {
            info!("no block production key, producer idle");
            submissions.closed().await;
            return Ok(());
        };

        info!(producer = %keypair.public_key, "block producer started");
        self.check_for_proposal(&keypair);

        loop {
            tokio::select! {
                _ = submissions.closed() => {
                    info!("submission queue closed, block producer stopping");
                    return Ok(());
                }
                event = self.events_rx.recv() => {
                    // The producer holds a sender itself so the queue never closes
                    let Some(event) = event else { return Ok(()) };
                    match event {
                        ProducerEvent::CheckForProposal => self.check_for_proposal(&keypair),
                        ProducerEvent::Propose(proposal) => self.propose(&keypair, proposal),
                        ProducerEvent::BuildSettled { id, result } => {
                            // A submitted block that never landed is fatal even once superseded
                            if let Err(e @ ProducerError::DeliveryTimeout { .. }) = result {
                                return Err(e);
                            }
                            if id != self.current_build {
                                trace!(id, "ignoring superseded build");
                                continue;
                            }
                            match result {
                                Ok(hash) => info!(%hash, "produced block added to the frontier"),
                                Err(ProducerError::Cancelled) => debug!("build cancelled"),
                                Err(ProducerError::SubmissionClosed) => {
                                    info!("submission queue closed, block producer stopping");
                                    return Ok(());
                                }
                                Err(e) => error!("block production failed: {e}"),
                            }
                            self.check_for_proposal(&keypair);
                        }
                    }
                }
            }
        }
    }

    /// Decide what to do next on the current best tip
    fn check_for_proposal(&mut self, keypair: &Keypair) {
        let Some(snapshot) = self.context.frontier.snapshot() else {
            debug!("frontier not initialised, waiting for a snapshot");
            let frontier = self.context.frontier.clone();
            self.timer.arm(async move {
                match frontier.wait_for_snapshot().await {
                    Ok(_) => Some(ProducerEvent::CheckForProposal),
                    Err(e) => {
                        warn!("frontier closed before it was initialised, producer idle: {e}");
                        None
                    }
                }
            });
            return;
        };
        let tip = snapshot.best_tip().clone();
        drop(snapshot);

        let consensus = self.context.consensus.clone();
        if let Some(sync) = consensus.required_local_state_sync(tip.consensus_state()) {
            self.sync_local_state(sync);
            return;
        }

        let now = self.context.clock.now();
        match consensus.next_proposal(now, tip.consensus_state(), keypair) {
            NextProposal::CheckAgain(at) => {
                debug!(%at, tip = %tip.hash(), "no proposal slot yet");
                self.timer.schedule(at.saturating_duration_since(now), ProducerEvent::CheckForProposal);
            }
            NextProposal::ProposeNow(proposal) => {
                self.timer.cancel();
                self.propose(keypair, proposal);
            }
            NextProposal::Propose(at, proposal) => {
                info!(%at, slot = proposal.global_slot, "scheduled proposal");
                self.timer.schedule(at.saturating_duration_since(now), ProducerEvent::Propose(proposal));
            }
        }
    }

    /// Fetch missing local consensus state, then check again.
    /// Runs in the timer slot so a later check supersedes it.
    fn sync_local_state(&mut self, sync: LocalStateSync) {
        let network = self.network.clone();
        let consensus = self.context.consensus.clone();
        let sync_peers = self.sync_peers;
        info!(ledgers = sync.epoch_ledgers.len(), "local consensus state needs synchronising");

        self.timer.arm(async move {
            let peers = network.random_peers(sync_peers).await;
            if let Err(e) = consensus.sync_local_state(peers, sync).await {
                warn!("local state sync failed, retrying in {SYNC_RETRY_DELAY:?}: {e:#}");
                tokio::time::sleep(SYNC_RETRY_DELAY).await;
            }
            Some(ProducerEvent::CheckForProposal)
        });
    }

    /// Start a build, superseding any in flight
    fn propose(&mut self, keypair: &Keypair, proposal: ProposalData) {
        self.current_build += 1;
        let id = self.current_build;
        let context = self.context.clone();
        let events = self.events_tx.clone();
        let keypair = keypair.clone();
        let span = info_span!("propose", id, slot = proposal.global_slot);

        self.builds.dispatch(move |token| {
            async move {
                let result = context.generate_next_state(&keypair, proposal, token).await;
                let _ = events.send(ProducerEvent::BuildSettled { id, result }).await;
            }
            .instrument(span)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_common::{BlockTime, PeerId};
    use keystone_module_transition_frontier::FrontierWriter;
    use keystone_test_utils::{
        chain::{self, key},
        clock::TokioClock,
        consensus::{proposal, LongestChain, ScriptedConsensus},
        network::ScriptedNetwork,
        pools::StaticPools,
        proofs::FakeProver,
    };
    use tokio::time::{sleep, Instant};

    fn keypair() -> Keypair {
        Keypair { public_key: key(7) }
    }

    fn genesis_frontier() -> (FrontierWriter, FrontierReader) {
        let (genesis, ledger) = chain::genesis();
        let root = Breadcrumb::root(chain::verified(&genesis), ledger).unwrap();
        FrontierWriter::new(root, 10, Arc::new(LongestChain))
    }

    fn producer(
        frontier: FrontierReader,
        consensus: Arc<ScriptedConsensus>,
        prover: Arc<FakeProver>,
        network: Arc<ScriptedNetwork>,
        keypair: Option<Keypair>,
    ) -> (BlockProducer, mpsc::Receiver<Breadcrumb>) {
        let config = ProducerConfig::default();
        let (submission_tx, submissions) = submission_queue(&config);
        let collaborators = ProducerCollaborators {
            consensus,
            prover,
            transaction_pool: Arc::new(StaticPools::default()),
            snark_pool: Arc::new(StaticPools::default()),
            network,
            clock: Arc::new(TokioClock::starting_at(BlockTime::from_millis(10_000))),
        };
        let producer = BlockProducer::new(config, keypair, collaborators, frontier, submission_tx);
        (producer, submissions)
    }

    /// Insert the next submission, standing in for the frontier processor
    async fn deliver(writer: &mut FrontierWriter, submissions: &mut mpsc::Receiver<Breadcrumb>) -> Breadcrumb {
        let breadcrumb = submissions.recv().await.unwrap();
        writer.insert(breadcrumb.clone()).unwrap();
        breadcrumb
    }

    #[tokio::test(start_paused = true)]
    async fn propose_now_builds_immediately_on_best_tip() {
        let (mut writer, reader) = genesis_frontier();
        let genesis_hash = reader.snapshot().unwrap().root().hash();
        let consensus = Arc::new(ScriptedConsensus::new([NextProposal::ProposeNow(proposal(1, 9))]));
        let (producer, mut submissions) = producer(
            reader,
            consensus.clone(),
            Arc::new(FakeProver::new()),
            Arc::new(ScriptedNetwork::new()),
            Some(keypair()),
        );
        let start = Instant::now();
        let task = tokio::spawn(producer.run());

        let produced = deliver(&mut writer, &mut submissions).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(produced.parent_hash(), genesis_hash);
        assert_eq!(produced.header().producer, key(7));
        assert_eq!(writer.snapshot().unwrap().best_tip().hash(), produced.hash());

        sleep(Duration::from_secs(1)).await;
        let calls = consensus.calls();
        assert_eq!(calls.generate_transition, 1);
        // Checked again once the build settled
        assert_eq!(calls.next_proposal, 2);
        assert!(!task.is_finished());
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_proposal_waits_for_its_slot() {
        let (mut writer, reader) = genesis_frontier();
        let consensus = Arc::new(ScriptedConsensus::new([NextProposal::Propose(
            BlockTime::from_millis(15_000),
            proposal(5, 9),
        )]));
        let (producer, mut submissions) = producer(
            reader,
            consensus,
            Arc::new(FakeProver::new()),
            Arc::new(ScriptedNetwork::new()),
            Some(keypair()),
        );
        let start = Instant::now();
        let task = tokio::spawn(producer.run());

        let produced = deliver(&mut writer, &mut submissions).await;
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(produced.consensus_state().global_slot, 5);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn recheck_supersedes_build_in_flight() {
        let (mut writer, reader) = genesis_frontier();
        let consensus = Arc::new(ScriptedConsensus::new([NextProposal::ProposeNow(proposal(1, 1))]));
        let prover = Arc::new(FakeProver::new().with_delay(Duration::from_secs(10)));
        let (producer, mut submissions) = producer(
            reader,
            consensus.clone(),
            prover.clone(),
            Arc::new(ScriptedNetwork::new()),
            Some(keypair()),
        );
        let handle = producer.handle();
        let start = Instant::now();
        let task = tokio::spawn(producer.run());

        sleep(Duration::from_secs(2)).await;
        assert_eq!(prover.started(), 1);
        consensus.push(NextProposal::ProposeNow(proposal(2, 2)));
        assert!(handle.recheck().await);

        let produced = deliver(&mut writer, &mut submissions).await;
        assert_eq!(produced.consensus_state().global_slot, 2);
        assert_eq!(start.elapsed(), Duration::from_secs(12));

        sleep(Duration::from_secs(20)).await;
        // The first proof completed but its block was abandoned
        assert_eq!(prover.finished(), 2);
        assert!(submissions.try_recv().is_err());
        // Initial check, the recheck and the one after the second build
        assert_eq!(consensus.calls().next_proposal, 3);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn undelivered_block_halts_the_producer() {
        let (writer, reader) = genesis_frontier();
        let consensus = Arc::new(ScriptedConsensus::new([NextProposal::ProposeNow(proposal(1, 9))]));
        let (producer, mut submissions) = producer(
            reader,
            consensus,
            Arc::new(FakeProver::new()),
            Arc::new(ScriptedNetwork::new()),
            Some(keypair()),
        );
        let start = Instant::now();

        let result = producer.run().await;
        assert!(matches!(result, Err(ProducerError::DeliveryTimeout { .. })));
        assert!(start.elapsed() >= Duration::from_secs(15));
        assert!(submissions.try_recv().is_ok());
        assert_eq!(writer.snapshot().unwrap().best_tip().consensus_state().blockchain_length, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_block_halts_the_producer_even_when_superseded() {
        let (mut writer, reader) = genesis_frontier();
        let consensus = Arc::new(ScriptedConsensus::new([NextProposal::ProposeNow(proposal(1, 1))]));
        let (producer, mut submissions) = producer(
            reader,
            consensus.clone(),
            Arc::new(FakeProver::new()),
            Arc::new(ScriptedNetwork::new()),
            Some(keypair()),
        );
        let handle = producer.handle();
        let start = Instant::now();
        let task = tokio::spawn(producer.run());

        // The frontier loses the first block
        let lost = submissions.recv().await.unwrap();
        consensus.push(NextProposal::ProposeNow(proposal(2, 2)));
        assert!(handle.recheck().await);

        // Everything after it is inserted
        let inserter = tokio::spawn(async move {
            while let Some(breadcrumb) = submissions.recv().await {
                let _ = writer.insert(breadcrumb);
            }
        });

        let result = task.await.unwrap();
        assert!(
            matches!(result, Err(ProducerError::DeliveryTimeout { hash, .. }) if hash == lost.hash()),
            "{result:?}"
        );
        assert!(start.elapsed() >= Duration::from_secs(15));
        inserter.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn producer_without_key_never_proposes() {
        let (_writer, reader) = genesis_frontier();
        let consensus = Arc::new(ScriptedConsensus::new([NextProposal::ProposeNow(proposal(1, 9))]));
        let (producer, submissions) = producer(
            reader,
            consensus.clone(),
            Arc::new(FakeProver::new()),
            Arc::new(ScriptedNetwork::new()),
            None,
        );
        let task = tokio::spawn(producer.run());

        sleep(Duration::from_secs(60)).await;
        assert_eq!(consensus.calls().next_proposal, 0);

        drop(submissions);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn synchronises_local_state_before_proposing() {
        let (mut writer, reader) = genesis_frontier();
        let sync = LocalStateSync {
            epoch_ledgers: vec![keystone_common::LedgerHash::new([1; 32])],
        };
        let consensus =
            Arc::new(ScriptedConsensus::new([NextProposal::ProposeNow(proposal(1, 9))]).requiring_sync(sync, false));
        let network = Arc::new(ScriptedNetwork::new().with_empty_peers(5));
        let (producer, mut submissions) =
            producer(reader, consensus.clone(), Arc::new(FakeProver::new()), network.clone(), Some(keypair()));
        let task = tokio::spawn(producer.run());

        deliver(&mut writer, &mut submissions).await;
        assert_eq!(network.peer_requests(), vec![3]);
        assert_eq!(consensus.calls().sync_local_state, vec![vec![PeerId(0), PeerId(1), PeerId(2)]]);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sync_is_retried() {
        let (_writer, reader) = genesis_frontier();
        let sync = LocalStateSync {
            epoch_ledgers: Vec::new(),
        };
        let consensus = Arc::new(ScriptedConsensus::new(Vec::new()).requiring_sync(sync, true));
        let (producer, _submissions) = producer(
            reader,
            consensus.clone(),
            Arc::new(FakeProver::new()),
            Arc::new(ScriptedNetwork::new().with_empty_peers(2)),
            Some(keypair()),
        );
        let task = tokio::spawn(producer.run());

        sleep(Duration::from_secs(12)).await;
        let calls = consensus.calls();
        assert_eq!(calls.sync_local_state.len(), 3);
        assert_eq!(calls.next_proposal, 0);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_the_frontier_to_exist() {
        let (mut writer, reader) = FrontierWriter::empty();
        let consensus = Arc::new(ScriptedConsensus::new([NextProposal::ProposeNow(proposal(1, 9))]));
        let (producer, mut submissions) = producer(
            reader,
            consensus.clone(),
            Arc::new(FakeProver::new()),
            Arc::new(ScriptedNetwork::new()),
            Some(keypair()),
        );
        let task = tokio::spawn(producer.run());

        sleep(Duration::from_secs(1)).await;
        assert_eq!(consensus.calls().next_proposal, 0);

        let (genesis, ledger) = chain::genesis();
        writer.initialise(
            Breadcrumb::root(chain::verified(&genesis), ledger).unwrap(),
            10,
            Arc::new(LongestChain),
        );
        let produced = deliver(&mut writer, &mut submissions).await;
        assert_eq!(produced.parent_hash(), genesis.hash());
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn frontier_closed_before_initialising_leaves_producer_idle() {
        let (writer, reader) = FrontierWriter::empty();
        let consensus = Arc::new(ScriptedConsensus::new([NextProposal::ProposeNow(proposal(1, 9))]));
        let (producer, _submissions) = producer(
            reader,
            consensus.clone(),
            Arc::new(FakeProver::new()),
            Arc::new(ScriptedNetwork::new()),
            Some(keypair()),
        );
        let task = tokio::spawn(producer.run());

        drop(writer);
        sleep(Duration::from_secs(60)).await;
        assert_eq!(consensus.calls().next_proposal, 0);
        assert!(!task.is_finished());
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn prover_failure_moves_on_to_the_next_cycle() {
        let (_writer, reader) = genesis_frontier();
        let consensus = Arc::new(ScriptedConsensus::new([
            NextProposal::ProposeNow(proposal(1, 9)),
            NextProposal::ProposeNow(proposal(2, 9)),
        ]));
        let prover = Arc::new(FakeProver::failing());
        let (producer, mut submissions) = producer(
            reader,
            consensus.clone(),
            prover.clone(),
            Arc::new(ScriptedNetwork::new()),
            Some(keypair()),
        );
        let task = tokio::spawn(producer.run());

        sleep(Duration::from_secs(1)).await;
        assert_eq!(prover.started(), 2);
        assert_eq!(consensus.calls().next_proposal, 3);
        assert!(submissions.try_recv().is_err());
        assert!(!task.is_finished());
        task.abort();
    }
}
