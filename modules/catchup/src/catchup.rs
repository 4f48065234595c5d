//! Keystone catchup module
//! Fetches missing ancestry of orphaned blocks from peers, validates it and
//! hands the built breadcrumbs to the frontier processor.

pub mod catchup_error;
pub mod configuration;
mod path_walk;

use std::sync::Arc;

use keystone_common::{
    cached::{invalidate_forest, Cached},
    network::Network,
    reputation::{PeerAction, Reputation},
    rose_tree::RoseTree,
    verification::{Candidate, ProofValidator, TransitionValidator},
    Block, BlockHash, PeerId,
};
use keystone_module_transition_frontier::{build_subtrees, CatchupForest, FrontierReader, FrontierSnapshot};
use tokio::{
    sync::{mpsc, Semaphore},
    task::{JoinError, JoinSet},
};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

pub use catchup_error::CatchupError;
use catchup_error::PeerError;
pub use configuration::CatchupConfig;
use path_walk::VerifiedPath;

/// Request to reattach `target`, and the already validated descendants
/// waiting on it, to the frontier
#[derive(Debug)]
pub struct CatchupJob {
    pub target: BlockHash,
    /// Roots are children of `target`
    pub subtrees: Vec<RoseTree<Cached<Candidate>>>,
}

pub type CatchupJobSender = mpsc::Sender<CatchupJob>;

/// Bounded job queue sized from the configuration
pub fn job_queue(config: &CatchupConfig) -> (CatchupJobSender, mpsc::Receiver<CatchupJob>) {
    mpsc::channel(config.job_queue_depth.max(1))
}

/// Capabilities the catchup engine calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub network: Arc<dyn Network>,
    pub proof_validator: Arc<dyn ProofValidator>,
    pub transition_validator: Arc<dyn TransitionValidator>,
    pub reputation: Arc<dyn Reputation>,
    pub frontier: FrontierReader,
}

pub struct CatchupEngine {
    config: CatchupConfig,
    runner: Arc<JobRunner>,
}

impl CatchupEngine {
    pub fn new(config: CatchupConfig, collaborators: Collaborators) -> Self {
        let runner = Arc::new(JobRunner {
            num_peers: config.num_peers,
            network: collaborators.network,
            proof_validator: collaborators.proof_validator,
            transition_validator: collaborators.transition_validator,
            reputation: collaborators.reputation,
            frontier: collaborators.frontier,
        });
        Self { config, runner }
    }

    /// Process jobs until the job queue closes, then wait for the jobs in flight.
    ///
    /// Each job runs as its own task. At most `max-concurrent-jobs` run at once;
    /// while saturated the queue is left unread.
    pub async fn run(self, mut job_rx: mpsc::Receiver<CatchupJob>, output_tx: mpsc::Sender<CatchupForest>) {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_jobs.max(1)));
        let mut jobs = JoinSet::new();

        loop {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let Some(job) = job_rx.recv().await else {
                break;
            };

            let runner = self.runner.clone();
            let output_tx = output_tx.clone();
            let span = info_span!("catchup", target = %job.target);
            jobs.spawn(
                async move {
                    runner.process(job, output_tx).await;
                    drop(permit);
                }
                .instrument(span),
            );

            while let Some(joined) = jobs.try_join_next() {
                log_join(joined);
            }
        }

        while let Some(joined) = jobs.join_next().await {
            log_join(joined);
        }
        info!("catchup engine stopped");
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!("catchup job task failed: {e}");
    }
}

pub(crate) struct JobRunner {
    num_peers: usize,
    network: Arc<dyn Network>,
    proof_validator: Arc<dyn ProofValidator>,
    transition_validator: Arc<dyn TransitionValidator>,
    reputation: Arc<dyn Reputation>,
    frontier: FrontierReader,
}

impl JobRunner {
    async fn process(&self, job: CatchupJob, output_tx: mpsc::Sender<CatchupForest>) {
        let target = job.target;
        match self.catchup(job).await {
            Ok(forest) => {
                let breadcrumbs: usize = forest.iter().map(RoseTree::len).sum();
                match output_tx.send(forest).await {
                    Ok(()) => debug!(%target, breadcrumbs, "catchup complete"),
                    Err(mpsc::error::SendError(forest)) => {
                        invalidate_forest(forest);
                        trace!(%target, "frontier output closed, dropping catchup result");
                    }
                }
            }
            Err(e) => info!(%target, "catchup failed: {e}"),
        }
    }

    /// Build the job's forest onto the frontier, fetching missing ancestry first.
    ///
    /// On failure every cache entry in the job has been released.
    async fn catchup(&self, job: CatchupJob) -> Result<CatchupForest, CatchupError> {
        let CatchupJob { target, subtrees } = job;

        let snapshot = match self.latest_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                invalidate_forest(subtrees);
                return Err(e);
            }
        };

        if snapshot.contains(&target) {
            debug!(%target, "target already in frontier");
            return build_subtrees(&snapshot, target, subtrees).map_err(|source| CatchupError::Build { target, source });
        }

        let VerifiedPath { anchor, path } = match self.fetch_path(target).await {
            Ok(found) => found,
            Err(e) => {
                let released = invalidate_forest(subtrees);
                debug!(%target, released, "released job forest");
                return Err(e);
            }
        };

        let forest = RoseTree::from_path(path, subtrees);
        let snapshot = match self.latest_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                invalidate_forest(forest);
                return Err(e);
            }
        };
        // Application failures are not attributed to the peer that sent the path
        build_subtrees(&snapshot, anchor, forest).map_err(|source| CatchupError::Build { target, source })
    }

    /// Probe peers one at a time until one supplies a verified path to `target`
    async fn fetch_path(&self, target: BlockHash) -> Result<VerifiedPath, CatchupError> {
        let peers = self.network.random_peers(self.num_peers).await;
        let mut failures = Vec::with_capacity(peers.len());

        for peer in peers {
            match self.try_peer(peer, target).await {
                Ok(found) => {
                    debug!(%peer, anchor = %found.anchor, blocks = found.path.len(), "peer supplied ancestry");
                    self.reputation.record(peer, PeerAction::SentUsefulData, "catchup path").await;
                    return Ok(found);
                }
                Err(e) => {
                    debug!(%peer, "catchup attempt failed: {e}");
                    failures.push(format!("{peer}: {e}"));
                }
            }
        }

        Err(CatchupError::AllPeersFailed { target, failures })
    }

    async fn try_peer(&self, peer: PeerId, target: BlockHash) -> Result<VerifiedPath, PeerError> {
        let blocks = match self.network.catchup_transition(peer, target).await {
            Ok(Some(blocks)) if !blocks.is_empty() => blocks,
            Ok(_) => return Err(PeerError::NoData),
            Err(e) => return Err(PeerError::Network(e)),
        };

        let terminal = blocks.last().map(Block::hash).unwrap_or_default();
        if terminal != target {
            self.penalise(peer, PeerAction::ViolatedProtocol, "catchup path ends at the wrong block").await;
            return Err(PeerError::TerminalMismatch {
                expected: target,
                got: terminal,
            });
        }

        self.walk_path(peer, blocks).await
    }

    pub(crate) async fn penalise(&self, peer: PeerId, action: PeerAction, reason: &str) {
        warn!(%peer, %action, "penalising peer: {reason}");
        self.reputation.record(peer, action, reason).await;
    }

    fn latest_snapshot(&self) -> Result<Arc<FrontierSnapshot>, CatchupError> {
        self.frontier.snapshot().ok_or(CatchupError::NoFrontier)
    }
}
