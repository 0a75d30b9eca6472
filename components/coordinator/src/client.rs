use std::sync::Arc;

use config::{Configuration, ParallelReplicasSettings};
use log::{debug, info};
use model::{
    request::{RegisterRequest, SegmentAck, WorkRequest},
    response::{Announcement, WorkResponse},
    CoordinationError, PartMarks, QueryId, ReplicaId,
};
use tokio::{
    sync::{mpsc, oneshot},
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    coordinator::{Phase, QueryOutcome, ReadingCoordinator},
    liveness::HealthSignal,
    request::Request,
};

/// Handle to the coordinator of one query.
///
/// The coordinator runs as a single task owning all reading state; `CoordinatorClient` sends it requests
/// over a channel and awaits the answers. Clones are cheap and may be handed to every replica worker.
/// The coordinator task stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    query_id: QueryId,
    tx: mpsc::UnboundedSender<Request>,
    cancel: CancellationToken,
}

impl CoordinatorClient {
    /// Spawn the coordinator of `query_id` onto the current tokio runtime.
    pub fn start(
        query_id: QueryId,
        config: Arc<Configuration>,
        health: Box<dyn HealthSignal>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let coordinator =
            ReadingCoordinator::new(query_id.clone(), Arc::clone(&config), health, Instant::now());
        tokio::spawn(Self::spawn_loop(
            coordinator,
            rx,
            cancel.clone(),
            config.liveness_check_interval(),
        ));
        Self {
            query_id,
            tx,
            cancel,
        }
    }

    async fn spawn_loop(
        mut coordinator: ReadingCoordinator,
        mut rx: mpsc::UnboundedReceiver<Request>,
        cancel: CancellationToken,
        check_interval: std::time::Duration,
    ) {
        let mut interval = time::interval(check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut waiters: Vec<oneshot::Sender<Result<QueryOutcome, CoordinationError>>> = vec![];
        let mut cancelled = false;

        loop {
            tokio::select! {
                // Cancellation takes precedence over pending requests.
                biased;

                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    coordinator.cancel();
                }

                request = rx.recv() => {
                    match request {
                        Some(request) => {
                            Self::handle(&mut coordinator, request, &mut waiters);
                        }
                        None => {
                            debug!("All handles of the coordinator are dropped, quit");
                            coordinator.cancel();
                            break;
                        }
                    }
                }

                _ = interval.tick() => {
                    coordinator.check_liveness(Instant::now());
                }
            }

            if !waiters.is_empty() {
                if let Some(outcome) = coordinator.outcome() {
                    waiters.drain(..).for_each(|waiter| {
                        let _ = waiter.send(outcome.clone());
                    });
                }
            }
        }
    }

    fn handle(
        coordinator: &mut ReadingCoordinator,
        request: Request,
        waiters: &mut Vec<oneshot::Sender<Result<QueryOutcome, CoordinationError>>>,
    ) {
        match request {
            Request::Initialize {
                parts,
                settings,
                replica_count,
                tx,
            } => {
                let _ = tx.send(coordinator.initialize(
                    &parts,
                    &settings,
                    replica_count,
                    Instant::now(),
                ));
            }
            Request::Register { request, tx } => {
                let _ = tx.send(coordinator.register(request.replica, Instant::now()));
            }
            Request::Work { request, tx } => {
                let _ = tx.send(coordinator.request_tasks(request, Instant::now()));
            }
            Request::Phase { tx } => {
                let _ = tx.send(coordinator.phase());
            }
            Request::WaitFinished { tx } => {
                waiters.push(tx);
            }
        }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Request,
        op: &str,
    ) -> Result<T, CoordinationError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(build(tx)).map_err(|_| {
            CoordinationError::unexpected(format!("{} fail to send request to coordinator", op))
        })?;
        rx.await.map_err(|_| {
            CoordinationError::unexpected(format!("{} fail to receive response from coordinator", op))
        })
    }

    pub fn query_id(&self) -> &QueryId {
        &self.query_id
    }

    /// Fix the segment size and build the segment pool from the coordinator's view of the table.
    pub async fn initialize(
        &self,
        parts: Vec<PartMarks>,
        settings: ParallelReplicasSettings,
        replica_count: u64,
    ) -> Result<Announcement, CoordinationError> {
        self.call(
            |tx| Request::Initialize {
                parts,
                settings,
                replica_count,
                tx,
            },
            "initialize",
        )
        .await?
    }

    pub async fn register(&self, replica: ReplicaId) -> Result<Announcement, CoordinationError> {
        self.call(
            |tx| Request::Register {
                request: RegisterRequest { replica },
                tx,
            },
            "register",
        )
        .await?
    }

    pub async fn request_initial_tasks(
        &self,
        replica: ReplicaId,
        requested_count: usize,
    ) -> Result<WorkResponse, CoordinationError> {
        let request = WorkRequest::initial(replica, requested_count);
        self.call(|tx| Request::Work { request, tx }, "request initial tasks")
            .await?
    }

    /// Acknowledge `completed` segments together with their results and ask for more.
    pub async fn request_more_tasks(
        &self,
        replica: ReplicaId,
        completed: Vec<SegmentAck>,
        requested_count: usize,
    ) -> Result<WorkResponse, CoordinationError> {
        let request = WorkRequest::more(replica, completed, requested_count);
        self.call(|tx| Request::Work { request, tx }, "request more tasks")
            .await?
    }

    pub async fn phase(&self) -> Result<Phase, CoordinationError> {
        self.call(|tx| Request::Phase { tx }, "phase").await
    }

    /// Resolves once the query is finished, with the merged result or the reason it failed.
    pub async fn wait_finished(&self) -> Result<QueryOutcome, CoordinationError> {
        self.call(|tx| Request::WaitFinished { tx }, "wait finished")
            .await?
    }

    /// Cancel the query. Replicas get a cancellation on their next request.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!("Query[{}] Cancel reading", self.query_id);
            self.cancel.cancel();
        }
    }
}
