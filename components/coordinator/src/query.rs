use std::sync::Arc;

use config::{Configuration, ParallelReplicasSettings};
use log::{debug, error, info, warn};
use model::{CoordinationError, QueryId, ReplicaDescriptor};
use tokio::task::JoinHandle;

use crate::{
    client::CoordinatorClient,
    coordinator::QueryOutcome,
    granule::{GranuleIndex, SegmentReader},
    liveness::TimeoutOnly,
    registry::CoordinatorRegistry,
    replica::{ReplicaWorker, WorkerReport},
};

/// A replica of the table together with the means to read its data.
pub struct Replica<I, R> {
    pub descriptor: ReplicaDescriptor,
    pub index: Arc<I>,
    pub reader: Arc<R>,
}

impl<I, R> Replica<I, R> {
    pub fn new(descriptor: ReplicaDescriptor, index: Arc<I>, reader: Arc<R>) -> Self {
        Self {
            descriptor,
            index,
            reader,
        }
    }
}

/// Drives a query on the initiator: starts its coordinator, lets the replicas read, then collects the result.
pub struct ParallelQuery {
    config: Arc<Configuration>,
    settings: ParallelReplicasSettings,
    registry: Arc<CoordinatorRegistry>,
}

impl ParallelQuery {
    pub fn new(
        config: Arc<Configuration>,
        settings: ParallelReplicasSettings,
        registry: Arc<CoordinatorRegistry>,
    ) -> Self {
        Self {
            config,
            settings,
            registry,
        }
    }

    /// Read the table described by `index` with up to `max_parallel_replicas` of the given replicas.
    ///
    /// The coordinator of the query is removed from the registry when this returns, whatever the outcome.
    pub async fn run<G, I, R>(
        &self,
        query_id: QueryId,
        index: &G,
        replicas: Vec<Replica<I, R>>,
    ) -> Result<QueryOutcome, CoordinationError>
    where
        G: GranuleIndex,
        I: GranuleIndex + 'static,
        R: SegmentReader + 'static,
    {
        let client = self.registry.start_query(
            query_id.clone(),
            Arc::clone(&self.config),
            Box::new(TimeoutOnly),
        )?;
        let result = self.drive(&client, index, replicas).await;
        self.registry.end_query(&query_id);

        match &result {
            Ok(outcome) => info!(
                "Query[{}] Read {} rows in {} segments, sum: {}",
                query_id, outcome.result.rows, outcome.segments_read, outcome.result.sum
            ),
            Err(e) => error!("Query[{}] Failed to read: {}", query_id, e),
        }
        result
    }

    async fn drive<G, I, R>(
        &self,
        client: &CoordinatorClient,
        index: &G,
        replicas: Vec<Replica<I, R>>,
    ) -> Result<QueryOutcome, CoordinationError>
    where
        G: GranuleIndex,
        I: GranuleIndex + 'static,
        R: SegmentReader + 'static,
    {
        let participants = self.select(replicas);
        client
            .initialize(
                index.parts(),
                self.settings.clone(),
                participants.len() as u64,
            )
            .await?;

        let workers: Vec<JoinHandle<Result<WorkerReport, CoordinationError>>> = participants
            .into_iter()
            .map(|replica| {
                let worker = ReplicaWorker::new(
                    replica.descriptor.id,
                    client.clone(),
                    Arc::clone(&self.config),
                    self.settings.clone(),
                    replica.index,
                    replica.reader,
                );
                tokio::spawn(worker.run())
            })
            .collect();

        let outcome = client.wait_finished().await;
        if outcome.is_err() {
            workers.iter().for_each(JoinHandle::abort);
            return outcome;
        }

        for worker in workers {
            match worker.await {
                Ok(Ok(report)) => debug!(
                    "Query[{}] Replica {} read segments {:?}",
                    client.query_id(),
                    report.replica,
                    report.segments
                ),
                // A replica lost on the way; its segments were read by others.
                Ok(Err(e)) => warn!("Query[{}] Replica quit early: {}", client.query_id(), e),
                Err(e) => {
                    return Err(CoordinationError::unexpected(format!(
                        "replica worker panicked: {}",
                        e
                    )))
                }
            }
        }
        outcome
    }

    /// Replicas taking part in the query, preferred ones first.
    fn select<I, R>(&self, mut replicas: Vec<Replica<I, R>>) -> Vec<Replica<I, R>> {
        replicas.sort_by_key(|replica| (replica.descriptor.priority, replica.descriptor.id));
        let limit = usize::try_from(self.settings.max_parallel_replicas).unwrap_or(usize::MAX);
        replicas.truncate(limit);
        replicas
    }
}
