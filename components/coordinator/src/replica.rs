use std::{collections::VecDeque, future::Future, sync::Arc};

use config::{Configuration, ParallelReplicasSettings};
use log::{debug, info, warn};
use model::{
    part,
    request::SegmentAck,
    response::Announcement,
    CoordinationError, ReplicaId, Segment,
};
use tokio::time;

use crate::{
    client::CoordinatorClient,
    granule::{GranuleIndex, SegmentReader},
    segment_size,
};

/// Summary of what a replica did for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub replica: ReplicaId,

    /// Segment size the replica read with, always the announced one.
    pub mark_segment_size: u64,

    /// Segment size the replica's own index analysis came up with, if it ran one.
    pub local_proposal: Option<u64>,

    /// Ids of the segments the replica read and acknowledged.
    pub segments: Vec<u64>,
}

/// Replica side of parallel reading.
///
/// A worker registers with the coordinator, takes the announced segment size as given, then keeps reading
/// granted segments and acknowledging them, one request at a time, until the coordinator tells it that no
/// more work will come.
pub struct ReplicaWorker<I, R> {
    log_ident: String,
    replica: ReplicaId,
    client: CoordinatorClient,
    config: Arc<Configuration>,
    settings: ParallelReplicasSettings,
    index: Arc<I>,
    reader: Arc<R>,
}

impl<I, R> ReplicaWorker<I, R>
where
    I: GranuleIndex,
    R: SegmentReader,
{
    pub fn new(
        replica: ReplicaId,
        client: CoordinatorClient,
        config: Arc<Configuration>,
        settings: ParallelReplicasSettings,
        index: Arc<I>,
        reader: Arc<R>,
    ) -> Self {
        Self {
            log_ident: format!("Query[{}] Replica[{}] ", client.query_id(), replica),
            replica,
            client,
            config,
            settings,
            index,
            reader,
        }
    }

    pub async fn run(self) -> Result<WorkerReport, CoordinationError> {
        let announcement = self.timed(self.client.register(self.replica)).await?;
        let local_proposal = self.analyse_locally(&announcement);
        let mark_segment_size = announcement.mark_segment_size;

        let response = self
            .timed(self.client.request_initial_tasks(
                self.replica,
                self.config.coordinator.initial_tasks_per_replica,
            ))
            .await
            .map_err(|e| self.abort(e))?;
        let segments = self
            .read_granted(response.segments, response.finished, mark_segment_size)
            .await?;

        info!(
            "{}Finished after reading {} segments",
            self.log_ident,
            segments.len()
        );
        Ok(WorkerReport {
            replica: self.replica,
            mark_segment_size,
            local_proposal,
            segments,
        })
    }

    /// Read and acknowledge granted segments, asking for more, until the coordinator reports the end of work.
    ///
    /// # Return
    /// Ids of the segments read, in reading order.
    async fn read_granted(
        &self,
        granted: Vec<Segment>,
        mut finished: bool,
        mark_segment_size: u64,
    ) -> Result<Vec<u64>, CoordinationError> {
        let mut pending = VecDeque::new();
        enqueue(&mut pending, granted);
        let mut segments = vec![];

        while !finished {
            let completed = match pending.pop_front() {
                Some(segment) => {
                    let ack = self.read(&segment, mark_segment_size)?;
                    segments.push(segment.id);
                    vec![ack]
                }
                None => {
                    // Nothing granted right now, but segments of a lost replica may come back.
                    time::sleep(self.config.liveness_check_interval()).await;
                    vec![]
                }
            };

            let response = self
                .timed(self.client.request_more_tasks(
                    self.replica,
                    completed,
                    self.config.coordinator.tasks_per_request,
                ))
                .await
                .map_err(|e| self.abort(e))?;
            enqueue(&mut pending, response.segments);
            finished = response.finished;
        }

        if !pending.is_empty() {
            // Granted segments went to other replicas while this one was considered lost.
            debug!(
                "{}Drop {} granted segments, the query is already finished",
                self.log_ident,
                pending.len()
            );
        }
        Ok(segments)
    }

    /// Run the replica's own index analysis when planning locally. Its proposal is informative only.
    fn analyse_locally(&self, announcement: &Announcement) -> Option<u64> {
        if !self.settings.replica_side_analysis() {
            return None;
        }

        let parts = self.index.parts();
        let (total_marks, total_rows, total_bytes) = part::totals(&parts);
        if total_marks != announcement.total_marks {
            warn!(
                "{}Local index has {} marks while the coordinator announced {}",
                self.log_ident, total_marks, announcement.total_marks
            );
        }

        let min_marks_per_task = segment_size::min_marks_for_concurrent_read(
            total_marks,
            total_rows,
            total_bytes,
            self.config.reader.min_rows_for_concurrent_read,
            self.config.reader.min_bytes_for_concurrent_read,
        );
        let proposal = segment_size::compute_segment_size(
            total_marks,
            self.settings.max_parallel_replicas,
            min_marks_per_task,
            self.settings.mark_segment_size,
        );
        if proposal != announcement.mark_segment_size {
            debug!(
                "{}Local analysis proposes mark_segment_size {}, use announced {}",
                self.log_ident, proposal, announcement.mark_segment_size
            );
        }
        Some(proposal)
    }

    fn read(&self, segment: &Segment, mark_segment_size: u64) -> Result<SegmentAck, CoordinationError> {
        if segment.len() > mark_segment_size {
            return Err(CoordinationError::unexpected(format!(
                "segment {} is larger than the announced mark_segment_size {}",
                segment, mark_segment_size
            )));
        }

        self.reader
            .read(segment)
            .map(|result| SegmentAck::new(segment.id, result))
            .map_err(|e| {
                warn!("{}Failed to read segment {}: {}", self.log_ident, segment, e);
                CoordinationError::unexpected(e.to_string())
            })
    }

    async fn timed<F, T>(&self, future: F) -> Result<T, CoordinationError>
    where
        F: Future<Output = Result<T, CoordinationError>>,
    {
        let timeout = self.config.request_timeout();
        match time::timeout(timeout, future).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{}Coordinator did not answer within {:?}", self.log_ident, timeout);
                Err(CoordinationError::ReplicaTimeout(timeout))
            }
        }
    }

    /// Stop reading. Results not yet acknowledged are discarded.
    fn abort(&self, e: CoordinationError) -> CoordinationError {
        match &e {
            CoordinationError::Cancelled(_) => {
                info!("{}Query cancelled, discard unacknowledged results", self.log_ident)
            }
            _ => warn!("{}Stop reading: {}", self.log_ident, e),
        }
        e
    }
}

/// Queue granted segments. A segment granted again after this replica was declared lost is queued once.
fn enqueue(pending: &mut VecDeque<Segment>, granted: Vec<Segment>) {
    for segment in granted {
        if pending.iter().all(|queued| queued.id != segment.id) {
            pending.push_back(segment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ReadError,
        granule::{MemoryTable, MockGranuleIndex, MockSegmentReader},
        liveness::TimeoutOnly,
    };
    use model::{request::PartialResult, segment::split_into_segments, PartMarks, QueryId};
    use std::{error::Error, time::Duration};

    fn config() -> Arc<Configuration> {
        let mut config = Configuration::default();
        config.coordinator.request_timeout_ms = 200;
        config.coordinator.liveness_check_interval_ms = 20;
        Arc::new(config)
    }

    fn settings(mark_segment_size: u64) -> ParallelReplicasSettings {
        ParallelReplicasSettings {
            mark_segment_size,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_read_all_segments() -> Result<(), Box<dyn Error>> {
        ulog::try_init_log();
        let table = Arc::new(MemoryTable::filled(1000, 1, 42));
        let config = config();
        let client = CoordinatorClient::start(
            QueryId::from("replica_read_all"),
            Arc::clone(&config),
            Box::new(TimeoutOnly),
        );
        client.initialize(table.parts(), settings(300), 1).await?;

        let worker = ReplicaWorker::new(
            ReplicaId(1),
            client.clone(),
            config,
            settings(300),
            Arc::clone(&table),
            Arc::clone(&table),
        );
        let report = worker.run().await?;
        assert_eq!(300, report.mark_segment_size);
        assert_eq!(Some(300), report.local_proposal);
        assert_eq!(vec![0, 1, 2, 3], report.segments);

        let outcome = client.wait_finished().await?;
        assert_eq!(42000, outcome.result.sum);
        assert_eq!(1000, outcome.result.rows);
        assert_eq!(Some(&4), outcome.per_replica.get(&ReplicaId(1)));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_over_segments_of_lost_replica() -> Result<(), Box<dyn Error>> {
        ulog::try_init_log();
        let table = Arc::new(MemoryTable::filled(1000, 1, 42));
        let config = config();
        let client = CoordinatorClient::start(
            QueryId::from("replica_take_over"),
            Arc::clone(&config),
            Box::new(TimeoutOnly),
        );
        client.initialize(table.parts(), settings(100), 2).await?;

        // Replica 1 takes two segments and disconnects without acknowledging them.
        client.register(ReplicaId(1)).await?;
        let abandoned = client.request_initial_tasks(ReplicaId(1), 2).await?;
        assert_eq!(2, abandoned.segments.len());

        let worker = ReplicaWorker::new(
            ReplicaId(2),
            client.clone(),
            config,
            settings(100),
            Arc::clone(&table),
            Arc::clone(&table),
        );
        let report = time::timeout(Duration::from_secs(10), worker.run()).await??;
        assert_eq!(10, report.segments.len());
        assert!(abandoned
            .segments
            .iter()
            .all(|segment| report.segments.contains(&segment.id)));

        let outcome = client.wait_finished().await?;
        assert_eq!(42000, outcome.result.sum);
        assert_eq!(None, outcome.per_replica.get(&ReplicaId(1)));
        Ok(())
    }

    #[tokio::test]
    async fn test_local_analysis_is_informative_only() -> Result<(), Box<dyn Error>> {
        let parts = vec![PartMarks::new("all_1_1_0", 1000, 1000, 8000)];
        let client = CoordinatorClient::start(
            QueryId::from("replica_local_analysis"),
            config(),
            Box::new(TimeoutOnly),
        );
        client.initialize(parts.clone(), settings(0), 3).await?;

        let mut index = MockGranuleIndex::new();
        index.expect_parts().times(1).return_const(parts);
        let mut reader = MockSegmentReader::new();
        reader.expect_read().returning(|segment| {
            Ok(PartialResult {
                rows: segment.len(),
                sum: 0,
            })
        });

        let worker = ReplicaWorker::new(
            ReplicaId(1),
            client,
            config(),
            settings(0),
            Arc::new(index),
            Arc::new(reader),
        );
        let report = worker.run().await?;
        assert_eq!(16384, report.mark_segment_size);
        assert_eq!(Some(16384), report.local_proposal);
        assert_eq!(vec![0], report.segments);
        Ok(())
    }

    #[tokio::test]
    async fn test_skip_local_analysis() -> Result<(), Box<dyn Error>> {
        let table = Arc::new(MemoryTable::filled(10, 1, 1));
        let client = CoordinatorClient::start(
            QueryId::from("replica_skip_local_analysis"),
            config(),
            Box::new(TimeoutOnly),
        );
        client.initialize(table.parts(), settings(0), 1).await?;

        let mut index = MockGranuleIndex::new();
        index.expect_parts().never();
        let worker = ReplicaWorker::new(
            ReplicaId(1),
            client,
            config(),
            ParallelReplicasSettings {
                local_plan: false,
                index_analysis_only_on_coordinator: true,
                ..Default::default()
            },
            Arc::new(index),
            table,
        );
        let report = worker.run().await?;
        assert_eq!(None, report.local_proposal);
        assert_eq!(1, report.segments.len());
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_on_read_failure() -> Result<(), Box<dyn Error>> {
        let table = Arc::new(MemoryTable::filled(10, 1, 1));
        let client = CoordinatorClient::start(
            QueryId::from("replica_read_failure"),
            config(),
            Box::new(TimeoutOnly),
        );
        client.initialize(table.parts(), settings(5), 1).await?;

        let mut reader = MockSegmentReader::new();
        reader
            .expect_read()
            .times(1)
            .returning(|_| Err(ReadError::Unavailable("disk is gone".to_owned())));
        let worker = ReplicaWorker::new(
            ReplicaId(1),
            client.clone(),
            config(),
            settings(5),
            table,
            Arc::new(reader),
        );
        assert!(matches!(
            worker.run().await,
            Err(CoordinationError::Internal(_))
        ));
        Ok(())
    }

    #[test]
    fn test_enqueue_skips_queued_segments() {
        let segments = split_into_segments(&[PartMarks::new("all_1_1_0", 500, 500, 4000)], 100);
        let mut pending = VecDeque::new();
        enqueue(&mut pending, segments[..2].to_vec());
        enqueue(&mut pending, segments[1..3].to_vec());
        assert_eq!(
            vec![0, 1, 2],
            pending.iter().map(|segment| segment.id).collect::<Vec<_>>()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_after_loss_with_segments_granted_again() -> Result<(), Box<dyn Error>> {
        ulog::try_init_log();
        let table = Arc::new(MemoryTable::filled(500, 1, 42));
        let mut config = Configuration::default();
        config.coordinator.request_timeout_ms = 200;
        config.coordinator.liveness_check_interval_ms = 20;
        config.coordinator.tasks_per_request = 2;
        let config = Arc::new(config);
        let client = CoordinatorClient::start(
            QueryId::from("replica_resume_after_loss"),
            Arc::clone(&config),
            Box::new(TimeoutOnly),
        );
        client.initialize(table.parts(), settings(100), 2).await?;

        let a = ReplicaId(1);
        let b = ReplicaId(2);
        client.register(a).await?;
        let old_copies = client.request_initial_tasks(a, 2).await?.segments;
        assert_eq!(
            vec![0, 1],
            old_copies.iter().map(|segment| segment.id).collect::<Vec<_>>()
        );

        // A stalls for longer than the timeout and is declared lost, B takes over segment 0.
        time::sleep(Duration::from_millis(300)).await;
        client.register(b).await?;
        let held_by_b = client.request_initial_tasks(b, 1).await?.segments;
        assert_eq!(0, held_by_b[0].id);

        // A resumes with the copies it still holds; segment 1 is granted to it again.
        let worker = ReplicaWorker::new(
            a,
            client.clone(),
            Arc::clone(&config),
            settings(100),
            Arc::clone(&table),
            Arc::clone(&table),
        );
        let reading = tokio::spawn(async move { worker.read_granted(old_copies, false, 100).await });

        let completed = held_by_b
            .iter()
            .map(|segment| Ok(SegmentAck::new(segment.id, table.read(segment)?)))
            .collect::<Result<Vec<_>, ReadError>>()?;
        client.request_more_tasks(b, completed, 0).await?;

        let segments = time::timeout(Duration::from_secs(10), reading).await???;
        assert_eq!(vec![0, 1, 2, 3, 4], segments);

        let outcome = client.wait_finished().await?;
        assert_eq!(21000, outcome.result.sum);
        assert_eq!(Some(&4), outcome.per_replica.get(&a));
        assert_eq!(Some(&1), outcome.per_replica.get(&b));
        Ok(())
    }
}
