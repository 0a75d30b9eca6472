use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use config::{Configuration, ParallelReplicasSettings};
use log::{debug, error, info, warn};
use model::{
    part,
    request::{PartialResult, WorkRequest},
    response::{Announcement, WorkResponse},
    segment::split_into_segments,
    CoordinationError, PartMarks, QueryId, ReplicaId,
};
use strum_macros::Display;
use tokio::time::Instant;

use crate::{
    assignment::TaskAssignmentTable,
    liveness::{HealthSignal, LivenessTracker},
    segment_size,
};

/// Lifecycle of the reading state of one query.
///
/// `Uninitialized -> Announced -> Serving <-> Draining -> Finished`. A lost replica's segments returning
/// to the pool move `Draining` back to `Serving`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Phase {
    Uninitialized,
    Announced,
    Serving,
    Draining,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplicaStatus {
    Active,
    Lost,
    Excluded,
}

#[derive(Debug)]
struct ReplicaSlot {
    status: ReplicaStatus,

    /// Times the replica came back after being declared lost.
    rejoins: u32,

    /// Every segment ever taken away from the replica when it was declared lost. A later grant of the same
    /// segment does not clear it, so an acknowledgment of a revoked segment that is not in flight for the
    /// replica is stale.
    revoked: BTreeSet<u64>,
}

impl ReplicaSlot {
    fn new() -> Self {
        Self {
            status: ReplicaStatus::Active,
            rejoins: 0,
            revoked: BTreeSet::new(),
        }
    }
}

/// Merged result of a successfully finished parallel read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutcome {
    pub query_id: QueryId,
    pub mark_segment_size: u64,
    pub result: PartialResult,
    pub segments_read: u64,
    /// Segments whose results were accepted from each replica.
    pub per_replica: BTreeMap<ReplicaId, u64>,
}

/// State machine coordinating which replica reads which segment of a query.
///
/// `ReadingCoordinator` is not thread-safe: a single actor owns it and applies requests one at a time,
/// which makes every transition atomic with respect to all replicas.
pub(crate) struct ReadingCoordinator {
    log_ident: String,

    query_id: QueryId,

    config: Arc<Configuration>,

    phase: Phase,

    announcement: Option<Announcement>,

    table: TaskAssignmentTable,

    replicas: HashMap<ReplicaId, ReplicaSlot>,

    liveness: LivenessTracker,

    health: Box<dyn HealthSignal>,

    merged: PartialResult,

    per_replica: BTreeMap<ReplicaId, u64>,

    failure: Option<CoordinationError>,
}

impl ReadingCoordinator {
    pub(crate) fn new(
        query_id: QueryId,
        config: Arc<Configuration>,
        health: Box<dyn HealthSignal>,
        now: Instant,
    ) -> Self {
        let liveness = LivenessTracker::new(config.request_timeout(), now);
        Self {
            log_ident: format!("Query[{}] ", query_id),
            query_id,
            config,
            phase: Phase::Uninitialized,
            announcement: None,
            table: TaskAssignmentTable::new(),
            replicas: HashMap::new(),
            liveness,
            health,
            merged: PartialResult::default(),
            per_replica: BTreeMap::new(),
            failure: None,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    /// Fix the segment size, build the segment pool and announce it.
    ///
    /// # Arguments
    /// * `parts` - parts of the table as seen by the coordinator's own index analysis.
    /// * `settings` - query settings.
    /// * `replica_count` - replicas expected to take part.
    ///
    /// # Return
    /// The announcement every replica has to follow.
    pub(crate) fn initialize(
        &mut self,
        parts: &[PartMarks],
        settings: &ParallelReplicasSettings,
        replica_count: u64,
        now: Instant,
    ) -> Result<Announcement, CoordinationError> {
        if self.phase != Phase::Uninitialized {
            return Err(CoordinationError::AlreadyInitialized);
        }

        let (total_marks, total_rows, total_bytes) = part::totals(parts);
        let min_marks_per_task = segment_size::min_marks_for_concurrent_read(
            total_marks,
            total_rows,
            total_bytes,
            self.config.reader.min_rows_for_concurrent_read,
            self.config.reader.min_bytes_for_concurrent_read,
        );
        let mark_segment_size = segment_size::compute_segment_size(
            total_marks,
            replica_count,
            min_marks_per_task,
            settings.mark_segment_size,
        );
        if let Err(e) = segment_size::validate_segment_size(settings) {
            error!("{}Failed to initialize reading state: {}", self.log_ident, e);
            self.fail(e.clone());
            return Err(e);
        }

        let segments = split_into_segments(parts, mark_segment_size);
        let announcement = Announcement {
            query_id: self.query_id.clone(),
            mark_segment_size,
            total_segments: segments.len() as u64,
            total_marks,
        };
        self.table.initialize(segments);
        self.phase = Phase::Announced;
        self.announcement = Some(announcement.clone());
        self.liveness.touch(now);
        info!(
            "{}Reading state is fully initialized: mark_segment_size: {}, segments: {}, marks: {}, parts: {}, replicas: {}, min_marks_per_task: {}",
            self.log_ident,
            mark_segment_size,
            announcement.total_segments,
            total_marks,
            parts.len(),
            replica_count,
            min_marks_per_task
        );

        if self.table.is_exhausted() {
            self.finish();
        }
        Ok(announcement)
    }

    /// Handshake of a replica. Answers with the announcement, which happens before any grant.
    pub(crate) fn register(
        &mut self,
        replica: ReplicaId,
        now: Instant,
    ) -> Result<Announcement, CoordinationError> {
        let announcement = match &self.announcement {
            Some(announcement) => announcement.clone(),
            None => return Err(self.terminal_error()),
        };
        if self.phase == Phase::Finished && self.failure.is_some() {
            return Err(self.terminal_error());
        }

        self.admit(replica)?;
        self.liveness.on_request(replica, now);
        debug!("{}Replica {} registered", self.log_ident, replica);
        Ok(announcement)
    }

    /// Serve a work request: accept acknowledged segments, then grant more.
    pub(crate) fn request_tasks(
        &mut self,
        request: WorkRequest,
        now: Instant,
    ) -> Result<WorkResponse, CoordinationError> {
        match self.phase {
            Phase::Uninitialized => return Err(CoordinationError::NotAnnounced),
            Phase::Finished => {
                if self.failure.is_some() {
                    return Err(self.terminal_error());
                }
                return Ok(WorkResponse::no_more_work());
            }
            Phase::Announced | Phase::Serving | Phase::Draining => {}
        }

        let replica = request.replica;
        if !self.replicas.contains_key(&replica) {
            return Err(CoordinationError::UnknownReplica(replica));
        }
        self.admit(replica)?;
        self.liveness.on_request(replica, now);
        if self.phase == Phase::Announced {
            self.phase = Phase::Serving;
        }

        self.accept_acks(&request)?;

        let granted = if self.table.has_unassigned() {
            self.table
                .request_initial_tasks(replica, request.requested_count)
        } else {
            vec![]
        };
        self.update_phase();
        debug_assert!(self.table.check_invariant());

        if self.phase == Phase::Finished {
            let mut response = WorkResponse::no_more_work();
            response.segments = granted;
            return Ok(response);
        }
        Ok(WorkResponse::grant(granted))
    }

    /// Merge acknowledged segments. Stale acknowledgments are dropped, foreign ones exclude the replica.
    fn accept_acks(&mut self, request: &WorkRequest) -> Result<(), CoordinationError> {
        let replica = request.replica;
        if request.completed.is_empty() {
            return Ok(());
        }

        let in_flight = self.table.in_flight_of(replica);
        let mut accepted = vec![];
        let mut stale = vec![];
        let mut violation = None;
        if let Some(slot) = self.replicas.get(&replica) {
            let mut seen = BTreeSet::new();
            for ack in &request.completed {
                let first = seen.insert(ack.segment);
                if first && in_flight.binary_search(&ack.segment).is_ok() {
                    accepted.push(ack);
                } else if slot.revoked.contains(&ack.segment) {
                    stale.push(ack.segment);
                } else {
                    violation = Some(CoordinationError::ProtocolViolation {
                        replica,
                        segment: ack.segment,
                    });
                    break;
                }
            }
        }

        if !stale.is_empty() {
            warn!(
                "{}Replica {} acknowledged segments {:?} after they were re-queued, ignore them",
                self.log_ident, replica, stale
            );
        }

        let ids: Vec<u64> = accepted.iter().map(|ack| ack.segment).collect();
        let violation = match violation {
            Some(violation) => Err(violation),
            None => self.table.complete(replica, &ids),
        };
        if let Err(e) = violation {
            self.exclude(replica, &e);
            return Err(e);
        }

        for ack in accepted {
            self.merged += ack.result;
        }
        if !ids.is_empty() {
            *self.per_replica.entry(replica).or_default() += ids.len() as u64;
        }
        Ok(())
    }

    /// Declare replicas that went silent or are reported dead as lost, and re-queue their segments.
    ///
    /// Fails the query if work remains while no replica is left to do it.
    pub(crate) fn check_liveness(&mut self, now: Instant) {
        if matches!(self.phase, Phase::Uninitialized | Phase::Finished) {
            return;
        }

        let lost: Vec<ReplicaId> = self
            .replicas
            .iter()
            .filter(|(_, slot)| slot.status == ReplicaStatus::Active)
            .map(|(replica, _)| *replica)
            .filter(|replica| {
                !self.health.is_alive(*replica)
                    || (self.table.has_in_flight(*replica)
                        && self.liveness.is_expired(*replica, now))
            })
            .collect();
        for replica in lost {
            let silence = self.liveness.silence(replica, now);
            let requeued = self.table.requeue(replica);
            if let Some(slot) = self.replicas.get_mut(&replica) {
                slot.status = ReplicaStatus::Lost;
                slot.revoked.extend(requeued.iter().copied());
            }
            self.liveness.forget(replica);
            // Lost replicas get a full timeout to come back before the query is given up.
            self.liveness.touch(now);
            warn!(
                "{}Replica {} is lost after {:?} of silence, re-queue segments {:?}",
                self.log_ident, replica, silence, requeued
            );
        }
        self.update_phase();

        if self.phase == Phase::Finished || self.table.is_exhausted() {
            return;
        }

        // Idle replicas are never declared lost, but only those still polling count as working.
        let active = self.replicas.iter().any(|(replica, slot)| {
            slot.status == ReplicaStatus::Active && !self.liveness.is_expired(*replica, now)
        });
        if !active && self.liveness.is_idle(now) {
            let e = if self.replicas.is_empty() {
                CoordinationError::ReplicaTimeout(self.config.request_timeout())
            } else {
                CoordinationError::ReplicasExhausted(self.replicas.len())
            };
            error!(
                "{}No replica is left to read {} unassigned segments: {}",
                self.log_ident,
                self.table.unassigned_count(),
                e
            );
            self.fail(e);
        }
    }

    /// Stop the query. Every later request is answered with a cancellation.
    pub(crate) fn cancel(&mut self) {
        if self.phase == Phase::Finished {
            return;
        }
        info!(
            "{}Cancelled with {} of {} segments completed",
            self.log_ident,
            self.table.completed_count(),
            self.table.total()
        );
        self.failure = Some(CoordinationError::Cancelled(self.query_id.clone()));
        self.phase = Phase::Finished;
    }

    /// `None` while the query runs, the merged result or the failure once it is finished.
    pub(crate) fn outcome(&self) -> Option<Result<QueryOutcome, CoordinationError>> {
        if self.phase != Phase::Finished {
            return None;
        }
        if let Some(e) = &self.failure {
            return Some(Err(e.clone()));
        }
        Some(Ok(QueryOutcome {
            query_id: self.query_id.clone(),
            mark_segment_size: self
                .announcement
                .as_ref()
                .map(|announcement| announcement.mark_segment_size)
                .unwrap_or_default(),
            result: self.merged,
            segments_read: self.table.completed_count() as u64,
            per_replica: self.per_replica.clone(),
        }))
    }

    /// Let a replica take part, or take part again after it was declared lost.
    fn admit(&mut self, replica: ReplicaId) -> Result<(), CoordinationError> {
        let max_retries = self.config.coordinator.max_replica_retries;
        let slot = self.replicas.entry(replica).or_insert_with(ReplicaSlot::new);
        match slot.status {
            ReplicaStatus::Active => Ok(()),
            ReplicaStatus::Excluded => Err(CoordinationError::ReplicaExcluded(replica)),
            ReplicaStatus::Lost if slot.rejoins < max_retries => {
                slot.rejoins += 1;
                slot.status = ReplicaStatus::Active;
                info!(
                    "{}Lost replica {} rejoins, attempt {}/{}",
                    self.log_ident, replica, slot.rejoins, max_retries
                );
                Ok(())
            }
            ReplicaStatus::Lost => {
                slot.status = ReplicaStatus::Excluded;
                warn!(
                    "{}Replica {} exceeded {} rejoins, exclude it",
                    self.log_ident, replica, max_retries
                );
                Err(CoordinationError::ReplicaExcluded(replica))
            }
        }
    }

    fn exclude(&mut self, replica: ReplicaId, cause: &CoordinationError) {
        let requeued = self.table.requeue(replica);
        if let Some(slot) = self.replicas.get_mut(&replica) {
            slot.status = ReplicaStatus::Excluded;
        }
        self.liveness.forget(replica);
        error!(
            "{}Exclude replica {}: {}. Re-queue segments {:?}",
            self.log_ident, replica, cause, requeued
        );
        self.update_phase();
    }

    fn update_phase(&mut self) {
        match self.phase {
            Phase::Serving | Phase::Announced if self.table.is_exhausted() => self.finish(),
            Phase::Serving if !self.table.has_unassigned() => {
                debug!(
                    "{}Pool is empty, draining {} in-flight segments",
                    self.log_ident,
                    self.table.in_flight_count()
                );
                self.phase = Phase::Draining;
            }
            Phase::Draining if self.table.is_exhausted() => self.finish(),
            Phase::Draining if self.table.has_unassigned() => {
                debug!(
                    "{}{} segments returned to the pool, serving again",
                    self.log_ident,
                    self.table.unassigned_count()
                );
                self.phase = Phase::Serving;
            }
            _ => {}
        }
    }

    fn finish(&mut self) {
        self.phase = Phase::Finished;
        info!(
            "{}Read {} segments, {} rows by {} replicas",
            self.log_ident,
            self.table.completed_count(),
            self.merged.rows,
            self.per_replica.len()
        );
    }

    fn fail(&mut self, e: CoordinationError) {
        self.failure = Some(e);
        self.phase = Phase::Finished;
    }

    fn terminal_error(&self) -> CoordinationError {
        match &self.failure {
            Some(e) => e.clone(),
            None => CoordinationError::NotAnnounced,
        }
    }

    #[cfg(test)]
    pub(crate) fn table(&self) -> &TaskAssignmentTable {
        &self.table
    }
}
