use std::collections::{BTreeSet, HashMap};

use log::trace;
use model::{CoordinationError, ReplicaId, Segment};

/// Book-keeping of which segment is unassigned, in flight for which replica, or completed.
///
/// Every segment id is in exactly one of the three states. The unassigned pool is ordered by segment id,
/// therefore grants follow pool order even after segments of a lost replica are put back.
///
/// Note that `TaskAssignmentTable` is not thread-safe; the coordinator owning it serializes all access.
#[derive(Debug, Default)]
pub(crate) struct TaskAssignmentTable {
    segments: Vec<Segment>,

    unassigned: BTreeSet<u64>,

    in_flight: HashMap<ReplicaId, BTreeSet<u64>>,

    completed: BTreeSet<u64>,
}

impl TaskAssignmentTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fill the pool with `segments`, whose ids must be their positions in the sequence.
    pub(crate) fn initialize(&mut self, segments: Vec<Segment>) {
        debug_assert!(segments
            .iter()
            .enumerate()
            .all(|(position, segment)| segment.id == position as u64));
        self.unassigned = segments.iter().map(|segment| segment.id).collect();
        self.in_flight.clear();
        self.completed.clear();
        self.segments = segments;
    }

    /// Move up to `requested_count` segments, in pool order, from the pool to the replica.
    pub(crate) fn request_initial_tasks(
        &mut self,
        replica: ReplicaId,
        requested_count: usize,
    ) -> Vec<Segment> {
        let granted: Vec<u64> = self
            .unassigned
            .iter()
            .take(requested_count)
            .copied()
            .collect();
        if granted.is_empty() {
            return vec![];
        }

        let in_flight = self.in_flight.entry(replica).or_default();
        for id in &granted {
            self.unassigned.remove(id);
            in_flight.insert(*id);
        }
        trace!("Granted segments {:?} to replica {}", granted, replica);
        granted
            .into_iter()
            .map(|id| self.segments[id as usize].clone())
            .collect()
    }

    /// Mark `completed` done, then grant up to `requested_count` more segments.
    ///
    /// All acknowledged segments must be in flight for `replica`; otherwise nothing changes and
    /// `ProtocolViolation` names the first offending segment.
    pub(crate) fn request_more_tasks(
        &mut self,
        replica: ReplicaId,
        completed: &[u64],
        requested_count: usize,
    ) -> Result<Vec<Segment>, CoordinationError> {
        self.complete(replica, completed)?;
        Ok(self.request_initial_tasks(replica, requested_count))
    }

    /// Mark segments completed without granting anything new.
    pub(crate) fn complete(
        &mut self,
        replica: ReplicaId,
        completed: &[u64],
    ) -> Result<(), CoordinationError> {
        let mut seen = BTreeSet::new();
        for id in completed {
            let owned = self
                .in_flight
                .get(&replica)
                .map(|set| set.contains(id))
                .unwrap_or(false);
            if !owned || !seen.insert(*id) {
                return Err(CoordinationError::ProtocolViolation {
                    replica,
                    segment: *id,
                });
            }
        }

        if let Some(in_flight) = self.in_flight.get_mut(&replica) {
            for id in completed {
                in_flight.remove(id);
                self.completed.insert(*id);
            }
            if in_flight.is_empty() {
                self.in_flight.remove(&replica);
            }
        }
        Ok(())
    }

    /// Return every segment in flight for `replica` to the pool.
    pub(crate) fn requeue(&mut self, replica: ReplicaId) -> Vec<u64> {
        match self.in_flight.remove(&replica) {
            Some(in_flight) => {
                self.unassigned.extend(in_flight.iter().copied());
                in_flight.into_iter().collect()
            }
            None => vec![],
        }
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.unassigned.is_empty() && self.in_flight.is_empty()
    }

    pub(crate) fn has_unassigned(&self) -> bool {
        !self.unassigned.is_empty()
    }

    pub(crate) fn in_flight_of(&self, replica: ReplicaId) -> Vec<u64> {
        self.in_flight
            .get(&replica)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn has_in_flight(&self, replica: ReplicaId) -> bool {
        self.in_flight.contains_key(&replica)
    }

    pub(crate) fn total(&self) -> usize {
        self.segments.len()
    }

    pub(crate) fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub(crate) fn unassigned_count(&self) -> usize {
        self.unassigned.len()
    }

    pub(crate) fn in_flight_count(&self) -> usize {
        self.in_flight.values().map(BTreeSet::len).sum()
    }

    /// Verify that the completed, in-flight and unassigned sets partition the pool.
    pub(crate) fn check_invariant(&self) -> bool {
        let mut seen = vec![false; self.segments.len()];
        let all = self
            .completed
            .iter()
            .chain(self.unassigned.iter())
            .chain(self.in_flight.values().flatten());
        for id in all {
            match seen.get_mut(*id as usize) {
                Some(slot) if !*slot => *slot = true,
                _ => return false,
            }
        }
        seen.into_iter().all(|slot| slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{segment::split_into_segments, PartMarks};
    use std::error::Error;

    fn table(marks: u64, segment_size: u64) -> TaskAssignmentTable {
        let parts = vec![PartMarks::new("all_1_1_0", marks, marks, marks * 8)];
        let mut table = TaskAssignmentTable::new();
        table.initialize(split_into_segments(&parts, segment_size));
        table
    }

    fn ids(segments: &[Segment]) -> Vec<u64> {
        segments.iter().map(|segment| segment.id).collect()
    }

    #[test]
    fn test_initialize() {
        let table = table(1000, 100);
        assert_eq!(10, table.total());
        assert_eq!(10, table.unassigned_count());
        assert_eq!(0, table.in_flight_count());
        assert_eq!(0, table.completed_count());
        assert!(!table.is_exhausted());
        assert!(table.check_invariant());
    }

    #[test]
    fn test_grants_follow_pool_order() {
        let mut table = table(1000, 100);
        let a = ReplicaId(1);
        let b = ReplicaId(2);
        assert_eq!(vec![0, 1], ids(&table.request_initial_tasks(a, 2)));
        assert_eq!(vec![2, 3, 4], ids(&table.request_initial_tasks(b, 3)));
        assert_eq!(vec![5], ids(&table.request_initial_tasks(a, 1)));
        assert_eq!(vec![0, 1, 5], table.in_flight_of(a));
        assert!(table.check_invariant());
    }

    #[test]
    fn test_pool_smaller_than_request() {
        let mut table = table(250, 100);
        assert_eq!(3, table.request_initial_tasks(ReplicaId(1), 10).len());
        assert!(table.request_initial_tasks(ReplicaId(2), 10).is_empty());
        assert!(!table.has_unassigned());
        assert!(!table.is_exhausted());
    }

    #[test]
    fn test_request_more_tasks() -> Result<(), Box<dyn Error>> {
        let mut table = table(300, 100);
        let a = ReplicaId(1);
        table.request_initial_tasks(a, 2);
        let granted = table.request_more_tasks(a, &[0], 5)?;
        assert_eq!(vec![2], ids(&granted));
        assert_eq!(1, table.completed_count());

        let granted = table.request_more_tasks(a, &[1, 2], 5)?;
        assert!(granted.is_empty());
        assert!(table.is_exhausted());
        assert_eq!(3, table.completed_count());
        assert!(table.check_invariant());
        Ok(())
    }

    #[test]
    fn test_ack_of_foreign_segment_is_a_violation() {
        let mut table = table(300, 100);
        let a = ReplicaId(1);
        let b = ReplicaId(2);
        table.request_initial_tasks(a, 1);
        table.request_initial_tasks(b, 1);

        let result = table.request_more_tasks(b, &[1, 0], 1);
        assert_eq!(
            Err(CoordinationError::ProtocolViolation {
                replica: b,
                segment: 0
            }),
            result
        );
        // Nothing changed, not even the valid acknowledgment.
        assert_eq!(0, table.completed_count());
        assert_eq!(vec![1], table.in_flight_of(b));
        assert_eq!(1, table.unassigned_count());

        // Acknowledging twice is a violation as well.
        assert!(table.request_more_tasks(a, &[0, 0], 1).is_err());
        assert!(table.check_invariant());
    }

    #[test]
    fn test_requeue_restores_pool_order() -> Result<(), Box<dyn Error>> {
        let mut table = table(500, 100);
        let a = ReplicaId(1);
        let b = ReplicaId(2);
        table.request_initial_tasks(a, 2);
        table.request_initial_tasks(b, 2);
        table.request_more_tasks(b, &[2], 0)?;

        assert_eq!(vec![0, 1], table.requeue(a));
        assert!(table.requeue(a).is_empty());
        assert!(table.check_invariant());

        // Requeued segments go out before the never-granted tail.
        assert_eq!(vec![0, 1, 4], ids(&table.request_initial_tasks(b, 3)));
        Ok(())
    }
}
