use std::ops::AddAssign;

use crate::replica::ReplicaId;

/// Handshake a replica sends once it is ready to read. It is answered by the announcement.
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub replica: ReplicaId,
}

/// Partial result a replica produced by reading one segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartialResult {
    pub rows: u64,
    pub sum: i64,
}

impl AddAssign for PartialResult {
    fn add_assign(&mut self, rhs: Self) {
        self.rows += rhs.rows;
        self.sum += rhs.sum;
    }
}

/// Acknowledgment of a completed segment, carrying what was read from it.
#[derive(Debug, Clone)]
pub struct SegmentAck {
    pub segment: u64,
    pub result: PartialResult,
}

impl SegmentAck {
    pub fn new(segment: u64, result: PartialResult) -> Self {
        Self { segment, result }
    }
}

/// Request for work.
///
/// An empty `completed` list asks for the initial tasks of a replica; otherwise the listed segments are
/// acknowledged before more work is granted.
#[derive(Debug, Clone)]
pub struct WorkRequest {
    pub replica: ReplicaId,
    pub completed: Vec<SegmentAck>,
    pub requested_count: usize,
}

impl WorkRequest {
    pub fn initial(replica: ReplicaId, requested_count: usize) -> Self {
        Self {
            replica,
            completed: vec![],
            requested_count,
        }
    }

    pub fn more(replica: ReplicaId, completed: Vec<SegmentAck>, requested_count: usize) -> Self {
        Self {
            replica,
            completed,
            requested_count,
        }
    }
}
