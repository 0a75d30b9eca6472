use crate::{query::QueryId, segment::Segment};

/// Reading parameters fixed by the coordinator and broadcast to every participating replica.
///
/// Replicas must read with exactly this `mark_segment_size`, whatever their local planning would choose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub query_id: QueryId,
    pub mark_segment_size: u64,
    pub total_segments: u64,
    pub total_marks: u64,
}

/// Answer to a work request: zero or more segments, plus whether the replica should stop asking.
#[derive(Debug, Clone, Default)]
pub struct WorkResponse {
    pub segments: Vec<Segment>,

    /// No further segment will ever be granted to the replica.
    pub finished: bool,
}

impl WorkResponse {
    pub fn grant(segments: Vec<Segment>) -> Self {
        Self {
            segments,
            finished: false,
        }
    }

    pub fn no_more_work() -> Self {
        Self {
            segments: vec![],
            finished: true,
        }
    }
}
