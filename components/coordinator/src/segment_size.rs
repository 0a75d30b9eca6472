//! Choice of `mark_segment_size`, the number of marks handed to a replica as one unit of work.
//!
//! Small segments balance load well between replicas, big ones keep reads sequential and avoid fetching
//! remote data that is never used. The policy only ever answers with one of a few predefined sizes, so that
//! the value is predictable and every node deriving it from the same inputs agrees.

use config::ParallelReplicasSettings;
use model::CoordinationError;

/// Sizes the automatic policy picks from, ascending.
pub const MARK_SEGMENT_GRANULARITIES: [u64; 4] = [128, 1024, 4096, 16384];

/// Largest size accepted when configured explicitly.
pub const MAX_MARK_SEGMENT_SIZE: u64 = 1 << 20;

/// Segments each replica should get at least, when the table is large enough.
const SEGMENTS_PER_REPLICA: u64 = 8;

/// Smallest predefined granularity not below `marks`, or the largest one if `marks` exceeds them all.
fn snap(marks: u64) -> u64 {
    MARK_SEGMENT_GRANULARITIES
        .iter()
        .copied()
        .find(|granularity| *granularity >= marks)
        .unwrap_or(MARK_SEGMENT_GRANULARITIES[MARK_SEGMENT_GRANULARITIES.len() - 1])
}

/// Compute the segment size of a query.
///
/// # Arguments
/// * `total_marks` - marks of all parts to read.
/// * `replica_count` - replicas expected to take part.
/// * `min_marks_per_task` - lower bound of marks a replica should read per task.
/// * `requested_segment_size` - explicitly configured size, `0` for automatic.
///
/// # Return
/// The explicit size if any, otherwise a predefined granularity large enough for `min_marks_per_task`
/// and for the table to be cut into no more than a handful of segments per replica.
pub fn compute_segment_size(
    total_marks: u64,
    replica_count: u64,
    min_marks_per_task: u64,
    requested_segment_size: u64,
) -> u64 {
    if requested_segment_size != 0 {
        return requested_segment_size;
    }

    let floor = min_marks_per_task.max(1);
    if replica_count == 0 || total_marks == 0 {
        return snap(floor);
    }

    let share = total_marks.div_ceil(replica_count.saturating_mul(SEGMENTS_PER_REPLICA));
    snap(floor.max(share))
}

/// Marks a task should span at least so that reading it is worth the scheduling overhead.
///
/// Derived from the average rows and bytes per mark: tiny granules produce a large number, because
/// thousands of them hold less data than a single regular granule.
pub fn min_marks_for_concurrent_read(
    total_marks: u64,
    total_rows: u64,
    total_bytes: u64,
    min_rows: u64,
    min_bytes: u64,
) -> u64 {
    if total_marks == 0 {
        return 1;
    }

    // Averages are rounded up so that sparse granules do not blow the bound up to infinity.
    let rows_per_mark = total_rows.div_ceil(total_marks).max(1);
    let bytes_per_mark = total_bytes.div_ceil(total_marks).max(1);
    min_rows
        .div_ceil(rows_per_mark)
        .max(min_bytes.div_ceil(bytes_per_mark))
        .max(1)
}

/// Reject settings that cannot produce a usable segment size.
///
/// An explicit size of 0 means automatic and the automatic policy never answers 0, so a resolved size is
/// always positive.
pub fn validate_segment_size(settings: &ParallelReplicasSettings) -> Result<(), CoordinationError> {
    if settings.max_parallel_replicas == 0 {
        return Err(CoordinationError::ConfigurationConflict(
            "max_parallel_replicas is 0, no replica may read".to_owned(),
        ));
    }

    if settings.mark_segment_size > MAX_MARK_SEGMENT_SIZE {
        return Err(CoordinationError::ConfigurationConflict(format!(
            "parallel_replicas_mark_segment_size {} exceeds the maximum of {}",
            settings.mark_segment_size, MAX_MARK_SEGMENT_SIZE
        )));
    }
    Ok(())
}
