use std::fmt::{self, Display, Formatter};

use derivative::Derivative;

use crate::{part::PartMarks, range::MarkRange};

/// A contiguous run of marks of one part, handed to a replica as a single unit of work.
///
/// `id` is the ordinal of the segment in the pool: segments of the first part come first, in mark order,
/// then the second part and so on. Granting in ascending `id` preserves read locality.
#[derive(Derivative, Clone)]
#[derivative(Debug, PartialEq, Eq, Hash)]
pub struct Segment {
    pub id: u64,

    pub part_index: usize,

    #[derivative(PartialEq = "ignore", Hash = "ignore")]
    pub part_name: String,

    pub range: MarkRange,
}

impl Segment {
    pub fn len(&self) -> u64 {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

impl Display for Segment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}{{part={}}}{}", self.id, self.part_name, self.range)
    }
}

/// Cut every part into segments of `mark_segment_size` marks.
///
/// The last segment of a part may be shorter. Segments never span two parts and parts without marks yield
/// no segment.
pub fn split_into_segments(parts: &[PartMarks], mark_segment_size: u64) -> Vec<Segment> {
    debug_assert!(mark_segment_size > 0);
    let mut segments = vec![];
    let mut id = 0;
    for (part_index, part) in parts.iter().enumerate() {
        let mut begin = 0;
        while begin < part.marks {
            let end = part.marks.min(begin + mark_segment_size);
            segments.push(Segment {
                id,
                part_index,
                part_name: part.name.clone(),
                range: MarkRange::new(begin, end),
            });
            id += 1;
            begin = end;
        }
    }
    segments
}
