use std::fmt::{self, Display, Formatter};

/// Representation of a run of marks within a data part in form of `[begin, end)` in which `begin` is inclusive
/// and `end` is exclusive.
/// If `begin` == `end`, the range covers no granule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkRange {
    /// The first mark, inclusive.
    begin: u64,

    /// The end of the range, exclusive.
    end: u64,
}

impl MarkRange {
    pub fn new(begin: u64, end: u64) -> Self {
        debug_assert!(begin <= end, "Mark range [{begin}, {end}) is inverted");
        Self { begin, end }
    }

    pub fn begin(&self) -> u64 {
        self.begin
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of marks in the range.
    pub fn len(&self) -> u64 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// Test if the given mark is within the range.
    pub fn contains(&self, mark: u64) -> bool {
        self.begin <= mark && mark < self.end
    }

    /// Test if two ranges share at least one mark.
    pub fn intersects(&self, other: &MarkRange) -> bool {
        self.begin < other.end && other.begin < self.end
    }
}

impl Display for MarkRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}
