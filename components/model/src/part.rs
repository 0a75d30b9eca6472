/// Index summary of a sealed data part: how many marks it has and how much data they cover.
///
/// Parts are listed by the granule index in a stable order. The order of parts, together with the mark order
/// inside each part, defines the order of the segment pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartMarks {
    pub name: String,

    /// Number of marks, that is, granules of the part.
    pub marks: u64,

    /// Number of rows covered by all marks of the part.
    pub rows: u64,

    /// Uncompressed bytes covered by all marks of the part.
    pub bytes: u64,
}

impl PartMarks {
    pub fn new<Name>(name: Name, marks: u64, rows: u64, bytes: u64) -> Self
    where
        Name: AsRef<str>,
    {
        Self {
            name: name.as_ref().to_owned(),
            marks,
            rows,
            bytes,
        }
    }
}

/// Sum of marks, rows and bytes over the given parts.
pub fn totals(parts: &[PartMarks]) -> (u64, u64, u64) {
    parts.iter().fold((0, 0, 0), |(marks, rows, bytes), part| {
        (marks + part.marks, rows + part.rows, bytes + part.bytes)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals() {
        let parts = vec![
            PartMarks::new("all_1_1_0", 10, 80, 640),
            PartMarks::new("all_2_2_0", 3, 20, 160),
        ];
        assert_eq!((13, 100, 800), totals(&parts));
        assert_eq!((0, 0, 0), totals(&[]));
    }
}
