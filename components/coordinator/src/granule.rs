use log::trace;
use model::{request::PartialResult, PartMarks, Segment};

use crate::error::ReadError;

#[cfg(test)]
use mockall::automock;

/// Index of a table: its sealed parts, in a stable order, with their marks.
#[cfg_attr(test, automock)]
pub trait GranuleIndex: Send + Sync {
    fn parts(&self) -> Vec<PartMarks>;
}

/// Reads the rows a segment covers and folds them into a partial result.
#[cfg_attr(test, automock)]
pub trait SegmentReader: Send + Sync {
    fn read(&self, segment: &Segment) -> Result<PartialResult, ReadError>;
}

/// Size of one stored value, the table holds a single `Int64` column.
const VALUE_BYTES: u64 = 8;

#[derive(Debug, Clone)]
struct MemoryPart {
    name: String,
    index_granularity: u64,
    values: Vec<i64>,
}

impl MemoryPart {
    fn marks(&self) -> u64 {
        (self.values.len() as u64).div_ceil(self.index_granularity)
    }
}

/// Table held in memory, one `Int64` column, serving both as granule index and as segment reader.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    parts: Vec<MemoryPart>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table of a single part holding `rows` copies of `value`.
    pub fn filled(rows: u64, index_granularity: u64, value: i64) -> Self {
        let mut table = Self::new();
        table.insert("all_1_1_0", index_granularity, vec![value; rows as usize]);
        table
    }

    /// Append a sealed part. Every `index_granularity` rows form one granule, the last one may be shorter.
    pub fn insert<Name>(&mut self, name: Name, index_granularity: u64, values: Vec<i64>)
    where
        Name: AsRef<str>,
    {
        self.parts.push(MemoryPart {
            name: name.as_ref().to_owned(),
            index_granularity: index_granularity.max(1),
            values,
        });
    }

    pub fn rows(&self) -> u64 {
        self.parts.iter().map(|part| part.values.len() as u64).sum()
    }

    pub fn sum(&self) -> i64 {
        self.parts.iter().flat_map(|part| part.values.iter()).sum()
    }
}

impl GranuleIndex for MemoryTable {
    fn parts(&self) -> Vec<PartMarks> {
        self.parts
            .iter()
            .map(|part| {
                let rows = part.values.len() as u64;
                PartMarks::new(&part.name, part.marks(), rows, rows * VALUE_BYTES)
            })
            .collect()
    }
}

impl SegmentReader for MemoryTable {
    fn read(&self, segment: &Segment) -> Result<PartialResult, ReadError> {
        let part = self
            .parts
            .get(segment.part_index)
            .filter(|part| part.name == segment.part_name)
            .ok_or_else(|| ReadError::PartNotFound(segment.part_name.clone()))?;

        if segment.range.end() > part.marks() {
            return Err(ReadError::MarkOutOfRange {
                part: part.name.clone(),
                range: segment.range.to_string(),
                marks: part.marks(),
            });
        }

        let rows = part.values.len() as u64;
        let begin = (segment.range.begin() * part.index_granularity).min(rows) as usize;
        let end = (segment.range.end() * part.index_granularity).min(rows) as usize;
        let values = &part.values[begin..end];
        trace!("Read {} rows of segment {}", values.len(), segment);
        Ok(PartialResult {
            rows: values.len() as u64,
            sum: values.iter().sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{segment::split_into_segments, MarkRange};
    use std::error::Error;

    #[test]
    fn test_parts() {
        let mut table = MemoryTable::new();
        table.insert("all_1_1_0", 4, (0..10).collect());
        table.insert("all_2_2_0", 1, vec![5; 3]);
        let parts = table.parts();
        assert_eq!(PartMarks::new("all_1_1_0", 3, 10, 80), parts[0]);
        assert_eq!(PartMarks::new("all_2_2_0", 3, 3, 24), parts[1]);
        assert_eq!(13, table.rows());
        assert_eq!(60, table.sum());
    }

    #[test]
    fn test_read_segments_cover_table() -> Result<(), Box<dyn Error>> {
        let mut table = MemoryTable::new();
        table.insert("all_1_1_0", 4, (0..10).collect());
        table.insert("all_2_2_0", 1, vec![5; 3]);

        let mut total = PartialResult::default();
        for segment in split_into_segments(&table.parts(), 2) {
            total += table.read(&segment)?;
        }
        assert_eq!(PartialResult { rows: 13, sum: 60 }, total);
        Ok(())
    }

    #[test]
    fn test_read_short_last_granule() -> Result<(), Box<dyn Error>> {
        let mut table = MemoryTable::new();
        table.insert("all_1_1_0", 4, (0..10).collect());
        let segment = Segment {
            id: 1,
            part_index: 0,
            part_name: "all_1_1_0".to_owned(),
            range: MarkRange::new(2, 3),
        };
        assert_eq!(PartialResult { rows: 2, sum: 17 }, table.read(&segment)?);
        Ok(())
    }

    #[test]
    fn test_read_errors() {
        let table = MemoryTable::filled(10, 1, 42);
        let mut segment = Segment {
            id: 0,
            part_index: 0,
            part_name: "all_9_9_0".to_owned(),
            range: MarkRange::new(0, 5),
        };
        assert_eq!(
            Err(ReadError::PartNotFound("all_9_9_0".to_owned())),
            table.read(&segment)
        );

        segment.part_name = "all_1_1_0".to_owned();
        segment.range = MarkRange::new(5, 11);
        assert!(matches!(
            table.read(&segment),
            Err(ReadError::MarkOutOfRange { marks: 10, .. })
        ));
    }
}
