use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("Part `{0}` is not found")]
    PartNotFound(String),

    #[error("Mark range {range} is out of part `{part}` with {marks} marks")]
    MarkOutOfRange {
        part: String,
        range: String,
        marks: u64,
    },

    #[error("Replica is unavailable: {0}")]
    Unavailable(String),
}
