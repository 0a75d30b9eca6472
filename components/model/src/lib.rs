pub mod error;
pub mod part;
pub mod query;
pub mod range;
pub mod replica;
pub mod request;
pub mod response;
pub mod segment;

pub use crate::error::CoordinationError;
pub use crate::part::PartMarks;
pub use crate::query::QueryId;
pub use crate::range::MarkRange;
pub use crate::replica::{ReplicaDescriptor, ReplicaId};
pub use crate::segment::Segment;
