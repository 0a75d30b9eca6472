//! Coordinator-driven parallel reading.
//!
//! The initiator of a query splits the marks of every data part into equally sized segments and hands them out
//! to the replicas on request. Replicas acknowledge what they read along with their partial results; the
//! coordinator merges those, re-queues the work of replicas that went silent and finishes the query once every
//! segment is read exactly once.

pub mod client;
pub mod coordinator;
pub mod error;
pub mod granule;
pub mod liveness;
pub mod query;
pub mod registry;
pub mod replica;
pub mod segment_size;

mod assignment;
mod request;

pub use crate::client::CoordinatorClient;
pub use crate::coordinator::{Phase, QueryOutcome};
pub use crate::error::ReadError;
pub use crate::granule::{GranuleIndex, MemoryTable, SegmentReader};
pub use crate::liveness::{HealthSignal, TimeoutOnly};
pub use crate::query::{ParallelQuery, Replica};
pub use crate::registry::CoordinatorRegistry;
pub use crate::replica::{ReplicaWorker, WorkerReport};
