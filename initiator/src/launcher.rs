use std::sync::Arc;

use config::{Configuration, ParallelReplicasSettings};
use coordinator::{CoordinatorRegistry, MemoryTable, ParallelQuery, QueryOutcome, Replica};
use log::info;
use model::{QueryId, ReplicaDescriptor};

use crate::error::LaunchError;

/// What to read: an in-memory table with every row holding the same value, replicated `replicas` times.
#[derive(Debug, Clone)]
pub struct Workload {
    pub query_id: QueryId,
    pub rows: u64,
    pub index_granularity: u64,
    pub value: i64,
    pub replicas: u32,
}

/// Run one parallel query on a fresh multi-threaded runtime and wait for its outcome.
///
/// Queries started here are registered in `registry`, so that they can be cancelled from outside.
pub fn launch(
    config: Configuration,
    settings: ParallelReplicasSettings,
    workload: Workload,
    registry: Arc<CoordinatorRegistry>,
) -> anyhow::Result<QueryOutcome> {
    if workload.index_granularity == 0 {
        return Err(LaunchError::ZeroGranularity.into());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(2))
        .thread_name("initiator")
        .enable_time()
        .build()
        .map_err(LaunchError::from)?;

    let table = Arc::new(MemoryTable::filled(
        workload.rows,
        workload.index_granularity,
        workload.value,
    ));
    let replicas = (1..=workload.replicas)
        .map(|id| {
            Replica::new(
                ReplicaDescriptor::new(id, "127.0.0.1", 9000_u16.saturating_add(id as u16)),
                Arc::clone(&table),
                Arc::clone(&table),
            )
        })
        .collect::<Vec<_>>();
    info!(
        "Query[{}] Read {} rows with index granularity {} from {} replicas",
        workload.query_id, workload.rows, workload.index_granularity, workload.replicas
    );

    let query = ParallelQuery::new(Arc::new(config), settings, registry);
    let outcome =
        runtime.block_on(query.run(workload.query_id, table.as_ref(), replicas))?;
    Ok(outcome)
}
