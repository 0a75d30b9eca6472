use std::{collections::HashMap, sync::Arc};

use config::Configuration;
use log::info;
use model::{CoordinationError, QueryId};
use parking_lot::Mutex;

use crate::{client::CoordinatorClient, liveness::HealthSignal};

/// Coordinators of the queries running on this initiator, keyed by query id.
///
/// A coordinator lives from `start_query` to `end_query`; nothing about a query outlives it.
#[derive(Debug, Default)]
pub struct CoordinatorRegistry {
    queries: Mutex<HashMap<QueryId, CoordinatorClient>>,
}

impl CoordinatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the coordinator of a new query. Must be called within a tokio runtime.
    pub fn start_query(
        &self,
        query_id: QueryId,
        config: Arc<Configuration>,
        health: Box<dyn HealthSignal>,
    ) -> Result<CoordinatorClient, CoordinationError> {
        let mut queries = self.queries.lock();
        if queries.contains_key(&query_id) {
            return Err(CoordinationError::DuplicateQuery(query_id));
        }
        let client = CoordinatorClient::start(query_id.clone(), config, health);
        queries.insert(query_id, client.clone());
        Ok(client)
    }

    pub fn get(&self, query_id: &QueryId) -> Result<CoordinatorClient, CoordinationError> {
        self.queries
            .lock()
            .get(query_id)
            .cloned()
            .ok_or_else(|| CoordinationError::QueryNotFound(query_id.clone()))
    }

    /// Drop the coordinator of a query, cancelling it if it is still running.
    pub fn end_query(&self, query_id: &QueryId) -> Option<CoordinatorClient> {
        let client = self.queries.lock().remove(query_id);
        if let Some(client) = &client {
            client.cancel();
        }
        client
    }

    pub fn cancel_all(&self) {
        let queries = self.queries.lock();
        info!("Cancel {} running queries", queries.len());
        queries.values().for_each(CoordinatorClient::cancel);
    }

    pub fn len(&self) -> usize {
        self.queries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{coordinator::Phase, liveness::TimeoutOnly};
    use config::ParallelReplicasSettings;
    use model::PartMarks;
    use std::error::Error;

    #[tokio::test]
    async fn test_lifecycle() -> Result<(), Box<dyn Error>> {
        let registry = CoordinatorRegistry::new();
        let config = Arc::new(Configuration::default());
        let query_id = QueryId::from("registry_lifecycle");

        let client = registry.start_query(
            query_id.clone(),
            Arc::clone(&config),
            Box::new(TimeoutOnly),
        )?;
        assert_eq!(1, registry.len());
        assert!(matches!(
            registry.start_query(query_id.clone(), Arc::clone(&config), Box::new(TimeoutOnly)),
            Err(CoordinationError::DuplicateQuery(_))
        ));
        assert_eq!(&query_id, registry.get(&query_id)?.query_id());

        let parts = vec![PartMarks::new("all_1_1_0", 10, 10, 80)];
        client
            .initialize(parts, ParallelReplicasSettings::default(), 1)
            .await?;

        assert!(registry.end_query(&query_id).is_some());
        assert!(registry.is_empty());
        assert!(matches!(
            registry.get(&query_id),
            Err(CoordinationError::QueryNotFound(_))
        ));

        // Ending the query cancelled it.
        assert_eq!(
            Err(CoordinationError::Cancelled(query_id)),
            client.wait_finished().await
        );
        assert_eq!(Phase::Finished, client.phase().await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_all() -> Result<(), Box<dyn Error>> {
        let registry = CoordinatorRegistry::new();
        let config = Arc::new(Configuration::default());
        let clients = ["registry_cancel_a", "registry_cancel_b"]
            .into_iter()
            .map(|id| registry.start_query(QueryId::from(id), Arc::clone(&config), Box::new(TimeoutOnly)))
            .collect::<Result<Vec<_>, _>>()?;

        registry.cancel_all();
        for client in clients {
            assert!(matches!(
                client.wait_finished().await,
                Err(CoordinationError::Cancelled(_))
            ));
        }
        Ok(())
    }
}
