//! InMemorySagaStorage - revision 比較付きの saga storage
//!
//! Every operation runs under one lock, which gives the compare-and-swap
//! semantics the engine relies on.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::SagaId;
use crate::ports::{
    CorrelationEntry, CorrelationValue, SagaRecord, SagaStorage, StorageError, StoreOutcome,
};

struct Stored {
    record: SagaRecord,
    correlations: Vec<CorrelationEntry>,
}

impl Stored {
    fn claims(&self, saga_type: &str, property: &str, value: &CorrelationValue) -> bool {
        self.record.saga_type == saga_type
            && self
                .correlations
                .iter()
                .any(|c| c.property == property && &c.value == value)
    }
}

#[derive(Default)]
pub struct InMemorySagaStorage {
    instances: Mutex<HashMap<SagaId, Stored>>,
}

impl InMemorySagaStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.lock().is_empty()
    }

    pub fn get(&self, id: SagaId) -> Option<SagaRecord> {
        self.instances.lock().get(&id).map(|s| s.record.clone())
    }

    /// All stored instances of `saga_type`.
    pub fn records(&self, saga_type: &str) -> Vec<SagaRecord> {
        self.instances
            .lock()
            .values()
            .filter(|s| s.record.saga_type == saga_type)
            .map(|s| s.record.clone())
            .collect()
    }
}

#[async_trait]
impl SagaStorage for InMemorySagaStorage {
    async fn find(
        &self,
        saga_type: &str,
        property: &str,
        value: &CorrelationValue,
    ) -> Result<Option<SagaRecord>, StorageError> {
        Ok(self
            .instances
            .lock()
            .values()
            .find(|s| s.claims(saga_type, property, value))
            .map(|s| s.record.clone()))
    }

    async fn insert(
        &self,
        mut record: SagaRecord,
        correlations: &[CorrelationEntry],
    ) -> Result<StoreOutcome<SagaRecord>, StorageError> {
        let mut instances = self.instances.lock();
        if let Some(existing) = instances.get(&record.id) {
            return Ok(StoreOutcome::ConcurrencyConflict {
                expected: record.revision,
                actual: existing.record.revision,
            });
        }
        // another instance started the same conversation first
        if let Some(other) = instances.values().find(|s| {
            correlations
                .iter()
                .any(|c| s.claims(&record.saga_type, c.property, &c.value))
        }) {
            return Ok(StoreOutcome::ConcurrencyConflict {
                expected: record.revision,
                actual: other.record.revision,
            });
        }

        record.revision = 0;
        instances.insert(
            record.id,
            Stored {
                record: record.clone(),
                correlations: correlations.to_vec(),
            },
        );
        Ok(StoreOutcome::Ok(record))
    }

    async fn update(
        &self,
        mut record: SagaRecord,
        correlations: &[CorrelationEntry],
    ) -> Result<StoreOutcome<SagaRecord>, StorageError> {
        let mut instances = self.instances.lock();
        let Some(stored) = instances.get_mut(&record.id) else {
            return Ok(StoreOutcome::NotFound);
        };
        if stored.record.revision != record.revision {
            return Ok(StoreOutcome::ConcurrencyConflict {
                expected: record.revision,
                actual: stored.record.revision,
            });
        }

        record.revision += 1;
        stored.record = record.clone();
        stored.correlations = correlations.to_vec();
        Ok(StoreOutcome::Ok(record))
    }

    async fn delete(
        &self,
        id: SagaId,
        expected_revision: u64,
    ) -> Result<StoreOutcome<()>, StorageError> {
        let mut instances = self.instances.lock();
        let Some(stored) = instances.get(&id) else {
            return Ok(StoreOutcome::NotFound);
        };
        if stored.record.revision != expected_revision {
            return Ok(StoreOutcome::ConcurrencyConflict {
                expected: expected_revision,
                actual: stored.record.revision,
            });
        }
        instances.remove(&id);
        Ok(StoreOutcome::Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use ulid::Ulid;

    const SAGA: &str = "test.order-saga";

    fn record(revision: u64) -> SagaRecord {
        SagaRecord {
            id: SagaId::from_ulid(Ulid::from_parts(1, 1)),
            saga_type: SAGA.to_string(),
            revision,
            data: json!({ "order_id": "o-1", "steps": 0 }),
        }
    }

    fn correlations(order_id: &str) -> Vec<CorrelationEntry> {
        vec![CorrelationEntry {
            property: "order_id",
            value: CorrelationValue::from(order_id),
        }]
    }

    #[tokio::test]
    async fn test_insert_then_find() {
        let storage = InMemorySagaStorage::new();
        let stored = storage.insert(record(0), &correlations("o-1")).await.unwrap();
        assert!(stored.is_ok());

        let found = storage
            .find(SAGA, "order_id", &CorrelationValue::from("o-1"))
            .await
            .unwrap();
        assert_eq!(found.map(|r| r.revision), Some(0));
        assert!(
            storage
                .find("other.saga", "order_id", &CorrelationValue::from("o-1"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_update_with_stale_revision_conflicts() {
        let storage = InMemorySagaStorage::new();
        storage.insert(record(0), &correlations("o-1")).await.unwrap();

        let first = storage.update(record(0), &correlations("o-1")).await.unwrap();
        let second = storage.update(record(0), &correlations("o-1")).await.unwrap();

        assert!(matches!(first, StoreOutcome::Ok(ref r) if r.revision == 1));
        assert_eq!(
            second,
            StoreOutcome::ConcurrencyConflict {
                expected: 0,
                actual: 1
            }
        );
    }

    #[tokio::test]
    async fn test_second_instance_for_same_correlation_conflicts() {
        let storage = InMemorySagaStorage::new();
        storage.insert(record(0), &correlations("o-1")).await.unwrap();

        let mut other = record(0);
        other.id = SagaId::from_ulid(Ulid::from_parts(2, 2));
        let outcome = storage.insert(other, &correlations("o-1")).await.unwrap();

        assert!(matches!(outcome, StoreOutcome::ConcurrencyConflict { .. }));
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_checks_revision() {
        let storage = InMemorySagaStorage::new();
        storage.insert(record(0), &correlations("o-1")).await.unwrap();
        let id = record(0).id;

        assert!(matches!(
            storage.delete(id, 3).await.unwrap(),
            StoreOutcome::ConcurrencyConflict { .. }
        ));
        assert_eq!(storage.delete(id, 0).await.unwrap(), StoreOutcome::Ok(()));
        assert_eq!(storage.delete(id, 0).await.unwrap(), StoreOutcome::NotFound);
        assert!(storage.is_empty());
    }
}
