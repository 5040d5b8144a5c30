//! Per-instance trigger snapshot storage

use crate::error::Result;
use crate::models::workflow::TriggerSnapshot;
use crate::workflow::persistence::{update_instance, InstanceStore};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Replace-only access to the snapshot map of persisted instances.
///
/// Replacements of the same (instance, trigger) pair are serialized by an
/// in-process lock; the write itself is a version-checked save, so writers for
/// other triggers of the same instance never clobber each other either.
pub struct SnapshotStore {
    store: Arc<dyn InstanceStore>,
    locks: DashMap<(Uuid, String), Arc<Mutex<()>>>,
}

impl SnapshotStore {
    pub fn new(store: Arc<dyn InstanceStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    /// Store `snapshot` under its name and return the snapshot it replaced.
    ///
    /// `last_execution` never moves backwards: a candidate older than the stored
    /// snapshot keeps the stored timestamp.
    pub async fn replace(
        &self,
        instance_id: Uuid,
        snapshot: TriggerSnapshot,
    ) -> Result<Option<TriggerSnapshot>> {
        let key = (instance_id, snapshot.name.clone());
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            update_instance(self.store.as_ref(), instance_id, |instance| {
                let mut next = snapshot.clone();
                if let Some(prior) = instance.trigger_snapshots.get(&next.name) {
                    if prior.last_execution > next.last_execution {
                        next.last_execution = prior.last_execution;
                    }
                }
                Ok(instance.trigger_snapshots.insert(next.name.clone(), next))
            })
            .await
            .map(|(_, previous)| previous)
        };

        drop(lock);
        self.locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    /// Current snapshot for `name`, if any
    pub async fn get(&self, instance_id: Uuid, name: &str) -> Result<Option<TriggerSnapshot>> {
        Ok(self
            .store
            .find_instance(instance_id)
            .await?
            .and_then(|instance| instance.trigger_snapshots.get(name).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnsembleError;
    use crate::models::workflow::WorkflowInstance;
    use crate::workflow::persistence::InMemoryInstanceStore;
    use chrono::{Duration, Utc};
    use std::collections::HashMap;

    async fn store_with_instance() -> (Arc<InMemoryInstanceStore>, Uuid) {
        let store = Arc::new(InMemoryInstanceStore::new());
        let instance = WorkflowInstance::new(Uuid::new_v4(), HashMap::new());
        store.save_instance(&instance).await.unwrap();
        (store, instance.id)
    }

    #[tokio::test]
    async fn test_replace_returns_previous() {
        let (store, id) = store_with_instance().await;
        let snapshots = SnapshotStore::new(store);
        let now = Utc::now();

        let first = TriggerSnapshot {
            name: "price".to_string(),
            data: Some(serde_json::json!("1")),
            last_execution: now,
        };
        assert!(snapshots.replace(id, first.clone()).await.unwrap().is_none());

        let second = TriggerSnapshot {
            name: "price".to_string(),
            data: Some(serde_json::json!("2")),
            last_execution: now + Duration::seconds(1),
        };
        let previous = snapshots.replace(id, second.clone()).await.unwrap();
        assert_eq!(previous, Some(first));
        assert_eq!(snapshots.get(id, "price").await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_last_execution_never_moves_backwards() {
        let (store, id) = store_with_instance().await;
        let snapshots = SnapshotStore::new(store);
        let now = Utc::now();

        let newer = TriggerSnapshot {
            name: "tick".to_string(),
            data: None,
            last_execution: now,
        };
        snapshots.replace(id, newer).await.unwrap();

        let older = TriggerSnapshot {
            name: "tick".to_string(),
            data: None,
            last_execution: now - Duration::minutes(5),
        };
        snapshots.replace(id, older).await.unwrap();

        let stored = snapshots.get(id, "tick").await.unwrap().unwrap();
        assert_eq!(stored.last_execution, now);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_many_triggers_of_one_instance_all_land() {
        let (store, id) = store_with_instance().await;
        let snapshots = Arc::new(SnapshotStore::new(store.clone()));
        let now = Utc::now();

        let tasks: Vec<_> = (0..48)
            .map(|n| {
                let snapshots = Arc::clone(&snapshots);
                tokio::spawn(async move {
                    snapshots
                        .replace(
                            id,
                            TriggerSnapshot {
                                name: format!("trigger-{}", n),
                                data: Some(serde_json::json!(n.to_string())),
                                last_execution: now,
                            },
                        )
                        .await
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().unwrap().is_none());
        }

        let instance = store.find_instance(id).await.unwrap().unwrap();
        assert_eq!(instance.trigger_snapshots.len(), 48);
        assert_eq!(instance.version, 49);
        assert!(snapshots.locks.is_empty());
    }

    #[tokio::test]
    async fn test_replace_on_missing_instance() {
        let snapshots = SnapshotStore::new(Arc::new(InMemoryInstanceStore::new()));
        let result = snapshots
            .replace(
                Uuid::new_v4(),
                TriggerSnapshot {
                    name: "tick".to_string(),
                    data: None,
                    last_execution: Utc::now(),
                },
            )
            .await;
        assert!(matches!(result, Err(EnsembleError::NotFound(_))));
        assert!(snapshots.locks.is_empty());
    }
}
