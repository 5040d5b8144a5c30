//! Workflow and instance persistence
//!
//! Saves are version-checked: a save only succeeds when the stored record still
//! carries the version the caller loaded, and each successful save bumps it.

use crate::error::{EnsembleError, Result};
use crate::models::workflow::{InstanceStatus, Workflow, WorkflowInstance};
use anyhow::Context;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Longest pause between two attempts of [`update_instance`]
const MAX_CAS_BACKOFF: Duration = Duration::from_millis(25);

fn cas_backoff(attempt: u32) -> Duration {
    Duration::from_millis(1u64 << attempt.min(5)).min(MAX_CAS_BACKOFF)
}

/// Document store holding workflow templates and their instances
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn find_instance(&self, id: Uuid) -> Result<Option<WorkflowInstance>>;

    /// Insert or replace `instance`, failing with `VersionConflict` if the stored
    /// version differs from `instance.version`. Returns the record as stored.
    async fn save_instance(&self, instance: &WorkflowInstance) -> Result<WorkflowInstance>;

    async fn list_instances(&self) -> Result<Vec<WorkflowInstance>>;

    async fn find_workflow(&self, id: Uuid) -> Result<Option<Workflow>>;

    async fn save_workflow(&self, workflow: &Workflow) -> Result<()>;

    async fn list_workflows(&self) -> Result<Vec<Workflow>>;

    async fn find_by_status(&self, status: InstanceStatus) -> Result<Vec<WorkflowInstance>> {
        Ok(self
            .list_instances()
            .await?
            .into_iter()
            .filter(|i| i.status == status)
            .collect())
    }
}

/// Load `id`, apply `mutate`, and save, retrying when another writer got there first.
///
/// A conflict means some other save of the record landed, so retries continue
/// with a short capped backoff until this one lands too. `mutate` may run more
/// than once and must only depend on the instance it is given.
pub async fn update_instance<S, F, T>(
    store: &S,
    id: Uuid,
    mut mutate: F,
) -> Result<(WorkflowInstance, T)>
where
    S: InstanceStore + ?Sized,
    F: FnMut(&mut WorkflowInstance) -> Result<T>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        let mut instance = store
            .find_instance(id)
            .await?
            .ok_or_else(|| EnsembleError::NotFound(format!("workflow instance {}", id)))?;

        let output = mutate(&mut instance)?;

        match store.save_instance(&instance).await {
            Ok(saved) => return Ok((saved, output)),
            Err(EnsembleError::VersionConflict(_)) => {
                tracing::debug!(instance_id = %id, attempt, "Version conflict, reloading instance");
                tokio::time::sleep(cas_backoff(attempt)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn check_and_bump(
    stored: Option<&WorkflowInstance>,
    incoming: &WorkflowInstance,
) -> Result<WorkflowInstance> {
    let expected = stored.map(|s| s.version).unwrap_or(0);
    if incoming.version != expected {
        return Err(EnsembleError::VersionConflict(incoming.id));
    }
    let mut next = incoming.clone();
    next.version = expected + 1;
    Ok(next)
}

/// Process-local store
#[derive(Default)]
pub struct InMemoryInstanceStore {
    instances: DashMap<Uuid, WorkflowInstance>,
    workflows: DashMap<Uuid, Workflow>,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn find_instance(&self, id: Uuid) -> Result<Option<WorkflowInstance>> {
        Ok(self.instances.get(&id).map(|entry| entry.clone()))
    }

    async fn save_instance(&self, instance: &WorkflowInstance) -> Result<WorkflowInstance> {
        // The entry guard holds the shard lock across check and write
        match self.instances.entry(instance.id) {
            Entry::Occupied(mut entry) => {
                let next = check_and_bump(Some(entry.get()), instance)?;
                entry.insert(next.clone());
                Ok(next)
            }
            Entry::Vacant(entry) => {
                let next = check_and_bump(None, instance)?;
                entry.insert(next.clone());
                Ok(next)
            }
        }
    }

    async fn list_instances(&self) -> Result<Vec<WorkflowInstance>> {
        Ok(self.instances.iter().map(|e| e.value().clone()).collect())
    }

    async fn find_workflow(&self, id: Uuid) -> Result<Option<Workflow>> {
        Ok(self.workflows.get(&id).map(|entry| entry.clone()))
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        self.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        Ok(self.workflows.iter().map(|e| e.value().clone()).collect())
    }
}

/// Root JSON document of the file store
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JsonStore {
    /// Registered workflow templates
    pub workflows: Vec<Workflow>,
    /// All workflow instances
    pub instances: Vec<WorkflowInstance>,
}

/// Store backed by a single JSON file with advisory file locking.
///
/// Nothing is cached: every read loads the file under a shared lock and every
/// write re-reads it under an exclusive lock, so several processes can share
/// one store file.
pub struct JsonFileInstanceStore {
    /// Path to JSON store file
    store_path: PathBuf,
}

impl JsonFileInstanceStore {
    /// Open the store at `store_path`, creating parent directories as needed
    pub fn new<P: AsRef<Path>>(store_path: P) -> Result<Self> {
        let store_path = store_path.as_ref().to_path_buf();

        if let Some(parent) = store_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create store directory")?;
        }

        // Surface an unreadable store at startup
        Self::load_store(&store_path)?;

        Ok(Self { store_path })
    }

    /// Load JSON store from file with a shared lock; a missing file is an empty store
    fn load_store(path: &Path) -> anyhow::Result<JsonStore> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(JsonStore::default()),
            Err(e) => return Err(e).context("Failed to open store file"),
        };

        file.lock_shared()
            .context("Failed to acquire read lock on store")?;

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(file);
        reader
            .read_to_string(&mut contents)
            .context("Failed to read store")?;

        // Lock is released when the file is dropped
        drop(reader);

        parse_store(&contents)
    }

    /// Re-read the file under an exclusive lock, apply `change` and write the
    /// result back. Nothing is written when `change` fails.
    fn commit<T>(&self, change: impl FnOnce(&mut JsonStore) -> Result<T>) -> Result<T> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.store_path)
            .context("Failed to open store file for writing")?;

        file.lock_exclusive()
            .context("Failed to acquire write lock on store")?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .context("Failed to read store")?;
        let mut store = parse_store(&contents)?;

        let output = change(&mut store)?;

        let json = serde_json::to_string_pretty(&store).context("Failed to serialize store")?;
        file.set_len(0).context("Failed to truncate store")?;
        file.seek(SeekFrom::Start(0))
            .context("Failed to rewind store")?;
        file.write_all(json.as_bytes())
            .context("Failed to write store")?;
        file.flush().context("Failed to flush store to disk")?;

        Ok(output)
    }
}

fn parse_store(contents: &str) -> anyhow::Result<JsonStore> {
    if contents.trim().is_empty() {
        return Ok(JsonStore::default());
    }
    serde_json::from_str(contents).context("Failed to parse store JSON")
}

#[async_trait]
impl InstanceStore for JsonFileInstanceStore {
    async fn find_instance(&self, id: Uuid) -> Result<Option<WorkflowInstance>> {
        let store = Self::load_store(&self.store_path)?;
        Ok(store.instances.into_iter().find(|i| i.id == id))
    }

    async fn save_instance(&self, instance: &WorkflowInstance) -> Result<WorkflowInstance> {
        self.commit(|store| {
            let position = store.instances.iter().position(|i| i.id == instance.id);
            let next = check_and_bump(position.map(|p| &store.instances[p]), instance)?;
            match position {
                Some(p) => store.instances[p] = next.clone(),
                None => store.instances.push(next.clone()),
            }
            Ok(next)
        })
    }

    async fn list_instances(&self) -> Result<Vec<WorkflowInstance>> {
        Ok(Self::load_store(&self.store_path)?.instances)
    }

    async fn find_workflow(&self, id: Uuid) -> Result<Option<Workflow>> {
        let store = Self::load_store(&self.store_path)?;
        Ok(store.workflows.into_iter().find(|w| w.id == id))
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        self.commit(|store| {
            match store.workflows.iter_mut().find(|w| w.id == workflow.id) {
                Some(existing) => *existing = workflow.clone(),
                None => store.workflows.push(workflow.clone()),
            }
            Ok(())
        })
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        Ok(Self::load_store(&self.store_path)?.workflows)
    }
}
