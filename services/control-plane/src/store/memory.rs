//! In-memory storage backend.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use corral_id::{JobKey, TaskId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    Consistency, MutableStoreProvider, Storage, StoreError, StoreProvider, StoreResult,
};
use crate::model::{JobConfiguration, JobUpdate, ScheduledTask, TaskConfig, TaskQuery};

/// Everything the store holds. Serializable so it can be snapshotted and
/// backed up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    tasks: BTreeMap<TaskId, ScheduledTask>,
    /// manager id -> job path -> job.
    #[serde(default)]
    jobs: BTreeMap<String, BTreeMap<String, JobConfiguration>>,
    /// job path -> update.
    #[serde(default)]
    updates: BTreeMap<String, JobUpdate>,
}

impl StoreState {
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

impl StoreProvider for StoreState {
    fn fetch_tasks(&self, query: &TaskQuery) -> Vec<ScheduledTask> {
        match &query.task_ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.tasks.get(id))
                .filter(|task| query.matches(task))
                .cloned()
                .collect(),
            None => self
                .tasks
                .values()
                .filter(|task| query.matches(task))
                .cloned()
                .collect(),
        }
    }

    fn fetch_manager_ids(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    fn fetch_jobs(&self, manager_id: &str) -> Vec<JobConfiguration> {
        self.jobs
            .get(manager_id)
            .map(|jobs| jobs.values().cloned().collect())
            .unwrap_or_default()
    }

    fn fetch_job(&self, manager_id: &str, key: &JobKey) -> Option<JobConfiguration> {
        self.jobs.get(manager_id)?.get(&key.path()).cloned()
    }

    fn fetch_update(&self, key: &JobKey) -> Option<JobUpdate> {
        self.updates.get(&key.path()).cloned()
    }

    fn fetch_updating_roles(&self) -> BTreeSet<String> {
        self.updates
            .values()
            .map(|update| update.job_key.role.clone())
            .collect()
    }

    fn fetch_update_configs(&self, role: &str) -> Vec<JobUpdate> {
        self.updates
            .values()
            .filter(|update| update.job_key.role == role)
            .cloned()
            .collect()
    }
}

impl MutableStoreProvider for StoreState {
    fn save_accepted_job(&mut self, manager_id: &str, job: JobConfiguration) {
        self.jobs
            .entry(manager_id.to_string())
            .or_default()
            .insert(job.key.path(), job);
    }

    fn remove_job(&mut self, manager_id: &str, key: &JobKey) -> bool {
        let Some(jobs) = self.jobs.get_mut(manager_id) else {
            return false;
        };
        let removed = jobs.remove(&key.path()).is_some();
        if jobs.is_empty() {
            self.jobs.remove(manager_id);
        }
        removed
    }

    fn save_tasks(&mut self, tasks: Vec<ScheduledTask>) {
        for task in tasks {
            self.tasks.insert(task.task_id(), task);
        }
    }

    fn mutate_tasks(
        &mut self,
        query: &TaskQuery,
        mutation: &mut dyn FnMut(&mut ScheduledTask),
    ) -> Vec<ScheduledTask> {
        self.tasks
            .values_mut()
            .filter(|task| query.matches(task))
            .map(|task| {
                mutation(task);
                task.clone()
            })
            .collect()
    }

    fn delete_tasks(&mut self, task_ids: &BTreeSet<TaskId>) -> usize {
        task_ids
            .iter()
            .filter(|id| self.tasks.remove(id).is_some())
            .count()
    }

    fn unsafe_modify_in_place(&mut self, task_id: &TaskId, config: TaskConfig) -> bool {
        match self.tasks.get_mut(task_id) {
            Some(task) if task.assigned_task.task != config => {
                task.assigned_task.task = config;
                true
            }
            _ => false,
        }
    }

    fn save_update(&mut self, update: JobUpdate) {
        self.updates.insert(update.job_key.path(), update);
    }

    fn remove_update(&mut self, key: &JobKey) -> Option<JobUpdate> {
        self.updates.remove(&key.path())
    }
}

/// Single-replica store guarded by a reader-writer lock.
///
/// Weak and strong reads observe the same state here.
#[derive(Debug, Default)]
pub struct MemStorage {
    state: RwLock<StoreState>,
    last_snapshot: RwLock<Option<Vec<u8>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: StoreState) -> Self {
        Self {
            state: RwLock::new(state),
            last_snapshot: RwLock::new(None),
        }
    }

    /// A copy of the committed state.
    pub fn export_state(&self) -> StoreResult<StoreState> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.clone())
    }

    /// Replaces the committed state wholesale.
    pub fn replace_state(&self, replacement: StoreState) -> StoreResult<()> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        info!(tasks = replacement.task_count(), "Replacing store state");
        *state = replacement;
        Ok(())
    }

    /// Size in bytes of the most recent snapshot.
    pub fn last_snapshot_len(&self) -> StoreResult<Option<usize>> {
        let snapshot = self.last_snapshot.read().map_err(|_| StoreError::Poisoned)?;
        Ok(snapshot.as_ref().map(Vec::len))
    }
}

impl Storage for MemStorage {
    fn read(
        &self,
        consistency: Consistency,
        work: &mut dyn FnMut(&dyn StoreProvider),
    ) -> StoreResult<()> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        debug!(?consistency, "Store read");
        work(&*state);
        Ok(())
    }

    fn write(
        &self,
        work: &mut dyn FnMut(&mut dyn MutableStoreProvider) -> StoreResult<()>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        let mut working = state.clone();
        work(&mut working)?;
        *state = working;
        Ok(())
    }

    fn snapshot(&self) -> StoreResult<()> {
        let bytes = {
            let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
            serde_json::to_vec(&*state)?
        };
        let len = bytes.len();
        let mut snapshot = self
            .last_snapshot
            .write()
            .map_err(|_| StoreError::Poisoned)?;
        *snapshot = Some(bytes);
        info!(bytes = len, "Store snapshot written");
        Ok(())
    }

    fn health_check(&self) -> StoreResult<()> {
        self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(())
    }
}
