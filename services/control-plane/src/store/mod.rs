//! Transactional store facade.
//!
//! Reads run against a consistent view of the store; writes run against a
//! working copy that is committed only when the work succeeds.

mod error;
mod memory;

use std::collections::BTreeSet;

use corral_id::{JobKey, TaskId};

use crate::model::{JobConfiguration, JobUpdate, ScheduledTask, TaskConfig, TaskQuery};

pub use error::{StoreError, StoreResult};
pub use memory::{MemStorage, StoreState};

/// Manager id under which cron job templates are stored.
pub const CRON_MANAGER_ID: &str = "CRON";

/// Read consistency requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    /// May observe a slightly stale view. Used for listings.
    Weak,
    /// Observes every committed write. Used by kill authorization and polling.
    Strong,
}

/// Read access to the task, job and update stores.
pub trait StoreProvider {
    fn fetch_tasks(&self, query: &TaskQuery) -> Vec<ScheduledTask>;

    fn fetch_manager_ids(&self) -> Vec<String>;

    fn fetch_jobs(&self, manager_id: &str) -> Vec<JobConfiguration>;

    fn fetch_job(&self, manager_id: &str, key: &JobKey) -> Option<JobConfiguration> {
        self.fetch_jobs(manager_id)
            .into_iter()
            .find(|job| &job.key == key)
    }

    fn fetch_update(&self, key: &JobKey) -> Option<JobUpdate>;

    /// Roles that currently have an update in flight.
    fn fetch_updating_roles(&self) -> BTreeSet<String>;

    fn fetch_update_configs(&self, role: &str) -> Vec<JobUpdate>;
}

/// Write access, available only inside a transaction.
pub trait MutableStoreProvider: StoreProvider {
    fn save_accepted_job(&mut self, manager_id: &str, job: JobConfiguration);

    fn remove_job(&mut self, manager_id: &str, key: &JobKey) -> bool;

    fn save_tasks(&mut self, tasks: Vec<ScheduledTask>);

    /// Applies `mutation` to every matching task and returns the results.
    fn mutate_tasks(
        &mut self,
        query: &TaskQuery,
        mutation: &mut dyn FnMut(&mut ScheduledTask),
    ) -> Vec<ScheduledTask>;

    fn delete_tasks(&mut self, task_ids: &BTreeSet<TaskId>) -> usize;

    /// Replaces the configuration of a task without a state transition.
    ///
    /// Returns false when the task is missing or already carries `config`.
    fn unsafe_modify_in_place(&mut self, task_id: &TaskId, config: TaskConfig) -> bool;

    fn save_update(&mut self, update: JobUpdate);

    fn remove_update(&mut self, key: &JobKey) -> Option<JobUpdate>;
}

/// Storage backend.
///
/// The methods take trait objects so backends stay object safe; the
/// [`StorageExt`] helpers provide typed results on top.
pub trait Storage: Send + Sync {
    fn read(
        &self,
        consistency: Consistency,
        work: &mut dyn FnMut(&dyn StoreProvider),
    ) -> StoreResult<()>;

    /// Runs `work` in a transaction. An `Err` from `work` discards every change.
    fn write(
        &self,
        work: &mut dyn FnMut(&mut dyn MutableStoreProvider) -> StoreResult<()>,
    ) -> StoreResult<()>;

    /// Compacts the store into a snapshot.
    fn snapshot(&self) -> StoreResult<()>;

    fn health_check(&self) -> StoreResult<()>;
}

/// Typed helpers over [`Storage`].
pub trait StorageExt: Storage {
    fn read_with<T>(
        &self,
        consistency: Consistency,
        work: impl FnOnce(&dyn StoreProvider) -> T,
    ) -> StoreResult<T> {
        let mut work = Some(work);
        let mut output = None;
        self.read(consistency, &mut |store| {
            if let Some(work) = work.take() {
                output = Some(work(store));
            }
        })?;
        output.ok_or_else(|| StoreError::Aborted("read did not run".to_string()))
    }

    /// Runs `work` in a transaction, committing only when it returns `Ok`.
    fn write_with<T, E>(
        &self,
        work: impl FnOnce(&mut dyn MutableStoreProvider) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut work = Some(work);
        let mut output = None;
        let status = self.write(&mut |store| {
            let Some(work) = work.take() else {
                return Err(StoreError::Aborted("transaction already ran".to_string()));
            };
            let result = work(store);
            let commit = match &result {
                Ok(_) => Ok(()),
                Err(_) => Err(StoreError::Aborted("rolled back".to_string())),
            };
            output = Some(result);
            commit
        });

        match (status, output) {
            (_, Some(Err(err))) => Err(err),
            (Ok(()), Some(Ok(value))) => Ok(value),
            (Err(err), _) => Err(err.into()),
            (Ok(()), None) => Err(StoreError::Aborted("transaction did not run".to_string()).into()),
        }
    }

    fn fetch_tasks(
        &self,
        consistency: Consistency,
        query: &TaskQuery,
    ) -> StoreResult<Vec<ScheduledTask>> {
        self.read_with(consistency, |store| store.fetch_tasks(query))
    }
}

impl<S: Storage + ?Sized> StorageExt for S {}
