//! Scheduling core and cron job manager.
//!
//! The control plane hands validated jobs to a [`SchedulerCore`], which owns
//! task creation and state transitions. Cron templates live in the job store
//! under [`CRON_MANAGER_ID`] and are read back through a [`CronJobManager`].

mod memory;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use corral_id::JobKey;
use thiserror::Error;

use crate::configuration::{ParsedConfiguration, TaskDescriptionError};
use crate::model::{JobConfiguration, ScheduleStatus, TaskQuery};
use crate::store::{Consistency, Storage, StorageExt, StoreError, StoreResult};

pub use crate::store::CRON_MANAGER_ID;
pub use memory::MemSchedulerCore;

/// The scheduler refused a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ScheduleError(String);

impl ScheduleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<StoreError> for ScheduleError {
    fn from(err: StoreError) -> Self {
        Self(format!("storage failure: {err}"))
    }
}

/// Failure starting a cron run.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// The stored template no longer validates.
    #[error(transparent)]
    InvalidConfig(#[from] TaskDescriptionError),
}

impl From<StoreError> for LaunchError {
    fn from(err: StoreError) -> Self {
        Self::Schedule(err.into())
    }
}

/// Task lifecycle operations.
#[async_trait]
pub trait SchedulerCore: Send + Sync {
    /// Accepts a job. Cron jobs are stored as templates; other jobs get one
    /// PENDING task per shard.
    async fn create_job(&self, parsed: ParsedConfiguration) -> Result<(), ScheduleError>;

    /// Launches one run of a stored cron template.
    async fn start_cron_job(&self, key: &JobKey) -> Result<(), LaunchError>;

    /// Asks every active task matching `query` to die. A job-scoped query also
    /// removes the job's cron template.
    async fn kill_tasks(&self, query: &TaskQuery, user: &str) -> Result<(), ScheduleError>;

    /// Restarts the given shards; every shard must currently be active.
    async fn restart_shards(
        &self,
        key: &JobKey,
        shards: &BTreeSet<u32>,
        user: &str,
    ) -> Result<(), ScheduleError>;

    /// Moves every task matching `query` to `status`.
    async fn set_task_status(
        &self,
        query: &TaskQuery,
        status: ScheduleStatus,
        message: Option<String>,
    ) -> Result<(), ScheduleError>;
}

/// Source of cron job templates.
pub trait CronJobManager: Send + Sync {
    fn jobs(&self) -> StoreResult<Vec<JobConfiguration>>;
}

/// Reads cron templates from the job store.
#[derive(Clone)]
pub struct StoredCronJobs {
    storage: Arc<dyn Storage>,
}

impl StoredCronJobs {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

impl CronJobManager for StoredCronJobs {
    fn jobs(&self) -> StoreResult<Vec<JobConfiguration>> {
        self.storage
            .read_with(Consistency::Weak, |store| store.fetch_jobs(CRON_MANAGER_ID))
    }
}
