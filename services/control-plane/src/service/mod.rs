//! The scheduler control-plane service.
//!
//! Every public operation returns a [`Response`](crate::model::Response) envelope; errors inside an
//! operation are mapped to response codes at the operation boundary. The
//! one exception is `rewrite_configs`, whose fatal validation failure is
//! surfaced as an `Err` so the transport can report the aborted batch.

mod admin;
mod jobs;
mod kill;
mod updates;

use std::sync::Arc;
use std::time::Duration;

use corral_reconcile::{
    BackoffPolicy, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF,
};
use tokio_util::sync::CancellationToken;

use crate::admin::{
    MaintenanceController, MemBackupStore, MemMaintenanceController, MemQuotaManager,
    QuotaManager, Recovery, StorageBackup,
};
use crate::auth::{AuthGate, CapabilityPolicy, SessionValidator};
use crate::scheduler::{CronJobManager, MemSchedulerCore, SchedulerCore, StoredCronJobs};
use crate::store::{MemStorage, Storage, StoreResult};
use crate::updates::UpdateCoordinator;

pub use updates::StartUpdateResult;

/// Backoff bounds for the kill convergence poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillSettings {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
}

impl Default for KillSettings {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl KillSettings {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.initial_backoff, self.max_backoff)
            .with_max_attempts(self.max_attempts)
    }
}

/// Collaborators the service delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn Storage>,
    pub scheduler: Arc<dyn SchedulerCore>,
    pub cron: Arc<dyn CronJobManager>,
    pub validator: Arc<dyn SessionValidator>,
    pub quota: Arc<dyn QuotaManager>,
    pub maintenance: Arc<dyn MaintenanceController>,
    pub backup: Arc<dyn StorageBackup>,
    pub recovery: Arc<dyn Recovery>,
}

impl Collaborators {
    /// Wires every collaborator to one in-memory store.
    pub fn in_memory(storage: Arc<MemStorage>, validator: Arc<dyn SessionValidator>) -> Self {
        let backups = Arc::new(MemBackupStore::new(storage.clone()));
        let shared: Arc<dyn Storage> = storage;
        Self {
            scheduler: Arc::new(MemSchedulerCore::new(shared.clone())),
            cron: Arc::new(StoredCronJobs::new(shared.clone())),
            validator,
            quota: Arc::new(MemQuotaManager::new()),
            maintenance: Arc::new(MemMaintenanceController::new(shared.clone())),
            backup: backups.clone(),
            recovery: backups,
            storage: shared,
        }
    }
}

pub struct SchedulerService {
    storage: Arc<dyn Storage>,
    scheduler: Arc<dyn SchedulerCore>,
    cron: Arc<dyn CronJobManager>,
    auth: AuthGate,
    updates: UpdateCoordinator,
    quota: Arc<dyn QuotaManager>,
    maintenance: Arc<dyn MaintenanceController>,
    backup: Arc<dyn StorageBackup>,
    recovery: Arc<dyn Recovery>,
    kill: KillSettings,
    shutdown: CancellationToken,
}

impl SchedulerService {
    /// Creates the service. Cancelling `shutdown` interrupts in-flight kill polls.
    pub fn new(
        collaborators: Collaborators,
        policy: CapabilityPolicy,
        kill: KillSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let Collaborators {
            storage,
            scheduler,
            cron,
            validator,
            quota,
            maintenance,
            backup,
            recovery,
        } = collaborators;

        Self {
            updates: UpdateCoordinator::new(storage.clone()),
            auth: AuthGate::new(validator, policy),
            storage,
            scheduler,
            cron,
            quota,
            maintenance,
            backup,
            recovery,
            kill,
            shutdown,
        }
    }

    pub fn auth(&self) -> &AuthGate {
        &self.auth
    }

    /// Store liveness, used by readiness probes.
    pub fn health_check(&self) -> StoreResult<()> {
        self.storage.health_check()
    }
}
