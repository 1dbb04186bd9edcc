//! In-memory administrative collaborators.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use corral_id::BackupId;
use tracing::info;

use super::{
    BackupError, HostStatuses, MaintenanceController, MaintenanceError, QuotaError, QuotaManager,
    Recovery, RecoveryError, StorageBackup,
};
use crate::model::{MaintenanceMode, Quota, ScheduledTask, TaskQuery};
use crate::store::{
    Consistency, MemStorage, MutableStoreProvider, Storage, StorageExt, StoreProvider, StoreState,
};

// =============================================================================
// Quotas
// =============================================================================

#[derive(Debug, Default)]
pub struct MemQuotaManager {
    quotas: RwLock<BTreeMap<String, Quota>>,
}

impl MemQuotaManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaManager for MemQuotaManager {
    async fn get_quota(&self, role: &str) -> Result<Quota, QuotaError> {
        let quotas = self.quotas.read().map_err(|_| QuotaError::Unavailable)?;
        Ok(quotas.get(role).copied().unwrap_or_default())
    }

    async fn set_quota(&self, role: &str, quota: Quota) -> Result<(), QuotaError> {
        if quota.num_cpus.is_nan() || quota.num_cpus < 0.0 {
            return Err(QuotaError::Invalid {
                role: role.to_string(),
                reason: "num_cpus must not be negative".to_string(),
            });
        }
        let mut quotas = self.quotas.write().map_err(|_| QuotaError::Unavailable)?;
        quotas.insert(role.to_string(), quota);
        info!(role, ?quota, "Quota set");
        Ok(())
    }
}

// =============================================================================
// Maintenance
// =============================================================================

/// Tracks host modes. A draining host counts as drained once no active task
/// is placed on it.
pub struct MemMaintenanceController {
    storage: Arc<dyn Storage>,
    modes: RwLock<BTreeMap<String, MaintenanceMode>>,
}

impl MemMaintenanceController {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            modes: RwLock::new(BTreeMap::new()),
        }
    }

    fn host_is_empty(&self, host: &str) -> Result<bool, MaintenanceError> {
        let tasks = self
            .storage
            .fetch_tasks(Consistency::Strong, &TaskQuery::on_host(host).active())?;
        Ok(tasks.is_empty())
    }

    /// Applies `transition` to each host's current mode and reports the result.
    ///
    /// Transitions are computed before the mode table is locked for writing,
    /// so a failure on any host leaves every host unchanged.
    fn update_modes(
        &self,
        hosts: &BTreeSet<String>,
        mut transition: impl FnMut(
            &str,
            MaintenanceMode,
        ) -> Result<MaintenanceMode, MaintenanceError>,
    ) -> Result<HostStatuses, MaintenanceError> {
        let current: Vec<(&String, MaintenanceMode)> = {
            let modes = self.modes.read().map_err(|_| MaintenanceError::Unavailable)?;
            hosts
                .iter()
                .map(|host| (host, modes.get(host).copied().unwrap_or_default()))
                .collect()
        };

        let mut statuses = HostStatuses::new();
        for (host, mode) in current {
            statuses.insert(host.clone(), transition(host.as_str(), mode)?);
        }

        let mut modes = self.modes.write().map_err(|_| MaintenanceError::Unavailable)?;
        for (host, next) in &statuses {
            if *next == MaintenanceMode::None {
                modes.remove(host);
            } else {
                modes.insert(host.clone(), *next);
            }
        }
        Ok(statuses)
    }

    fn settle(
        &self,
        host: &str,
        mode: MaintenanceMode,
    ) -> Result<MaintenanceMode, MaintenanceError> {
        if mode == MaintenanceMode::Draining && self.host_is_empty(host)? {
            Ok(MaintenanceMode::Drained)
        } else {
            Ok(mode)
        }
    }
}

#[async_trait]
impl MaintenanceController for MemMaintenanceController {
    async fn start_maintenance(
        &self,
        hosts: &BTreeSet<String>,
    ) -> Result<HostStatuses, MaintenanceError> {
        let statuses = self.update_modes(hosts, |_, current| {
            Ok(match current {
                MaintenanceMode::None => MaintenanceMode::Scheduled,
                other => other,
            })
        })?;
        info!(hosts = ?hosts, "Maintenance scheduled");
        Ok(statuses)
    }

    async fn drain(&self, hosts: &BTreeSet<String>) -> Result<HostStatuses, MaintenanceError> {
        let statuses = self.update_modes(hosts, |host, current| match current {
            MaintenanceMode::Drained => Ok(MaintenanceMode::Drained),
            _ => self.settle(host, MaintenanceMode::Draining),
        })?;
        info!(hosts = ?hosts, "Draining hosts");
        Ok(statuses)
    }

    async fn status(&self, hosts: &BTreeSet<String>) -> Result<HostStatuses, MaintenanceError> {
        self.update_modes(hosts, |host, current| self.settle(host, current))
    }

    async fn end_maintenance(
        &self,
        hosts: &BTreeSet<String>,
    ) -> Result<HostStatuses, MaintenanceError> {
        let statuses = self.update_modes(hosts, |_, _| Ok(MaintenanceMode::None))?;
        info!(hosts = ?hosts, "Maintenance ended");
        Ok(statuses)
    }
}

// =============================================================================
// Backup and recovery
// =============================================================================

/// JSON backups of a [`MemStorage`], with a single staging slot for recovery.
pub struct MemBackupStore {
    storage: Arc<MemStorage>,
    backups: RwLock<BTreeMap<BackupId, Vec<u8>>>,
    staged: RwLock<Option<StoreState>>,
}

impl MemBackupStore {
    pub fn new(storage: Arc<MemStorage>) -> Self {
        Self {
            storage,
            backups: RwLock::new(BTreeMap::new()),
            staged: RwLock::new(None),
        }
    }
}

#[async_trait]
impl StorageBackup for MemBackupStore {
    async fn backup_now(&self) -> Result<BackupId, BackupError> {
        let state = self.storage.export_state()?;
        let bytes = serde_json::to_vec(&state)?;
        let id = BackupId::new();
        let size = bytes.len();
        self.backups
            .write()
            .map_err(|_| BackupError::Unavailable)?
            .insert(id, bytes);
        info!(backup_id = %id, bytes = size, "Backup written");
        Ok(id)
    }
}

#[async_trait]
impl Recovery for MemBackupStore {
    async fn list_backups(&self) -> Result<Vec<BackupId>, RecoveryError> {
        let backups = self.backups.read().map_err(|_| RecoveryError::Unavailable)?;
        Ok(backups.keys().copied().collect())
    }

    async fn stage(&self, backup_id: &str) -> Result<(), RecoveryError> {
        let id = BackupId::parse(backup_id)
            .map_err(|_| RecoveryError::UnknownBackup(backup_id.to_string()))?;
        let state: StoreState = {
            let backups = self.backups.read().map_err(|_| RecoveryError::Unavailable)?;
            let bytes = backups
                .get(&id)
                .ok_or_else(|| RecoveryError::UnknownBackup(backup_id.to_string()))?;
            serde_json::from_slice(bytes)?
        };
        *self.staged.write().map_err(|_| RecoveryError::Unavailable)? = Some(state);
        info!(backup_id = %id, "Recovery staged");
        Ok(())
    }

    async fn query(&self, query: &TaskQuery) -> Result<Vec<ScheduledTask>, RecoveryError> {
        let staged = self.staged.read().map_err(|_| RecoveryError::Unavailable)?;
        let state = staged.as_ref().ok_or(RecoveryError::NotStaged)?;
        Ok(state.fetch_tasks(query))
    }

    async fn delete_tasks(&self, query: &TaskQuery) -> Result<usize, RecoveryError> {
        let mut staged = self.staged.write().map_err(|_| RecoveryError::Unavailable)?;
        let state = staged.as_mut().ok_or(RecoveryError::NotStaged)?;
        let ids: BTreeSet<_> = state
            .fetch_tasks(query)
            .iter()
            .map(ScheduledTask::task_id)
            .collect();
        let deleted = state.delete_tasks(&ids);
        info!(%query, deleted, "Deleted tasks from staged recovery");
        Ok(deleted)
    }

    async fn commit(&self) -> Result<(), RecoveryError> {
        let state = self
            .staged
            .write()
            .map_err(|_| RecoveryError::Unavailable)?
            .take()
            .ok_or(RecoveryError::NotStaged)?;
        self.storage.replace_state(state)?;
        info!("Recovery committed");
        Ok(())
    }

    async fn unload(&self) -> Result<(), RecoveryError> {
        self.staged
            .write()
            .map_err(|_| RecoveryError::Unavailable)?
            .take();
        info!("Recovery unloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::model::fixtures::sample_task;
    use crate::store::{StoreError, StoreResult};

    fn task_on(host: &str, shard: u32) -> ScheduledTask {
        let mut task = ScheduledTask::pending(shard, sample_task("www", "prod", "web"), None);
        task.assigned_task.slave_host = Some(host.to_string());
        task
    }

    /// Serves a fixed number of reads, then reports a poisoned store.
    struct FailingReads {
        inner: MemStorage,
        reads_left: AtomicUsize,
    }

    impl Storage for FailingReads {
        fn read(
            &self,
            consistency: Consistency,
            work: &mut dyn FnMut(&dyn StoreProvider),
        ) -> StoreResult<()> {
            let allowed = self
                .reads_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if allowed {
                self.inner.read(consistency, work)
            } else {
                Err(StoreError::Poisoned)
            }
        }

        fn write(
            &self,
            work: &mut dyn FnMut(&mut dyn MutableStoreProvider) -> StoreResult<()>,
        ) -> StoreResult<()> {
            self.inner.write(work)
        }

        fn snapshot(&self) -> StoreResult<()> {
            self.inner.snapshot()
        }

        fn health_check(&self) -> StoreResult<()> {
            self.inner.health_check()
        }
    }

    fn seed(storage: &MemStorage, tasks: Vec<ScheduledTask>) {
        storage
            .write_with(|store| {
                store.save_tasks(tasks);
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_quota_defaults_to_zero() {
        let quotas = MemQuotaManager::new();
        assert_eq!(quotas.get_quota("www").await.unwrap(), Quota::default());

        let quota = Quota {
            num_cpus: 4.0,
            ram_mb: 1024,
            disk_mb: 2048,
        };
        quotas.set_quota("www", quota).await.unwrap();
        assert_eq!(quotas.get_quota("www").await.unwrap(), quota);
    }

    #[tokio::test]
    async fn test_maintenance_lifecycle() {
        let storage = Arc::new(MemStorage::new());
        seed(&storage, vec![task_on("busy", 0)]);
        let maintenance = MemMaintenanceController::new(storage.clone());
        let hosts = BTreeSet::from(["busy".to_string(), "idle".to_string()]);

        let statuses = maintenance.start_maintenance(&hosts).await.unwrap();
        assert!(statuses.values().all(|m| *m == MaintenanceMode::Scheduled));

        let statuses = maintenance.drain(&hosts).await.unwrap();
        assert_eq!(statuses["busy"], MaintenanceMode::Draining);
        assert_eq!(statuses["idle"], MaintenanceMode::Drained);

        let statuses = maintenance.end_maintenance(&hosts).await.unwrap();
        assert!(statuses.values().all(|m| *m == MaintenanceMode::None));
        let statuses = maintenance.status(&hosts).await.unwrap();
        assert!(statuses.values().all(|m| *m == MaintenanceMode::None));
    }

    #[tokio::test]
    async fn test_failed_drain_leaves_every_host_unchanged() {
        let storage = Arc::new(FailingReads {
            inner: MemStorage::new(),
            reads_left: AtomicUsize::new(1),
        });
        let maintenance = MemMaintenanceController::new(storage);
        let hosts = BTreeSet::from(["a".to_string(), "b".to_string()]);
        maintenance.start_maintenance(&hosts).await.unwrap();

        let result = maintenance.drain(&hosts).await;
        assert!(matches!(
            result,
            Err(MaintenanceError::Storage(StoreError::Poisoned))
        ));

        let modes = maintenance.modes.read().unwrap();
        assert_eq!(modes["a"], MaintenanceMode::Scheduled);
        assert_eq!(modes["b"], MaintenanceMode::Scheduled);
    }

    #[tokio::test]
    async fn test_backup_stage_prune_commit() {
        let storage = Arc::new(MemStorage::new());
        seed(&storage, vec![task_on("a", 0), task_on("b", 1)]);
        let backups = MemBackupStore::new(storage.clone());

        let id = backups.backup_now().await.unwrap();
        assert_eq!(backups.list_backups().await.unwrap(), vec![id]);

        seed(&storage, vec![task_on("c", 2)]);
        assert!(matches!(
            backups.query(&TaskQuery::unscoped()).await,
            Err(RecoveryError::NotStaged)
        ));

        backups.stage(&id.to_string()).await.unwrap();
        assert_eq!(backups.query(&TaskQuery::unscoped()).await.unwrap().len(), 2);
        assert_eq!(
            backups.delete_tasks(&TaskQuery::on_host("a")).await.unwrap(),
            1
        );
        backups.commit().await.unwrap();

        let live = storage
            .fetch_tasks(Consistency::Strong, &TaskQuery::unscoped())
            .unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].assigned_task.slave_host.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_stage_unknown_backup() {
        let backups = MemBackupStore::new(Arc::new(MemStorage::new()));
        assert!(matches!(
            backups.stage("bkp_01HV4Z4NYPLTRS0JTUA8XDME5F").await,
            Err(RecoveryError::UnknownBackup(_))
        ));
        assert!(matches!(
            backups.stage("garbage").await,
            Err(RecoveryError::UnknownBackup(_))
        ));
        backups.unload().await.unwrap();
    }
}
