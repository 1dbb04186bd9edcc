//! Administrative collaborators: quotas, host maintenance, backups and
//! recovery.

mod memory;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use corral_id::BackupId;
use thiserror::Error;

use crate::model::{MaintenanceMode, Quota, ScheduledTask, TaskQuery};
use crate::store::StoreError;

pub use memory::{MemBackupStore, MemMaintenanceController, MemQuotaManager};

/// Per-host maintenance modes.
pub type HostStatuses = BTreeMap<String, MaintenanceMode>;

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("quota store unavailable")]
    Unavailable,

    #[error("quota for role '{role}' is invalid: {reason}")]
    Invalid { role: String, reason: String },
}

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("maintenance state unavailable")]
    Unavailable,

    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup store unavailable")]
    Unavailable,

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("failed to encode backup: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("Unknown backup: {0}")]
    UnknownBackup(String),

    #[error("No recovery is staged")]
    NotStaged,

    #[error("recovery state unavailable")]
    Unavailable,

    #[error("failed to decode backup: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[async_trait]
pub trait QuotaManager: Send + Sync {
    /// The quota of `role`; roles without a quota get the zero quota.
    async fn get_quota(&self, role: &str) -> Result<Quota, QuotaError>;

    async fn set_quota(&self, role: &str, quota: Quota) -> Result<(), QuotaError>;
}

#[async_trait]
pub trait MaintenanceController: Send + Sync {
    async fn start_maintenance(&self, hosts: &BTreeSet<String>)
        -> Result<HostStatuses, MaintenanceError>;

    async fn drain(&self, hosts: &BTreeSet<String>) -> Result<HostStatuses, MaintenanceError>;

    async fn status(&self, hosts: &BTreeSet<String>) -> Result<HostStatuses, MaintenanceError>;

    async fn end_maintenance(&self, hosts: &BTreeSet<String>)
        -> Result<HostStatuses, MaintenanceError>;
}

#[async_trait]
pub trait StorageBackup: Send + Sync {
    async fn backup_now(&self) -> Result<BackupId, BackupError>;
}

/// Staged restore of a backup.
///
/// A backup is staged into a scratch copy, inspected and pruned with task
/// queries, then either committed over the live store or unloaded.
#[async_trait]
pub trait Recovery: Send + Sync {
    async fn list_backups(&self) -> Result<Vec<BackupId>, RecoveryError>;

    async fn stage(&self, backup_id: &str) -> Result<(), RecoveryError>;

    async fn query(&self, query: &TaskQuery) -> Result<Vec<ScheduledTask>, RecoveryError>;

    async fn delete_tasks(&self, query: &TaskQuery) -> Result<usize, RecoveryError>;

    async fn commit(&self) -> Result<(), RecoveryError>;

    async fn unload(&self) -> Result<(), RecoveryError>;
}
