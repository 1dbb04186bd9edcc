//! Capability-gated administrative operations.

use std::collections::BTreeSet;
use std::fmt::Display;

use corral_id::{validate_identifier, BackupId, TaskId};
use tracing::{error, info};

use super::SchedulerService;
use crate::admin::HostStatuses;
use crate::auth::{AdminOperation, SessionKey};
use crate::error::{ControlError, ControlResult};
use crate::model::{Quota, Response, ResponseCode, ScheduleStatus, ScheduledTask, TaskQuery};
use crate::rewrite::{apply_rewrites, FailureSummary, RewriteCommand};
use crate::store::StorageExt;

fn failed<T>(err: impl Display) -> Response<T> {
    ControlError::subsystem(err.to_string()).into()
}

fn respond<T, E: Display>(result: Result<T, E>) -> Response<T> {
    match result {
        Ok(value) => Response::ok(value),
        Err(err) => failed(err),
    }
}

impl SchedulerService {
    // =========================================================================
    // Quotas
    // =========================================================================

    /// Quota of `role`. Needs no session.
    pub async fn get_quota(&self, role: &str) -> Response<Quota> {
        if let Err(err) = validate_identifier("role", role) {
            return Response::invalid_request(format!("Invalid role: {err}"));
        }
        respond(self.quota.get_quota(role).await)
    }

    pub async fn set_quota(&self, role: &str, quota: Quota, session: &SessionKey) -> Response<()> {
        self.auth
            .guarded(AdminOperation::SetQuota, session, move || async move {
                if let Err(err) = validate_identifier("role", role) {
                    return Response::invalid_request(format!("Invalid role: {err}"));
                }
                match self.quota.set_quota(role, quota).await {
                    Ok(()) => Response::ok_message("Quota applied."),
                    Err(err) => failed(err),
                }
            })
            .await
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    pub async fn start_maintenance(
        &self,
        hosts: BTreeSet<String>,
        session: &SessionKey,
    ) -> Response<HostStatuses> {
        self.auth
            .guarded(AdminOperation::StartMaintenance, session, move || async move {
                respond(self.maintenance.start_maintenance(&hosts).await)
            })
            .await
    }

    pub async fn drain_hosts(
        &self,
        hosts: BTreeSet<String>,
        session: &SessionKey,
    ) -> Response<HostStatuses> {
        self.auth
            .guarded(AdminOperation::DrainHosts, session, move || async move {
                respond(self.maintenance.drain(&hosts).await)
            })
            .await
    }

    pub async fn maintenance_status(
        &self,
        hosts: BTreeSet<String>,
        session: &SessionKey,
    ) -> Response<HostStatuses> {
        self.auth
            .guarded(AdminOperation::MaintenanceStatus, session, move || async move {
                respond(self.maintenance.status(&hosts).await)
            })
            .await
    }

    pub async fn end_maintenance(
        &self,
        hosts: BTreeSet<String>,
        session: &SessionKey,
    ) -> Response<HostStatuses> {
        self.auth
            .guarded(AdminOperation::EndMaintenance, session, move || async move {
                respond(self.maintenance.end_maintenance(&hosts).await)
            })
            .await
    }

    // =========================================================================
    // Task state
    // =========================================================================

    /// Forces a task into `status`, bypassing the normal lifecycle.
    pub async fn force_task_state(
        &self,
        task_id: &str,
        status: ScheduleStatus,
        session: &SessionKey,
    ) -> Response<()> {
        self.auth
            .guarded(AdminOperation::ForceTaskState, session, move || async move {
                let id = match TaskId::parse(task_id) {
                    Ok(id) => id,
                    Err(err) => {
                        return Response::invalid_request(format!("Invalid task id: {err}"))
                    }
                };
                let message = format!("Transition forced by {}", session.user);
                match self
                    .scheduler
                    .set_task_status(&TaskQuery::by_id(id), status, Some(message))
                    .await
                {
                    Ok(()) => Response::ok_message("Transition attempted."),
                    Err(err) => ControlError::from(err).into(),
                }
            })
            .await
    }

    // =========================================================================
    // Backup and recovery
    // =========================================================================

    pub async fn perform_backup(&self, session: &SessionKey) -> Response<BackupId> {
        self.auth
            .guarded(AdminOperation::PerformBackup, session, move || async move {
                respond(self.backup.backup_now().await)
            })
            .await
    }

    pub async fn list_backups(&self, session: &SessionKey) -> Response<Vec<BackupId>> {
        self.auth
            .guarded(AdminOperation::ListBackups, session, move || async move {
                respond(self.recovery.list_backups().await)
            })
            .await
    }

    pub async fn stage_recovery(&self, backup_id: &str, session: &SessionKey) -> Response<()> {
        self.auth
            .guarded(AdminOperation::StageRecovery, session, move || async move {
                match self.recovery.stage(backup_id).await {
                    Ok(()) => Response::ok_message("Recovery staged."),
                    Err(err) => failed(err),
                }
            })
            .await
    }

    pub async fn query_recovery(
        &self,
        query: TaskQuery,
        session: &SessionKey,
    ) -> Response<Vec<ScheduledTask>> {
        self.auth
            .guarded(AdminOperation::QueryRecovery, session, move || async move {
                respond(self.recovery.query(&query).await)
            })
            .await
    }

    pub async fn delete_recovery_tasks(
        &self,
        query: TaskQuery,
        session: &SessionKey,
    ) -> Response<usize> {
        self.auth
            .guarded(AdminOperation::DeleteRecoveryTasks, session, move || async move {
                match self.recovery.delete_tasks(&query).await {
                    Ok(deleted) => {
                        Response::ok(deleted).with_message(format!("Deleted {deleted} tasks."))
                    }
                    Err(err) => failed(err),
                }
            })
            .await
    }

    pub async fn commit_recovery(&self, session: &SessionKey) -> Response<()> {
        self.auth
            .guarded(AdminOperation::CommitRecovery, session, move || async move {
                match self.recovery.commit().await {
                    Ok(()) => Response::ok_message("Recovery committed."),
                    Err(err) => failed(err),
                }
            })
            .await
    }

    pub async fn unload_recovery(&self, session: &SessionKey) -> Response<()> {
        self.auth
            .guarded(AdminOperation::UnloadRecovery, session, move || async move {
                match self.recovery.unload().await {
                    Ok(()) => Response::ok_message("Recovery unloaded."),
                    Err(err) => failed(err),
                }
            })
            .await
    }

    /// Compacts the store.
    pub async fn snapshot(&self, session: &SessionKey) -> Response<()> {
        self.auth
            .guarded(AdminOperation::Snapshot, session, move || async move {
                match self.storage.snapshot() {
                    Ok(()) => Response::ok_message("Compaction successful."),
                    Err(err) => failed(format!("Snapshot failed: {err}")),
                }
            })
            .await
    }

    // =========================================================================
    // Config rewrites
    // =========================================================================

    /// Applies a batch of compare-and-swap rewrites in one transaction.
    ///
    /// Per-command mismatches yield a WARNING listing every failure. An
    /// invalid rewritten job is returned as `Err` and nothing is committed.
    pub async fn rewrite_configs(
        &self,
        commands: Vec<RewriteCommand>,
        session: &SessionKey,
    ) -> ControlResult<Response<()>> {
        if let Err(err) = self.auth.guard(AdminOperation::RewriteConfigs, session) {
            return Ok(err.into());
        }
        if commands.is_empty() {
            return Ok(Response::error("No rewrite commands provided."));
        }

        let failures = self
            .storage
            .write_with(|store| apply_rewrites(store, &commands))
            .inspect_err(|err| {
                error!(user = %session.user, error = %err, "Rewrite batch aborted");
            })?;

        info!(
            user = %session.user,
            commands = commands.len(),
            failures = failures.len(),
            "Rewrite batch applied"
        );
        if failures.is_empty() {
            Ok(Response::ok_message("All rewrites completed successfully."))
        } else {
            let warnings: Vec<ControlError> =
                failures.into_iter().map(ControlError::from).collect();
            let code = warnings
                .first()
                .map_or(ResponseCode::Warning, ControlError::code);
            Ok(Response::new(code, FailureSummary(&warnings).to_string()))
        }
    }
}
