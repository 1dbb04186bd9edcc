//! Kill requests and the convergence wait that follows them.

use std::collections::BTreeSet;

use corral_reconcile::{poll_until_converged, ConvergenceStatus, ReconcileError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::SchedulerService;
use crate::auth::{Capability, SessionKey};
use crate::error::{ControlError, ControlResult};
use crate::model::{Response, TaskQuery};
use crate::store::{Consistency, StorageExt};

impl SchedulerService {
    /// Kills the tasks matching `query` and waits for them to leave the
    /// active states. The wait is interrupted by service shutdown.
    pub async fn kill_tasks(&self, query: TaskQuery, session: &SessionKey) -> Response<()> {
        let cancel = self.shutdown.child_token();
        self.kill_tasks_until(query, session, &cancel).await
    }

    /// Like [`SchedulerService::kill_tasks`], interrupted by `cancel`.
    #[instrument(skip_all, fields(user = %session.user, query = %query))]
    pub async fn kill_tasks_until(
        &self,
        query: TaskQuery,
        session: &SessionKey,
        cancel: &CancellationToken,
    ) -> Response<()> {
        self.try_kill_tasks(query, session, cancel)
            .await
            .unwrap_or_else(Response::from)
    }

    async fn try_kill_tasks(
        &self,
        query: TaskQuery,
        session: &SessionKey,
        cancel: &CancellationToken,
    ) -> ControlResult<Response<()>> {
        if let Some(name) = &query.job_name {
            if name.trim().is_empty() {
                return Err(ControlError::invalid_request(format!(
                    "Invalid job name: '{name}'"
                )));
            }
        }

        self.authorize_kill(&query, session)?;
        self.scheduler.kill_tasks(&query, &session.user).await?;
        self.await_killed(&query, cancel).await?;
        Ok(Response::ok_message("Tasks killed."))
    }

    /// Admins may kill anything. Everyone else must authenticate as every
    /// role the query touches.
    fn authorize_kill(&self, query: &TaskQuery, session: &SessionKey) -> ControlResult<()> {
        if self.auth.authorize(session, Capability::Root) {
            info!(user = %session.user, %query, "Granting kill query to admin user");
            return Ok(());
        }

        let mut roles: BTreeSet<String> = self
            .storage
            .fetch_tasks(Consistency::Strong, query)?
            .iter()
            .map(|task| task.role().to_string())
            .collect();
        if let Some(role) = &query.role {
            roles.insert(role.clone());
        }

        for role in &roles {
            self.auth.authenticate(session, role)?;
        }
        Ok(())
    }

    async fn await_killed(
        &self,
        query: &TaskQuery,
        cancel: &CancellationToken,
    ) -> ControlResult<()> {
        let active = query.clone().active();
        let policy = self.kill.backoff_policy();
        let resource = format!("tasks matching {query}");

        let outcome = poll_until_converged(&resource, &policy, cancel, || {
            std::future::ready(self.probe_remaining(&active))
        })
        .await;

        match outcome {
            Ok(outcome) => {
                info!(
                    %query,
                    attempts = outcome.attempts,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "Tasks killed"
                );
                Ok(())
            }
            Err(ReconcileError::Timeout { attempts, .. }) => {
                warn!(%query, attempts, "Tasks were not killed in time");
                Err(ControlError::Timeout("Tasks were not killed in time.".to_string()))
            }
            Err(ReconcileError::Cancelled { .. }) => {
                warn!(%query, "Kill wait interrupted");
                Err(ControlError::Interrupted("killTasks was interrupted.".to_string()))
            }
            Err(err) => Err(ControlError::subsystem(err.to_string())),
        }
    }

    fn probe_remaining(&self, active: &TaskQuery) -> Result<ConvergenceStatus, ReconcileError> {
        let remaining = self
            .storage
            .fetch_tasks(Consistency::Strong, active)
            .map_err(|err| ReconcileError::Internal(err.to_string()))?;

        if remaining.is_empty() {
            Ok(ConvergenceStatus::Converged)
        } else {
            debug!(remaining = remaining.len(), "Tasks still active");
            Ok(ConvergenceStatus::Converging)
        }
    }
}
