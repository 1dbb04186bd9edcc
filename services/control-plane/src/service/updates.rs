//! Rolling updates and shard restarts.

use std::collections::BTreeSet;

use corral_id::{JobKey, UpdateToken};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::jobs::{parse_job, validate_key};
use super::SchedulerService;
use crate::auth::SessionKey;
use crate::error::{ControlError, ControlResult};
use crate::model::{JobConfiguration, JobUpdate, Response, UpdateResult, UpdateState};

/// Result of `start_update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartUpdateResult {
    pub rolling_update_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_token: Option<UpdateToken>,
}

fn parse_token(key: &JobKey, token: &str) -> ControlResult<UpdateToken> {
    UpdateToken::parse(token)
        .map_err(|_| ControlError::ScheduleConflict(format!("Invalid update token for {key}")))
}

fn require_shards(shards: &BTreeSet<u32>) -> ControlResult<()> {
    if shards.is_empty() {
        Err(ControlError::invalid_request("At least one shard must be specified"))
    } else {
        Ok(())
    }
}

impl SchedulerService {
    /// Starts a rolling update of `job`. A token is returned only when
    /// shards have to be replaced.
    pub async fn start_update(
        &self,
        job: JobConfiguration,
        session: &SessionKey,
    ) -> Response<StartUpdateResult> {
        self.try_start_update(job, session)
            .await
            .unwrap_or_else(Response::from)
    }

    #[instrument(skip_all, fields(job = %job.key, user = %session.user))]
    async fn try_start_update(
        &self,
        job: JobConfiguration,
        session: &SessionKey,
    ) -> ControlResult<Response<StartUpdateResult>> {
        validate_key(&job.key)?;
        self.auth.authenticate(session, &job.owner.role)?;
        let parsed = parse_job(job)?;

        let token = self.updates.initiate(&parsed, &session.user)?;
        let message = if token.is_some() {
            "Update successfully started."
        } else {
            "Job successfully updated."
        };
        Ok(Response::ok(StartUpdateResult {
            rolling_update_required: token.is_some(),
            update_token: token,
        })
        .with_message(message))
    }

    /// Common checks for shard-level update calls.
    fn check_shard_call(
        &self,
        key: &JobKey,
        shards: &BTreeSet<u32>,
        token: &str,
        session: &SessionKey,
    ) -> ControlResult<UpdateToken> {
        validate_key(key)?;
        require_shards(shards)?;
        if token.trim().is_empty() {
            return Err(ControlError::invalid_request("Update token cannot be blank"));
        }
        self.auth.authenticate(session, &key.role)?;
        parse_token(key, token.trim())
    }

    /// Replaces `shards` with their new configuration.
    pub async fn update_shards(
        &self,
        key: JobKey,
        shards: BTreeSet<u32>,
        token: &str,
        session: &SessionKey,
    ) -> Response<BTreeSet<u32>> {
        let result = self
            .check_shard_call(&key, &shards, token, session)
            .and_then(|token| {
                self.updates
                    .update_shards(&key, &shards, &token, &session.user)
                    .map_err(ControlError::from)
            });
        match result {
            Ok(affected) => Response::ok(affected.clone()).with_message(format!(
                "Successfully started update of shards: {affected:?}"
            )),
            Err(err) => err.into(),
        }
    }

    /// Restores `shards` to the configuration they had before the update.
    pub async fn rollback_shards(
        &self,
        key: JobKey,
        shards: BTreeSet<u32>,
        token: &str,
        session: &SessionKey,
    ) -> Response<BTreeSet<u32>> {
        let result = self
            .check_shard_call(&key, &shards, token, session)
            .and_then(|token| {
                self.updates
                    .rollback_shards(&key, &shards, &token, &session.user)
                    .map_err(ControlError::from)
            });
        match result {
            Ok(affected) => Response::ok(affected.clone()).with_message(format!(
                "Successfully started rollback of shards: {affected:?}"
            )),
            Err(err) => err.into(),
        }
    }

    /// Ends the update of `key`. `Terminate` does not need the token.
    pub async fn finish_update(
        &self,
        key: JobKey,
        result: UpdateResult,
        token: Option<&str>,
        session: &SessionKey,
    ) -> Response<UpdateState> {
        self.try_finish_update(key, result, token, session)
            .unwrap_or_else(Response::from)
    }

    fn try_finish_update(
        &self,
        key: JobKey,
        result: UpdateResult,
        token: Option<&str>,
        session: &SessionKey,
    ) -> ControlResult<Response<UpdateState>> {
        validate_key(&key)?;
        self.auth.authenticate(session, &key.role)?;
        // A terminated update is abandoned whatever token the caller holds.
        let token = token
            .filter(|_| result != UpdateResult::Terminate)
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| parse_token(&key, token))
            .transpose()?;

        let state = self
            .updates
            .finish(&key, token.as_ref(), result, &session.user)?;
        let message = match state {
            UpdateState::Terminated => "Update terminated.",
            _ => "Update successfully finished.",
        };
        Ok(Response::ok(state).with_message(message))
    }

    /// Restarts the given active shards of a job.
    pub async fn restart_shards(
        &self,
        key: JobKey,
        shards: BTreeSet<u32>,
        session: &SessionKey,
    ) -> Response<()> {
        self.try_restart_shards(key, shards, session)
            .await
            .unwrap_or_else(Response::from)
    }

    async fn try_restart_shards(
        &self,
        key: JobKey,
        shards: BTreeSet<u32>,
        session: &SessionKey,
    ) -> ControlResult<Response<()>> {
        validate_key(&key)?;
        require_shards(&shards)?;
        self.auth.authenticate(session, &key.role)?;
        self.scheduler
            .restart_shards(&key, &shards, &session.user)
            .await?;
        Ok(Response::ok_message("Shards are restarting."))
    }

    /// Every update currently in flight.
    pub async fn get_job_updates(&self) -> Response<Vec<JobUpdate>> {
        match self.updates.active_updates() {
            Ok(updates) => Response::ok(updates),
            Err(err) => ControlError::from(err).into(),
        }
    }
}
