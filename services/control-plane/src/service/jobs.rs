//! Job creation, cron launches and read-only views.

use corral_id::JobKey;
use tracing::info;

use super::SchedulerService;
use crate::auth::SessionKey;
use crate::configuration::ParsedConfiguration;
use crate::error::{ControlError, ControlResult};
use crate::model::{JobConfiguration, Response, ScheduledTask, ShardTaskConfig, TaskQuery};
use crate::scheduler::LaunchError;
use crate::store::{Consistency, StorageExt};
use crate::views::merge_job_views;

pub(super) fn validate_key(key: &JobKey) -> ControlResult<()> {
    key.validate()
        .map_err(|err| ControlError::invalid_request(format!("Invalid job key: {err}")))
}

pub(super) fn parse_job(job: JobConfiguration) -> ControlResult<ParsedConfiguration> {
    ParsedConfiguration::from_unparsed(job)
        .map_err(|err| ControlError::invalid_request(format!("Invalid task description: {err}")))
}

impl SchedulerService {
    /// Validates and schedules a new job owned by the caller's role.
    pub async fn create_job(&self, job: JobConfiguration, session: &SessionKey) -> Response<u32> {
        self.try_create_job(job, session)
            .await
            .unwrap_or_else(Response::from)
    }

    async fn try_create_job(
        &self,
        job: JobConfiguration,
        session: &SessionKey,
    ) -> ControlResult<Response<u32>> {
        validate_key(&job.key)?;
        self.auth.authenticate(session, &job.owner.role)?;
        let parsed = parse_job(job)?;

        let key = parsed.key().clone();
        let shards = parsed.job().shard_count;
        self.scheduler.create_job(parsed).await.map_err(|err| {
            ControlError::ScheduleConflict(format!("Failed to schedule job - {err}"))
        })?;

        info!(job = %key, user = %session.user, shards, "Job created");
        Ok(Response::ok(shards).with_message(format!("{shards} new tasks pending for job {key}")))
    }

    /// Returns the per-shard task configurations `job` would produce.
    pub async fn populate_job_config(&self, job: JobConfiguration) -> Response<Vec<ShardTaskConfig>> {
        match ParsedConfiguration::from_unparsed(job) {
            Ok(parsed) => {
                Response::ok(parsed.task_configs().to_vec()).with_message("Tasks populated")
            }
            Err(err) => Response::invalid_request(format!("Invalid configuration: {err}")),
        }
    }

    /// Launches one run of a cron job.
    pub async fn start_cron_job(&self, key: JobKey, session: &SessionKey) -> Response<()> {
        self.try_start_cron_job(key, session)
            .await
            .unwrap_or_else(Response::from)
    }

    async fn try_start_cron_job(
        &self,
        key: JobKey,
        session: &SessionKey,
    ) -> ControlResult<Response<()>> {
        validate_key(&key)?;
        self.auth.authenticate(session, &key.role)?;

        match self.scheduler.start_cron_job(&key).await {
            Ok(()) => {
                info!(job = %key, user = %session.user, "Cron run started");
                Ok(Response::ok_message("Cron run started."))
            }
            Err(LaunchError::Schedule(err)) => Err(ControlError::ScheduleConflict(format!(
                "Failed to start cron job - {err}"
            ))),
            Err(err @ LaunchError::InvalidConfig(_)) => Err(err.into()),
        }
    }

    /// Tasks matching `query`. An empty match is reported as an invalid request.
    pub async fn get_tasks_status(&self, query: TaskQuery) -> Response<Vec<ScheduledTask>> {
        match self.storage.fetch_tasks(Consistency::Weak, &query) {
            Ok(tasks) if tasks.is_empty() => {
                Response::invalid_request(format!("No tasks found for query: {query}"))
            }
            Ok(tasks) => Response::ok(tasks),
            Err(err) => ControlError::from(err).into(),
        }
    }

    /// One entry per job, optionally restricted to `owner_role`.
    pub async fn get_jobs(&self, owner_role: Option<&str>) -> Response<Vec<JobConfiguration>> {
        let role = owner_role.filter(|role| !role.trim().is_empty());
        let query = role
            .map(TaskQuery::role_scoped)
            .unwrap_or_default()
            .active();

        let tasks = match self.storage.fetch_tasks(Consistency::Weak, &query) {
            Ok(tasks) => tasks,
            Err(err) => return ControlError::from(err).into(),
        };
        let cron_jobs = match self.cron.jobs() {
            Ok(jobs) => jobs,
            Err(err) => return ControlError::from(err).into(),
        };

        Response::ok(merge_job_views(&tasks, cron_jobs, role))
    }
}
