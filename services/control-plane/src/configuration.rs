//! Job configuration validation and population.
//!
//! Every job accepted by the control plane passes through
//! [`validate_and_populate`]: it checks the key and resources, copies the job
//! identity into the task template and fills in defaults.

use corral_id::{IdError, JobKey};
use thiserror::Error;

use crate::model::{JobConfiguration, ShardTaskConfig, TaskConfig};

/// Upper bound on shards per job.
pub const MAX_SHARDS_PER_JOB: u32 = 4000;

/// Default number of failures tolerated before a task is abandoned.
pub const DEFAULT_MAX_TASK_FAILURES: i32 = 1;

/// Why a job configuration was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskDescriptionError {
    #[error("invalid job key: {0}")]
    InvalidJobKey(#[from] IdError),

    #[error("owner role '{owner_role}' does not match job key role '{key_role}'")]
    OwnerMismatch { key_role: String, owner_role: String },

    #[error("owner user cannot be blank")]
    BlankOwnerUser,

    #[error("shard count {0} outside 1..={MAX_SHARDS_PER_JOB}")]
    InvalidShardCount(u32),

    #[error("task {field} '{actual}' does not match job {field} '{expected}'")]
    FieldMismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },

    #[error("{0} must be positive")]
    NonPositive(&'static str),

    #[error("max_task_failures must be at least 1, got {0}")]
    InvalidMaxFailures(i32),

    #[error("cron schedule cannot be blank")]
    BlankCronSchedule,
}

/// A validated job together with its per-shard task configurations.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedConfiguration {
    job: JobConfiguration,
    task_configs: Vec<ShardTaskConfig>,
}

impl ParsedConfiguration {
    pub fn from_unparsed(job: JobConfiguration) -> Result<Self, TaskDescriptionError> {
        let job = validate_and_populate(job)?;
        let task_configs = (0..job.shard_count)
            .map(|shard_id| ShardTaskConfig {
                shard_id,
                task: job.task_config.clone(),
            })
            .collect();
        Ok(Self { job, task_configs })
    }

    pub fn job(&self) -> &JobConfiguration {
        &self.job
    }

    pub fn key(&self) -> &JobKey {
        &self.job.key
    }

    pub fn task_configs(&self) -> &[ShardTaskConfig] {
        &self.task_configs
    }

    pub fn into_job(self) -> JobConfiguration {
        self.job
    }
}

/// Validates `job` and returns it with the task template populated.
pub fn validate_and_populate(
    mut job: JobConfiguration,
) -> Result<JobConfiguration, TaskDescriptionError> {
    job.key.validate()?;

    if job.owner.role != job.key.role {
        return Err(TaskDescriptionError::OwnerMismatch {
            key_role: job.key.role.clone(),
            owner_role: job.owner.role.clone(),
        });
    }
    if job.owner.user.trim().is_empty() {
        return Err(TaskDescriptionError::BlankOwnerUser);
    }
    if job.shard_count == 0 || job.shard_count > MAX_SHARDS_PER_JOB {
        return Err(TaskDescriptionError::InvalidShardCount(job.shard_count));
    }
    if let Some(schedule) = &job.cron_schedule {
        if schedule.trim().is_empty() {
            return Err(TaskDescriptionError::BlankCronSchedule);
        }
    }

    let task = &mut job.task_config;
    if task.owner.role.is_empty() && task.owner.user.is_empty() {
        task.owner = job.owner.clone();
    } else if task.owner != job.owner {
        return Err(TaskDescriptionError::FieldMismatch {
            field: "owner",
            expected: format!("{}/{}", job.owner.role, job.owner.user),
            actual: format!("{}/{}", task.owner.role, task.owner.user),
        });
    }
    populate_field("environment", &mut task.environment, &job.key.environment)?;
    populate_field("name", &mut task.job_name, &job.key.name)?;

    job.task_config = apply_defaults_if_unset(job.task_config);
    validate_resources(&job.task_config)?;
    Ok(job)
}

fn populate_field(
    field: &'static str,
    value: &mut String,
    expected: &str,
) -> Result<(), TaskDescriptionError> {
    if value.is_empty() {
        *value = expected.to_string();
        Ok(())
    } else if value == expected {
        Ok(())
    } else {
        Err(TaskDescriptionError::FieldMismatch {
            field,
            expected: expected.to_string(),
            actual: value.clone(),
        })
    }
}

fn validate_resources(task: &TaskConfig) -> Result<(), TaskDescriptionError> {
    if task.num_cpus.is_nan() || task.num_cpus <= 0.0 {
        return Err(TaskDescriptionError::NonPositive("num_cpus"));
    }
    if task.ram_mb == 0 {
        return Err(TaskDescriptionError::NonPositive("ram_mb"));
    }
    if task.disk_mb == 0 {
        return Err(TaskDescriptionError::NonPositive("disk_mb"));
    }
    match task.max_task_failures {
        Some(failures) if failures < 1 => Err(TaskDescriptionError::InvalidMaxFailures(failures)),
        _ => Ok(()),
    }
}

/// Fills optional task fields that were left unset.
pub fn apply_defaults_if_unset(mut task: TaskConfig) -> TaskConfig {
    if task.max_task_failures.is_none() {
        task.max_task_failures = Some(DEFAULT_MAX_TASK_FAILURES);
    }
    if task
        .contact_email
        .as_deref()
        .is_some_and(|email| email.trim().is_empty())
    {
        task.contact_email = None;
    }
    task
}
