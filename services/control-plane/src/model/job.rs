//! Job templates and task configurations.

use std::collections::BTreeSet;
use std::fmt;

use corral_id::JobKey;
use serde::{Deserialize, Serialize};

/// Owning role plus the user that submitted the job.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub role: String,
    pub user: String,
}

impl Identity {
    pub fn new(role: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            user: user.into(),
        }
    }
}

/// What a cron trigger does when the previous run is still active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CronCollisionPolicy {
    #[default]
    KillExisting,
    CancelNew,
    RunOverlap,
}

/// Placement constraint on a named host attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub constraint: TaskConstraint,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskConstraint {
    /// Attribute must (or, when negated, must not) take one of `values`.
    Value {
        #[serde(default)]
        negated: bool,
        values: BTreeSet<String>,
    },
    /// At most `limit` tasks of the job per attribute value.
    Limit { limit: u32 },
}

/// Opaque executor payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub name: String,
    pub data: String,
}

/// Resource and behavior specification of a single task instance.
///
/// `owner`, `environment` and `job_name` may be left blank in requests; the
/// configuration manager fills them from the enclosing job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub owner: Identity,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub job_name: String,
    pub num_cpus: f64,
    pub ram_mb: u64,
    pub disk_mb: u64,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub max_task_failures: Option<i32>,
    #[serde(default)]
    pub production: bool,
    #[serde(default)]
    pub is_service: bool,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub requested_ports: BTreeSet<String>,
    #[serde(default)]
    pub executor_config: Option<ExecutorConfig>,
}

impl TaskConfig {
    pub fn job_key(&self) -> JobKey {
        JobKey::new(&self.owner.role, &self.environment, &self.job_name)
    }
}

/// A job template: one task configuration replicated `shard_count` times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfiguration {
    pub key: JobKey,
    pub owner: Identity,
    #[serde(default)]
    pub cron_schedule: Option<String>,
    #[serde(default)]
    pub cron_collision_policy: CronCollisionPolicy,
    pub task_config: TaskConfig,
    pub shard_count: u32,
}

impl JobConfiguration {
    pub fn is_cron(&self) -> bool {
        self.cron_schedule.is_some()
    }

    /// Names the first identity field that differs from `other`, if any.
    ///
    /// Identity is the key, the job name carried by the task template, and
    /// the owner. None of these may change through a rewrite.
    pub fn identity_mismatch(&self, other: &JobConfiguration) -> Option<&'static str> {
        if self.key != other.key {
            Some("job key")
        } else if self.task_config.job_name != other.task_config.job_name {
            Some("job name")
        } else if self.owner != other.owner {
            Some("job owner")
        } else {
            None
        }
    }
}

/// One task slot of a job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardKey {
    pub job_key: JobKey,
    pub shard_id: u32,
}

impl ShardKey {
    pub fn new(job_key: JobKey, shard_id: u32) -> Self {
        Self { job_key, shard_id }
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.job_key, self.shard_id)
    }
}

/// A task configuration expanded for one shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardTaskConfig {
    pub shard_id: u32,
    pub task: TaskConfig,
}
