//! Task queries.

use std::collections::BTreeSet;
use std::fmt;

use corral_id::{JobKey, TaskId};
use serde::{Deserialize, Serialize};

use super::{ScheduleStatus, ScheduledTask};

/// Filter over scheduled tasks. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_ids: Option<BTreeSet<TaskId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statuses: Option<BTreeSet<ScheduleStatus>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_ids: Option<BTreeSet<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slave_host: Option<String>,
}

impl TaskQuery {
    pub fn unscoped() -> Self {
        Self::default()
    }

    pub fn role_scoped(role: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            ..Self::default()
        }
    }

    pub fn job_scoped(key: &JobKey) -> Self {
        Self {
            role: Some(key.role.clone()),
            environment: Some(key.environment.clone()),
            job_name: Some(key.name.clone()),
            ..Self::default()
        }
    }

    pub fn shard_scoped(key: &JobKey, shards: impl IntoIterator<Item = u32>) -> Self {
        Self {
            shard_ids: Some(shards.into_iter().collect()),
            ..Self::job_scoped(key)
        }
    }

    pub fn by_ids(ids: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            task_ids: Some(ids.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn by_id(id: TaskId) -> Self {
        Self::by_ids([id])
    }

    pub fn on_host(host: impl Into<String>) -> Self {
        Self {
            slave_host: Some(host.into()),
            ..Self::default()
        }
    }

    /// Restricts the query to active states.
    pub fn active(self) -> Self {
        self.by_status(ScheduleStatus::ACTIVE)
    }

    pub fn by_status(mut self, statuses: impl IntoIterator<Item = ScheduleStatus>) -> Self {
        self.statuses = Some(statuses.into_iter().collect());
        self
    }

    /// The job this query is scoped to, when role, environment and name are all set.
    pub fn job_key(&self) -> Option<JobKey> {
        match (&self.role, &self.environment, &self.job_name) {
            (Some(role), Some(env), Some(name)) => Some(JobKey::new(role, env, name)),
            _ => None,
        }
    }

    pub fn matches(&self, task: &ScheduledTask) -> bool {
        let config = &task.assigned_task.task;
        let field = |filter: &Option<String>, value: &str| {
            filter.as_deref().is_none_or(|expected| expected == value)
        };

        field(&self.role, &config.owner.role)
            && field(&self.environment, &config.environment)
            && field(&self.job_name, &config.job_name)
            && self
                .task_ids
                .as_ref()
                .is_none_or(|ids| ids.contains(&task.task_id()))
            && self
                .statuses
                .as_ref()
                .is_none_or(|statuses| statuses.contains(&task.status))
            && self
                .shard_ids
                .as_ref()
                .is_none_or(|shards| shards.contains(&task.instance_id()))
            && self.slave_host.as_ref().is_none_or(|host| {
                task.assigned_task.slave_host.as_deref() == Some(host.as_str())
            })
    }
}

impl fmt::Display for TaskQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(role) = &self.role {
            parts.push(format!("role={role}"));
        }
        if let Some(env) = &self.environment {
            parts.push(format!("environment={env}"));
        }
        if let Some(name) = &self.job_name {
            parts.push(format!("job_name={name}"));
        }
        if let Some(ids) = &self.task_ids {
            let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
            parts.push(format!("task_ids=[{}]", ids.join(",")));
        }
        if let Some(statuses) = &self.statuses {
            parts.push(format!("statuses={statuses:?}"));
        }
        if let Some(shards) = &self.shard_ids {
            parts.push(format!("shard_ids={shards:?}"));
        }
        if let Some(host) = &self.slave_host {
            parts.push(format!("slave_host={host}"));
        }

        if parts.is_empty() {
            f.write_str("<all tasks>")
        } else {
            f.write_str(&parts.join(" "))
        }
    }
}
