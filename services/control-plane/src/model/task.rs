//! Scheduled tasks and their lifecycle.

use chrono::{DateTime, Utc};
use corral_id::{JobKey, TaskId};
use serde::{Deserialize, Serialize};

use super::{ShardKey, TaskConfig};

/// Name recorded on task events written by this service.
pub const SCHEDULER_NAME: &str = "corral";

/// Lifecycle status of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    Init,
    Pending,
    Assigned,
    Starting,
    Running,
    Finished,
    Preempting,
    Restarting,
    Failed,
    Killed,
    Killing,
    Lost,
}

impl ScheduleStatus {
    /// States in which a task still occupies (or is about to occupy) its slot.
    pub const ACTIVE: [ScheduleStatus; 7] = [
        ScheduleStatus::Pending,
        ScheduleStatus::Assigned,
        ScheduleStatus::Starting,
        ScheduleStatus::Running,
        ScheduleStatus::Killing,
        ScheduleStatus::Restarting,
        ScheduleStatus::Preempting,
    ];

    pub const TERMINAL: [ScheduleStatus; 4] = [
        ScheduleStatus::Finished,
        ScheduleStatus::Failed,
        ScheduleStatus::Killed,
        ScheduleStatus::Lost,
    ];

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }
}

/// One recorded status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub timestamp: DateTime<Utc>,
    pub status: ScheduleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<String>,
}

/// A task configuration bound to a shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedTask {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slave_host: Option<String>,
    pub instance_id: u32,
    pub task: TaskConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub assigned_task: AssignedTask,
    pub status: ScheduleStatus,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub task_events: Vec<TaskEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ancestor_id: Option<TaskId>,
}

impl ScheduledTask {
    /// A fresh PENDING task for `instance_id`.
    pub fn pending(instance_id: u32, task: TaskConfig, ancestor_id: Option<TaskId>) -> Self {
        let mut scheduled = Self {
            assigned_task: AssignedTask {
                task_id: TaskId::new(),
                slave_host: None,
                instance_id,
                task,
            },
            status: ScheduleStatus::Init,
            failure_count: 0,
            task_events: Vec::new(),
            ancestor_id,
        };
        scheduled.transition(ScheduleStatus::Pending, None);
        scheduled
    }

    pub fn task_id(&self) -> TaskId {
        self.assigned_task.task_id
    }

    pub fn instance_id(&self) -> u32 {
        self.assigned_task.instance_id
    }

    pub fn role(&self) -> &str {
        &self.assigned_task.task.owner.role
    }

    pub fn job_key(&self) -> JobKey {
        self.assigned_task.task.job_key()
    }

    pub fn shard_key(&self) -> ShardKey {
        ShardKey::new(self.job_key(), self.instance_id())
    }

    /// Moves the task to `status` and records the event.
    pub fn transition(&mut self, status: ScheduleStatus, message: Option<String>) {
        self.status = status;
        self.task_events.push(TaskEvent {
            timestamp: Utc::now(),
            status,
            message,
            scheduler: Some(SCHEDULER_NAME.to_string()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::sample_task;

    #[test]
    fn test_active_and_terminal_are_disjoint() {
        for status in ScheduleStatus::ACTIVE {
            assert!(!status.is_terminal(), "{status:?}");
        }
        assert!(!ScheduleStatus::Init.is_active());
        assert!(ScheduleStatus::Killed.is_terminal());
    }

    #[test]
    fn test_pending_records_event() {
        let task = ScheduledTask::pending(2, sample_task("www", "prod", "web"), None);
        assert_eq!(task.status, ScheduleStatus::Pending);
        assert_eq!(task.task_events.len(), 1);
        assert_eq!(task.shard_key().to_string(), "www/prod/web/2");
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&ScheduleStatus::Restarting).unwrap();
        assert_eq!(json, "\"RESTARTING\"");
    }
}
