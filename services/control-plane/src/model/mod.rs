//! Wire and storage model shared by every control-plane operation.

mod admin;
#[cfg(test)]
pub(crate) mod fixtures;
mod job;
mod query;
mod response;
mod task;
mod update;

pub use admin::{MaintenanceMode, Quota};
pub use job::{
    Constraint, CronCollisionPolicy, ExecutorConfig, Identity, JobConfiguration, ShardKey,
    ShardTaskConfig, TaskConfig, TaskConstraint,
};
pub use query::TaskQuery;
pub use response::{Response, ResponseCode};
pub use task::{AssignedTask, ScheduleStatus, ScheduledTask, TaskEvent, SCHEDULER_NAME};
pub use update::{JobUpdate, UpdateResult, UpdateState};
