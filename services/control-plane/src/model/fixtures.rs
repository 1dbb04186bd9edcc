//! Shared builders for unit tests.

use std::collections::BTreeSet;

use corral_id::JobKey;

use super::{CronCollisionPolicy, Identity, JobConfiguration, TaskConfig};

pub(crate) fn sample_task(role: &str, env: &str, name: &str) -> TaskConfig {
    TaskConfig {
        owner: Identity::new(role, "alice"),
        environment: env.to_string(),
        job_name: name.to_string(),
        num_cpus: 1.0,
        ram_mb: 128,
        disk_mb: 256,
        priority: 0,
        max_task_failures: Some(1),
        production: false,
        is_service: true,
        contact_email: None,
        constraints: Vec::new(),
        requested_ports: BTreeSet::new(),
        executor_config: None,
    }
}

pub(crate) fn sample_job(role: &str, env: &str, name: &str, shards: u32) -> JobConfiguration {
    JobConfiguration {
        key: JobKey::new(role, env, name),
        owner: Identity::new(role, "alice"),
        cron_schedule: None,
        cron_collision_policy: CronCollisionPolicy::default(),
        task_config: sample_task(role, env, name),
        shard_count: shards,
    }
}
