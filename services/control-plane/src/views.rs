//! Job listing view.
//!
//! Immediate jobs have no stored template, so their configuration is
//! recovered from the live tasks. Cron templates are authoritative and
//! replace any synthesized entry for the same key.

use std::collections::BTreeMap;

use corral_id::JobKey;

use crate::model::{CronCollisionPolicy, JobConfiguration, ScheduledTask};

/// Merges active tasks and cron templates into one entry per job.
///
/// When `role` is set, only jobs owned by it are returned. Tasks are
/// expected to be filtered by the caller already.
pub fn merge_job_views(
    active_tasks: &[ScheduledTask],
    cron_jobs: Vec<JobConfiguration>,
    role: Option<&str>,
) -> Vec<JobConfiguration> {
    let mut shards_by_job: BTreeMap<JobKey, Vec<&ScheduledTask>> = BTreeMap::new();
    for task in active_tasks {
        shards_by_job.entry(task.job_key()).or_default().push(task);
    }

    let mut jobs: BTreeMap<JobKey, JobConfiguration> = shards_by_job
        .into_iter()
        .filter_map(|(key, tasks)| synthesize(key, &tasks))
        .map(|job| (job.key.clone(), job))
        .collect();

    for job in cron_jobs {
        if role.is_none_or(|role| job.key.role == role) {
            jobs.insert(job.key.clone(), job);
        }
    }

    jobs.into_values().collect()
}

/// Builds a job entry from its live tasks. The lowest shard supplies the
/// template, so the result does not depend on store iteration order.
fn synthesize(key: JobKey, tasks: &[&ScheduledTask]) -> Option<JobConfiguration> {
    let template = tasks
        .iter()
        .min_by_key(|task| (task.instance_id(), task.task_id()))?;
    let config = template.assigned_task.task.clone();

    Some(JobConfiguration {
        key,
        owner: config.owner.clone(),
        cron_schedule: None,
        cron_collision_policy: CronCollisionPolicy::default(),
        task_config: config,
        shard_count: u32::try_from(tasks.len()).unwrap_or(u32::MAX),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{sample_job, sample_task};

    fn tasks(name: &str, shards: u32) -> Vec<ScheduledTask> {
        (0..shards)
            .map(|shard| ScheduledTask::pending(shard, sample_task("www", "prod", name), None))
            .collect()
    }

    #[test]
    fn test_synthesizes_immediate_jobs() {
        let live = tasks("web", 3);
        let jobs = merge_job_views(&live, Vec::new(), None);

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].key, JobKey::new("www", "prod", "web"));
        assert_eq!(jobs[0].shard_count, 3);
        assert!(!jobs[0].is_cron());
    }

    #[test]
    fn test_lowest_shard_is_template() {
        let mut live = tasks("web", 2);
        live[1].assigned_task.task.ram_mb = 9999;
        live.reverse();

        let jobs = merge_job_views(&live, Vec::new(), None);
        assert_eq!(jobs[0].task_config.ram_mb, 128);
    }

    #[test]
    fn test_cron_entry_wins() {
        let live = tasks("nightly", 2);
        let mut cron = sample_job("www", "prod", "nightly", 7);
        cron.cron_schedule = Some("0 3 * * *".to_string());

        let jobs = merge_job_views(&live, vec![cron.clone()], None);
        assert_eq!(jobs, vec![cron]);
    }

    #[test]
    fn test_cron_jobs_filtered_by_role() {
        let mut cron = sample_job("db", "prod", "backup", 1);
        cron.cron_schedule = Some("@daily".to_string());

        assert!(merge_job_views(&[], vec![cron.clone()], Some("www")).is_empty());
        assert_eq!(merge_job_views(&[], vec![cron], Some("db")).len(), 1);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut live = tasks("web", 2);
        live.extend(tasks("api", 1));
        let first = merge_job_views(&live, Vec::new(), None);
        let second = merge_job_views(&live, Vec::new(), None);
        assert_eq!(first, second);
    }
}
