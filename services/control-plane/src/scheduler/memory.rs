//! Store-backed scheduling core.
//!
//! Transitions are applied directly in the store: there is no executor, so
//! killed tasks land in KILLED and restarts spawn the replacement at once.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use corral_id::JobKey;
use tracing::info;

use super::{LaunchError, ScheduleError, SchedulerCore, CRON_MANAGER_ID};
use crate::configuration::ParsedConfiguration;
use crate::model::{CronCollisionPolicy, ScheduleStatus, ScheduledTask, TaskQuery};
use crate::store::{MutableStoreProvider, Storage, StorageExt};

pub struct MemSchedulerCore {
    storage: Arc<dyn Storage>,
}

impl MemSchedulerCore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

fn pending_tasks(parsed: &ParsedConfiguration) -> Vec<ScheduledTask> {
    parsed
        .task_configs()
        .iter()
        .map(|shard| ScheduledTask::pending(shard.shard_id, shard.task.clone(), None))
        .collect()
}

fn kill_matching(
    store: &mut dyn MutableStoreProvider,
    query: &TaskQuery,
    message: &str,
) -> Vec<ScheduledTask> {
    store.mutate_tasks(&query.clone().active(), &mut |task| {
        task.transition(ScheduleStatus::Killing, Some(message.to_string()));
        task.transition(ScheduleStatus::Killed, Some(message.to_string()));
    })
}

#[async_trait]
impl SchedulerCore for MemSchedulerCore {
    async fn create_job(&self, parsed: ParsedConfiguration) -> Result<(), ScheduleError> {
        self.storage.write_with(|store| {
            let key = parsed.key();
            let running = store.fetch_tasks(&TaskQuery::job_scoped(key).active());
            if !running.is_empty() || store.fetch_job(CRON_MANAGER_ID, key).is_some() {
                return Err(ScheduleError::new(format!("Job already exists: {key}")));
            }

            if parsed.job().is_cron() {
                store.save_accepted_job(CRON_MANAGER_ID, parsed.job().clone());
                info!(job = %key, "Accepted cron job");
            } else {
                store.save_tasks(pending_tasks(&parsed));
                info!(job = %key, shards = parsed.task_configs().len(), "Accepted job");
            }
            Ok(())
        })
    }

    async fn start_cron_job(&self, key: &JobKey) -> Result<(), LaunchError> {
        self.storage.write_with(|store| {
            let template = store
                .fetch_job(CRON_MANAGER_ID, key)
                .ok_or_else(|| ScheduleError::new(format!("No cron job found for {key}")))?;
            let policy = template.cron_collision_policy;
            let parsed = ParsedConfiguration::from_unparsed(template)?;

            let query = TaskQuery::job_scoped(key);
            let running = store.fetch_tasks(&query.clone().active());
            if !running.is_empty() {
                match policy {
                    CronCollisionPolicy::KillExisting => {
                        kill_matching(store, &query, "Killed for cron collision");
                    }
                    CronCollisionPolicy::CancelNew => {
                        return Err(ScheduleError::new(format!(
                            "Cron run of {key} cancelled: previous run still active"
                        ))
                        .into());
                    }
                    CronCollisionPolicy::RunOverlap => {}
                }
            }

            store.save_tasks(pending_tasks(&parsed));
            info!(job = %key, ?policy, "Started cron run");
            Ok(())
        })
    }

    async fn kill_tasks(&self, query: &TaskQuery, user: &str) -> Result<(), ScheduleError> {
        self.storage.write_with(|store| {
            let killed = kill_matching(store, query, &format!("Killed by {user}"));
            let cron_removed = query
                .job_key()
                .is_some_and(|key| store.remove_job(CRON_MANAGER_ID, &key));

            if killed.is_empty() && !cron_removed {
                return Err(ScheduleError::new(format!("No jobs to kill for {query}")));
            }
            info!(%query, killed = killed.len(), cron_removed, user, "Killed tasks");
            Ok(())
        })
    }

    async fn restart_shards(
        &self,
        key: &JobKey,
        shards: &BTreeSet<u32>,
        user: &str,
    ) -> Result<(), ScheduleError> {
        self.storage.write_with(|store| {
            let query = TaskQuery::shard_scoped(key, shards.iter().copied()).active();
            let active = store.fetch_tasks(&query);
            let found: BTreeSet<u32> = active.iter().map(ScheduledTask::instance_id).collect();
            let missing: Vec<u32> = shards.difference(&found).copied().collect();
            if !missing.is_empty() {
                return Err(ScheduleError::new(format!(
                    "Not all requested shards are active for {key}: missing {missing:?}"
                )));
            }

            let message = format!("Restarted by {user}");
            let restarted = store.mutate_tasks(&query, &mut |task| {
                task.transition(ScheduleStatus::Restarting, Some(message.clone()));
                task.transition(ScheduleStatus::Killed, Some(message.clone()));
            });
            let replacements = restarted
                .into_iter()
                .map(|old| {
                    ScheduledTask::pending(
                        old.instance_id(),
                        old.assigned_task.task.clone(),
                        Some(old.task_id()),
                    )
                })
                .collect();
            store.save_tasks(replacements);
            info!(job = %key, ?shards, user, "Restarted shards");
            Ok(())
        })
    }

    async fn set_task_status(
        &self,
        query: &TaskQuery,
        status: ScheduleStatus,
        message: Option<String>,
    ) -> Result<(), ScheduleError> {
        self.storage.write_with(|store| {
            let changed = store.mutate_tasks(query, &mut |task| {
                task.transition(status, message.clone());
            });
            info!(%query, ?status, changed = changed.len(), "Set task status");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::sample_job;
    use crate::store::{Consistency, MemStorage};

    fn core() -> (Arc<MemStorage>, MemSchedulerCore) {
        let storage = Arc::new(MemStorage::new());
        let core = MemSchedulerCore::new(storage.clone());
        (storage, core)
    }

    fn parsed(name: &str, shards: u32) -> ParsedConfiguration {
        ParsedConfiguration::from_unparsed(sample_job("www", "prod", name, shards)).unwrap()
    }

    fn active(storage: &MemStorage, key: &JobKey) -> Vec<ScheduledTask> {
        storage
            .fetch_tasks(Consistency::Strong, &TaskQuery::job_scoped(key).active())
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_job_schedules_every_shard() {
        let (storage, core) = core();
        let job = parsed("web", 3);
        let key = job.key().clone();
        core.create_job(job).await.unwrap();

        let mut shards: Vec<u32> = active(&storage, &key).iter().map(|t| t.instance_id()).collect();
        shards.sort_unstable();
        assert_eq!(shards, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_create_duplicate_job_fails() {
        let (_storage, core) = core();
        core.create_job(parsed("web", 1)).await.unwrap();
        let err = core.create_job(parsed("web", 1)).await.unwrap_err();
        assert!(err.to_string().starts_with("Job already exists"));
    }

    #[tokio::test]
    async fn test_cron_job_is_stored_not_run() {
        let (storage, core) = core();
        let mut job = sample_job("www", "prod", "nightly", 2);
        job.cron_schedule = Some("0 3 * * *".to_string());
        let key = job.key.clone();
        core.create_job(ParsedConfiguration::from_unparsed(job).unwrap())
            .await
            .unwrap();
        assert!(active(&storage, &key).is_empty());

        core.start_cron_job(&key).await.unwrap();
        assert_eq!(active(&storage, &key).len(), 2);
    }

    #[tokio::test]
    async fn test_cron_cancel_new_collision() {
        let (_storage, core) = core();
        let mut job = sample_job("www", "prod", "nightly", 1);
        job.cron_schedule = Some("0 3 * * *".to_string());
        job.cron_collision_policy = CronCollisionPolicy::CancelNew;
        let key = job.key.clone();
        core.create_job(ParsedConfiguration::from_unparsed(job).unwrap())
            .await
            .unwrap();

        core.start_cron_job(&key).await.unwrap();
        assert!(matches!(
            core.start_cron_job(&key).await,
            Err(LaunchError::Schedule(_))
        ));
    }

    #[tokio::test]
    async fn test_start_unknown_cron_job() {
        let (_storage, core) = core();
        let err = core
            .start_cron_job(&JobKey::new("www", "prod", "missing"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No cron job found for www/prod/missing");
    }

    #[tokio::test]
    async fn test_kill_tasks() {
        let (storage, core) = core();
        let job = parsed("web", 2);
        let key = job.key().clone();
        core.create_job(job).await.unwrap();

        core.kill_tasks(&TaskQuery::job_scoped(&key), "alice").await.unwrap();
        assert!(active(&storage, &key).is_empty());

        let err = core
            .kill_tasks(&TaskQuery::job_scoped(&key), "alice")
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("No jobs to kill"));
    }

    #[tokio::test]
    async fn test_restart_shards_links_ancestor() {
        let (storage, core) = core();
        let job = parsed("web", 2);
        let key = job.key().clone();
        core.create_job(job).await.unwrap();
        let before = storage
            .fetch_tasks(Consistency::Strong, &TaskQuery::shard_scoped(&key, [1]))
            .unwrap();

        core.restart_shards(&key, &BTreeSet::from([1]), "alice")
            .await
            .unwrap();

        let after = storage
            .fetch_tasks(Consistency::Strong, &TaskQuery::shard_scoped(&key, [1]).active())
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].ancestor_id, Some(before[0].task_id()));
    }

    #[tokio::test]
    async fn test_restart_inactive_shard_fails() {
        let (_storage, core) = core();
        let job = parsed("web", 1);
        let key = job.key().clone();
        core.create_job(job).await.unwrap();

        assert!(core
            .restart_shards(&key, &BTreeSet::from([0, 5]), "alice")
            .await
            .is_err());
    }
}
