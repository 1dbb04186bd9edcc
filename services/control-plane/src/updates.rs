//! Rolling update state machine.
//!
//! `initiate` diffs the live shards against the new configuration and, when
//! anything differs, records a [`JobUpdate`] guarded by a fresh token. The
//! client then drives shards forward (`update_shards`) or back
//! (`rollback_shards`) in batches and finally calls `finish`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use corral_id::{JobKey, UpdateToken};
use corral_reconcile::SpecHash;
use tracing::info;

use crate::configuration::ParsedConfiguration;
use crate::model::{
    JobUpdate, ScheduleStatus, ScheduledTask, TaskConfig, TaskQuery, UpdateResult, UpdateState,
};
use crate::scheduler::{ScheduleError, CRON_MANAGER_ID};
use crate::store::{MutableStoreProvider, Storage, StorageExt, StoreResult};

const UPDATE_KILL_MESSAGE: &str = "Killed for job update";
const ROLLBACK_KILL_MESSAGE: &str = "Killed for job rollback";

/// Shards that differ between two per-shard configurations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardDiff {
    pub changed: BTreeSet<u32>,
    pub added: BTreeSet<u32>,
    pub removed: BTreeSet<u32>,
}

impl ShardDiff {
    pub fn compute(
        current: &BTreeMap<u32, TaskConfig>,
        desired: &BTreeMap<u32, TaskConfig>,
    ) -> Result<Self, ScheduleError> {
        let hash = |config: &TaskConfig| {
            SpecHash::of(config)
                .map_err(|err| ScheduleError::new(format!("failed to hash task config: {err}")))
        };

        let mut diff = Self::default();
        for (shard, config) in desired {
            match current.get(shard) {
                Some(live) if hash(live)? == hash(config)? => {}
                Some(_) => {
                    diff.changed.insert(*shard);
                }
                None => {
                    diff.added.insert(*shard);
                }
            }
        }
        diff.removed = current
            .keys()
            .filter(|shard| !desired.contains_key(shard))
            .copied()
            .collect();
        Ok(diff)
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }
}

/// Drives rolling updates through the store.
#[derive(Clone)]
pub struct UpdateCoordinator {
    storage: Arc<dyn Storage>,
}

impl UpdateCoordinator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Starts an update to `parsed`.
    ///
    /// Returns `None` when no rollout is needed: either the live shards
    /// already match, or the job only exists as a cron template, which is
    /// replaced in place.
    pub fn initiate(
        &self,
        parsed: &ParsedConfiguration,
        user: &str,
    ) -> Result<Option<UpdateToken>, ScheduleError> {
        self.storage.write_with(|store| {
            let key = parsed.key();
            if store.fetch_update(key).is_some() {
                return Err(ScheduleError::new(format!(
                    "An update is already in progress for {key}"
                )));
            }

            let current = live_shards(&store.fetch_tasks(&TaskQuery::job_scoped(key).active()));
            let has_template = store.fetch_job(CRON_MANAGER_ID, key).is_some();
            if current.is_empty() && !has_template {
                return Err(ScheduleError::new(format!(
                    "No active tasks or cron template found for {key}"
                )));
            }

            let desired: BTreeMap<u32, TaskConfig> = parsed
                .task_configs()
                .iter()
                .map(|shard| (shard.shard_id, shard.task.clone()))
                .collect();

            if current.is_empty() {
                store.save_accepted_job(CRON_MANAGER_ID, parsed.job().clone());
                info!(job = %key, user, "Replaced cron template");
                return Ok(None);
            }

            let diff = ShardDiff::compute(&current, &desired)?;
            if diff.is_empty() {
                if has_template {
                    store.save_accepted_job(CRON_MANAGER_ID, parsed.job().clone());
                }
                info!(job = %key, user, "Update requires no rollout");
                return Ok(None);
            }

            let token = UpdateToken::new();
            store.save_update(JobUpdate {
                token,
                job_key: key.clone(),
                user: user.to_string(),
                state: UpdateState::Active,
                old_tasks: current,
                new_config: parsed.job().clone(),
                new_tasks: desired,
                updated_shards: BTreeSet::new(),
                rolled_back_shards: BTreeSet::new(),
                started_at: Utc::now(),
            });
            info!(
                job = %key,
                user,
                changed = diff.changed.len(),
                added = diff.added.len(),
                removed = diff.removed.len(),
                "Started rolling update"
            );
            Ok(Some(token))
        })
    }

    /// Moves `shards` to the new configuration. Returns the shards that were touched.
    pub fn update_shards(
        &self,
        key: &JobKey,
        shards: &BTreeSet<u32>,
        token: &UpdateToken,
        user: &str,
    ) -> Result<BTreeSet<u32>, ScheduleError> {
        self.storage.write_with(|store| {
            let mut update = active_update(store, key, token)?;
            check_shards(&update, shards)?;

            let affected = converge_shards(store, key, shards, &update.new_tasks, UPDATE_KILL_MESSAGE);
            update.state = UpdateState::RollingForward;
            update.updated_shards.extend(affected.iter().copied());
            store.save_update(update);
            info!(job = %key, user, ?affected, "Updated shards");
            Ok(affected)
        })
    }

    /// Moves `shards` back to the configuration they had when the update started.
    pub fn rollback_shards(
        &self,
        key: &JobKey,
        shards: &BTreeSet<u32>,
        token: &UpdateToken,
        user: &str,
    ) -> Result<BTreeSet<u32>, ScheduleError> {
        self.storage.write_with(|store| {
            let mut update = active_update(store, key, token)?;
            check_shards(&update, shards)?;

            let affected =
                converge_shards(store, key, shards, &update.old_tasks, ROLLBACK_KILL_MESSAGE);
            update.state = UpdateState::RollingBack;
            update.rolled_back_shards.extend(affected.iter().copied());
            store.save_update(update);
            info!(job = %key, user, ?affected, "Rolled back shards");
            Ok(affected)
        })
    }

    /// Ends the update. `Terminate` needs no token; other results must
    /// present the update's token.
    pub fn finish(
        &self,
        key: &JobKey,
        token: Option<&UpdateToken>,
        result: UpdateResult,
        user: &str,
    ) -> Result<UpdateState, ScheduleError> {
        self.storage.write_with(|store| {
            let update = store
                .fetch_update(key)
                .ok_or_else(|| no_update(key))?;
            match (result, token) {
                (UpdateResult::Terminate, _) => {}
                (_, Some(token)) if *token == update.token => {}
                _ => return Err(invalid_token(key)),
            }

            if result == UpdateResult::Success && store.fetch_job(CRON_MANAGER_ID, key).is_some() {
                store.save_accepted_job(CRON_MANAGER_ID, update.new_config.clone());
            }
            store.remove_update(key);

            let state = if result == UpdateResult::Terminate {
                UpdateState::Terminated
            } else {
                UpdateState::Finished
            };
            info!(job = %key, user, ?result, "Finished update");
            Ok(state)
        })
    }

    /// Every update in flight.
    pub fn active_updates(&self) -> StoreResult<Vec<JobUpdate>> {
        self.storage.read_with(crate::store::Consistency::Weak, |store| {
            store
                .fetch_updating_roles()
                .iter()
                .flat_map(|role| store.fetch_update_configs(role))
                .collect()
        })
    }
}

fn no_update(key: &JobKey) -> ScheduleError {
    ScheduleError::new(format!("No update in progress for {key}"))
}

fn invalid_token(key: &JobKey) -> ScheduleError {
    ScheduleError::new(format!("Invalid update token for {key}"))
}

fn active_update(
    store: &dyn MutableStoreProvider,
    key: &JobKey,
    token: &UpdateToken,
) -> Result<JobUpdate, ScheduleError> {
    let update = store.fetch_update(key).ok_or_else(|| no_update(key))?;
    if update.token != *token {
        return Err(invalid_token(key));
    }
    Ok(update)
}

fn check_shards(update: &JobUpdate, shards: &BTreeSet<u32>) -> Result<(), ScheduleError> {
    let limit = update.shard_limit();
    let invalid: Vec<u32> = shards.iter().filter(|s| **s >= limit).copied().collect();
    if shards.is_empty() || !invalid.is_empty() {
        return Err(ScheduleError::new(format!(
            "Invalid shards for {}: {invalid:?} (job has {limit} shards)",
            update.job_key
        )));
    }
    Ok(())
}

/// Live configuration per shard. When a shard has several active tasks the
/// newest one wins.
fn live_shards(tasks: &[ScheduledTask]) -> BTreeMap<u32, TaskConfig> {
    let mut sorted: Vec<&ScheduledTask> = tasks.iter().collect();
    sorted.sort_by_key(|task| task.task_id());
    sorted
        .into_iter()
        .map(|task| (task.instance_id(), task.assigned_task.task.clone()))
        .collect()
}

/// Brings each shard in `shards` to its `target` configuration, killing
/// shards absent from `target`.
fn converge_shards(
    store: &mut dyn MutableStoreProvider,
    key: &JobKey,
    shards: &BTreeSet<u32>,
    target: &BTreeMap<u32, TaskConfig>,
    kill_message: &str,
) -> BTreeSet<u32> {
    let mut affected = BTreeSet::new();
    for &shard in shards {
        let live = store.fetch_tasks(&TaskQuery::shard_scoped(key, [shard]).active());
        let desired = target.get(&shard);

        if let (Some(config), [task]) = (desired, live.as_slice()) {
            if task.assigned_task.task == *config {
                continue;
            }
        }
        if live.is_empty() && desired.is_none() {
            continue;
        }

        let ids = live.iter().map(ScheduledTask::task_id);
        let ancestor = live.iter().map(ScheduledTask::task_id).max();
        store.mutate_tasks(&TaskQuery::by_ids(ids), &mut |task| {
            task.transition(ScheduleStatus::Killing, Some(kill_message.to_string()));
            task.transition(ScheduleStatus::Killed, Some(kill_message.to_string()));
        });
        if let Some(config) = desired {
            store.save_tasks(vec![ScheduledTask::pending(shard, config.clone(), ancestor)]);
        }
        affected.insert(shard);
    }
    affected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::sample_job;
    use crate::model::JobConfiguration;
    use crate::scheduler::{MemSchedulerCore, SchedulerCore};
    use crate::store::{Consistency, MemStorage};

    struct Harness {
        storage: Arc<MemStorage>,
        coordinator: UpdateCoordinator,
    }

    async fn harness(job: JobConfiguration) -> Harness {
        let storage = Arc::new(MemStorage::new());
        let core = MemSchedulerCore::new(storage.clone());
        core.create_job(ParsedConfiguration::from_unparsed(job).unwrap())
            .await
            .unwrap();
        Harness {
            coordinator: UpdateCoordinator::new(storage.clone()),
            storage,
        }
    }

    impl Harness {
        fn live(&self, key: &JobKey) -> BTreeMap<u32, TaskConfig> {
            let tasks = self
                .storage
                .fetch_tasks(Consistency::Strong, &TaskQuery::job_scoped(key).active())
                .unwrap();
            live_shards(&tasks)
        }
    }

    fn resized(mut job: JobConfiguration, shards: u32, ram_mb: u64) -> ParsedConfiguration {
        job.shard_count = shards;
        job.task_config.ram_mb = ram_mb;
        ParsedConfiguration::from_unparsed(job).unwrap()
    }

    #[test]
    fn test_shard_diff() {
        let job = ParsedConfiguration::from_unparsed(sample_job("www", "prod", "web", 2)).unwrap();
        let current: BTreeMap<u32, TaskConfig> = job
            .task_configs()
            .iter()
            .map(|s| (s.shard_id, s.task.clone()))
            .collect();

        assert!(ShardDiff::compute(&current, &current).unwrap().is_empty());

        let mut desired = current.clone();
        desired.get_mut(&0).unwrap().ram_mb = 1024;
        desired.remove(&1);
        desired.insert(2, current[&1].clone());
        let diff = ShardDiff::compute(&current, &desired).unwrap();
        assert_eq!(diff.changed, BTreeSet::from([0]));
        assert_eq!(diff.added, BTreeSet::from([2]));
        assert_eq!(diff.removed, BTreeSet::from([1]));
    }

    #[tokio::test]
    async fn test_identical_config_needs_no_token() {
        let job = sample_job("www", "prod", "web", 2);
        let h = harness(job.clone()).await;
        let parsed = ParsedConfiguration::from_unparsed(job).unwrap();
        assert_eq!(h.coordinator.initiate(&parsed, "alice").unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_job_cannot_update() {
        let h = harness(sample_job("www", "prod", "web", 1)).await;
        let other = ParsedConfiguration::from_unparsed(sample_job("www", "prod", "api", 1)).unwrap();
        assert!(h.coordinator.initiate(&other, "alice").is_err());
    }

    #[tokio::test]
    async fn test_full_rollout_and_finish() {
        let job = sample_job("www", "prod", "web", 2);
        let key = job.key.clone();
        let h = harness(job.clone()).await;

        let parsed = resized(job, 3, 512);
        let token = h.coordinator.initiate(&parsed, "alice").unwrap().unwrap();
        assert!(h.coordinator.initiate(&parsed, "alice").is_err());

        let affected = h
            .coordinator
            .update_shards(&key, &BTreeSet::from([0, 1, 2]), &token, "alice")
            .unwrap();
        assert_eq!(affected, BTreeSet::from([0, 1, 2]));
        let live = h.live(&key);
        assert_eq!(live.len(), 3);
        assert!(live.values().all(|config| config.ram_mb == 512));

        let state = h
            .coordinator
            .finish(&key, Some(&token), UpdateResult::Success, "alice")
            .unwrap();
        assert_eq!(state, UpdateState::Finished);
        assert!(h.coordinator.active_updates().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shrink_kills_extra_shards() {
        let job = sample_job("www", "prod", "web", 3);
        let key = job.key.clone();
        let h = harness(job.clone()).await;

        let token = h
            .coordinator
            .initiate(&resized(job, 1, 128), "alice")
            .unwrap()
            .unwrap();
        let affected = h
            .coordinator
            .update_shards(&key, &BTreeSet::from([0, 1, 2]), &token, "alice")
            .unwrap();
        assert_eq!(affected, BTreeSet::from([1, 2]));
        assert_eq!(h.live(&key).keys().copied().collect::<Vec<_>>(), vec![0]);
    }

    #[tokio::test]
    async fn test_rollback_restores_old_config() {
        let job = sample_job("www", "prod", "web", 2);
        let key = job.key.clone();
        let h = harness(job.clone()).await;

        let token = h
            .coordinator
            .initiate(&resized(job, 2, 2048), "alice")
            .unwrap()
            .unwrap();
        h.coordinator
            .update_shards(&key, &BTreeSet::from([0]), &token, "alice")
            .unwrap();
        assert_eq!(h.live(&key)[&0].ram_mb, 2048);

        let rolled = h
            .coordinator
            .rollback_shards(&key, &BTreeSet::from([0, 1]), &token, "alice")
            .unwrap();
        assert_eq!(rolled, BTreeSet::from([0]));
        assert_eq!(h.live(&key)[&0].ram_mb, 128);
    }

    #[tokio::test]
    async fn test_wrong_token_and_out_of_range_shards() {
        let job = sample_job("www", "prod", "web", 2);
        let key = job.key.clone();
        let h = harness(job.clone()).await;
        let token = h
            .coordinator
            .initiate(&resized(job, 2, 4096), "alice")
            .unwrap()
            .unwrap();

        let wrong = UpdateToken::new();
        let err = h
            .coordinator
            .update_shards(&key, &BTreeSet::from([0]), &wrong, "alice")
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid update token for www/prod/web");

        assert!(h
            .coordinator
            .update_shards(&key, &BTreeSet::from([7]), &token, "alice")
            .is_err());
        assert!(h
            .coordinator
            .finish(&key, Some(&wrong), UpdateResult::Failed, "alice")
            .is_err());
        assert_eq!(
            h.coordinator
                .finish(&key, None, UpdateResult::Terminate, "alice")
                .unwrap(),
            UpdateState::Terminated
        );
    }

    #[tokio::test]
    async fn test_cron_template_replaced_without_token() {
        let mut job = sample_job("www", "prod", "nightly", 1);
        job.cron_schedule = Some("0 3 * * *".to_string());
        let key = job.key.clone();
        let h = harness(job.clone()).await;

        let parsed = resized(job, 4, 64);
        assert_eq!(h.coordinator.initiate(&parsed, "alice").unwrap(), None);

        let stored = h
            .storage
            .read_with(Consistency::Strong, |store| store.fetch_job(CRON_MANAGER_ID, &key))
            .unwrap()
            .unwrap();
        assert_eq!(stored.shard_count, 4);
    }
}
