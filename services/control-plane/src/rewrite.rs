//! Compare-and-swap rewrites of stored job and task configurations.
//!
//! A batch runs inside one store transaction. Each command compares the
//! stored value against the caller's expected old value before replacing
//! it; mismatches are collected and reported, not fatal. A rewritten job
//! that fails validation aborts the whole batch.

use std::fmt;

use corral_id::TaskId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::configuration::{apply_defaults_if_unset, validate_and_populate, TaskDescriptionError};
use crate::error::{ControlError, ControlResult};
use crate::model::{JobConfiguration, ShardKey, TaskConfig, TaskQuery};
use crate::store::MutableStoreProvider;

/// One compare-and-swap replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RewriteCommand {
    JobRewrite {
        old_job: JobConfiguration,
        rewritten_job: JobConfiguration,
    },
    ShardRewrite {
        shard_key: ShardKey,
        old_task: TaskConfig,
        rewritten_task: TaskConfig,
    },
}

/// Why a single rewrite was not applied.
#[derive(Debug, Error)]
pub enum RewriteFailure {
    #[error("Disallowing rewrite attempting to change {0}.")]
    IdentityChange(&'static str),

    #[error("Job not found for key {0}")]
    JobNotFound(String),

    #[error("Multiple jobs found for key {0}")]
    AmbiguousJob(String),

    #[error("CAS compare failed for {0}")]
    CasConflict(String),

    #[error("Active task not found for {0}")]
    ShardNotFound(ShardKey),

    #[error("Multiple active tasks found for {0}")]
    AmbiguousShard(ShardKey),

    #[error("Did not change {0}")]
    Unchanged(TaskId),

    /// Aborts the batch.
    #[error(transparent)]
    Fatal(TaskDescriptionError),
}

/// Applies `commands` in order and returns the per-command failures.
///
/// Returns `Err` only for a fatal failure, in which case the caller must
/// discard the transaction.
pub fn apply_rewrites(
    store: &mut dyn MutableStoreProvider,
    commands: &[RewriteCommand],
) -> ControlResult<Vec<RewriteFailure>> {
    let mut failures = Vec::new();
    for command in commands {
        let outcome = match command {
            RewriteCommand::JobRewrite {
                old_job,
                rewritten_job,
            } => rewrite_job(store, old_job, rewritten_job),
            RewriteCommand::ShardRewrite {
                shard_key,
                old_task,
                rewritten_task,
            } => rewrite_shard(store, shard_key, old_task, rewritten_task),
        };

        match outcome {
            Ok(()) => {}
            Err(fatal @ RewriteFailure::Fatal(_)) => return Err(fatal.into()),
            Err(failure) => failures.push(failure),
        }
    }
    Ok(failures)
}

fn rewrite_job(
    store: &mut dyn MutableStoreProvider,
    old_job: &JobConfiguration,
    rewritten_job: &JobConfiguration,
) -> Result<(), RewriteFailure> {
    let rewritten = validate_and_populate(rewritten_job.clone()).map_err(RewriteFailure::Fatal)?;
    if let Some(field) = old_job.identity_mismatch(&rewritten) {
        return Err(RewriteFailure::IdentityChange(field));
    }

    let path = old_job.key.path();
    let mut matches = Vec::new();
    for manager_id in store.fetch_manager_ids() {
        if let Some(job) = store.fetch_job(&manager_id, &old_job.key) {
            matches.push((manager_id, job));
        }
    }

    match matches.as_slice() {
        [] => Err(RewriteFailure::JobNotFound(path)),
        [(manager_id, stored)] => {
            if stored != old_job {
                return Err(RewriteFailure::CasConflict(path));
            }
            let manager_id = manager_id.clone();
            store.save_accepted_job(&manager_id, rewritten);
            Ok(())
        }
        _ => Err(RewriteFailure::AmbiguousJob(path)),
    }
}

fn rewrite_shard(
    store: &mut dyn MutableStoreProvider,
    shard_key: &ShardKey,
    old_task: &TaskConfig,
    rewritten_task: &TaskConfig,
) -> Result<(), RewriteFailure> {
    let query = TaskQuery::shard_scoped(&shard_key.job_key, [shard_key.shard_id]).active();
    let task_id = match store.fetch_tasks(&query).as_slice() {
        [] => return Err(RewriteFailure::ShardNotFound(shard_key.clone())),
        [task] if task.assigned_task.task != *old_task => {
            return Err(RewriteFailure::CasConflict(shard_key.to_string()))
        }
        [task] => task.task_id(),
        _ => return Err(RewriteFailure::AmbiguousShard(shard_key.clone())),
    };

    let config = apply_defaults_if_unset(rewritten_task.clone());
    if store.unsafe_modify_in_place(&task_id, config) {
        Ok(())
    } else {
        Err(RewriteFailure::Unchanged(task_id))
    }
}

/// Joins failure messages for the batch response.
impl From<RewriteFailure> for ControlError {
    fn from(failure: RewriteFailure) -> Self {
        match failure {
            RewriteFailure::Fatal(err) => ControlError::FatalRewrite(err),
            RewriteFailure::JobNotFound(_) | RewriteFailure::ShardNotFound(_) => {
                ControlError::NotFound(failure.to_string())
            }
            RewriteFailure::IdentityChange(_)
            | RewriteFailure::AmbiguousJob(_)
            | RewriteFailure::CasConflict(_)
            | RewriteFailure::AmbiguousShard(_)
            | RewriteFailure::Unchanged(_) => ControlError::CasConflict(failure.to_string()),
        }
    }
}

/// Comma-separated messages of a batch of failures.
pub struct FailureSummary<'a, E>(pub &'a [E]);

impl<E: fmt::Display> fmt::Display for FailureSummary<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, failure) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::ParsedConfiguration;
    use crate::model::fixtures::sample_job;
    use crate::model::{ResponseCode, ScheduledTask};
    use crate::store::{StoreProvider, StoreState, CRON_MANAGER_ID};

    fn cron_job() -> JobConfiguration {
        let mut job = sample_job("www", "prod", "nightly", 1);
        job.cron_schedule = Some("0 3 * * *".to_string());
        ParsedConfiguration::from_unparsed(job).unwrap().into_job()
    }

    fn state_with_cron() -> (StoreState, JobConfiguration) {
        let mut state = StoreState::default();
        let job = cron_job();
        state.save_accepted_job(CRON_MANAGER_ID, job.clone());
        (state, job)
    }

    fn job_rewrite(old: &JobConfiguration, new: &JobConfiguration) -> RewriteCommand {
        RewriteCommand::JobRewrite {
            old_job: old.clone(),
            rewritten_job: new.clone(),
        }
    }

    #[test]
    fn test_job_rewrite_applies() {
        let (mut state, job) = state_with_cron();
        let mut bigger = job.clone();
        bigger.shard_count = 5;

        let failures = apply_rewrites(&mut state, &[job_rewrite(&job, &bigger)]).unwrap();
        assert!(failures.is_empty());
        assert_eq!(
            state.fetch_job(CRON_MANAGER_ID, &job.key).unwrap().shard_count,
            5
        );
    }

    #[test]
    fn test_job_rewrite_cas_conflict() {
        let (mut state, job) = state_with_cron();
        let mut stale = job.clone();
        stale.task_config.ram_mb = 1;
        let mut bigger = job.clone();
        bigger.shard_count = 5;

        let failures = apply_rewrites(&mut state, &[job_rewrite(&stale, &bigger)]).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].to_string(), "CAS compare failed for www/prod/nightly");
    }

    #[test]
    fn test_job_rewrite_rejects_owner_change() {
        let (mut state, job) = state_with_cron();
        let mut reowned = job.clone();
        reowned.owner.user = "mallory".to_string();
        reowned.task_config.owner.user = "mallory".to_string();

        let failures = apply_rewrites(&mut state, &[job_rewrite(&job, &reowned)]).unwrap();
        assert_eq!(
            failures[0].to_string(),
            "Disallowing rewrite attempting to change job owner."
        );
    }

    #[test]
    fn test_job_rewrite_not_found() {
        let mut state = StoreState::default();
        let job = cron_job();
        let failures = apply_rewrites(&mut state, &[job_rewrite(&job, &job)]).unwrap();
        assert!(matches!(failures[0], RewriteFailure::JobNotFound(_)));
    }

    #[test]
    fn test_invalid_rewrite_is_fatal() {
        let (mut state, job) = state_with_cron();
        let mut broken = job.clone();
        broken.shard_count = 0;

        let err = apply_rewrites(&mut state, &[job_rewrite(&job, &broken)]).unwrap_err();
        assert!(matches!(err, ControlError::FatalRewrite(_)));
    }

    #[test]
    fn test_shard_rewrite() {
        let mut state = StoreState::default();
        let job = cron_job();
        let task = ScheduledTask::pending(0, job.task_config.clone(), None);
        let shard_key = task.shard_key();
        state.save_tasks(vec![task]);

        let mut rewritten = job.task_config.clone();
        rewritten.num_cpus = 2.0;
        let command = RewriteCommand::ShardRewrite {
            shard_key: shard_key.clone(),
            old_task: job.task_config.clone(),
            rewritten_task: rewritten.clone(),
        };

        assert!(apply_rewrites(&mut state, &[command.clone()]).unwrap().is_empty());
        let failures = apply_rewrites(&mut state, &[command]).unwrap();
        assert_eq!(failures[0].to_string(), "CAS compare failed for www/prod/nightly/0");

        let unchanged = RewriteCommand::ShardRewrite {
            shard_key,
            old_task: rewritten.clone(),
            rewritten_task: rewritten,
        };
        let failures = apply_rewrites(&mut state, &[unchanged]).unwrap();
        assert!(matches!(failures[0], RewriteFailure::Unchanged(_)));
    }

    #[test]
    fn test_ambiguous_job_is_reported() {
        let (mut state, job) = state_with_cron();
        state.save_accepted_job("ADHOC", job.clone());
        let mut bigger = job.clone();
        bigger.shard_count = 5;

        let failures = apply_rewrites(&mut state, &[job_rewrite(&job, &bigger)]).unwrap();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], RewriteFailure::AmbiguousJob(_)));
        assert_eq!(
            failures[0].to_string(),
            "Multiple jobs found for key www/prod/nightly"
        );
        assert_eq!(state.fetch_job(CRON_MANAGER_ID, &job.key), Some(job.clone()));
        assert_eq!(state.fetch_job("ADHOC", &job.key), Some(job));
    }

    #[test]
    fn test_ambiguous_shard_is_reported() {
        let mut state = StoreState::default();
        let job = cron_job();
        let first = ScheduledTask::pending(0, job.task_config.clone(), None);
        let second = ScheduledTask::pending(0, job.task_config.clone(), None);
        let shard_key = first.shard_key();
        state.save_tasks(vec![first, second]);

        let mut rewritten = job.task_config.clone();
        rewritten.num_cpus = 3.0;
        let command = RewriteCommand::ShardRewrite {
            shard_key: shard_key.clone(),
            old_task: job.task_config.clone(),
            rewritten_task: rewritten,
        };

        let failures = apply_rewrites(&mut state, &[command]).unwrap();
        assert!(matches!(&failures[0], RewriteFailure::AmbiguousShard(key) if *key == shard_key));
        assert!(state
            .fetch_tasks(&TaskQuery::job_scoped(&job.key))
            .iter()
            .all(|task| task.assigned_task.task == job.task_config));
    }

    #[test]
    fn test_failures_map_to_warning_classes() {
        let missing = ControlError::from(RewriteFailure::JobNotFound("a/b/c".to_string()));
        assert!(matches!(missing, ControlError::NotFound(_)));
        assert_eq!(missing.code(), ResponseCode::Warning);
        assert_eq!(missing.to_string(), "Job not found for key a/b/c");

        let stale = ControlError::from(RewriteFailure::CasConflict("d/e/f".to_string()));
        assert!(matches!(stale, ControlError::CasConflict(_)));
        assert_eq!(stale.code(), ResponseCode::Warning);
    }

    #[test]
    fn test_summary_joins_messages() {
        let failures = vec![
            RewriteFailure::JobNotFound("a/b/c".to_string()),
            RewriteFailure::CasConflict("d/e/f".to_string()),
        ];
        assert_eq!(
            FailureSummary(&failures).to_string(),
            "Job not found for key a/b/c, CAS compare failed for d/e/f"
        );
    }

    #[test]
    fn test_command_json_shape() {
        let json = serde_json::to_value(job_rewrite(&cron_job(), &cron_job())).unwrap();
        assert_eq!(json["type"], "job_rewrite");
        assert!(json.get("old_job").is_some());
    }
}
