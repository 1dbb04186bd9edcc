//! Rolling update records.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use corral_id::{JobKey, UpdateToken};
use serde::{Deserialize, Serialize};

use super::{JobConfiguration, TaskConfig};

/// Phase of an in-flight rolling update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateState {
    /// Started, no shards touched yet.
    Active,
    RollingForward,
    RollingBack,
    /// Finished normally. Never stored.
    Finished,
    /// Terminated without a token. Never stored.
    Terminated,
}

/// Outcome reported by the client when finishing an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateResult {
    Success,
    Failed,
    Terminate,
}

/// The single in-flight update of a job. Absence means no update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub token: UpdateToken,
    pub job_key: JobKey,
    pub user: String,
    pub state: UpdateState,
    /// Per-shard configuration that was live when the update started.
    pub old_tasks: BTreeMap<u32, TaskConfig>,
    pub new_config: JobConfiguration,
    /// Per-shard target configuration.
    pub new_tasks: BTreeMap<u32, TaskConfig>,
    #[serde(default)]
    pub updated_shards: BTreeSet<u32>,
    #[serde(default)]
    pub rolled_back_shards: BTreeSet<u32>,
    pub started_at: DateTime<Utc>,
}

impl JobUpdate {
    /// Exclusive upper bound on shard ids this update may touch.
    pub fn shard_limit(&self) -> u32 {
        let bound = |tasks: &BTreeMap<u32, TaskConfig>| {
            tasks.keys().next_back().map_or(0, |last| last + 1)
        };
        bound(&self.old_tasks).max(bound(&self.new_tasks))
    }
}
