//! Shared fixtures for control-plane integration tests.
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corral_control_plane::{
    auth::{Capability, CapabilityPolicy, CredentialTable, CredentialValidator, SessionKey},
    configuration::ParsedConfiguration,
    model::{
        CronCollisionPolicy, Identity, JobConfiguration, ScheduleStatus, TaskConfig, TaskQuery,
    },
    scheduler::{LaunchError, MemSchedulerCore, ScheduleError, SchedulerCore},
    service::{Collaborators, KillSettings, SchedulerService},
    store::{Consistency, MemStorage, Storage, StorageExt},
};
use corral_id::JobKey;
use tokio_util::sync::CancellationToken;

pub const ALICE_TOKEN: &str = "alice-secret";
pub const BOB_TOKEN: &str = "bob-secret";
pub const ROOT_TOKEN: &str = "root-secret";

/// `alice` owns role `www`, `bob` owns role `db`, `root` holds every capability.
pub fn credentials() -> CredentialTable {
    CredentialTable::default()
        .with_user("alice", ALICE_TOKEN, &["www"], &[])
        .with_user("bob", BOB_TOKEN, &["db"], &[])
        .with_user(
            "root",
            ROOT_TOKEN,
            &[],
            &[Capability::Root, Capability::Provisioner],
        )
}

pub fn alice() -> SessionKey {
    SessionKey::new("alice", ALICE_TOKEN)
}

pub fn bob() -> SessionKey {
    SessionKey::new("bob", BOB_TOKEN)
}

pub fn root() -> SessionKey {
    SessionKey::new("root", ROOT_TOKEN)
}

/// Kill waits that give up within a few hundred milliseconds.
pub fn fast_kill() -> KillSettings {
    KillSettings {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
        max_attempts: 5,
    }
}

pub fn task(role: &str, env: &str, name: &str) -> TaskConfig {
    TaskConfig {
        owner: Identity::new(role, "alice"),
        environment: env.to_string(),
        job_name: name.to_string(),
        num_cpus: 1.0,
        ram_mb: 256,
        disk_mb: 512,
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

pub fn job(role: &str, env: &str, name: &str, shards: u32) -> JobConfiguration {
    JobConfiguration {
        key: JobKey::new(role, env, name),
        owner: Identity::new(role, "alice"),
        cron_schedule: None,
        cron_collision_policy: CronCollisionPolicy::default(),
        task_config: task(role, env, name),
        shard_count: shards,
    }
}

pub fn cron_job(role: &str, env: &str, name: &str, shards: u32) -> JobConfiguration {
    JobConfiguration {
        cron_schedule: Some("*/5 * * * *".to_string()),
        ..job(role, env, name, shards)
    }
}

pub struct Harness {
    pub storage: Arc<MemStorage>,
    pub service: SchedulerService,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(fast_kill())
    }

    pub fn with_settings(kill: KillSettings) -> Self {
        let storage = Arc::new(MemStorage::new());
        let collaborators = Collaborators::in_memory(
            storage.clone(),
            Arc::new(CredentialValidator::new(credentials())),
        );
        Self::build(storage, collaborators, kill)
    }

    /// A harness whose scheduler accepts kills but never stops anything.
    pub fn with_stuck_kills() -> Self {
        let storage = Arc::new(MemStorage::new());
        let mut collaborators = Collaborators::in_memory(
            storage.clone(),
            Arc::new(CredentialValidator::new(credentials())),
        );
        collaborators.scheduler = Arc::new(StuckKills {
            inner: MemSchedulerCore::new(storage.clone()),
        });
        Self::build(storage, collaborators, fast_kill())
    }

    fn build(storage: Arc<MemStorage>, collaborators: Collaborators, kill: KillSettings) -> Self {
        let shutdown = CancellationToken::new();
        let service = SchedulerService::new(
            collaborators,
            CapabilityPolicy::default(),
            kill,
            shutdown.clone(),
        );
        Self {
            storage,
            service,
            shutdown,
        }
    }

    pub fn task_count(&self) -> usize {
        self.storage.export_state().unwrap().task_count()
    }

    pub fn active_tasks(&self, query: TaskQuery) -> usize {
        let storage: &dyn Storage = self.storage.as_ref();
        storage
            .fetch_tasks(Consistency::Strong, &query.active())
            .unwrap()
            .len()
    }
}

/// Delegates to the in-memory scheduler except that kills are dropped.
pub struct StuckKills {
    inner: MemSchedulerCore,
}

#[async_trait]
impl SchedulerCore for StuckKills {
    async fn create_job(&self, parsed: ParsedConfiguration) -> Result<(), ScheduleError> {
        self.inner.create_job(parsed).await
    }

    async fn start_cron_job(&self, key: &JobKey) -> Result<(), LaunchError> {
        self.inner.start_cron_job(key).await
    }

    async fn kill_tasks(&self, _query: &TaskQuery, _user: &str) -> Result<(), ScheduleError> {
        Ok(())
    }

    async fn restart_shards(
        &self,
        key: &JobKey,
        shards: &BTreeSet<u32>,
        user: &str,
    ) -> Result<(), ScheduleError> {
        self.inner.restart_shards(key, shards, user).await
    }

    async fn set_task_status(
        &self,
        query: &TaskQuery,
        status: ScheduleStatus,
        message: Option<String>,
    ) -> Result<(), ScheduleError> {
        self.inner.set_task_status(query, status, message).await
    }
}
