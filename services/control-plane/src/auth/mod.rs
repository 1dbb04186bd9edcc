//! Session authentication and capability checks.
//!
//! A [`SessionValidator`] answers two questions about a caller: may it act
//! as a role, and does it hold a capability. [`AuthGate`] wraps the validator
//! with the operation-to-capability policy used by admin endpoints.

mod credentials;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::ControlError;
use crate::model::Response;

pub use credentials::{
    token_digest, Credential, CredentialError, CredentialTable, CredentialValidator,
    UnsecureValidator,
};

/// Caller credentials attached to a request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKey {
    pub user: String,
    #[serde(skip_serializing)]
    pub token: String,
}

impl SessionKey {
    pub fn new(user: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            token: token.into(),
        }
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Privileged capability a session may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    Root,
    Provisioner,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("ROOT"),
            Self::Provisioner => f.write_str("PROVISIONER"),
        }
    }
}

/// Authentication or authorization failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Invalid credentials for user '{0}'")]
    InvalidCredentials(String),

    #[error("User '{user}' is not authorized for role '{role}'")]
    RoleDenied { user: String, role: String },

    #[error("User '{user}' lacks capability {capability}")]
    CapabilityDenied { user: String, capability: Capability },
}

/// Validates sessions against roles and capabilities.
pub trait SessionValidator: Send + Sync {
    fn check_authenticated(&self, session: &SessionKey, role: &str) -> Result<(), AuthError>;

    fn check_authorized(
        &self,
        session: &SessionKey,
        capability: Capability,
    ) -> Result<(), AuthError>;
}

/// Admin operations subject to a capability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AdminOperation {
    SetQuota,
    StartMaintenance,
    DrainHosts,
    MaintenanceStatus,
    EndMaintenance,
    ForceTaskState,
    PerformBackup,
    ListBackups,
    StageRecovery,
    QueryRecovery,
    DeleteRecoveryTasks,
    CommitRecovery,
    UnloadRecovery,
    Snapshot,
    RewriteConfigs,
}

impl AdminOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SetQuota => "setQuota",
            Self::StartMaintenance => "startMaintenance",
            Self::DrainHosts => "drainHosts",
            Self::MaintenanceStatus => "maintenanceStatus",
            Self::EndMaintenance => "endMaintenance",
            Self::ForceTaskState => "forceTaskState",
            Self::PerformBackup => "performBackup",
            Self::ListBackups => "listBackups",
            Self::StageRecovery => "stageRecovery",
            Self::QueryRecovery => "queryRecovery",
            Self::DeleteRecoveryTasks => "deleteRecoveryTasks",
            Self::CommitRecovery => "commitRecovery",
            Self::UnloadRecovery => "unloadRecovery",
            Self::Snapshot => "snapshot",
            Self::RewriteConfigs => "rewriteConfigs",
        }
    }
}

impl fmt::Display for AdminOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability required by each admin operation.
#[derive(Debug, Clone)]
pub struct CapabilityPolicy {
    default: Capability,
    overrides: BTreeMap<AdminOperation, Capability>,
}

impl Default for CapabilityPolicy {
    fn default() -> Self {
        Self {
            default: Capability::Root,
            overrides: BTreeMap::from([(AdminOperation::SetQuota, Capability::Provisioner)]),
        }
    }
}

impl CapabilityPolicy {
    pub fn with_override(mut self, op: AdminOperation, capability: Capability) -> Self {
        self.overrides.insert(op, capability);
        self
    }

    pub fn required(&self, op: AdminOperation) -> Capability {
        self.overrides.get(&op).copied().unwrap_or(self.default)
    }
}

/// Authentication entry point shared by every handler.
#[derive(Clone)]
pub struct AuthGate {
    validator: Arc<dyn SessionValidator>,
    policy: CapabilityPolicy,
}

impl AuthGate {
    pub fn new(validator: Arc<dyn SessionValidator>, policy: CapabilityPolicy) -> Self {
        Self { validator, policy }
    }

    /// Checks that `session` may act as `role`.
    pub fn authenticate(&self, session: &SessionKey, role: &str) -> Result<(), ControlError> {
        self.validator
            .check_authenticated(session, role)
            .map_err(|err| {
                warn!(user = %session.user, role, error = %err, "Authentication failed");
                err.into()
            })
    }

    /// Whether `session` holds `capability`.
    pub fn authorize(&self, session: &SessionKey, capability: Capability) -> bool {
        self.validator.check_authorized(session, capability).is_ok()
    }

    /// Checks the capability `op` requires.
    pub fn guard(&self, op: AdminOperation, session: &SessionKey) -> Result<(), ControlError> {
        let capability = self.policy.required(op);
        match self.validator.check_authorized(session, capability) {
            Ok(()) => {
                info!(user = %session.user, operation = %op, "Admin operation authorized");
                Ok(())
            }
            Err(err) => {
                warn!(user = %session.user, operation = %op, %capability, "Admin operation denied");
                Err(err.into())
            }
        }
    }

    /// Runs `handler` only when `session` passes [`AuthGate::guard`] for `op`.
    pub async fn guarded<T, F, Fut>(
        &self,
        op: AdminOperation,
        session: &SessionKey,
        handler: F,
    ) -> Response<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Response<T>>,
    {
        match self.guard(op, session) {
            Ok(()) => handler().await,
            Err(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::model::ResponseCode;

    fn gate() -> AuthGate {
        let table = CredentialTable::default()
            .with_user("alice", "a-token", &["www"], &[])
            .with_user("ops", "o-token", &[], &[Capability::Provisioner])
            .with_user("root", "r-token", &[], &[Capability::Root]);
        AuthGate::new(
            Arc::new(CredentialValidator::new(table)),
            CapabilityPolicy::default(),
        )
    }

    #[test]
    fn test_default_policy() {
        let policy = CapabilityPolicy::default();
        assert_eq!(policy.required(AdminOperation::SetQuota), Capability::Provisioner);
        assert_eq!(policy.required(AdminOperation::Snapshot), Capability::Root);
        assert_eq!(policy.required(AdminOperation::RewriteConfigs), Capability::Root);
    }

    #[test]
    fn test_policy_override() {
        let policy = CapabilityPolicy::default()
            .with_override(AdminOperation::DrainHosts, Capability::Provisioner);
        assert_eq!(policy.required(AdminOperation::DrainHosts), Capability::Provisioner);
    }

    #[test]
    fn test_authenticate() {
        let gate = gate();
        assert!(gate.authenticate(&SessionKey::new("alice", "a-token"), "www").is_ok());

        let err = gate
            .authenticate(&SessionKey::new("alice", "a-token"), "db")
            .unwrap_err();
        assert!(matches!(err, ControlError::AuthFailed(_)));

        let err = gate
            .authenticate(&SessionKey::new("alice", "wrong"), "www")
            .unwrap_err();
        assert_eq!(err.code(), ResponseCode::AuthFailed);
    }

    #[test]
    fn test_guard_uses_policy() {
        let gate = gate();
        let ops = SessionKey::new("ops", "o-token");
        assert!(gate.guard(AdminOperation::SetQuota, &ops).is_ok());
        assert!(gate.guard(AdminOperation::Snapshot, &ops).is_err());
        assert!(gate
            .guard(AdminOperation::Snapshot, &SessionKey::new("root", "r-token"))
            .is_ok());
    }

    #[tokio::test]
    async fn test_guarded_skips_handler_when_denied() {
        let gate = gate();
        let alice = SessionKey::new("alice", "a-token");
        let ran = Cell::new(false);

        let response: Response<()> = gate
            .guarded(AdminOperation::Snapshot, &alice, || async {
                ran.set(true);
                Response::ok_message("done")
            })
            .await;

        assert_eq!(response.code, ResponseCode::AuthFailed);
        assert!(!ran.get());
    }

    #[test]
    fn test_session_debug_redacts_token() {
        let debug = format!("{:?}", SessionKey::new("alice", "secret"));
        assert!(!debug.contains("secret"));
    }
}
