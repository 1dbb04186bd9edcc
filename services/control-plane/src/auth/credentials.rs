//! Session validators.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::{AuthError, Capability, SessionKey, SessionValidator};

/// Failure loading a credential table.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to read credentials file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse credentials file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Grants held by one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Hex SHA-256 of the bearer token. Plain tokens are never stored.
    pub token_sha256: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
}

/// User name to credential map, loaded from JSON.
///
/// ```json
/// { "users": { "alice": { "token_sha256": "…", "roles": ["www"], "capabilities": [] } } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialTable {
    #[serde(default)]
    pub users: BTreeMap<String, Credential>,
}

impl CredentialTable {
    pub fn load(path: &Path) -> Result<Self, CredentialError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| CredentialError::Read {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| CredentialError::Parse {
            path: display,
            source,
        })
    }

    /// Adds a user, hashing `token`.
    pub fn with_user(
        mut self,
        user: &str,
        token: &str,
        roles: &[&str],
        capabilities: &[Capability],
    ) -> Self {
        self.users.insert(
            user.to_string(),
            Credential {
                token_sha256: token_digest(token),
                roles: roles.iter().map(|role| role.to_string()).collect(),
                capabilities: capabilities.iter().copied().collect(),
            },
        );
        self
    }
}

/// Hex SHA-256 digest of a bearer token.
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Validates sessions against a [`CredentialTable`].
#[derive(Debug, Clone)]
pub struct CredentialValidator {
    table: CredentialTable,
}

impl CredentialValidator {
    pub fn new(table: CredentialTable) -> Self {
        Self { table }
    }

    fn verify(&self, session: &SessionKey) -> Result<&Credential, AuthError> {
        self.table
            .users
            .get(&session.user)
            .filter(|credential| {
                credential
                    .token_sha256
                    .eq_ignore_ascii_case(&token_digest(&session.token))
            })
            .ok_or_else(|| AuthError::InvalidCredentials(session.user.clone()))
    }
}

impl SessionValidator for CredentialValidator {
    fn check_authenticated(&self, session: &SessionKey, role: &str) -> Result<(), AuthError> {
        let credential = self.verify(session)?;
        if credential.roles.contains(role) {
            Ok(())
        } else {
            Err(AuthError::RoleDenied {
                user: session.user.clone(),
                role: role.to_string(),
            })
        }
    }

    fn check_authorized(
        &self,
        session: &SessionKey,
        capability: Capability,
    ) -> Result<(), AuthError> {
        let credential = self.verify(session)?;
        if credential.capabilities.contains(&capability) {
            Ok(())
        } else {
            Err(AuthError::CapabilityDenied {
                user: session.user.clone(),
                capability,
            })
        }
    }
}

/// Development validator: any non-blank user may act as any role.
/// Capabilities are still limited to the users they were granted to.
#[derive(Debug, Clone, Default)]
pub struct UnsecureValidator {
    grants: BTreeMap<String, BTreeSet<Capability>>,
}

impl UnsecureValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grant(mut self, user: &str, capabilities: &[Capability]) -> Self {
        self.grants
            .entry(user.to_string())
            .or_default()
            .extend(capabilities.iter().copied());
        self
    }

    fn require_user(session: &SessionKey) -> Result<(), AuthError> {
        if session.user.trim().is_empty() {
            Err(AuthError::InvalidCredentials(session.user.clone()))
        } else {
            Ok(())
        }
    }
}

impl SessionValidator for UnsecureValidator {
    fn check_authenticated(&self, session: &SessionKey, _role: &str) -> Result<(), AuthError> {
        Self::require_user(session)
    }

    fn check_authorized(
        &self,
        session: &SessionKey,
        capability: Capability,
    ) -> Result<(), AuthError> {
        Self::require_user(session)?;
        let granted = self
            .grants
            .get(&session.user)
            .is_some_and(|capabilities| capabilities.contains(&capability));
        if granted {
            Ok(())
        } else {
            Err(AuthError::CapabilityDenied {
                user: session.user.clone(),
                capability,
            })
        }
    }
}
