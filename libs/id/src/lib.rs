//! # corral-id
//!
//! Identifier types shared by the corral control plane.
//!
//! ## Generated ids
//!
//! Tasks, update tokens, backups and API requests carry system-generated ids in the
//! prefixed format `{prefix}_{ulid}`:
//!
//! - `task_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `upd_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//! - `bkp_01HV4Z4NYPLTRS0JTUA8XDME5F`
//!
//! The prefix keeps the types apart on the wire, the ULID keeps them
//! sortable by creation time.
//!
//! ## Job keys
//!
//! Jobs are addressed by a user-chosen composite [`JobKey`]
//! (`role/environment/name`). Every component is validated against the
//! identifier rules before a key is accepted by any mutating operation.

mod error;
mod job_key;
mod macros;
mod types;

pub use error::IdError;
pub use job_key::{validate_identifier, JobKey, MAX_IDENTIFIER_LENGTH};
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
