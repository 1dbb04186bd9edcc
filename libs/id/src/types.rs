//! Generated id types.

use crate::define_id;

/// Identifies one scheduled task (one run of one shard).
define_id!(TaskId, "task");

/// Compare-and-swap handle for an in-flight rolling update.
define_id!(UpdateToken, "upd");

/// Identifies a stored backup of scheduler state.
define_id!(BackupId, "bkp");

/// Correlates log lines of one API request.
define_id!(RequestId, "req");
