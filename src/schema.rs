use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::ServerIdentity;

// ------------------------------------------------------------
// Fetch task
// ------------------------------------------------------------
//
// One unit of work for the worker pool: query one server once.
//
// A seeded task carries the full repeat budget. A continuation
// (requeued because the server returned a full batch) carries
// one less.
//
#[derive(Debug, Clone)]
pub struct FetchTask {
    pub identity: ServerIdentity,

    /// Remaining number of continuations allowed in this run
    pub repeat_budget: u32,

    /// True only for the seeded task of an identity
    pub first_attempt: bool,
}

impl FetchTask {
    pub fn seed(identity: ServerIdentity, repeat_limit: u32) -> Self {
        Self {
            identity,
            repeat_budget: repeat_limit,
            first_attempt: true,
        }
    }

    /// Continuation with one less repeat. `None` once the budget is spent.
    pub fn continuation(&self) -> Option<Self> {
        let repeat_budget = self.repeat_budget.checked_sub(1)?;
        Some(Self {
            identity: self.identity.clone(),
            repeat_budget,
            first_attempt: false,
        })
    }
}

// ------------------------------------------------------------
// Fetch batch
// ------------------------------------------------------------
//
// Decoded answer of one monitoring-data query.
//
// Records are opaque JSON objects, passed through to the sink
// untouched. No ordering is assumed.
//
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchBatch {
    pub records: Vec<Value>,

    /// Server-assigned position to resume from (`nextRecordsFrom`)
    pub continuation: Option<String>,
}

// ------------------------------------------------------------
// Heartbeat
// ------------------------------------------------------------
//
// Status document overwritten at the end of every run and read
// by external application monitoring.
//
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Heartbeat {
    pub timestamp: i64,
    pub local_timestamp: String,
    pub module: String,
    pub msg: String,
    pub version: String,
    pub status: RunStatus,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Succeeded,
    Failed,
}
