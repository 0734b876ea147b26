// Serializable Batch Callbacks
//
// Callbacks are persisted inside the batch options blob and may be read back
// by a different process, so they are data, not closures.

use crate::domain::job::QueuedJob;
use serde::{Deserialize, Serialize};

/// Lifecycle event a callback list is registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    Before,
    Progress,
    Then,
    Catch,
    Finally,
}

impl CallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackKind::Before => "before",
            CallbackKind::Progress => "progress",
            CallbackKind::Then => "then",
            CallbackKind::Catch => "catch",
            CallbackKind::Finally => "finally",
        }
    }
}

impl std::fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A callback reference that survives storage round-trips
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Callback {
    /// Named handler resolved through the callback registry
    Handler {
        name: String,
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        args: serde_json::Value,
    },

    /// Enqueue a job
    Dispatch { job: Box<QueuedJob> },

    /// Resume an outer chain after a nested batch, unless the batch was cancelled
    ContinueChain { next: Box<QueuedJob> },

    /// Run the inner chain-catch callback only when the batch does not allow failures
    ChainCatch { callback: Box<Callback> },
}

impl Callback {
    pub fn handler(name: impl Into<String>) -> Self {
        Callback::Handler {
            name: name.into(),
            args: serde_json::Value::Null,
        }
    }

    pub fn handler_with_args(name: impl Into<String>, args: serde_json::Value) -> Self {
        Callback::Handler {
            name: name.into(),
            args,
        }
    }

    pub fn dispatch(job: QueuedJob) -> Self {
        Callback::Dispatch { job: Box::new(job) }
    }
}

impl From<QueuedJob> for Callback {
    fn from(job: QueuedJob) -> Self {
        Callback::dispatch(job)
    }
}
