// Batch Domain Model

use crate::domain::callback::{Callback, CallbackKind};
use crate::domain::error::{DomainError, Result};
use crate::domain::job::QueuedJob;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Batch ID (UUID v7, sorts by creation time)
pub type BatchId = String;

/// Option keys with a dedicated field
const RESERVED_OPTION_KEYS: [&str; 8] = [
    "before",
    "progress",
    "then",
    "catch",
    "finally",
    "queue",
    "connection",
    "allowFailures",
];

/// Callback lists, routing defaults and free-form options of a batch
///
/// Stored as one opaque JSON blob; unknown keys land in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before: Vec<Callback>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub progress: Vec<Callback>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub then: Vec<Callback>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catch: Vec<Callback>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finally: Vec<Callback>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,

    #[serde(rename = "allowFailures", default)]
    pub allow_failures: bool,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl BatchOptions {
    pub fn callbacks(&self, kind: CallbackKind) -> &[Callback] {
        match kind {
            CallbackKind::Before => &self.before,
            CallbackKind::Progress => &self.progress,
            CallbackKind::Then => &self.then,
            CallbackKind::Catch => &self.catch,
            CallbackKind::Finally => &self.finally,
        }
    }

    pub fn push_callback(&mut self, kind: CallbackKind, callback: Callback) {
        let list = match kind {
            CallbackKind::Before => &mut self.before,
            CallbackKind::Progress => &mut self.progress,
            CallbackKind::Then => &mut self.then,
            CallbackKind::Catch => &mut self.catch,
            CallbackKind::Finally => &mut self.finally,
        };
        list.push(callback);
    }

    /// Set an option by key; reserved keys must match their field's shape
    pub fn set(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        if !RESERVED_OPTION_KEYS.contains(&key) {
            self.extra.insert(key.to_string(), value);
            return Ok(());
        }

        let invalid = |e: serde_json::Error| DomainError::InvalidOption {
            key: key.to_string(),
            reason: e.to_string(),
        };

        let serde_json::Value::Object(mut map) = serde_json::to_value(&*self).map_err(invalid)?
        else {
            return Err(DomainError::InvalidOption {
                key: key.to_string(),
                reason: "options are not an object".to_string(),
            });
        };
        map.insert(key.to_string(), value);
        *self = serde_json::from_value(serde_json::Value::Object(map)).map_err(invalid)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }
}

/// One unit handed to a batch: a single job or a chain run as one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "jobs", rename_all = "snake_case")]
pub enum BatchItem {
    Job(QueuedJob),
    Chain(Vec<QueuedJob>),
}

impl BatchItem {
    /// Number of jobs this item contributes to the batch totals
    pub fn job_count(&self) -> usize {
        match self {
            BatchItem::Job(_) => 1,
            BatchItem::Chain(links) => links.len(),
        }
    }
}

/// Insert shape for a new batch row
#[derive(Debug, Clone, Default)]
pub struct NewBatch {
    pub name: String,
    pub options: BatchOptions,
}

/// Persisted batch row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: BatchId,
    pub name: String,
    pub total_jobs: i64,
    pub pending_jobs: i64,
    pub failed_jobs: i64,
    pub failed_job_ids: Vec<String>,
    pub options: BatchOptions,

    pub created_at: i64, // epoch seconds
    pub cancelled_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl BatchRecord {
    pub fn processed_jobs(&self) -> i64 {
        self.total_jobs - self.pending_jobs
    }

    /// Completion percentage, rounded
    pub fn progress(&self) -> i64 {
        if self.total_jobs > 0 {
            ((self.processed_jobs() as f64 / self.total_jobs as f64) * 100.0).round() as i64
        } else {
            0
        }
    }

    pub fn finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    pub fn has_failures(&self) -> bool {
        self.failed_jobs > 0
    }

    pub fn allows_failures(&self) -> bool {
        self.options.allow_failures
    }

    pub fn counters(&self) -> BatchCounters {
        BatchCounters {
            pending_jobs: self.pending_jobs,
            failed_jobs: self.failed_jobs,
            failed_job_ids: self.failed_job_ids.clone(),
        }
    }

    pub fn to_summary(&self) -> BatchSummary {
        BatchSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            total_jobs: self.total_jobs,
            pending_jobs: self.pending_jobs,
            processed_jobs: self.processed_jobs(),
            progress: self.progress(),
            failed_jobs: self.failed_jobs,
            options: self.options.clone(),
            created_at: to_datetime(self.created_at),
            cancelled_at: self.cancelled_at.and_then(to_datetime),
            finished_at: self.finished_at.and_then(to_datetime),
        }
    }
}

fn to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// Plain, caller-facing view of a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub id: BatchId,
    pub name: String,
    pub total_jobs: i64,
    pub pending_jobs: i64,
    pub processed_jobs: i64,
    pub progress: i64,
    pub failed_jobs: i64,
    pub options: BatchOptions,
    pub created_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// The mutable counter columns of a batch row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCounters {
    pub pending_jobs: i64,
    pub failed_jobs: i64,
    pub failed_job_ids: Vec<String>,
}

impl BatchCounters {
    /// A job succeeded: one less pending, and any stale failure record for it is dropped
    pub fn record_success(mut self, job_id: &str) -> Self {
        self.pending_jobs -= 1;
        self.failed_job_ids.retain(|id| id != job_id);
        self
    }

    /// A job failed: the counter always advances, the ID is stored once
    pub fn record_failure(mut self, job_id: &str) -> Self {
        self.failed_jobs += 1;
        if !self.failed_job_ids.iter().any(|id| id == job_id) {
            self.failed_job_ids.push(job_id.to_string());
        }
        self
    }

    pub fn updated(&self) -> UpdatedBatchJobCounts {
        UpdatedBatchJobCounts {
            pending_jobs: self.pending_jobs,
            failed_jobs: self.failed_jobs,
        }
    }
}

/// Counts observed by the caller that performed a mutation, right after it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdatedBatchJobCounts {
    pub pending_jobs: i64,
    pub failed_jobs: i64,
}

impl UpdatedBatchJobCounts {
    /// Every job in the batch has reported exactly once (success or failure)
    pub fn all_jobs_have_ran_exactly_once(&self) -> bool {
        self.pending_jobs - self.failed_jobs == 0
    }
}
