// Queued Job Envelope
//
// The serialized shape of a dispatchable job: routing, retry bookkeeping,
// batch membership, uniqueness and the chain it carries.

use crate::domain::callback::Callback;
use serde::{Deserialize, Serialize};

/// Job ID (UUID v4, stable across retries)
pub type JobId = String;

/// Attempts allowed when a job does not declare its own
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

/// Point at which a unique job gives its lock back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniqueUntil {
    /// Released as soon as a worker picks the job up
    Processing,
    /// Released once the job succeeds or fails terminally
    #[default]
    Completion,
}

/// Uniqueness declaration carried by a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueSpec {
    /// Uniqueness key within the job type
    pub id: String,
    /// Lock TTL in seconds (0 = held until released)
    #[serde(default)]
    pub for_secs: u64,
    #[serde(default)]
    pub until: UniqueUntil,
}

impl UniqueSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            for_secs: 0,
            until: UniqueUntil::Completion,
        }
    }

    pub fn for_secs(mut self, secs: u64) -> Self {
        self.for_secs = secs;
        self
    }

    pub fn until_processing(mut self) -> Self {
        self.until = UniqueUntil::Processing;
        self
    }
}

/// Chain state carried by every dispatchable job
///
/// While a job runs, `chained` holds exactly the links after it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainState {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chained: Vec<QueuedJob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_connection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_queue: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain_catch_callbacks: Vec<Callback>,
}

impl ChainState {
    pub fn is_empty(&self) -> bool {
        self.chained.is_empty()
    }
}

/// A job as it travels through the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: JobId,
    pub job_type: String,
    pub payload: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// Dispatch delay in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,

    #[serde(default)]
    pub attempts: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<UniqueSpec>,

    #[serde(default)]
    pub chain: ChainState,
}

impl QueuedJob {
    /// Create an envelope with a fresh ID
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), job_type, payload)
    }

    /// Create an envelope with an explicit ID (deterministic tests, replays)
    pub fn with_id(
        id: impl Into<String>,
        job_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            job_type: job_type.into(),
            payload,
            connection: None,
            queue: None,
            delay: None,
            batch_id: None,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            unique: None,
            chain: ChainState::default(),
        }
    }

    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn on_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    pub fn delay(mut self, secs: u64) -> Self {
        self.delay = Some(secs);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn unique(mut self, spec: UniqueSpec) -> Self {
        self.unique = Some(spec);
        self
    }

    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    /// Route this job and every later link of its chain to `queue`
    pub fn all_on_queue(mut self, queue: Option<String>) -> Self {
        self.chain.chain_queue = queue.clone();
        self.queue = queue;
        self
    }

    /// Route this job and every later link of its chain over `connection`
    pub fn all_on_connection(mut self, connection: Option<String>) -> Self {
        self.chain.chain_connection = connection.clone();
        self.connection = connection;
        self
    }

    /// Replace the chain with already-prepared links
    pub fn chain(mut self, links: Vec<QueuedJob>) -> Self {
        self.chain.chained = links;
        self
    }

    pub fn prepend_to_chain(&mut self, job: QueuedJob) {
        self.chain.chained.insert(0, job);
    }

    pub fn append_to_chain(&mut self, job: QueuedJob) {
        self.chain.chained.push(job);
    }

    /// Detach the next link, handing it the rest of the chain
    ///
    /// The next link keeps its own queue/connection when it has one and falls
    /// back to the chain defaults otherwise. Chain defaults and catch
    /// callbacks travel forward unchanged.
    pub fn take_next_in_chain(&mut self) -> Option<QueuedJob> {
        if self.chain.chained.is_empty() {
            return None;
        }

        let mut next = self.chain.chained.remove(0);
        next.chain.chained = std::mem::take(&mut self.chain.chained);
        next.connection = next
            .connection
            .or_else(|| self.chain.chain_connection.clone());
        next.queue = next.queue.or_else(|| self.chain.chain_queue.clone());
        next.chain.chain_connection = self.chain.chain_connection.clone();
        next.chain.chain_queue = self.chain.chain_queue.clone();
        next.chain.chain_catch_callbacks = self.chain.chain_catch_callbacks.clone();

        Some(next)
    }

    pub fn is_unique(&self) -> bool {
        self.unique.is_some()
    }

    /// Attempts left after the one currently running
    pub fn has_attempts_left(&self) -> bool {
        self.attempts + 1 < self.max_attempts
    }
}
