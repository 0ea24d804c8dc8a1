use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Named credential profile selecting a remote account/environment.
pub type ProfileName = String;
/// Named partition of the job/event store (e.g. staging vs production).
pub type RealmId = String;
pub type JobId = String;
pub type RunId = String;

/// Lifecycle status carried by every event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Starting,
    Running,
    Complete,
    Logging,
    Retrying,
    Failed,
    Rejected,
    Skipped,
    ActionFailed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Starting => "starting",
            EventStatus::Running => "running",
            EventStatus::Complete => "complete",
            EventStatus::Logging => "logging",
            EventStatus::Retrying => "retrying",
            EventStatus::Failed => "failed",
            EventStatus::Rejected => "rejected",
            EventStatus::Skipped => "skipped",
            EventStatus::ActionFailed => "action_failed",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timestamped status record for a job run. Immutable once fetched;
/// freeform payload fields ride along in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub job_id: JobId,
    pub run_id: RunId,
    /// When the run was dispatched (RFC3339, timezone-aware).
    pub ts_dispatch: DateTime<Utc>,
    /// When this event was recorded (RFC3339, timezone-aware).
    pub ts_event: DateTime<Utc>,
    pub status: EventStatus,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Job definition as stored in the job store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub worker: String,
    #[serde(default)]
    pub globals: Map<String, Value>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobSpec {
    /// Parse a JSON job-spec document.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Point-query response envelope. The store may omit `items` entirely,
/// which callers treat as "expected data absent".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryOutput {
    #[serde(default)]
    pub items: Option<Vec<EventRecord>>,
}

/// One page of a segmented scan. `next_cursor` is an opaque continuation
/// token; `None` means the segment is exhausted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanOutput {
    #[serde(default)]
    pub items: Option<Vec<EventRecord>>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Filter for a windowed event scan: status match plus an inclusive
/// dispatch-timestamp range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanWindow {
    pub status: EventStatus,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Input to the opaque dispatch RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub realm: RealmId,
    pub job_id: JobId,
    pub worker: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub globals: Map<String, Value>,
}
