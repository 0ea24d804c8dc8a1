//! Session/connection cache and query layer for an operator console over a
//! remote job-orchestration control plane.
//!
//! The presentation layer constructs one [`ConsoleContext`], wires its own
//! [`stores::SessionFactory`] into it, and drives everything through that
//! handle: profile/realm switches, cached job listings, event queries, the
//! blackout-gated full scan, and dispatch.

pub mod context;
pub mod error;
pub mod jobs;
pub mod limiter;
pub mod logs;
pub mod query;
pub mod search;
pub mod session;
pub mod settings;
pub mod stores;
pub mod util;

pub use context::ConsoleContext;
pub use error::{ConsoleError, Result};
pub use jobs::{JobListCache, JOB_LIST_MAX_KEYS, JOB_LIST_TTL_SECS};
pub use limiter::{Acquire, BlackoutGuard, OpKind};
pub use logs::{extract_log_refs, fetch_log, split_blob_uri, LogRefs};
pub use query::{
    EventQueryEngine, DEFAULT_EVENTS, MAX_EVENTS, RUNNING_JOB_LOOKBACK_HOURS,
    TOTAL_SCAN_SEGMENTS,
};
pub use search::{filter_jobs, DebouncedSearch, SearchSink, DEBOUNCE_WINDOW_MS};
pub use session::{ProfileContext, RealmContext, Session, SessionRegistry};
pub use settings::Settings;
