use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use cinder_protocol::{EventRecord, EventStatus, JobId, RunId, ScanWindow};
use tracing::{debug, warn};

use crate::error::{ConsoleError, Result};
use crate::limiter::{Acquire, BlackoutGuard, OpKind};
use crate::session::Session;
use crate::stores::EventStore;

/// Hard cap on events returned by a point query.
pub const MAX_EVENTS: usize = 50;
/// Default point-query size.
pub const DEFAULT_EVENTS: usize = 10;
/// Default lookback for the running-jobs scan.
pub const RUNNING_JOB_LOOKBACK_HOURS: i64 = 12;
/// The event store is scanned in this many parallelizable partitions; a
/// complete scan covers every one of them.
pub const TOTAL_SCAN_SEGMENTS: u32 = 4;

/// Queries over the partitioned event store for the active session.
///
/// The full-table scan carries a per-engine in-flight flag: at most one
/// scan per session at a time. The flag is set only after the blackout
/// guard allows the scan, and cleared by a drop guard on every exit path.
pub struct EventQueryEngine {
    scan_in_flight: AtomicBool,
}

struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl EventQueryEngine {
    pub fn new() -> Self {
        Self {
            scan_in_flight: AtomicBool::new(false),
        }
    }

    pub fn scan_in_flight(&self) -> bool {
        self.scan_in_flight.load(Ordering::Acquire)
    }

    /// Recent events for a job, newest first, bounded to
    /// `min(limit, MAX_EVENTS)`. A `limit` of zero means "no explicit
    /// bound" (the cap still applies). Fails with `NotFound` when the
    /// store's response omits the expected items field.
    pub async fn events_for_job(
        &self,
        session: &Session,
        realm: &str,
        job_id: &str,
        limit: usize,
        status: Option<EventStatus>,
    ) -> Result<Vec<EventRecord>> {
        let effective = if limit > 0 { limit.min(MAX_EVENTS) } else { MAX_EVENTS };
        let output = session
            .events()
            .query_events(realm, job_id, Some(effective), true, status)
            .await?;
        match output.items {
            Some(items) => Ok(items),
            None => Err(ConsoleError::NotFound(format!(
                "event information for {job_id}"
            ))),
        }
    }

    /// Look up one run among the job's recent events, gated by the
    /// event-fetch blackout. Returns `None` when the run is not among the
    /// `DEFAULT_EVENTS` newest events (it may simply be older).
    pub async fn run_details(
        &self,
        session: &Session,
        limiter: &BlackoutGuard,
        realm: &str,
        job_id: &str,
        run_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<EventRecord>> {
        if let Acquire::Denied { remaining_secs } = limiter.try_acquire(OpKind::EventFetch, now) {
            return Err(ConsoleError::RateLimited {
                op: OpKind::EventFetch,
                remaining_secs,
            });
        }
        let events = self
            .events_for_job(session, realm, job_id, DEFAULT_EVENTS, None)
            .await?;
        Ok(events.into_iter().find(|ev| ev.run_id == run_id))
    }

    /// Jobs with a `running` event dispatched within the last
    /// `lookback_hours`, across the whole store.
    ///
    /// Every segment is scanned and merged, each one looped until its
    /// continuation cursor is exhausted; a partial scan that covers only
    /// one partition would silently drop running jobs.
    pub async fn running_jobs(
        &self,
        session: &Session,
        limiter: &BlackoutGuard,
        realm: &str,
        lookback_hours: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<(JobId, RunId)>> {
        if self.scan_in_flight.load(Ordering::Acquire) {
            return Err(ConsoleError::ScanInFlight);
        }
        if let Acquire::Denied { remaining_secs } = limiter.try_acquire(OpKind::FullScan, now) {
            return Err(ConsoleError::RateLimited {
                op: OpKind::FullScan,
                remaining_secs,
            });
        }
        if self.scan_in_flight.swap(true, Ordering::AcqRel) {
            return Err(ConsoleError::ScanInFlight);
        }
        let _guard = ScanGuard(&self.scan_in_flight);

        let window = ScanWindow {
            status: EventStatus::Running,
            from: now - Duration::hours(lookback_hours),
            to: now,
        };
        let mut running: Vec<(JobId, RunId)> = Vec::new();
        for segment in 0..TOTAL_SCAN_SEGMENTS {
            let mut cursor: Option<String> = None;
            loop {
                let page = session
                    .events()
                    .scan_events(realm, &window, segment, TOTAL_SCAN_SEGMENTS, cursor)
                    .await?;
                if page.items.is_none() {
                    warn!(segment, "scan page carried no items field");
                }
                running.extend(
                    page.items
                        .unwrap_or_default()
                        .into_iter()
                        .map(|ev| (ev.job_id, ev.run_id)),
                );
                match page.next_cursor {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
        }
        debug!(realm, count = running.len(), "running-jobs scan complete");
        Ok(running)
    }
}

impl Default for EventQueryEngine {
    fn default() -> Self {
        Self::new()
    }
}
