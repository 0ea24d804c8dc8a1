use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// Operations guarded by a blackout window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Dispatch,
    EventFetch,
    FullScan,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Dispatch => "dispatch",
            OpKind::EventFetch => "event fetch",
            OpKind::FullScan => "full event scan",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an acquisition attempt. Denials are returned, not thrown;
/// a denied caller re-invokes explicitly, never on a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Allowed,
    Denied { remaining_secs: u64 },
}

impl Acquire {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Acquire::Allowed)
    }
}

/// Minimum-interval guard for expensive operations.
///
/// Each kind has an independent fixed window. An allowed acquisition
/// records `now` as the kind's new timestamp whether or not the guarded
/// operation afterwards succeeds: a failed dispatch still consumes its
/// blackout window. This is an anti-abuse policy, not a retry mechanism.
pub struct BlackoutGuard {
    windows: HashMap<OpKind, Duration>,
    last: Mutex<HashMap<OpKind, DateTime<Utc>>>,
}

/// Reference policy: 10 s for dispatch and event fetch, 120 s for the
/// full-table scan.
pub const DISPATCH_BLACKOUT_SECS: i64 = 10;
pub const EVENT_BLACKOUT_SECS: i64 = 10;
pub const FULL_SCAN_BLACKOUT_SECS: i64 = 120;

impl BlackoutGuard {
    pub fn new() -> Self {
        Self::with_windows([
            (OpKind::Dispatch, Duration::seconds(DISPATCH_BLACKOUT_SECS)),
            (OpKind::EventFetch, Duration::seconds(EVENT_BLACKOUT_SECS)),
            (OpKind::FullScan, Duration::seconds(FULL_SCAN_BLACKOUT_SECS)),
        ])
    }

    pub fn with_windows(windows: impl IntoIterator<Item = (OpKind, Duration)>) -> Self {
        Self {
            windows: windows.into_iter().collect(),
            last: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self, kind: OpKind) -> Duration {
        self.windows.get(&kind).copied().unwrap_or_else(Duration::zero)
    }

    /// Attempt to acquire `kind` at `now`. A denial carries the remaining
    /// wait rounded up to whole seconds: `ceil(last + window - now)`.
    pub fn try_acquire(&self, kind: OpKind, now: DateTime<Utc>) -> Acquire {
        let window = self.window(kind);
        let mut last = self.last.lock().expect("blackout state lock poisoned");
        if let Some(prev) = last.get(&kind) {
            let deadline = *prev + window;
            if now < deadline {
                let remaining_ms = (deadline - now).num_milliseconds().max(0) as u64;
                return Acquire::Denied {
                    remaining_secs: remaining_ms.div_ceil(1000),
                };
            }
        }
        last.insert(kind, now);
        Acquire::Allowed
    }
}

impl Default for BlackoutGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn first_acquire_is_allowed() {
        let guard = BlackoutGuard::new();
        assert_eq!(guard.try_acquire(OpKind::Dispatch, at(0)), Acquire::Allowed);
    }

    #[test]
    fn denial_counts_down_and_reopens_at_boundary() {
        let guard = BlackoutGuard::new();
        assert!(guard.try_acquire(OpKind::Dispatch, at(0)).is_allowed());
        assert_eq!(
            guard.try_acquire(OpKind::Dispatch, at(3)),
            Acquire::Denied { remaining_secs: 7 }
        );
        // A denial must not move the timestamp forward.
        assert_eq!(
            guard.try_acquire(OpKind::Dispatch, at(9)),
            Acquire::Denied { remaining_secs: 1 }
        );
        assert_eq!(guard.try_acquire(OpKind::Dispatch, at(10)), Acquire::Allowed);
    }

    #[test]
    fn sub_second_remainder_rounds_up() {
        let guard = BlackoutGuard::new();
        let start = at(0);
        assert!(guard.try_acquire(OpKind::EventFetch, start).is_allowed());
        let almost = start + Duration::milliseconds(9_100);
        assert_eq!(
            guard.try_acquire(OpKind::EventFetch, almost),
            Acquire::Denied { remaining_secs: 1 }
        );
    }

    #[test]
    fn kinds_are_independent() {
        let guard = BlackoutGuard::new();
        assert!(guard.try_acquire(OpKind::Dispatch, at(0)).is_allowed());
        assert!(guard.try_acquire(OpKind::FullScan, at(0)).is_allowed());
        assert!(guard.try_acquire(OpKind::EventFetch, at(1)).is_allowed());
        assert_eq!(
            guard.try_acquire(OpKind::FullScan, at(60)),
            Acquire::Denied { remaining_secs: 60 }
        );
    }

    #[test]
    fn allowed_acquire_records_even_if_operation_later_fails() {
        // The guard has no knowledge of operation outcomes: recording
        // happens at acquisition time, so the caller's failure path still
        // consumes the window.
        let guard = BlackoutGuard::new();
        assert!(guard.try_acquire(OpKind::FullScan, at(0)).is_allowed());
        assert_eq!(
            guard.try_acquire(OpKind::FullScan, at(119)),
            Acquire::Denied { remaining_secs: 1 }
        );
        assert!(guard.try_acquire(OpKind::FullScan, at(120)).is_allowed());
    }
}
