use crate::limiter::OpKind;

/// Error taxonomy for the cache/query layer.
///
/// Cache layers never catch errors from the stores underneath; everything
/// propagates unchanged so callers can tell "no data" from "layer unusable".
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    /// Credentials invalid, or a required control-plane object is
    /// unreachable. Raised from session resolution; never retried
    /// automatically.
    #[error("access problem: {0}")]
    Access(String),

    /// Expected data absent from a store response; carries the
    /// identifying key.
    #[error("{0} not found")]
    NotFound(String),

    /// A blackout-guarded operation was invoked inside its window.
    /// Callers present the wait time to the operator and must not
    /// auto-retry.
    #[error("{op} is rate limited; retry in {remaining_secs}s")]
    RateLimited { op: OpKind, remaining_secs: u64 },

    /// A full event scan is already in flight for this session.
    #[error("a full event scan is already in progress")]
    ScanInFlight,

    /// Operation invoked before the console state it needs exists
    /// (no active profile/realm selected).
    #[error("{0}")]
    InvalidState(String),

    /// Any other remote-call failure, surfaced with its original message.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ConsoleError>;
