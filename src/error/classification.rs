//! Transient vs. fatal classification helpers for the registry gateway.
//!
//! Complements the blanket `sqlx::Error` classification in
//! [`super::types::DbOutcome::from_sqlx_result`] with named categories used
//! for logging and for deciding when a transient outage has gone on long
//! enough to force self-demotion.

use std::fmt;

/// Coarse category attached to a transient outage, purely for log context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutageCategory {
    ConnectionLost,
    PoolExhausted,
    Serialization,
    Timeout,
}

impl fmt::Display for OutageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutageCategory::ConnectionLost => "connection_lost",
            OutageCategory::PoolExhausted => "pool_exhausted",
            OutageCategory::Serialization => "serialization_conflict",
            OutageCategory::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Best-effort categorization of a transient `sqlx::Error`, for log fields
/// only; never changes retry/escalation behavior.
pub fn categorize(err: &sqlx::Error) -> OutageCategory {
    match err {
        sqlx::Error::PoolTimedOut => OutageCategory::Timeout,
        sqlx::Error::PoolClosed => OutageCategory::PoolExhausted,
        sqlx::Error::Io(_) => OutageCategory::ConnectionLost,
        _ => {
            if let Some(db_err) = err.as_database_error() {
                if let Some(code) = db_err.code() {
                    if code.starts_with("40") {
                        return OutageCategory::Serialization;
                    }
                }
            }
            OutageCategory::ConnectionLost
        }
    }
}
