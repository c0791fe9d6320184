use thiserror::Error;

/// Fatal errors raised by the HA manager.
///
/// These are the errors that stop the control loop and drive `ha_status`
/// to `Error` (spec §7: "Fatal DB error" / "Semantic validation error").
/// Transient database outages are represented separately by
/// [`crate::error::DbOutcome::Down`], never by this type.
#[derive(Debug, Clone, Error)]
pub enum HaError {
    #[error("database error: {0}")]
    Database(String),

    #[error("found {status} node in standalone mode")]
    StandaloneViolation { status: String },

    #[error("found {status} standalone node in HA mode")]
    ClusterStandaloneRow { status: String },

    #[error("found {status} duplicate \"{name}\" node")]
    DuplicateNode { status: String, name: String },

    #[error("cannot find server node \"{name}\" in registry")]
    OwnNodeMissing { name: String },

    #[error("control channel error: {0}")]
    Channel(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for HaError {
    fn from(err: sqlx::Error) -> Self {
        HaError::Database(err.to_string())
    }
}

impl From<config::ConfigError> for HaError {
    fn from(err: config::ConfigError) -> Self {
        HaError::Config(err.to_string())
    }
}

/// Outcome of a registry operation, replacing the `{OK, DOWN, FAIL}` triad
/// from the original implementation with a sum type (spec §9 DESIGN NOTES).
///
/// `Down` is always transient and retryable next tick; `Fail` is fatal to
/// the current logical operation and must be escalated. The two are
/// distinguished at the type level so a caller cannot collapse them by
/// mistake.
#[derive(Debug)]
pub enum DbOutcome<T> {
    Ok(T),
    Down,
    Fail(HaError),
}

impl<T> DbOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, DbOutcome::Ok(_))
    }

    pub fn is_down(&self) -> bool {
        matches!(self, DbOutcome::Down)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DbOutcome<U> {
        match self {
            DbOutcome::Ok(v) => DbOutcome::Ok(f(v)),
            DbOutcome::Down => DbOutcome::Down,
            DbOutcome::Fail(e) => DbOutcome::Fail(e),
        }
    }

    /// Classify a `sqlx::Error` as a transient outage or a fatal failure.
    ///
    /// Connection loss and pool exhaustion are transient (spec §4.A:
    /// "DOWN is transient"); anything else (constraint violation, bad
    /// syntax, protocol violation) is fatal.
    pub fn from_sqlx_result(result: Result<T, sqlx::Error>) -> Self {
        match result {
            Ok(v) => DbOutcome::Ok(v),
            Err(err) => {
                if is_transient(&err) {
                    tracing::debug!(
                        category = %super::classification::categorize(&err),
                        "transient database outage"
                    );
                    DbOutcome::Down
                } else {
                    DbOutcome::Fail(HaError::from(err))
                }
            }
        }
    }
}

/// Transient vs. fatal classification for `sqlx::Error`, grounded in the
/// connection/transport failure patterns a Postgres driver surfaces.
fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    ) || err
        .as_database_error()
        .map(|db_err| {
            // Postgres SQLSTATE class 08 = connection exception,
            // class 40 = transaction rollback (serialization failures).
            db_err
                .code()
                .map(|code| code.starts_with("08") || code.starts_with("40"))
                .unwrap_or(false)
        })
        .unwrap_or(false)
}
