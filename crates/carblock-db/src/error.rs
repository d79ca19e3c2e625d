use std::time::Duration;

use rusqlite::ErrorCode;

use carblock_types::PlateNumberError;

/// Coarse classification every error maps onto, so the bot layer can pick
/// user guidance without matching each variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Lookup miss; the user corrects their input.
    NotFound,
    /// Duplicate or forbidden combination; the user corrects their input.
    Conflict,
    /// Retry after the reported wait.
    RateLimited,
    /// Infrastructure hiccup; retry with backoff.
    Transient,
    /// Schema missing or malformed. Fatal at startup.
    Schema,
    Internal,
}

/// Infrastructure failures. Carries no partial state.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("no pooled connection became available within {waited:?}")]
    PoolExhausted { waited: Duration },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("worker failed: {0}")]
    Worker(String),
}

impl DbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PoolExhausted { .. } => ErrorKind::Transient,
            Self::Sqlite(e) if is_busy(e) => ErrorKind::Transient,
            Self::Schema(_) => ErrorKind::Schema,
            _ => ErrorKind::Internal,
        }
    }

    /// True when the connection that produced this error can no longer be
    /// trusted and must be dropped instead of going back to the pool.
    pub fn breaks_connection(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::SystemIoFailure
                    | ErrorCode::DatabaseCorrupt
                    | ErrorCode::NotADatabase
                    | ErrorCode::CannotOpen
            ),
            _ => false,
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

/// Outcome of a failed `send`.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("no vehicle with that plate is registered")]
    PlateNotFound,

    #[error("cannot send a message to yourself")]
    SelfMessage,

    #[error("message limit reached; retry in {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("sender is not registered")]
    UnknownSender,

    #[error("message text must be 1..={max} characters")]
    InvalidText { max: usize },

    #[error(transparent)]
    Failure(#[from] DbError),
}

impl SendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PlateNotFound | Self::UnknownSender => ErrorKind::NotFound,
            Self::SelfMessage | Self::InvalidText { .. } => ErrorKind::Conflict,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Failure(e) => e.kind(),
        }
    }
}

impl From<rusqlite::Error> for SendError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Failure(err.into())
    }
}

/// Outcome of a failed plate directory operation.
#[derive(Debug, thiserror::Error)]
pub enum PlateError {
    #[error("invalid plate number: {0}")]
    InvalidPlate(#[from] PlateNumberError),

    #[error("plate is not registered")]
    NotFound,

    #[error("plate is already registered by another user")]
    DuplicatePlate,

    #[error("plate is already registered to you")]
    AlreadyRegistered,

    /// The acting user is not the plate's owner, or is not a registered
    /// user at all.
    #[error("plate owner does not match")]
    OwnerMismatch,

    #[error(transparent)]
    Failure(#[from] DbError),
}

impl PlateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::InvalidPlate(_)
            | Self::DuplicatePlate
            | Self::AlreadyRegistered
            | Self::OwnerMismatch => ErrorKind::Conflict,
            Self::Failure(e) => e.kind(),
        }
    }
}

impl From<rusqlite::Error> for PlateError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Failure(err.into())
    }
}

/// Lets the pooled-connection helpers decide whether to discard the
/// connection after an operation failed, whatever the operation's error type.
pub trait ConnectionFault {
    fn breaks_connection(&self) -> bool;
}

impl ConnectionFault for DbError {
    fn breaks_connection(&self) -> bool {
        DbError::breaks_connection(self)
    }
}

impl ConnectionFault for SendError {
    fn breaks_connection(&self) -> bool {
        matches!(self, Self::Failure(e) if e.breaks_connection())
    }
}

impl ConnectionFault for PlateError {
    fn breaks_connection(&self) -> bool {
        matches!(self, Self::Failure(e) if e.breaks_connection())
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
