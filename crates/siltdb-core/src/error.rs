use std::fmt;
use thiserror::Error as ThisError;

///
/// EngineError
///
/// Structured runtime error with a stable internal classification.
/// Every failure surfaced by the engine carries a class (what went wrong)
/// and an origin (which subsystem raised it) so callers can decide between
/// retrying, backing off, or failing fast without string matching.
///

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct EngineError {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,

    /// Optional structured error detail.
    /// The variant (if present) must correspond to `origin`.
    pub detail: Option<ErrorDetail>,
}

impl EngineError {
    /// Construct an EngineError without structured detail.
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
            detail: None,
        }
    }

    /// Construct a caller-precondition failure (programming error).
    pub(crate) fn precondition(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Precondition, origin, message)
    }

    /// Construct a query-origin internal error.
    pub(crate) fn query_internal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Internal, ErrorOrigin::Query, message)
    }

    /// Construct a cursor-origin precondition failure.
    pub(crate) fn cursor_precondition(message: impl Into<String>) -> Self {
        Self::precondition(ErrorOrigin::Cursor, message)
    }

    #[must_use]
    pub const fn is_quota(&self) -> bool {
        matches!(self.class, ErrorClass::ResourceExhausted)
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.class, ErrorClass::Transient)
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.class, ErrorClass::NotFound)
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}:{}: {}", self.origin, self.class, self.message)
    }
}

///
/// ErrorDetail
///
/// Structured, origin-specific error detail carried by [`EngineError`].
///

#[derive(Debug, ThisError)]
pub enum ErrorDetail {
    #[error("{0}")]
    Store(StoreError),
    #[error("{0}")]
    Lock(LockError),
}

///
/// StoreError
///
/// Backing-store boundary errors. Raised by `Store` implementations and
/// classified by the engine into retry/propagate decisions.
///

#[derive(Clone, Debug, ThisError)]
pub enum StoreError {
    #[error("quota exhausted: {message}")]
    Quota { message: String },

    #[error("transient store failure: {message}")]
    Transient { message: String },

    #[error("record not found: {key}")]
    NotFound { key: String },

    #[error("transaction conflict: {message}")]
    Conflict { message: String },

    #[error("query rejected by store: {message}")]
    Rejected { message: String },
}

impl StoreError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::Quota { .. } => ErrorClass::ResourceExhausted,
            Self::Transient { .. } => ErrorClass::Transient,
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::Conflict { .. } => ErrorClass::Conflict,
            Self::Rejected { .. } => ErrorClass::Precondition,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        Self {
            class: err.class(),
            origin: ErrorOrigin::Store,
            message: err.to_string(),
            detail: Some(ErrorDetail::Store(err)),
        }
    }
}

///
/// LockError
///
/// Task-lock consistency failures. Never silently ignored: each one either
/// surfaces to the caller or triggers a cleanup sweep first.
///

#[derive(Clone, Debug, ThisError)]
pub enum LockError {
    #[error("unable to locate lock {lock_id} for {subject} task {task}")]
    Missing {
        lock_id: String,
        subject: String,
        task: String,
    },

    #[error("lock overwritten; expected {expected}, found {actual}")]
    Overwritten { expected: String, actual: String },

    #[error("two locks created within the settle window of each other for {subject} task {task}")]
    UnresolvedRace { subject: String, task: String },

    #[error("lock record {key} is missing required field {field}")]
    MalformedRecord { key: String, field: &'static str },
}

impl LockError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::Missing { .. } | Self::Overwritten { .. } | Self::UnresolvedRace { .. } => {
                ErrorClass::Consistency
            }
            Self::MalformedRecord { .. } => ErrorClass::Internal,
        }
    }
}

impl From<LockError> for EngineError {
    fn from(err: LockError) -> Self {
        Self {
            class: err.class(),
            origin: ErrorOrigin::Lock,
            message: err.to_string(),
            detail: Some(ErrorDetail::Lock(err)),
        }
    }
}

///
/// ErrorClass
/// Internal error taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// The store refused the call due to usage limits; back off, do not retry.
    ResourceExhausted,
    /// Intermittent backend failure; retried locally where safe.
    Transient,
    NotFound,
    Conflict,
    /// Weak-consistency anomaly detected (lock verification, duplicates).
    Consistency,
    /// Invalid caller precondition; fail fast, never retried.
    Precondition,
    Internal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ResourceExhausted => "resource_exhausted",
            Self::Transient => "transient",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Consistency => "consistency",
            Self::Precondition => "precondition",
            Self::Internal => "internal",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
/// Internal origin taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    Store,
    Query,
    Cursor,
    Lock,
    Config,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Store => "store",
            Self::Query => "query",
            Self::Cursor => "cursor",
            Self::Lock => "lock",
            Self::Config => "config",
        };
        write!(f, "{label}")
    }
}
