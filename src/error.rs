//! Crate error types.

use std::error::Error;
use std::fmt;

use crate::value::FieldValue;

pub type DbResult<T> = Result<T, DbError>;

/// Error classes reported by a backend client.
///
/// `ConditionNotMet` and `RowConflict` are benign from the adapter's point of
/// view: the first maps to `Ok(false)` on conditional writes, the second is
/// retried on the ordered-range backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreErrorKind {
    ConditionNotMet,
    RowConflict,
    Other,
}

/// Error returned by a backend client implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        StoreError { kind, message: message.into() }
    }

    pub fn condition_not_met(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::ConditionNotMet, message)
    }

    pub fn row_conflict(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::RowConflict, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Other, message)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            StoreErrorKind::ConditionNotMet => write!(f, "condition not met: {}", self.message),
            StoreErrorKind::RowConflict => write!(f, "row conflict: {}", self.message),
            StoreErrorKind::Other => write!(f, "store error: {}", self.message),
        }
    }
}

impl Error for StoreError {}

/// The crate-wide error enum.
///
/// Schema and usage errors are raised before any backend I/O; planning errors
/// during request synthesis; the rest while executing against a client.
#[derive(Debug)]
pub enum DbError {
    // Schema errors
    UnknownModel(String),
    UnknownField { model: String, field: String },
    NotConditionable { model: String, field: String },
    InvalidValue { field: String, value: FieldValue },
    MissingField { model: String, field: String },
    UnexpectedField { model: String, field: String },

    // Builder usage errors
    DuplicateRootSelector,
    OrderAlreadySet,
    LimitAlreadySet,
    SliceSizeAlreadySet,
    OverrideAlreadySet,
    IncludesAllConflict,
    IncompatibleModifier(&'static str),
    ImmutableKeyViolation { field: String },

    // Planning errors
    UnresolvableConditions { model: String, conditions: String },
    ConflictingCondition { field: String },
    NonIntegerRangeBound { field: String },
    LostPrimaryKey { field: String },
    NonEqualityKeyCondition { field: String, operator: String },
    InvalidConditionFields { conditions: String },
    UnsupportedOrCondition,
    IndexNameCollision { model: String, index: String },

    // Execution errors
    NotFound { model: String, conditions: String },
    AmbiguousTarget { model: String, conditions: String },
    Backend(StoreError),
    ConflictRetriesExhausted { attempts: u32 },
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::UnknownModel(model) => write!(f, "unknown model {model:?}"),
            DbError::UnknownField { model, field } => {
                write!(f, "unknown field {field:?} in model {model:?}")
            }
            DbError::NotConditionable { model, field } => {
                write!(f, "field {field:?} in model {model:?} cannot appear in conditions")
            }
            DbError::InvalidValue { field, value } => {
                write!(f, "invalid value {value} for field {field:?}")
            }
            DbError::MissingField { model, field } => {
                write!(f, "missing field {field:?} in model {model:?}")
            }
            DbError::UnexpectedField { model, field } => {
                write!(f, "unexpected field {field:?} in model {model:?}")
            }
            DbError::DuplicateRootSelector => write!(f, "root condition already selected"),
            DbError::OrderAlreadySet => write!(f, "order already set"),
            DbError::LimitAlreadySet => write!(f, "limit already set"),
            DbError::SliceSizeAlreadySet => write!(f, "slice size already set"),
            DbError::OverrideAlreadySet => write!(f, "override already set"),
            DbError::IncludesAllConflict => {
                write!(f, "all() cannot be combined with field conditions")
            }
            DbError::IncompatibleModifier(name) => {
                write!(f, "modifier {name:?} is not applicable to this operation")
            }
            DbError::ImmutableKeyViolation { field } => {
                write!(f, "cannot change primary key {field:?}")
            }
            DbError::UnresolvableConditions { model, conditions } => {
                write!(
                    f,
                    "conditions cannot match any primary keys or index keys of {model:?}: {conditions}"
                )
            }
            DbError::ConflictingCondition { field } => {
                write!(f, "conflicting conditions on field {field:?}")
            }
            DbError::NonIntegerRangeBound { field } => {
                write!(f, "exclusive bound on field {field:?} requires an integer value")
            }
            DbError::LostPrimaryKey { field } => write!(f, "lost primary key {field:?}"),
            DbError::NonEqualityKeyCondition { field, operator } => {
                write!(f, "expect \"=\", invalid sign of {field:?}: {operator}")
            }
            DbError::InvalidConditionFields { conditions } => {
                write!(f, "invalid condition fields list: {conditions}")
            }
            DbError::UnsupportedOrCondition => {
                write!(f, "or-conditions are not supported by this backend")
            }
            DbError::IndexNameCollision { model, index } => {
                write!(f, "index name {index:?} collides in model {model:?}")
            }
            DbError::NotFound { model, conditions } => {
                write!(f, "no row found for {conditions} (model {model:?})")
            }
            DbError::AmbiguousTarget { model, conditions } => {
                write!(f, "conditions match more than one row: {conditions} (model {model:?})")
            }
            DbError::Backend(err) => write!(f, "{err}"),
            DbError::ConflictRetriesExhausted { attempts } => {
                write!(f, "row conflict persisted after {attempts} attempts")
            }
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DbError::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for DbError {
    fn from(err: StoreError) -> Self {
        DbError::Backend(err)
    }
}
