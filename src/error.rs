use core::fmt;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failures of the store and of provisioning.
///
/// Every variant raised while writing a row names the entity and the
/// external key (handles and dates, never internal ids) so the source file
/// can be located.
#[derive(Debug)]
pub enum StoreError {
    /// Bad command line invocation.
    Usage(String),
    /// Target database or file is already present.
    AlreadyExists(String),
    /// Schema definition is unavailable.
    MissingDependency(String),
    /// A row failed a check, uniqueness or foreign-key rule.
    ConstraintViolation {
        entity: &'static str,
        key: String,
        detail: String,
    },
    /// The schema definition itself is malformed.
    Schema(String),
    /// A referenced org, site or day does not exist.
    NotFound { entity: &'static str, key: String },
    Connection(diesel::ConnectionError),
    Database(DieselError),
}

impl StoreError {
    pub fn constraint(entity: &'static str, key: impl Into<String>, detail: impl Into<String>) -> Self {
        StoreError::ConstraintViolation {
            entity,
            key: key.into(),
            detail: detail.into(),
        }
    }

    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// Attach row context to a diesel error, classifying constraint
    /// failures as [`StoreError::ConstraintViolation`].
    pub fn from_diesel(entity: &'static str, key: impl Into<String>, err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(kind, info) => {
                let is_constraint = matches!(
                    kind,
                    DatabaseErrorKind::UniqueViolation
                        | DatabaseErrorKind::ForeignKeyViolation
                        | DatabaseErrorKind::NotNullViolation
                        | DatabaseErrorKind::CheckViolation
                ) || info.message().contains("constraint failed");
                if is_constraint {
                    StoreError::constraint(entity, key, info.message())
                } else {
                    StoreError::Database(DieselError::DatabaseError(kind, info))
                }
            }
            other => StoreError::Database(other),
        }
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, StoreError::ConstraintViolation { .. })
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Usage(msg) => write!(f, "usage: {}", msg),
            StoreError::AlreadyExists(what) => write!(f, "{} already exists", what),
            StoreError::MissingDependency(msg) => write!(f, "missing dependency: {}", msg),
            StoreError::ConstraintViolation { entity, key, detail } => {
                write!(f, "constraint violation on {} {}: {}", entity, key, detail)
            }
            StoreError::Schema(msg) => write!(f, "schema error: {}", msg),
            StoreError::NotFound { entity, key } => write!(f, "{} {} not found", entity, key),
            StoreError::Connection(e) => write!(f, "connection error: {}", e),
            StoreError::Database(e) => write!(f, "database error: {}", e),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::Connection(e) => Some(e),
            StoreError::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DieselError> for StoreError {
    fn from(value: DieselError) -> Self {
        StoreError::from_diesel("row", "-", value)
    }
}

impl From<diesel::ConnectionError> for StoreError {
    fn from(value: diesel::ConnectionError) -> Self {
        StoreError::Connection(value)
    }
}
