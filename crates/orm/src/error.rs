//! Error types for the ORM
//!
//! Every fallible operation returns [`OrmResult`]. Errors are grouped into
//! [`ErrorKind`]s so callers can decide what to do without matching on
//! message text: programmer errors are bugs in model declarations or call
//! sites, validation errors are fixable input, constraint and connection
//! errors come from the database, and transaction-state errors come from
//! misuse of the handle's state machine.

use std::fmt;

/// Result type alias for ORM operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Coarse classification of an [`OrmError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Programmer,
    Validation,
    Constraint,
    Connection,
    TransactionState,
    NotFound,
    Database,
    Serialization,
    Configuration,
}

/// Which database constraint rejected a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    NotNull,
    Check,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConstraintKind::Unique => "unique",
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::NotNull => "not null",
            ConstraintKind::Check => "check",
        };
        f.write_str(name)
    }
}

/// Error type for ORM operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum OrmError {
    /// Misuse of the API: register after seal, unknown model or column, bad tag
    #[error("Programmer error: {0}")]
    Programmer(String),

    /// Input rejected before reaching the database
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation needs a primary key value the model does not carry
    #[error("Primary key is missing or zero for model '{0}'")]
    MissingPrimaryKey(String),

    /// Constraint violation reported by the database
    #[error("Constraint violation ({kind}): {message}")]
    Constraint { kind: ConstraintKind, message: String },

    /// Network, TLS or pool failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Commit/rollback without a transaction, or use of a closed handle
    #[error("Transaction error: {0}")]
    TransactionState(String),

    /// No row matched
    #[error("Record not found in table '{0}'")]
    NotFound(String),

    /// Any other driver error, message kept verbatim
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl OrmError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrmError::Programmer(_) => ErrorKind::Programmer,
            OrmError::Validation(_) | OrmError::MissingPrimaryKey(_) => ErrorKind::Validation,
            OrmError::Constraint { .. } => ErrorKind::Constraint,
            OrmError::Connection(_) => ErrorKind::Connection,
            OrmError::TransactionState(_) => ErrorKind::TransactionState,
            OrmError::NotFound(_) => ErrorKind::NotFound,
            OrmError::Database(_) => ErrorKind::Database,
            OrmError::Serialization(_) => ErrorKind::Serialization,
            OrmError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    pub fn is_programmer_error(&self) -> bool {
        self.kind() == ErrorKind::Programmer
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// A requested column or field is not part of the model
    pub fn unknown_column(model: &str, column: &str) -> Self {
        OrmError::Programmer(format!("model '{}' has no column or field '{}'", model, column))
    }

    /// A model's `ModelFields` accessor was asked for a field it does not know
    pub fn unknown_field(model: &str, field: &str) -> Self {
        OrmError::Programmer(format!("model '{}' does not expose field '{}'", model, field))
    }

    /// A model type was used before being registered
    pub fn unregistered(model: &str) -> Self {
        OrmError::Programmer(format!("model '{}' is not registered", model))
    }
}

// Convert from serde_json errors
impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        OrmError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for OrmError {
    fn from(err: url::ParseError) -> Self {
        OrmError::Configuration(format!("invalid data source: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(OrmError::unregistered("User").kind(), ErrorKind::Programmer);
        assert_eq!(OrmError::MissingPrimaryKey("User".into()).kind(), ErrorKind::Validation);
        assert_eq!(
            OrmError::Constraint { kind: ConstraintKind::Unique, message: "dup".into() }.kind(),
            ErrorKind::Constraint
        );
        assert!(OrmError::NotFound("user".into()).is_not_found());
        assert!(OrmError::unknown_column("User", "nope").is_programmer_error());
    }

    #[test]
    fn test_constraint_display_keeps_driver_message() {
        let err = OrmError::Constraint {
            kind: ConstraintKind::ForeignKey,
            message: "FOREIGN KEY constraint failed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Constraint violation (foreign key): FOREIGN KEY constraint failed"
        );
    }
}
