//! Error types for mongo-executer

use thiserror::Error;

/// Server error code reported for unique index violations.
pub const DUPLICATE_KEY_CODE: i32 = 11000;

/// Result type alias for mongo-executer operations
pub type Result<T> = std::result::Result<T, ExecuterError>;

/// Unified error type for all mongo-executer operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecuterError {
    /// Failure reported by the driver or the server, with the server code when known
    #[error("MongoDB error: {message}")]
    MongoDB { code: Option<i32>, message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Misuse detected before anything was sent to the server
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Unique index violation (server code 11000)
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl ExecuterError {
    /// Returns true if this is a constraint violation error
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, ExecuterError::Conflict(_))
    }

    /// Server error code, when known
    pub fn code(&self) -> Option<i32> {
        match self {
            ExecuterError::MongoDB { code, .. } => *code,
            ExecuterError::Conflict(_) => Some(DUPLICATE_KEY_CODE),
            _ => None,
        }
    }

    /// Classifies a driver failure. Code 11000 becomes `Conflict`; without a code,
    /// an `E11000` message does too.
    pub fn from_driver(code: Option<i32>, message: impl Into<String>) -> Self {
        let message = message.into();
        let duplicate = match code {
            Some(code) => code == DUPLICATE_KEY_CODE,
            None => is_duplicate_key_message(&message),
        };
        if duplicate {
            ExecuterError::Conflict(message)
        } else {
            ExecuterError::MongoDB { code, message }
        }
    }
}

fn is_duplicate_key_message(message: &str) -> bool {
    message.contains("E11000")
}

impl From<serde_json::Error> for ExecuterError {
    fn from(err: serde_json::Error) -> Self {
        ExecuterError::Serialization(err.to_string())
    }
}

/// First server code carried by a driver error.
#[cfg(feature = "mongodb-errors")]
fn server_code(err: &mongodb::error::Error) -> Option<i32> {
    use mongodb::error::{ErrorKind, WriteFailure};

    match err.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
        ErrorKind::Write(WriteFailure::WriteConcernError(concern)) => Some(concern.code),
        ErrorKind::InsertMany(insert_many) => insert_many
            .write_errors
            .as_ref()
            .and_then(|errors| errors.first())
            .map(|write| write.code)
            .or_else(|| {
                insert_many
                    .write_concern_error
                    .as_ref()
                    .map(|concern| concern.code)
            }),
        _ => None,
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for ExecuterError {
    fn from(err: mongodb::error::Error) -> Self {
        ExecuterError::from_driver(server_code(&err), err.to_string())
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for ExecuterError {
    fn from(err: bson::ser::Error) -> Self {
        ExecuterError::Serialization(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for ExecuterError {
    fn from(err: bson::de::Error) -> Self {
        ExecuterError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_mongodb() {
        let err = ExecuterError::MongoDB {
            code: None,
            message: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "MongoDB error: connection refused");
    }

    #[test]
    fn test_error_display_configuration() {
        let err = ExecuterError::Configuration("database name required".to_string());
        assert_eq!(err.to_string(), "Configuration error: database name required");
    }

    #[test]
    fn test_error_display_conflict() {
        let err = ExecuterError::Conflict("duplicate key value".to_string());
        assert_eq!(err.to_string(), "Conflict: duplicate key value");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: ExecuterError = json_err.into();
        assert!(matches!(err, ExecuterError::Serialization(_)));
    }

    #[test]
    fn test_driver_code_is_kept() {
        let err = ExecuterError::from_driver(
            Some(291),
            "error processing query: planner returned error :: caused by :: No indexed plans available, and running with 'notablescan'",
        );
        assert!(!err.is_constraint_violation());
        assert_eq!(err.code(), Some(291));
    }

    #[test]
    fn test_duplicate_key_classified_by_code() {
        let dup = ExecuterError::from_driver(Some(DUPLICATE_KEY_CODE), "write failed");
        assert!(dup.is_constraint_violation());
        assert_eq!(dup.code(), Some(DUPLICATE_KEY_CODE));

        // The code wins over message text.
        let not_dup = ExecuterError::from_driver(Some(2), "E11000 appears in a value");
        assert_eq!(not_dup.code(), Some(2));
        assert!(!not_dup.is_constraint_violation());
    }

    #[test]
    fn test_duplicate_key_message_without_code() {
        let dup = ExecuterError::from_driver(
            None,
            "E11000 duplicate key error collection: app.users index: _id_ dup key: { _id: \"a1\" }",
        );
        assert!(dup.is_constraint_violation());

        let other = ExecuterError::from_driver(None, "error processing query");
        assert!(matches!(other, ExecuterError::MongoDB { code: None, .. }));
        assert_eq!(other.code(), None);
    }

    #[test]
    fn test_is_constraint_violation() {
        assert!(ExecuterError::Conflict("test".to_string()).is_constraint_violation());
        assert!(!ExecuterError::Query("test".to_string()).is_constraint_violation());
        assert!(!ExecuterError::Validation("test".to_string()).is_constraint_violation());
    }
}
