use thiserror::Error;
use uuid::Uuid;

/// Error types for run persistence
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error(
        "Concurrent modification detected for {entity} {uuid} \
         (expected version {expected_version})"
    )]
    ConcurrentModification {
        entity: &'static str,
        uuid: Uuid,
        expected_version: i64,
    },

    #[error("Record not found: {entity} {uuid}")]
    RecordNotFound { entity: &'static str, uuid: Uuid },

    #[error("Duplicate record: {entity} {key}")]
    Duplicate { entity: &'static str, key: String },

    #[error("Invalid stored data in {field}: {reason}")]
    InvalidData { field: &'static str, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PersistenceError {
    pub fn is_concurrent_modification(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}

/// Result type alias for persistence operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let uuid = Uuid::nil();
        let err = PersistenceError::ConcurrentModification {
            entity: "pipeline_run",
            uuid,
            expected_version: 4,
        };
        assert!(err.is_concurrent_modification());
        assert_eq!(
            err.to_string(),
            format!("Concurrent modification detected for pipeline_run {uuid} (expected version 4)")
        );

        let err = PersistenceError::RecordNotFound {
            entity: "workflow_run",
            uuid,
        };
        assert!(!err.is_concurrent_modification());
        assert_eq!(err.to_string(), format!("Record not found: workflow_run {uuid}"));
    }
}
