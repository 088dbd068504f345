use serde::Serialize;

/// Crate-wide error type. Every fallible function returns `Result<T, AppError>`.
/// Serializes as `{ error, kind }` so the relay and JSON logs get structured messages.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The initial read of a collection could not complete.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A batch commit failed after `batches_committed` batches had landed.
    #[error(
        "Batch commit failed after {batches_committed} committed batch(es) \
         ({records_updated} record(s) written): {reason}"
    )]
    PartialCommitFailure {
        batches_committed: usize,
        records_updated: usize,
        reason: String,
    },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("Object storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable discriminator, also used in the serialized form.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database",
            AppError::Pool(_) => "pool",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation",
            AppError::Io(_) => "io",
            AppError::Serde(_) => "serde",
            AppError::StoreUnavailable(_) => "store_unavailable",
            AppError::PartialCommitFailure { .. } => "partial_commit_failure",
            AppError::Auth(_) => "auth",
            AppError::UnsupportedMethod(_) => "unsupported_method",
            AppError::Storage(_) => "storage",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("error", &self.to_string())?;
        s.serialize_field("kind", self.kind())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_error_and_kind() {
        let err = AppError::Validation("path is empty".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "validation");
        assert_eq!(json["error"], "Validation error: path is empty");
    }

    #[test]
    fn test_partial_commit_message_carries_progress() {
        let err = AppError::PartialCommitFailure {
            batches_committed: 1,
            records_updated: 500,
            reason: "quota exceeded".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("1 committed batch"));
        assert!(msg.contains("500 record"));
        assert!(msg.contains("quota exceeded"));
        assert_eq!(err.kind(), "partial_commit_failure");
    }
}
