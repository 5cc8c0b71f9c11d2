use thiserror::Error;

/// Engine-level errors surfaced by the synchronizer, scoring engine and
/// response intake.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Survey content is locked while active: {survey_id}")]
    Permission { survey_id: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Transaction aborted, no changes applied: {message}")]
    Atomicity { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Constraint violated: {message}")]
    Constraint { message: String },

    #[error("{entity} row not found: {id}")]
    RowNotFound { entity: &'static str, id: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl EngineError {
    /// True when the underlying cause is a uniqueness constraint violation.
    ///
    /// Intake uses this to translate duplicate inserts into [`EngineError::Conflict`].
    pub fn is_constraint(&self) -> bool {
        matches!(self, EngineError::Storage(StorageError::Constraint { .. }))
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
