use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database connection closed")]
    ConnectionClosed,
    #[error("database connection: {0}")]
    Connection(String),
    #[error("student with matric number {0} already exists")]
    DuplicateMatric(String),
    #[error("unknown student: {0}")]
    UnknownStudent(String),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("key file {}: {source}", path.display())]
    KeyFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("embedding key does not match this database (fingerprint {found}, expected {expected})")]
    KeyMismatch { expected: String, found: String },
    #[error("embedding cipher: {0}")]
    Cipher(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<tokio_rusqlite::Error<StoreError>> for StoreError {
    fn from(err: tokio_rusqlite::Error<StoreError>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => StoreError::ConnectionClosed,
            other => StoreError::Connection(other.to_string()),
        }
    }
}

impl StoreError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        StoreError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// True for UNIQUE / FOREIGN KEY / CHECK failures.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
