use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Unauthorized,
    Assignment,
    Internal,
}

impl ErrorKind {
    /// Stable code used in IPC error envelopes.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Assignment => "assignment_failed",
            ErrorKind::Internal => "internal",
        }
    }

    /// HTTP-equivalent status, reported in error details.
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Conflict => 409,
            ErrorKind::NotFound => 404,
            ErrorKind::Unauthorized => 403,
            ErrorKind::Assignment => 502,
            ErrorKind::Internal => 500,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RecoveryError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("assignment rejected: {0}")]
    Assignment(String),
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RecoveryError {
    pub fn validation(message: impl Into<String>) -> Self {
        RecoveryError::Validation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RecoveryError::Validation(_) | RecoveryError::Csv(_) => ErrorKind::Validation,
            RecoveryError::Conflict(_) => ErrorKind::Conflict,
            RecoveryError::NotFound(_) => ErrorKind::NotFound,
            RecoveryError::Unauthorized(_) => ErrorKind::Unauthorized,
            RecoveryError::Assignment(_) => ErrorKind::Assignment,
            RecoveryError::Db(e) if is_unique_violation(e) => ErrorKind::Conflict,
            RecoveryError::Db(_)
            | RecoveryError::Io(_)
            | RecoveryError::Json(_)
            | RecoveryError::Other(_) => ErrorKind::Internal,
        }
    }
}

/// True for SQLite UNIQUE / PRIMARY KEY constraint failures.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(f, _) => {
            f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

pub type Result<T> = std::result::Result<T, RecoveryError>;
