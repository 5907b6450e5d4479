use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Failure classes surfaced to export callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidParam,
    NotFound,
    MountFailed,
    CopyFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidParam => "INVALID_PARAM",
            Self::NotFound => "NOT_FOUND",
            Self::MountFailed => "MOUNT_FAILED",
            Self::CopyFailed => "COPY_FAILED",
        }
    }

    /// Numeric code used by the controller firmware's status register.
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::NotFound => -2,
            Self::MountFailed => -3,
            Self::CopyFailed => -4,
            Self::InvalidParam => -5,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    MountFailed(String),
    #[error("{0}")]
    CopyFailed(String),
}

impl ExportError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidParam(_) => ErrorCode::InvalidParam,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::MountFailed(_) => ErrorCode::MountFailed,
            Self::CopyFailed(_) => ErrorCode::CopyFailed,
        }
    }
}

/// Terminal result of one export attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Success {
        bytes_copied: u64,
        files_copied: usize,
        destination_path: PathBuf,
    },
    Failure {
        code: ErrorCode,
        message: String,
    },
}

impl ExportOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { code, .. } => Some(*code),
        }
    }
}

impl From<&ExportError> for ExportOutcome {
    fn from(err: &ExportError) -> Self {
        Self::Failure {
            code: err.code(),
            message: err.to_string(),
        }
    }
}
