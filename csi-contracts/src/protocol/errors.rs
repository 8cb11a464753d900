// SPDX-License-Identifier: GPL-3.0-only

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CsiErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    Aborted,
    Unimplemented,
    DeadlineExceeded,
    Internal,
}

impl CsiErrorKind {
    /// gRPC status code carried by this kind
    pub fn code(self) -> u16 {
        match self {
            Self::InvalidArgument => 3,
            Self::DeadlineExceeded => 4,
            Self::NotFound => 5,
            Self::AlreadyExists => 6,
            Self::Aborted => 10,
            Self::Unimplemented => 12,
            Self::Internal => 13,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct CsiError {
    pub kind: CsiErrorKind,
    pub message: String,
}

impl CsiError {
    pub fn new(kind: CsiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(CsiErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(CsiErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(CsiErrorKind::AlreadyExists, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(CsiErrorKind::Aborted, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(CsiErrorKind::Unimplemented, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(CsiErrorKind::DeadlineExceeded, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CsiErrorKind::Internal, message)
    }

    pub fn code(&self) -> u16 {
        self.kind.code()
    }
}

/// Failure of a single storage backend call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("no device at {0}")]
    DeviceNotFound(String),

    #[error("property {key} of {device}: {reason}")]
    Property {
        device: String,
        key: String,
        reason: String,
    },

    #[error("{operation} failed: {reason}")]
    Call { operation: String, reason: String },

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    pub fn call(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Call {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Backend failures abort the lifecycle call; timeouts surface as a deadline miss.
impl From<BackendError> for CsiError {
    fn from(err: BackendError) -> Self {
        if err.is_timeout() {
            CsiError::deadline_exceeded(err.to_string())
        } else {
            CsiError::aborted(err.to_string())
        }
    }
}
