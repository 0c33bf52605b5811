// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for conveyor-core.
//!
//! Store outcomes that callers branch on (not found, duplicate key) are
//! distinct variants rather than being folded into a generic failure, since
//! "already exists" is an expected concurrent outcome on the intake path.

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors raised by the request store.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// No request with this correlation id exists in the tenant.
    RequestNotFound {
        /// The correlation id that was not found.
        correlation_id: String,
    },

    /// A request with this correlation id already exists in the tenant.
    DuplicateCorrelationId {
        /// The tenant the conflict occurred in.
        tenant: String,
        /// The conflicting correlation id.
        correlation_id: String,
    },

    /// A stored state code could not be parsed back into a lifecycle state.
    UnknownStateCode {
        /// The unparseable code.
        code: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RequestNotFound { .. } => "REQUEST_NOT_FOUND",
            Self::DuplicateCorrelationId { .. } => "DUPLICATE_CORRELATION_ID",
            Self::UnknownStateCode { .. } => "UNKNOWN_STATE_CODE",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestNotFound { correlation_id } => {
                write!(f, "Request '{}' not found", correlation_id)
            }
            Self::DuplicateCorrelationId {
                tenant,
                correlation_id,
            } => {
                write!(
                    f,
                    "Request '{}' already exists in tenant '{}'",
                    correlation_id, tenant
                )
            }
            Self::UnknownStateCode { code } => {
                write!(f, "Unknown lifecycle state code '{}'", code)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}
