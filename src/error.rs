//! Shared error taxonomy for the gateway.
//!
//! Every component exposes its own leaf error enum (see
//! [`crate::codec::CodecError`], [`crate::parambus::AdapterError`],
//! [`crate::translator::TranslatorError`], [`crate::engine::TransactionError`])
//! and converts into [`GatewayError`] at the point where a status code must be
//! produced, feeding every subsystem's own `thiserror` enum into a single
//! reply path.

use thiserror::Error;

use crate::{codec::CodecError, engine::TransactionError, parambus::AdapterError, translator::TranslatorError};

/// Error taxonomy independent of any particular wire format.
///
/// Each variant maps to exactly one HTTP-shaped status code via
/// [`GatewayError::status_code`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Malformed JSON, missing required fields, or fields of the wrong type.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// No authentication context was presented for an operation that requires one.
    #[error("unauthenticated")]
    Unauthenticated,
    /// The caller authenticated but lacks permission for the requested resource.
    #[error("forbidden")]
    Forbidden,
    /// The requested parameter or table row does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The operation did not complete within its allotted time budget.
    #[error("timeout")]
    Timeout,
    /// An `ADD_ROW`-style operation targeted a parameter that already exists.
    #[error("conflict: {0}")]
    Conflict(String),
    /// A `TEST_AND_SET` precondition did not hold.
    #[error("precondition failed")]
    PreconditionFailed,
    /// The parameter bus rejected the value during coercion.
    #[error("unprocessable: {0}")]
    Unprocessable(String),
    /// The target resource is locked against concurrent modification.
    #[error("locked")]
    Locked,
    /// The caller has exceeded a rate limit.
    #[error("too many requests")]
    TooManyRequests,
    /// An unclassified local or parameter-bus failure.
    #[error("internal error: {0}")]
    Internal(String),
    /// The requested operation is recognized but not implemented.
    #[error("not implemented")]
    NotImplemented,
    /// The parameter bus is not connected, or a required resource is exhausted.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    /// Map this error to its HTTP-shaped status code.
    ///
    /// `Partial` (207) is not represented here: it is a property of a
    /// *composite* response, derived by the translator from the mix of
    /// per-entry successes and failures, not of any single error value.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::Unauthenticated => 401,
            Self::Forbidden => 403,
            Self::NotFound(_) => 404,
            Self::Timeout => 408,
            Self::Conflict(_) => 409,
            Self::PreconditionFailed => 412,
            Self::Unprocessable(_) => 422,
            Self::Locked => 423,
            Self::TooManyRequests => 429,
            Self::Internal(_) => 500,
            Self::NotImplemented => 501,
            Self::Unavailable(_) => 503,
        }
    }
}

impl From<CodecError> for GatewayError {
    fn from(err: CodecError) -> Self { Self::Unprocessable(err.to_string()) }
}

impl From<AdapterError> for GatewayError {
    /// Apply the fixed parambus-error-to-taxonomy mapping.
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::NotFound(name) => Self::NotFound(name),
            AdapterError::AccessDenied(_) => Self::Forbidden,
            AdapterError::Timeout => Self::Timeout,
            AdapterError::InvalidValue(msg) => Self::Unprocessable(msg),
            AdapterError::AlreadyExists(name) => Self::Conflict(name),
            AdapterError::NotConnected => Self::Unavailable("parameter bus not connected".into()),
            AdapterError::Busy => Self::Locked,
            AdapterError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<TranslatorError> for GatewayError {
    fn from(err: TranslatorError) -> Self {
        match err {
            TranslatorError::InvalidRequest(msg) => Self::InvalidRequest(msg),
        }
    }
}

impl From<TransactionError> for GatewayError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::TooLarge(msg) | TransactionError::InvalidParam(msg) => {
                Self::InvalidRequest(msg)
            }
            TransactionError::RollbackFailed(msg) => Self::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(GatewayError::InvalidRequest("x".into()), 400)]
    #[case(GatewayError::Unauthenticated, 401)]
    #[case(GatewayError::Forbidden, 403)]
    #[case(GatewayError::NotFound("x".into()), 404)]
    #[case(GatewayError::Timeout, 408)]
    #[case(GatewayError::Conflict("x".into()), 409)]
    #[case(GatewayError::PreconditionFailed, 412)]
    #[case(GatewayError::Unprocessable("x".into()), 422)]
    #[case(GatewayError::Locked, 423)]
    #[case(GatewayError::TooManyRequests, 429)]
    #[case(GatewayError::Internal("x".into()), 500)]
    #[case(GatewayError::NotImplemented, 501)]
    #[case(GatewayError::Unavailable("x".into()), 503)]
    fn status_code_matches_taxonomy(#[case] err: GatewayError, #[case] expected: u16) {
        assert_eq!(err.status_code(), expected);
    }

    #[test]
    fn adapter_not_found_maps_to_404() {
        let err: GatewayError = AdapterError::NotFound("Device.Foo".into()).into();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn adapter_busy_maps_to_locked() {
        let err: GatewayError = AdapterError::Busy.into();
        assert_eq!(err.status_code(), 423);
    }
}
