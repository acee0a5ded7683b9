use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{CommandResponse, HandleKind};

/// Failure raised synchronously by the backend client library.
///
/// The code and message are carried through to the frontend verbatim; the
/// gateway never reinterprets them.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct BackendError {
    pub code: String,
    pub message: String,
    pub detail: Option<Value>,
}

impl BackendError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            detail: None,
        }
    }

    /// Shorthand for the library's "illegal state" rejection.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::new("ILLEGAL_STATE", message)
    }

    /// Shorthand for the library's "illegal argument" rejection.
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::new("ILLEGAL_ARGUMENT", message)
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Errors returned by gateway commands.
///
/// Everything except `Backend` is detected before the backend is touched and
/// indicates a caller bug rather than an operational condition.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("{kind} handle already exists: {handle}")]
    AlreadyExists { kind: HandleKind, handle: String },

    #[error("{kind} handle not found: {handle}")]
    HandleNotFound { kind: HandleKind, handle: String },

    #[error("invalid state: {message}")]
    InvalidState { message: String },

    #[error("invalid argument `{name}`: {message}")]
    InvalidArgument { name: String, message: String },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl GatewayError {
    pub fn already_exists(kind: HandleKind, handle: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            handle: handle.into(),
        }
    }

    pub fn not_found(kind: HandleKind, handle: impl Into<String>) -> Self {
        Self::HandleNotFound {
            kind,
            handle: handle.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn invalid_argument(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Stable wire code. Backend failures keep the library's own code.
    pub fn code(&self) -> &str {
        match self {
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::HandleNotFound { .. } => "HANDLE_NOT_FOUND",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Backend(err) => &err.code,
        }
    }

    /// Returns `true` when the failure came from the backend library and
    /// should be surfaced to an end user rather than treated as a bug.
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

impl From<GatewayError> for CommandResponse {
    fn from(err: GatewayError) -> Self {
        let code = err.code().to_string();
        match err {
            GatewayError::Backend(BackendError { message, detail, .. }) => {
                CommandResponse::Error {
                    code,
                    message,
                    native_detail: detail,
                }
            }
            GatewayError::AlreadyExists { ref kind, ref handle }
            | GatewayError::HandleNotFound { ref kind, ref handle } => CommandResponse::Error {
                code,
                message: err.to_string(),
                native_detail: Some(serde_json::json!({ "kind": kind, "handle": handle })),
            },
            other => CommandResponse::Error {
                code,
                message: other.to_string(),
                native_detail: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_code_and_message_pass_through() {
        let err: GatewayError = BackendError::new("62", "Invalid device token").into();
        assert_eq!(err.code(), "62");
        assert!(err.is_operational());

        let response = CommandResponse::from(err);
        assert_eq!(
            response,
            CommandResponse::Error {
                code: "62".into(),
                message: "Invalid device token".into(),
                native_detail: None,
            }
        );
    }

    #[test]
    fn handle_errors_carry_kind_and_handle() {
        let err = GatewayError::not_found(HandleKind::Subscription, "s9");
        let response = CommandResponse::from(err);
        match response {
            CommandResponse::Error { code, native_detail, .. } => {
                assert_eq!(code, "HANDLE_NOT_FOUND");
                let detail = native_detail.expect("detail");
                assert_eq!(detail["kind"], "subscription");
                assert_eq!(detail["handle"], "s9");
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn caller_errors_are_not_operational() {
        assert!(!GatewayError::invalid_state("active").is_operational());
        assert_eq!(
            GatewayError::invalid_argument("mode", "bad").code(),
            "INVALID_ARGUMENT"
        );
    }
}
