//! Error types for plugbridge.
//!
//! Every failure that can cross the process boundary is a `BridgeError`. Each
//! variant belongs to one of three classes (see [`ErrorKind`]) so a host can
//! tell a dropped connection apart from a backend rejecting a request, and
//! both apart from calling an operation at the wrong point in the lifecycle.

use crate::ipc::protocol::IpcError;
use crate::lifecycle::LifecycleState;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::any::Any;
use thiserror::Error;

/// Classification attached to every error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection, marshalling or framework failure. The request may never
    /// have reached the backend.
    Transport,
    /// The backend's own logic rejected the request.
    Application,
    /// The operation is not valid in the backend's current lifecycle state.
    Lifecycle,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Application => "application",
            ErrorKind::Lifecycle => "lifecycle",
        };
        f.write_str(s)
    }
}

/// Main error type for plugbridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    // Transport / framework errors
    #[error("Connection to {peer} lost")]
    ConnectionLost { peer: String },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Encode error: {message}")]
    Encode { message: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Invalid params for {method}: {message}")]
    InvalidParams { method: String, message: String },

    #[error("Request context carries no namespace")]
    MissingNamespace,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Unknown plugin: {name}")]
    UnknownPlugin { name: String },

    #[error("Plugin handshake failed: {message}")]
    Handshake { message: String },

    #[error("Remote error {code}: {message}")]
    Remote { code: i32, message: String },

    // Application errors
    #[error("{message}")]
    Application { message: String },

    #[error("Unsupported operation '{operation}' on path '{path}'")]
    UnsupportedOperation { operation: String, path: String },

    #[error("Unsupported path: {path}")]
    UnsupportedPath { path: String },

    #[error("Backend panicked during {operation}: {message}")]
    Panicked { operation: String, message: String },

    // Lifecycle errors
    #[error("{operation} is not valid while the backend is {state}")]
    LifecycleViolation {
        operation: String,
        state: LifecycleState,
    },

    #[error("backend terminated")]
    Terminated,
}

/// Result type alias for plugbridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl BridgeError {
    /// Shorthand for a backend rejecting a request.
    pub fn application(message: impl Into<String>) -> Self {
        BridgeError::Application {
            message: message.into(),
        }
    }

    /// A panic caught while running `operation`.
    pub fn panicked(operation: impl Into<String>, payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        BridgeError::Panicked {
            operation: operation.into(),
            message,
        }
    }

    /// Shorthand for an operation outside its valid lifecycle state.
    pub fn lifecycle(operation: impl Into<String>, state: LifecycleState) -> Self {
        if state == LifecycleState::Terminated {
            return BridgeError::Terminated;
        }
        BridgeError::LifecycleViolation {
            operation: operation.into(),
            state,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Application { .. }
            | BridgeError::UnsupportedOperation { .. }
            | BridgeError::UnsupportedPath { .. }
            | BridgeError::Panicked { .. } => ErrorKind::Application,

            BridgeError::LifecycleViolation { .. } | BridgeError::Terminated => {
                ErrorKind::Lifecycle
            }

            _ => ErrorKind::Transport,
        }
    }

    /// Check if a host could reasonably retry after this error.
    ///
    /// The bridge itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::ConnectionLost { .. }
                | BridgeError::Io { .. }
                | BridgeError::DeadlineExceeded
        )
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: Connection lost
    /// - -32001: Deadline exceeded
    /// - -32002: Cancelled
    /// - -32003: Missing namespace
    /// - -32004: Encode error
    /// - -32005: IO error on the peer
    /// - -32010: Application error
    /// - -32011: Unsupported operation
    /// - -32012: Unsupported path
    /// - -32013: Backend panicked
    /// - -32020: Lifecycle violation
    /// - -32021: Backend terminated
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            BridgeError::Decode { .. } | BridgeError::Json { .. } => -32700,
            BridgeError::MethodNotFound { .. } => -32601,
            BridgeError::InvalidParams { .. } => -32602,

            BridgeError::ConnectionLost { .. } => -32000,
            BridgeError::DeadlineExceeded => -32001,
            BridgeError::Cancelled => -32002,
            BridgeError::MissingNamespace => -32003,
            BridgeError::Encode { .. } => -32004,
            BridgeError::Io { .. } => -32005,

            BridgeError::Application { .. } => -32010,
            BridgeError::UnsupportedOperation { .. } => -32011,
            BridgeError::UnsupportedPath { .. } => -32012,
            BridgeError::Panicked { .. } => -32013,

            BridgeError::LifecycleViolation { .. } => -32020,
            BridgeError::Terminated => -32021,

            BridgeError::Remote { code, .. } => *code,

            // All other errors are internal errors
            _ => -32603,
        }
    }

    /// Build the JSON-RPC error object sent to the peer.
    ///
    /// `data` carries the fields needed to rebuild the same variant on the
    /// other side, plus the error class.
    pub fn to_ipc_error(&self) -> IpcError {
        let mut data = json!({ "kind": self.kind() });
        match self {
            BridgeError::MethodNotFound { method } => {
                data["method"] = json!(method);
            }
            BridgeError::InvalidParams { method, message } => {
                data["method"] = json!(method);
                data["detail"] = json!(message);
            }
            BridgeError::Application { message } => {
                data["detail"] = json!(message);
            }
            BridgeError::UnsupportedOperation { operation, path } => {
                data["operation"] = json!(operation);
                data["path"] = json!(path);
            }
            BridgeError::UnsupportedPath { path } => {
                data["path"] = json!(path);
            }
            BridgeError::Panicked { operation, message } => {
                data["operation"] = json!(operation);
                data["detail"] = json!(message);
            }
            BridgeError::LifecycleViolation { operation, state } => {
                data["operation"] = json!(operation);
                data["state"] = json!(state);
            }
            BridgeError::Encode { message }
            | BridgeError::Decode { message }
            | BridgeError::Io { message, .. } => {
                data["detail"] = json!(message);
            }
            _ => {}
        }

        IpcError {
            code: self.to_rpc_error_code(),
            message: self.to_string(),
            data: Some(data),
        }
    }

    /// Rebuild an error received from the peer.
    ///
    /// Codes this side does not recognize come back as `Remote`, which is
    /// classified as a transport error.
    pub fn from_ipc_error(err: IpcError) -> Self {
        let data = err.data.unwrap_or(serde_json::Value::Null);
        let field = |name: &str| data.get(name).and_then(|v| v.as_str()).map(str::to_string);
        let detail = field("detail").unwrap_or_else(|| err.message.clone());

        match err.code {
            -32700 | -32600 => BridgeError::Decode { message: detail },
            -32601 => BridgeError::MethodNotFound {
                method: field("method").unwrap_or_default(),
            },
            -32602 => BridgeError::InvalidParams {
                method: field("method").unwrap_or_default(),
                message: detail,
            },
            -32000 => BridgeError::ConnectionLost { peer: err.message },
            -32001 => BridgeError::DeadlineExceeded,
            -32002 => BridgeError::Cancelled,
            -32003 => BridgeError::MissingNamespace,
            -32004 => BridgeError::Encode { message: detail },
            -32005 => BridgeError::Io {
                message: detail,
                source: None,
            },
            -32010 => BridgeError::Application { message: detail },
            -32011 => BridgeError::UnsupportedOperation {
                operation: field("operation").unwrap_or_default(),
                path: field("path").unwrap_or_default(),
            },
            -32012 => BridgeError::UnsupportedPath {
                path: field("path").unwrap_or_default(),
            },
            -32013 => BridgeError::Panicked {
                operation: field("operation").unwrap_or_default(),
                message: detail,
            },
            -32020 => {
                let state = data
                    .get("state")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok());
                match state {
                    Some(state) => BridgeError::LifecycleViolation {
                        operation: field("operation").unwrap_or_default(),
                        state,
                    },
                    None => BridgeError::Remote {
                        code: err.code,
                        message: err.message,
                    },
                }
            }
            -32021 => BridgeError::Terminated,
            code => BridgeError::Remote {
                code,
                message: err.message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn through_wire(err: BridgeError) -> BridgeError {
        let wire = serde_json::to_string(&err.to_ipc_error()).unwrap();
        BridgeError::from_ipc_error(serde_json::from_str(&wire).unwrap())
    }

    #[test]
    fn test_error_display() {
        let err = BridgeError::UnsupportedOperation {
            operation: "delete".into(),
            path: "internal".into(),
        };
        assert_eq!(
            err.to_string(),
            "Unsupported operation 'delete' on path 'internal'"
        );
        assert_eq!(BridgeError::Terminated.to_string(), "backend terminated");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(BridgeError::application("nope").kind(), ErrorKind::Application);
        assert_eq!(BridgeError::DeadlineExceeded.kind(), ErrorKind::Transport);
        assert_eq!(BridgeError::MissingNamespace.kind(), ErrorKind::Transport);
        assert_eq!(
            BridgeError::lifecycle("handle_request", LifecycleState::Uninitialized).kind(),
            ErrorKind::Lifecycle
        );
    }

    #[test]
    fn test_lifecycle_shorthand_maps_terminated() {
        let err = BridgeError::lifecycle("handle_request", LifecycleState::Terminated);
        assert!(matches!(err, BridgeError::Terminated));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(BridgeError::DeadlineExceeded.is_retryable());
        assert!(BridgeError::ConnectionLost { peer: "x".into() }.is_retryable());
        assert!(!BridgeError::application("bad path").is_retryable());
        assert!(!BridgeError::Terminated.is_retryable());
    }

    #[test]
    fn test_application_message_is_verbatim_across_wire() {
        let err = through_wire(BridgeError::application("invalid path: kv"));
        match err {
            BridgeError::Application { message } => assert_eq!(message, "invalid path: kv"),
            other => panic!("Expected Application, got: {:?}", other),
        }
    }

    #[test]
    fn test_lifecycle_violation_survives_wire() {
        let err = through_wire(BridgeError::lifecycle(
            "handle_request",
            LifecycleState::Configured,
        ));
        match err {
            BridgeError::LifecycleViolation { operation, state } => {
                assert_eq!(operation, "handle_request");
                assert_eq!(state, LifecycleState::Configured);
            }
            other => panic!("Expected LifecycleViolation, got: {:?}", other),
        }
    }

    #[test]
    fn test_io_error_is_not_mistaken_for_connection_loss() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "storage file locked");
        let err = through_wire(BridgeError::from(io));
        match &err {
            BridgeError::Io { message, source } => {
                assert_eq!(message, "storage file locked");
                assert!(source.is_none());
            }
            other => panic!("Expected Io, got: {:?}", other),
        }
        assert_eq!(err.to_string(), "IO error: storage file locked");
        assert!(err.is_retryable());

        let lost = through_wire(BridgeError::ConnectionLost {
            peer: "127.0.0.1:4000".into(),
        });
        assert!(matches!(lost, BridgeError::ConnectionLost { .. }));
    }

    #[test]
    fn test_panic_payloads() {
        let err = BridgeError::panicked("system", &"static message");
        match err {
            BridgeError::Panicked { operation, message } => {
                assert_eq!(operation, "system");
                assert_eq!(message, "static message");
            }
            other => panic!("Expected Panicked, got: {:?}", other),
        }

        let owned: Box<dyn Any + Send> = Box::new(format!("code {}", 7));
        let err = BridgeError::panicked("logger", owned.as_ref());
        assert!(matches!(err, BridgeError::Panicked { message, .. } if message == "code 7"));

        let err = BridgeError::panicked("logger", &42u8);
        assert!(
            matches!(err, BridgeError::Panicked { message, .. } if message == "unknown panic payload")
        );
    }

    #[test]
    fn test_unknown_code_is_transport() {
        let err = BridgeError::from_ipc_error(IpcError {
            code: -31999,
            message: "weird".into(),
            data: None,
        });
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.to_rpc_error_code(), -31999);
    }
}
