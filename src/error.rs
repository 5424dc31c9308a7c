use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Description used whenever an untyped failure is surfaced to a caller.
pub const GENERIC_SERVER_ERROR: &str =
    "The authorization server encountered an unexpected condition.";

/// OAuth 2.0 error codes as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    UnsupportedResponseType,
    InvalidScope,
    AccessDenied,
    ServerError,
    TemporarilyUnavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::InvalidClient => "invalid_client",
            ErrorCode::InvalidGrant => "invalid_grant",
            ErrorCode::UnauthorizedClient => "unauthorized_client",
            ErrorCode::UnsupportedGrantType => "unsupported_grant_type",
            ErrorCode::UnsupportedResponseType => "unsupported_response_type",
            ErrorCode::InvalidScope => "invalid_scope",
            ErrorCode::AccessDenied => "access_denied",
            ErrorCode::ServerError => "server_error",
            ErrorCode::TemporarilyUnavailable => "temporarily_unavailable",
        }
    }

    /// HTTP status an edge proxy should use when rendering this code.
    pub fn status(&self) -> u16 {
        match self {
            ErrorCode::InvalidClient => 401,
            ErrorCode::AccessDenied | ErrorCode::UnauthorizedClient => 403,
            ErrorCode::ServerError => 500,
            ErrorCode::TemporarilyUnavailable => 503,
            _ => 400,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// A request violated a protocol precondition before any handler ran.
    #[error("{code}: {description}")]
    Validation {
        code: ErrorCode,
        description: String,
    },

    /// A handler detected a semantic problem with the grant.
    #[error("{code}: {description}")]
    Protocol {
        code: ErrorCode,
        description: String,
    },

    /// A server-side failure that is safe to describe to the caller.
    /// `cause` carries diagnostics that must stay in the logs.
    #[error("server_error: {description}")]
    Server {
        description: String,
        cause: Option<String>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transport disconnected")]
    TransportDisconnected,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid message format: {message}")]
    InvalidMessageFormat { message: String },

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Session store error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unit of work cancelled")]
    Cancelled,

    #[error("Worker pool closed")]
    PoolClosed,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl Error {
    pub fn validation(code: ErrorCode, description: impl Into<String>) -> Self {
        Error::Validation {
            code,
            description: description.into(),
        }
    }

    pub fn protocol(code: ErrorCode, description: impl Into<String>) -> Self {
        Error::Protocol {
            code,
            description: description.into(),
        }
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::validation(ErrorCode::InvalidRequest, description)
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::protocol(ErrorCode::InvalidGrant, description)
    }

    /// A server-kind error whose description is shown to the caller as-is.
    pub fn server(description: impl Into<String>) -> Self {
        Error::Server {
            description: description.into(),
            cause: None,
        }
    }

    /// Wrap an arbitrary error as a server-kind error. The original message
    /// is kept for diagnostics only.
    pub fn wrapped(err: impl std::fmt::Display) -> Self {
        Error::Server {
            description: GENERIC_SERVER_ERROR.to_string(),
            cause: Some(err.to_string()),
        }
    }

    /// Errors that already carry a wire-level classification.
    pub fn is_typed(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. } | Error::Protocol { .. } | Error::Server { .. }
        )
    }

    /// Validators report through the validation kind no matter which
    /// constructor they used.
    pub fn into_validation(self) -> Self {
        match self {
            Error::Protocol { code, description } => Error::Validation { code, description },
            other => other,
        }
    }

    /// Classify this error for the wire, wrapping anything untyped.
    pub fn classify(self) -> Self {
        if self.is_typed() {
            self
        } else {
            Error::wrapped(self)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
