use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorCode};

/// Inbound authorize-phase call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodeRequest {
    /// Upstream request id. Generated when empty.
    pub id: String,
    pub client_id: String,
    pub response_types: Vec<String>,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Subject authenticated by the upstream login flow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Scopes the subject consented to.
    pub granted_scopes: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthorizePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub state: String,
    pub redirect_uri: String,
    pub granted_scopes: Vec<String>,
    pub handled_response_types: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

/// Result of an authorize call. `payload` is present iff `success`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<AuthorizePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl CodeResponse {
    pub fn success(payload: AuthorizePayload) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            failure: None,
        }
    }

    pub fn failure(failure: Failure) -> Self {
        Self {
            success: false,
            payload: None,
            failure: Some(failure),
        }
    }
}

/// Inbound exchange-phase call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenRequest {
    pub id: String,
    pub grant_type: String,
    pub code: String,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenPayload {
    pub access_token: String,
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// Result of an exchange call. `payload` is present iff `success`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<TokenPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl TokenResponse {
    pub fn success(payload: TokenPayload) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            failure: None,
        }
    }

    pub fn failure(failure: Failure) -> Self {
        Self {
            success: false,
            payload: None,
            failure: Some(failure),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Protocol,
    Server,
}

/// Wire form of a business failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub error: ErrorCode,
    pub description: String,
    pub status: u16,
}

impl Failure {
    pub fn new(kind: FailureKind, error: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            kind,
            error,
            description: description.into(),
            status: error.status(),
        }
    }

    /// Map any error to its wire form. Typed failures are forwarded as-is;
    /// anything else becomes a generic server failure and its cause is
    /// logged here.
    pub fn from_error(err: Error) -> Self {
        match err.classify() {
            Error::Validation { code, description } => {
                Failure::new(FailureKind::Validation, code, description)
            }
            Error::Protocol { code, description } => {
                Failure::new(FailureKind::Protocol, code, description)
            }
            Error::Server { description, cause } => {
                if let Some(cause) = cause {
                    tracing::error!("Request failed with internal error: {}", cause);
                }
                Failure::new(FailureKind::Server, ErrorCode::ServerError, description)
            }
            other => {
                tracing::error!("Unclassified error reached failure mapping: {}", other);
                Failure::new(
                    FailureKind::Server,
                    ErrorCode::ServerError,
                    crate::error::GENERIC_SERVER_ERROR,
                )
            }
        }
    }
}

impl From<Error> for Failure {
    fn from(err: Error) -> Self {
        Failure::from_error(err)
    }
}
