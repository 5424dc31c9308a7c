use std::collections::{BTreeMap, BTreeSet};

use crate::{
    error::{Error, Result},
    schema::{CodeRequest, TokenRequest},
};

pub const RESPONSE_TYPE_CODE: &str = "code";
pub const GRANT_TYPE_AUTHORIZATION_CODE: &str = "authorization_code";
pub const SCOPE_OPENID: &str = "openid";

/// Authorize-phase request. Immutable once constructed and owned by the unit
/// of work that processes it.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizeRequest {
    pub id: String,
    pub client_id: String,
    pub response_types: BTreeSet<String>,
    pub scopes: BTreeSet<String>,
    pub redirect_uri: String,
    pub state: String,
    pub nonce: Option<String>,
    pub subject: Option<String>,
    pub granted_scopes: BTreeSet<String>,
    pub extra: BTreeMap<String, String>,
}

impl AuthorizeRequest {
    pub fn is_oidc(&self) -> bool {
        self.scopes.contains(SCOPE_OPENID)
    }
}

impl TryFrom<CodeRequest> for AuthorizeRequest {
    type Error = Error;

    fn try_from(request: CodeRequest) -> Result<Self> {
        let response_types: BTreeSet<String> = request
            .response_types
            .into_iter()
            .filter(|t| !t.is_empty())
            .collect();
        if response_types.is_empty() {
            return Err(Error::invalid_request("response_type is required"));
        }

        Ok(AuthorizeRequest {
            id: request_id_or_new(request.id),
            client_id: request.client_id,
            response_types,
            scopes: request.scopes.into_iter().collect(),
            redirect_uri: request.redirect_uri,
            state: request.state,
            nonce: request.nonce.filter(|n| !n.is_empty()),
            subject: request.subject.filter(|s| !s.is_empty()),
            granted_scopes: request.granted_scopes.into_iter().collect(),
            extra: request.extra,
        })
    }
}

/// Exchange-phase request.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessRequest {
    pub id: String,
    pub grant_type: String,
    pub code: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub extra: BTreeMap<String, String>,
}

impl TryFrom<TokenRequest> for AccessRequest {
    type Error = Error;

    fn try_from(request: TokenRequest) -> Result<Self> {
        if request.grant_type.is_empty() {
            return Err(Error::invalid_request("grant_type is required"));
        }
        if request.code.is_empty() {
            return Err(Error::invalid_request("code is required"));
        }

        Ok(AccessRequest {
            id: request_id_or_new(request.id),
            grant_type: request.grant_type,
            code: request.code,
            client_id: request.client_id,
            client_secret: request.client_secret.filter(|s| !s.is_empty()),
            redirect_uri: request.redirect_uri,
            extra: request.extra,
        })
    }
}

fn request_id_or_new(id: String) -> String {
    if id.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_authorize_request_requires_response_types() {
        let err = AuthorizeRequest::try_from(CodeRequest {
            client_id: "app".into(),
            response_types: vec!["".into()],
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation {
                code: ErrorCode::InvalidRequest,
                ..
            }
        ));
    }

    #[test]
    fn test_authorize_request_generates_id_and_dedups() {
        let request = AuthorizeRequest::try_from(CodeRequest {
            client_id: "app".into(),
            response_types: vec!["code".into(), "code".into()],
            scopes: vec!["openid".into(), "profile".into()],
            nonce: Some(String::new()),
            ..Default::default()
        })
        .unwrap();
        assert!(!request.id.is_empty());
        assert_eq!(request.response_types.len(), 1);
        assert!(request.is_oidc());
        assert!(request.nonce.is_none());
    }

    #[test]
    fn test_access_request_requires_code() {
        let err = AccessRequest::try_from(TokenRequest {
            grant_type: GRANT_TYPE_AUTHORIZATION_CODE.into(),
            client_id: "app".into(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
