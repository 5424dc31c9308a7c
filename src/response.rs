use std::collections::{BTreeMap, BTreeSet};

use crate::{
    request::AuthorizeRequest,
    schema::{AuthorizePayload, TokenPayload},
    session::CodeSession,
};

/// Accumulator filled in place by the authorize handler chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthorizeResponse {
    pub handled_response_types: BTreeSet<String>,
    pub code: Option<String>,
    pub state: String,
    pub redirect_uri: String,
    pub granted_scopes: BTreeSet<String>,
    /// Extra redirect parameters contributed by handlers.
    pub params: BTreeMap<String, String>,
}

impl AuthorizeResponse {
    pub fn new(request: &AuthorizeRequest) -> Self {
        Self {
            state: request.state.clone(),
            redirect_uri: request.redirect_uri.clone(),
            ..Default::default()
        }
    }

    /// Record that a handler produced the artifact for `response_type`.
    pub fn handle_response_type(&mut self, response_type: impl Into<String>) {
        self.handled_response_types.insert(response_type.into());
    }

    pub fn handles_all(&self, requested: &BTreeSet<String>) -> bool {
        requested.is_subset(&self.handled_response_types)
    }
}

impl From<AuthorizeResponse> for AuthorizePayload {
    fn from(response: AuthorizeResponse) -> Self {
        AuthorizePayload {
            code: response.code,
            state: response.state,
            redirect_uri: response.redirect_uri,
            granted_scopes: response.granted_scopes.into_iter().collect(),
            handled_response_types: response.handled_response_types.into_iter().collect(),
            params: response.params,
        }
    }
}

/// Accumulator for tokens issued during the exchange phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenEndpointResponse {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub scopes: BTreeSet<String>,
    pub extra: BTreeMap<String, String>,
}

impl From<TokenEndpointResponse> for TokenPayload {
    fn from(response: TokenEndpointResponse) -> Self {
        TokenPayload {
            access_token: response.access_token.unwrap_or_default(),
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_in: response.expires_in,
            refresh_token: response.refresh_token,
            id_token: response.id_token,
            scopes: response.scopes.into_iter().collect(),
            extra: response.extra,
        }
    }
}

/// Session state shared by the exchange handlers of one request.
/// `update_session` handlers fill it, token handlers read it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrantSession {
    /// The code session redeemed by this exchange.
    pub redeemed: Option<CodeSession>,
}

impl GrantSession {
    pub fn subject(&self) -> Option<&str> {
        self.redeemed.as_ref().and_then(|s| s.subject.as_deref())
    }

    pub fn granted_scopes(&self) -> Option<&BTreeSet<String>> {
        self.redeemed.as_ref().map(|s| &s.granted_scopes)
    }
}
