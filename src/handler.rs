use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    context::FlowCtx,
    error::{Error, Result},
    request::{AccessRequest, AuthorizeRequest, GRANT_TYPE_AUTHORIZATION_CODE, RESPONSE_TYPE_CODE},
    response::{AuthorizeResponse, GrantSession, TokenEndpointResponse},
    session::{CodeSession, SessionStore},
};

/// Authorize-capable handler. Handlers run strictly in configured order and
/// may depend on what earlier handlers wrote into the response.
#[async_trait]
pub trait AuthorizeHandler: Send + Sync {
    async fn handle_authorize_request(
        &self,
        ctx: &FlowCtx,
        request: &AuthorizeRequest,
        response: &mut AuthorizeResponse,
    ) -> Result<()>;
}

/// Exchange-capable handler.
///
/// `update_session` is called on every handler, in order, before any
/// `handle_access_request` call.
#[async_trait]
pub trait ExchangeHandler: Send + Sync {
    async fn update_session(
        &self,
        _ctx: &FlowCtx,
        _request: &AccessRequest,
        _session: &mut GrantSession,
    ) -> Result<()> {
        Ok(())
    }

    async fn handle_access_request(
        &self,
        ctx: &FlowCtx,
        request: &AccessRequest,
        session: &GrantSession,
        response: &mut TokenEndpointResponse,
    ) -> Result<()>;
}

/// Generates authorization code values.
pub trait CodeStrategy: Send + Sync {
    fn generate(&self, request: &AuthorizeRequest) -> String;
}

/// Random, unguessable codes.
#[derive(Debug, Clone, Default)]
pub struct RandomCodeStrategy;

impl CodeStrategy for RandomCodeStrategy {
    fn generate(&self, _request: &AuthorizeRequest) -> String {
        format!(
            "{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        )
    }
}

const SERVICE_SEPARATOR: char = '.';

/// Prefixes codes with the id of the issuing service so that a gateway can
/// route the exchange back to it.
#[derive(Debug, Clone)]
pub struct ServiceAwareCodeStrategy<S> {
    service_id: String,
    inner: S,
}

impl<S> ServiceAwareCodeStrategy<S> {
    pub fn new(service_id: impl Into<String>, inner: S) -> Self {
        Self {
            service_id: service_id.into(),
            inner,
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }
}

impl<S: CodeStrategy> CodeStrategy for ServiceAwareCodeStrategy<S> {
    fn generate(&self, request: &AuthorizeRequest) -> String {
        format!(
            "{}{}{}",
            self.service_id,
            SERVICE_SEPARATOR,
            self.inner.generate(request)
        )
    }
}

/// The service id embedded in a code issued by [`ServiceAwareCodeStrategy`].
/// Random code bodies never contain the separator, so the id is everything
/// before the last one.
pub fn service_id_of(code: &str) -> Option<&str> {
    code.rsplit_once(SERVICE_SEPARATOR)
        .map(|(id, _)| id)
        .filter(|id| !id.is_empty())
}

/// Whether `code` carries the `service_id` prefix followed by a non-empty
/// body.
pub fn is_issued_by(code: &str, service_id: &str) -> bool {
    code.strip_prefix(service_id)
        .and_then(|rest| rest.strip_prefix(SERVICE_SEPARATOR))
        .is_some_and(|body| !body.is_empty())
}

pub trait CodeStrategyExt: CodeStrategy + Sized {
    fn service_aware(self, service_id: impl Into<String>) -> ServiceAwareCodeStrategy<Self> {
        ServiceAwareCodeStrategy::new(service_id, self)
    }
}

impl<S: CodeStrategy> CodeStrategyExt for S {}

/// Issues an authorization code for the `code` response type and records
/// the session that the exchange phase will redeem.
pub struct AuthorizeCodeHandler {
    sessions: Arc<dyn SessionStore>,
    strategy: Box<dyn CodeStrategy>,
}

impl AuthorizeCodeHandler {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self::with_strategy(sessions, RandomCodeStrategy)
    }

    pub fn with_strategy<S>(sessions: Arc<dyn SessionStore>, strategy: S) -> Self
    where
        S: CodeStrategy + 'static,
    {
        Self {
            sessions,
            strategy: Box::new(strategy),
        }
    }
}

#[async_trait]
impl AuthorizeHandler for AuthorizeCodeHandler {
    async fn handle_authorize_request(
        &self,
        ctx: &FlowCtx,
        request: &AuthorizeRequest,
        response: &mut AuthorizeResponse,
    ) -> Result<()> {
        if !request.response_types.contains(RESPONSE_TYPE_CODE) {
            return Ok(());
        }

        let code = self.strategy.generate(request);
        self.sessions
            .create_session(&code, CodeSession::from(request))
            .await?;
        debug!("Request {} issued authorization code", ctx.request_id());

        response.code = Some(code);
        response.granted_scopes = request.granted_scopes.clone();
        response.handle_response_type(RESPONSE_TYPE_CODE);
        Ok(())
    }
}

/// Redeems the code session during the exchange phase.
pub struct AuthorizeCodeExchangeHandler {
    sessions: Arc<dyn SessionStore>,
}

impl AuthorizeCodeExchangeHandler {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl ExchangeHandler for AuthorizeCodeExchangeHandler {
    async fn update_session(
        &self,
        ctx: &FlowCtx,
        request: &AccessRequest,
        session: &mut GrantSession,
    ) -> Result<()> {
        if request.grant_type != GRANT_TYPE_AUTHORIZATION_CODE {
            return Ok(());
        }

        let Some(redeemed) = self.sessions.take_session(&request.code).await? else {
            warn!(
                "Request {} presented an unknown or already redeemed code",
                ctx.request_id()
            );
            return Err(Error::invalid_grant(
                "authorization code is invalid, expired or already used",
            ));
        };

        if redeemed.client_id != request.client_id {
            return Err(Error::invalid_grant(
                "authorization code was issued to another client",
            ));
        }
        if redeemed.redirect_uri != request.redirect_uri {
            return Err(Error::invalid_grant(
                "redirect_uri does not match the authorization request",
            ));
        }

        session.redeemed = Some(redeemed);
        Ok(())
    }

    async fn handle_access_request(
        &self,
        _ctx: &FlowCtx,
        request: &AccessRequest,
        session: &GrantSession,
        response: &mut TokenEndpointResponse,
    ) -> Result<()> {
        if request.grant_type != GRANT_TYPE_AUTHORIZATION_CODE {
            return Ok(());
        }
        let scopes = session
            .granted_scopes()
            .ok_or_else(|| Error::server("code session was not redeemed"))?;
        response.scopes = scopes.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::context::Phase;
    use crate::error::ErrorCode;
    use crate::schema::CodeRequest;
    use crate::session::MemorySessionStore;

    fn authorize_request() -> AuthorizeRequest {
        AuthorizeRequest::try_from(CodeRequest {
            id: "req-1".into(),
            client_id: "app".into(),
            response_types: vec!["code".into()],
            redirect_uri: "https://app.example.com/cb".into(),
            granted_scopes: vec!["openid".into()],
            ..Default::default()
        })
        .unwrap()
    }

    fn access_request(code: &str, client_id: &str) -> AccessRequest {
        AccessRequest {
            id: "req-2".into(),
            grant_type: GRANT_TYPE_AUTHORIZATION_CODE.into(),
            code: code.into(),
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: "https://app.example.com/cb".into(),
            extra: Default::default(),
        }
    }

    fn ctx(phase: Phase) -> FlowCtx {
        FlowCtx::new("req", phase, CancellationToken::new())
    }

    #[test]
    fn test_service_aware_strategy() {
        let strategy = RandomCodeStrategy.service_aware("code-flow-1");
        let code = strategy.generate(&authorize_request());
        assert!(code.starts_with("code-flow-1."));
        assert_eq!(service_id_of(&code), Some("code-flow-1"));
        assert_eq!(service_id_of("no-separator"), None);
        assert_eq!(service_id_of(".leading"), None);
    }

    #[test]
    fn test_dotted_service_id() {
        let strategy = RandomCodeStrategy.service_aware("eu.flow");
        let code = strategy.generate(&authorize_request());
        assert_eq!(service_id_of(&code), Some("eu.flow"));
        assert!(is_issued_by(&code, "eu.flow"));
        assert!(!is_issued_by(&code, "eu"));
        assert!(!is_issued_by("eu.flow.", "eu.flow"));
        assert!(!is_issued_by("eu.flowx.abc", "eu.flow"));
    }

    #[tokio::test]
    async fn test_code_handler_issues_and_records_session() {
        let store = Arc::new(MemorySessionStore::new());
        let handler = AuthorizeCodeHandler::new(store.clone());
        let request = authorize_request();
        let mut response = AuthorizeResponse::new(&request);

        handler
            .handle_authorize_request(&ctx(Phase::Authorize), &request, &mut response)
            .await
            .unwrap();

        let code = response.code.clone().unwrap();
        assert!(response.handled_response_types.contains("code"));
        let session = store.get_session(&code).await.unwrap().unwrap();
        assert_eq!(session.request_id, "req-1");
    }

    #[tokio::test]
    async fn test_code_handler_ignores_other_response_types() {
        let store = Arc::new(MemorySessionStore::new());
        let handler = AuthorizeCodeHandler::new(store.clone());
        let mut request = authorize_request();
        request.response_types = ["token".to_string()].into_iter().collect();
        let mut response = AuthorizeResponse::new(&request);

        handler
            .handle_authorize_request(&ctx(Phase::Authorize), &request, &mut response)
            .await
            .unwrap();
        assert!(response.code.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_exchange_handler_rejects_wrong_client_and_consumes_code() {
        let store = Arc::new(MemorySessionStore::new());
        store
            .create_session("abc123", CodeSession::from(&authorize_request()))
            .await
            .unwrap();
        let handler = AuthorizeCodeExchangeHandler::new(store.clone());
        let mut session = GrantSession::default();

        let err = handler
            .update_session(
                &ctx(Phase::Exchange),
                &access_request("abc123", "intruder"),
                &mut session,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol {
                code: ErrorCode::InvalidGrant,
                ..
            }
        ));
        assert!(store.get_session("abc123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exchange_handler_populates_scopes() {
        let store = Arc::new(MemorySessionStore::new());
        store
            .create_session("abc123", CodeSession::from(&authorize_request()))
            .await
            .unwrap();
        let handler = AuthorizeCodeExchangeHandler::new(store.clone());
        let request = access_request("abc123", "app");
        let mut session = GrantSession::default();
        let mut response = TokenEndpointResponse::default();

        handler
            .update_session(&ctx(Phase::Exchange), &request, &mut session)
            .await
            .unwrap();
        handler
            .handle_access_request(&ctx(Phase::Exchange), &request, &session, &mut response)
            .await
            .unwrap();

        assert!(response.scopes.contains("openid"));
        assert_eq!(session.subject(), None);
    }
}
