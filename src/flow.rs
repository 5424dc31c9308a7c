use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    context::{FlowCtx, Phase},
    error::{Error, Result},
    handler::{
        AuthorizeCodeExchangeHandler, AuthorizeCodeHandler, AuthorizeHandler, CodeStrategyExt,
        ExchangeHandler, RandomCodeStrategy,
    },
    pool::{WorkerPool, DEFAULT_CONCURRENCY},
    request::{AccessRequest, AuthorizeRequest, RESPONSE_TYPE_CODE},
    response::{AuthorizeResponse, GrantSession, TokenEndpointResponse},
    schema::{CodeRequest, CodeResponse, Failure, TokenRequest, TokenResponse},
    session::{MemorySessionStore, SessionStore},
    validation::{
        ClientIdValidator, GrantTypeValidator, RedirectUriValidator, ResponseTypeValidator,
        ServiceCodeValidator, ValidationChain, Validator,
    },
};

/// Description of the failure raised when the handler chain leaves a
/// requested response type unhandled.
pub const UNHANDLED_RESPONSE_TYPES: &str = "Some response types were not handled.";

/// The grant orchestrator. Cheap to clone; clones share the worker pool.
#[derive(Clone)]
pub struct AuthorizeCodeFlow {
    inner: Arc<FlowInner>,
}

struct FlowInner {
    pool: WorkerPool,
    shutdown: CancellationToken,
    sessions: Arc<dyn SessionStore>,
    authorize_validation: ValidationChain<AuthorizeRequest>,
    exchange_validation: ValidationChain<AccessRequest>,
    authorize_handlers: Vec<Arc<dyn AuthorizeHandler>>,
    exchange_handlers: Vec<Arc<dyn ExchangeHandler>>,
}

impl AuthorizeCodeFlow {
    pub fn builder(sessions: Arc<dyn SessionStore>) -> FlowBuilder {
        FlowBuilder::new(sessions)
    }

    pub fn concurrency(&self) -> usize {
        self.inner.pool.size()
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.inner.sessions
    }

    /// Authorize phase. Business failures are reported in the response,
    /// never as an error.
    pub async fn authorize(&self, request: CodeRequest) -> CodeResponse {
        let inner = self.inner.clone();
        match self.inner.pool.run(inner.authorize_unit(request)).await {
            Ok(response) => CodeResponse::success(response.into()),
            Err(e) => CodeResponse::failure(Failure::from_error(e)),
        }
    }

    /// Exchange phase. The submitted code is deleted from the session store
    /// whatever the outcome.
    pub async fn exchange(&self, request: TokenRequest) -> TokenResponse {
        let inner = self.inner.clone();
        match self.inner.pool.run(inner.exchange_unit(request)).await {
            Ok(response) => TokenResponse::success(response.into()),
            Err(e) => TokenResponse::failure(Failure::from_error(e)),
        }
    }

    /// Cancel in-flight units of work and refuse new ones.
    pub fn shutdown(&self) {
        info!("Authorize code flow shutting down");
        self.inner.shutdown.cancel();
        self.inner.pool.close();
    }
}

impl FlowInner {
    fn ctx(&self, request_id: &str, phase: Phase) -> FlowCtx {
        FlowCtx::new(request_id, phase, self.shutdown.child_token())
    }

    async fn authorize_unit(self: Arc<Self>, request: CodeRequest) -> Result<AuthorizeResponse> {
        let request = AuthorizeRequest::try_from(request)?;
        let ctx = self.ctx(&request.id, Phase::Authorize);

        let result = AssertUnwindSafe(self.run_authorize(&ctx, &request))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Error::wrapped(panic_message(panic))));
        match &result {
            Ok(_) => info!("Request {} authorized client {}", request.id, request.client_id),
            Err(e) => {
                ctx.cancel();
                warn!("Request {} failed to authorize: {}", request.id, e);
            }
        }
        result
    }

    async fn run_authorize(
        &self,
        ctx: &FlowCtx,
        request: &AuthorizeRequest,
    ) -> Result<AuthorizeResponse> {
        self.authorize_validation.validate(ctx, request).await?;

        let mut response = AuthorizeResponse::new(request);
        for handler in &self.authorize_handlers {
            ctx.step(handler.handle_authorize_request(ctx, request, &mut response))
                .await?;
        }

        if !response.handles_all(&request.response_types) {
            let missing: Vec<&String> = request
                .response_types
                .difference(&response.handled_response_types)
                .collect();
            error!(
                "Request {} left response types {:?} unhandled",
                request.id, missing
            );
            return Err(Error::server(UNHANDLED_RESPONSE_TYPES));
        }
        Ok(response)
    }

    async fn exchange_unit(
        self: Arc<Self>,
        request: TokenRequest,
    ) -> Result<TokenEndpointResponse> {
        let code = request.code.clone();

        let result = match AccessRequest::try_from(request) {
            Ok(request) => {
                let ctx = self.ctx(&request.id, Phase::Exchange);
                let result = AssertUnwindSafe(self.run_exchange(&ctx, &request))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(Error::wrapped(panic_message(panic))));
                match &result {
                    Ok(_) => info!("Request {} exchanged code for client {}", request.id, request.client_id),
                    Err(e) => {
                        ctx.cancel();
                        warn!("Request {} failed to exchange: {}", request.id, e);
                    }
                }
                result
            }
            Err(e) => Err(e),
        };

        // Safety net: the handler that normally deletes the session may have
        // skipped it, so the code is deleted again here.
        if !code.is_empty() {
            if let Err(e) = self.sessions.delete_session(&code).await {
                error!("Safety-net deletion of code session failed: {}", e);
                if result.is_ok() {
                    return Err(Error::wrapped(e));
                }
            }
        }
        result
    }

    async fn run_exchange(
        &self,
        ctx: &FlowCtx,
        request: &AccessRequest,
    ) -> Result<TokenEndpointResponse> {
        self.exchange_validation.validate(ctx, request).await?;

        let mut session = GrantSession::default();
        for handler in &self.exchange_handlers {
            ctx.step(handler.update_session(ctx, request, &mut session))
                .await?;
        }
        debug!("Request {} session updated", request.id);

        let mut response = TokenEndpointResponse::default();
        for handler in &self.exchange_handlers {
            ctx.step(handler.handle_access_request(ctx, request, &session, &mut response))
                .await?;
        }
        Ok(response)
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

/// Assembles an [`AuthorizeCodeFlow`]. Validators and handlers run in the
/// order they are added.
pub struct FlowBuilder {
    sessions: Arc<dyn SessionStore>,
    concurrency: usize,
    authorize_validation: ValidationChain<AuthorizeRequest>,
    exchange_validation: ValidationChain<AccessRequest>,
    authorize_handlers: Vec<Arc<dyn AuthorizeHandler>>,
    exchange_handlers: Vec<Arc<dyn ExchangeHandler>>,
}

impl FlowBuilder {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            sessions,
            concurrency: DEFAULT_CONCURRENCY,
            authorize_validation: ValidationChain::new(),
            exchange_validation: ValidationChain::new(),
            authorize_handlers: Vec::new(),
            exchange_handlers: Vec::new(),
        }
    }

    /// The stock code flow: a memory session store, the built-in validators
    /// and the code issuing/redeeming handlers. Token issuing handlers still
    /// have to be added with [`FlowBuilder::exchange_handler`].
    pub fn standard(config: &Config) -> Self {
        let sessions: Arc<dyn SessionStore> =
            Arc::new(MemorySessionStore::with_ttl(config.session_store.code_ttl()));

        let code_handler = match &config.service_id {
            Some(service_id) => AuthorizeCodeHandler::with_strategy(
                sessions.clone(),
                RandomCodeStrategy.service_aware(service_id.clone()),
            ),
            None => AuthorizeCodeHandler::new(sessions.clone()),
        };

        let mut builder = Self::new(sessions.clone())
            .with_concurrency(config.concurrency)
            .authorize_validator(ClientIdValidator)
            .authorize_validator(RedirectUriValidator)
            .authorize_validator(ResponseTypeValidator::new([RESPONSE_TYPE_CODE]))
            .exchange_validator(GrantTypeValidator)
            .exchange_validator(ClientIdValidator)
            .exchange_validator(RedirectUriValidator);
        if let Some(service_id) = &config.service_id {
            builder = builder.exchange_validator(ServiceCodeValidator::new(service_id.clone()));
        }
        builder
            .authorize_handler(code_handler)
            .exchange_handler(AuthorizeCodeExchangeHandler::new(sessions))
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn authorize_validator<V>(mut self, validator: V) -> Self
    where
        V: Validator<AuthorizeRequest> + 'static,
    {
        self.authorize_validation = self.authorize_validation.with(validator);
        self
    }

    pub fn exchange_validator<V>(mut self, validator: V) -> Self
    where
        V: Validator<AccessRequest> + 'static,
    {
        self.exchange_validation = self.exchange_validation.with(validator);
        self
    }

    pub fn authorize_handler<H>(mut self, handler: H) -> Self
    where
        H: AuthorizeHandler + 'static,
    {
        self.authorize_handlers.push(Arc::new(handler));
        self
    }

    pub fn exchange_handler<H>(mut self, handler: H) -> Self
    where
        H: ExchangeHandler + 'static,
    {
        self.exchange_handlers.push(Arc::new(handler));
        self
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn build(self) -> AuthorizeCodeFlow {
        let pool = WorkerPool::new(self.concurrency);
        info!(
            "Authorize code flow ready: concurrency {}, {} authorize validators, {} authorize handlers, {} exchange validators, {} exchange handlers",
            pool.size(),
            self.authorize_validation.len(),
            self.authorize_handlers.len(),
            self.exchange_validation.len(),
            self.exchange_handlers.len()
        );
        AuthorizeCodeFlow {
            inner: Arc::new(FlowInner {
                pool,
                shutdown: CancellationToken::new(),
                sessions: self.sessions,
                authorize_validation: self.authorize_validation,
                exchange_validation: self.exchange_validation,
                authorize_handlers: self.authorize_handlers,
                exchange_handlers: self.exchange_handlers,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::schema::FailureKind;

    struct PanickingHandler;

    #[async_trait]
    impl ExchangeHandler for PanickingHandler {
        async fn handle_access_request(
            &self,
            _ctx: &FlowCtx,
            _request: &AccessRequest,
            _session: &GrantSession,
            _response: &mut TokenEndpointResponse,
        ) -> Result<()> {
            panic!("token signer exploded")
        }
    }

    #[tokio::test]
    async fn test_safety_net_runs_after_handler_panic() {
        let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let flow = AuthorizeCodeFlow::builder(sessions.clone())
            .exchange_handler(PanickingHandler)
            .build();
        sessions
            .create_session(
                "abc123",
                crate::session::CodeSession::from(
                    &AuthorizeRequest::try_from(CodeRequest {
                        client_id: "app".into(),
                        response_types: vec!["code".into()],
                        ..Default::default()
                    })
                    .unwrap(),
                ),
            )
            .await
            .unwrap();

        let response = flow
            .exchange(TokenRequest {
                grant_type: "authorization_code".into(),
                code: "abc123".into(),
                client_id: "app".into(),
                ..Default::default()
            })
            .await;

        assert!(!response.success);
        let failure = response.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Server);
        assert!(!failure.description.contains("exploded"));
        assert!(sessions.get_session("abc123").await.unwrap().is_none());
    }

    struct TokenKeeper(std::sync::Mutex<Option<CancellationToken>>);

    #[async_trait]
    impl AuthorizeHandler for Arc<TokenKeeper> {
        async fn handle_authorize_request(
            &self,
            ctx: &FlowCtx,
            _request: &AuthorizeRequest,
            _response: &mut AuthorizeResponse,
        ) -> Result<()> {
            *self.0.lock().unwrap() = Some(ctx.cancellation_token());
            Ok(())
        }
    }

    struct PanickingAuthorizeHandler;

    #[async_trait]
    impl AuthorizeHandler for PanickingAuthorizeHandler {
        async fn handle_authorize_request(
            &self,
            _ctx: &FlowCtx,
            _request: &AuthorizeRequest,
            _response: &mut AuthorizeResponse,
        ) -> Result<()> {
            panic!("boom")
        }
    }

    #[tokio::test]
    async fn test_authorize_panic_cancels_unit_scope() {
        let keeper = Arc::new(TokenKeeper(std::sync::Mutex::new(None)));
        let flow = AuthorizeCodeFlow::builder(Arc::new(MemorySessionStore::new()))
            .authorize_handler(keeper.clone())
            .authorize_handler(PanickingAuthorizeHandler)
            .build();

        let response = flow
            .authorize(CodeRequest {
                client_id: "app".into(),
                response_types: vec!["code".into()],
                ..Default::default()
            })
            .await;

        let failure = response.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Server);
        assert!(!failure.description.contains("boom"));
        let token = keeper.0.lock().unwrap().clone().unwrap();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(
            panic_message(Box::new("boom")),
            "handler panicked: boom".to_string()
        );
        assert_eq!(panic_message(Box::new(3u8)), "handler panicked");
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_requests() {
        let flow = FlowBuilder::standard(&Config::default()).build();
        flow.shutdown();
        let response = flow
            .authorize(CodeRequest {
                client_id: "app".into(),
                response_types: vec!["code".into()],
                redirect_uri: "https://app.example.com/cb".into(),
                ..Default::default()
            })
            .await;
        assert!(!response.success);
        assert_eq!(response.failure.unwrap().kind, FailureKind::Server);
    }
}
