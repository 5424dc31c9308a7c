//! Authorize phase: validation short-circuit, handler ordering, the
//! response-type completeness check and failure mapping.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use authcode_flow::{
    schema::FailureKind,
    testutils::{code_request, CountingHandler, FailingHandler, ResponseTypeHandler},
    AuthorizeCodeFlow, AuthorizeCodeHandler, AuthorizeHandler, AuthorizeRequest,
    AuthorizeResponse, ClientIdValidator, Config, ErrorCode, FlowBuilder, FlowCtx,
    MemorySessionStore, ResponseTypeValidator, SessionStore, GENERIC_SERVER_ERROR,
    UNHANDLED_RESPONSE_TYPES,
};
use tokio_util::sync::CancellationToken;

fn memory_store() -> Arc<dyn SessionStore> {
    Arc::new(MemorySessionStore::new())
}

#[tokio::test]
async fn test_standard_flow_issues_code() {
    let flow = FlowBuilder::standard(&Config::default()).build();

    let response = flow.authorize(code_request("app", &["code"])).await;

    assert!(response.success, "unexpected failure: {:?}", response.failure);
    assert!(response.failure.is_none());
    let payload = response.payload.unwrap();
    let code = payload.code.unwrap();
    assert!(!code.is_empty());
    assert_eq!(payload.state, "xyz");
    assert_eq!(payload.redirect_uri, "https://app.example.com/callback");
    assert_eq!(payload.handled_response_types, vec!["code".to_string()]);
    assert_eq!(
        payload.granted_scopes,
        vec!["openid".to_string(), "profile".to_string()]
    );

    let session = flow.sessions().get_session(&code).await.unwrap().unwrap();
    assert_eq!(session.client_id, "app");
    assert_eq!(session.subject.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_handled_types_cover_requested_types() {
    let sessions = memory_store();
    let flow = AuthorizeCodeFlow::builder(sessions.clone())
        .authorize_handler(AuthorizeCodeHandler::new(sessions))
        .authorize_handler(ResponseTypeHandler("token"))
        .authorize_handler(ResponseTypeHandler("id_token"))
        .build();

    for requested in [
        vec!["code"],
        vec!["token"],
        vec!["code", "token"],
        vec!["code", "id_token", "token"],
    ] {
        let response = flow.authorize(code_request("app", &requested)).await;
        assert!(response.success, "{requested:?} failed: {:?}", response.failure);
        let handled = response.payload.unwrap().handled_response_types;
        for t in &requested {
            assert!(handled.contains(&t.to_string()), "{t} not handled");
        }
    }
}

#[tokio::test]
async fn test_validation_failure_runs_no_handler() {
    let counter = CountingHandler::default();
    let flow = AuthorizeCodeFlow::builder(memory_store())
        .authorize_validator(ClientIdValidator)
        .authorize_handler(counter.clone())
        .build();

    let response = flow.authorize(code_request("", &["code"])).await;

    assert!(!response.success);
    assert!(response.payload.is_none());
    let failure = response.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::Validation);
    assert_eq!(failure.error, ErrorCode::InvalidClient);
    assert_eq!(failure.status, 401);
    assert_eq!(counter.calls(), 0);
}

#[tokio::test]
async fn test_validation_stops_at_first_rejection() {
    let counter = CountingHandler::default();
    let flow = AuthorizeCodeFlow::builder(memory_store())
        .authorize_validator(ResponseTypeValidator::new(["code"]))
        .authorize_validator(ClientIdValidator)
        .authorize_handler(counter.clone())
        .build();

    // Both validators would reject; the first one wins.
    let response = flow.authorize(code_request("", &["token"])).await;

    let failure = response.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::Validation);
    assert_eq!(failure.error, ErrorCode::UnsupportedResponseType);
    assert_eq!(counter.calls(), 0);
}

#[tokio::test]
async fn test_unhandled_response_type_is_server_failure() {
    let flow = AuthorizeCodeFlow::builder(memory_store())
        .authorize_handler(ResponseTypeHandler("token"))
        .build();

    let response = flow.authorize(code_request("app", &["code", "token"])).await;

    assert!(!response.success);
    assert!(response.payload.is_none());
    let failure = response.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::Server);
    assert_eq!(failure.error, ErrorCode::ServerError);
    assert_eq!(failure.description, UNHANDLED_RESPONSE_TYPES);
}

#[tokio::test]
async fn test_untyped_handler_error_is_not_leaked() {
    let counter = CountingHandler::default();
    let flow = AuthorizeCodeFlow::builder(memory_store())
        .authorize_handler(FailingHandler("connection refused by 10.0.0.7:5432"))
        .authorize_handler(counter.clone())
        .build();

    let response = flow.authorize(code_request("app", &["code"])).await;

    let failure = response.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::Server);
    assert_eq!(failure.error, ErrorCode::ServerError);
    assert_eq!(failure.status, 500);
    assert_eq!(failure.description, GENERIC_SERVER_ERROR);
    assert!(!failure.description.contains("10.0.0.7"));
    // The chain aborted at the failing handler.
    assert_eq!(counter.calls(), 0);
}

#[tokio::test]
async fn test_partial_side_effects_are_kept() {
    let sessions = Arc::new(MemorySessionStore::new());
    let flow = AuthorizeCodeFlow::builder(sessions.clone())
        .authorize_handler(AuthorizeCodeHandler::new(sessions.clone()))
        .authorize_handler(FailingHandler("signer unavailable"))
        .build();

    let response = flow.authorize(code_request("app", &["code"])).await;

    assert!(!response.success);
    // The code session written before the failure is not rolled back.
    assert_eq!(sessions.len(), 1);
}

#[tokio::test]
async fn test_empty_response_types_rejected() {
    let flow = FlowBuilder::standard(&Config::default()).build();

    let response = flow.authorize(code_request("app", &[])).await;

    let failure = response.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::Validation);
    assert_eq!(failure.error, ErrorCode::InvalidRequest);
}

/// Keeps the unit's cancellation token, as a handler that starts background
/// work tied to the request would.
#[derive(Clone, Default)]
struct ScopeRecorder {
    token: Arc<Mutex<Option<CancellationToken>>>,
}

impl ScopeRecorder {
    fn token(&self) -> CancellationToken {
        self.token.lock().unwrap().clone().expect("handler never ran")
    }
}

#[async_trait]
impl AuthorizeHandler for ScopeRecorder {
    async fn handle_authorize_request(
        &self,
        ctx: &FlowCtx,
        _request: &AuthorizeRequest,
        _response: &mut AuthorizeResponse,
    ) -> authcode_flow::Result<()> {
        *self.token.lock().unwrap() = Some(ctx.cancellation_token());
        Ok(())
    }
}

#[tokio::test]
async fn test_failure_cancels_earlier_handler_scope() {
    let recorder = ScopeRecorder::default();
    let flow = AuthorizeCodeFlow::builder(memory_store())
        .authorize_handler(recorder.clone())
        .authorize_handler(FailingHandler("signer unavailable"))
        .build();

    let response = flow.authorize(code_request("app", &["code"])).await;

    assert!(!response.success);
    assert!(recorder.token().is_cancelled());
}

#[tokio::test]
async fn test_success_leaves_scope_uncancelled() {
    let recorder = ScopeRecorder::default();
    let flow = AuthorizeCodeFlow::builder(memory_store())
        .authorize_handler(recorder.clone())
        .authorize_handler(ResponseTypeHandler("code"))
        .build();

    let response = flow.authorize(code_request("app", &["code"])).await;

    assert!(response.success, "{:?}", response.failure);
    assert!(!recorder.token().is_cancelled());
}
