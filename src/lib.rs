//! # authcode-flow
//!
//! Server-side orchestration of the OAuth 2.0 / OpenID Connect authorization
//! code grant.
//!
//! ## Overview
//!
//! The grant runs in two phases. The *authorize* phase validates an
//! incoming authorization request, runs a chain of handlers that produce the
//! requested artifacts (the authorization code among them) and checks that
//! every requested response type was handled. The *exchange* phase
//! validates a token request, lets handlers redeem the code into a session
//! and issue tokens, and always deletes the code afterwards so it can never
//! be replayed.
//!
//! Validators and handlers are pluggable through the [`Validator`],
//! [`AuthorizeHandler`] and [`ExchangeHandler`] traits. Work is dispatched
//! onto a bounded pool, so at most `concurrency` grant requests are in
//! flight at once. Failures reach callers as structured [`schema::Failure`]
//! values; unexpected errors are logged and replaced by a generic
//! description.
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use authcode_flow::{Config, FlowBuilder, Result, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::default();
//!     let flow = FlowBuilder::standard(&config).build();
//!
//!     let handle = Server::new(flow).serve_tcp(config.bind_addr()).await?;
//!     println!("health: {:?}", handle.health().status());
//!
//!     handle.stop().await
//! }
//! ```
//!
//! ## Wire protocol
//!
//! [`Server`] speaks newline-delimited JSON-RPC with two methods,
//! `authorize` and `exchange`. Grant failures are reported inside the
//! result; JSON-RPC errors are reserved for unknown methods and malformed
//! params.

mod client;
mod codec;
mod config;
mod context;
mod error;
mod flow;
mod handler;
mod health;
mod pool;
mod request;
mod response;
mod server;
mod session;
mod transport;
mod validation;

pub mod schema;
pub mod testutils;

pub use client::Client;
pub use codec::JsonRpcCodec;
pub use config::{Config, ServiceConfig, SessionStoreConfig};
pub use context::{FlowCtx, Phase};
pub use error::{Error, ErrorCode, Result, GENERIC_SERVER_ERROR};
pub use flow::{AuthorizeCodeFlow, FlowBuilder, UNHANDLED_RESPONSE_TYPES};
pub use handler::{
    is_issued_by, service_id_of, AuthorizeCodeExchangeHandler, AuthorizeCodeHandler,
    AuthorizeHandler, CodeStrategy, CodeStrategyExt, ExchangeHandler, RandomCodeStrategy,
    ServiceAwareCodeStrategy,
};
pub use health::{Health, HealthStatus, HEALTH_CHECK_NAME};
pub use pool::DEFAULT_CONCURRENCY;
pub use request::{
    AccessRequest, AuthorizeRequest, GRANT_TYPE_AUTHORIZATION_CODE, RESPONSE_TYPE_CODE,
    SCOPE_OPENID,
};
pub use response::{AuthorizeResponse, GrantSession, TokenEndpointResponse};
pub use server::{Server, ServerHandle};
pub use session::{CodeSession, MemorySessionStore, SessionStore, DEFAULT_CODE_TTL};
pub use transport::{GenericDuplex, StreamTransport, TcpClientTransport, Transport, TransportStream};
pub use validation::{
    ClientIdValidator, GrantTypeValidator, RedirectUriValidator, ResponseTypeValidator,
    ServiceCodeValidator, ValidationChain, Validator,
};

#[cfg(test)]
mod tests {
    use super::schema::*;

    #[test]
    fn test_jsonrpc_request_serialization() {
        let request = JSONRPCRequest::new(
            RequestId::Number(1),
            EXCHANGE_METHOD,
            &TokenRequest {
                grant_type: "authorization_code".into(),
                code: "abc123".into(),
                ..Default::default()
            },
        )
        .unwrap();

        let json = serde_json::to_string(&request).unwrap();
        let parsed: JSONRPCRequest = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.jsonrpc, JSONRPC_VERSION);
        assert_eq!(parsed.id, RequestId::Number(1));
        assert_eq!(parsed.request.method, "exchange");
        let params: TokenRequest = parsed.params().unwrap();
        assert_eq!(params.code, "abc123");
        assert_eq!(params.grant_type, "authorization_code");
    }

    #[test]
    fn test_failure_kind_serialization() {
        let json = serde_json::to_string(&FailureKind::Validation).unwrap();
        assert_eq!(json, "\"validation\"");

        let json = serde_json::to_string(&FailureKind::Server).unwrap();
        assert_eq!(json, "\"server\"");
    }
}
