//! Test utilities for `authcode_flow`.
//!
//! Helpers shared by the unit tests and the integration tests under
//! `tests/`: in-memory duplex pipes, raw newline-delimited message I/O, a
//! flow server wired to a client over those pipes, and a few handlers that
//! misbehave on purpose.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{
    context::FlowCtx,
    error::{Error, Result},
    flow::AuthorizeCodeFlow,
    handler::{AuthorizeHandler, ExchangeHandler},
    request::{AccessRequest, AuthorizeRequest},
    response::{AuthorizeResponse, GrantSession, TokenEndpointResponse},
    schema::{CodeRequest, JSONRPCMessage, TokenRequest},
    Client, Server, ServerHandle,
};

/// Two independent in-memory duplex pipes forming a bidirectional channel.
///
/// The first two elements go to the server (`reader`, `writer`), the
/// remaining pair to the client.
pub fn make_duplex_pair() -> (
    impl AsyncRead + Send + Sync + Unpin + 'static,
    impl AsyncWrite + Send + Sync + Unpin + 'static,
    impl AsyncRead + Send + Sync + Unpin + 'static,
    impl AsyncWrite + Send + Sync + Unpin + 'static,
) {
    let (server_reader, client_writer) = io::duplex(8 * 1024);
    let (client_reader, server_writer) = io::duplex(8 * 1024);
    (server_reader, server_writer, client_reader, client_writer)
}

/// Serialise a [`JSONRPCMessage`], append a `\n` delimiter and write it to the
/// provided writer.
pub async fn send_message<W>(writer: &mut W, message: &JSONRPCMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_vec(message)?;
    writer.write_all(&json).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Read a single newline-delimited JSON-RPC message from the reader.
pub async fn read_message<R>(reader: &mut BufReader<R>) -> Result<JSONRPCMessage>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    reader.read_until(b'\n', &mut buf).await?;
    if buf.is_empty() {
        return Err(Error::Transport("Stream closed".into()));
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    Ok(serde_json::from_slice(&buf)?)
}

/// Serve `flow` over an in-memory pipe and return a client connected to it.
pub async fn connected_client_and_server(
    flow: AuthorizeCodeFlow,
) -> Result<(Client, ServerHandle)> {
    let (server_reader, server_writer, client_reader, client_writer) = make_duplex_pair();
    let server = Server::new(flow)
        .serve_stream(server_reader, server_writer)
        .await?;
    let client = Client::connect_stream(client_reader, client_writer).await?;
    Ok((client, server))
}

/// Drop the client, then give the server a short while to stop.
pub async fn shutdown_client_and_server(client: Client, server: ServerHandle) {
    drop(client);
    let _ = tokio::time::timeout(Duration::from_millis(100), server.stop()).await;
}

/// A well-formed authorize call for a confidential web client.
pub fn code_request(client_id: &str, response_types: &[&str]) -> CodeRequest {
    CodeRequest {
        client_id: client_id.to_string(),
        response_types: response_types.iter().map(|s| s.to_string()).collect(),
        scopes: vec!["openid".into(), "profile".into()],
        redirect_uri: "https://app.example.com/callback".into(),
        state: "xyz".into(),
        subject: Some("alice".into()),
        granted_scopes: vec!["openid".into(), "profile".into()],
        ..Default::default()
    }
}

/// The exchange call matching [`code_request`].
pub fn token_request(client_id: &str, code: &str) -> TokenRequest {
    TokenRequest {
        grant_type: "authorization_code".into(),
        code: code.to_string(),
        client_id: client_id.to_string(),
        redirect_uri: "https://app.example.com/callback".into(),
        ..Default::default()
    }
}

/// Issues an opaque access token once the code has been redeemed.
pub struct OpaqueTokenHandler;

#[async_trait]
impl ExchangeHandler for OpaqueTokenHandler {
    async fn handle_access_request(
        &self,
        _ctx: &FlowCtx,
        _request: &AccessRequest,
        session: &GrantSession,
        response: &mut TokenEndpointResponse,
    ) -> Result<()> {
        if session.redeemed.is_none() {
            return Err(Error::server("code session was not redeemed"));
        }
        response.access_token = Some(uuid::Uuid::new_v4().simple().to_string());
        response.token_type = Some("Bearer".into());
        response.expires_in = Some(3600);
        Ok(())
    }
}

/// Marks a response type handled without doing anything else.
pub struct ResponseTypeHandler(pub &'static str);

#[async_trait]
impl AuthorizeHandler for ResponseTypeHandler {
    async fn handle_authorize_request(
        &self,
        _ctx: &FlowCtx,
        request: &AuthorizeRequest,
        response: &mut AuthorizeResponse,
    ) -> Result<()> {
        if request.response_types.contains(self.0) {
            response.handle_response_type(self.0);
        }
        Ok(())
    }
}

/// Fails with an untyped error carrying the wrapped message.
pub struct FailingHandler(pub &'static str);

#[async_trait]
impl AuthorizeHandler for FailingHandler {
    async fn handle_authorize_request(
        &self,
        _ctx: &FlowCtx,
        _request: &AuthorizeRequest,
        _response: &mut AuthorizeResponse,
    ) -> Result<()> {
        Err(Error::InternalError(self.0.to_string()))
    }
}

#[async_trait]
impl ExchangeHandler for FailingHandler {
    async fn handle_access_request(
        &self,
        _ctx: &FlowCtx,
        _request: &AccessRequest,
        _session: &GrantSession,
        _response: &mut TokenEndpointResponse,
    ) -> Result<()> {
        Err(Error::InternalError(self.0.to_string()))
    }
}

/// Counts its invocations.
#[derive(Clone, Default)]
pub struct CountingHandler {
    pub calls: Arc<AtomicUsize>,
}

impl CountingHandler {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthorizeHandler for CountingHandler {
    async fn handle_authorize_request(
        &self,
        _ctx: &FlowCtx,
        _request: &AuthorizeRequest,
        _response: &mut AuthorizeResponse,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ExchangeHandler for CountingHandler {
    async fn handle_access_request(
        &self,
        _ctx: &FlowCtx,
        _request: &AccessRequest,
        _session: &GrantSession,
        _response: &mut TokenEndpointResponse,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
