use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{Error, Result},
    flow::AuthorizeCodeFlow,
    health::{self, Health, HealthStatus},
    schema::{
        CodeRequest, JSONRPCError, JSONRPCMessage, JSONRPCRequest, JSONRPCResponse, RequestId,
        TokenRequest, AUTHORIZE_METHOD, EXCHANGE_METHOD, INTERNAL_ERROR, INVALID_PARAMS,
        METHOD_NOT_FOUND,
    },
    transport::{GenericDuplex, StreamTransport, Transport},
};

/// Serves an [`AuthorizeCodeFlow`] over newline-delimited JSON-RPC.
///
/// Two methods are exposed, `authorize` and `exchange`. Their params are a
/// [`CodeRequest`] and a [`TokenRequest`]; their results a `CodeResponse`
/// and a `TokenResponse`. Grant failures are part of the result, so a
/// JSON-RPC error only ever means the call itself was malformed.
#[derive(Clone)]
pub struct Server {
    flow: AuthorizeCodeFlow,
}

impl Server {
    pub fn new(flow: AuthorizeCodeFlow) -> Self {
        Self { flow }
    }

    pub fn flow(&self) -> &AuthorizeCodeFlow {
        &self.flow
    }

    /// Bind `addr` and accept connections until the returned handle is
    /// stopped. A bind failure is returned to the caller.
    pub async fn serve_tcp(self, addr: impl ToSocketAddrs) -> Result<ServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Authorize code flow server listening on {}", local_addr);

        let (reporter, health) = health::channel();
        let shutdown_token = CancellationToken::new();
        let shutdown = shutdown_token.clone();

        let handle = tokio::spawn(async move {
            reporter.set(HealthStatus::Serving);
            accept_loop(self.flow, listener, shutdown).await;
            drop(reporter);
            info!("Authorize code flow server stopped");
        });

        Ok(ServerHandle {
            handle,
            shutdown_token,
            health,
            bound_addr: Some(local_addr),
        })
    }

    /// Serve a single connection made of a reader and a writer.
    pub async fn serve_stream<R, W>(self, reader: R, writer: W) -> Result<ServerHandle>
    where
        R: tokio::io::AsyncRead + Send + Sync + Unpin + 'static,
        W: tokio::io::AsyncWrite + Send + Sync + Unpin + 'static,
    {
        let duplex = GenericDuplex::new(reader, writer);
        self.serve_transport(Box::new(StreamTransport::new(duplex)))
            .await
    }

    /// Serve a single connection over any transport.
    pub async fn serve_transport(self, mut transport: Box<dyn Transport>) -> Result<ServerHandle> {
        transport.connect().await?;

        let (reporter, health) = health::channel();
        let shutdown_token = CancellationToken::new();
        let shutdown = shutdown_token.clone();

        let handle = tokio::spawn(async move {
            reporter.set(HealthStatus::Serving);
            if let Err(e) = serve_connection(self.flow, transport, shutdown).await {
                error!("Connection failed: {}", e);
            }
            drop(reporter);
        });

        Ok(ServerHandle {
            handle,
            shutdown_token,
            health,
            bound_addr: None,
        })
    }
}

pub struct ServerHandle {
    pub handle: JoinHandle<()>,
    shutdown_token: CancellationToken,
    health: Health,
    /// The actual bound address, for servers listening on a network port
    pub bound_addr: Option<SocketAddr>,
}

impl ServerHandle {
    pub fn health(&self) -> Health {
        self.health.clone()
    }

    /// Stop accepting connections, close open ones and wait for the server
    /// task to finish. Requests already handed to the flow run to completion
    /// but their responses are discarded.
    pub async fn stop(self) -> Result<()> {
        self.shutdown_token.cancel();
        self.handle
            .await
            .map_err(|e| Error::InternalError(format!("Server task failed: {e}")))
    }
}

async fn accept_loop(flow: AuthorizeCodeFlow, listener: TcpListener, shutdown: CancellationToken) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Server received shutdown signal");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        info!("New connection from {}", peer_addr);
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
                        }
                        let flow = flow.clone();
                        let transport = Box::new(StreamTransport::new(stream));
                        let shutdown = shutdown.child_token();
                        connections.spawn(async move {
                            match serve_connection(flow, transport, shutdown).await {
                                Ok(()) => info!("Connection from {} closed", peer_addr),
                                Err(e) => error!("Error handling connection from {}: {}", peer_addr, e),
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    while connections.join_next().await.is_some() {}
}

async fn serve_connection(
    flow: AuthorizeCodeFlow,
    transport: Box<dyn Transport>,
    shutdown: CancellationToken,
) -> Result<()> {
    let stream = transport.framed()?;
    let (mut sink, mut stream) = stream.split();

    // Responses complete out of order; a single writer drains them.
    let (response_tx, mut response_rx) = mpsc::unbounded_channel::<JSONRPCMessage>();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Connection received shutdown signal");
                return Ok(());
            }
            result = stream.next() => {
                match result {
                    Some(Ok(message)) => handle_message(&flow, message, &response_tx),
                    Some(Err(e)) => {
                        error!("Error reading message: {}", e);
                        break;
                    }
                    None => {
                        info!("Client disconnected");
                        break;
                    }
                }
            }
            Some(response) = response_rx.recv() => {
                if let Err(e) = sink.send(response).await {
                    error!("Error sending response to client: {}", e);
                    return Err(e);
                }
            }
        }
    }

    // Flush the responses of requests still in flight.
    drop(response_tx);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            response = response_rx.recv() => match response {
                Some(response) => sink.send(response).await?,
                None => return Ok(()),
            }
        }
    }
}

fn handle_message(
    flow: &AuthorizeCodeFlow,
    message: JSONRPCMessage,
    response_tx: &mpsc::UnboundedSender<JSONRPCMessage>,
) {
    match message {
        JSONRPCMessage::Request(request) => {
            let flow = flow.clone();
            let tx = response_tx.clone();
            tokio::spawn(async move {
                let response = handle_request(&flow, request).await;
                if let Err(e) = tx.send(response) {
                    debug!("Dropping response for closed connection: {:?}", e.0);
                }
            });
        }
        JSONRPCMessage::Notification(notification) => {
            debug!(
                "Ignoring notification: {}",
                notification.notification.method
            );
        }
        JSONRPCMessage::Response(response) => {
            warn!("Server received unexpected response {}", response.id);
        }
        JSONRPCMessage::Error(error) => {
            warn!("Server received error message: {:?}", error);
        }
    }
}

async fn handle_request(flow: &AuthorizeCodeFlow, request: JSONRPCRequest) -> JSONRPCMessage {
    debug!(
        "Server handling request {} method: {}",
        request.id, request.request.method
    );
    let id = request.id.clone();

    match request.request.method.as_str() {
        AUTHORIZE_METHOD => match request.params::<CodeRequest>() {
            Ok(params) => respond(id, &flow.authorize(params).await),
            Err(e) => invalid_params(id, AUTHORIZE_METHOD, e),
        },
        EXCHANGE_METHOD => match request.params::<TokenRequest>() {
            Ok(params) => respond(id, &flow.exchange(params).await),
            Err(e) => invalid_params(id, EXCHANGE_METHOD, e),
        },
        other => {
            warn!("Unknown method {}", other);
            JSONRPCMessage::Error(JSONRPCError::new(
                id,
                METHOD_NOT_FOUND,
                Error::MethodNotFound(other.to_string()).to_string(),
            ))
        }
    }
}

fn respond<T: serde::Serialize>(id: RequestId, result: &T) -> JSONRPCMessage {
    match JSONRPCResponse::new(id.clone(), result) {
        Ok(response) => JSONRPCMessage::Response(response),
        Err(e) => {
            error!("Failed to serialize result for request {}: {}", id, e);
            JSONRPCMessage::Error(JSONRPCError::new(
                id,
                INTERNAL_ERROR,
                "failed to serialize result",
            ))
        }
    }
}

fn invalid_params(id: RequestId, method: &str, err: serde_json::Error) -> JSONRPCMessage {
    warn!("Invalid params for {} request {}: {}", method, id, err);
    JSONRPCMessage::Error(JSONRPCError::new(
        id,
        INVALID_PARAMS,
        Error::InvalidParams(format!("{method}: {err}")).to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{schema::CodeResponse, session::MemorySessionStore};

    fn flow() -> AuthorizeCodeFlow {
        AuthorizeCodeFlow::builder(Arc::new(MemorySessionStore::new())).build()
    }

    fn request(method: &str, params: serde_json::Value) -> JSONRPCRequest {
        JSONRPCRequest::new(RequestId::Number(7), method, &params).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_method() {
        match handle_request(&flow(), request("revoke", serde_json::json!({}))).await {
            JSONRPCMessage::Error(e) => {
                assert_eq!(e.id, RequestId::Number(7));
                assert_eq!(e.error.code, METHOD_NOT_FOUND);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_params() {
        let params = serde_json::json!({ "responseTypes": 5 });
        match handle_request(&flow(), request(AUTHORIZE_METHOD, params)).await {
            JSONRPCMessage::Error(e) => assert_eq!(e.error.code, INVALID_PARAMS),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_grant_failure_is_a_result() {
        // No handler issues codes, so the completeness check fails.
        let params = serde_json::json!({ "clientId": "app", "responseTypes": ["code"] });
        match handle_request(&flow(), request(AUTHORIZE_METHOD, params)).await {
            JSONRPCMessage::Response(r) => {
                let response: CodeResponse = r.result().unwrap();
                assert!(!response.success);
                assert!(response.failure.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
