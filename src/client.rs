use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{Error, Result},
    schema::{
        CodeRequest, CodeResponse, JSONRPCError, JSONRPCMessage, JSONRPCRequest, JSONRPCResponse,
        RequestId, TokenRequest, TokenResponse, AUTHORIZE_METHOD, EXCHANGE_METHOD,
        INVALID_PARAMS, METHOD_NOT_FOUND,
    },
    transport::{GenericDuplex, StreamTransport, TcpClientTransport, Transport, TransportStream},
};

/// Type for handling either a response or error from JSON-RPC
#[derive(Debug)]
enum ResponseOrError {
    Response(JSONRPCResponse),
    Error(JSONRPCError),
}

type TransportSink = Arc<Mutex<SplitSink<Box<dyn TransportStream>, JSONRPCMessage>>>;
type PendingRequests = Arc<DashMap<String, oneshot::Sender<ResponseOrError>>>;

/// Client for a flow server. Requests may be issued concurrently from
/// clones; responses are matched to requests by id.
#[derive(Clone)]
pub struct Client {
    transport_tx: TransportSink,
    pending_requests: PendingRequests,
    next_request_id: Arc<AtomicU64>,
    closed: CancellationToken,
    _reader: Arc<ReaderTask>,
}

/// Aborts the response reader once the last client clone is dropped.
struct ReaderTask(JoinHandle<()>);

impl Drop for ReaderTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Client {
    /// Connect using the provided transport
    pub async fn connect(mut transport: Box<dyn Transport>) -> Result<Self> {
        transport.connect().await?;
        let stream = transport.framed()?;
        let (sink, stream) = stream.split();

        let pending_requests: PendingRequests = Arc::new(DashMap::new());
        let closed = CancellationToken::new();
        let reader = tokio::spawn(read_responses(
            stream,
            pending_requests.clone(),
            closed.clone(),
        ));

        info!("Flow client connected");
        Ok(Self {
            transport_tx: Arc::new(Mutex::new(sink)),
            pending_requests,
            next_request_id: Arc::new(AtomicU64::new(1)),
            closed,
            _reader: Arc::new(ReaderTask(reader)),
        })
    }

    pub async fn connect_tcp(addr: impl Into<String>) -> Result<Self> {
        Self::connect(Box::new(TcpClientTransport::new(addr))).await
    }

    pub async fn connect_stream<R, W>(reader: R, writer: W) -> Result<Self>
    where
        R: tokio::io::AsyncRead + Send + Sync + Unpin + 'static,
        W: tokio::io::AsyncWrite + Send + Sync + Unpin + 'static,
    {
        let duplex = GenericDuplex::new(reader, writer);
        Self::connect(Box::new(StreamTransport::new(duplex))).await
    }

    pub async fn authorize(&self, request: &CodeRequest) -> Result<CodeResponse> {
        self.request(AUTHORIZE_METHOD, request).await
    }

    pub async fn exchange(&self, request: &TokenRequest) -> Result<TokenResponse> {
        self.request(EXCHANGE_METHOD, request).await
    }

    /// Send a request and wait for response
    pub async fn request<Req, Res>(&self, method: &str, params: &Req) -> Result<Res>
    where
        Req: serde::Serialize,
        Res: serde::de::DeserializeOwned,
    {
        if self.closed.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }
        let id = self.next_request_id();
        let request = JSONRPCRequest::new(RequestId::String(id.clone()), method, params)?;

        let (tx, rx) = oneshot::channel();
        self.pending_requests.insert(id.clone(), tx);
        debug!(
            "Stored pending request with ID: {}, total pending: {}",
            id,
            self.pending_requests.len()
        );

        if let Err(e) = self.send_message(JSONRPCMessage::Request(request)).await {
            self.pending_requests.remove(&id);
            return Err(e);
        }

        let reply = tokio::select! {
            biased;
            reply = rx => reply,
            _ = self.closed.cancelled() => {
                self.pending_requests.remove(&id);
                return Err(Error::ConnectionClosed);
            }
        };

        match reply {
            Ok(ResponseOrError::Response(response)) => response.result().map_err(|e| {
                Error::InvalidMessageFormat {
                    message: format!("Failed to deserialize {method} response: {e}"),
                }
            }),
            Ok(ResponseOrError::Error(error)) => match error.error.code {
                METHOD_NOT_FOUND => Err(Error::MethodNotFound(error.error.message)),
                INVALID_PARAMS => Err(Error::InvalidParams(format!(
                    "{}: {}",
                    method, error.error.message
                ))),
                _ => Err(Error::Transport(format!(
                    "JSON-RPC error {}: {}",
                    error.error.code, error.error.message
                ))),
            },
            Err(_) => {
                self.pending_requests.remove(&id);
                Err(Error::ConnectionClosed)
            }
        }
    }

    async fn send_message(&self, message: JSONRPCMessage) -> Result<()> {
        let mut tx = self.transport_tx.lock().await;
        tx.send(message).await
    }

    fn next_request_id(&self) -> String {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        format!("req-{id}")
    }

    /// Close the write side of the connection.
    pub async fn close(&self) -> Result<()> {
        let mut tx = self.transport_tx.lock().await;
        tx.close().await
    }
}

async fn read_responses(
    mut stream: SplitStream<Box<dyn TransportStream>>,
    pending_requests: PendingRequests,
    closed: CancellationToken,
) {
    while let Some(result) = stream.next().await {
        match result {
            Ok(JSONRPCMessage::Response(response)) => {
                let id = response.id.to_string();
                match pending_requests.remove(&id) {
                    Some((_, tx)) => {
                        let _ = tx.send(ResponseOrError::Response(response));
                    }
                    None => warn!("Received response for unknown request ID: {}", id),
                }
            }
            Ok(JSONRPCMessage::Error(error)) => {
                let id = error.id.to_string();
                match pending_requests.remove(&id) {
                    Some((_, tx)) => {
                        let _ = tx.send(ResponseOrError::Error(error));
                    }
                    None => warn!("Received error for unknown request ID: {}", id),
                }
            }
            Ok(other) => warn!("Client received unexpected message: {:?}", other),
            Err(e) => {
                error!("Error reading message: {}", e);
                break;
            }
        }
    }

    debug!("Server closed the connection");
    closed.cancel();
    pending_requests.clear();
}
