//! HTTP transports: plain request/response, NDJSON streaming, and SSE.
//!
//! One axum router serves all three wire protocols on configurable paths:
//!
//! - `POST {mcp_path}` — one JSON-RPC request per POST, response in the
//!   body. Engine errors are HTTP 200 with a JSON-RPC error body; only
//!   transport-level failures use 4xx codes.
//! - `POST {stream_path}` — same handler; when the client's `Accept`
//!   includes `application/x-ndjson` the response is a chunked NDJSON
//!   stream, otherwise it falls through to single-response mode.
//! - `GET {sse_path}` — `text/event-stream`; a `connected` event carrying
//!   the client id, then `message` events. Requests are POSTed to the
//!   sibling message path and answered over the stream.
//!
//! Clients may pin their identity with an `x-client-id` header; otherwise
//! one is generated.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{
        IntoResponse, Response as HttpResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    context::RequestContext,
    engine::{EngineReply, RequestEngine},
    error::{Error, Result},
    schema::{ErrorResponse, Message, PARSE_ERROR},
    transport::{ConnectionHandle, Connections, Transport},
};

/// Header carrying a client-chosen stable identifier.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// NDJSON media type used for content negotiation.
pub const NDJSON_MIME: &str = "application/x-ndjson";

/// HTTP transport multiplexing plain, NDJSON, and SSE protocols.
#[derive(Clone)]
pub struct HttpTransport {
    engine: Arc<RequestEngine>,
    sessions: Connections,
    shutdown: CancellationToken,
}

impl HttpTransport {
    /// Create a transport backed by the given engine.
    pub fn new(engine: Arc<RequestEngine>) -> Self {
        Self {
            engine,
            sessions: Connections::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the router with the engine-configured paths.
    pub fn router(&self) -> Router {
        let config = self.engine.config();
        let mut router = Router::new()
            .route(&config.mcp_path, post(handle_rpc))
            .route(&config.sse_path, get(handle_sse))
            .route(&config.sse_message_path, post(handle_sse_message));
        if config.stream_path != config.mcp_path {
            router = router.route(&config.stream_path, post(handle_rpc));
        }
        router.layer(CorsLayer::permissive()).with_state(self.clone())
    }

    /// Bind and serve; returns a handle that stops the server.
    pub async fn serve(&self, addr: &str) -> Result<HttpServerHandle> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Transport(format!("failed to bind {addr}: {e}")))?;
        let bound_addr = listener
            .local_addr()
            .map_err(|e| Error::Transport(format!("failed to read local address: {e}")))?;

        let router = self.router();
        let shutdown = self.shutdown.clone();
        info!(%bound_addr, "HTTP transport listening");

        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown.cancelled().await;
                })
                .await
                .map_err(|e| Error::Transport(format!("server error: {e}")))
        });

        Ok(HttpServerHandle {
            task,
            shutdown: self.shutdown.clone(),
            bound_addr,
        })
    }

    /// Serve one request/response exchange.
    async fn serve_single(&self, message: Value, client_id: String) -> HttpResponse {
        // The receiver stays alive for the duration of the request so that
        // incidental sends from handlers do not error.
        let (handle, _outbound) = ConnectionHandle::channel(client_id);
        let ctx = RequestContext::builder(handle).build();

        match self.engine.process_request(message, &ctx).await {
            EngineReply::Message(message) => Json(message).into_response(),
            EngineReply::Streaming | EngineReply::None => StatusCode::ACCEPTED.into_response(),
        }
    }

    /// Serve one request as a chunked NDJSON stream.
    async fn serve_ndjson(&self, message: Value, client_id: String) -> HttpResponse {
        let (handle, mut outbound) = ConnectionHandle::channel(client_id);
        let ctx = RequestContext::builder(handle.clone()).streaming(true).build();

        match self.engine.process_request(message, &ctx).await {
            EngineReply::Streaming => {
                let stream = async_stream::stream! {
                    // First response is streaming_started; the second
                    // response (or any error) is the terminal message.
                    let mut responses_seen = 0u8;
                    while let Some(message) = outbound.recv().await {
                        let Ok(line) = encode_line(&message) else {
                            error!("failed to encode outbound NDJSON message");
                            break;
                        };
                        let terminal = match &message {
                            Message::Error(_) => true,
                            Message::Response(_) => {
                                responses_seen += 1;
                                responses_seen >= 2
                            }
                            _ => false,
                        };
                        yield Ok::<_, std::convert::Infallible>(line);
                        if terminal {
                            break;
                        }
                    }
                    handle.close();
                };
                ndjson_response(Body::from_stream(stream))
            }
            EngineReply::Message(message) => match encode_line(&message) {
                Ok(line) => ndjson_response(Body::from(line)),
                Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            },
            EngineReply::None => StatusCode::ACCEPTED.into_response(),
        }
    }
}

/// Handle for a running HTTP server.
pub struct HttpServerHandle {
    task: JoinHandle<Result<()>>,
    shutdown: CancellationToken,
    /// The actual bound address (useful when binding port 0).
    pub bound_addr: std::net::SocketAddr,
}

impl HttpServerHandle {
    /// Stop the server and wait for the serve task to finish.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.task
            .await
            .map_err(|e| Error::Transport(format!("server task failed: {e}")))?
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, client_id: &str, message: Message) -> Result<()> {
        self.sessions.send(client_id, message)
    }

    async fn broadcast(&self, message: Message) -> Result<()> {
        // Only SSE clients hold a persistent channel; plain request/response
        // clients are unreachable outside their own request.
        if self.sessions.is_empty() {
            return Err(Error::BroadcastUnsupported);
        }
        self.sessions.broadcast(&message);
        Ok(())
    }

    async fn close(&self, client_id: &str) -> Result<()> {
        self.sessions.close(client_id);
        self.engine.evict_session(client_id);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        self.sessions.close_all();
        Ok(())
    }
}

/// POST handler for the plain and NDJSON paths.
async fn handle_rpc(
    State(transport): State<HttpTransport>,
    headers: HeaderMap,
    body: String,
) -> HttpResponse {
    if !content_type_is_json(&headers) {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Unsupported media type").into_response();
    }

    let message = match serde_json::from_str::<Value>(&body) {
        Ok(message) => message,
        Err(e) => return parse_error_response(e),
    };

    let client_id = client_id_from_headers(&headers)
        .unwrap_or_else(|| transport.engine.next_client_id());

    if accepts_ndjson(&headers) {
        transport.serve_ndjson(message, client_id).await
    } else {
        transport.serve_single(message, client_id).await
    }
}

/// GET handler opening an SSE event stream.
async fn handle_sse(State(transport): State<HttpTransport>, headers: HeaderMap) -> HttpResponse {
    let client_id =
        client_id_from_headers(&headers).unwrap_or_else(|| Uuid::new_v4().to_string());

    let (handle, mut outbound) = ConnectionHandle::channel(client_id.clone());
    transport.sessions.insert(handle.clone());
    info!(client_id, "SSE client connected");

    let sessions = transport.sessions.clone();
    let engine = transport.engine.clone();
    let stream = async_stream::stream! {
        let _guard = SseSessionGuard {
            sessions,
            engine,
            client_id: client_id.clone(),
        };

        yield Ok::<_, std::convert::Infallible>(
            Event::default()
                .event("connected")
                .data(json!({"client_id": client_id}).to_string()),
        );

        loop {
            tokio::select! {
                _ = handle.closed() => break,
                message = outbound.recv() => match message {
                    Some(message) => {
                        let Ok(data) = serde_json::to_string(&message) else {
                            error!("failed to encode outbound SSE message");
                            break;
                        };
                        yield Ok(Event::default().event("message").data(data));
                    }
                    None => break,
                },
            }
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// POST handler accepting JSON-RPC requests for SSE clients.
async fn handle_sse_message(
    State(transport): State<HttpTransport>,
    headers: HeaderMap,
    body: String,
) -> HttpResponse {
    if !content_type_is_json(&headers) {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Unsupported media type").into_response();
    }

    let message = match serde_json::from_str::<Value>(&body) {
        Ok(message) => message,
        Err(e) => return parse_error_response(e),
    };

    let client_id = match client_id_from_headers(&headers)
        .or_else(|| transport.sessions.single_client_id())
    {
        Some(client_id) => client_id,
        None => {
            return (StatusCode::BAD_REQUEST, "Missing x-client-id header").into_response();
        }
    };

    let Some(handle) = transport.sessions.get(&client_id) else {
        return (StatusCode::NOT_FOUND, "Unknown client").into_response();
    };

    let ctx = RequestContext::builder(handle.clone()).streaming(true).build();
    match transport.engine.process_request(message, &ctx).await {
        EngineReply::Message(message) => {
            handle.send(message).ok();
        }
        EngineReply::Streaming | EngineReply::None => {}
    }

    (StatusCode::ACCEPTED, Json(json!({"status": "accepted"}))).into_response()
}

/// Evicts an SSE session when its stream is dropped.
struct SseSessionGuard {
    sessions: Connections,
    engine: Arc<RequestEngine>,
    client_id: String,
}

impl Drop for SseSessionGuard {
    fn drop(&mut self) {
        debug!(client_id = %self.client_id, "SSE client disconnected");
        self.sessions.close(&self.client_id);
        self.engine.evict_session(&self.client_id);
    }
}

/// Whether the request body claims to be JSON.
fn content_type_is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().starts_with("application/json"))
}

/// Whether the client negotiated NDJSON streaming.
fn accepts_ndjson(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains(NDJSON_MIME))
}

/// Read the stable client id header, if present and non-empty.
fn client_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

/// A 400 response carrying a `-32700` JSON-RPC envelope.
fn parse_error_response(e: serde_json::Error) -> HttpResponse {
    let envelope = Message::Error(ErrorResponse::new(
        None,
        PARSE_ERROR,
        format!("Parse error: {e}"),
    ));
    (StatusCode::BAD_REQUEST, Json(envelope)).into_response()
}

/// Encode one newline-terminated NDJSON line.
fn encode_line(message: &Message) -> Result<Bytes> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

/// A chunked NDJSON response.
fn ndjson_response(body: Body) -> HttpResponse {
    match HttpResponse::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, NDJSON_MIME)
        .header(header::CONNECTION, "keep-alive")
        .body(body)
    {
        Ok(response) => response,
        Err(e) => {
            error!(%e, "failed to build NDJSON response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
