//! HTTP listener: routes chunk calls to the [`ChunkService`], serves stats,
//! forwards everything else to the origin.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use chunk_dl::protocol::{
    encode_buffer, ChunkData, ChunkRequestBody, Envelope, DOWNLOAD_ATTACH_PATH,
};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::passthrough::Passthrough;
use super::service::ChunkService;
use super::types::ChunkRequest;
use crate::error::{ProxyError, ServeError};

pub const STATS_PATH: &str = "/proxy/stats";

/// Shared by every connection task
pub struct AppState {
    pub service: ChunkService,
    pub passthrough: Passthrough,
    /// Chunk length used when a request carries no `Length`
    pub default_chunk_size: u64,
}

pub struct ProxyServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: Arc<AppState>,
}

impl ProxyServer {
    pub async fn bind(addr: &str, state: Arc<AppState>) -> Result<Self, ServeError> {
        let bind_err = |source| ServeError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        Ok(ProxyServer {
            listener,
            local_addr,
            state,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Accept connections until `shutdown` fires
    pub async fn serve(self, shutdown: CancellationToken) {
        info!("proxy_listen: {}", self.local_addr);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("connection from {}", peer);
                            let state = Arc::clone(&self.state);
                            let shutdown = shutdown.clone();
                            tokio::spawn(serve_connection(stream, peer, state, shutdown));
                        }
                        Err(e) => error!("accept failed: {}", e),
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("proxy_listen: shutdown requested, stopping accept loop");
                    break;
                }
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("set_nodelay failed for {}: {}", peer, e);
    }
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let state = Arc::clone(&state);
        async move { handle_request(req, state).await }
    });

    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);
    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = result {
        if e.is_incomplete_message() || e.is_canceled() {
            debug!("client {} disconnected: {}", peer, e);
        } else {
            error!("connection error from {}: {}", peer, e);
        }
    }
}

pub async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return Ok(error_response(&ProxyError::BadRequest(format!(
                "failed to read request body: {}",
                e
            ))))
        }
    };

    let response = match (&parts.method, parts.uri.path()) {
        (&Method::POST, DOWNLOAD_ATTACH_PATH) => handle_chunk(&body, &state).await,
        (&Method::GET, STATS_PATH) => json_response(StatusCode::OK, &state.service.stats().await),
        _ => match state.passthrough.forward(&parts, body).await {
            Ok(response) => response,
            Err(e) => {
                warn!("passthrough failed for {}: {}", parts.uri.path(), e);
                json_response(
                    StatusCode::BAD_GATEWAY,
                    &Envelope::<()>::error(
                        StatusCode::BAD_GATEWAY.as_u16() as i64,
                        format!("origin unreachable: {}", e),
                    ),
                )
            }
        },
    };
    Ok(response)
}

async fn handle_chunk(body: &[u8], state: &AppState) -> Response<Full<Bytes>> {
    let parsed: ChunkRequestBody = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return error_response(&ProxyError::BadRequest(format!("invalid JSON body: {}", e)))
        }
    };

    let request = ChunkRequest {
        attach_id: parsed.attach_id.into(),
        offset: parsed.offset.unwrap_or(0),
        length: parsed.length.unwrap_or(state.default_chunk_size),
        wxid: parsed.wxid,
    };

    match state.service.get_chunk(&request).await {
        Ok(chunk) => {
            debug!(
                "chunk_served: {} offset={} len={} last={}",
                request.attach_id,
                chunk.offset,
                chunk.bytes.len(),
                chunk.is_last
            );
            json_response(
                StatusCode::OK,
                &Envelope::ok(ChunkData {
                    total_len: chunk.total_size,
                    offset: chunk.offset,
                    start_pos: chunk.offset,
                    is_last: chunk.is_last,
                    buffer: encode_buffer(&chunk.bytes),
                }),
            )
        }
        Err(e) => {
            warn!("chunk_rejected: {} offset={}: {}", request.attach_id, request.offset, e);
            error_response(&e)
        }
    }
}

fn error_response(err: &ProxyError) -> Response<Full<Bytes>> {
    let status = err.status_code();
    json_response(
        status,
        &Envelope::<()>::error(status.as_u16() as i64, err.to_string()),
    )
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let (status, body) = match serde_json::to_vec(value) {
        Ok(body) => (status, body),
        Err(e) => {
            error!("failed to encode response: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
        }
    };
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
