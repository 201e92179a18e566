//! Framed duplex session between one data plane and one control plane.
//!
//! # Responsibilities
//! - Open the session (data plane) or accept it (control plane) as a WebSocket
//!   over an already established TLS stream
//! - Carry typed frames: binary payload, ping, pong, close
//! - Enforce the frame payload cap
//! - Distinguish receive timeouts from fatal errors
//!
//! # Design Decisions
//! - The socket is split into a sender and a receiver so the send and receive
//!   duties can run concurrently
//! - Handshake metadata travels as query arguments of the upgrade request

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use url::Url;

use crate::protocol::codec::CodecError;

/// Upgrade path served by the control plane.
pub const SYNC_PATH: &str = "/v1/outlet";

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No frame within the poll interval. Tolerated by the liveness policy.
    #[error("no frame received within {0:?}")]
    Timeout(Duration),

    /// Nothing received for longer than the liveness window.
    #[error("peer silent for {silence:?}, liveness window exceeded")]
    LivenessExpired { silence: Duration },

    #[error("connection closed")]
    Closed,

    #[error("frame rejected: {0}")]
    Codec(#[from] CodecError),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("upgrade rejected with status {0}")]
    Rejected(StatusCode),

    #[error("invalid endpoint: {0}")]
    Endpoint(String),

    #[error("websocket error: {0}")]
    WebSocket(tungstenite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Timeout-class errors are subject to the liveness window instead of
    /// tearing the session down immediately.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout(_) | TransportError::LivenessExpired { .. }
        )
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportError::Closed
            }
            tungstenite::Error::Capacity(e) => {
                tracing::debug!(error = %e, "Frame over capacity");
                TransportError::Codec(CodecError::TooLarge {
                    limit: crate::protocol::MAX_PAYLOAD_BYTES,
                })
            }
            tungstenite::Error::Http(response) => TransportError::Rejected(response.status()),
            tungstenite::Error::Io(e) => TransportError::Io(e),
            other => TransportError::WebSocket(other),
        }
    }
}

/// A received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Binary(_) => "binary",
            Frame::Ping(_) => "ping",
            Frame::Pong(_) => "pong",
            Frame::Close => "close",
        }
    }
}

/// WebSocket limits for sync sessions.
pub fn websocket_config(max_payload: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_payload);
    config.max_frame_size = Some(max_payload);
    config
}

/// Identity carried by the upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub node_id: String,
    pub hostname: String,
    pub version: Option<String>,
}

impl HandshakeRequest {
    /// Extract the handshake from an upgrade request URI.
    pub fn from_uri(uri: &Uri) -> Result<Self, (StatusCode, &'static str)> {
        if uri.path() != SYNC_PATH {
            return Err((StatusCode::NOT_FOUND, "unknown sync endpoint"));
        }

        let mut node_id = None;
        let mut hostname = None;
        let mut version = None;
        for (key, value) in url::form_urlencoded::parse(uri.query().unwrap_or("").as_bytes()) {
            match key.as_ref() {
                "node_id" if !value.is_empty() => node_id = Some(value.into_owned()),
                "node_hostname" => hostname = Some(value.into_owned()),
                "node_version" if !value.is_empty() => version = Some(value.into_owned()),
                _ => {}
            }
        }

        let node_id = node_id.ok_or((StatusCode::BAD_REQUEST, "'node_id' argument is required"))?;
        Ok(Self {
            node_id,
            hostname: hostname.unwrap_or_default(),
            version,
        })
    }

    /// Render the upgrade URL for a control plane address (`host:port`).
    pub fn endpoint(&self, control_plane: &str) -> Result<Url, TransportError> {
        let base = format!("wss://{}{}", control_plane, SYNC_PATH);
        let mut params = vec![
            ("node_id", self.node_id.as_str()),
            ("node_hostname", self.hostname.as_str()),
        ];
        if let Some(version) = &self.version {
            params.push(("node_version", version.as_str()));
        }
        Url::parse_with_params(&base, params).map_err(|e| TransportError::Endpoint(e.to_string()))
    }
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Complete the client side of the upgrade over an established stream.
pub async fn connect<S>(
    stream: S,
    endpoint: &Url,
    max_payload: usize,
) -> Result<(FrameSender<S>, FrameReceiver<S>), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = endpoint.as_str().into_client_request()?;
    let (socket, _response) =
        tokio_tungstenite::client_async_with_config(request, stream, Some(websocket_config(max_payload)))
            .await?;
    Ok(split(socket))
}

/// Complete the server side of the upgrade, capturing the peer's handshake.
///
/// Requests without a `node_id` are answered with `400` and never upgraded.
pub async fn accept<S>(
    stream: S,
    max_payload: usize,
) -> Result<(HandshakeRequest, FrameSender<S>, FrameReceiver<S>), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut captured = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match HandshakeRequest::from_uri(request.uri()) {
            Ok(handshake) => {
                captured = Some(handshake);
                Ok(response)
            }
            Err((status, reason)) => Err(reject(status, reason)),
        }
    };

    let socket = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        callback,
        Some(websocket_config(max_payload)),
    )
    .await?;

    let handshake = captured
        .ok_or_else(|| TransportError::Protocol("upgrade completed without a handshake".into()))?;
    let (sender, receiver) = split(socket);
    Ok((handshake, sender, receiver))
}

/// Split an upgraded socket into independent halves.
pub fn split<S>(socket: WebSocketStream<S>) -> (FrameSender<S>, FrameReceiver<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (sink, stream) = socket.split();
    (FrameSender { sink }, FrameReceiver { stream })
}

/// Sending half of a session.
pub struct FrameSender<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

impl<S> FrameSender<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub async fn send_binary(&mut self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.sink.send(Message::Binary(payload.into())).await?;
        Ok(())
    }

    pub async fn send_ping(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.sink.send(Message::Ping(payload.to_vec().into())).await?;
        Ok(())
    }

    pub async fn send_pong(&mut self) -> Result<(), TransportError> {
        self.sink.send(Message::Pong(Default::default())).await?;
        Ok(())
    }

    /// Send a close frame. Errors are ignored, the peer may already be gone.
    pub async fn close(&mut self) {
        if let Err(e) = self.sink.send(Message::Close(None)).await {
            tracing::trace!(error = %e, "Close frame not delivered");
        }
        let _ = self.sink.close().await;
    }
}

/// Receiving half of a session.
pub struct FrameReceiver<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

impl<S> FrameReceiver<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wait up to `wait` for the next frame.
    pub async fn recv_frame(&mut self, wait: Duration) -> Result<Frame, TransportError> {
        let message = match tokio::time::timeout(wait, self.stream.next()).await {
            Err(_) => return Err(TransportError::Timeout(wait)),
            Ok(None) => return Err(TransportError::Closed),
            Ok(Some(result)) => result?,
        };

        match message {
            Message::Binary(payload) => Ok(Frame::Binary(payload.to_vec())),
            Message::Ping(payload) => Ok(Frame::Ping(payload.to_vec())),
            Message::Pong(payload) => Ok(Frame::Pong(payload.to_vec())),
            Message::Close(_) => Ok(Frame::Close),
            Message::Text(_) => Err(TransportError::Protocol("text frames are not supported".into())),
            Message::Frame(_) => Err(TransportError::Protocol("unexpected raw frame".into())),
        }
    }
}
