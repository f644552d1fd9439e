//! Client error types.
//!
//! None of these are fatal to the client: transport failures feed the
//! reconnect loop, and frame errors drop a single frame.

use thiserror::Error;

use crate::supervisor::Generation;
use crate::transport::ConnectionState;

/// Errors surfaced while building or driving a client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Transport failures. Recovered by reconnecting, never shown to the user.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection is not open (state: {0})")]
    NotOpen(ConnectionState),

    #[error("connection task has exited")]
    ChannelClosed,

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("invalid handshake request: {0}")]
    Request(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Reasons an inbound frame was not applied.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("unknown message type: {0}")]
    UnknownDiscriminator(String),

    #[error("frame from generation {frame} ignored (current: {current})")]
    StaleGeneration {
        frame: Generation,
        current: Generation,
    },
}

pub type Result<T> = std::result::Result<T, ClientError>;
