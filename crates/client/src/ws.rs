//! WebSocket transport built on tokio-tungstenite.
//!
//! Each `open` spawns one connection task. The task reports `Opened`, every
//! text frame, and finally `Closed` through its [`ConnectionLink`].
//!
//! The session cookie handed out by the server on the first handshake is
//! replayed on every later one, so a reconnect lands in the same session.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use preauth_protocol::SESSION_COOKIE;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{COOKIE, SET_COOKIE};
use tokio_tungstenite::tungstenite::http::{HeaderMap, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::DEFAULT_CONNECT_TIMEOUT;
use crate::error::TransportError;
use crate::supervisor::Generation;
use crate::transport::{connection, ConnectionHandle, ConnectionLink, EventSender, Outbound, Transport};

type SessionJar = Arc<Mutex<Option<String>>>;

/// Production [`Transport`].
#[derive(Debug, Clone)]
pub struct WsTransport {
    connect_timeout: Duration,
    session: SessionJar,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl WsTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            session: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_session_cookie(self, session: Option<String>) -> Self {
        if let Ok(mut jar) = self.session.lock() {
            *jar = session;
        }
        self
    }

    /// Session id currently presented on handshakes.
    pub fn session_cookie(&self) -> Option<String> {
        self.session.lock().ok().and_then(|jar| jar.clone())
    }
}

impl Transport for WsTransport {
    fn open(&mut self, url: &Url, generation: Generation, events: EventSender) -> ConnectionHandle {
        let (handle, link) = connection(generation, events);
        tokio::spawn(run_connection(
            url.clone(),
            link,
            self.connect_timeout,
            Arc::clone(&self.session),
        ));
        handle
    }
}

async fn run_connection(url: Url, mut link: ConnectionLink, connect_timeout: Duration, session: SessionJar) {
    let generation = link.generation();
    let cookie = session.lock().ok().and_then(|jar| jar.clone());

    let request = match build_request(&url, cookie.as_deref()) {
        Ok(request) => request,
        Err(e) => {
            warn!(
                component = "transport",
                event = "transport.request.invalid",
                generation,
                error = %e,
                "Failed to build handshake request"
            );
            link.closed(Some(e.to_string()));
            return;
        }
    };

    debug!(
        component = "transport",
        event = "transport.connect.started",
        generation,
        url = %url,
        "Connecting"
    );

    let handshake = tokio::time::timeout(connect_timeout, connect_async(request));
    let (ws, response) = tokio::select! {
        result = handshake => match result {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                let e = TransportError::from(e);
                debug!(
                    component = "transport",
                    event = "transport.connect.failed",
                    generation,
                    error = %e,
                    "Handshake failed"
                );
                link.closed(Some(e.to_string()));
                return;
            }
            Err(_) => {
                let e = TransportError::HandshakeTimeout(connect_timeout);
                debug!(
                    component = "transport",
                    event = "transport.connect.timeout",
                    generation,
                    error = %e,
                    "Handshake timed out"
                );
                link.closed(Some(e.to_string()));
                return;
            }
        },
        _ = link.next_outbound() => {
            // Only `Close` (or a dropped handle) can arrive before open.
            link.closed(Some("closed before open".to_string()));
            return;
        }
    };

    if let Some(assigned) = session_from_headers(response.headers()) {
        if let Ok(mut jar) = session.lock() {
            if jar.as_deref() != Some(assigned.as_str()) {
                debug!(
                    component = "transport",
                    event = "transport.session.assigned",
                    generation,
                    session = %assigned,
                    "Server assigned session cookie"
                );
                *jar = Some(assigned);
            }
        }
    }

    info!(
        component = "transport",
        event = "transport.connection.opened",
        generation,
        "WebSocket connection opened"
    );
    link.opened();

    let (mut sink, mut stream) = ws.split();
    let reason = loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => link.frame(text.to_string()),
                Some(Ok(Message::Binary(data))) => {
                    debug!(
                        component = "transport",
                        event = "transport.frame.binary_ignored",
                        generation,
                        bytes = data.len(),
                        "Ignoring binary frame"
                    );
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                }
                // Ping/pong is answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(TransportError::from(e).to_string()),
                None => break None,
            },
            outbound = link.next_outbound() => match outbound {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        break Some(TransportError::from(e).to_string());
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break Some("closed by client".to_string());
                }
            },
        }
    };

    info!(
        component = "transport",
        event = "transport.connection.closed",
        generation,
        reason = reason.as_deref().unwrap_or(""),
        "WebSocket connection closed"
    );
    link.closed(reason);
}

fn build_request(url: &Url, session: Option<&str>) -> Result<Request, TransportError> {
    let mut request = url.as_str().into_client_request()?;
    if let Some(session) = session {
        let value = HeaderValue::from_str(&format!("{}={}", SESSION_COOKIE, session))
            .map_err(|e| TransportError::Request(e.to_string()))?;
        request.headers_mut().insert(COOKIE, value);
    }
    Ok(request)
}

/// Pull the session id out of the handshake response's `Set-Cookie`s.
fn session_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(session_from_set_cookie)
}

fn session_from_set_cookie(header: &str) -> Option<String> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let value = value.trim().trim_matches('"');
    (name.trim() == SESSION_COOKIE && !value.is_empty()).then(|| value.to_string())
}
