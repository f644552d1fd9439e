//! Message dispatcher
//!
//! Decodes inbound text frames and routes each one to a [`MessageHandler`].
//! A bad frame is logged, counted and dropped; it never stops the client.
//! Frames are newline-delimited JSON objects; one WebSocket message may
//! carry several, and they are routed in order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use preauth_protocol::{DownloadToken, Executable, ServerMessage, SessionState, DISCRIMINATOR};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::DispatchError;
use crate::supervisor::Generation;

/// Receives decoded messages, synchronously and in arrival order.
pub trait MessageHandler {
    fn on_state(&mut self, session: SessionState);
    fn on_executables(&mut self, build_log: Option<String>, executables: Vec<Executable>);
    fn on_notify(&mut self, token: DownloadToken);
}

/// Decode one frame. Requires a string `type` naming a known message.
pub fn decode(frame: &str) -> Result<ServerMessage, DispatchError> {
    let value: Value = serde_json::from_str(frame)
        .map_err(|e| DispatchError::MalformedMessage(format!("invalid JSON: {}", e)))?;

    let kind = match value.get(DISCRIMINATOR) {
        Some(Value::String(kind)) => kind.clone(),
        Some(other) => {
            return Err(DispatchError::MalformedMessage(format!(
                "`{}` must be a string, got {}",
                DISCRIMINATOR, other
            )))
        }
        None => {
            return Err(DispatchError::MalformedMessage(format!(
                "missing `{}` field",
                DISCRIMINATOR
            )))
        }
    };

    if !ServerMessage::is_known_type(&kind) {
        return Err(DispatchError::UnknownDiscriminator(kind));
    }

    serde_json::from_value(value)
        .map_err(|e| DispatchError::MalformedMessage(format!("invalid `{}` message: {}", kind, e)))
}

/// Decode `frame` and hand it to `handler`. Returns the message type.
pub fn dispatch<H: MessageHandler>(frame: &str, handler: &mut H) -> Result<&'static str, DispatchError> {
    let message = decode(frame)?;
    let kind = message.type_name();
    match message {
        ServerMessage::State { session } => handler.on_state(session),
        ServerMessage::Executables {
            build_log,
            executables,
        } => handler.on_executables(build_log, executables),
        ServerMessage::Notify { token } => handler.on_notify(token),
    }
    Ok(kind)
}

/// Counters for frames seen by a client.
#[derive(Debug, Default)]
pub struct DispatchStats {
    applied: AtomicU64,
    malformed: AtomicU64,
    unknown: AtomicU64,
    stale: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounts {
    pub applied: u64,
    pub malformed: u64,
    pub unknown: u64,
    pub stale: u64,
}

impl DispatchStats {
    pub fn counts(&self) -> DispatchCounts {
        DispatchCounts {
            applied: self.applied.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Routes frames for one client and keeps its counters.
#[derive(Debug, Default)]
pub struct Dispatcher {
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Route every line of a text frame from the current connection.
    pub fn route<H: MessageHandler>(&self, generation: Generation, frame: &str, handler: &mut H) {
        for line in frame.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match dispatch(line, handler) {
                Ok(kind) => {
                    DispatchStats::bump(&self.stats.applied);
                    debug!(
                        component = "dispatcher",
                        event = "dispatch.applied",
                        generation,
                        message_type = kind,
                        "Applied message"
                    );
                }
                Err(DispatchError::UnknownDiscriminator(kind)) => {
                    DispatchStats::bump(&self.stats.unknown);
                    warn!(
                        component = "dispatcher",
                        event = "dispatch.unknown_type",
                        generation,
                        message_type = %kind,
                        "Received unknown message type"
                    );
                }
                Err(e) => {
                    DispatchStats::bump(&self.stats.malformed);
                    warn!(
                        component = "dispatcher",
                        event = "dispatch.malformed",
                        generation,
                        error = %e,
                        payload_bytes = line.len(),
                        payload_preview = %truncate_for_log(line, 240),
                        "Dropped malformed message"
                    );
                }
            }
        }
    }

    /// Drop a frame from a superseded connection. Expected under rapid
    /// reconnects, so it is only traced.
    pub fn reject_stale(&self, frame: Generation, current: Generation) {
        DispatchStats::bump(&self.stats.stale);
        trace!(
            component = "dispatcher",
            event = "dispatch.stale",
            error = %DispatchError::StaleGeneration { frame, current },
            "Discarded stale frame"
        );
    }
}

fn truncate_for_log(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}
