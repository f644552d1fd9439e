//! Transport seam
//!
//! Single responsibility: own one full-duplex text connection and report
//! what happens on it. No knowledge of the message protocol.
//!
//! A connection is split into two halves created together by
//! [`connection`]: the [`ConnectionHandle`] kept by the client, and the
//! [`ConnectionLink`] driven by the transport's connection task. Both
//! share one state cell that only ever moves forward.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::debug;
use url::Url;

use crate::error::TransportError;
use crate::supervisor::Generation;

/// Lifecycle of a single connection, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Something that happened on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Closed { reason: Option<String> },
}

/// A [`TransportEvent`] tagged with the connection attempt it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    pub generation: Generation,
    pub event: TransportEvent,
}

/// Where a connection reports its events.
pub trait EventSink: Send + Sync + 'static {
    fn deliver(&self, message: TransportMessage);
}

impl EventSink for mpsc::UnboundedSender<TransportMessage> {
    fn deliver(&self, message: TransportMessage) {
        // The receiver is gone after dispose; late events have nowhere to go.
        let _ = self.send(message);
    }
}

pub type EventSender = Arc<dyn EventSink>;

/// Opens connections. Implementations spawn whatever task drives the
/// connection and return immediately; progress is reported on `events`.
pub trait Transport: Send + 'static {
    fn open(&mut self, url: &Url, generation: Generation, events: EventSender) -> ConnectionHandle;
}

/// Outbound work for a connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// Create both halves of a new connection in the `Connecting` state.
pub fn connection(generation: Generation, events: EventSender) -> (ConnectionHandle, ConnectionLink) {
    let (state, _) = watch::channel(ConnectionState::Connecting);
    let state = Arc::new(state);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let handle = ConnectionHandle {
        generation,
        state: Arc::clone(&state),
        outbound: outbound_tx,
    };
    let link = ConnectionLink {
        generation,
        state,
        outbound: outbound_rx,
        events,
        finished: false,
    };
    (handle, link)
}

/// Move `cell` forward to `next`. Backward moves are ignored.
fn advance(cell: &watch::Sender<ConnectionState>, next: ConnectionState) -> bool {
    cell.send_if_modified(|current| {
        if next > *current {
            *current = next;
            true
        } else {
            false
        }
    })
}

/// Client half of a connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    generation: Generation,
    state: Arc<watch::Sender<ConnectionState>>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Queue a text frame. Fails without side effects unless the
    /// connection is open.
    pub fn send(&self, text: String) -> Result<(), TransportError> {
        let state = self.state();
        if !state.is_open() {
            return Err(TransportError::NotOpen(state));
        }
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::ChannelClosed)
    }

    /// Start closing. The transport reports `Closed` once the connection
    /// is gone.
    pub fn close(&self) {
        advance(&self.state, ConnectionState::Closing);
        if self.outbound.send(Outbound::Close).is_err() {
            debug!(
                component = "transport",
                event = "transport.close.task_gone",
                generation = self.generation,
                "Connection task already exited"
            );
        }
    }
}

/// Transport half of a connection.
///
/// Dropping a link that never reported `Closed` reports it, so a
/// connection task that dies early still ends the connection.
pub struct ConnectionLink {
    generation: Generation,
    state: Arc<watch::Sender<ConnectionState>>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    events: EventSender,
    finished: bool,
}

impl ConnectionLink {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn opened(&self) {
        if advance(&self.state, ConnectionState::Open) {
            self.emit(TransportEvent::Opened);
        }
    }

    pub fn frame(&self, text: impl Into<String>) {
        self.emit(TransportEvent::Frame(text.into()));
    }

    pub fn closed(mut self, reason: Option<String>) {
        self.finish(reason);
    }

    /// Next piece of outbound work. `None` once the handle is gone.
    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    pub fn try_next_outbound(&mut self) -> Option<Outbound> {
        self.outbound.try_recv().ok()
    }

    fn finish(&mut self, reason: Option<String>) {
        if self.finished {
            return;
        }
        self.finished = true;
        advance(&self.state, ConnectionState::Closed);
        self.emit(TransportEvent::Closed { reason });
    }

    fn emit(&self, event: TransportEvent) {
        self.events.deliver(TransportMessage {
            generation: self.generation,
            event,
        });
    }
}

impl fmt::Debug for ConnectionLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionLink")
            .field("generation", &self.generation)
            .field("state", &self.state())
            .field("finished", &self.finished)
            .finish()
    }
}

impl Drop for ConnectionLink {
    fn drop(&mut self) {
        self.finish(Some("connection task ended".to_string()));
    }
}
