//! Session mirror
//!
//! The client's local copy of server-held session state. Every mutation
//! swaps in a whole new snapshot, so a reader sees either the old value or
//! the new one, never a half-applied update. Subscribers are told about
//! each change through the client's event channel.

use std::sync::Arc;

use arc_swap::ArcSwap;
use preauth_protocol::{Download, DownloadToken, Executable, SessionId, SessionState};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::transport::ConnectionState;

/// Session id and downloads, which are only ever known together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirroredSession {
    pub id: SessionId,
    pub downloads: Vec<Download>,
}

/// Snapshot of the mirrored state. `None` means unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionMirror {
    pub session: Option<MirroredSession>,
    pub executables: Option<Vec<Executable>>,
    pub build_log: Option<String>,
}

impl SessionMirror {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::unknown()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn downloads(&self) -> Option<&[Download]> {
        self.session.as_ref().map(|s| s.downloads.as_slice())
    }

    pub fn executables(&self) -> Option<&[Executable]> {
        self.executables.as_deref()
    }

    pub fn build_log(&self) -> Option<&str> {
        self.build_log.as_deref()
    }

    pub fn has_download(&self, token: DownloadToken) -> bool {
        self.downloads()
            .is_some_and(|downloads| downloads.iter().any(|d| d.token == token))
    }
}

/// Events published to subscribers of a client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    MirrorChanged(Arc<SessionMirror>),
    Notified { token: DownloadToken },
    ConnectionChanged(ConnectionState),
}

/// Owner of the mirror. Only the client actor writes through it.
pub struct MirrorStore {
    current: Arc<ArcSwap<SessionMirror>>,
    events: broadcast::Sender<ClientEvent>,
}

impl MirrorStore {
    pub fn new(events: broadcast::Sender<ClientEvent>) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(SessionMirror::unknown())),
            events,
        }
    }

    /// Shared read side, for lock-free snapshots from other tasks.
    pub fn reader(&self) -> Arc<ArcSwap<SessionMirror>> {
        Arc::clone(&self.current)
    }

    pub fn snapshot(&self) -> Arc<SessionMirror> {
        self.current.load_full()
    }

    /// Replace session id and downloads together.
    pub fn apply_state(&mut self, state: SessionState) -> bool {
        let mut next = SessionMirror::clone(&self.current.load());
        next.session = Some(MirroredSession {
            id: state.id,
            downloads: state.downloads,
        });
        self.publish(next)
    }

    /// Replace the executable catalog and build log together.
    pub fn apply_executables(&mut self, build_log: Option<String>, executables: Vec<Executable>) -> bool {
        let mut next = SessionMirror::clone(&self.current.load());
        next.executables = Some(executables);
        next.build_log = build_log;
        self.publish(next)
    }

    /// Forget everything; called whenever connectivity is lost.
    pub fn reset(&mut self) -> bool {
        self.publish(SessionMirror::unknown())
    }

    fn publish(&mut self, next: SessionMirror) -> bool {
        if **self.current.load() == next {
            return false;
        }
        let next = Arc::new(next);
        self.current.store(Arc::clone(&next));
        // No subscribers is fine.
        let _ = self.events.send(ClientEvent::MirrorChanged(next));
        true
    }
}
