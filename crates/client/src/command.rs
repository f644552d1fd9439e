//! Commands sent to the client actor from [`crate::ClientHandle`]s, and the
//! single queue they share with transport events.

use preauth_protocol::DownloadToken;
use tokio::sync::{mpsc, oneshot};

use crate::transport::{EventSink, TransportMessage};

/// Callback invoked once per `notify` frame, on the client task.
pub type NotifyCallback = Box<dyn FnMut(DownloadToken) + Send + 'static>;

pub enum ClientCommand {
    /// Ask the server to revoke a download token (fire-and-forget).
    RequestDeletion { token: DownloadToken },

    /// Replace (or clear) the notification callback.
    SetNotifyHandler { callback: Option<NotifyCallback> },

    /// Tear the client down; `reply` fires once the channel is closed and
    /// the reconnect timer cancelled.
    Dispose { reply: oneshot::Sender<()> },
}

impl std::fmt::Debug for ClientCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientCommand::RequestDeletion { token } => f
                .debug_struct("RequestDeletion")
                .field("token", token)
                .finish(),
            ClientCommand::SetNotifyHandler { callback } => f
                .debug_struct("SetNotifyHandler")
                .field("set", &callback.is_some())
                .finish(),
            ClientCommand::Dispose { .. } => f.write_str("Dispose"),
        }
    }
}

/// Everything the actor reacts to, apart from timers. Commands and
/// transport events share this one queue, so they are handled in the
/// order they were produced.
#[derive(Debug)]
pub enum ActorInput {
    Transport(TransportMessage),
    Command(ClientCommand),
    /// The last [`crate::ClientHandle`] was dropped.
    Released,
}

/// Sender side of the actor's queue.
pub type Inbox = mpsc::UnboundedSender<ActorInput>;

impl EventSink for Inbox {
    fn deliver(&self, message: TransportMessage) {
        let _ = self.send(ActorInput::Transport(message));
    }
}
