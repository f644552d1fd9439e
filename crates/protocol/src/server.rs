//! Server → Client messages

use serde::{Deserialize, Serialize};

use crate::types::*;

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    // Full session sync
    State {
        session: SessionState,
    },

    // Catalog of downloadable executables
    Executables {
        build_log: Option<String>,
        executables: Vec<Executable>,
    },

    // One of the session's downloads was used
    Notify {
        token: DownloadToken,
    },
}

impl ServerMessage {
    /// Discriminator values this version understands.
    pub const KNOWN_TYPES: [&'static str; 3] = ["state", "executables", "notify"];

    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::State { .. } => "state",
            ServerMessage::Executables { .. } => "executables",
            ServerMessage::Notify { .. } => "notify",
        }
    }

    pub fn is_known_type(name: &str) -> bool {
        Self::KNOWN_TYPES.contains(&name)
    }
}
