//! Client → Server messages

use serde::{Deserialize, Serialize};

use crate::types::DownloadToken;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Ask the server to revoke one of the session's download tokens.
    /// The server answers with a fresh `state` frame.
    DeleteDownloadToken { token: DownloadToken },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_download_token_wire_shape() {
        let msg = ClientMessage::DeleteDownloadToken { token: 3_405_691_582 };
        let json = serde_json::to_string(&msg).expect("serialize");
        assert_eq!(
            json,
            r#"{"type":"delete-download-token","token":3405691582}"#
        );
    }

    #[test]
    fn parse_delete_download_token() {
        let json = r#"{"type":"delete-download-token","token":9}"#;
        let parsed: ClientMessage = serde_json::from_str(json).expect("parse");
        match parsed {
            ClientMessage::DeleteDownloadToken { token } => assert_eq!(token, 9),
        }
    }
}
