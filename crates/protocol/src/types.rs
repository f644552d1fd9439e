//! Core types shared across the protocol

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned identifier for one issued download.
pub type DownloadToken = u32;

/// Server-assigned identifier for a session.
pub type SessionId = u32;

/// One download issued to a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Download {
    pub token: DownloadToken,
    pub filename: String,
    pub last_used: DateTime<Utc>,
    pub download_time: DateTime<Utc>,
}

/// Session state as carried by a `state` frame.
///
/// The server serializes more bookkeeping (`first_seen`, `last_seen`, ...);
/// only the fields a client mirrors are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub id: SessionId,
    pub downloads: Vec<Download>,
}

/// An executable offered for download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Executable {
    /// Platform identifier as sent by the server. Also keys the download route.
    pub id: String,
    pub filename: String,
    /// Size in bytes
    pub size: u64,
}

impl Executable {
    pub fn platform(&self) -> Platform {
        Platform::from_id(&self.id)
    }
}

/// Target platform of an executable
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
    Other(String),
}

impl Platform {
    /// Case-insensitive; the server has historically sent `"Windows"`,
    /// `"MacOS"` and `"Linux"`.
    pub fn from_id(id: &str) -> Self {
        match id.trim().to_ascii_lowercase().as_str() {
            "windows" | "win" => Platform::Windows,
            "macos" | "mac" | "darwin" => Platform::MacOs,
            "linux" => Platform::Linux,
            _ => Platform::Other(id.to_string()),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Windows => f.write_str("windows"),
            Platform::MacOs => f.write_str("macos"),
            Platform::Linux => f.write_str("linux"),
            Platform::Other(id) => f.write_str(id),
        }
    }
}
