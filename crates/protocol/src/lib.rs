//! preauth protocol
//!
//! Types exchanged between the preauth server and session clients.
//! Every frame is one JSON object carrying a `type` discriminator, sent as
//! a WebSocket text message.

pub mod client;
pub mod server;
pub mod types;

pub use client::ClientMessage;
pub use server::ServerMessage;
pub use types::*;

/// Name of the field every frame is discriminated on.
pub const DISCRIMINATOR: &str = "type";

/// Path of the session channel, relative to the page origin.
pub const CHANNEL_PATH: &str = "/ws";

/// Cookie that binds a channel to a server-side session.
pub const SESSION_COOKIE: &str = "Session";
