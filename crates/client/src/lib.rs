//! preauth session client
//!
//! Keeps a local mirror of a server-held download session over a
//! reconnecting WebSocket channel.
//!
//! The client runs as one actor task: transport events, reconnect timers
//! and commands from [`ClientHandle`]s are handled strictly one at a time,
//! so the mirror is only ever mutated from that task. Readers get
//! lock-free snapshots.

pub mod client;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod mirror;
pub mod supervisor;
pub mod timer;
pub mod transport;
pub mod ws;

#[cfg(test)]
mod testing;

pub use client::{ClientBuilder, ClientHandle, NotifyCallback, SessionClient};
pub use config::{ClientConfig, Endpoints};
pub use error::{ClientError, DispatchError, TransportError};
pub use mirror::{ClientEvent, MirroredSession, SessionMirror};
pub use transport::ConnectionState;
