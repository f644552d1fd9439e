//! Client configuration and endpoint resolution.
//!
//! Everything is derived from the URL of the page the client stands in for:
//! the channel lives at `/ws` on the same host, over `wss` when the page is
//! served over `https`.

use std::time::Duration;

use preauth_protocol::{Executable, CHANNEL_PATH};
use url::Url;

use crate::error::{ClientError, Result};

/// Delay before reconnecting after the channel drops. The server is
/// ephemeral and restarts on deploy; retrying faster only hammers it.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a [`crate::SessionClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoints: Endpoints,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    /// Session id to present on the first handshake. Later handshakes
    /// reuse whatever session the server assigned.
    pub session_cookie: Option<String>,
}

impl ClientConfig {
    pub fn new(page_url: &str) -> Result<Self> {
        Ok(Self::from_endpoints(Endpoints::new(page_url)?))
    }

    pub fn from_endpoints(endpoints: Endpoints) -> Self {
        Self {
            endpoints,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            session_cookie: None,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_session_cookie(mut self, session: impl Into<String>) -> Self {
        self.session_cookie = Some(session.into());
        self
    }
}

/// URLs of the server's collaborators, resolved against the page origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    page: Url,
    channel: Url,
}

impl Endpoints {
    pub fn new(page_url: &str) -> Result<Self> {
        Self::from_url(Url::parse(page_url)?)
    }

    /// Accepts `http`/`https` page URLs. `ws`/`wss` URLs are taken to name
    /// the same host.
    pub fn from_url(mut page: Url) -> Result<Self> {
        let (page_scheme, channel_scheme) = match page.scheme() {
            "http" | "ws" => ("http", "ws"),
            "https" | "wss" => ("https", "wss"),
            other => {
                return Err(ClientError::InvalidEndpoint(format!(
                    "unsupported scheme `{}` (expected http or https)",
                    other
                )))
            }
        };
        if page.host_str().is_none() {
            return Err(ClientError::InvalidEndpoint(format!(
                "`{}` has no host",
                page
            )));
        }

        page.set_scheme(page_scheme).map_err(|_| {
            ClientError::InvalidEndpoint(format!("cannot use `{}` as a page URL", page))
        })?;

        let mut channel = page.join(CHANNEL_PATH)?;
        channel.set_scheme(channel_scheme).map_err(|_| {
            ClientError::InvalidEndpoint(format!("cannot derive channel URL from `{}`", page))
        })?;

        Ok(Self { page, channel })
    }

    pub fn page(&self) -> &Url {
        &self.page
    }

    /// WebSocket URL of the session channel.
    pub fn channel(&self) -> &Url {
        &self.channel
    }

    pub fn is_secure(&self) -> bool {
        self.channel.scheme() == "wss"
    }

    /// Plain navigable link that issues a new download of `executable`.
    pub fn download(&self, executable: &Executable) -> Url {
        let mut url = self.origin();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.clear().push("download").push(&executable.id);
        }
        url
    }

    /// Resolve a build-log reference. Absolute URLs pass through, relative
    /// ones (the server sends `/build-logs`) resolve against the origin.
    pub fn build_log(&self, link: &str) -> Option<Url> {
        match Url::parse(link) {
            Ok(url) => Some(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self.origin().join(link).ok(),
            Err(_) => None,
        }
    }

    fn origin(&self) -> Url {
        let mut url = self.page.clone();
        url.set_path("/");
        url.set_query(None);
        url.set_fragment(None);
        url
    }
}
