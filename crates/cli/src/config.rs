//! CLI settings.
//!
//! Precedence: flags, then environment (both via clap), then the TOML
//! config file, then built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use preauth_client::config::DEFAULT_RECONNECT_DELAY;
use preauth_client::ClientConfig;
use serde::Deserialize;

/// Original development backend.
pub const DEFAULT_PAGE_URL: &str = "http://localhost:5800";

/// Connection options shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Page URL of the download service; the channel URL is derived from it
    #[arg(long, global = true, env = "PREAUTH_PAGE_URL")]
    pub page_url: Option<String>,

    /// Delay before reconnecting after the channel drops, in milliseconds
    #[arg(long, global = true, env = "PREAUTH_RECONNECT_DELAY_MS")]
    pub reconnect_delay_ms: Option<u64>,

    /// Session id to resume
    #[arg(long, global = true, env = "PREAUTH_SESSION")]
    pub session: Option<String>,

    /// Config file (defaults to <config dir>/preauth/config.toml)
    #[arg(long, global = true, env = "PREAUTH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write logs to <DIR>/preauth.log instead of stderr
    #[arg(long, global = true, env = "PREAUTH_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub page_url: Option<String>,
    pub reconnect_delay_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub session: Option<String>,
    pub log_dir: Option<PathBuf>,
}

impl FileConfig {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load `path`. A missing file is only an error when `required`.
    pub fn load(path: &Path, required: bool) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text)
                .with_context(|| format!("invalid config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("preauth").join("config.toml"))
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub page_url: String,
    pub reconnect_delay: Duration,
    pub connect_timeout: Option<Duration>,
    pub session: Option<String>,
    pub log_dir: Option<PathBuf>,
}

impl Settings {
    pub fn load(args: &GlobalArgs) -> anyhow::Result<Self> {
        let file = match args.config.as_deref() {
            Some(path) => FileConfig::load(path, true)?,
            None => match default_config_path() {
                Some(path) => FileConfig::load(&path, false)?,
                None => FileConfig::default(),
            },
        };
        Ok(Self::resolve(args, file))
    }

    pub fn resolve(args: &GlobalArgs, file: FileConfig) -> Self {
        Self {
            page_url: args
                .page_url
                .clone()
                .or(file.page_url)
                .unwrap_or_else(|| DEFAULT_PAGE_URL.to_string()),
            reconnect_delay: args
                .reconnect_delay_ms
                .or(file.reconnect_delay_ms)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_RECONNECT_DELAY),
            connect_timeout: file.connect_timeout_ms.map(Duration::from_millis),
            session: args.session.clone().or(file.session),
            log_dir: args.log_dir.clone().or(file.log_dir),
        }
    }

    pub fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = ClientConfig::new(&self.page_url)
            .with_context(|| format!("invalid page URL {:?}", self.page_url))?
            .with_reconnect_delay(self.reconnect_delay);
        if let Some(timeout) = self.connect_timeout {
            config = config.with_connect_timeout(timeout);
        }
        if let Some(session) = &self.session {
            config = config.with_session_cookie(session.clone());
        }
        Ok(config)
    }
}
