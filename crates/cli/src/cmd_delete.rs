//! `preauth delete <TOKEN>`: revoke one download token.

use std::time::Duration;

use anyhow::{bail, Context};
use preauth_client::ClientHandle;
use preauth_protocol::DownloadToken;
use tracing::info;

use crate::render::format_token;

/// Decimal, or hex with a `0x` prefix (the form `watch` prints).
pub fn parse_token(raw: &str) -> Result<DownloadToken, String> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => DownloadToken::from_str_radix(hex, 16),
        None => raw.parse::<DownloadToken>(),
    };
    parsed.map_err(|e| format!("`{}` is not a download token: {}", raw, e))
}

pub async fn run(client: &ClientHandle, token: DownloadToken, timeout: Duration) -> anyhow::Result<()> {
    let before = tokio::time::timeout(
        timeout,
        client.wait_for_mirror(|m| m.session.is_some()),
    )
    .await
    .context("timed out waiting for the session state")?
    .context("client stopped before the session state arrived")?;

    let session_id = before.session_id().unwrap_or_default();
    if !before.has_download(token) {
        bail!(
            "download {} is not part of session {}",
            format_token(token),
            session_id
        );
    }

    client.request_deletion(token);
    info!(
        component = "cli",
        event = "delete.requested",
        token,
        session_id,
        "Deletion requested"
    );

    tokio::time::timeout(
        timeout,
        client.wait_for_mirror(|m| m.session.is_some() && !m.has_download(token)),
    )
    .await
    .context("server did not confirm the deletion in time")?
    .context("client stopped before the deletion was confirmed")?;

    println!(
        "Deleted download {} from session {}",
        format_token(token),
        session_id
    );
    Ok(())
}
