//! `preauth links`: print download links for every platform.

use std::time::Duration;

use anyhow::Context;
use preauth_client::ClientHandle;

use crate::render;

pub async fn run(client: &ClientHandle, timeout: Duration) -> anyhow::Result<()> {
    let snapshot = tokio::time::timeout(
        timeout,
        client.wait_for_mirror(|m| m.executables.is_some()),
    )
    .await
    .context("timed out waiting for the executable catalog")?
    .context("client stopped before the executable catalog arrived")?;

    let executables = snapshot.executables().unwrap_or_default();
    if executables.is_empty() {
        println!("No executables available.");
        return Ok(());
    }
    print!(
        "{}",
        render::links(executables, snapshot.build_log(), client.endpoints())
    );
    Ok(())
}
