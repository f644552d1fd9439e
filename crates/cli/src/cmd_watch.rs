//! `preauth watch`: stream connection changes, snapshots and notifications.

use preauth_client::{ClientEvent, ClientHandle, ConnectionState, SessionMirror};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::render;

pub async fn run(client: &ClientHandle, json: bool) -> anyhow::Result<()> {
    let mut events = client.subscribe();
    print_connection(client.connection_state(), json)?;
    print_mirror(client, &client.snapshot(), json)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = events.recv() => match received {
                Ok(ClientEvent::ConnectionChanged(state)) => print_connection(state, json)?,
                Ok(ClientEvent::MirrorChanged(snapshot)) => print_mirror(client, &snapshot, json)?,
                Ok(ClientEvent::Notified { token }) => {
                    if json {
                        println!("{}", serde_json::json!({ "event": "notify", "token": token }));
                    } else {
                        println!("{}", render::notified_line(token));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        component = "cli",
                        event = "watch.lagged",
                        skipped,
                        "Fell behind the event stream, re-rendering"
                    );
                    print_mirror(client, &client.snapshot(), json)?;
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    Ok(())
}

fn print_connection(state: ConnectionState, json: bool) -> anyhow::Result<()> {
    if json {
        println!(
            "{}",
            serde_json::json!({ "event": "connection", "state": state.to_string() })
        );
    } else {
        println!("{}", render::connection_line(state));
    }
    Ok(())
}

fn print_mirror(client: &ClientHandle, snapshot: &SessionMirror, json: bool) -> anyhow::Result<()> {
    if json {
        let mirror = serde_json::to_value(snapshot)?;
        println!("{}", serde_json::json!({ "event": "mirror", "mirror": mirror }));
    } else {
        print!("{}", render::mirror(snapshot, client.endpoints()));
        println!();
    }
    Ok(())
}
