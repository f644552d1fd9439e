//! Terminal rendering for mirror snapshots and events.

use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use console::style;
use preauth_client::{ConnectionState, Endpoints, SessionMirror};
use preauth_protocol::DownloadToken;

pub fn format_token(token: DownloadToken) -> String {
    format!("0x{:08x}", token)
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{:.1} {}", value, unit)
}

pub fn connection_line(state: ConnectionState) -> String {
    let label = match state {
        ConnectionState::Open => style("connected").green().bold(),
        ConnectionState::Connecting => style("connecting").yellow(),
        ConnectionState::Closing => style("closing").yellow(),
        ConnectionState::Closed => style("disconnected").red().bold(),
    };
    format!("● {}", label)
}

pub fn notified_line(token: DownloadToken) -> String {
    format!(
        "{} download {} started",
        style("↓").cyan().bold(),
        style(format_token(token)).bold()
    )
}

/// Session header, downloads and executables for one snapshot.
pub fn mirror(snapshot: &SessionMirror, endpoints: &Endpoints) -> String {
    if snapshot.is_unknown() {
        return format!("{}", style("session unknown (waiting for server)").dim());
    }

    let mut out = String::new();
    match &snapshot.session {
        Some(session) => {
            out.push_str(&format!(
                "Session {}\n",
                style(session.id).bold()
            ));
            if session.downloads.is_empty() {
                out.push_str(&format!("{}\n", style("no downloads").dim()));
            } else {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec!["Token", "File", "Downloaded", "Last used"]);
                for download in &session.downloads {
                    table.add_row(vec![
                        format_token(download.token),
                        download.filename.clone(),
                        download.download_time.format("%Y-%m-%d %H:%M:%S").to_string(),
                        download.last_used.format("%Y-%m-%d %H:%M:%S").to_string(),
                    ]);
                }
                out.push_str(&format!("{}\n", table));
            }
        }
        None => out.push_str(&format!("{}\n", style("session unknown").dim())),
    }

    if let Some(executables) = snapshot.executables() {
        out.push_str(&links(executables, snapshot.build_log(), endpoints));
    }

    out
}

/// Download and build-log links.
pub fn links(
    executables: &[preauth_protocol::Executable],
    build_log: Option<&str>,
    endpoints: &Endpoints,
) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Platform", "File", "Size", "Link"]);
    for executable in executables {
        table.add_row(vec![
            executable.platform().to_string(),
            executable.filename.clone(),
            format_size(executable.size),
            endpoints.download(executable).to_string(),
        ]);
    }

    let mut out = format!("{}\n", table);
    if let Some(link) = build_log.and_then(|link| endpoints.build_log(link)) {
        out.push_str(&format!("Build log: {}\n", link));
    }
    out
}
