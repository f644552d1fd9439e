use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn,preauth=info";
const LOG_FILE: &str = "preauth.log";

/// Keeps the file writer flushing until dropped.
pub struct LoggingHandle {
    pub guard: Option<WorkerGuard>,
}

fn filter_source() -> String {
    std::env::var("PREAUTH_LOG_FILTER")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| DEFAULT_FILTER.to_string())
}

fn build_filter() -> EnvFilter {
    std::env::var("PREAUTH_LOG_FILTER")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Logs go to stderr, or to `<log_dir>/preauth.log` when a directory is set.
pub fn init_logging(log_dir: Option<&Path>) -> anyhow::Result<LoggingHandle> {
    let filter = build_filter();
    let registry = tracing_subscriber::registry().with(filter);

    let Some(log_dir) = log_dir else {
        let format = std::env::var("PREAUTH_LOG_FORMAT").unwrap_or_else(|_| "pretty".into());
        if format.eq_ignore_ascii_case("json") {
            registry
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .json()
                        .flatten_event(true)
                        .with_target(true),
                )
                .init();
        } else {
            registry
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .compact()
                        .with_target(false),
                )
                .init();
        }
        return Ok(LoggingHandle { guard: None });
    };

    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(LOG_FILE);

    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    let format = std::env::var("PREAUTH_LOG_FORMAT").unwrap_or_else(|_| "json".into());

    if format.eq_ignore_ascii_case("pretty") {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_current_span(true),
            )
            .init();
    }

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        log_path = %log_path.display(),
        format = %format,
        filter = %filter_source(),
    );

    Ok(LoggingHandle { guard: Some(guard) })
}
