//! Process-wide tracing subscriber built from [`LogConfig`].
//!
//! Session and stream tasks run inside an `intent_session` span carrying the
//! intent and session ids, so JSON output can be grouped per intent.

use std::path::Path;

use once_cell::sync::OnceCell;
use tracing::Subscriber;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::config::LogConfig;
use crate::errors::PipelineError;

static INSTALLED: OnceCell<()> = OnceCell::new();

const DEFAULT_DIRECTIVES: &str = "info";

/// Installs the global subscriber described by `config`.
///
/// Only the first successful call has an effect. A subscriber installed by
/// the host application is left in place.
pub fn init_observability(config: &LogConfig) -> Result<(), PipelineError> {
    INSTALLED.get_or_try_init(|| install(config)).map(|_| ())
}

fn install(config: &LogConfig) -> Result<(), PipelineError> {
    if !config.enabled {
        return Ok(());
    }
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = EnvFilter::try_new(directives(config.filter.as_deref(), rust_log.as_deref()))
        .map_err(|e| PipelineError::Config(format!("invalid log filter: {e}")))?;

    let (json, console) = match config.json_path.as_deref() {
        Some(path) => (Some(json_layer(json_writer(path)?)), None),
        None => (None, Some(console_layer())),
    };
    if tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(console)
        .try_init()
        .is_err()
    {
        tracing::debug!("global subscriber already set; keeping it");
    }
    Ok(())
}

/// Explicit directives win over `RUST_LOG`, which wins over the default.
fn directives<'a>(configured: Option<&'a str>, rust_log: Option<&'a str>) -> &'a str {
    configured
        .or(rust_log)
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(DEFAULT_DIRECTIVES)
}

fn json_writer(path: &Path) -> Result<RollingFileAppender, PipelineError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| PipelineError::Config(format!("log path {path:?} has no file name")))?;
    std::fs::create_dir_all(dir)
        .map_err(|e| PipelineError::Config(format!("cannot create log dir {dir:?}: {e}")))?;
    Ok(tracing_appender::rolling::never(dir, file_name))
}

fn json_layer<S>(writer: RollingFileAppender) -> impl Layer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_writer(writer)
}

fn console_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(std::io::stdout)
}
