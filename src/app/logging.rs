//! stderr log lines for the collector binary, with a reloadable level filter.

use std::sync::OnceLock;

use tracing::Level;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{reload, EnvFilter, Registry};

static FILTER: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// `2026-10-14 09:30:00.125 [WARN ] bmc-a: message`
struct CollectorLine;

impl<S, N> FormatEvent<S, N> for CollectorLine
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &tracing::Event<'_>) -> std::fmt::Result {
        write!(writer, "{} ", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))?;

        let level = *event.metadata().level();
        match level_color(level) {
            Some(color) if writer.has_ansi_escapes() => write!(writer, "{}[{:<5}]\x1b[0m ", color, level)?,
            _ => write!(writer, "[{:<5}] ", level)?,
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn level_color(level: Level) -> Option<&'static str> {
    match level {
        Level::ERROR => Some("\x1b[31m"),
        Level::WARN => Some("\x1b[33m"),
        Level::DEBUG => Some("\x1b[34m"),
        Level::TRACE => Some("\x1b[2m"),
        Level::INFO => None,
    }
}

/// Install the subscriber. stdout stays reserved for snapshots.
pub fn init_tracing(filter: &str) {
    use std::io::IsTerminal;
    use tracing_subscriber::prelude::*;

    let (filter_layer, handle) = reload::Layer::new(EnvFilter::new(filter));
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal())
                .event_format(CollectorLine),
        )
        .init();

    let _ = FILTER.set(handle);
}

/// Replace the level filter once the config file is read.
pub fn set_filter(filter: &str) -> anyhow::Result<()> {
    if let Some(handle) = FILTER.get() {
        handle
            .reload(EnvFilter::new(filter))
            .map_err(|e| anyhow::anyhow!("Failed to reload log level: {}", e))?;
    }
    Ok(())
}
