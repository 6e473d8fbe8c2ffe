//! Console logging for the I/O service
//!
//! Text output uses `timestamp [LEVEL] message`; JSON output is one object per
//! event. Everything goes to stderr so stdout stays free for data.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Custom event formatter that outputs: `timestamp [LEVEL] message`
///
/// Example output: `2025-12-02T00:50:44.809Z [INFO] Poller started: boiler`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.3fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m", // magenta
                Level::DEBUG => "\x1b[34m", // blue
                Level::INFO => "\x1b[32m",  // green
                Level::WARN => "\x1b[33m",  // yellow
                Level::ERROR => "\x1b[31m", // red
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Crate/target name that gets the configured level (e.g. "iosrv")
    pub service_name: String,
    /// Level or filter directives ("debug", "info,cpcoe_link=trace")
    pub level: String,
    /// One JSON object per event instead of bracketed text
    pub json: bool,
    /// ANSI colours in text mode
    pub ansi: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            level: "info".to_string(),
            json: false,
            ansi: true,
        }
    }
}

/// Resolve the filter: `RUST_LOG` wins, otherwise the configured level
pub fn filter_spec(options: &LoggingOptions) -> String {
    match std::env::var("RUST_LOG") {
        Ok(env_str) if !env_str.is_empty() => env_str,
        _ => options.level.clone(),
    }
}

/// Install the global subscriber
pub fn init_logging(options: &LoggingOptions) -> Result<(), Box<dyn std::error::Error>> {
    let spec = filter_spec(options);
    let env_filter =
        EnvFilter::try_new(&spec).map_err(|e| format!("Invalid log level '{}': {}", spec, e))?;

    let console_layer = if options.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_level(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(options.ansi)
            .event_format(BracketedLevelFormat)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init()?;

    tracing::debug!("Logging: {} @ {}", options.service_name, spec);
    Ok(())
}
