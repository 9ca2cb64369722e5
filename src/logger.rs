//! Logging setup for the geofit binaries and benchmarks
//!
//! Library code only emits `tracing` events; installing a subscriber is left to the
//! application. [`init_logger`] installs the formatter used by `fit_feature`.

use tracing::Level;

/// Install the tracing subscriber with default level INFO.
///
/// The level can be overridden through `RUST_LOG`. Lines are formatted as
/// `[LEVEL YYYY-MM-DD HH:MM:SS module] message`, and as
/// `[LEVEL YYYY-MM-DD HH:MM:SS file:line] message` for DEBUG/TRACE.
///
/// # Example
/// ```no_run
/// use geofit::init_logger;
///
/// init_logger();
/// tracing::info!("Fitting started");
/// ```
///
/// # Environment Variables
/// ```bash
/// RUST_LOG=debug fit_feature --feature circle points.txt
/// RUST_LOG=geofit::adjustment=trace fit_feature --feature plane points.txt
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Install the tracing subscriber with a custom default level.
///
/// Calling it a second time is a no-op: the first installed subscriber stays active.
///
/// # Example
/// ```no_run
/// use geofit::init_logger_with_level;
/// use tracing::Level;
///
/// init_logger_with_level(Level::DEBUG);
/// tracing::debug!("Iteration table enabled");
/// ```
pub fn init_logger_with_level(default_level: Level) {
    let result = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .with_level(false)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .event_format(BracketFormatter)
        .try_init();
    if result.is_err() {
        tracing::debug!("Global tracing subscriber already installed");
    }
}

/// Event formatter printing a bracketed, colored prefix
struct BracketFormatter;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for BracketFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        use chrono::Local;

        let metadata = event.metadata();
        let level = *metadata.level();

        let colored = match level {
            Level::ERROR => "\x1b[31mERROR\x1b[0m",
            Level::WARN => "\x1b[33mWARN\x1b[0m",
            Level::INFO => "\x1b[32mINFO\x1b[0m",
            Level::DEBUG => "\x1b[34mDEBUG\x1b[0m",
            Level::TRACE => "\x1b[35mTRACE\x1b[0m",
        };
        write!(
            writer,
            "[{} {} ",
            colored,
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;

        match (level, metadata.file()) {
            (Level::DEBUG | Level::TRACE, Some(file)) => {
                let filename = file.rsplit('/').next().unwrap_or(file);
                write!(writer, "{}", filename)?;
                if let Some(line) = metadata.line() {
                    write!(writer, ":{}", line)?;
                }
            }
            _ => write!(writer, "{}", metadata.target())?,
        }
        write!(writer, "] ")?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
