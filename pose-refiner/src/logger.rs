//! Logging setup for pose-refiner demos and applications
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the caller. These helpers install one with a compact bracketed
//! format.

use crate::optimizer::Verbosity;
use tracing::Level;

/// Initialize the tracing subscriber at INFO level.
///
/// Format: `[LEVEL YYYY-MM-DD HH:MM:SS module]` for INFO/WARN/ERROR
///         `[LEVEL YYYY-MM-DD HH:MM:SS file:line]` for DEBUG/TRACE
///
/// # Example
/// ```no_run
/// use pose_refiner::init_logger;
///
/// init_logger();
/// tracing::info!("Application started");
/// ```
///
/// # Environment Variables
/// `RUST_LOG` overrides the default level:
/// ```bash
/// RUST_LOG=debug cargo run --example refine_synthetic_room
/// RUST_LOG=pose_refiner=trace cargo run --example refine_synthetic_room
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Initialize the tracing subscriber so that everything a refiner with the
/// given verbosity emits is shown.
///
/// ```no_run
/// use pose_refiner::init_logger_for;
/// use pose_refiner::optimizer::Verbosity;
///
/// init_logger_for(Verbosity::Verbose);
/// ```
pub fn init_logger_for(verbosity: Verbosity) {
    init_logger_with_level(level_for(verbosity))
}

/// Initialize the tracing subscriber with a custom default level
/// (overrideable via `RUST_LOG`).
pub fn init_logger_with_level(default_level: Level) {
    tracing_subscriber::fmt()
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
        .init();
}

fn level_for(verbosity: Verbosity) -> Level {
    match verbosity {
        Verbosity::Silent => Level::ERROR,
        Verbosity::Normal => Level::INFO,
        Verbosity::Verbose => Level::DEBUG,
    }
}

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
        let level = metadata.level();

        write!(writer, "[")?;
        match *level {
            Level::ERROR => write!(writer, "\x1b[31mERROR\x1b[0m ")?,
            Level::WARN => write!(writer, "\x1b[33mWARN\x1b[0m ")?,
            Level::INFO => write!(writer, "\x1b[32mINFO\x1b[0m ")?,
            Level::DEBUG => write!(writer, "\x1b[34mDEBUG\x1b[0m ")?,
            Level::TRACE => write!(writer, "\x1b[35mTRACE\x1b[0m ")?,
        }
        write!(writer, "{} ", Local::now().format("%H:%M:%S%.3f"))?;

        // file:line for DEBUG/TRACE, module otherwise
        match (*level >= Level::DEBUG, metadata.file()) {
            (true, Some(file)) => {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_for(Verbosity::Silent), Level::ERROR);
        assert_eq!(level_for(Verbosity::Normal), Level::INFO);
        assert_eq!(level_for(Verbosity::Verbose), Level::DEBUG);
    }
}
