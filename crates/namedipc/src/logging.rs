use clap::ValueEnum;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// `--log-level` wins; otherwise `-d` raises the default from info to debug.
    pub fn resolve(explicit: Option<LogLevel>, debug: bool) -> LogLevel {
        match (explicit, debug) {
            (Some(level), _) => level,
            (None, true) => LogLevel::Debug,
            (None, false) => LogLevel::Info,
        }
    }

    pub fn as_filter(self) -> tracing::level_filters::LevelFilter {
        match self {
            LogLevel::Error => tracing::level_filters::LevelFilter::ERROR,
            LogLevel::Warn => tracing::level_filters::LevelFilter::WARN,
            LogLevel::Info => tracing::level_filters::LevelFilter::INFO,
            LogLevel::Debug => tracing::level_filters::LevelFilter::DEBUG,
            LogLevel::Trace => tracing::level_filters::LevelFilter::TRACE,
        }
    }
}

/// Warnings and errors go to stderr, everything else to stdout.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let writer = std::io::stderr
        .with_max_level(Level::WARN)
        .or_else(std::io::stdout);

    let builder = tracing_subscriber::fmt()
        .with_writer(writer)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(false);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_raises_default_level() {
        assert!(matches!(LogLevel::resolve(None, false), LogLevel::Info));
        assert!(matches!(LogLevel::resolve(None, true), LogLevel::Debug));
        assert!(matches!(
            LogLevel::resolve(Some(LogLevel::Error), true),
            LogLevel::Error
        ));
    }
}
