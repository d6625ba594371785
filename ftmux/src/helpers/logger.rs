//! # Logger
//!
//! Handles log:: messages emitted by the muxer and the binary.
use std::{
    env,
    io::{stderr, IsTerminal, Write},
    str::FromStr,
    sync::Mutex,
};

use anyhow::{anyhow, Result};
use log::{Level, LevelFilter, Metadata, Record};
use termcolor::{BufferedStandardStream, Color, ColorChoice, ColorSpec, WriteColor};
use time::{macros::format_description, OffsetDateTime};

/// Logger writing to stderr. Session related output (if any) goes to stdout
/// so both can be split.
pub(crate) struct Logger {
    max_level: LevelFilter,
    inner: Mutex<LoggerWriter>,
}

struct LoggerWriter {
    stderr: BufferedStandardStream,
    use_colors: bool,
}

impl Logger {
    /// Install the logger, given a level name as accepted by the cli.
    pub(crate) fn init(level: &str) -> Result<()> {
        let max_level = LevelFilter::from_str(level)?;
        let logger = Logger {
            max_level,
            inner: Mutex::new(LoggerWriter {
                stderr: BufferedStandardStream::stderr(ColorChoice::Auto),
                use_colors: Self::use_colors(),
            }),
        };

        log::set_max_level(max_level);
        log::set_boxed_logger(Box::new(logger))?;
        Ok(())
    }

    fn level_color(level: Level) -> Color {
        match level {
            Level::Error => Color::Red,
            Level::Warn => Color::Yellow,
            Level::Info => Color::Blue,
            Level::Debug => Color::Cyan,
            Level::Trace => Color::White,
        }
    }

    fn try_log(&self, record: &Record) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow!("Logger lock poisoned"))?;
        let verbose = self.max_level >= LevelFilter::Debug;

        if verbose {
            OffsetDateTime::now_utc().format_into(
                &mut inner.stderr,
                format_description!("[hour]:[minute]:[second].[subsecond digits:6] "),
            )?;
        }

        // Always show the level of warnings and errors.
        if record.level() <= Level::Warn || verbose {
            if inner.use_colors {
                inner
                    .stderr
                    .set_color(ColorSpec::new().set_fg(Some(Self::level_color(record.level()))))?;
            }
            write!(inner.stderr, "{:5} ", record.level())?;
            if inner.use_colors {
                inner.stderr.reset()?;
            }
        }

        // Muxer decisions are easier to follow with their origin.
        if self.max_level >= LevelFilter::Trace {
            write!(inner.stderr, "[{}] ", record.target())?;
        }

        writeln!(inner.stderr, "{}", record.args())?;
        inner.stderr.flush()?;
        Ok(())
    }

    fn use_colors() -> bool {
        stderr().is_terminal() && matches!(env::var("TERM"), Ok(x) if x != "dumb")
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Not much we can do to report the error...
        let _ = self.try_log(record);
    }

    fn flush(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            let _ = inner.stderr.flush();
        }
    }
}
