//! Leveled logging for the `MLib` workspace.
//!
//! A small, dependency-free logger shared by every crate in the workspace.
//! Records carry the module path of the call site and are written to standard
//! error with a colored level tag.
//!
//! The minimum level defaults to [`Level::Warn`] so that library code stays
//! quiet unless asked otherwise. It can be changed at runtime with
//! [`set_level`] or taken from the `MLIB_LOG` environment variable with
//! [`init_from_env`].
//!
//! # Example
//!
//! ```
//! use mlib_log::{debug, error, info, warn, Level};
//!
//! mlib_log::set_level(Level::Debug);
//!
//! let chunks = 3;
//! info!("array grew to {} chunks", chunks);
//! debug!("slot headers: {:?}", [0u8, 1, 0]);
//! warn!("free on a slot that was not in use");
//! error!("chunk allocation failed");
//! ```

use std::fmt::{self, Arguments};
use std::io::Write;
use std::str::FromStr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Name of the environment variable read by [`init_from_env`].
pub const ENV_VAR: &str = "MLIB_LOG";

/// Severity of a log record.
///
/// Ordered from most severe (`Error`) to least severe (`Trace`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Operation failed.
    Error = 0,
    /// Operation succeeded but something looks wrong.
    Warn = 1,
    /// Coarse progress.
    Info = 2,
    /// Structural changes (chunk growth, teardown).
    Debug = 3,
    /// Per-slot activity.
    Trace = 4,
}

impl Level {
    const fn color_code(self) -> &'static str {
        match self {
            Level::Error => "\x1b[31m",
            Level::Warn => "\x1b[33m",
            Level::Info => "\x1b[32m",
            Level::Debug => "\x1b[36m",
            Level::Trace => "\x1b[35m",
        }
    }

    /// Upper-case name of the level.
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Level::Error,
            1 => Level::Warn,
            2 => Level::Info,
            3 => Level::Debug,
            _ => Level::Trace,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a [`Level`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLevelError {
    input: String,
}

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid log level: {:?}", self.input)
    }
}

impl std::error::Error for ParseLevelError {}

impl FromStr for Level {
    type Err = ParseLevelError;

    /// Parses a level name, ignoring case and surrounding whitespace.
    ///
    /// ```
    /// use mlib_log::Level;
    ///
    /// assert_eq!("debug".parse::<Level>(), Ok(Level::Debug));
    /// assert_eq!(" WARN ".parse::<Level>(), Ok(Level::Warn));
    /// assert!("verbose".parse::<Level>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ERROR" => Ok(Level::Error),
            "WARN" | "WARNING" => Ok(Level::Warn),
            "INFO" => Ok(Level::Info),
            "DEBUG" => Ok(Level::Debug),
            "TRACE" => Ok(Level::Trace),
            _ => Err(ParseLevelError {
                input: s.to_owned(),
            }),
        }
    }
}

/// Level filter and output settings.
///
/// One instance lives behind [`logger()`]; separate instances are only useful
/// for testing filters in isolation.
pub struct Logger {
    level: AtomicU8,
    color: AtomicBool,
}

impl Logger {
    /// Creates a logger with the given minimum level and colors enabled.
    pub const fn new(level: Level) -> Self {
        Logger {
            level: AtomicU8::new(level as u8),
            color: AtomicBool::new(true),
        }
    }

    /// Sets the minimum level; less severe records are dropped.
    pub fn set_level(&self, level: Level) {
        self.level.store(level as u8, Ordering::SeqCst);
    }

    /// Current minimum level.
    pub fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Whether a record at `level` passes the filter.
    pub fn enabled(&self, level: Level) -> bool {
        level as u8 <= self.level.load(Ordering::Relaxed)
    }

    /// Enables or disables ANSI colors in the level tag.
    pub fn set_color(&self, color: bool) {
        self.color.store(color, Ordering::Relaxed);
    }

    fn format(&self, level: Level, target: &str, args: Arguments) -> String {
        if self.color.load(Ordering::Relaxed) {
            format!(
                "{}[{}]\x1b[0m {target}: {args}",
                level.color_code(),
                level.as_str()
            )
        } else {
            format!("[{}] {target}: {args}", level.as_str())
        }
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// The process-wide logger, created on first use at [`Level::Warn`].
pub fn logger() -> &'static Logger {
    LOGGER.get_or_init(|| Logger::new(Level::Warn))
}

/// Sets the minimum level of the process-wide logger.
pub fn set_level(level: Level) {
    logger().set_level(level);
}

/// Sets the minimum level from a level name such as `"debug"`.
pub fn set_level_from_str(s: &str) -> Result<(), ParseLevelError> {
    set_level(s.parse()?);
    Ok(())
}

/// Configures the process-wide logger from the environment.
///
/// Reads [`ENV_VAR`] (`MLIB_LOG`) for the level and honours `NO_COLOR`.
/// An unset variable leaves the level unchanged; an unparsable one is
/// reported as an error and also leaves it unchanged.
///
/// ```
/// mlib_log::init_from_env().ok();
/// ```
pub fn init_from_env() -> Result<Level, ParseLevelError> {
    let logger = logger();
    if std::env::var_os("NO_COLOR").is_some() {
        logger.set_color(false);
    }
    match std::env::var(ENV_VAR) {
        Ok(value) => {
            let level = value.parse()?;
            logger.set_level(level);
            Ok(level)
        }
        Err(_) => Ok(logger.level()),
    }
}

#[doc(hidden)]
pub fn __log_with_target(level: Level, target: &str, args: Arguments) {
    let logger = logger();
    if !logger.enabled(level) {
        return;
    }

    let line = logger.format(level, target, args);
    // A closed stderr is not worth panicking over.
    let _ = writeln!(std::io::stderr().lock(), "{line}");
}

/// Logs a record at an explicit level.
///
/// ```
/// use mlib_log::{log, Level};
///
/// log!(level: Level::Info, "entries in use: {}", 42);
/// ```
#[macro_export]
macro_rules! log {
    (level: $level:expr, $($arg:tt)*) => {
        {
            if $crate::logger().enabled($level) {
                $crate::__log_with_target(
                    $level,
                    module_path!(),
                    format_args!($($arg)*)
                );
            }
        }
    };
}

/// Logs a record at [`Level::Error`].
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Error, $($arg)*)
    };
}

/// Logs a record at [`Level::Warn`].
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Warn, $($arg)*)
    };
}

/// Logs a record at [`Level::Info`].
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Info, $($arg)*)
    };
}

/// Logs a record at [`Level::Debug`].
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Debug, $($arg)*)
    };
}

/// Logs a record at [`Level::Trace`].
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Trace, $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Error < Level::Warn);
        assert!(Level::Warn < Level::Info);
        assert!(Level::Info < Level::Debug);
        assert!(Level::Debug < Level::Trace);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("error".parse(), Ok(Level::Error));
        assert_eq!("Warning".parse(), Ok(Level::Warn));
        assert_eq!("INFO".parse(), Ok(Level::Info));
        assert_eq!("debug\n".parse(), Ok(Level::Debug));
        assert_eq!("trace".parse(), Ok(Level::Trace));

        let err = "loud".parse::<Level>().unwrap_err();
        assert_eq!(err.to_string(), "invalid log level: \"loud\"");
    }

    #[test]
    fn test_level_round_trips_through_u8() {
        for level in [
            Level::Error,
            Level::Warn,
            Level::Info,
            Level::Debug,
            Level::Trace,
        ] {
            assert_eq!(Level::from_u8(level as u8), level);
            assert_eq!(level.to_string(), level.as_str());
        }
    }

    #[test]
    fn test_logger_level_filtering() {
        let logger = Logger::new(Level::Info);

        assert!(logger.enabled(Level::Error));
        assert!(logger.enabled(Level::Warn));
        assert!(logger.enabled(Level::Info));
        assert!(!logger.enabled(Level::Debug));
        assert!(!logger.enabled(Level::Trace));

        logger.set_level(Level::Trace);
        assert!(logger.enabled(Level::Trace));
        assert_eq!(logger.level(), Level::Trace);
    }

    #[test]
    fn test_format_with_and_without_color() {
        let logger = Logger::new(Level::Info);
        let colored = logger.format(Level::Warn, "mlib_mem::list", format_args!("x={}", 1));
        assert!(colored.starts_with("\x1b[33m[WARN]"));
        assert!(colored.ends_with("mlib_mem::list: x=1"));

        logger.set_color(false);
        let plain = logger.format(Level::Error, "t", format_args!("boom"));
        assert_eq!(plain, "[ERROR] t: boom");
    }

    #[test]
    fn test_global_logger() {
        let first = logger();
        let second = logger();
        assert!(std::ptr::eq(first, second));

        set_level_from_str("debug").unwrap();
        assert_eq!(logger().level(), Level::Debug);
        assert!(set_level_from_str("nope").is_err());
        assert_eq!(logger().level(), Level::Debug);

        debug!("visible at debug");
        trace!("filtered at debug");
    }

    #[test]
    fn test_macros_from_threads() {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                std::thread::spawn(move || {
                    warn!("thread {} checking in", i);
                    info!("thread {}", i);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
