//! Logging for ctf-shm-transport.
//!
//! # Architecture (from ARCHITECTURE.md §5)
//!
//! ```text
//! Producer core            RingBuffer             Consumer process
//! ─────────────            ──────────             ────────────────
//!
//! core_log!() ──────────▶ [debug text] ─────────▶ log::debug!()
//! no alloc                 per core                     │
//! non-blocking             overwritten                  ▼
//!                                                 StderrLogger
//! ```
//!
//! # Rules
//!
//! - RULE 5.1.1: Producer paths shall NEVER allocate or block to log
//! - RULE 5.1.2: Producer paths use core_log!() (or nothing)
//! - RULE 5.1.3: Library code logs through the `log` facade only
//! - RULE 5.2.1: Core debug text may be overwritten before it is read

use core::fmt::{self, Write};

pub use log::Level;

/// Maximum length of one core-side log message.
pub const CORE_MSG_LEN: usize = 256;

/// Format a message into a buffer, truncating if needed.
///
/// Returns the number of bytes written.
#[inline]
pub fn format_to_buffer(buf: &mut [u8], args: fmt::Arguments<'_>) -> usize {
    struct BufWriter<'a> {
        buf: &'a mut [u8],
        pos: usize,
    }

    impl<'a> Write for BufWriter<'a> {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            let bytes = s.as_bytes();
            let remaining = self.buf.len() - self.pos;
            let to_write = bytes.len().min(remaining);
            self.buf[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
            self.pos += to_write;
            Ok(())
        }
    }

    let mut writer = BufWriter { buf, pos: 0 };
    let _ = fmt::write(&mut writer, args);
    writer.pos
}

/// Format a core-side message as `LEVEL: message`.
#[inline]
pub fn format_core_message(buf: &mut [u8], level: Level, args: fmt::Arguments<'_>) -> usize {
    format_to_buffer(buf, format_args!("{}: {}", level.as_str(), args))
}

/// Core-side log macro.
///
/// Formats on the stack and stores the message in the producer's debug
/// text area. A no-op unless the `debug-text` feature is enabled.
///
/// # Example
///
/// ```ignore
/// core_log!(Level::Warn, producer, "dropped {} packets", n);
/// ```
#[macro_export]
macro_rules! core_log {
    ($level:expr, $producer:expr, $($arg:tt)*) => {{
        if $crate::config::DEBUG_TEXT_LEN > 0 {
            let mut buf = [0u8; $crate::logging::CORE_MSG_LEN];
            let len = $crate::logging::format_core_message(&mut buf, $level, format_args!($($arg)*));
            $producer.debug_text(&buf[..len]);
        }
    }};
}

/// Core-side error log.
#[macro_export]
macro_rules! core_error {
    ($producer:expr, $($arg:tt)*) => {
        $crate::core_log!($crate::logging::Level::Error, $producer, $($arg)*)
    };
}

/// Core-side warning log.
#[macro_export]
macro_rules! core_warn {
    ($producer:expr, $($arg:tt)*) => {
        $crate::core_log!($crate::logging::Level::Warn, $producer, $($arg)*)
    };
}

/// Core-side info log.
#[macro_export]
macro_rules! core_info {
    ($producer:expr, $($arg:tt)*) => {
        $crate::core_log!($crate::logging::Level::Info, $producer, $($arg)*)
    };
}

/// Core-side debug log.
#[macro_export]
macro_rules! core_debug {
    ($producer:expr, $($arg:tt)*) => {
        $crate::core_log!($crate::logging::Level::Debug, $producer, $($arg)*)
    };
}

#[cfg(feature = "std")]
pub use host::{format_log_line, StderrLogger};

#[cfg(feature = "std")]
mod host {
    use std::fmt::Write as _;
    use std::io::Write as _;
    use std::time::Instant;

    use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

    /// Format one host log line.
    ///
    /// Format: `[timestamp_us] LEVEL: message\n`
    pub fn format_log_line(out: &mut String, timestamp_us: u128, level: Level, args: std::fmt::Arguments<'_>) {
        let _ = writeln!(out, "[{:10}] {}: {}", timestamp_us, level.as_str(), args);
    }

    /// `log` backend writing to stderr, timestamped from process start.
    pub struct StderrLogger {
        level: LevelFilter,
        epoch: Instant,
    }

    impl StderrLogger {
        pub fn new(level: LevelFilter) -> Self {
            Self {
                level,
                epoch: Instant::now(),
            }
        }

        /// Install as the global logger.
        pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
            log::set_boxed_logger(Box::new(Self::new(level)))?;
            log::set_max_level(level);
            Ok(())
        }
    }

    impl Log for StderrLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= self.level
        }

        fn log(&self, record: &Record) {
            if !self.enabled(record.metadata()) {
                return;
            }

            let mut line = String::with_capacity(128);
            format_log_line(
                &mut line,
                self.epoch.elapsed().as_micros(),
                record.level(),
                *record.args(),
            );

            // One write per line so concurrent lines do not interleave
            let _ = std::io::stderr().lock().write_all(line.as_bytes());
        }

        fn flush(&self) {
            let _ = std::io::stderr().flush();
        }
    }
}
