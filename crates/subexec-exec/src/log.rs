//! Minimal logging seam used by the executor and retry policy.
//!
//! The core only needs `debug/info/warn/error(message, fields)`. The default
//! [`TracingSink`] forwards to `tracing`; embedders can plug in their own sink.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        })
    }
}

/// Structured key/value metadata attached to a log line.
pub type Fields<'a> = &'a [(&'a str, String)];

pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str, fields: Fields<'_>);

    fn debug(&self, message: &str, fields: Fields<'_>) {
        self.log(Level::Debug, message, fields);
    }

    fn info(&self, message: &str, fields: Fields<'_>) {
        self.log(Level::Info, message, fields);
    }

    fn warn(&self, message: &str, fields: Fields<'_>) {
        self.log(Level::Warn, message, fields);
    }

    fn error(&self, message: &str, fields: Fields<'_>) {
        self.log(Level::Error, message, fields);
    }
}

/// Forwards log lines to `tracing` under the `subexec` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: Level, message: &str, fields: Fields<'_>) {
        let fields = format_fields(fields);
        match level {
            Level::Debug => tracing::debug!(target: "subexec", fields = %fields, "{message}"),
            Level::Info => tracing::info!(target: "subexec", fields = %fields, "{message}"),
            Level::Warn => tracing::warn!(target: "subexec", fields = %fields, "{message}"),
            Level::Error => tracing::error!(target: "subexec", fields = %fields, "{message}"),
        }
    }
}

fn format_fields(fields: Fields<'_>) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::{Fields, Level, LogSink};

    /// Captures log lines for assertions.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub lines: Mutex<Vec<(Level, String)>>,
    }

    impl RecordingSink {
        pub fn messages_at(&self, level: Level) -> Vec<String> {
            self.lines
                .lock()
                .unwrap()
                .iter()
                .filter(|(l, _)| *l == level)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    impl LogSink for RecordingSink {
        fn log(&self, level: Level, message: &str, _fields: Fields<'_>) {
            self.lines.lock().unwrap().push((level, message.to_owned()));
        }
    }
}
