//! Structured logging. Modules log through the `slog_scope` macros re-exported here; the binary
//! installs a [`LogSettings::build`] logger as the global one.

pub use slog_scope::{crit, debug, error, info, trace, warn};

use sloggers::types::{Format, OverflowStrategy, Severity};
use sloggers::Build;

/// A key-value pair that is left out of the record entirely when the value is `None`.
pub struct OptionalKV<V: slog::Value>(pub &'static str, pub Option<V>);

impl<V: slog::Value> slog::KV for OptionalKV<V> {
    fn serialize(&self, record: &slog::Record, serializer: &mut dyn slog::Serializer) -> slog::Result {
        match &self.1 {
            Some(v) => v.serialize(record, self.0, serializer),
            None => Ok(()),
        }
    }
}

/// Where log records go, and how verbose they are.
#[derive(Clone, Debug, Default)]
pub struct LogSettings {
    /// 0 is warnings only; every step up adds info, debug and trace, in that order.
    pub verbosity: usize,
    pub terminal_disabled: bool,
    /// Block on a full terminal buffer instead of reporting dropped records.
    pub terminal_blocking: bool,
    /// JSON log file. When set, the terminal only shows errors and above.
    pub file: Option<std::path::PathBuf>,
}

impl LogSettings {
    fn severity(&self) -> Severity {
        match self.verbosity {
            0 => Severity::Warning,
            1 => Severity::Info,
            2 => Severity::Debug,
            _ => Severity::Trace,
        }
    }

    pub fn build(&self) -> Result<slog::Logger, sloggers::Error> {
        let severity = self.severity();
        let terminal = if self.terminal_disabled {
            sloggers::null::NullLoggerBuilder.build()?
        } else {
            let (level, overflow) = match self.file {
                Some(_) if !self.terminal_blocking => {
                    (Severity::Error, OverflowStrategy::DropAndReport)
                }
                Some(_) => (Severity::Error, OverflowStrategy::Block),
                None => (severity, OverflowStrategy::Block),
            };
            sloggers::terminal::TerminalLoggerBuilder::new()
                .destination(sloggers::terminal::Destination::Stderr)
                .level(level)
                .overflow_strategy(overflow)
                .format(Format::Compact)
                .build()?
        };
        let file = match &self.file {
            Some(path) => Some(
                sloggers::file::FileLoggerBuilder::new(path)
                    .truncate()
                    .level(severity)
                    .overflow_strategy(OverflowStrategy::Block)
                    .format(Format::Json)
                    .build()?,
            ),
            None => None,
        };
        Ok(slog::Logger::root(SplitDrain { terminal, file }, slog::o!()))
    }
}

/// Sends every record to the terminal logger and, if present, the file logger. Each applies its
/// own level filter.
struct SplitDrain {
    terminal: slog::Logger,
    file: Option<slog::Logger>,
}

impl slog::Drain for SplitDrain {
    type Ok = ();
    type Err = slog::Never;

    fn log(&self, r: &slog::Record<'_>, kv: &slog::OwnedKVList) -> Result<(), slog::Never> {
        if let Some(f) = &self.file {
            slog::Drain::log(f, r, kv)?;
        }
        slog::Drain::log(&self.terminal, r, kv)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn verbosity_saturates_at_trace() {
        let mut s = LogSettings::default();
        assert_eq!(s.severity(), Severity::Warning);
        s.verbosity = 2;
        assert_eq!(s.severity(), Severity::Debug);
        s.verbosity = 9;
        assert_eq!(s.severity(), Severity::Trace);
    }

    #[test]
    fn disabled_terminal_without_file_builds() {
        let s = LogSettings {
            terminal_disabled: true,
            ..Default::default()
        };
        assert!(s.build().is_ok());
    }
}
