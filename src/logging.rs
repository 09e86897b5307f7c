//! Logger setup shared by the binaries.
//!
//! Records go to the systemd user journal (`journalctl --user -t agenda-notify -f`).
//! This crate logs at info, or debug when toggled; everything else at warn.

use log::{LevelFilter, Log, Metadata, Record};
use std::path::Path;

const JOURNAL_SOCKET: &str = "/run/systemd/journal/socket";

fn crate_level() -> LevelFilter {
    if crate::debug_logging() {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

fn is_own_target(target: &str) -> bool {
    target.starts_with("agenda_notify") || target.starts_with("sync_check")
}

fn enabled_for(metadata: &Metadata) -> bool {
    if is_own_target(metadata.target()) {
        metadata.level() <= crate_level()
    } else {
        metadata.level() <= LevelFilter::Warn
    }
}

struct FilteredJournal {
    inner: systemd_journal_logger::JournalLog,
}

impl Log for FilteredJournal {
    fn enabled(&self, metadata: &Metadata) -> bool {
        enabled_for(metadata)
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.inner.log(record);
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Used when no journal socket is reachable (containers, non-systemd hosts).
struct FilteredStderr;

impl Log for FilteredStderr {
    fn enabled(&self, metadata: &Metadata) -> bool {
        enabled_for(metadata)
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            eprintln!("[{}][{}] {}: {}", ts, record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sink {
    Journal,
    Stderr,
}

/// `JournalLog::new` succeeds without a journal, so look for its socket.
fn pick_sink(socket: &Path) -> Sink {
    if socket.exists() {
        Sink::Journal
    } else {
        Sink::Stderr
    }
}

fn build(identifier: &str, sink: Sink) -> Box<dyn Log> {
    if sink == Sink::Journal {
        if let Ok(journal) = systemd_journal_logger::JournalLog::new() {
            let inner = journal.with_syslog_identifier(identifier.to_string());
            return Box::new(FilteredJournal { inner });
        }
    }
    Box::new(FilteredStderr)
}

/// Install the global logger. Safe to call once per process.
pub fn init(identifier: &str, debug: bool) {
    crate::set_debug_logging(debug);

    let sink = pick_sink(Path::new(JOURNAL_SOCKET));
    let installed = log::set_boxed_logger(build(identifier, sink));

    if installed.is_ok() {
        // Global max must be Debug so crate debug logs can pass through when toggled
        log::set_max_level(LevelFilter::Debug);
    }
}
