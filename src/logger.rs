// pve-roll
// Rolling upgrade orchestrator for Proxmox VE clusters.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.

//! Leveled, prefix-stacking logger.
//!
//! Bands follow the distilled spec exactly: 0 INFO, 1 VERBOSE, 2 DEBUG,
//! 3 DEBUG2, 4 DEBUG3, 5 SSH-verbose, 6 shell trace, 7 SSH extra-verbose.
//! A [`Logger`] is cheap to clone and to extend with [`Logger::with_prefix`],
//! which returns a child carrying an extra prefix segment — mirrors
//! `jetpack`'s `OutputHandler` trait split between a terminal sink and a
//! null sink, but threaded as a value instead of a trait object so prefix
//! stacking composes without interior mutability.

use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use inline_colorization::{color_green, color_red, color_reset, color_yellow};
use once_cell::sync::Lazy;

/// Whether stdout is a TTY, checked once per process rather than on every
/// `Logger`/`TerminalSink` construction.
static STDOUT_IS_TERMINAL: Lazy<bool> = Lazy::new(|| std::io::stdout().is_terminal());

pub const LEVEL_INFO: u8 = 0;
pub const LEVEL_VERBOSE: u8 = 1;
pub const LEVEL_DEBUG: u8 = 2;
pub const LEVEL_DEBUG2: u8 = 3;
pub const LEVEL_DEBUG3: u8 = 4;
pub const LEVEL_SSH_VERBOSE: u8 = 5;
pub const LEVEL_SHELL_TRACE: u8 = 6;
pub const LEVEL_SSH_EXTRA_VERBOSE: u8 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Sink abstraction so tests can capture emitted lines instead of printing.
pub trait LogSink: Send + Sync {
    fn emit(&self, line: &str);
}

/// Writes to stdout, degrading colour output gracefully on non-TTYs.
pub struct TerminalSink {
    colour: bool,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self {
            colour: *STDOUT_IS_TERMINAL,
        }
    }
}

impl Default for TerminalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for TerminalSink {
    fn emit(&self, line: &str) {
        println!("{line}");
    }
}

/// Collects lines in-memory; used by tests and library embedding.
#[derive(Default)]
pub struct CapturingSink {
    lines: std::sync::Mutex<Vec<String>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl LogSink for CapturingSink {
    fn emit(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

/// A leveled emitter carrying a stack of contextual prefixes.
///
/// Progress dots (emitted during polling waits, see [`crate::wait`]) are
/// suppressed above verbosity 0, per the spec's progress-output rule.
#[derive(Clone)]
pub struct Logger {
    level: u8,
    prefixes: Vec<String>,
    sink: Arc<dyn LogSink>,
    colour: bool,
    last_was_dot: Arc<AtomicBool>,
}

impl Logger {
    pub fn new(level: u8, sink: Arc<dyn LogSink>) -> Self {
        Self {
            level,
            prefixes: Vec::new(),
            sink,
            colour: *STDOUT_IS_TERMINAL,
            last_was_dot: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Returns a child logger with an additional prefix segment appended.
    /// Prefixes compose left-to-right, e.g. `[pve2][upgrade]`.
    pub fn with_prefix(&self, prefix: impl Into<String>) -> Logger {
        let mut prefixes = self.prefixes.clone();
        prefixes.push(prefix.into());
        Logger {
            level: self.level,
            prefixes,
            sink: Arc::clone(&self.sink),
            colour: self.colour,
            last_was_dot: Arc::new(AtomicBool::new(false)),
        }
    }

    fn prefix_str(&self) -> String {
        if self.prefixes.is_empty() {
            String::new()
        } else {
            format!("[{}] ", self.prefixes.join("]["))
        }
    }

    fn timestamp(&self) -> String {
        if self.level >= LEVEL_DEBUG2 {
            Local::now().format("%H:%M:%S%.3f").to_string()
        } else {
            Local::now().format("%H:%M:%S").to_string()
        }
    }

    fn band_name(level: u8) -> &'static str {
        match level {
            LEVEL_INFO => "INFO",
            LEVEL_VERBOSE => "VERBOSE",
            LEVEL_DEBUG => "DEBUG",
            LEVEL_DEBUG2 => "DEBUG2",
            LEVEL_DEBUG3 => "DEBUG3",
            LEVEL_SSH_VERBOSE => "SSH-V",
            LEVEL_SHELL_TRACE => "TRACE",
            _ => "SSH-VVV",
        }
    }

    /// Emits `message` at `at_level` if the logger's configured level is
    /// at least `at_level`. Level names are shown once verbosity >= 1.
    pub fn log(&self, at_level: u8, severity: Severity, message: &str) {
        if self.level < at_level {
            return;
        }
        self.last_was_dot.store(false, Ordering::Relaxed);

        let mut line = format!("{} ", self.timestamp());
        if self.level >= LEVEL_VERBOSE {
            line.push_str(&format!("{} ", Self::band_name(at_level)));
        }
        line.push_str(&self.prefix_str());

        let coloured = if !self.colour {
            message.to_string()
        } else {
            match severity {
                Severity::Info => message.to_string(),
                Severity::Warning => format!("{color_yellow}{message}{color_reset}"),
                Severity::Error => format!("{color_red}{message}{color_reset}"),
            }
        };
        line.push_str(&coloured);
        self.sink.emit(&line);
    }

    pub fn info(&self, message: &str) {
        self.log(LEVEL_INFO, Severity::Info, message);
    }

    pub fn verbose(&self, message: &str) {
        self.log(LEVEL_VERBOSE, Severity::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LEVEL_DEBUG, Severity::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LEVEL_INFO, Severity::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LEVEL_INFO, Severity::Error, message);
    }

    /// Logs a mutating command that was skipped under `--dry-run`.
    pub fn no_op(&self, command: &str) {
        let msg = if self.colour {
            format!("{color_green}NO-OP{color_reset} would run: {command}")
        } else {
            format!("NO-OP would run: {command}")
        };
        self.info(&msg);
    }

    /// A progress tick during a polling wait. At verbosity 0, a bare dot is
    /// appended to the current progress line; at higher verbosity the
    /// current observed value is logged instead and the dot stream is
    /// suppressed, per spec §4.4.
    pub fn progress_tick(&self, observed: &str) {
        if self.level == LEVEL_INFO {
            print!(".");
            use std::io::Write;
            let _ = std::io::stdout().flush();
            self.last_was_dot.store(true, Ordering::Relaxed);
        } else {
            self.debug(&format!("waiting: observed = {observed}"));
        }
    }

    /// Ends a run of progress dots with a newline, if any were printed.
    pub fn progress_done(&self) {
        if self.last_was_dot.swap(false, Ordering::Relaxed) {
            println!();
        }
    }

    pub fn ssh_verbose_flag(&self) -> bool {
        self.level >= LEVEL_SSH_VERBOSE
    }
}

/// A logger that discards everything — used by library embedders and tests
/// that don't care about output, mirroring `jetpack`'s `NullOutputHandler`.
pub fn null_logger() -> Logger {
    struct NullSink;
    impl LogSink for NullSink {
        fn emit(&self, _line: &str) {}
    }
    Logger::new(LEVEL_INFO, Arc::new(NullSink))
}
