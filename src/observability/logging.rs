//! Leveled, colorized console logger
//!
//! Every record carries a fixed-width prefix so that runs can be compared
//! line by line:
//!
//! ```text
//! [2024-01-01T12:00:00.000000]:[aZ3]:INFO:0.01234:  7: [MQTT_NOTIFIER][dispatch@src/dispatch.rs:42] Received notification
//! ```
//!
//! The fields are: local timestamp, process identifier (three alphanumeric
//! characters, fixed for the lifetime of the process), level name, seconds
//! since the logger was created, a monotonic record counter, the emitter tag,
//! an optional call-site tag and finally the message parts.
//!
//! ## Thresholds
//!
//! Two thresholds gate output. A record below the *global* threshold is
//! dropped before any work is done and does not consume a counter value. A
//! record at or above the global threshold but below the *console* threshold
//! is counted but not printed, so gaps in the printed counters show how many
//! records were filtered.
//!
//! ## Usage
//!
//! ```rust
//! use mqtt_notifier::isolog;
//! use mqtt_notifier::observability::logging::{EmitOptions, Level, Logger};
//!
//! let log = Logger::with_writer(std::io::sink());
//! log.configure("DOCS", false, Level::Debug.value(), Level::Info.value());
//!
//! isolog!(log; "Connected to", "127.0.0.1");
//! isolog!(log, lvl = Level::Debug; "Only counted, not printed");
//! isolog!(log, lvl = Level::Hilight, opts = EmitOptions::new().no_color(); "Payload:", "{}");
//! assert_eq!(log.count(), 3);
//! ```

use chrono::Local;
use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use std::backtrace::Backtrace;
use std::cell::Cell;
use std::fmt::{self, Write as _};
use std::io::{self, Write};
use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

/// Emitter tag used until [`Logger::set_default_emitter`] is called
pub const DEFAULT_EMITTER: &str = "UNKNOWN";

/// Soft cap for a rendered line when cutting is enabled
pub const CUT_LENGTH: usize = 1000;

const CALLEE_WIDTH: usize = 60;
const PREVIEW_LENGTH: usize = 20;
const TERMINATOR: &str = "\x1b[0m";

static PROCESS_IDENTIFIER: Lazy<String> = Lazy::new(|| {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(3)
        .map(char::from)
        .collect()
});

static GLOBAL_LOGGER: Lazy<Arc<Logger>> = Lazy::new(|| Arc::new(Logger::new()));

thread_local! {
    // Set while a console failure is being reported, so the report itself
    // can not recurse into another report.
    static REPORTING_SINK_FAILURE: Cell<bool> = const { Cell::new(false) };
}

/// Three character identifier shared by every record of this process
pub fn process_identifier() -> &'static str {
    &PROCESS_IDENTIFIER
}

/// Process-wide logger instance
///
/// Components receive this as an `Arc<Logger>` at construction time so tests
/// can hand them a private instance instead.
pub fn logger() -> Arc<Logger> {
    Arc::clone(&GLOBAL_LOGGER)
}

/// Record severity, ascending
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Level {
    Temp = 1,
    Events = 4,
    Verbose = 5,
    Debug = 10,
    Info = 20,
    Warn = 30,
    Error = 40,
    Critical = 50,
    Hilight = 60,
    Version = 99,
    /// As a threshold, disables all output
    Off = 100,
}

impl Level {
    pub const ALL: [Level; 11] = [
        Level::Temp,
        Level::Events,
        Level::Verbose,
        Level::Debug,
        Level::Info,
        Level::Warn,
        Level::Error,
        Level::Critical,
        Level::Hilight,
        Level::Version,
        Level::Off,
    ];

    /// Numeric value used for threshold comparisons
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Exact level for a numeric value, if one exists
    pub fn from_value(value: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|level| level.value() == value)
    }

    /// Name printed in the record prefix
    pub fn name(self) -> &'static str {
        match self {
            Level::Temp => "TEMP",
            Level::Events => "EVENT",
            Level::Verbose => "VERB",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Critical => "CRIT",
            Level::Hilight => "HILIGHT",
            Level::Version => "VER",
            Level::Off => "OFF",
        }
    }

    /// ANSI escape sequence that starts a colored line of this level
    pub fn color(self) -> &'static str {
        match self {
            Level::Temp => "\x1b[1;30m",
            Level::Events => "\x1b[1;36m",
            Level::Verbose => "\x1b[1;30m",
            Level::Debug => "\x1b[1;97m",
            Level::Info => "\x1b[1;92m",
            Level::Warn => "\x1b[1;93m",
            Level::Error => "\x1b[1;31;103m",
            Level::Critical => "\x1b[1;33;101m",
            Level::Hilight => "\x1b[1;4;34;106m",
            Level::Version => "\x1b[1;96;44m",
            Level::Off => "",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-call options for [`Logger::emit`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmitOptions {
    /// Emitter tag for this record instead of the configured default
    pub emitter: Option<String>,
    /// Never color this record
    pub no_color: bool,
    /// Resolve the call site even above debug verbosity and append a backtrace
    pub traceback: bool,
    /// Call-site tag to print verbatim instead of the captured location
    pub source_loc: Option<String>,
    /// Rendered error chain; set through [`EmitOptions::exception`]
    pub exception: Option<String>,
    /// Print structured parts pretty, each on its own line
    pub pretty: bool,
}

impl EmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitter(mut self, emitter: impl Into<String>) -> Self {
        self.emitter = Some(emitter.into());
        self
    }

    pub fn no_color(mut self) -> Self {
        self.no_color = true;
        self
    }

    pub fn traceback(mut self) -> Self {
        self.traceback = true;
        self
    }

    pub fn source_loc(mut self, source_loc: impl Into<String>) -> Self {
        self.source_loc = Some(source_loc.into());
        self
    }

    /// Exception mode: attach the error and its source chain to the record
    ///
    /// When the call site is resolved the record is raised to at least
    /// [`Level::Error`].
    pub fn exception<E: std::error::Error + ?Sized>(mut self, error: &E) -> Self {
        self.exception = Some(render_error_chain(error));
        self
    }

    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }
}

fn render_error_chain<E: std::error::Error + ?Sized>(error: &E) -> String {
    let mut trace = format!("Error: {error}");
    let mut source = error.source();
    if source.is_some() {
        trace.push_str("\nCaused by:");
    }
    let mut depth = 0;
    while let Some(cause) = source {
        let _ = write!(trace, "\n    {depth}: {cause}");
        depth += 1;
        source = cause.source();
    }
    trace
}

/// One message part of a log call
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    Structured(Value),
}

impl Part {
    fn render(&self, pretty: bool) -> String {
        match self {
            Part::Text(text) => text.clone(),
            Part::Structured(Value::String(text)) => text.clone(),
            Part::Structured(value) if pretty => match serde_json::to_string_pretty(value) {
                Ok(rendered) => format!("\n{rendered}"),
                Err(_) => value.to_string(),
            },
            Part::Structured(value) => value.to_string(),
        }
    }
}

impl From<String> for Part {
    fn from(text: String) -> Self {
        Part::Text(text)
    }
}

impl<T: fmt::Display + ?Sized> From<&T> for Part {
    fn from(value: &T) -> Self {
        Part::Text(value.to_string())
    }
}

impl From<Value> for Part {
    fn from(value: Value) -> Self {
        Part::Structured(value)
    }
}

macro_rules! part_from_display {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Part {
            fn from(value: $ty) -> Self {
                Part::Text(value.to_string())
            }
        })*
    };
}

part_from_display!(bool, u8, u16, u32, u64, usize, i32, i64, f64);

/// Source location of a log call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub function: &'static str,
    pub file: &'static str,
    pub line: u32,
}

impl CallSite {
    pub const fn new(function: &'static str, file: &'static str, line: u32) -> Self {
        Self {
            function,
            file,
            line,
        }
    }

    pub fn from_location(location: &'static Location<'static>) -> Self {
        Self::new("", location.file(), location.line())
    }

    /// `[name@file:line]`, with the name cut to ten characters
    pub fn tag(&self) -> String {
        let name = match self.function.rsplit("::").next() {
            Some(name) if !name.is_empty() => name,
            _ => std::path::Path::new(self.file)
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("?"),
        };
        format!("[{:.10}@{}:{}]", name, self.file, self.line)
    }
}

/// A processed log call
///
/// Records are returned for inspection and discarded; the logger keeps no
/// history.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: String,
    pub process_id: &'static str,
    pub level: Level,
    pub runtime: f64,
    pub counter: u64,
    pub emitter: String,
    pub callee: Option<String>,
    pub body: String,
    pub exception: Option<String>,
    /// Whether the record passed the console threshold and was written
    pub printed: bool,
}

impl LogRecord {
    /// Render the record as one console line, without color
    pub fn render(&self, uncut: bool) -> String {
        let cut = !uncut && self.level > Level::Debug;

        let mut line = format!(
            "[{}]:[{}]:{}:{:.5}:{:3}: [{:>5}]",
            self.timestamp,
            self.process_id,
            self.level.name(),
            self.runtime,
            self.counter,
            self.emitter,
        );

        if let Some(callee) = &self.callee {
            if cut {
                let _ = write!(line, "{:<width$}", callee, width = CALLEE_WIDTH);
            } else {
                line.push_str(callee);
            }
        }

        line.push_str(&self.body);

        if let Some(trace) = &self.exception {
            line.push('\n');
            line.push_str(trace);
        }

        if cut && self.level < Level::Critical && line.len() > CUT_LENGTH {
            let mut end = CUT_LENGTH;
            while !line.is_char_boundary(end) {
                end -= 1;
            }
            line.truncate(end);
        }

        line
    }
}

/// Leveled console logger
pub struct Logger {
    start: Instant,
    count: AtomicU64,
    global: AtomicU8,
    console: AtomicU8,
    color: AtomicBool,
    uncut: AtomicBool,
    default_emitter: RwLock<String>,
    console_sink: Mutex<Box<dyn Write + Send>>,
}

impl Logger {
    /// Logger writing to standard output
    pub fn new() -> Self {
        Self::with_writer(io::stdout())
    }

    /// Logger writing to an arbitrary sink
    pub fn with_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            start: Instant::now(),
            count: AtomicU64::new(0),
            global: AtomicU8::new(Level::Verbose.value()),
            console: AtomicU8::new(Level::Verbose.value()),
            color: AtomicBool::new(false),
            uncut: AtomicBool::new(true),
            default_emitter: RwLock::new(DEFAULT_EMITTER.to_string()),
            console_sink: Mutex::new(Box::new(writer)),
        }
    }

    /// One-shot startup configuration
    pub fn configure(&self, default_emitter: &str, color: bool, global: u8, console: u8) {
        self.set_default_emitter(default_emitter);
        self.set_color(color);
        self.set_verbosity(global, Some(console));
    }

    pub fn set_color(&self, enabled: bool) {
        self.color.store(enabled, Ordering::Relaxed);
    }

    pub fn set_default_emitter(&self, emitter: &str) {
        let mut guard = self
            .default_emitter
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = emitter.to_string();
    }

    /// Adjust thresholds; `None` keeps the current console threshold
    pub fn set_verbosity(&self, global: u8, console: Option<u8>) {
        self.global.store(global, Ordering::Relaxed);
        if let Some(console) = console {
            self.console.store(console, Ordering::Relaxed);
        }
    }

    /// Enable or disable line cutting (disabled by default)
    pub fn set_uncut(&self, uncut: bool) {
        self.uncut.store(uncut, Ordering::Relaxed);
    }

    /// `(global, console)` thresholds
    pub fn verbosity(&self) -> (u8, u8) {
        (
            self.global.load(Ordering::Relaxed),
            self.console.load(Ordering::Relaxed),
        )
    }

    /// Number of records processed so far
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn default_emitter(&self) -> String {
        self.default_emitter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a record of this level would be processed at all
    pub fn enabled(&self, level: Level) -> bool {
        level.value() >= self.global.load(Ordering::Relaxed)
    }

    /// Log `parts` at `level`, taking the call site from the caller
    #[track_caller]
    pub fn emit(&self, parts: &[Part], level: Level, options: EmitOptions) -> Option<LogRecord> {
        self.emit_at(
            parts,
            level,
            options,
            CallSite::from_location(Location::caller()),
        )
    }

    /// Log `parts` at `level` with an explicit call site
    ///
    /// Returns `None` when the level is below the global threshold.
    pub fn emit_at(
        &self,
        parts: &[Part],
        level: Level,
        options: EmitOptions,
        site: CallSite,
    ) -> Option<LogRecord> {
        let global = self.global.load(Ordering::Relaxed);
        if level.value() < global {
            return None;
        }

        let counter = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        let runtime = self.start.elapsed().as_secs_f64();

        let mut level = level;
        let mut callee = None;
        if global <= Level::Debug.value() || options.traceback {
            callee = Some(match options.source_loc {
                Some(source_loc) => source_loc,
                None => site.tag(),
            });
            if options.exception.is_some() && level < Level::Error {
                level = Level::Error;
            }
        }

        let mut body = String::new();
        for part in parts {
            body.push(' ');
            body.push_str(&part.render(options.pretty));
        }

        let mut exception = options.exception;
        if options.traceback {
            let backtrace = Backtrace::force_capture().to_string();
            exception = Some(match exception {
                Some(trace) => format!("{trace}\n{backtrace}"),
                None => backtrace,
            });
        }

        let mut record = LogRecord {
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            process_id: process_identifier(),
            level,
            runtime,
            counter,
            emitter: options.emitter.unwrap_or_else(|| self.default_emitter()),
            callee,
            body,
            exception,
            printed: false,
        };

        if level.value() >= self.console.load(Ordering::Relaxed) {
            let mut output = record.render(self.uncut.load(Ordering::Relaxed));
            if self.color.load(Ordering::Relaxed) && !options.no_color {
                output = format!("{}{}{}", level.color(), output, TERMINATOR);
            }
            record.printed = self.write_to_console(&output);
        }

        Some(record)
    }

    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut sink = self
            .console_sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        writeln!(sink, "{line}")?;
        sink.flush()
    }

    fn write_to_console(&self, output: &str) -> bool {
        let error = match self.write_line(output) {
            Ok(()) => return true,
            Err(error) => error,
        };

        match error.kind() {
            io::ErrorKind::WouldBlock => {
                let preview: String = output.chars().take(PREVIEW_LENGTH).collect();
                self.report_sink_failure(&[
                    Part::from("Too long log line encountered:"),
                    Part::Text(preview),
                ]);
                false
            }
            io::ErrorKind::InvalidData => {
                let escaped: String = output
                    .bytes()
                    .flat_map(std::ascii::escape_default)
                    .map(char::from)
                    .collect();
                let written = self.write_line(&escaped).is_ok();
                self.report_sink_failure(&[
                    Part::from("Bad encoding encountered on previous message:"),
                    Part::from(&error),
                ]);
                written
            }
            _ => {
                self.report_sink_failure(&[Part::from("Console write failed:"), Part::from(&error)]);
                false
            }
        }
    }

    fn report_sink_failure(&self, parts: &[Part]) {
        if REPORTING_SINK_FAILURE.with(Cell::get) {
            return;
        }
        REPORTING_SINK_FAILURE.with(|flag| flag.set(true));
        let _ = self.emit_at(
            parts,
            Level::Warn,
            EmitOptions::default(),
            CallSite::new(module_path!(), file!(), line!()),
        );
        REPORTING_SINK_FAILURE.with(|flag| flag.set(false));
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (global, console) = self.verbosity();
        f.debug_struct("Logger")
            .field("count", &self.count())
            .field("global", &global)
            .field("console", &console)
            .field("color", &self.color.load(Ordering::Relaxed))
            .field("uncut", &self.uncut.load(Ordering::Relaxed))
            .field("default_emitter", &self.default_emitter())
            .finish()
    }
}

/// Log through a [`Logger`], skipping all argument evaluation when the level
/// is below the global threshold
///
/// ```rust
/// # use mqtt_notifier::isolog;
/// # use mqtt_notifier::observability::logging::{EmitOptions, Level, Logger};
/// # let log = Logger::with_writer(std::io::sink());
/// # let error = std::io::Error::other("boom");
/// isolog!(log; "plain info");
/// isolog!(log, lvl = Level::Warn; "warning with", 2, "parts");
/// isolog!(log, lvl = Level::Error, opts = EmitOptions::new().exception(&error); "failed:");
/// ```
#[macro_export]
macro_rules! isolog {
    ($logger:expr, lvl = $lvl:expr, opts = $opts:expr; $($part:expr),+ $(,)?) => {{
        let logger: &$crate::observability::logging::Logger = &$logger;
        let level: $crate::observability::logging::Level = $lvl;
        if logger.enabled(level) {
            let _ = logger.emit_at(
                &[$($crate::observability::logging::Part::from($part)),+],
                level,
                $opts,
                $crate::observability::logging::CallSite::new(module_path!(), file!(), line!()),
            );
        }
    }};
    ($logger:expr, lvl = $lvl:expr; $($part:expr),+ $(,)?) => {
        $crate::isolog!(
            $logger,
            lvl = $lvl,
            opts = $crate::observability::logging::EmitOptions::default();
            $($part),+
        )
    };
    ($logger:expr, opts = $opts:expr; $($part:expr),+ $(,)?) => {
        $crate::isolog!(
            $logger,
            lvl = $crate::observability::logging::Level::Info,
            opts = $opts;
            $($part),+
        )
    };
    ($logger:expr; $($part:expr),+ $(,)?) => {
        $crate::isolog!(
            $logger,
            lvl = $crate::observability::logging::Level::Info,
            opts = $crate::observability::logging::EmitOptions::default();
            $($part),+
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::CaptureWriter;
    use serde_json::json;

    fn capture_logger(global: Level, console: Level) -> (Logger, CaptureWriter) {
        let capture = CaptureWriter::new();
        let log = Logger::with_writer(capture.clone());
        log.configure("TESTS", false, global.value(), console.value());
        (log, capture)
    }

    fn site() -> CallSite {
        CallSite::new("mqtt_notifier::dispatch", "src/dispatch.rs", 42)
    }

    /// Writer that refuses any single write longer than `limit` bytes
    struct ShortWriter {
        limit: usize,
        inner: CaptureWriter,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if buf.len() > self.limit {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "line too long"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Writer rejecting anything that is not plain ASCII
    struct AsciiOnlyWriter {
        inner: CaptureWriter,
    }

    impl Write for AsciiOnlyWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if !buf.is_ascii() {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "not ascii"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Writer whose first write fails with `kind`
    struct FailOnceWriter {
        kind: io::ErrorKind,
        failed: bool,
        inner: CaptureWriter,
    }

    impl Write for FailOnceWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if !self.failed {
                self.failed = true;
                return Err(io::Error::new(self.kind, "pipe closed"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_levels_are_ordered_by_value() {
        let values: Vec<u8> = Level::ALL.iter().map(|level| level.value()).collect();
        assert_eq!(values, vec![1, 4, 5, 10, 20, 30, 40, 50, 60, 99, 100]);
        assert!(Level::ALL.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(Level::from_value(60), Some(Level::Hilight));
        assert_eq!(Level::from_value(61), None);
    }

    #[test]
    fn test_below_global_threshold_is_noop() {
        let (log, capture) = capture_logger(Level::Info, Level::Info);

        let record = log.emit(&[Part::from("hidden")], Level::Debug, EmitOptions::new());

        assert!(record.is_none());
        assert_eq!(log.count(), 0);
        assert!(capture.contents().is_empty());
    }

    #[test]
    fn test_below_console_threshold_is_counted_not_printed() {
        let (log, capture) = capture_logger(Level::Debug, Level::Warn);

        let record = log
            .emit(&[Part::from("quiet")], Level::Info, EmitOptions::new())
            .unwrap();

        assert_eq!(record.counter, 1);
        assert!(!record.printed);
        assert!(capture.contents().is_empty());

        let record = log
            .emit(&[Part::from("loud")], Level::Warn, EmitOptions::new())
            .unwrap();
        assert_eq!(record.counter, 2);
        assert!(record.printed);
        assert!(capture.contents().contains(":  2: "));
    }

    #[test]
    fn test_prefix_layout() {
        let (log, capture) = capture_logger(Level::Info, Level::Info);

        log.emit_at(
            &[Part::from("hello"), Part::from("world")],
            Level::Info,
            EmitOptions::new(),
            site(),
        );

        let line = capture.lines().pop().unwrap();
        let pattern = regex::Regex::new(
            r"^\[\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{6}\]:\[[A-Za-z0-9]{3}\]:INFO:\d+\.\d{5}:  1: \[TESTS\] hello world$",
        )
        .unwrap();
        assert!(pattern.is_match(&line), "unexpected line: {line}");
    }

    #[test]
    fn test_short_emitter_is_right_aligned() {
        let (log, capture) = capture_logger(Level::Info, Level::Info);

        log.emit(&[Part::from("x")], Level::Info, EmitOptions::new().emitter("AB"));

        assert!(capture.contents().contains(": [   AB] x"));
    }

    #[test]
    fn test_call_site_only_at_debug_verbosity() {
        let (log, capture) = capture_logger(Level::Info, Level::Info);
        log.emit_at(&[Part::from("a")], Level::Info, EmitOptions::new(), site());
        assert!(!capture.contents().contains("@src/dispatch.rs"));

        log.set_verbosity(Level::Debug.value(), None);
        log.emit_at(&[Part::from("b")], Level::Info, EmitOptions::new(), site());
        assert!(capture
            .contents()
            .contains("[TESTS][dispatch@src/dispatch.rs:42] b"));
    }

    #[test]
    fn test_traceback_forces_call_site() {
        let (log, _capture) = capture_logger(Level::Info, Level::Off);

        let record = log
            .emit_at(&[Part::from("a")], Level::Info, EmitOptions::new().traceback(), site())
            .unwrap();

        assert_eq!(
            record.callee.as_deref(),
            Some("[dispatch@src/dispatch.rs:42]")
        );
        assert!(record.exception.is_some());
    }

    #[test]
    fn test_source_loc_overrides_captured_site() {
        let (log, capture) = capture_logger(Level::Debug, Level::Debug);

        log.emit_at(
            &[Part::from("x")],
            Level::Info,
            EmitOptions::new().source_loc("[custom]"),
            site(),
        );

        assert!(capture.contents().contains("[TESTS][custom] x"));
    }

    #[test]
    fn test_call_site_name_is_cut_to_ten_chars() {
        let site = CallSite::new("crate::subscription_dispatcher", "src/lib.rs", 7);
        assert_eq!(site.tag(), "[subscripti@src/lib.rs:7]");

        let site = CallSite::new("", "src/observability/logging.rs", 3);
        assert_eq!(site.tag(), "[logging@src/observability/logging.rs:3]");
    }

    #[test]
    fn test_track_caller_reports_this_file() {
        let (log, _capture) = capture_logger(Level::Debug, Level::Off);

        let record = log
            .emit(&[Part::from("x")], Level::Info, EmitOptions::new())
            .unwrap();

        assert!(record.callee.unwrap().contains("logging.rs:"));
    }

    #[test]
    fn test_color_wraps_line() {
        let (log, capture) = capture_logger(Level::Info, Level::Info);
        log.set_color(true);

        log.emit(&[Part::from("colored")], Level::Warn, EmitOptions::new());
        log.emit(&[Part::from("plain")], Level::Warn, EmitOptions::new().no_color());

        let lines = capture.lines();
        assert!(lines[0].starts_with(Level::Warn.color()));
        assert!(lines[0].ends_with(TERMINATOR));
        assert!(lines[1].starts_with('['));
        assert!(!lines[1].contains('\x1b'));
    }

    #[test]
    fn test_exception_mode_raises_level_and_appends_chain() {
        let (log, capture) = capture_logger(Level::Debug, Level::Debug);
        let inner = io::Error::new(io::ErrorKind::NotFound, "inner cause");
        let outer = crate::config::ConfigError::FileRead(inner);

        let record = log
            .emit(
                &[Part::from("loading failed:")],
                Level::Info,
                EmitOptions::new().exception(&outer),
            )
            .unwrap();

        assert_eq!(record.level, Level::Error);
        let contents = capture.contents();
        assert!(contents.contains(":ERROR:"));
        assert!(contents.contains("Error: Failed to read config file: inner cause"));
        assert!(contents.contains("Caused by:\n    0: inner cause"));
    }

    #[test]
    fn test_pretty_prints_structured_parts() {
        let (log, capture) = capture_logger(Level::Info, Level::Info);

        log.emit(
            &[Part::from("payload:"), Part::from(json!({"title": "T"}))],
            Level::Info,
            EmitOptions::new().pretty(),
        );
        log.emit(
            &[Part::from(json!({"title": "T"}))],
            Level::Info,
            EmitOptions::new(),
        );
        log.emit(
            &[Part::from(json!("just text"))],
            Level::Info,
            EmitOptions::new().pretty(),
        );

        let contents = capture.contents();
        assert!(contents.contains("payload: \n{\n  \"title\": \"T\"\n}"));
        assert!(contents.contains(r#" {"title":"T"}"#));
        assert!(contents.contains(" just text"));
    }

    #[test]
    fn test_uncut_by_default() {
        let (log, capture) = capture_logger(Level::Info, Level::Info);
        let long = "x".repeat(CUT_LENGTH * 2);

        log.emit(&[Part::from(long.as_str())], Level::Info, EmitOptions::new());

        assert!(capture.lines()[0].len() > CUT_LENGTH * 2);
    }

    #[test]
    fn test_cut_mode_spares_highest_levels() {
        let (log, capture) = capture_logger(Level::Info, Level::Info);
        log.set_uncut(false);
        let long = "x".repeat(CUT_LENGTH * 2);

        log.emit(&[Part::from(long.as_str())], Level::Warn, EmitOptions::new());
        log.emit(&[Part::from(long.as_str())], Level::Critical, EmitOptions::new());

        let lines = capture.lines();
        assert_eq!(lines[0].len(), CUT_LENGTH);
        assert!(lines[1].len() > CUT_LENGTH * 2);
    }

    #[test]
    fn test_blocked_console_reports_preview() {
        let capture = CaptureWriter::new();
        let log = Logger::with_writer(ShortWriter {
            limit: 300,
            inner: capture.clone(),
        });
        log.configure("TESTS", false, Level::Info.value(), Level::Info.value());

        let record = log
            .emit(&[Part::from("y".repeat(500).as_str())], Level::Info, EmitOptions::new())
            .unwrap();

        assert!(!record.printed);
        assert_eq!(log.count(), 2);
        let lines = capture.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains(":WARN:"));
        assert!(lines[0].contains("Too long log line encountered:"));
    }

    #[test]
    fn test_bad_encoding_falls_back_to_escaped_bytes() {
        let capture = CaptureWriter::new();
        let log = Logger::with_writer(AsciiOnlyWriter {
            inner: capture.clone(),
        });
        log.configure("TESTS", false, Level::Info.value(), Level::Info.value());

        let record = log
            .emit(&[Part::from("café")], Level::Info, EmitOptions::new())
            .unwrap();

        assert!(record.printed);
        assert_eq!(log.count(), 2);
        let lines = capture.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(r"caf\xc3\xa9"));
        assert!(lines[1].contains(":WARN:"));
        assert!(lines[1].contains("Bad encoding encountered on previous message: not ascii"));
    }

    #[test]
    fn test_failed_console_write_is_reported() {
        let capture = CaptureWriter::new();
        let log = Logger::with_writer(FailOnceWriter {
            kind: io::ErrorKind::BrokenPipe,
            failed: false,
            inner: capture.clone(),
        });
        log.configure("TESTS", false, Level::Info.value(), Level::Info.value());

        let record = log
            .emit(&[Part::from("lost line")], Level::Info, EmitOptions::new())
            .unwrap();

        assert!(!record.printed);
        assert_eq!(log.count(), 2);
        let lines = capture.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains(":WARN:"));
        assert!(lines[0].contains("Console write failed: pipe closed"));
        assert!(!lines[0].contains("lost line"));
    }

    #[test]
    fn test_process_identifier_is_stable() {
        let id = process_identifier();
        assert_eq!(id.len(), 3);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(process_identifier(), id);
    }

    #[test]
    fn test_macro_skips_argument_evaluation_when_disabled() {
        let (log, _capture) = capture_logger(Level::Warn, Level::Warn);
        let mut evaluated = false;
        let mut part = || {
            evaluated = true;
            "expensive".to_string()
        };

        crate::isolog!(log, lvl = Level::Debug; part());

        assert!(!evaluated);
        assert_eq!(log.count(), 0);
    }
}
