//! Logging setup.
//!
//! In the interactive UI every event lands in a shared [`LogBuffer`] that the
//! log console reads, and is mirrored to a log file when one can be opened.
//! The one-shot apply mode just logs to stderr.

use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::fs::{File, OpenOptions};
use std::io::{self, Write as _};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use tracing::field::{Field, Visit};
use tracing::{error, Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter};

/// Lines kept for the log console.
pub const LOG_RETENTION: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub level: Level,
    pub message: String,
}

impl LogLine {
    pub fn is_error(&self) -> bool {
        self.level == Level::ERROR
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = if self.level <= Level::WARN { "[Err]" } else { "[Msg]" };
        write!(
            f,
            "{} {} {}",
            self.timestamp.format("%H:%M:%S"),
            tag,
            self.message
        )
    }
}

/// Bounded, mutex-guarded queue of recent log lines. Oldest lines go first.
#[derive(Debug)]
pub struct LogBuffer {
    lines: Mutex<VecDeque<LogLine>>,
    retention: usize,
}

impl LogBuffer {
    pub fn new(retention: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(retention + 1)),
            retention,
        }
    }

    // A panic while holding the lock cannot leave the queue inconsistent
    fn lock(&self) -> MutexGuard<'_, VecDeque<LogLine>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, line: LogLine) {
        let mut lines = self.lock();
        lines.push_back(line);
        while lines.len() > self.retention {
            lines.pop_front();
        }
    }

    /// The last `count` lines, oldest first.
    pub fn recent(&self, count: usize) -> Vec<LogLine> {
        let lines = self.lock();
        let skip = lines.len().saturating_sub(count);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(LOG_RETENTION)
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Tracing layer that copies every event into a [`LogBuffer`].
pub struct BufferLayer {
    buffer: Arc<LogBuffer>,
}

impl BufferLayer {
    pub fn new(buffer: Arc<LogBuffer>) -> Self {
        Self { buffer }
    }
}

impl<S: Subscriber> Layer<S> for BufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        visitor.message.push_str(&visitor.fields);
        self.buffer.push(LogLine {
            timestamp: Local::now(),
            level: *event.metadata().level(),
            message: visitor.message,
        });
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn open_log_file(path: &Path) -> io::Result<File> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(
        file,
        "\n--- Session Started on {} ---\n",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    )?;
    Ok(file)
}

/// Routes logs into a fresh [`LogBuffer`] and, if possible, `log_path`.
pub fn init_interactive(log_path: &Path) -> Arc<LogBuffer> {
    let buffer = Arc::new(LogBuffer::default());
    let (file_layer, open_error) = match open_log_file(log_path) {
        Ok(file) => {
            let layer = tracing_fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file));
            (Some(layer), None)
        }
        Err(e) => (None, Some(e)),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(BufferLayer::new(Arc::clone(&buffer)))
        .with(file_layer)
        .try_init();

    if let Some(e) = open_error {
        error!(
            "Failed to open log {}. File logging will be disabled. ({})",
            log_path.display(),
            e
        );
    }
    buffer
}

pub fn init_console() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}
