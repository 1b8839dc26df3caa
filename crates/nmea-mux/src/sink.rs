//! Sentence sinks (forwarders).
//!
//! Sinks receive framed sentences synchronously during fan-out, on the task
//! of the source that produced them. A sink returning an error is closed and
//! removed by the multiplexer.

use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

/// Errors reported by a sink write.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Underlying I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The sink was closed.
    #[error("Sink is closed")]
    Closed,
}

/// Consumer of framed sentences.
pub trait Sink: Send + Sync {
    /// Identity used to reject duplicate registrations.
    fn descriptor(&self) -> Value;

    /// Write one framed sentence (CR/LF terminated).
    fn write(&self, frame: &[u8]) -> Result<(), SinkError>;

    /// Release resources. Must be idempotent.
    fn close(&self) {}

    /// Serializable status for the control plane.
    fn status(&self) -> Value {
        self.descriptor()
    }
}

/// Writes to standard output.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    written: AtomicU64,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Sink for ConsoleSink {
    fn descriptor(&self) -> Value {
        json!({ "type": "console" })
    }

    fn write(&self, frame: &[u8]) -> Result<(), SinkError> {
        let mut out = io::stdout().lock();
        out.write_all(frame)?;
        out.flush()?;
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn status(&self) -> Value {
        json!({ "type": "console", "written": self.written.load(Ordering::Relaxed) })
    }
}

/// Appends sentences to a log file.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    append: bool,
    writer: Mutex<Option<LineWriter<File>>>,
    written: AtomicU64,
    closed: AtomicBool,
}

impl FileSink {
    pub fn create(path: impl Into<PathBuf>, append: bool) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)?;
        info!("Logging sentences to {}", path.display());
        Ok(Self {
            path,
            append,
            writer: Mutex::new(Some(LineWriter::new(file))),
            written: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }
}

impl Sink for FileSink {
    fn descriptor(&self) -> Value {
        json!({ "type": "file", "path": self.path.display().to_string() })
    }

    fn write(&self, frame: &[u8]) -> Result<(), SinkError> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let writer = writer.as_mut().ok_or(SinkError::Closed)?;
        writer.write_all(frame)?;
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.flush() {
                tracing::warn!("Flushing {}: {}", self.path.display(), e);
            }
        }
    }

    fn status(&self) -> Value {
        json!({
            "type": "file",
            "path": self.path.display().to_string(),
            "append": self.append,
            "written": self.written.load(Ordering::Relaxed),
            "closed": self.closed.load(Ordering::Relaxed),
        })
    }
}
