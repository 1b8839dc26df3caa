//! Sentence sources.
//!
//! A [`Source`] hands out a stream of raw lines. The multiplexer drives each
//! source on its own tokio task and stops consuming as soon as the source is
//! removed.

use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Value};
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Producer of raw NMEA lines.
pub trait Source: Send + Sync {
    /// Identity used to reject duplicate registrations.
    fn descriptor(&self) -> Value;

    /// Start producing lines. Called once per registration.
    fn open(&self) -> BoxStream<'static, io::Result<String>>;

    /// Release underlying resources. Must be idempotent.
    fn stop(&self) {}

    /// Serializable status for the control plane.
    fn status(&self) -> Value {
        self.descriptor()
    }
}

/// Read one line, replacing bytes that are not UTF-8.
///
/// A corrupt byte then only spoils its own sentence, which fails the checksum.
async fn next_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(&buf);
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

// ============================================================================
// Channel source
// ============================================================================

/// Feeding end of a [`ChannelSource`].
#[derive(Debug, Clone)]
pub struct ChannelFeed {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelFeed {
    /// Push one line. Returns `false` once the source is gone.
    pub fn send(&self, line: impl Into<String>) -> bool {
        self.tx.send(line.into()).is_ok()
    }
}

/// In-process source fed through a [`ChannelFeed`].
pub struct ChannelSource {
    name: String,
    rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl ChannelSource {
    pub fn new(name: impl Into<String>) -> (Self, ChannelFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            name: name.into(),
            rx: Mutex::new(Some(rx)),
        };
        (source, ChannelFeed { tx })
    }
}

impl Source for ChannelSource {
    fn descriptor(&self) -> Value {
        json!({ "type": "channel", "name": self.name })
    }

    fn open(&self) -> BoxStream<'static, io::Result<String>> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match rx {
            Some(rx) => stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|line| (Ok(line), rx))
            })
            .boxed(),
            None => stream::empty().boxed(),
        }
    }

    fn stop(&self) {
        // Dropping the receiver makes every feed report the source as gone.
        self.rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}

// ============================================================================
// File replay
// ============================================================================

enum Replay {
    Closed,
    Reading(BufReader<File>),
    Done,
}

/// Replays a log file line by line.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    pause: Option<Duration>,
    looping: bool,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pause: None,
            looping: false,
        }
    }

    /// Wait between two lines.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = Some(pause);
        self
    }

    /// Restart from the top at end of file.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }
}

impl Source for FileSource {
    fn descriptor(&self) -> Value {
        json!({ "type": "file", "path": self.path.display().to_string() })
    }

    fn open(&self) -> BoxStream<'static, io::Result<String>> {
        let path = self.path.clone();
        let pause = self.pause;
        let looping = self.looping;
        stream::unfold(Replay::Closed, move |state| {
            let path = path.clone();
            async move {
                let mut lines = match state {
                    Replay::Done => return None,
                    Replay::Closed => match File::open(&path).await {
                        Ok(file) => {
                            info!("Replaying {}", path.display());
                            BufReader::new(file)
                        }
                        Err(e) => return Some((Err(e), Replay::Done)),
                    },
                    Replay::Reading(lines) => {
                        if let Some(pause) = pause {
                            tokio::time::sleep(pause).await;
                        }
                        lines
                    }
                };
                loop {
                    match next_line(&mut lines).await {
                        Ok(Some(line)) if line.trim().is_empty() => continue,
                        Ok(Some(line)) => return Some((Ok(line), Replay::Reading(lines))),
                        Ok(None) if looping => {
                            debug!("End of {}, rewinding", path.display());
                            match File::open(&path).await {
                                Ok(file) => lines = BufReader::new(file),
                                Err(e) => return Some((Err(e), Replay::Done)),
                            }
                        }
                        Ok(None) => {
                            info!("End of {}", path.display());
                            return None;
                        }
                        Err(e) => return Some((Err(e), Replay::Done)),
                    }
                }
            }
        })
        .boxed()
    }

    fn status(&self) -> Value {
        json!({
            "type": "file",
            "path": self.path.display().to_string(),
            "pauseMs": self.pause.map(|p| p.as_millis() as u64),
            "loop": self.looping,
        })
    }
}

// ============================================================================
// TCP client
// ============================================================================

enum Link {
    Connecting,
    Reading(BufReader<TcpStream>),
    Done,
}

/// Reads sentences from a remote TCP server.
#[derive(Debug, Clone)]
pub struct TcpSource {
    host: String,
    port: u16,
}

impl TcpSource {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Source for TcpSource {
    fn descriptor(&self) -> Value {
        json!({ "type": "tcp", "host": self.host, "port": self.port })
    }

    fn open(&self) -> BoxStream<'static, io::Result<String>> {
        let address = format!("{}:{}", self.host, self.port);
        stream::unfold(Link::Connecting, move |state| {
            let address = address.clone();
            async move {
                let mut lines = match state {
                    Link::Done => return None,
                    Link::Connecting => match TcpStream::connect(&address).await {
                        Ok(stream) => {
                            info!("Connected to {}", address);
                            BufReader::new(stream)
                        }
                        Err(e) => return Some((Err(e), Link::Done)),
                    },
                    Link::Reading(lines) => lines,
                };
                loop {
                    match next_line(&mut lines).await {
                        Ok(Some(line)) if line.trim().is_empty() => continue,
                        Ok(Some(line)) => return Some((Ok(line), Link::Reading(lines))),
                        Ok(None) => {
                            return Some((
                                Err(io::Error::new(
                                    io::ErrorKind::UnexpectedEof,
                                    format!("{} closed the connection", address),
                                )),
                                Link::Done,
                            ))
                        }
                        Err(e) => return Some((Err(e), Link::Done)),
                    }
                }
            }
        })
        .boxed()
    }
}
