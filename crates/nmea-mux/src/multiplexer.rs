//! The dispatcher.
//!
//! Every inbound sentence goes through [`Multiplexer::on_sentence`]:
//! 1. Validation, classification and cache ingestion
//! 2. Fan-out to the computers, in registration order. Each synthesized
//!    sentence is dispatched recursively
//! 3. Fan-out to the sinks, in registration order
//!
//! Registration and removal are safe while sentences are in flight. Once a
//! `remove_*` call returns, the removed component receives no more callbacks.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::StreamExt;
use nmea_core::{ConfigError, CurrentError, DataCache};
use nmea_protocol::{cache_entries, classify, decode, frame, validate, CodecError};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::computer::Computer;
use crate::filter::SentenceFilter;
use crate::registry::{Registry, Slot};
use crate::sink::Sink;
use crate::source::Source;

/// Maximum nesting of synthesized sentences.
pub const MAX_REENTRY_DEPTH: usize = 4;

/// Errors raised by the multiplexer and its factory.
#[derive(Debug, Error)]
pub enum MuxError {
    /// A component with the same descriptor is already registered.
    #[error("Duplicate {kind}: {descriptor}")]
    Duplicate { kind: &'static str, descriptor: Value },

    /// No component with this descriptor is registered.
    #[error("No {kind} registered as {descriptor}")]
    NotFound { kind: &'static str, descriptor: Value },

    /// Sources need a tokio runtime to run on.
    #[error("No tokio runtime available")]
    NoRuntime,

    /// Unknown component kind in configuration.
    #[error("Unknown {kind} type '{tag}'")]
    UnknownKind { kind: &'static str, tag: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Current(#[from] CurrentError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Dispatch counters.
#[derive(Debug, Default)]
pub struct Statistics {
    received: AtomicU64,
    rejected: AtomicU64,
    undecodable: AtomicU64,
    dispatched: AtomicU64,
    synthesized: AtomicU64,
    filtered: AtomicU64,
    too_deep: AtomicU64,
    sink_failures: AtomicU64,
}

/// Point-in-time copy of [`Statistics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    pub received: u64,
    pub rejected: u64,
    pub undecodable: u64,
    pub dispatched: u64,
    pub synthesized: u64,
    pub filtered: u64,
    pub too_deep: u64,
    pub sink_failures: u64,
}

impl Statistics {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            undecodable: self.undecodable.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            synthesized: self.synthesized.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            too_deep: self.too_deep.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}

/// A registered source and the task consuming it.
pub struct SourceHandle {
    source: Arc<dyn Source>,
    filter: SentenceFilter,
    lines: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SourceHandle {
    fn status(&self) -> Value {
        let mut status = self.source.status();
        if let Value::Object(map) = &mut status {
            map.insert("lines".into(), self.lines.load(Ordering::Relaxed).into());
            if !self.filter.is_empty() {
                map.insert(
                    "filter".into(),
                    serde_json::to_value(&self.filter).unwrap_or(Value::Null),
                );
            }
        }
        status
    }

    fn abort(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

struct Inner {
    cache: DataCache,
    sources: Registry<SourceHandle>,
    computers: Registry<dyn Computer>,
    sinks: Registry<dyn Sink>,
    stats: Statistics,
}

impl Inner {
    fn dispatch(&self, raw: &str, depth: usize) {
        if depth > MAX_REENTRY_DEPTH {
            Statistics::bump(&self.stats.too_deep);
            warn!("Dropping sentence nested {} deep: {}", depth, raw);
            return;
        }
        Statistics::bump(&self.stats.received);

        let line = raw.trim();
        if !validate(line) || classify(line).is_err() {
            Statistics::bump(&self.stats.rejected);
            debug!("Rejected: {}", line);
            return;
        }

        match decode(line) {
            Ok(sentence) => self.cache.put_all(cache_entries(&sentence)),
            Err(e) => {
                Statistics::bump(&self.stats.undecodable);
                debug!("Undecodable {}: {}", line, e);
            }
        }

        for slot in self.computers.snapshot().iter() {
            let Some(produced) = slot.call(|computer| computer.on_sentence(line)) else {
                continue;
            };
            for sentence in produced {
                Statistics::bump(&self.stats.synthesized);
                self.dispatch(&sentence, depth + 1);
            }
        }

        let framed = frame(line);
        for slot in self.sinks.snapshot().iter() {
            if let Some(Err(e)) = slot.call(|sink| sink.write(framed.as_bytes())) {
                Statistics::bump(&self.stats.sink_failures);
                warn!("Forwarder {} failed: {}", slot.descriptor(), e);
                self.detach_sink(slot.descriptor());
            }
        }
        Statistics::bump(&self.stats.dispatched);
    }

    fn detach_source(&self, descriptor: &Value) -> bool {
        let Some(slot) = self.sources.remove(descriptor) else {
            return false;
        };
        slot.close();
        slot.item().source.stop();
        slot.item().abort();
        info!("Channel removed: {}", descriptor);
        true
    }

    fn detach_computer(&self, descriptor: &Value) -> bool {
        let Some(slot) = self.computers.remove(descriptor) else {
            return false;
        };
        slot.close();
        slot.item().stop();
        info!("Computer removed: {}", descriptor);
        true
    }

    fn detach_sink(&self, descriptor: &Value) -> bool {
        let Some(slot) = self.sinks.remove(descriptor) else {
            return false;
        };
        slot.close();
        slot.item().close();
        info!("Forwarder removed: {}", descriptor);
        true
    }
}

/// Drive one source until it ends, fails or is removed.
async fn run_source(slot: Arc<Slot<SourceHandle>>, mux: Weak<Inner>) {
    let mut lines = slot.item().source.open();
    while let Some(next) = lines.next().await {
        let Some(inner) = mux.upgrade() else {
            break;
        };
        match next {
            Ok(line) => {
                let delivered = slot.call(|handle| {
                    handle.lines.fetch_add(1, Ordering::Relaxed);
                    if handle.filter.accepts(&line) {
                        inner.dispatch(&line, 0);
                    } else {
                        Statistics::bump(&inner.stats.filtered);
                    }
                });
                if delivered.is_none() {
                    break;
                }
            }
            Err(e) => {
                warn!("Channel {} failed: {}", slot.descriptor(), e);
                inner.detach_source(slot.descriptor());
                break;
            }
        }
    }
    debug!("Channel {} finished", slot.descriptor());
}

/// Hub connecting sources, computers and sinks around one cache.
///
/// Cloning yields another handle to the same multiplexer.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<Inner>,
}

impl Multiplexer {
    pub fn new(cache: DataCache) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                sources: Registry::new(),
                computers: Registry::new(),
                sinks: Registry::new(),
                stats: Statistics::default(),
            }),
        }
    }

    pub fn cache(&self) -> &DataCache {
        &self.inner.cache
    }

    /// Dispatch one raw sentence.
    pub fn on_sentence(&self, raw: &str) {
        self.inner.dispatch(raw, 0);
    }

    /// Register a source and start consuming it on a new task.
    pub fn add_source(&self, source: Arc<dyn Source>, filter: SentenceFilter) -> Result<(), MuxError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| MuxError::NoRuntime)?;
        let descriptor = source.descriptor();
        let handle = Arc::new(SourceHandle {
            source,
            filter,
            lines: AtomicU64::new(0),
            task: Mutex::new(None),
        });
        let slot = self
            .inner
            .sources
            .insert(descriptor.clone(), handle)
            .ok_or_else(|| MuxError::Duplicate {
                kind: "channel",
                descriptor: descriptor.clone(),
            })?;

        let task = runtime.spawn(run_source(slot.clone(), Arc::downgrade(&self.inner)));
        *slot
            .item()
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(task);
        info!("Channel added: {}", descriptor);
        Ok(())
    }

    pub fn remove_source(&self, descriptor: &Value) -> Result<(), MuxError> {
        if self.inner.detach_source(descriptor) {
            Ok(())
        } else {
            Err(MuxError::NotFound {
                kind: "channel",
                descriptor: descriptor.clone(),
            })
        }
    }

    /// Register a computer and start its housekeeping.
    pub fn add_computer(&self, computer: Arc<dyn Computer>) -> Result<(), MuxError> {
        let descriptor = computer.descriptor();
        let slot = self
            .inner
            .computers
            .insert(descriptor.clone(), computer)
            .ok_or_else(|| MuxError::Duplicate {
                kind: "computer",
                descriptor: descriptor.clone(),
            })?;
        slot.item().start();
        info!("Computer added: {}", descriptor);
        Ok(())
    }

    pub fn remove_computer(&self, descriptor: &Value) -> Result<(), MuxError> {
        if self.inner.detach_computer(descriptor) {
            Ok(())
        } else {
            Err(MuxError::NotFound {
                kind: "computer",
                descriptor: descriptor.clone(),
            })
        }
    }

    pub fn add_sink(&self, sink: Arc<dyn Sink>) -> Result<(), MuxError> {
        let descriptor = sink.descriptor();
        self.inner
            .sinks
            .insert(descriptor.clone(), sink)
            .ok_or_else(|| MuxError::Duplicate {
                kind: "forwarder",
                descriptor: descriptor.clone(),
            })?;
        info!("Forwarder added: {}", descriptor);
        Ok(())
    }

    pub fn remove_sink(&self, descriptor: &Value) -> Result<(), MuxError> {
        if self.inner.detach_sink(descriptor) {
            Ok(())
        } else {
            Err(MuxError::NotFound {
                kind: "forwarder",
                descriptor: descriptor.clone(),
            })
        }
    }

    /// Clear the cache and every computer's accumulated state.
    pub fn reset_cache(&self) {
        self.inner.cache.reset();
        for slot in self.inner.computers.snapshot().iter() {
            slot.call(|computer| computer.reset());
        }
        info!("Cache reset");
    }

    pub fn cache_snapshot(&self) -> Value {
        self.inner.cache.to_json()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn sources_status(&self) -> Vec<Value> {
        self.inner
            .sources
            .snapshot()
            .iter()
            .map(|slot| slot.item().status())
            .collect()
    }

    pub fn computers_status(&self) -> Vec<Value> {
        self.inner
            .computers
            .snapshot()
            .iter()
            .map(|slot| slot.item().status())
            .collect()
    }

    pub fn sinks_status(&self) -> Vec<Value> {
        self.inner
            .sinks
            .snapshot()
            .iter()
            .map(|slot| slot.item().status())
            .collect()
    }

    /// Stop sources first, then computers, then sinks.
    pub fn shutdown(&self) {
        for slot in self.inner.sources.drain() {
            slot.close();
            slot.item().source.stop();
            slot.item().abort();
        }
        for slot in self.inner.computers.drain() {
            slot.close();
            slot.item().stop();
        }
        for slot in self.inner.sinks.drain() {
            slot.close();
            slot.item().close();
        }
        info!("Multiplexer shut down");
    }
}
