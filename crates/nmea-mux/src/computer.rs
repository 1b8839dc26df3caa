//! Computation units.
//!
//! A [`Computer`] sees every dispatched sentence and may synthesize new ones,
//! which the multiplexer dispatches in turn. [`DerivedComputer`] produces the
//! true wind and water current sentences.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use nmea_core::{
    CacheKey, CacheState, CacheValue, CurrentError, CurrentEstimate,
    CurrentEstimators, CurrentSample, DataCache, NavStore,
};
use nmea_protocol::{
    cache_entries, classify, decode, encode, CodecError, Sentence, Synthesized, TalkerId,
};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Sentence ids the derived computer reacts to.
pub const RELEVANT_SENTENCES: [&str; 8] = ["RMC", "VTG", "VHW", "HDG", "HDM", "HDT", "MWV", "VWR"];

/// Default period of the estimator eviction tick.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

/// Source of arrival timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// A unit fed with every dispatched sentence.
pub trait Computer: Send + Sync {
    /// Identity used to reject duplicate registrations.
    fn descriptor(&self) -> Value;

    /// Process one sentence, returning the sentences to dispatch next.
    ///
    /// Failures are handled internally; they never propagate to the caller.
    fn on_sentence(&self, raw: &str) -> Vec<String>;

    /// Begin periodic housekeeping.
    fn start(&self) {}

    /// Halt housekeeping. Must be idempotent.
    fn stop(&self) {}

    /// Forget accumulated state, keep the configuration.
    fn reset(&self) {}

    /// Serializable status for the control plane.
    fn status(&self) -> Value {
        self.descriptor()
    }
}

/// Values read back from the cache after an update.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Readout {
    twa: Option<f64>,
    tws: Option<f64>,
    twd: Option<f64>,
    declination: f64,
    current: Option<CurrentEstimate>,
}

impl Readout {
    fn from_state(state: &CacheState) -> Self {
        Self {
            twa: state.angle(CacheKey::Twa),
            tws: state.speed(CacheKey::Tws),
            twd: state.angle(CacheKey::Twd),
            declination: state.declination(),
            current: state.best_current(),
        }
    }
}

/// A current sample from the cached fix, if every input is known.
fn sample_from(state: &CacheState, at: DateTime<Utc>) -> Option<CurrentSample> {
    Some(CurrentSample {
        at,
        heading: state.angle(CacheKey::HdgTrue)?,
        bsp: state.speed(CacheKey::Bsp)? * state.settings().bsp_factor,
        cog: state.angle(CacheKey::Cog)?,
        sog: state.speed(CacheKey::Sog)?,
    })
}

struct Shared {
    prefix: TalkerId,
    cache: DataCache,
    /// Only locked inside a cache transaction, or alone for status reads.
    estimators: Mutex<CurrentEstimators>,
    clock: Clock,
    processed: AtomicU64,
    emitted: AtomicU64,
    failures: AtomicU64,
}

impl Shared {
    fn estimators(&self) -> MutexGuard<'_, CurrentEstimators> {
        self.estimators
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Evict stale samples and republish the estimates.
    fn housekeeping(&self) {
        let now = (self.clock)();
        self.cache.transaction(|state| {
            let mut estimators = self.estimators();
            estimators.evict(now);
            let estimates = estimators.estimates();
            if !estimates.is_empty() || state.currents().is_some() {
                state.put_all(vec![(
                    CacheKey::CalculatedCurrent,
                    CacheValue::Current(estimates),
                )]);
            }
        });
    }
}

/// Derives true wind and current, and synthesizes the matching sentences.
pub struct DerivedComputer {
    shared: Arc<Shared>,
    tick_period: Duration,
    tick: Mutex<Option<JoinHandle<()>>>,
}

impl DerivedComputer {
    pub fn new(
        prefix: TalkerId,
        cache: DataCache,
        windows: &[Duration],
        min_span_fraction: f64,
    ) -> Result<Self, CurrentError> {
        Self::with_clock(prefix, cache, windows, min_span_fraction, Arc::new(Utc::now))
    }

    /// Same as [`DerivedComputer::new`] with an explicit clock.
    pub fn with_clock(
        prefix: TalkerId,
        cache: DataCache,
        windows: &[Duration],
        min_span_fraction: f64,
        clock: Clock,
    ) -> Result<Self, CurrentError> {
        let estimators = CurrentEstimators::new(windows, min_span_fraction)?;
        Ok(Self {
            shared: Arc::new(Shared {
                prefix,
                cache,
                estimators: Mutex::new(estimators),
                clock,
                processed: AtomicU64::new(0),
                emitted: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
            tick_period: DEFAULT_TICK_PERIOD,
            tick: Mutex::new(None),
        })
    }

    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    pub fn prefix(&self) -> TalkerId {
        self.shared.prefix
    }

    /// Current estimates of every window that has one.
    pub fn current_estimates(&self) -> BTreeMap<u64, CurrentEstimate> {
        self.shared.estimators().estimates()
    }

    /// Run the eviction pass now.
    pub fn housekeeping(&self) {
        self.shared.housekeeping();
    }

    fn process(&self, raw: &str) -> Result<Vec<String>, CodecError> {
        let header = classify(raw)?;
        if header.talker == self.shared.prefix.as_str()
            || !RELEVANT_SENTENCES.contains(&header.id.as_str())
        {
            return Ok(Vec::new());
        }
        let sentence = decode(raw)?;
        self.shared.processed.fetch_add(1, Ordering::Relaxed);

        let entries = cache_entries(&sentence);
        let is_fix = matches!(sentence, Sentence::Rmc(_) | Sentence::Vtg(_)) && !entries.is_empty();
        let now = (self.shared.clock)();

        let readout = self.shared.cache.transaction(|state| {
            state.put_all(entries);
            if is_fix {
                if let Some(sample) = sample_from(state, now) {
                    let mut estimators = self.shared.estimators();
                    estimators.add_sample(sample);
                    state.put_all(vec![(
                        CacheKey::CalculatedCurrent,
                        CacheValue::Current(estimators.estimates()),
                    )]);
                }
            }
            Readout::from_state(state)
        });

        Ok(self.synthesize(&readout))
    }

    fn synthesize(&self, readout: &Readout) -> Vec<String> {
        let prefix = self.shared.prefix;
        let mut out = Vec::new();

        if let (Some(twa), Some(tws), Some(twd)) = (readout.twa, readout.tws, readout.twd) {
            out.push(encode(prefix, &Synthesized::TrueWindAngle { tws, twa }));
            out.push(encode(prefix, &Synthesized::TrueWindRelative { tws, twa }));
            out.push(encode(
                prefix,
                &Synthesized::TrueWindDirection {
                    twd,
                    tws,
                    declination: readout.declination,
                },
            ));
        }

        if let Some(current) = readout.current {
            let drift = current.speed.value();
            let set = current.direction.value();
            if drift != 0.0 && set.round() != 0.0 {
                out.push(encode(
                    prefix,
                    &Synthesized::Current {
                        set,
                        drift,
                        declination: readout.declination,
                    },
                ));
            }
        }
        out
    }
}

impl Computer for DerivedComputer {
    fn descriptor(&self) -> Value {
        json!({ "type": "derived", "prefix": self.shared.prefix.as_str() })
    }

    fn on_sentence(&self, raw: &str) -> Vec<String> {
        match self.process(raw) {
            Ok(out) => {
                self.shared
                    .emitted
                    .fetch_add(out.len() as u64, Ordering::Relaxed);
                out
            }
            Err(e) => {
                self.shared.failures.fetch_add(1, Ordering::Relaxed);
                warn!("Derived computer {}: {}", self.shared.prefix, e);
                Vec::new()
            }
        }
    }

    fn start(&self) {
        let mut tick = self.tick.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if tick.is_some() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime, current eviction tick disabled");
            return;
        };
        let shared = Arc::downgrade(&self.shared);
        let period = self.tick_period;
        *tick = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.housekeeping();
            }
        }));
        info!("Derived computer {} started", self.shared.prefix);
    }

    fn stop(&self) {
        let tick = self
            .tick
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(tick) = tick {
            tick.abort();
            debug!("Derived computer {} stopped", self.shared.prefix);
        }
    }

    fn reset(&self) {
        self.shared
            .cache
            .transaction(|_| self.shared.estimators().reset());
    }

    fn status(&self) -> Value {
        let windows: Vec<Value> = self
            .shared
            .estimators()
            .iter()
            .map(|e| {
                json!({
                    "windowMs": e.window_ms(),
                    "state": e.state(),
                    "samples": e.len(),
                    "spanSeconds": e.span_seconds(),
                })
            })
            .collect();
        json!({
            "type": "derived",
            "prefix": self.shared.prefix.as_str(),
            "tickPeriodMs": self.tick_period.as_millis() as u64,
            "running": self.tick.lock().map(|t| t.is_some()).unwrap_or(false),
            "windows": windows,
            "processed": self.shared.processed.load(Ordering::Relaxed),
            "emitted": self.shared.emitted.load(Ordering::Relaxed),
            "failures": self.shared.failures.load(Ordering::Relaxed),
        })
    }
}

impl Drop for DerivedComputer {
    fn drop(&mut self) {
        self.stop();
    }
}
