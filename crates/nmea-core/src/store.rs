//! Navigation data cache.
//!
//! The cache holds the latest value of every semantic key. Every update runs
//! the recompute pass (see [`crate::wind::derive`]) before the lock is
//! released, so readers never observe inputs without their derived values.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use crate::config::CacheSettings;
use crate::current::{best_estimate, CurrentEstimate};
use crate::model::{CacheEntry, CacheKey, CacheValue, GeoPos};
use crate::wind;

/// Trait for navigation state storage.
pub trait NavStore: Send + Sync {
    /// Apply a batch of entries, then run the recompute pass.
    fn put_all(&mut self, entries: Vec<CacheEntry>);

    /// Get the value for one key.
    fn get(&self, key: CacheKey) -> Option<&CacheValue>;

    /// Remove every key.
    fn reset(&mut self);

    /// Number of populated keys.
    fn len(&self) -> usize;

    /// Full content as JSON.
    fn to_json(&self) -> Value;
}

/// Unsynchronized cache content.
///
/// Only reachable through [`DataCache`] at runtime; usable directly in tests
/// and by the pure recompute pass.
#[derive(Debug, Clone, Default)]
pub struct CacheState {
    values: HashMap<CacheKey, CacheValue>,
    settings: CacheSettings,
}

impl CacheState {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            values: HashMap::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Angle in degrees for an angle-typed key.
    pub fn angle(&self, key: CacheKey) -> Option<f64> {
        self.values.get(&key).and_then(CacheValue::as_angle)
    }

    /// Speed in knots for a speed-typed key.
    pub fn speed(&self, key: CacheKey) -> Option<f64> {
        self.values.get(&key).and_then(CacheValue::as_speed)
    }

    pub fn position(&self) -> Option<GeoPos> {
        self.values
            .get(&CacheKey::Position)
            .and_then(CacheValue::as_position)
    }

    /// All published current estimates, keyed by window length.
    pub fn currents(&self) -> Option<&BTreeMap<u64, CurrentEstimate>> {
        self.values
            .get(&CacheKey::CalculatedCurrent)
            .and_then(CacheValue::as_current)
    }

    /// The current estimate to report: largest steady window.
    pub fn best_current(&self) -> Option<CurrentEstimate> {
        self.currents().and_then(best_estimate)
    }

    /// Declination from instruments, or the configured default.
    pub fn declination(&self) -> f64 {
        self.angle(CacheKey::Declination)
            .unwrap_or(self.settings.default_declination)
    }

    /// Store one value without recomputing.
    pub fn insert(&mut self, key: CacheKey, value: CacheValue) {
        self.values.insert(key, value);
    }

    fn recompute(&mut self) {
        let derived = wind::derive(self);
        self.values.extend(derived);
    }
}

impl NavStore for CacheState {
    fn put_all(&mut self, entries: Vec<CacheEntry>) {
        self.values.extend(entries);
        self.recompute();
    }

    fn get(&self, key: CacheKey) -> Option<&CacheValue> {
        self.values.get(&key)
    }

    fn reset(&mut self) {
        self.values.clear();
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn to_json(&self) -> Value {
        let ordered: BTreeMap<&CacheKey, &CacheValue> = self.values.iter().collect();
        serde_json::to_value(ordered).unwrap_or(Value::Null)
    }
}

/// Shared, lock-protected navigation cache.
///
/// Cloning yields another handle to the same cache.
#[derive(Debug, Clone, Default)]
pub struct DataCache {
    inner: Arc<Mutex<CacheState>>,
}

impl DataCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheState::new(settings))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // A panic while holding the lock leaves plain data behind, still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: CacheKey) -> Option<CacheValue> {
        self.lock().get(key).cloned()
    }

    pub fn put(&self, key: CacheKey, value: CacheValue) {
        self.lock().put_all(vec![(key, value)]);
    }

    /// Atomic multi-key update followed by recompute, in one critical section.
    pub fn put_all(&self, entries: Vec<CacheEntry>) {
        if entries.is_empty() {
            return;
        }
        self.lock().put_all(entries);
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Combined multi-key read inside one critical section.
    pub fn read<R>(&self, f: impl FnOnce(&CacheState) -> R) -> R {
        f(&self.lock())
    }

    /// Exclusive section for updates that must stay consistent with state
    /// held outside the cache (e.g. current estimators).
    pub fn transaction<R>(&self, f: impl FnOnce(&mut CacheState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn to_json(&self) -> Value {
        self.lock().to_json()
    }
}
