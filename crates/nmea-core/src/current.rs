//! Water current estimation over sliding time windows.
//!
//! Each [`CurrentEstimator`] keeps the fixes received during the last `W`
//! milliseconds. The current is the time-weighted mean of the difference
//! between the ground track (COG/SOG) and the water track (heading/BSP)
//! over that buffer. Running sums are updated on append and eviction, so a
//! new sample costs O(evicted samples).

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Angle360, Speed};
use crate::vector::Velocity;

/// Default minimum buffer span, as a fraction of the window, before an
/// estimate is reported.
pub const DEFAULT_MIN_SPAN_FRACTION: f64 = 0.5;

/// Errors raised while configuring estimators.
#[derive(Debug, Error, PartialEq)]
pub enum CurrentError {
    #[error("Duplicates in time buffer lengths: {0} ms")]
    DuplicateWindow(u64),

    #[error("Time buffer length must be positive")]
    ZeroWindow,

    #[error("Minimum span fraction must be in (0, 1], got {0}")]
    InvalidFraction(f64),

    #[error("At least one time buffer length is required")]
    NoWindows,
}

/// One navigational fix feeding the estimators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentSample {
    /// Arrival time
    pub at: DateTime<Utc>,
    /// True heading, degrees
    pub heading: f64,
    /// Boat speed through water, knots
    pub bsp: f64,
    /// Course over ground, degrees
    pub cog: f64,
    /// Speed over ground, knots
    pub sog: f64,
}

impl CurrentSample {
    /// Ground velocity minus water velocity.
    pub fn drift(&self) -> Velocity {
        Velocity::polar(self.sog, self.cog) - Velocity::polar(self.bsp, self.heading)
    }
}

/// Lifecycle of one estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorState {
    Empty,
    Accumulating,
    Steady,
}

/// Published estimate for one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentEstimate {
    pub window_ms: u64,
    /// Drift
    pub speed: Speed,
    /// Set, where the water flows to
    pub direction: Angle360,
    pub state: EstimatorState,
    pub samples: usize,
}

/// Pick the estimate to report: the largest window in the Steady state.
pub fn best_estimate(estimates: &BTreeMap<u64, CurrentEstimate>) -> Option<CurrentEstimate> {
    estimates
        .values()
        .rev()
        .find(|e| e.state == EstimatorState::Steady)
        .copied()
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    at: DateTime<Utc>,
    drift: Velocity,
}

/// Sliding-window estimator for one window length.
#[derive(Debug, Clone)]
pub struct CurrentEstimator {
    window_ms: u64,
    min_span_fraction: f64,
    buffer: VecDeque<Entry>,
    /// Sum of drift_i * (t_{i+1} - t_i), in knot-seconds
    weighted: Velocity,
    /// Start of the current uninterrupted accumulation
    since: Option<DateTime<Utc>>,
    /// Latest clock reading seen (sample or eviction tick)
    now: Option<DateTime<Utc>>,
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1_000.0
}

impl CurrentEstimator {
    pub fn new(window: Duration, min_span_fraction: f64) -> Result<Self, CurrentError> {
        let window_ms = window.as_millis() as u64;
        if window_ms == 0 {
            return Err(CurrentError::ZeroWindow);
        }
        if !(min_span_fraction > 0.0 && min_span_fraction <= 1.0) {
            return Err(CurrentError::InvalidFraction(min_span_fraction));
        }
        Ok(Self {
            window_ms,
            min_span_fraction,
            buffer: VecDeque::new(),
            weighted: Velocity::ZERO,
            since: None,
            now: None,
        })
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.window_ms as i64)
    }

    /// Time covered by the buffer, in seconds.
    pub fn span_seconds(&self) -> f64 {
        match (self.buffer.front(), self.buffer.back()) {
            (Some(first), Some(last)) => seconds_between(first.at, last.at),
            _ => 0.0,
        }
    }

    pub fn state(&self) -> EstimatorState {
        match (self.since, self.now) {
            (Some(since), Some(now)) if !self.buffer.is_empty() => {
                if now - since >= self.window() {
                    EstimatorState::Steady
                } else {
                    EstimatorState::Accumulating
                }
            }
            _ => EstimatorState::Empty,
        }
    }

    /// Append a fix, then evict everything older than the window.
    pub fn add_sample(&mut self, sample: CurrentSample) {
        let mut at = sample.at;
        if let Some(last) = self.buffer.back() {
            // Arrival order rules: a clock stepping back is pinned to the tail.
            if at < last.at {
                at = last.at;
            }
            self.weighted += last.drift * seconds_between(last.at, at);
        }
        self.buffer.push_back(Entry {
            at,
            drift: sample.drift(),
        });
        self.since.get_or_insert(at);
        self.evict(at);
    }

    /// Drop samples older than `now - W`.
    pub fn evict(&mut self, now: DateTime<Utc>) {
        self.now = Some(self.now.map_or(now, |n| n.max(now)));
        let cutoff = now - self.window();
        while self.buffer.front().is_some_and(|e| e.at < cutoff) {
            if let Some(old) = self.buffer.pop_front() {
                if let Some(next) = self.buffer.front() {
                    self.weighted -= old.drift * seconds_between(old.at, next.at);
                }
            }
        }
        if self.buffer.len() <= 1 {
            self.weighted = Velocity::ZERO;
        }
        if self.buffer.is_empty() {
            self.since = None;
        }
    }

    /// Current as (drift, set), if the buffer spans enough time.
    pub fn estimate(&self) -> Option<(Speed, Angle360)> {
        if self.buffer.is_empty() {
            return None;
        }
        let span = self.span_seconds();
        let min_span = self.window_ms as f64 / 1_000.0 * self.min_span_fraction;
        if span <= 0.0 || span < min_span {
            return None;
        }
        let mean = self.weighted * (1.0 / span);
        Some((Speed::knots(mean.speed()), Angle360::new(mean.direction())))
    }

    /// Snapshot for publication in the cache.
    pub fn published(&self) -> Option<CurrentEstimate> {
        self.estimate().map(|(speed, direction)| CurrentEstimate {
            window_ms: self.window_ms,
            speed,
            direction,
            state: self.state(),
            samples: self.buffer.len(),
        })
    }

    /// Forget all samples, keep the configuration.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.weighted = Velocity::ZERO;
        self.since = None;
        self.now = None;
    }
}

/// The set of estimators fed from one sample stream.
#[derive(Debug, Clone)]
pub struct CurrentEstimators {
    estimators: Vec<CurrentEstimator>,
}

impl CurrentEstimators {
    /// Build one estimator per window length. Duplicate lengths are rejected.
    pub fn new(windows: &[Duration], min_span_fraction: f64) -> Result<Self, CurrentError> {
        if windows.is_empty() {
            return Err(CurrentError::NoWindows);
        }
        let mut estimators: Vec<CurrentEstimator> = Vec::with_capacity(windows.len());
        for window in windows {
            let estimator = CurrentEstimator::new(*window, min_span_fraction)?;
            if estimators.iter().any(|e| e.window_ms == estimator.window_ms) {
                return Err(CurrentError::DuplicateWindow(estimator.window_ms));
            }
            estimators.push(estimator);
        }
        estimators.sort_by_key(|e| e.window_ms);
        Ok(Self { estimators })
    }

    pub fn windows(&self) -> Vec<u64> {
        self.estimators.iter().map(|e| e.window_ms).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CurrentEstimator> {
        self.estimators.iter()
    }

    pub fn add_sample(&mut self, sample: CurrentSample) {
        for estimator in &mut self.estimators {
            estimator.add_sample(sample);
        }
    }

    pub fn evict(&mut self, now: DateTime<Utc>) {
        for estimator in &mut self.estimators {
            estimator.evict(now);
        }
    }

    pub fn reset(&mut self) {
        for estimator in &mut self.estimators {
            estimator.reset();
        }
    }

    /// Available estimates keyed by window length.
    pub fn estimates(&self) -> BTreeMap<u64, CurrentEstimate> {
        self.estimators
            .iter()
            .filter_map(|e| e.published().map(|p| (e.window_ms, p)))
            .collect()
    }

    pub fn best(&self) -> Option<CurrentEstimate> {
        best_estimate(&self.estimates())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    const TEN_MINUTES: Duration = Duration::from_secs(600);
    const ONE_HOUR: Duration = Duration::from_secs(3_600);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn sample(secs: i64, heading: f64, bsp: f64, cog: f64, sog: f64) -> CurrentSample {
        CurrentSample {
            at: t0() + chrono::Duration::seconds(secs),
            heading,
            bsp,
            cog,
            sog,
        }
    }

    /// One fix per 10 s from `from` to `to` (inclusive).
    fn feed(
        estimators: &mut CurrentEstimators,
        from: i64,
        to: i64,
        values: (f64, f64, f64, f64),
    ) {
        let (heading, bsp, cog, sog) = values;
        let mut t = from;
        while t <= to {
            estimators.add_sample(sample(t, heading, bsp, cog, sog));
            t += 10;
        }
    }

    #[test]
    fn test_state_machine() {
        let mut e = CurrentEstimator::new(TEN_MINUTES, 0.5).unwrap();
        assert_eq!(e.state(), EstimatorState::Empty);
        e.add_sample(sample(0, 0.0, 5.0, 0.0, 5.0));
        assert_eq!(e.state(), EstimatorState::Accumulating);
        e.add_sample(sample(599, 0.0, 5.0, 0.0, 5.0));
        assert_eq!(e.state(), EstimatorState::Accumulating);
        e.add_sample(sample(600, 0.0, 5.0, 0.0, 5.0));
        assert_eq!(e.state(), EstimatorState::Steady);
    }

    #[test]
    fn test_unavailable_below_min_span() {
        let mut e = CurrentEstimator::new(TEN_MINUTES, 0.5).unwrap();
        assert!(e.estimate().is_none());
        e.add_sample(sample(0, 0.0, 5.0, 90.0, 1.0));
        e.add_sample(sample(200, 0.0, 5.0, 90.0, 1.0));
        assert!(e.estimate().is_none());
        e.add_sample(sample(300, 0.0, 5.0, 90.0, 1.0));
        assert!(e.estimate().is_some());
    }

    #[test]
    fn test_no_drift_converges_to_zero() {
        let mut estimators = CurrentEstimators::new(&[TEN_MINUTES], 0.5).unwrap();
        feed(&mut estimators, 0, 900, (45.0, 6.0, 45.0, 6.0));
        let best = estimators.best().unwrap();
        assert!(best.speed.value() < 1e-9);
    }

    #[test]
    fn test_constant_offset_converges() {
        // Heading North at 5 kt through water, pushed East by 1 kt.
        let ground = Velocity::polar(5.0, 0.0) + Velocity::polar(1.0, 90.0);
        let values = (0.0, 5.0, ground.direction(), ground.speed());
        let mut estimators = CurrentEstimators::new(&[TEN_MINUTES], 0.5).unwrap();
        feed(&mut estimators, 0, 1_200, values);
        let best = estimators.best().unwrap();
        assert!((best.speed.value() - 1.0).abs() < 1e-6);
        assert!((best.direction.value() - 90.0).abs() < 1e-6);
    }

    #[test]
    fn test_old_samples_are_evicted() {
        let mut e = CurrentEstimator::new(TEN_MINUTES, 0.5).unwrap();
        // 10 minutes of westward drift, then 10 minutes of eastward drift.
        for t in (0..=600).step_by(10) {
            e.add_sample(sample(t, 0.0, 0.0, 270.0, 1.0));
        }
        for t in (610..=1_300).step_by(10) {
            e.add_sample(sample(t, 0.0, 0.0, 90.0, 1.0));
        }
        let (speed, direction) = e.estimate().unwrap();
        assert!((speed.value() - 1.0).abs() < 1e-6);
        assert!((direction.value() - 90.0).abs() < 1e-6);
        assert!(e.span_seconds() <= 600.0);
    }

    #[test]
    fn test_evict_tick_empties_stale_buffer() {
        let mut e = CurrentEstimator::new(TEN_MINUTES, 0.5).unwrap();
        e.add_sample(sample(0, 0.0, 5.0, 0.0, 5.0));
        e.evict(t0() + chrono::Duration::seconds(601));
        assert!(e.is_empty());
        assert_eq!(e.state(), EstimatorState::Empty);
    }

    #[test]
    fn test_clock_step_back_keeps_arrival_order() {
        let mut e = CurrentEstimator::new(TEN_MINUTES, 0.5).unwrap();
        e.add_sample(sample(100, 0.0, 5.0, 0.0, 5.0));
        e.add_sample(sample(50, 0.0, 5.0, 0.0, 5.0));
        assert_eq!(e.len(), 2);
        assert_eq!(e.span_seconds(), 0.0);
    }

    #[test]
    fn test_duplicate_windows_rejected() {
        let result = CurrentEstimators::new(&[TEN_MINUTES, ONE_HOUR, TEN_MINUTES], 0.5);
        assert_eq!(result.unwrap_err(), CurrentError::DuplicateWindow(600_000));
    }

    #[test]
    fn test_invalid_configuration() {
        assert_eq!(
            CurrentEstimator::new(Duration::ZERO, 0.5).unwrap_err(),
            CurrentError::ZeroWindow
        );
        assert_eq!(
            CurrentEstimator::new(TEN_MINUTES, 0.0).unwrap_err(),
            CurrentError::InvalidFraction(0.0)
        );
        assert_eq!(
            CurrentEstimators::new(&[], 0.5).unwrap_err(),
            CurrentError::NoWindows
        );
    }

    #[test]
    fn test_largest_steady_window_wins() {
        let mut estimators = CurrentEstimators::new(&[ONE_HOUR, TEN_MINUTES], 0.5).unwrap();
        assert_eq!(estimators.windows(), vec![600_000, 3_600_000]);

        // 20 minutes: only the 10-minute window is steady.
        feed(&mut estimators, 0, 1_200, (0.0, 5.0, 0.0, 6.0));
        assert_eq!(estimators.best().unwrap().window_ms, 600_000);

        // 70 minutes: both steady, the hour wins.
        feed(&mut estimators, 1_210, 4_200, (0.0, 5.0, 0.0, 6.0));
        let estimates = estimators.estimates();
        assert_eq!(estimates.len(), 2);
        assert!(estimates.values().all(|e| e.state == EstimatorState::Steady));
        assert_eq!(estimators.best().unwrap().window_ms, 3_600_000);
    }

    #[test]
    fn test_reset_keeps_configuration() {
        let mut estimators = CurrentEstimators::new(&[TEN_MINUTES], 0.5).unwrap();
        feed(&mut estimators, 0, 900, (0.0, 5.0, 0.0, 6.0));
        estimators.reset();
        assert!(estimators.estimates().is_empty());
        assert_eq!(estimators.windows(), vec![600_000]);
    }
}
