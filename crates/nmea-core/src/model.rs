//! Navigation data model types.
//!
//! These types represent the values held in the navigation cache:
//! - Bounded angles (0..360, -180..180, East/West signed)
//! - Speeds, distances, temperatures, pressures
//! - Geographic positions
//! - The semantic keys under which they are cached

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::current::CurrentEstimate;

/// Knots to meters per second.
pub const KNOTS_TO_MS: f64 = 1_852.0 / 3_600.0;
/// Knots to kilometers per hour.
pub const KNOTS_TO_KMH: f64 = 1.852;

/// Normalize an angle in degrees to [0, 360).
pub fn normalize_360(degrees: f64) -> f64 {
    let d = degrees.rem_euclid(360.0);
    // rem_euclid can return 360.0 for tiny negative inputs
    if d >= 360.0 {
        0.0
    } else {
        d
    }
}

/// Normalize an angle in degrees to (-180, 180].
pub fn normalize_180(degrees: f64) -> f64 {
    let d = normalize_360(degrees);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}

/// An angle in [0, 360), e.g. a course or a heading.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Angle360(f64);

impl Angle360 {
    pub fn new(degrees: f64) -> Self {
        Self(normalize_360(degrees))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// A relative angle in (-180, 180], negative to port.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Angle180(f64);

impl Angle180 {
    pub fn new(degrees: f64) -> Self {
        Self(normalize_180(degrees))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Re-express in the 0..360 convention.
    pub fn to_360(&self) -> Angle360 {
        Angle360::new(self.0)
    }
}

/// A signed angle where East is positive and West negative (declination,
/// deviation).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Angle180EW(f64);

impl Angle180EW {
    pub fn new(degrees: f64) -> Self {
        Self(normalize_180(degrees))
    }

    /// Build from an unsigned magnitude and an `E`/`W` indicator.
    pub fn from_hemisphere(magnitude: f64, hemisphere: char) -> Self {
        match hemisphere {
            'W' | 'w' => Self::new(-magnitude.abs()),
            _ => Self::new(magnitude.abs()),
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Angle180EW {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.0 < 0.0 { 'W' } else { 'E' };
        write!(f, "{} {:.1}", side, self.0.abs())
    }
}

/// Speed in knots.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Speed(f64);

impl Speed {
    pub fn knots(knots: f64) -> Self {
        Self(knots)
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn meters_per_second(&self) -> f64 {
        self.0 * KNOTS_TO_MS
    }

    pub fn kmh(&self) -> f64 {
        self.0 * KNOTS_TO_KMH
    }
}

/// Distance in nautical miles.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Distance(f64);

impl Distance {
    pub fn miles(nm: f64) -> Self {
        Self(nm)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Temperature in degrees Celsius.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Temperature(f64);

impl Temperature {
    pub fn celsius(c: f64) -> Self {
        Self(c)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Pressure in hectopascals.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Pressure(f64);

impl Pressure {
    pub fn hpa(hpa: f64) -> Self {
        Self(hpa)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Position in WGS84 decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPos {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPos {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Semantic keys of the navigation cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheKey {
    /// Course over ground
    Cog,
    /// Speed over ground
    Sog,
    /// Boat speed through water
    Bsp,
    /// Apparent wind angle
    Awa,
    /// Apparent wind speed
    Aws,
    /// True wind angle
    Twa,
    /// True wind speed
    Tws,
    /// True wind direction
    Twd,
    HdgCompass,
    HdgMag,
    HdgTrue,
    Declination,
    Deviation,
    Leeway,
    /// Course made good through water (heading + leeway)
    Cmg,
    Position,
    GpsDateTime,
    GpsTime,
    GpsSolarTime,
    CalculatedCurrent,
    /// Cross-track error
    Xte,
    WaterTemp,
    AirTemp,
    BaroPress,
    Log,
    DailyLog,
}

/// A typed value stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum CacheValue {
    Angle360(Angle360),
    Angle180(Angle180),
    AngleEW(Angle180EW),
    Speed(Speed),
    Distance(Distance),
    Temperature(Temperature),
    Pressure(Pressure),
    Position(GeoPos),
    DateTime(DateTime<Utc>),
    Time(NaiveTime),
    /// Current estimates keyed by window length in milliseconds
    Current(BTreeMap<u64, CurrentEstimate>),
}

impl CacheValue {
    /// Angle value in degrees, whatever the angle convention.
    pub fn as_angle(&self) -> Option<f64> {
        match self {
            CacheValue::Angle360(a) => Some(a.value()),
            CacheValue::Angle180(a) => Some(a.value()),
            CacheValue::AngleEW(a) => Some(a.value()),
            _ => None,
        }
    }

    pub fn as_speed(&self) -> Option<f64> {
        match self {
            CacheValue::Speed(s) => Some(s.value()),
            _ => None,
        }
    }

    pub fn as_position(&self) -> Option<GeoPos> {
        match self {
            CacheValue::Position(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_current(&self) -> Option<&BTreeMap<u64, CurrentEstimate>> {
        match self {
            CacheValue::Current(map) => Some(map),
            _ => None,
        }
    }
}

impl From<Angle360> for CacheValue {
    fn from(a: Angle360) -> Self {
        CacheValue::Angle360(a)
    }
}

impl From<Angle180> for CacheValue {
    fn from(a: Angle180) -> Self {
        CacheValue::Angle180(a)
    }
}

impl From<Angle180EW> for CacheValue {
    fn from(a: Angle180EW) -> Self {
        CacheValue::AngleEW(a)
    }
}

impl From<Speed> for CacheValue {
    fn from(s: Speed) -> Self {
        CacheValue::Speed(s)
    }
}

impl From<Distance> for CacheValue {
    fn from(d: Distance) -> Self {
        CacheValue::Distance(d)
    }
}

impl From<Temperature> for CacheValue {
    fn from(t: Temperature) -> Self {
        CacheValue::Temperature(t)
    }
}

impl From<Pressure> for CacheValue {
    fn from(p: Pressure) -> Self {
        CacheValue::Pressure(p)
    }
}

impl From<GeoPos> for CacheValue {
    fn from(p: GeoPos) -> Self {
        CacheValue::Position(p)
    }
}

impl From<DateTime<Utc>> for CacheValue {
    fn from(d: DateTime<Utc>) -> Self {
        CacheValue::DateTime(d)
    }
}

impl From<NaiveTime> for CacheValue {
    fn from(t: NaiveTime) -> Self {
        CacheValue::Time(t)
    }
}

/// One key/value pair for a bulk cache update.
pub type CacheEntry = (CacheKey, CacheValue);
