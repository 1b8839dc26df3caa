//! NMEA 0183 sentence types.
//!
//! This module defines the typed form of the sentences the multiplexer
//! understands:
//! - Inbound: RMC, VTG, VHW, HDG, HDM, HDT, MWV, VWR, GLL, XTE, MTW, MTA, MMB, VLW
//! - Outbound (synthesized): VWT, MWV, MWD, VDR
//!
//! Everything else passes through as [`Sentence::Unsupported`].

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use nmea_core::GeoPos;
use serde::{Deserialize, Serialize};

use crate::codec::CodecError;

/// Two-character talker identifier (e.g. "GP", "II", or a synthesis prefix).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TalkerId([u8; 2]);

impl TalkerId {
    pub fn as_str(&self) -> &str {
        // Both bytes are checked ASCII on construction.
        std::str::from_utf8(&self.0).unwrap_or("??")
    }
}

impl TryFrom<&str> for TalkerId {
    type Error = CodecError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let bytes = value.as_bytes();
        if bytes.len() != 2 || !bytes.iter().all(|b| b.is_ascii_alphanumeric()) {
            return Err(CodecError::InvalidTalker(value.to_string()));
        }
        Ok(Self([bytes[0], bytes[1]]))
    }
}

impl TryFrom<String> for TalkerId {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TalkerId::try_from(value.as_str())
    }
}

impl From<TalkerId> for String {
    fn from(id: TalkerId) -> Self {
        id.as_str().to_string()
    }
}

impl fmt::Display for TalkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Talker and sentence identifiers extracted from a sentence header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceHeader {
    /// Talker id, 2 characters ("P" for proprietary sentences)
    pub talker: String,
    /// Sentence id, 3 characters
    pub id: String,
}

/// Reference of a wind measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindReference {
    /// Apparent wind, relative to the bow
    Relative,
    /// True wind
    True,
}

/// Recommended minimum navigation data.
#[derive(Debug, Clone, PartialEq)]
pub struct Rmc {
    pub valid: bool,
    pub time: Option<NaiveTime>,
    pub date: Option<NaiveDate>,
    pub position: Option<GeoPos>,
    /// Knots
    pub sog: Option<f64>,
    /// Degrees true
    pub cog: Option<f64>,
    /// Magnetic variation, East positive
    pub declination: Option<f64>,
}

impl Rmc {
    /// Date and time combined, UTC.
    pub fn date_time(&self) -> Option<DateTime<Utc>> {
        match (self.date, self.time) {
            (Some(date), Some(time)) => Some(date.and_time(time).and_utc()),
            _ => None,
        }
    }
}

/// Track made good and ground speed.
#[derive(Debug, Clone, PartialEq)]
pub struct Vtg {
    pub cog_true: Option<f64>,
    pub cog_magnetic: Option<f64>,
    /// Knots
    pub sog: Option<f64>,
}

/// Water speed and heading.
#[derive(Debug, Clone, PartialEq)]
pub struct Vhw {
    pub heading_true: Option<f64>,
    pub heading_magnetic: Option<f64>,
    /// Knots
    pub bsp: Option<f64>,
}

/// Heading, deviation and variation.
#[derive(Debug, Clone, PartialEq)]
pub struct Hdg {
    pub heading: f64,
    /// East positive
    pub deviation: Option<f64>,
    /// East positive
    pub variation: Option<f64>,
}

/// Wind speed and angle (MWV, VWR).
#[derive(Debug, Clone, PartialEq)]
pub struct Wind {
    /// Degrees, 0..360 clockwise from the bow (or from North when true)
    pub angle: f64,
    /// Knots
    pub speed: f64,
    pub reference: WindReference,
}

/// Geographic position.
#[derive(Debug, Clone, PartialEq)]
pub struct Gll {
    pub position: GeoPos,
    pub time: Option<NaiveTime>,
    pub valid: bool,
}

/// Distance traveled through water.
#[derive(Debug, Clone, PartialEq)]
pub struct Vlw {
    /// Nautical miles
    pub total: Option<f64>,
    /// Nautical miles
    pub trip: Option<f64>,
}

/// A decoded sentence.
#[derive(Debug, Clone, PartialEq)]
pub enum Sentence {
    Rmc(Rmc),
    Vtg(Vtg),
    Vhw(Vhw),
    Hdg(Hdg),
    /// Magnetic heading
    Hdm(f64),
    /// True heading
    Hdt(f64),
    Mwv(Wind),
    Vwr(Wind),
    Gll(Gll),
    /// Cross-track error, nm, positive when steering left
    Xte(f64),
    /// Water temperature, Celsius
    Mtw(f64),
    /// Air temperature, Celsius
    Mta(f64),
    /// Barometric pressure, hPa
    Mmb(f64),
    Vlw(Vlw),
    /// Not decoded, passes through
    Unsupported(String),
}

impl Sentence {
    /// Whether the sentence was decoded into typed fields.
    pub fn is_decoded(&self) -> bool {
        !matches!(self, Sentence::Unsupported(_))
    }
}

/// Sentences produced by the multiplexer itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Synthesized {
    /// VWT: true wind speed and angle relative to the bow
    TrueWindRelative { tws: f64, twa: f64 },
    /// MWV with reference T
    TrueWindAngle { tws: f64, twa: f64 },
    /// MWD: true wind direction (true and magnetic) and speed
    TrueWindDirection { twd: f64, tws: f64, declination: f64 },
    /// VDR: current set and drift
    Current { set: f64, drift: f64, declination: f64 },
}

impl Synthesized {
    /// Sentence id for this kind.
    pub fn sentence_id(&self) -> &'static str {
        match self {
            Synthesized::TrueWindRelative { .. } => "VWT",
            Synthesized::TrueWindAngle { .. } => "MWV",
            Synthesized::TrueWindDirection { .. } => "MWD",
            Synthesized::Current { .. } => "VDR",
        }
    }
}
