//! NMEA 0183 sentence codec.
//!
//! A sentence is `$TTSSS,f1,f2,...*HH` where `TT` is the talker id, `SSS` the
//! sentence id and `HH` the XOR of every byte between the leading `$` (or `!`)
//! and the `*`. This module validates, classifies, decodes and encodes
//! sentences.

use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveTime};
use nmea_core::{normalize_360, GeoPos, KNOTS_TO_KMH, KNOTS_TO_MS};
use regex::Regex;
use thiserror::Error;

use crate::sentences::{
    Gll, Hdg, Rmc, Sentence, SentenceHeader, Synthesized, TalkerId, Vhw, Vlw, Vtg, Wind,
    WindReference,
};

/// Errors that can occur during sentence validation and decoding.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    /// Sentence does not start with `$` or `!`.
    #[error("Sentence must start with '$' or '!'")]
    MissingStart,

    /// No `*HH` checksum suffix.
    #[error("Missing checksum")]
    MissingChecksum,

    /// Checksum does not match the sentence content.
    #[error("Checksum mismatch: expected {expected:02X}, found {found}")]
    ChecksumMismatch { expected: u8, found: String },

    /// Talker or sentence id could not be extracted.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// A mandatory field is empty or absent.
    #[error("{sentence}: missing field {index}")]
    MissingField { sentence: String, index: usize },

    /// A field could not be parsed.
    #[error("{sentence}: invalid field {index} '{value}'")]
    InvalidField {
        sentence: String,
        index: usize,
        value: String,
    },

    /// Sentence is well-formed but its content is not usable (e.g. void status).
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Talker id for generated sentences must be exactly 2 characters.
    #[error("Invalid talker id '{0}': expected 2 alphanumeric characters")]
    InvalidTalker(String),
}

/// XOR of every byte of `body` (the part between `$` and `*`).
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Split a raw sentence into its body, checking start marker and checksum.
fn checked_body(raw: &str) -> Result<&str, CodecError> {
    let line = raw.trim_end_matches(['\r', '\n']);
    let rest = line
        .strip_prefix('$')
        .or_else(|| line.strip_prefix('!'))
        .ok_or(CodecError::MissingStart)?;
    let (body, sum) = rest.rsplit_once('*').ok_or(CodecError::MissingChecksum)?;
    let expected = checksum(body);
    match u8::from_str_radix(sum.trim(), 16) {
        Ok(found) if sum.trim().len() == 2 && found == expected => Ok(body),
        _ => Err(CodecError::ChecksumMismatch {
            expected,
            found: sum.to_string(),
        }),
    }
}

/// Whether the sentence carries a correct checksum.
///
/// Trailing CR/LF is ignored. Hex digits are accepted in either case.
pub fn validate(raw: &str) -> bool {
    checked_body(raw).is_ok()
}

fn header_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[$!](?:(P)([A-Z0-9]{3})|([A-Z0-9]{2})([A-Z]{3}))").ok())
        .as_ref()
}

/// Extract talker and sentence ids.
///
/// Proprietary sentences (`$P...`) classify as talker `P` with the next 3
/// characters as sentence id.
pub fn classify(raw: &str) -> Result<SentenceHeader, CodecError> {
    let line = raw.trim_end_matches(['\r', '\n']);
    if !line.starts_with(['$', '!']) {
        return Err(CodecError::MissingStart);
    }
    let caps = header_regex()
        .and_then(|re| re.captures(line))
        .ok_or_else(|| CodecError::InvalidHeader(line.chars().take(8).collect()))?;
    let (talker, id) = match (caps.get(1), caps.get(2)) {
        (Some(p), Some(id)) => (p.as_str(), id.as_str()),
        _ => match (caps.get(3), caps.get(4)) {
            (Some(t), Some(id)) => (t.as_str(), id.as_str()),
            _ => return Err(CodecError::InvalidHeader(line.to_string())),
        },
    };
    Ok(SentenceHeader {
        talker: talker.to_string(),
        id: id.to_string(),
    })
}

// ============================================================================
// Decoding
// ============================================================================

/// Field accessor for one sentence, carrying its id for error messages.
struct Fields<'a> {
    id: &'a str,
    values: Vec<&'a str>,
}

impl<'a> Fields<'a> {
    /// Raw text of field `index` (1-based, index 0 is the address).
    fn raw(&self, index: usize) -> Option<&'a str> {
        self.values
            .get(index)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, index: usize) -> Result<&'a str, CodecError> {
        self.raw(index).ok_or_else(|| CodecError::MissingField {
            sentence: self.id.to_string(),
            index,
        })
    }

    fn invalid(&self, index: usize, value: &str) -> CodecError {
        CodecError::InvalidField {
            sentence: self.id.to_string(),
            index,
            value: value.to_string(),
        }
    }

    fn number(&self, index: usize) -> Result<Option<f64>, CodecError> {
        match self.raw(index) {
            None => Ok(None),
            Some(v) => parse_finite(v).map(Some).ok_or_else(|| self.invalid(index, v)),
        }
    }

    fn required_number(&self, index: usize) -> Result<f64, CodecError> {
        let v = self.required(index)?;
        parse_finite(v).ok_or_else(|| self.invalid(index, v))
    }

    fn flag(&self, index: usize) -> Option<char> {
        self.raw(index).and_then(|v| v.chars().next())
    }

    fn angle(&self, index: usize) -> Result<Option<f64>, CodecError> {
        Ok(self.number(index)?.map(normalize_360))
    }

    /// Signed value from a magnitude and an E/W indicator.
    fn east_west(&self, index: usize) -> Result<Option<f64>, CodecError> {
        Ok(self.number(index)?.map(|v| match self.flag(index + 1) {
            Some('W') => -v.abs(),
            _ => v.abs(),
        }))
    }

    fn time(&self, index: usize) -> Result<Option<NaiveTime>, CodecError> {
        match self.raw(index) {
            None => Ok(None),
            Some(v) => parse_time(v).map(Some).ok_or_else(|| self.invalid(index, v)),
        }
    }

    fn date(&self, index: usize) -> Result<Option<NaiveDate>, CodecError> {
        match self.raw(index) {
            None => Ok(None),
            Some(v) => parse_date(v).map(Some).ok_or_else(|| self.invalid(index, v)),
        }
    }

    /// Position from `lat, N/S, lng, E/W` starting at `index`.
    fn position(&self, index: usize) -> Result<Option<GeoPos>, CodecError> {
        let (Some(lat), Some(lng)) = (self.raw(index), self.raw(index + 2)) else {
            return Ok(None);
        };
        let lat = parse_degrees_minutes(lat)
            .filter(|v| *v <= 90.0)
            .ok_or_else(|| self.invalid(index, lat))?;
        let lng = parse_degrees_minutes(lng)
            .filter(|v| *v <= 180.0)
            .ok_or_else(|| self.invalid(index + 2, lng))?;
        let lat = if self.flag(index + 1) == Some('S') { -lat } else { lat };
        let lng = if self.flag(index + 3) == Some('W') { -lng } else { lng };
        Ok(Some(GeoPos::new(lat, lng)))
    }
}

/// A number, rejecting `NaN` and infinities.
fn parse_finite(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `ddmm.mmmm` (or `dddmm.mmmm`) to decimal degrees.
fn parse_degrees_minutes(value: &str) -> Option<f64> {
    let raw = parse_finite(value)?;
    if raw < 0.0 {
        return None;
    }
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    if minutes >= 60.0 {
        return None;
    }
    Some(degrees + minutes / 60.0)
}

/// `hhmmss` with optional fractional seconds.
fn parse_time(value: &str) -> Option<NaiveTime> {
    if value.len() < 6 || !value.is_ascii() {
        return None;
    }
    let h: u32 = value[0..2].parse().ok()?;
    let m: u32 = value[2..4].parse().ok()?;
    let s = parse_finite(&value[4..])?;
    if s < 0.0 {
        return None;
    }
    let millis = ((s.fract()) * 1_000.0).round() as u32;
    NaiveTime::from_hms_milli_opt(h, m, s.trunc() as u32, millis.min(999))
}

/// `ddmmyy`; two-digit years below 70 are in the 2000s.
fn parse_date(value: &str) -> Option<NaiveDate> {
    if value.len() != 6 || !value.is_ascii() {
        return None;
    }
    let d: u32 = value[0..2].parse().ok()?;
    let m: u32 = value[2..4].parse().ok()?;
    let y: i32 = value[4..6].parse().ok()?;
    let year = if y < 70 { 2000 + y } else { 1900 + y };
    NaiveDate::from_ymd_opt(year, m, d)
}

/// Validate and decode a sentence.
///
/// Sentence ids without a typed form decode to [`Sentence::Unsupported`].
pub fn decode(raw: &str) -> Result<Sentence, CodecError> {
    let body = checked_body(raw)?;
    let header = classify(raw)?;
    if header.talker == "P" {
        return Ok(Sentence::Unsupported(header.id));
    }

    let fields = Fields {
        id: &header.id,
        values: body.split(',').collect(),
    };

    let sentence = match header.id.as_str() {
        "RMC" => Sentence::Rmc(Rmc {
            time: fields.time(1)?,
            valid: fields.flag(2) == Some('A'),
            position: fields.position(3)?,
            sog: fields.number(7)?,
            cog: fields.angle(8)?,
            date: fields.date(9)?,
            declination: fields.east_west(10)?,
        }),
        "VTG" => Sentence::Vtg(Vtg {
            cog_true: fields.angle(1)?,
            cog_magnetic: fields.angle(3)?,
            sog: fields.number(5)?,
        }),
        "VHW" => Sentence::Vhw(Vhw {
            heading_true: fields.angle(1)?,
            heading_magnetic: fields.angle(3)?,
            bsp: fields.number(5)?,
        }),
        "HDG" => Sentence::Hdg(Hdg {
            heading: normalize_360(fields.required_number(1)?),
            deviation: fields.east_west(2)?,
            variation: fields.east_west(4)?,
        }),
        "HDM" => Sentence::Hdm(normalize_360(fields.required_number(1)?)),
        "HDT" => Sentence::Hdt(normalize_360(fields.required_number(1)?)),
        "MWV" => Sentence::Mwv(decode_mwv(&fields)?),
        "VWR" => Sentence::Vwr(decode_vwr(&fields)?),
        "GLL" => {
            let position = fields.position(1)?.ok_or_else(|| CodecError::MissingField {
                sentence: header.id.clone(),
                index: 1,
            })?;
            Sentence::Gll(Gll {
                position,
                time: fields.time(5)?,
                valid: fields.flag(6).map_or(true, |s| s == 'A'),
            })
        }
        "XTE" => {
            let magnitude = fields.required_number(3)?;
            match fields.flag(4) {
                Some('L') => Sentence::Xte(magnitude.abs()),
                Some('R') => Sentence::Xte(-magnitude.abs()),
                _ => return Err(fields.invalid(4, fields.raw(4).unwrap_or(""))),
            }
        }
        "MTW" => Sentence::Mtw(fields.required_number(1)?),
        "MTA" => Sentence::Mta(fields.required_number(1)?),
        "MMB" => Sentence::Mmb(decode_mmb(&fields)?),
        "VLW" => Sentence::Vlw(Vlw {
            total: fields.number(1)?,
            trip: fields.number(3)?,
        }),
        _ => Sentence::Unsupported(header.id.clone()),
    };
    Ok(sentence)
}

fn decode_mwv(fields: &Fields<'_>) -> Result<Wind, CodecError> {
    if fields.flag(5) == Some('V') {
        return Err(CodecError::InvalidData("MWV status void".to_string()));
    }
    let angle = normalize_360(fields.required_number(1)?);
    let reference = match fields.flag(2) {
        Some('R') => WindReference::Relative,
        Some('T') => WindReference::True,
        _ => return Err(fields.invalid(2, fields.raw(2).unwrap_or(""))),
    };
    let raw_speed = fields.required_number(3)?;
    let speed = match fields.flag(4) {
        Some('N') | None => raw_speed,
        Some('K') => raw_speed / KNOTS_TO_KMH,
        Some('M') => raw_speed / KNOTS_TO_MS,
        Some(_) => return Err(fields.invalid(4, fields.raw(4).unwrap_or(""))),
    };
    Ok(Wind {
        angle,
        speed,
        reference,
    })
}

fn decode_vwr(fields: &Fields<'_>) -> Result<Wind, CodecError> {
    let magnitude = fields.required_number(1)?.abs();
    let angle = match fields.flag(2) {
        Some('L') => normalize_360(360.0 - magnitude),
        Some('R') => normalize_360(magnitude),
        _ => return Err(fields.invalid(2, fields.raw(2).unwrap_or(""))),
    };
    // Knots first, then m/s, then km/h.
    let speed = if let Some(kn) = fields.number(3)? {
        kn
    } else if let Some(ms) = fields.number(5)? {
        ms / KNOTS_TO_MS
    } else if let Some(kmh) = fields.number(7)? {
        kmh / KNOTS_TO_KMH
    } else {
        return Err(CodecError::MissingField {
            sentence: fields.id.to_string(),
            index: 3,
        });
    };
    Ok(Wind {
        angle,
        speed,
        reference: WindReference::Relative,
    })
}

/// Pressure in hPa, from the bar field or else inches of mercury.
fn decode_mmb(fields: &Fields<'_>) -> Result<f64, CodecError> {
    if let Some(bar) = fields.number(3)? {
        return Ok(bar * 1_000.0);
    }
    let inches = fields.required_number(1)?;
    Ok(inches * 33.863_886_666_667)
}

// ============================================================================
// Encoding
// ============================================================================

/// Wrap a body (without `$` and `*`) into a full sentence with checksum.
fn seal(body: &str) -> String {
    format!("${}*{:02X}", body, checksum(body))
}

/// Build a synthesized sentence under the given talker id.
pub fn encode(talker: TalkerId, sentence: &Synthesized) -> String {
    let id = sentence.sentence_id();
    let fields = match *sentence {
        Synthesized::TrueWindRelative { tws, twa } => {
            let side = if twa < 0.0 { 'L' } else { 'R' };
            format!(
                "{:.1},{},{:.1},N,{:.1},M,{:.1},K",
                twa.abs(),
                side,
                tws,
                tws * KNOTS_TO_MS,
                tws * KNOTS_TO_KMH
            )
        }
        Synthesized::TrueWindAngle { tws, twa } => {
            format!("{:.1},T,{:.1},N,A", normalize_360(twa.round()), tws)
        }
        Synthesized::TrueWindDirection {
            twd,
            tws,
            declination,
        } => format!(
            "{:.1},T,{:.1},M,{:.1},N,{:.1},M",
            normalize_360(twd),
            normalize_360(twd - declination),
            tws,
            tws * KNOTS_TO_MS
        ),
        Synthesized::Current {
            set,
            drift,
            declination,
        } => format!(
            "{:.1},T,{:.1},M,{:.1},N",
            normalize_360(set),
            normalize_360(set - declination),
            drift
        ),
    };
    seal(&format!("{}{},{}", talker, id, fields))
}

/// Terminate a sentence for the wire.
pub fn frame(sentence: &str) -> String {
    format!("{}\r\n", sentence.trim_end())
}
