//! Recompute pass: values derivable purely from cached fields.
//!
//! [`derive`] is a pure function of the cache snapshot. The store applies its
//! output in the same critical section as the update that triggered it.
//!
//! True wind is only ever derived from apparent wind. A true-wind MWV received
//! from an instrument is not used as an input.

use crate::model::{Angle180, Angle360, CacheEntry, CacheKey, Speed};
use crate::store::CacheState;
use crate::vector::Velocity;

/// True wind relative to the boat and to North.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrueWind {
    /// True wind angle, (-180, 180], negative to port.
    pub angle: f64,
    /// True wind speed, knots.
    pub speed: f64,
    /// True wind direction (where it blows from), [0, 360).
    pub direction: f64,
}

/// Solve the wind triangle.
///
/// The apparent wind, measured on a boat pointing at `heading`, is the
/// vector sum of the true wind and the wind created by the boat's own motion
/// (`boat_speed` along `boat_course`). Vectors point to where the wind
/// comes from.
pub fn true_wind(
    aws: f64,
    awa: f64,
    heading: f64,
    boat_speed: f64,
    boat_course: f64,
) -> TrueWind {
    let apparent = Velocity::polar(aws, heading + awa);
    let boat = Velocity::polar(boat_speed, boat_course);
    let tw = apparent - boat;
    let direction = tw.direction();
    TrueWind {
        angle: Angle180::new(direction - heading).value(),
        speed: tw.speed(),
        direction,
    }
}

/// Leeway for a given apparent wind angle.
///
/// Maximal close-hauled, fading to zero on a beam reach, none downwind. The
/// boat slips away from the wind: negative with wind on starboard.
pub fn leeway(awa: f64, max_leeway: f64) -> f64 {
    let awa = Angle180::new(awa).value();
    if awa.abs() >= 90.0 || max_leeway == 0.0 {
        return 0.0;
    }
    let magnitude = max_leeway * awa.to_radians().cos();
    if awa >= 0.0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Derive every value expressible from the current snapshot.
///
/// Missing inputs simply produce no output for the values depending on them.
pub fn derive(state: &CacheState) -> Vec<CacheEntry> {
    let settings = state.settings();
    let mut out: Vec<CacheEntry> = Vec::new();

    let declination = state.declination();
    let deviation = state
        .angle(CacheKey::Deviation)
        .unwrap_or(settings.deviation);

    // Heading: compass corrected by deviation and declination wins over HDT.
    let heading = match state.angle(CacheKey::HdgCompass) {
        Some(compass) => {
            let magnetic = Angle360::new(compass + deviation + settings.hdg_offset);
            let true_heading = Angle360::new(magnetic.value() + declination);
            out.push((CacheKey::HdgMag, magnetic.into()));
            out.push((CacheKey::HdgTrue, true_heading.into()));
            Some(true_heading.value())
        }
        None => state.angle(CacheKey::HdgTrue),
    };

    let awa = state
        .angle(CacheKey::Awa)
        .map(|a| Angle180::new(a + settings.awa_offset).value());
    let aws = state
        .speed(CacheKey::Aws)
        .map(|s| s * settings.aws_factor);

    let leeway_angle = awa.map(|a| leeway(a, settings.max_leeway)).unwrap_or(0.0);
    if awa.is_some() {
        out.push((CacheKey::Leeway, Angle180::new(leeway_angle).into()));
    }
    let cmg = heading.map(|h| Angle360::new(h + leeway_angle).value());
    if let Some(cmg) = cmg {
        out.push((CacheKey::Cmg, Angle360::new(cmg).into()));
    }

    let cog = state.angle(CacheKey::Cog);
    let sog = state.speed(CacheKey::Sog);
    let bsp = state.speed(CacheKey::Bsp).map(|b| b * settings.bsp_factor);

    // Ground track when the GPS provides it, water track otherwise.
    let boat = match (sog, cog, bsp, cmg) {
        (Some(sog), Some(cog), _, _) => Some((sog, cog)),
        (_, _, Some(bsp), Some(cmg)) => Some((bsp, cmg)),
        _ => None,
    };
    let wind_heading = heading.or(cog);

    if let (Some(aws), Some(awa), Some(hdg), Some((speed, course))) = (aws, awa, wind_heading, boat)
    {
        let tw = true_wind(aws, awa, hdg, speed, course);
        out.push((CacheKey::Twa, Angle180::new(tw.angle).into()));
        out.push((CacheKey::Tws, Speed::knots(tw.speed).into()));
        out.push((CacheKey::Twd, Angle360::new(tw.direction).into()));
    }

    out
}
