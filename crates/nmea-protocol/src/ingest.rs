//! Mapping from decoded sentences to cache entries.

use chrono::{DateTime, Duration, Utc};
use nmea_core::{
    Angle180, Angle180EW, Angle360, CacheEntry, CacheKey, Distance, GeoPos, Pressure, Speed,
    Temperature,
};

use crate::sentences::{Sentence, WindReference};

/// Local mean solar time: UTC shifted by 4 minutes per degree of longitude.
///
/// `None` when the shifted time is not representable.
pub fn solar_time(utc: DateTime<Utc>, position: GeoPos) -> Option<DateTime<Utc>> {
    if !position.lng.is_finite() {
        return None;
    }
    let offset_ms = (position.lng * 4.0 * 60.0 * 1_000.0).round() as i64;
    Duration::try_milliseconds(offset_ms).and_then(|offset| utc.checked_add_signed(offset))
}

/// Cache entries carried by a sentence.
///
/// Fields left empty in the sentence produce no entry. A void RMC or GLL
/// produces nothing, as does a true-wind MWV.
pub fn cache_entries(sentence: &Sentence) -> Vec<CacheEntry> {
    let mut entries: Vec<CacheEntry> = Vec::new();
    match sentence {
        Sentence::Rmc(rmc) => {
            if !rmc.valid {
                return entries;
            }
            if let Some(pos) = rmc.position {
                entries.push((CacheKey::Position, pos.into()));
            }
            if let Some(sog) = rmc.sog {
                entries.push((CacheKey::Sog, Speed::knots(sog).into()));
            }
            if let Some(cog) = rmc.cog {
                entries.push((CacheKey::Cog, Angle360::new(cog).into()));
            }
            if let Some(d) = rmc.declination {
                entries.push((CacheKey::Declination, Angle180EW::new(d).into()));
            }
            if let Some(time) = rmc.time {
                entries.push((CacheKey::GpsTime, time.into()));
            }
            if let Some(utc) = rmc.date_time() {
                entries.push((CacheKey::GpsDateTime, utc.into()));
                if let Some(solar) = rmc.position.and_then(|pos| solar_time(utc, pos)) {
                    entries.push((CacheKey::GpsSolarTime, solar.into()));
                }
            }
        }
        Sentence::Vtg(vtg) => {
            if let Some(cog) = vtg.cog_true {
                entries.push((CacheKey::Cog, Angle360::new(cog).into()));
            }
            if let Some(sog) = vtg.sog {
                entries.push((CacheKey::Sog, Speed::knots(sog).into()));
            }
        }
        Sentence::Vhw(vhw) => {
            if let Some(bsp) = vhw.bsp {
                entries.push((CacheKey::Bsp, Speed::knots(bsp).into()));
            }
            if let Some(hdg) = vhw.heading_true {
                entries.push((CacheKey::HdgTrue, Angle360::new(hdg).into()));
            }
        }
        Sentence::Hdg(hdg) => {
            entries.push((CacheKey::HdgCompass, Angle360::new(hdg.heading).into()));
            if let Some(dev) = hdg.deviation {
                entries.push((CacheKey::Deviation, Angle180EW::new(dev).into()));
            }
            if let Some(var) = hdg.variation {
                entries.push((CacheKey::Declination, Angle180EW::new(var).into()));
            }
        }
        Sentence::Hdm(hdg) => {
            entries.push((CacheKey::HdgCompass, Angle360::new(*hdg).into()));
        }
        Sentence::Hdt(hdg) => {
            entries.push((CacheKey::HdgTrue, Angle360::new(*hdg).into()));
        }
        Sentence::Mwv(wind) | Sentence::Vwr(wind) => {
            if wind.reference == WindReference::Relative {
                entries.push((CacheKey::Awa, Angle180::new(wind.angle).into()));
                entries.push((CacheKey::Aws, Speed::knots(wind.speed).into()));
            }
        }
        Sentence::Gll(gll) => {
            if gll.valid {
                entries.push((CacheKey::Position, gll.position.into()));
                if let Some(time) = gll.time {
                    entries.push((CacheKey::GpsTime, time.into()));
                }
            }
        }
        Sentence::Xte(xte) => {
            entries.push((CacheKey::Xte, Distance::miles(*xte).into()));
        }
        Sentence::Mtw(t) => {
            entries.push((CacheKey::WaterTemp, Temperature::celsius(*t).into()));
        }
        Sentence::Mta(t) => {
            entries.push((CacheKey::AirTemp, Temperature::celsius(*t).into()));
        }
        Sentence::Mmb(p) => {
            entries.push((CacheKey::BaroPress, Pressure::hpa(*p).into()));
        }
        Sentence::Vlw(vlw) => {
            if let Some(total) = vlw.total {
                entries.push((CacheKey::Log, Distance::miles(total).into()));
            }
            if let Some(trip) = vlw.trip {
                entries.push((CacheKey::DailyLog, Distance::miles(trip).into()));
            }
        }
        Sentence::Unsupported(_) => {}
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{checksum, decode};
    use nmea_core::CacheValue;

    fn entries_of(body: &str) -> Vec<CacheEntry> {
        let raw = format!("${}*{:02X}", body, checksum(body));
        cache_entries(&decode(&raw).unwrap())
    }

    fn find(entries: &[CacheEntry], key: CacheKey) -> Option<&CacheValue> {
        entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    #[test]
    fn test_solar_time_at_the_edge_of_time() {
        let pos = GeoPos::new(0.0, 180.0);
        assert_eq!(solar_time(DateTime::<Utc>::MAX_UTC, pos), None);
        assert_eq!(solar_time(Utc::now(), GeoPos::new(0.0, f64::INFINITY)), None);

        let utc = "2024-06-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let solar = solar_time(utc, GeoPos::new(0.0, -90.0)).unwrap();
        assert_eq!(solar.to_rfc3339(), "2024-06-01T06:00:00+00:00");
    }

    #[test]
    fn test_rmc_entries() {
        let entries =
            entries_of("GPRMC,120000,A,4700.000,N,00730.000,E,6.0,90.0,010624,5.0,W");
        assert_eq!(
            find(&entries, CacheKey::Cog),
            Some(&Angle360::new(90.0).into())
        );
        assert_eq!(find(&entries, CacheKey::Sog), Some(&Speed::knots(6.0).into()));
        assert_eq!(
            find(&entries, CacheKey::Declination),
            Some(&Angle180EW::new(-5.0).into())
        );
        // 7.5 deg East is 30 minutes ahead of UTC.
        match find(&entries, CacheKey::GpsSolarTime) {
            Some(CacheValue::DateTime(t)) => {
                assert_eq!(t.to_rfc3339(), "2024-06-01T12:30:00+00:00")
            }
            other => panic!("unexpected solar time {:?}", other),
        }
    }

    #[test]
    fn test_void_rmc_has_no_entries() {
        let entries = entries_of("GPRMC,120000,V,4700.000,N,00730.000,E,6.0,90.0,010624,,");
        assert!(entries.is_empty());
    }

    #[test]
    fn test_apparent_wind_to_signed_angle() {
        let entries = entries_of("IIMWV,270.0,R,10.0,N,A");
        assert_eq!(
            find(&entries, CacheKey::Awa),
            Some(&Angle180::new(-90.0).into())
        );
        let entries = entries_of("IIVWR,30.0,L,8.0,N,,,,");
        assert_eq!(
            find(&entries, CacheKey::Awa),
            Some(&Angle180::new(-30.0).into())
        );
    }

    #[test]
    fn test_true_wind_mwv_is_ignored() {
        assert!(entries_of("IIMWV,120.0,T,10.0,N,A").is_empty());
    }

    #[test]
    fn test_hdg_entries() {
        let entries = entries_of("HCHDG,101.1,2.0,W,4.5,E");
        assert_eq!(entries.len(), 3);
        assert_eq!(
            find(&entries, CacheKey::Deviation),
            Some(&Angle180EW::new(-2.0).into())
        );
    }

    #[test]
    fn test_unsupported_has_no_entries() {
        assert!(entries_of("GPGSV,3,1,11,03,03,111,00").is_empty());
    }
}
