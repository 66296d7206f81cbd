// Geographic coordinates
//
// Latitude and longitude are kept as exact decimals; only distance math goes
// through floating point.

use crate::coerce::Raw;
use crate::error::{RealityError, Result};
use crate::measure::Measure;
use crate::value::Value;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Attribute names an entity may expose its location under.
pub const COORD_ATTRIBUTES: [&str; 3] = ["coordinates", "coord", "coordinate_location"];

static COORD_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(-?\d{1,3}(?:\.\d+)?)\s*[,;]\s*(-?\d{1,3}(?:\.\d+)?)\s*$")
        .expect("valid coordinate pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub lat: Decimal,
    pub lng: Decimal,
}

impl Coord {
    pub fn new(lat: Decimal, lng: Decimal) -> Result<Self> {
        if lat.abs() > Decimal::from(90) {
            return Err(RealityError::InvalidCoord(format!("latitude {} out of range", lat)));
        }
        if lng.abs() > Decimal::from(180) {
            return Err(RealityError::InvalidCoord(format!("longitude {} out of range", lng)));
        }
        Ok(Coord { lat, lng })
    }

    pub fn from_f64(lat: f64, lng: f64) -> Result<Self> {
        let to_decimal = |v: f64| {
            Decimal::from_f64(v).ok_or_else(|| RealityError::InvalidCoord(v.to_string()))
        };
        Coord::new(to_decimal(lat)?, to_decimal(lng)?)
    }

    /// Build from degrees/minutes/seconds pairs with hemisphere letters
    /// (`N`/`S`, `E`/`W`).
    pub fn from_dms(lat: [Decimal; 3], lat_hemi: char, lng: [Decimal; 3], lng_hemi: char) -> Result<Self> {
        let lat = dms_to_decimal(lat, lat_hemi, ('N', 'S'))?;
        let lng = dms_to_decimal(lng, lng_hemi, ('E', 'W'))?;
        Coord::new(lat, lng)
    }

    pub fn lat_f64(&self) -> f64 {
        self.lat.to_f64().unwrap_or_default()
    }

    pub fn lng_f64(&self) -> f64 {
        self.lng.to_f64().unwrap_or_default()
    }

    /// Great-circle (haversine) distance in kilometres, rounded to metres.
    pub fn distance_to(&self, other: &Coord) -> Measure {
        let (lat1, lat2) = (self.lat_f64().to_radians(), other.lat_f64().to_radians());
        let dlat = lat2 - lat1;
        let dlng = (other.lng_f64() - self.lng_f64()).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        let km = 2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt());

        Measure::new(Decimal::from_f64(km).unwrap_or_default().round_dp(3), "km")
    }
}

fn dms_to_decimal(parts: [Decimal; 3], hemi: char, (positive, negative): (char, char)) -> Result<Decimal> {
    let [deg, min, sec] = parts;
    // 1e-10 degrees is well below survey precision and keeps repeated
    // conversions stable.
    let value = deg
        .checked_add(min / Decimal::from(60))
        .and_then(|v| v.checked_add(sec / Decimal::from(3600)))
        .ok_or_else(|| RealityError::InvalidCoord(format!("{}° {}' {}\" out of range", deg, min, sec)))?
        .round_dp(10);
    match hemi.to_ascii_uppercase() {
        h if h == positive => Ok(value),
        h if h == negative => Ok(-value),
        other => Err(RealityError::InvalidCoord(format!("unknown hemisphere '{}'", other))),
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.lat.normalize(), self.lng.normalize())
    }
}

// ============================================================================
// COERCION HELPERS
// ============================================================================

/// Geo-specific coercion: a 2-element numeric pair, a Coord, an entity with a
/// coordinate attribute, or a strict `"lat,lng"` string.
pub fn coerce_coord(raw: &Raw) -> Result<Coord> {
    match raw {
        Raw::Coord(coord) => Ok(*coord),
        Raw::List(items) if items.len() == 2 => match (&items[0], &items[1]) {
            (Raw::Number(lat), Raw::Number(lng)) => Coord::new(*lat, *lng),
            _ => Err(RealityError::uncoercible(raw, "coord")),
        },
        Raw::Entity(entity) => COORD_ATTRIBUTES
            .iter()
            .find_map(|name| match entity.value(name) {
                Some(Value::Coord(coord)) => Some(*coord),
                _ => None,
            })
            .ok_or_else(|| RealityError::uncoercible(entity.name(), "coord")),
        Raw::Str(text) => {
            let caps = COORD_PAIR
                .captures(text)
                .ok_or_else(|| RealityError::uncoercible(text, "coord"))?;
            let parse = |s: &str| {
                Decimal::from_str(s).map_err(|_| RealityError::uncoercible(text, "coord"))
            };
            Coord::new(parse(&caps[1])?, parse(&caps[2])?)
        }
        other => Err(RealityError::uncoercible(other, "coord")),
    }
}

/// Parse hook for encyclopedia `{{coord|...}}` markup.
///
/// Handles the decimal form (`{{coord|50.45|30.52}}`) and the hemisphere
/// forms (`{{coord|50|27|N|30|31|E}}`, with or without minutes/seconds).
/// Anything else, including non-template text, yields `Raw::Null`.
pub fn parse_coord_template(raw: Raw) -> Raw {
    let text = match &raw {
        Raw::Str(text) => text.trim(),
        _ => return raw,
    };
    let lower = text.to_ascii_lowercase();
    let Some(start) = lower.find("{{coord") else {
        return Raw::Null;
    };
    let Some(end) = text[start..].find("}}") else {
        return Raw::Null;
    };

    let params: Vec<&str> = text[start + 2..start + end]
        .split('|')
        .skip(1)
        .map(str::trim)
        .filter(|p| !p.contains('=') && !p.is_empty())
        .collect();

    coord_from_template_params(&params).map(Raw::Coord).unwrap_or(Raw::Null)
}

fn coord_from_template_params(params: &[&str]) -> Option<Coord> {
    let is_hemi = |p: &&str| matches!(p.to_ascii_uppercase().as_str(), "N" | "S" | "E" | "W");
    let numbers = |parts: &[&str]| -> Option<[Decimal; 3]> {
        if parts.is_empty() || parts.len() > 3 {
            return None;
        }
        let mut out = [Decimal::ZERO; 3];
        for (slot, part) in out.iter_mut().zip(parts) {
            *slot = Decimal::from_str(part).ok()?;
        }
        Some(out)
    };

    match params.iter().position(is_hemi) {
        Some(lat_end) => {
            let rest = &params[lat_end + 1..];
            let lng_end = rest.iter().position(is_hemi)?;
            let lat = numbers(&params[..lat_end])?;
            let lng = numbers(&rest[..lng_end])?;
            let hemi = |p: &str| p.chars().next();
            Coord::from_dms(lat, hemi(params[lat_end])?, lng, hemi(rest[lng_end])?).ok()
        }
        None if params.len() >= 2 => {
            let lat = Decimal::from_str(params[0]).ok()?;
            let lng = Decimal::from_str(params[1]).ok()?;
            Coord::new(lat, lng).ok()
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::variable::{Observation, Variable};
    use chrono::{TimeZone, Utc};

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_coord_range_validation() {
        assert!(Coord::new(dec("91"), dec("0")).is_err());
        assert!(Coord::new(dec("0"), dec("-180.5")).is_err());
        assert!(Coord::new(dec("-90"), dec("180")).is_ok());
    }

    #[test]
    fn test_from_dms() {
        let c = Coord::from_dms(
            [dec("50"), dec("27"), dec("0")],
            'N',
            [dec("30"), dec("31"), dec("30")],
            'E',
        )
        .unwrap();
        assert_eq!(c.lat, dec("50.45"));
        assert_eq!(c.lng, dec("30.525"));

        let south = Coord::from_dms([dec("34"), dec("36"), dec("0")], 'S', [dec("58"), dec("22"), dec("48")], 'W').unwrap();
        assert_eq!(south.lat, dec("-34.6"));
        assert_eq!(south.lng, dec("-58.38"));
    }

    #[test]
    fn test_from_dms_rejects_unrepresentable_degrees() {
        let err = Coord::from_dms(
            [Decimal::MAX, Decimal::MAX, dec("0")],
            'N',
            [dec("30"), dec("0"), dec("0")],
            'E',
        )
        .unwrap_err();
        assert!(matches!(err, RealityError::InvalidCoord(_)));
    }

    #[test]
    fn test_distance_kyiv_to_kharkiv() {
        let kyiv = Coord::new(dec("50.45"), dec("30.5236")).unwrap();
        let kharkiv = Coord::new(dec("49.9935"), dec("36.2304")).unwrap();
        let d = kyiv.distance_to(&kharkiv);
        assert_eq!(d.unit, "km");
        assert!(d.amount > dec("405") && d.amount < dec("415"), "got {}", d);
    }

    #[test]
    fn test_coerce_coord_accepts_supported_shapes() {
        let expected = Coord::new(dec("50.45"), dec("30.52")).unwrap();

        assert_eq!(coerce_coord(&Raw::Coord(expected)).unwrap(), expected);
        assert_eq!(
            coerce_coord(&Raw::List(vec![Raw::Number(dec("50.45")), Raw::Number(dec("30.52"))])).unwrap(),
            expected
        );
        assert_eq!(coerce_coord(&Raw::Str("50.45, 30.52".into())).unwrap(), expected);

        let mut kyiv = Entity::new("Kyiv");
        let observed_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        kyiv.update(vec![Variable::new(
            "coordinates",
            vec![Observation::new(observed_at, Value::Coord(expected), "wikipedia")],
        )])
        .unwrap();
        assert_eq!(coerce_coord(&Raw::Entity(Box::new(kyiv))).unwrap(), expected);
    }

    #[test]
    fn test_coerce_coord_rejects_loose_strings() {
        assert!(coerce_coord(&Raw::Str("50.45N 30.52E".into())).is_err());
        assert!(coerce_coord(&Raw::Str("near Kyiv".into())).is_err());
        assert!(coerce_coord(&Raw::List(vec![Raw::Number(dec("1"))])).is_err());
        assert!(coerce_coord(&Raw::Entity(Box::new(Entity::new("Nowhere")))).is_err());
    }

    #[test]
    fn test_parse_coord_template() {
        let raw = Raw::Str("{{Coord|50|27|N|30|31|E|region:UA|display=inline,title}}".into());
        assert_eq!(
            parse_coord_template(raw),
            Raw::Coord(Coord::new(dec("50.45"), dec("30.5166666667")).unwrap())
        );

        let decimal = Raw::Str("{{coord|-34.6|-58.38|type:city}}".into());
        assert_eq!(
            parse_coord_template(decimal),
            Raw::Coord(Coord::new(dec("-34.6"), dec("-58.38")).unwrap())
        );

        assert_eq!(parse_coord_template(Raw::Str("unknown".into())), Raw::Null);
    }
}
