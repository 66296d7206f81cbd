// Coercion Engine
//
// Turns raw, source-specific payloads into typed domain values.
//
// Order of rules:
//   1. list given for a scalar target → first element (lossy on purpose:
//      documents wrap single values in one-element containers)
//   2. `parse` hook, when supplied
//   3. empty / absent → Ok(None), the source simply has no opinion
//   4. type-specific conversion
//   5. array targets coerce element-wise; all-entity results become a List
// Anything unsupported is an explicit error naming value and target.

use crate::entity::{Entity, EntityList, Link};
use crate::error::{RealityError, Result};
use crate::geo::Coord;
use crate::measure::Measure;
use crate::value::Value;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Unit whose values sometimes arrive in m² instead of km².
pub const AREA_UNIT: &str = "km²";

const SQUARE_METRES_PER_KM2: i64 = 1_000_000;

// ============================================================================
// RAW VALUES (input side)
// ============================================================================

/// A value as extracted from a reply or document, before coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum Raw {
    Null,
    Str(String),
    Number(Decimal),
    Bool(bool),
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
    Coord(Coord),
    /// Knowledge-graph reference
    Link(Link),
    /// Encyclopedia `[[target|label]]`
    WikiLink { target: String, label: Option<String> },
    Entity(Box<Entity>),
    List(Vec<Raw>),
}

impl Raw {
    pub fn is_empty(&self) -> bool {
        match self {
            Raw::Null => true,
            Raw::Str(s) => s.trim().is_empty(),
            Raw::List(items) => items.is_empty(),
            _ => false,
        }
    }

    pub fn wikilink(target: impl Into<String>, label: Option<&str>) -> Self {
        Raw::WikiLink {
            target: target.into(),
            label: label.map(str::to_string),
        }
    }
}

impl From<&str> for Raw {
    fn from(s: &str) -> Self {
        Raw::Str(s.to_string())
    }
}

// ============================================================================
// TARGET TYPES & OPTIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoerceType {
    String,
    Integer,
    Number,
    Boolean,
    Measure,
    Date,
    DateTime,
    Coord,
    Entity,
    TzOffset,
    Array(Box<CoerceType>),
}

impl CoerceType {
    pub fn array_of(inner: CoerceType) -> Self {
        CoerceType::Array(Box::new(inner))
    }
}

impl fmt::Display for CoerceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoerceType::String => write!(f, "string"),
            CoerceType::Integer => write!(f, "integer"),
            CoerceType::Number => write!(f, "number"),
            CoerceType::Boolean => write!(f, "boolean"),
            CoerceType::Measure => write!(f, "measure"),
            CoerceType::Date => write!(f, "date"),
            CoerceType::DateTime => write!(f, "datetime"),
            CoerceType::Coord => write!(f, "coord"),
            CoerceType::Entity => write!(f, "entity"),
            CoerceType::TzOffset => write!(f, "tz_offset"),
            CoerceType::Array(inner) => write!(f, "[{}]", inner),
        }
    }
}

pub type ParseHook = Arc<dyn Fn(Raw) -> Raw + Send + Sync>;

#[derive(Clone, Default)]
pub struct CoerceOptions {
    pub unit: Option<String>,
    pub parse: Option<ParseHook>,
}

impl CoerceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: unit for measure targets
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Builder: transform applied before type conversion
    pub fn with_parse(mut self, hook: impl Fn(Raw) -> Raw + Send + Sync + 'static) -> Self {
        self.parse = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for CoerceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoerceOptions")
            .field("unit", &self.unit)
            .field("parse", &self.parse.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

// ============================================================================
// COERCION
// ============================================================================

/// Coerce `raw` into `target`. `Ok(None)` means "no value", never failure.
pub fn coerce(raw: Raw, target: &CoerceType, opts: &CoerceOptions) -> Result<Option<Value>> {
    if let CoerceType::Array(inner) = target {
        return coerce_array(raw, inner, opts);
    }

    let raw = match raw {
        Raw::List(items) => items.into_iter().next().unwrap_or(Raw::Null),
        other => other,
    };
    let raw = match &opts.parse {
        Some(hook) => hook(raw),
        None => raw,
    };
    if raw.is_empty() {
        return Ok(None);
    }

    coerce_scalar(raw, target, opts).map(Some)
}

fn coerce_array(raw: Raw, inner: &CoerceType, opts: &CoerceOptions) -> Result<Option<Value>> {
    let items = match raw {
        Raw::List(items) if items.is_empty() => return Ok(None),
        Raw::List(items) => items,
        Raw::Null => return Ok(None),
        other => {
            return Err(RealityError::uncoercible(other, CoerceType::array_of(inner.clone())))
        }
    };

    let mut values = Vec::with_capacity(items.len());
    for item in items {
        if let Some(value) = coerce(item, inner, opts)? {
            values.push(value);
        }
    }

    if values.is_empty() {
        return Ok(None);
    }

    if values.iter().all(|v| matches!(v, Value::Entity(_))) {
        let entities = values.into_iter().filter_map(|v| match v {
            Value::Entity(e) => Some(*e),
            _ => None,
        });
        return Ok(Some(Value::List(EntityList::from_entities(entities))));
    }

    Ok(Some(Value::Array(values)))
}

fn coerce_scalar(raw: Raw, target: &CoerceType, opts: &CoerceOptions) -> Result<Value> {
    match target {
        CoerceType::String => coerce_string(raw),
        CoerceType::Integer => coerce_integer(raw),
        CoerceType::Number => parse_number(&raw).map(Value::Number),
        CoerceType::Boolean => coerce_boolean(raw),
        CoerceType::Measure => coerce_measure(raw, opts),
        CoerceType::Date => coerce_date(raw),
        CoerceType::DateTime => coerce_datetime(raw),
        CoerceType::Coord => match raw {
            Raw::Coord(coord) => Ok(Value::Coord(coord)),
            other => Err(RealityError::uncoercible(other, target)),
        },
        CoerceType::Entity => coerce_entity(raw),
        CoerceType::TzOffset => coerce_tz_offset(raw),
        CoerceType::Array(_) => Err(RealityError::uncoercible(raw, target)),
    }
}

fn coerce_string(raw: Raw) -> Result<Value> {
    let s = match raw {
        Raw::Str(s) => s.trim().to_string(),
        Raw::Number(d) => d.normalize().to_string(),
        Raw::Bool(b) => b.to_string(),
        Raw::WikiLink { target, label } => label.unwrap_or(target),
        Raw::Link(link) => link.display_name().to_string(),
        Raw::Date(d) => d.format("%Y-%m-%d").to_string(),
        other => return Err(RealityError::uncoercible(other, CoerceType::String)),
    };
    Ok(Value::String(s))
}

fn coerce_integer(raw: Raw) -> Result<Value> {
    let number =
        parse_number(&raw).map_err(|_| RealityError::uncoercible(&raw, CoerceType::Integer))?;
    if !number.fract().is_zero() {
        return Err(RealityError::uncoercible(raw, CoerceType::Integer));
    }
    number
        .to_i64()
        .map(Value::Integer)
        .ok_or_else(|| RealityError::uncoercible(raw, CoerceType::Integer))
}

fn coerce_boolean(raw: Raw) -> Result<Value> {
    match &raw {
        Raw::Bool(b) => Ok(Value::Boolean(*b)),
        Raw::Str(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" => Ok(Value::Boolean(true)),
            "false" | "no" | "n" => Ok(Value::Boolean(false)),
            _ => Err(RealityError::uncoercible(raw, CoerceType::Boolean)),
        },
        _ => Err(RealityError::uncoercible(raw, CoerceType::Boolean)),
    }
}

fn coerce_measure(raw: Raw, opts: &CoerceOptions) -> Result<Value> {
    let unit = opts.unit.as_deref().ok_or_else(|| RealityError::MissingOption {
        option: "unit".to_string(),
        target: CoerceType::Measure.to_string(),
    })?;

    let mut amount =
        parse_number(&raw).map_err(|_| RealityError::uncoercible(&raw, CoerceType::Measure))?;

    // Upstream area figures occasionally come in m²: suspiciously large,
    // round-million values are rescaled to km².
    let million = Decimal::from(SQUARE_METRES_PER_KM2);
    if unit == AREA_UNIT && amount > million && (amount % million).is_zero() {
        amount /= million;
    }

    Ok(Value::Measure(Measure::new(amount, unit)))
}

fn coerce_date(raw: Raw) -> Result<Value> {
    match raw {
        Raw::Date(d) => Ok(Value::Date(d)),
        Raw::DateTime(dt) => Ok(Value::Date(dt.date_naive())),
        other => Err(RealityError::uncoercible(other, CoerceType::Date)),
    }
}

fn coerce_datetime(raw: Raw) -> Result<Value> {
    match raw {
        Raw::DateTime(dt) => Ok(Value::DateTime(dt)),
        Raw::Date(d) => {
            let midnight = d.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
            midnight
                .map(|dt| Value::DateTime(dt.fixed_offset()))
                .ok_or_else(|| RealityError::uncoercible(d, CoerceType::DateTime))
        }
        other => Err(RealityError::uncoercible(other, CoerceType::DateTime)),
    }
}

fn coerce_entity(raw: Raw) -> Result<Value> {
    match raw {
        Raw::Entity(entity) => Ok(Value::Entity(entity)),
        Raw::Link(link) => Ok(Value::from(Entity::from_link(&link))),
        Raw::WikiLink { target, label } => {
            let name = label.as_deref().unwrap_or(&target).to_string();
            Ok(Value::from(Entity::new(name).with_id(crate::entity::WIKIPEDIA, target)))
        }
        other => Err(RealityError::uncoercible(other, CoerceType::Entity)),
    }
}

fn coerce_tz_offset(raw: Raw) -> Result<Value> {
    let offset = match &raw {
        Raw::Str(s) => parse_utc_offset(s),
        Raw::Number(hours) => hours
            .checked_mul(Decimal::from(3600))
            .and_then(|seconds| seconds.to_i32())
            .and_then(FixedOffset::east_opt),
        _ => None,
    };
    offset
        .map(Value::TzOffset)
        .ok_or_else(|| RealityError::uncoercible(raw, CoerceType::TzOffset))
}

// ============================================================================
// TOLERANT PARSERS
// ============================================================================

/// Numbers from numbers or numeric text; thousands separators are stripped.
pub fn parse_number(raw: &Raw) -> Result<Decimal> {
    match raw {
        Raw::Number(d) => Ok(*d),
        Raw::Str(s) => {
            let cleaned: String = s
                .trim()
                .trim_start_matches('+')
                .chars()
                .filter(|c| !matches!(c, ',' | '_' | ' ' | '\u{a0}' | '\u{202f}' | '\''))
                .collect();
            let cleaned = normalize_minus(&cleaned);
            Decimal::from_str(&cleaned)
                .or_else(|_| Decimal::from_scientific(&cleaned))
                .map_err(|_| RealityError::uncoercible(s, CoerceType::Number))
        }
        other => Err(RealityError::uncoercible(other, CoerceType::Number)),
    }
}

/// Replace Unicode minus/dash variants with ASCII '-'.
pub fn normalize_minus(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{2212}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{fe63}' | '\u{ff0d}' => '-',
            other => other,
        })
        .collect()
}

/// Free-text UTC offsets: "UTC+5:30", "UTC−03:00", "GMT-4", "+2", "UTC".
pub fn parse_utc_offset(text: &str) -> Option<FixedOffset> {
    let normalized = normalize_minus(text);
    let trimmed = normalized.trim();
    let rest = trimmed
        .strip_prefix("UTC")
        .or_else(|| trimmed.strip_prefix("GMT"))
        .unwrap_or(trimmed)
        .trim();

    if rest.is_empty() || rest == "±0" || rest == "±00:00" {
        return FixedOffset::east_opt(0);
    }

    let (sign, digits) = match rest.chars().next()? {
        '+' | '±' => (1, &rest[rest.chars().next()?.len_utf8()..]),
        '-' => (-1, &rest[1..]),
        _ => (1, rest),
    };

    let mut parts = digits.trim().splitn(2, ':');
    let hours: i32 = parts.next()?.trim().parse().ok()?;
    let minutes: i32 = match parts.next() {
        Some(m) => m.trim().parse().ok()?,
        None => 0,
    };
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

// ============================================================================
// TESTS
// ============================================================================
