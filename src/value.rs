// Typed domain values
//
// What an Observation holds after coercion. Raw payloads never reach this
// type; see `coerce::Raw` for the input side.

use crate::entity::{Entity, EntityList, Link};
use crate::geo::Coord;
use crate::measure::Measure;
use chrono::{DateTime, FixedOffset, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Number(Decimal),
    Boolean(bool),
    Measure(Measure),
    Coord(Coord),
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
    TzOffset(FixedOffset),
    Entity(Box<Entity>),
    Link(Link),
    /// Array of entities, batch-loadable
    List(EntityList),
    Array(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_measure(&self) -> Option<&Measure> {
        match self {
            Value::Measure(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Value::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Type tag used in error messages and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Number(_) => "number",
            Value::Boolean(_) => "boolean",
            Value::Measure(_) => "measure",
            Value::Coord(_) => "coord",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::TzOffset(_) => "tz_offset",
            Value::Entity(_) => "entity",
            Value::Link(_) => "link",
            Value::List(_) => "list",
            Value::Array(_) => "array",
        }
    }

    /// Reduce to plain JSON scalars and collections.
    ///
    /// Measures lose their unit (amount only), coordinates become
    /// `[lat, lng]`, entities and links become their display name.
    pub fn to_plain(&self) -> serde_json::Value {
        match self {
            Value::String(s) => json!(s),
            Value::Integer(i) => json!(i),
            Value::Number(d) => decimal_to_json(d),
            Value::Boolean(b) => json!(b),
            Value::Measure(m) => decimal_to_json(&m.amount),
            Value::Coord(c) => json!([c.lat_f64(), c.lng_f64()]),
            Value::Date(d) => json!(d.format("%Y-%m-%d").to_string()),
            Value::DateTime(dt) => json!(dt.to_rfc3339()),
            Value::TzOffset(offset) => json!(offset.to_string()),
            Value::Entity(e) => json!(e.name()),
            Value::Link(l) => json!(l.display_name()),
            Value::List(list) => list.iter().map(|e| json!(e.name())).collect(),
            Value::Array(items) => items.iter().map(Value::to_plain).collect(),
        }
    }
}

fn decimal_to_json(d: &Decimal) -> serde_json::Value {
    if d.fract().is_zero() {
        if let Some(i) = d.to_i64() {
            return json!(i);
        }
    }
    d.to_f64().map(|f| json!(f)).unwrap_or(serde_json::Value::Null)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Number(d) => write!(f, "{}", d.normalize()),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Measure(m) => write!(f, "{}", m),
            Value::Coord(c) => write!(f, "{}", c),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::TzOffset(offset) => write!(f, "UTC{}", offset),
            Value::Entity(e) => write!(f, "{}", e),
            Value::Link(l) => write!(f, "{}", l),
            Value::List(list) => {
                let names: Vec<&str> = list.iter().map(|e| e.name()).collect();
                write!(f, "{}", names.join(", "))
            }
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(", "))
            }
        }
    }
}

impl From<Measure> for Value {
    fn from(m: Measure) -> Self {
        Value::Measure(m)
    }
}

impl From<Coord> for Value {
    fn from(c: Coord) -> Self {
        Value::Coord(c)
    }
}

impl From<Entity> for Value {
    fn from(e: Entity) -> Self {
        Value::Entity(Box::new(e))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::measure;
    use std::str::FromStr;

    #[test]
    fn test_to_plain_scalars() {
        assert_eq!(Value::Integer(42).to_plain(), json!(42));
        assert_eq!(Value::Number(Decimal::from_str("2.5").unwrap()).to_plain(), json!(2.5));
        assert_eq!(Value::from(measure(2780, "km²")).to_plain(), json!(2780));
        assert_eq!(
            Value::Date(NaiveDate::from_ymd_opt(1991, 8, 24).unwrap()).to_plain(),
            json!("1991-08-24")
        );
    }

    #[test]
    fn test_to_plain_nested() {
        let value = Value::Array(vec![
            Value::from(Entity::new("Kyiv")),
            Value::String("capital".into()),
        ]);
        assert_eq!(value.to_plain(), json!(["Kyiv", "capital"]));
    }

    #[test]
    fn test_tz_offset_display() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(Value::TzOffset(offset).to_string(), "UTC+02:00");
        assert_eq!(Value::TzOffset(offset).to_plain(), json!("+02:00"));
    }
}
