// Measure - amount + unit
//
// Two measures are only comparable when their units are identical. A mixed
// comparison fails instead of silently ordering 5 km against 3 mi.

use crate::error::{RealityError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Measure {
    pub amount: Decimal,
    pub unit: String,
}

impl Measure {
    pub fn new(amount: impl Into<Decimal>, unit: impl Into<String>) -> Self {
        Measure {
            amount: amount.into(),
            unit: unit.into(),
        }
    }

    fn ensure_same_unit(&self, other: &Measure) -> Result<()> {
        if self.unit == other.unit {
            Ok(())
        } else {
            Err(RealityError::IncompatibleUnits {
                left: self.unit.clone(),
                right: other.unit.clone(),
            })
        }
    }

    /// Compare with another measure of the same unit.
    pub fn try_cmp(&self, other: &Measure) -> Result<Ordering> {
        self.ensure_same_unit(other)?;
        Ok(self.amount.cmp(&other.amount))
    }

    fn with_amount(&self, amount: Option<Decimal>, op: &str, operand: &dyn fmt::Display) -> Result<Measure> {
        amount
            .map(|amount| Measure::new(amount, self.unit.clone()))
            .ok_or_else(|| RealityError::Overflow(format!("{} {} {}", self, op, operand)))
    }

    pub fn checked_add(&self, other: &Measure) -> Result<Measure> {
        self.ensure_same_unit(other)?;
        self.with_amount(self.amount.checked_add(other.amount), "+", other)
    }

    pub fn checked_sub(&self, other: &Measure) -> Result<Measure> {
        self.ensure_same_unit(other)?;
        self.with_amount(self.amount.checked_sub(other.amount), "-", other)
    }

    /// Multiply the amount by a unitless factor.
    pub fn scale(&self, factor: impl Into<Decimal>) -> Result<Measure> {
        let factor = factor.into();
        self.with_amount(self.amount.checked_mul(factor), "*", &factor)
    }
}

/// `None` across units, so `<` / `>` never order incompatible measures.
impl PartialOrd for Measure {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.try_cmp(other).ok()
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount.normalize(), self.unit)
    }
}

/// Factory used at call sites: `measure(5, "km")`.
pub fn measure(amount: impl Into<Decimal>, unit: impl Into<String>) -> Measure {
    Measure::new(amount, unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_unit_comparison() {
        let a = measure(5, "km");
        let b = measure(7, "km");
        assert_eq!(a.try_cmp(&b).unwrap(), Ordering::Less);
        assert!(a < b);
    }

    #[test]
    fn test_incompatible_units_fail() {
        let a = measure(5, "km");
        let b = measure(3, "mi");

        let err = a.try_cmp(&b).unwrap_err();
        assert!(matches!(err, RealityError::IncompatibleUnits { .. }));

        // Neither ordering holds, and PartialOrd reports no relation
        assert!(!(a < b));
        assert!(!(a > b));
        assert_eq!(a.partial_cmp(&b), None);
    }

    #[test]
    fn test_arithmetic() {
        let a = measure(5, "km");
        let b = measure(2, "km");
        assert_eq!(a.checked_add(&b).unwrap(), measure(7, "km"));
        assert_eq!(a.checked_sub(&b).unwrap(), measure(3, "km"));
        assert_eq!(a.scale(3).unwrap(), measure(15, "km"));
        assert!(a.checked_add(&measure(1, "m")).is_err());
    }

    #[test]
    fn test_arithmetic_overflow_is_an_error() {
        let huge = Measure::new(Decimal::MAX, "km");
        assert!(matches!(
            huge.checked_add(&measure(1, "km")),
            Err(RealityError::Overflow(_))
        ));
        assert!(matches!(
            Measure::new(Decimal::MIN, "km").checked_sub(&measure(1, "km")),
            Err(RealityError::Overflow(_))
        ));
        assert!(matches!(huge.scale(2), Err(RealityError::Overflow(_))));
    }

    #[test]
    fn test_display() {
        let m = Measure::new(Decimal::new(27800, 1), "km²");
        assert_eq!(m.to_string(), "2780 km²");
    }
}
