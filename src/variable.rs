// ⏰ Variables & Observations
//
// "Identity has many values over time": a Variable is the full history of one
// named attribute, a timeline of immutable observations gathered from any
// number of sources.
//
// Observations sharing a timestamp are kept side by side when they come from
// different sources. Merging never de-duplicates.

use crate::error::{RealityError, Result};
use crate::value::Value;
use chrono::{DateTime, Utc};

// ============================================================================
// OBSERVATION
// ============================================================================

/// One fact: at `timestamp`, `source` said the attribute was `value`.
///
/// Immutable once built; the value is always already coerced.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    timestamp: DateTime<Utc>,
    value: Value,
    source: String,
}

impl Observation {
    pub fn new(timestamp: DateTime<Utc>, value: Value, source: impl Into<String>) -> Self {
        Observation {
            timestamp,
            value,
            source: source.into(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

// ============================================================================
// VARIABLE
// ============================================================================

/// Timeline of observations for one attribute, ordered by timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    name: String,
    observations: Vec<Observation>,
}

impl Variable {
    pub fn new(name: impl Into<String>, mut observations: Vec<Observation>) -> Self {
        // Stable: same-timestamp observations keep arrival order
        observations.sort_by_key(|o| o.timestamp);
        Variable {
            name: name.into(),
            observations,
        }
    }

    /// Single-observation shorthand used by the source parsers.
    pub fn single(name: impl Into<String>, observation: Observation) -> Self {
        Variable::new(name, vec![observation])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Merge another history of the same attribute (concatenate + re-sort).
    ///
    /// The only mutating operation on a Variable.
    pub fn update(&mut self, other: Variable) -> Result<()> {
        if other.name != self.name {
            return Err(RealityError::VariableMismatch {
                expected: self.name.clone(),
                found: other.name,
            });
        }
        self.observations.extend(other.observations);
        self.observations.sort_by_key(|o| o.timestamp);
        Ok(())
    }

    fn scoped(&self, keep: impl Fn(&Observation) -> bool) -> Option<Variable> {
        let observations: Vec<Observation> =
            self.observations.iter().filter(|o| keep(o)).cloned().collect();
        if observations.is_empty() {
            None
        } else {
            Some(Variable {
                name: self.name.clone(),
                observations,
            })
        }
    }

    /// Observations strictly before `timestamp`.
    pub fn before(&self, timestamp: DateTime<Utc>) -> Option<Variable> {
        self.scoped(|o| o.timestamp < timestamp)
    }

    /// Observations strictly after `timestamp`.
    pub fn after(&self, timestamp: DateTime<Utc>) -> Option<Variable> {
        self.scoped(|o| o.timestamp > timestamp)
    }

    /// Observations reported by one source.
    pub fn from_source(&self, source: &str) -> Option<Variable> {
        self.scoped(|o| o.source == source)
    }

    /// Latest observation at or before `timestamp`.
    ///
    /// Among observations sharing that timestamp the last merged one wins.
    pub fn at(&self, timestamp: DateTime<Utc>) -> Option<&Observation> {
        self.observations
            .iter()
            .rev()
            .find(|o| o.timestamp <= timestamp)
    }

    /// `at(now)`
    pub fn current(&self) -> Option<&Observation> {
        self.at(Utc::now())
    }

    /// Most recent observation regardless of the clock.
    pub fn latest(&self) -> Option<&Observation> {
        self.observations.last()
    }

    /// Distinct sources, in order of first appearance.
    pub fn sources(&self) -> Vec<&str> {
        let mut sources: Vec<&str> = Vec::new();
        for o in &self.observations {
            if !sources.contains(&o.source()) {
                sources.push(o.source());
            }
        }
        sources
    }
}

// ============================================================================
// TESTS
// ============================================================================
