//! The resource vector: a named map of typed values with componentwise
//! algebra.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::{Ranges, Value};
use crate::EPSILON;

/// Errors produced when parsing or validating a resource vector.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResourceError {
    /// An entry was not of the form `name:value`.
    #[error("malformed resource entry '{0}'")]
    MalformedEntry(String),

    /// A resource name was empty.
    #[error("resource name is empty")]
    EmptyName,

    /// A scalar failed to parse or was not a finite number.
    #[error("invalid scalar for '{name}': {message}")]
    InvalidScalar { name: String, message: String },

    /// A scalar was negative. Resource quantities are never negative;
    /// subtraction clamps instead.
    #[error("negative scalar for '{name}': {value}")]
    NegativeScalar { name: String, value: f64 },

    /// A range entry failed to parse.
    #[error("invalid range for '{name}': {message}")]
    InvalidRange { name: String, message: String },
}

/// A finite map from resource name to typed value.
///
/// The map is ordered by name, so iteration, `Display`, and serialization
/// are deterministic. Subtraction keeps zeroed entries in the map (they
/// fall out on [`Resources::allocatable`]); this keeps repeated
/// add/subtract cycles from churning the key set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resources(BTreeMap<String, Value>);

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a vector from its text form:
    /// `cpus:4;mem:1024;ports:[31000-32000, 33000-34000];disks:{sda1}`.
    ///
    /// Scalars must be finite and non-negative. A name appearing more than
    /// once accumulates.
    pub fn parse(text: &str) -> Result<Self, ResourceError> {
        let mut resources = Resources::new();

        for entry in text.split(';') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            let (name, raw) = entry
                .split_once(':')
                .ok_or_else(|| ResourceError::MalformedEntry(entry.to_string()))?;
            let name = name.trim();
            let raw = raw.trim();

            if name.is_empty() {
                return Err(ResourceError::EmptyName);
            }

            let value = if raw.starts_with('[') {
                parse_ranges(name, raw)?
            } else if raw.starts_with('{') {
                parse_set(name, raw)?
            } else {
                parse_scalar(name, raw)?
            };

            resources.accumulate(name, value);
        }

        Ok(resources)
    }

    /// Adds `value` under `name`, merging with an existing entry of the
    /// same kind.
    pub fn accumulate(&mut self, name: &str, value: Value) {
        match self.0.get_mut(name) {
            Some(existing) => *existing = existing.add(&value),
            None => {
                self.0.insert(name.to_string(), value);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// The scalar value under `name`, or 0 if absent or not a scalar.
    pub fn scalar(&self, name: &str) -> f64 {
        match self.0.get(name) {
            Some(Value::Scalar(v)) => *v,
            _ => 0.0,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// True if the vector has no entries or only empty ones.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(Value::is_empty)
    }

    /// True if `other` fits inside `self`, componentwise. Empty entries of
    /// `other` fit trivially.
    pub fn contains(&self, other: &Resources) -> bool {
        other.0.iter().all(|(name, value)| {
            value.is_empty() || self.0.get(name).is_some_and(|mine| mine.fits(value))
        })
    }

    /// Projects onto the entries worth offering: scalars above the epsilon
    /// threshold, non-empty ranges and sets.
    pub fn allocatable(&self) -> Resources {
        Resources(
            self.0
                .iter()
                .filter(|(_, value)| !value.is_empty())
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        )
    }

    /// Checks the vector is well-formed: non-empty names, finite
    /// non-negative scalars. Run at trust boundaries before the vector
    /// enters accounting.
    pub fn validate(&self) -> Result<(), ResourceError> {
        for (name, value) in &self.0 {
            if name.is_empty() {
                return Err(ResourceError::EmptyName);
            }
            if let Value::Scalar(v) = value {
                if !v.is_finite() {
                    return Err(ResourceError::InvalidScalar {
                        name: name.clone(),
                        message: format!("{v} is not finite"),
                    });
                }
                if *v < 0.0 {
                    return Err(ResourceError::NegativeScalar {
                        name: name.clone(),
                        value: *v,
                    });
                }
            }
        }
        Ok(())
    }

    /// Drift-tolerant equality: both vectors fit inside each other.
    ///
    /// Structural equality is too strict for accounting state that has been
    /// through add/subtract cycles (zeroed entries, float residue).
    pub fn equivalent(&self, other: &Resources) -> bool {
        self.contains(other) && other.contains(self)
    }
}

impl Add for Resources {
    type Output = Resources;

    fn add(mut self, rhs: Resources) -> Resources {
        self += rhs;
        self
    }
}

impl AddAssign for Resources {
    fn add_assign(&mut self, rhs: Resources) {
        for (name, value) in rhs.0 {
            self.accumulate(&name, value);
        }
    }
}

impl AddAssign<&Resources> for Resources {
    fn add_assign(&mut self, rhs: &Resources) {
        for (name, value) in &rhs.0 {
            self.accumulate(name, value.clone());
        }
    }
}

impl Sub for Resources {
    type Output = Resources;

    fn sub(mut self, rhs: Resources) -> Resources {
        self -= &rhs;
        self
    }
}

impl SubAssign<&Resources> for Resources {
    fn sub_assign(&mut self, rhs: &Resources) {
        for (name, value) in &rhs.0 {
            if let Some(existing) = self.0.get_mut(name) {
                *existing = existing.subtract(value);
            }
            // Subtracting something we do not hold cannot go negative;
            // the entry stays absent.
        }
    }
}

impl SubAssign for Resources {
    fn sub_assign(&mut self, rhs: Resources) {
        *self -= &rhs;
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

impl FromIterator<(String, Value)> for Resources {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut resources = Resources::new();
        for (name, value) in iter {
            resources.accumulate(&name, value);
        }
        resources
    }
}

fn parse_scalar(name: &str, raw: &str) -> Result<Value, ResourceError> {
    let v: f64 = raw.parse().map_err(|e| ResourceError::InvalidScalar {
        name: name.to_string(),
        message: format!("'{raw}': {e}"),
    })?;
    if !v.is_finite() {
        return Err(ResourceError::InvalidScalar {
            name: name.to_string(),
            message: format!("{v} is not finite"),
        });
    }
    if v < 0.0 {
        return Err(ResourceError::NegativeScalar {
            name: name.to_string(),
            value: v,
        });
    }
    Ok(Value::Scalar(v))
}

fn parse_ranges(name: &str, raw: &str) -> Result<Value, ResourceError> {
    let inner = raw
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| ResourceError::InvalidRange {
            name: name.to_string(),
            message: format!("'{raw}' is not bracketed"),
        })?;

    let mut intervals = Vec::new();
    for part in inner.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (start, end) = part.split_once('-').ok_or_else(|| ResourceError::InvalidRange {
            name: name.to_string(),
            message: format!("'{part}' is not of the form start-end"),
        })?;
        let start: u64 = start.trim().parse().map_err(|_| ResourceError::InvalidRange {
            name: name.to_string(),
            message: format!("bad interval start in '{part}'"),
        })?;
        let end: u64 = end.trim().parse().map_err(|_| ResourceError::InvalidRange {
            name: name.to_string(),
            message: format!("bad interval end in '{part}'"),
        })?;
        if start > end {
            return Err(ResourceError::InvalidRange {
                name: name.to_string(),
                message: format!("inverted interval '{part}'"),
            });
        }
        intervals.push((start, end));
    }

    Ok(Value::Ranges(Ranges::new(intervals)))
}

fn parse_set(name: &str, raw: &str) -> Result<Value, ResourceError> {
    let inner = raw
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| ResourceError::MalformedEntry(format!("{name}:{raw}")))?;

    let items = inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    Ok(Value::Set(items))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res(text: &str) -> Resources {
        Resources::parse(text).unwrap()
    }

    #[test]
    fn test_parse_mixed_kinds() {
        let r = res("cpus:45.55;ports:[10000-20000, 30000-50000];disks:{sda1}");
        assert_eq!(r.scalar("cpus"), 45.55);
        match r.get("ports") {
            Some(Value::Ranges(ranges)) => {
                assert_eq!(ranges.intervals(), &[(10000, 20000), (30000, 50000)]);
            }
            other => panic!("unexpected ports value: {other:?}"),
        }
        match r.get("disks") {
            Some(Value::Set(set)) => assert_eq!(set.len(), 1),
            other => panic!("unexpected disks value: {other:?}"),
        }
    }

    #[test]
    fn test_parse_accumulates_duplicates() {
        let r = res("cpus:1;cpus:2.5");
        assert_eq!(r.scalar("cpus"), 3.5);
    }

    #[test]
    fn test_parse_rejects_negative_scalar() {
        let err = Resources::parse("cpus:-1").unwrap_err();
        assert!(matches!(err, ResourceError::NegativeScalar { .. }));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Resources::parse("cpus").is_err());
        assert!(Resources::parse("ports:[1-").is_err());
        assert!(Resources::parse("ports:[5-1]").is_err());
        assert!(Resources::parse(":4").is_err());
    }

    #[test]
    fn test_display_format() {
        let r = res("cpus:45.55;ports:[10000-20000, 30000-50000];disks:{sda1}");
        assert_eq!(
            r.to_string(),
            "cpus=45.55; disks={sda1}; ports=[10000-20000, 30000-50000]"
        );
    }

    #[test]
    fn test_scalar_addition() {
        let sum = res("cpus:1;mem:5") + res("cpus:2;mem:10");
        assert_eq!(sum.scalar("cpus"), 3.0);
        assert_eq!(sum.scalar("mem"), 15.0);
    }

    #[test]
    fn test_scalar_subtraction() {
        let diff = res("cpus:50;mem:4096") - res("cpus:0.5;mem:1024");
        assert_eq!(diff.scalar("cpus"), 49.5);
        assert_eq!(diff.scalar("mem"), 3072.0);
    }

    #[test]
    fn test_self_subtraction_leaves_nothing_allocatable() {
        let r = res("cpus:50;mem:4096");
        let zero = r.clone() - r;
        assert!(zero.is_empty());
        assert!(zero.allocatable().iter().next().is_none());
    }

    #[test]
    fn test_subtracting_absent_entry_is_noop() {
        let r = res("cpus:2") - res("mem:1024");
        assert_eq!(r.scalar("cpus"), 2.0);
        assert!(r.get("mem").is_none());
    }

    #[test]
    fn test_scalar_subset() {
        let small = res("cpus:1;mem:3072");
        let large = res("cpus:1;mem:4096");
        assert!(large.contains(&small));
        assert!(!small.contains(&large));
    }

    #[test]
    fn test_contains_requires_every_entry() {
        let offer = res("cpus:4;mem:1024");
        let want = res("cpus:1;gpus:1");
        assert!(!offer.contains(&want));
    }

    #[test]
    fn test_contains_ignores_empty_entries() {
        let offer = res("cpus:4");
        let want = res("cpus:1;mem:0");
        assert!(offer.contains(&want));
    }

    #[test]
    fn test_ranges_through_vector_algebra() {
        let a = res("ports:[1-10]");
        let b = res("ports:[5-30]");
        let sum = a.clone() + b;
        match sum.get("ports") {
            Some(Value::Ranges(ranges)) => assert_eq!(ranges.intervals(), &[(1, 30)]),
            other => panic!("unexpected: {other:?}"),
        }
        let diff = sum - a;
        match diff.get("ports") {
            Some(Value::Ranges(ranges)) => assert_eq!(ranges.intervals(), &[(11, 30)]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_allocatable_drops_zeroed_scalars() {
        let r = res("cpus:4;mem:1024") - res("cpus:4");
        let allocatable = r.allocatable();
        assert!(allocatable.get("cpus").is_none());
        assert_eq!(allocatable.scalar("mem"), 1024.0);
    }

    #[test]
    fn test_equivalent_tolerates_zeroed_entries() {
        let a = res("cpus:4;mem:1024") - res("mem:1024");
        let b = res("cpus:4");
        assert_ne!(a, b);
        assert!(a.equivalent(&b));
    }

    #[test]
    fn test_validate_rejects_nonfinite() {
        let mut r = Resources::new();
        r.accumulate("cpus", Value::Scalar(f64::NAN));
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let r = res("cpus:4;mem:1024;ports:[31000-32000]");
        let json = serde_json::to_string(&r).unwrap();
        let back: Resources = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }
}
