//! Typed resource values: scalars, integer ranges, and string sets.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::EPSILON;

/// A set of closed integer intervals, kept normalized.
///
/// Normalized means sorted by start, non-overlapping, and with adjacent
/// intervals merged: `[1-4] + [5-9]` is stored as `[1-9]`. Every operation
/// re-normalizes its result, so two `Ranges` that describe the same set of
/// integers compare equal regardless of how they were built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranges(Vec<(u64, u64)>);

impl Ranges {
    /// Builds a normalized range set from arbitrary (start, end) intervals.
    ///
    /// Intervals with `start > end` are dropped.
    pub fn new(intervals: impl IntoIterator<Item = (u64, u64)>) -> Self {
        let mut intervals: Vec<(u64, u64)> = intervals
            .into_iter()
            .filter(|(start, end)| start <= end)
            .collect();
        intervals.sort_unstable();

        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(intervals.len());
        for (start, end) in intervals {
            match merged.last_mut() {
                // Merge overlapping and adjacent intervals.
                Some((_, last_end)) if start <= last_end.saturating_add(1) => {
                    *last_end = (*last_end).max(end);
                }
                _ => merged.push((start, end)),
            }
        }

        Self(merged)
    }

    /// The normalized intervals.
    pub fn intervals(&self) -> &[(u64, u64)] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Union of two range sets.
    pub fn union(&self, other: &Ranges) -> Ranges {
        Ranges::new(self.0.iter().chain(other.0.iter()).copied())
    }

    /// Integers in `self` but not in `other`.
    pub fn difference(&self, other: &Ranges) -> Ranges {
        let mut result: Vec<(u64, u64)> = self.0.clone();

        for &(sub_start, sub_end) in &other.0 {
            let mut next: Vec<(u64, u64)> = Vec::with_capacity(result.len() + 1);
            for (start, end) in result {
                if sub_end < start || sub_start > end {
                    // Disjoint.
                    next.push((start, end));
                    continue;
                }
                if sub_start > start {
                    next.push((start, sub_start - 1));
                }
                if sub_end < end {
                    next.push((sub_end + 1, end));
                }
            }
            result = next;
        }

        Ranges::new(result)
    }

    /// True if every integer in `other` is also in `self`.
    ///
    /// Because both sides are normalized, each interval of `other` must be
    /// contained in a single interval of `self`.
    pub fn is_superset(&self, other: &Ranges) -> bool {
        other
            .0
            .iter()
            .all(|&(start, end)| self.0.iter().any(|&(s, e)| s <= start && end <= e))
    }
}

impl fmt::Display for Ranges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (start, end)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{start}-{end}")?;
        }
        write!(f, "]")
    }
}

/// A single resource dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Non-negative real quantity (cpus, mem).
    Scalar(f64),
    /// Integer intervals (ports).
    Ranges(Ranges),
    /// Unordered strings (disks).
    Set(BTreeSet<String>),
}

impl Value {
    /// Componentwise addition. Mismatched kinds leave `self` unchanged.
    pub fn add(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(a + b),
            (Value::Ranges(a), Value::Ranges(b)) => Value::Ranges(a.union(b)),
            (Value::Set(a), Value::Set(b)) => Value::Set(a.union(b).cloned().collect()),
            _ => self.clone(),
        }
    }

    /// Componentwise subtraction. Scalars clamp at zero; mismatched kinds
    /// leave `self` unchanged.
    pub fn subtract(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar((a - b).max(0.0)),
            (Value::Ranges(a), Value::Ranges(b)) => Value::Ranges(a.difference(b)),
            (Value::Set(a), Value::Set(b)) => Value::Set(a.difference(b).cloned().collect()),
            _ => self.clone(),
        }
    }

    /// True if `other` fits inside `self`: `≤` for scalars (with float
    /// tolerance), superset for ranges and sets. Mismatched kinds never fit.
    pub fn fits(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => *b <= *a + EPSILON,
            (Value::Ranges(a), Value::Ranges(b)) => a.is_superset(b),
            (Value::Set(a), Value::Set(b)) => a.is_superset(b),
            _ => false,
        }
    }

    /// True for a zero scalar, empty range set, or empty string set.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Scalar(v) => *v <= EPSILON,
            Value::Ranges(r) => r.is_empty(),
            Value::Set(s) => s.is_empty(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(v) => write!(f, "{v}"),
            Value::Ranges(r) => write!(f, "{r}"),
            Value::Set(s) => {
                write!(f, "{{")?;
                for (i, item) in s.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
        }
    }
}
