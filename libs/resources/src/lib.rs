//! # flotilla-resources
//!
//! Multi-dimensional resource vectors for the cluster manager.
//!
//! A [`Resources`] value is a finite map from resource name (`"cpus"`,
//! `"mem"`, `"ports"`, ...) to a typed [`Value`]: a non-negative scalar, a
//! set of integer ranges, or a set of strings. The allocator does all of its
//! accounting in this algebra:
//!
//! - `+` / `-` are componentwise; subtraction clamps scalars at zero
//! - [`Resources::contains`] is the componentwise "fits inside" relation
//!   (`≤` for scalars, superset for ranges and sets)
//! - [`Resources::allocatable`] projects a vector onto the entries worth
//!   offering (positive scalars; ranges and sets pass through)
//!
//! All arithmetic is pure; nothing here allocates identity or talks to the
//! outside world. Vectors have a text form used by tests and tooling:
//!
//! ```
//! use flotilla_resources::Resources;
//!
//! let r = Resources::parse("cpus:4;mem:1024;ports:[31000-32000]").unwrap();
//! assert_eq!(r.scalar("cpus"), 4.0);
//! ```

mod value;
mod vector;

pub use value::{Ranges, Value};
pub use vector::{ResourceError, Resources};

/// Scalar comparisons tolerate this much floating-point drift.
///
/// Accounting repeatedly adds and subtracts the same quantities, so exact
/// float equality is not available; anything below this threshold is
/// considered zero.
pub const EPSILON: f64 = 1e-9;
