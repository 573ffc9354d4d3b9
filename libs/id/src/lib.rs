//! # flotilla-id
//!
//! Typed identifiers for the flotilla cluster manager.
//!
//! ## Design Principles
//!
//! - IDs are opaque and system-generated; hostnames and framework names are
//!   labels, never identity
//! - All IDs have a canonical string representation with strict parsing
//! - IDs round-trip through serialization (parse → format → parse)
//! - IDs are typed so an agent identifier can never be confused with a
//!   framework identifier
//!
//! ## ID Format
//!
//! All IDs use a prefixed format: `{prefix}_{ulid}`
//!
//! Examples:
//! - `agent_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `fw_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//!
//! ULIDs are time-ordered, which gives every ID type a total order. The
//! allocator relies on that order for deterministic tie-breaking, so the
//! `Ord` implementations here are part of the contract, not a convenience.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
