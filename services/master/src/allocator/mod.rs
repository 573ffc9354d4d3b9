//! The allocation and offer subsystem.
//!
//! The allocator decides which framework receives which subset of which
//! agent's unused resources, and when. It is deliberately coarse: a pass
//! hands a framework the entirety of an agent's free resources as an offer;
//! the framework's own scheduler decides what to launch and returns the
//! remainder. Task-level placement never happens here.
//!
//! ## Pieces
//!
//! - [`ledger`]: authoritative accounting of advertised, free, and
//!   allocated resources, plus the agent whitelist
//! - [`filter`]: per-framework refusal filters with timed expiry
//! - [`drf`]: the dominant-resource-fairness policy and the allocation pass
//! - [`actor`]: the event surface, a single-threaded actor serializing
//!   all mutation and emitting offers on an outbound channel
//!
//! The outer master owns sessions, offer timeouts, and rescinds; it drives
//! this module through [`actor::Event`] and consumes [`Offer`]s.

pub mod actor;
pub mod drf;
pub mod filter;
pub mod ledger;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use flotilla_id::{AgentId, FrameworkId};
use flotilla_resources::{ResourceError, Resources};

pub use actor::{spawn, AllocatorHandle, AllocatorStopped, Event};
pub use drf::DrfAllocator;
pub use filter::{FilterRegistry, InstalledFilter, RefusedFilter};
pub use ledger::Ledger;

// =============================================================================
// Descriptors
// =============================================================================

/// What an agent advertises when it joins: a stable hostname label and its
/// total capacity. Capacity is immutable for the lifetime of the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub hostname: String,
    pub resources: Resources,
}

/// Framework descriptor, supplied at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkInfo {
    pub name: String,
    pub user: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// An advisory resource request. The reference policy records nothing for
/// these; they exist so schedulers can hint without a protocol change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub agent_id: Option<AgentId>,
    pub resources: Resources,
}

/// Refusal options a framework attaches when declining resources.
///
/// `refuse_seconds <= 0` means "do not filter me"; the declined resources
/// are immediately offerable again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RefusalFilters {
    pub refuse_seconds: f64,
}

impl Default for RefusalFilters {
    fn default() -> Self {
        Self {
            refuse_seconds: 5.0,
        }
    }
}

// =============================================================================
// Offers
// =============================================================================

/// A batch of tentative grants to one framework: for each agent, the whole
/// of its free resources at the time of the pass. Emitted as the last
/// action of an allocation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub framework_id: FrameworkId,
    pub resources: HashMap<AgentId, Resources>,
}

// =============================================================================
// Errors
// =============================================================================

/// Non-fatal allocator errors.
///
/// Unknown-ID errors are expected during race windows between the outer
/// master's view and ours (a framework removal can cross a status update in
/// flight); the actor logs and drops them. Duplicate registration and
/// accounting underflow are NOT represented here: they indicate bugs in the
/// outer master and fail hard via assertions instead.
#[derive(Debug, Error)]
pub enum AllocatorError {
    #[error("unknown framework {0}")]
    UnknownFramework(FrameworkId),

    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),

    #[error("invalid resources: {0}")]
    InvalidResources(#[from] ResourceError),
}
