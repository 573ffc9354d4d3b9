//! Refusal filters: time-bounded "do not offer me this again" records.
//!
//! When a framework declines resources it may attach a refusal duration.
//! The allocator installs a filter for (agent, declined resources) and
//! skips matching offers until the filter expires, the framework revives
//! its offers, or the framework is removed.
//!
//! ## Identity, not addresses
//!
//! Each filter carries a stable [`FilterId`]. Expiry timers hold the
//! `(FrameworkId, FilterId)` pair, never the record. Detaching a filter
//! (revival, framework removal) leaves the pending timer alone: when it
//! fires, [`FilterRegistry::expire`] finds no matching identity and does
//! nothing. A filter installed later can therefore never be expired by an
//! earlier filter's timer, even though both lived in the same slot.

use std::collections::HashMap;

use tokio::time::Instant;
use tracing::trace;

use flotilla_id::{AgentId, FilterId, FrameworkId};
use flotilla_resources::Resources;

/// A single refusal filter.
#[derive(Debug, Clone)]
pub struct RefusedFilter {
    pub id: FilterId,
    pub agent_id: AgentId,
    pub resources: Resources,
    pub deadline: Instant,
}

impl RefusedFilter {
    /// True if this filter blocks offering `offered` on `agent_id` at `now`.
    ///
    /// A filter blocks only offers that fit inside what was refused: the
    /// framework said no to R, so anything ≤ R would get the same answer.
    /// A larger offer might not, and goes through.
    pub fn matches(&self, agent_id: AgentId, offered: &Resources, now: Instant) -> bool {
        self.agent_id == agent_id && self.resources.contains(offered) && now < self.deadline
    }
}

/// Identity and deadline of a freshly installed filter, handed to the actor
/// so it can schedule the expiry timer.
#[derive(Debug, Clone, Copy)]
pub struct InstalledFilter {
    pub framework_id: FrameworkId,
    pub filter_id: FilterId,
    pub deadline: Instant,
}

/// All active refusal filters, keyed by framework.
#[derive(Debug, Default)]
pub struct FilterRegistry {
    filters: HashMap<FrameworkId, Vec<RefusedFilter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter for `framework_id`. The caller schedules the matching
    /// expiry timer.
    pub fn insert(&mut self, framework_id: FrameworkId, filter: RefusedFilter) {
        self.filters.entry(framework_id).or_default().push(filter);
    }

    /// Detaches all filters of a framework (revival, removal).
    ///
    /// Pending expiry timers are not cancelled; they become no-ops when
    /// they fire and find their identity gone. Returns how many filters
    /// were detached.
    pub fn detach_all(&mut self, framework_id: FrameworkId) -> usize {
        self.filters.remove(&framework_id).map_or(0, |f| f.len())
    }

    /// Removes one filter by identity. Returns true if it was still
    /// present; false means it was already detached and the expiry is a
    /// no-op.
    pub fn expire(&mut self, framework_id: FrameworkId, filter_id: FilterId) -> bool {
        let Some(filters) = self.filters.get_mut(&framework_id) else {
            return false;
        };

        let before = filters.len();
        filters.retain(|f| f.id != filter_id);
        let removed = filters.len() < before;

        if filters.is_empty() {
            self.filters.remove(&framework_id);
        }

        removed
    }

    /// True if any filter of `framework_id` blocks offering `offered` on
    /// `agent_id` at `now`. Must be re-evaluated every pass; results are
    /// not cacheable across passes.
    pub fn matches(
        &self,
        framework_id: FrameworkId,
        agent_id: AgentId,
        offered: &Resources,
        now: Instant,
    ) -> bool {
        let Some(filters) = self.filters.get(&framework_id) else {
            return false;
        };

        for filter in filters {
            if filter.matches(agent_id, offered, now) {
                trace!(
                    framework_id = %framework_id,
                    agent_id = %agent_id,
                    filter_id = %filter.id,
                    "Offer suppressed by refusal filter"
                );
                return true;
            }
        }

        false
    }

    /// Number of active filters for a framework.
    pub fn count(&self, framework_id: FrameworkId) -> usize {
        self.filters.get(&framework_id).map_or(0, |f| f.len())
    }

    /// Total number of active filters.
    pub fn total(&self) -> usize {
        self.filters.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn resources(text: &str) -> Resources {
        Resources::parse(text).unwrap()
    }

    fn filter(agent_id: AgentId, refused: &str, ttl: Duration) -> RefusedFilter {
        RefusedFilter {
            id: FilterId::new(),
            agent_id,
            resources: resources(refused),
            deadline: Instant::now() + ttl,
        }
    }

    #[test]
    fn test_matches_subset_on_same_agent() {
        let agent_id = AgentId::new();
        let f = filter(agent_id, "cpus:4;mem:1024", Duration::from_secs(10));

        let now = Instant::now();
        assert!(f.matches(agent_id, &resources("cpus:2;mem:512"), now));
        assert!(f.matches(agent_id, &resources("cpus:4;mem:1024"), now));
        // A larger offer than was refused is not blocked.
        assert!(!f.matches(agent_id, &resources("cpus:8;mem:1024"), now));
        // Other agents are not blocked.
        assert!(!f.matches(AgentId::new(), &resources("cpus:2"), now));
    }

    #[test]
    fn test_expired_filter_does_not_match() {
        let agent_id = AgentId::new();
        let f = filter(agent_id, "cpus:4", Duration::from_secs(10));
        let later = Instant::now() + Duration::from_secs(11);
        assert!(!f.matches(agent_id, &resources("cpus:2"), later));
    }

    #[test]
    fn test_registry_detach_then_expire_is_noop() {
        let framework_id = FrameworkId::new();
        let agent_id = AgentId::new();
        let mut registry = FilterRegistry::new();

        let f = filter(agent_id, "cpus:4", Duration::from_secs(10));
        let filter_id = f.id;
        registry.insert(framework_id, f);
        assert_eq!(registry.count(framework_id), 1);

        assert_eq!(registry.detach_all(framework_id), 1);
        assert_eq!(registry.count(framework_id), 0);

        // The timer fires later; the identity is gone, so nothing happens.
        assert!(!registry.expire(framework_id, filter_id));
    }

    #[test]
    fn test_stale_timer_cannot_expire_newer_filter() {
        let framework_id = FrameworkId::new();
        let agent_id = AgentId::new();
        let mut registry = FilterRegistry::new();

        let old = filter(agent_id, "cpus:4", Duration::from_secs(10));
        let old_id = old.id;
        registry.insert(framework_id, old);
        registry.detach_all(framework_id);

        // A new filter occupies the same slot. The old timer's identity
        // must not touch it.
        let new = filter(agent_id, "cpus:4", Duration::from_secs(10));
        let new_id = new.id;
        registry.insert(framework_id, new);

        assert!(!registry.expire(framework_id, old_id));
        assert_eq!(registry.count(framework_id), 1);

        assert!(registry.expire(framework_id, new_id));
        assert_eq!(registry.count(framework_id), 0);
    }

    #[test]
    fn test_registry_matches_any_filter() {
        let framework_id = FrameworkId::new();
        let a1 = AgentId::new();
        let a2 = AgentId::new();
        let mut registry = FilterRegistry::new();

        registry.insert(framework_id, filter(a1, "cpus:4", Duration::from_secs(10)));
        registry.insert(framework_id, filter(a2, "mem:1024", Duration::from_secs(10)));

        let now = Instant::now();
        assert!(registry.matches(framework_id, a1, &resources("cpus:1"), now));
        assert!(registry.matches(framework_id, a2, &resources("mem:512"), now));
        assert!(!registry.matches(framework_id, a1, &resources("mem:512"), now));
        assert!(!registry.matches(FrameworkId::new(), a1, &resources("cpus:1"), now));
    }
}
