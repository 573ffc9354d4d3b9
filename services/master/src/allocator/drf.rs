//! Dominant-resource fairness and the allocation pass.
//!
//! Every pass orders the active frameworks by dominant share (the largest
//! fraction of any cluster scalar the framework currently holds) and
//! greedily hands each framework, lowest share first, the whole free
//! capacity of every agent it does not filter. Granting whole agents to the
//! lowest-share framework maximises per-pass progress toward equal shares
//! and keeps the pass O(frameworks × agents); skipping an agent can only be
//! caused by a refusal filter, so backtracking would buy nothing.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, trace};

use flotilla_id::{AgentId, FilterId, FrameworkId};
use flotilla_resources::{Resources, Value};

use crate::config::MasterConfig;

use super::filter::{FilterRegistry, InstalledFilter, RefusedFilter};
use super::ledger::Ledger;
use super::{AgentInfo, AllocatorError, FrameworkInfo, Offer, RefusalFilters, Request};

/// The dominant share of a framework: the maximum, over scalar resources
/// the cluster actually has, of the fraction the framework holds.
///
/// Non-scalar resources (ports, sets) do not influence fairness.
pub fn dominant_share(allocated: &Resources, total: &Resources) -> f64 {
    let mut share: f64 = 0.0;
    for (name, value) in total.iter() {
        if let Value::Scalar(cluster_total) = value {
            if *cluster_total > 0.0 {
                share = share.max(allocated.scalar(name) / cluster_total);
            }
        }
    }
    share
}

/// The dominant-share allocator: ledger, filters, and the pass itself.
///
/// This is the synchronous core. It never sleeps and never spawns; the
/// surrounding actor delivers events one at a time, forwards the returned
/// offers, and schedules expiry timers for the filters reported back.
#[derive(Debug)]
pub struct DrfAllocator {
    config: MasterConfig,
    ledger: Ledger,
    filters: FilterRegistry,
}

impl DrfAllocator {
    pub fn new(config: MasterConfig) -> Self {
        Self {
            config,
            ledger: Ledger::new(),
            filters: FilterRegistry::new(),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    // =========================================================================
    // Framework events
    // =========================================================================

    /// Registers a framework and runs a global pass: the newcomer has the
    /// lowest share and should see free capacity immediately.
    pub fn framework_added(
        &mut self,
        framework_id: FrameworkId,
        info: FrameworkInfo,
        used: Resources,
    ) -> Vec<Offer> {
        self.ledger.add_framework(framework_id, info, used);
        self.allocate_all()
    }

    pub fn framework_activated(
        &mut self,
        framework_id: FrameworkId,
        info: FrameworkInfo,
    ) -> Result<Vec<Offer>, AllocatorError> {
        self.ledger.activate_framework(framework_id, info)?;
        Ok(self.allocate_all())
    }

    pub fn framework_deactivated(&mut self, framework_id: FrameworkId) -> Result<(), AllocatorError> {
        self.ledger.deactivate_framework(framework_id)
    }

    /// Removes a framework and detaches its filters. Pending filter expiry
    /// timers become no-ops. Outstanding resources stay parked until the
    /// outer master recovers them offer by offer.
    pub fn framework_removed(&mut self, framework_id: FrameworkId) -> Result<Vec<Offer>, AllocatorError> {
        self.ledger.remove_framework(framework_id)?;

        let detached = self.filters.detach_all(framework_id);
        if detached > 0 {
            debug!(framework_id = %framework_id, detached, "Detached filters of removed framework");
        }

        Ok(self.allocate_all())
    }

    // =========================================================================
    // Agent events
    // =========================================================================

    /// Registers an agent and runs a pass targeted at it.
    pub fn agent_added(
        &mut self,
        agent_id: AgentId,
        info: AgentInfo,
        used: &HashMap<FrameworkId, Resources>,
    ) -> Vec<Offer> {
        self.ledger.add_agent(agent_id, info, used);
        self.allocate_agents(vec![agent_id])
    }

    pub fn agent_removed(&mut self, agent_id: AgentId) -> Result<(), AllocatorError> {
        // Filters naming this agent are left to expire naturally.
        self.ledger.remove_agent(agent_id)
    }

    // =========================================================================
    // Resource events
    // =========================================================================

    /// Advisory only: the reference policy allocates from offers, not
    /// requests.
    pub fn resources_requested(&self, framework_id: FrameworkId, requests: &[Request]) {
        info!(
            framework_id = %framework_id,
            count = requests.len(),
            "Received resource request (advisory, ignored by policy)"
        );
    }

    /// A framework declined (part of) an offer. The resources go back to
    /// the agent's free pool, and unless the framework asked otherwise, a
    /// refusal filter keeps us from re-offering the same slice right away.
    ///
    /// Returns the offers of the follow-up pass and, when a filter was
    /// installed, its identity and deadline for the caller's timer.
    pub fn resources_unused(
        &mut self,
        framework_id: FrameworkId,
        agent_id: AgentId,
        resources: Resources,
        refusal: Option<RefusalFilters>,
    ) -> Result<(Vec<Offer>, Option<InstalledFilter>), AllocatorError> {
        if resources.allocatable().is_empty() {
            return Ok((Vec::new(), None));
        }

        self.ledger.release_unused(framework_id, agent_id, &resources)?;

        debug!(
            framework_id = %framework_id,
            agent_id = %agent_id,
            resources = %resources,
            "Framework left resources unused"
        );

        let refuse_seconds = refusal.map_or(self.config.default_refuse_seconds, |r| r.refuse_seconds);

        let installed = if refuse_seconds.is_finite() && refuse_seconds > 0.0 {
            let filter = RefusedFilter {
                id: FilterId::new(),
                agent_id,
                resources: resources.clone(),
                deadline: Instant::now() + Duration::from_secs_f64(refuse_seconds),
            };
            let installed = InstalledFilter {
                framework_id,
                filter_id: filter.id,
                deadline: filter.deadline,
            };

            info!(
                framework_id = %framework_id,
                agent_id = %agent_id,
                refuse_seconds,
                "Installed refusal filter"
            );

            self.filters.insert(framework_id, filter);
            Some(installed)
        } else {
            None
        };

        Ok((self.allocate_agents(vec![agent_id]), installed))
    }

    /// Resources came back without the framework declining them: a task
    /// finished, an offer timed out and was rescinded, or the holder died.
    /// Either side may already be gone; whatever remains is credited.
    pub fn resources_recovered(
        &mut self,
        framework_id: FrameworkId,
        agent_id: AgentId,
        resources: Resources,
    ) -> Vec<Offer> {
        if resources.allocatable().is_empty() {
            return Vec::new();
        }

        if self.ledger.release_recovered(framework_id, agent_id, &resources) {
            self.allocate_agents(vec![agent_id])
        } else {
            Vec::new()
        }
    }

    /// Clears all refusal filters of a framework and reruns allocation.
    pub fn offers_revived(&mut self, framework_id: FrameworkId) -> Result<Vec<Offer>, AllocatorError> {
        if !self.ledger.contains_framework(framework_id) {
            return Err(AllocatorError::UnknownFramework(framework_id));
        }

        let detached = self.filters.detach_all(framework_id);
        info!(framework_id = %framework_id, detached, "Revived offers");

        Ok(self.allocate_all())
    }

    // =========================================================================
    // Timers
    // =========================================================================

    /// Periodic batch pass over the whole cluster.
    pub fn tick(&mut self) -> Vec<Offer> {
        self.allocate_all()
    }

    /// A refusal filter's timer fired. If the identity is still attached
    /// the filter is removed and the freed match-space reallocated; a
    /// detached identity (revival, removal) is a no-op.
    pub fn filter_expired(&mut self, framework_id: FrameworkId, filter_id: FilterId) -> Vec<Offer> {
        if !self.filters.expire(framework_id, filter_id) {
            return Vec::new();
        }

        debug!(framework_id = %framework_id, filter_id = %filter_id, "Refusal filter expired");
        self.allocate_all()
    }

    // =========================================================================
    // Whitelist
    // =========================================================================

    pub fn update_whitelist(&mut self, whitelist: Option<HashSet<String>>) -> Vec<Offer> {
        self.ledger.set_whitelist(whitelist);
        self.allocate_all()
    }

    // =========================================================================
    // The pass
    // =========================================================================

    fn allocate_all(&mut self) -> Vec<Offer> {
        self.allocate_agents(self.ledger.agent_ids())
    }

    /// One allocation pass over `agent_ids`.
    fn allocate_agents(&mut self, mut agent_ids: Vec<AgentId>) -> Vec<Offer> {
        let framework_ids = self.ledger.active_framework_ids();
        if framework_ids.is_empty() {
            trace!("No active frameworks to allocate to");
            return Vec::new();
        }

        // Order frameworks by dominant share, ascending, ties by ID so the
        // outcome is a pure function of the snapshot.
        let total = self.ledger.total();
        let mut ordered: Vec<(f64, FrameworkId)> = framework_ids
            .into_iter()
            .map(|id| (dominant_share(&self.ledger.allocated(id), total), id))
            .collect();
        ordered.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });

        // Collect what each considered agent can offer, in ID order for
        // determinism.
        agent_ids.sort();
        agent_ids.dedup();

        let mut available: Vec<(AgentId, Resources)> = Vec::new();
        for agent_id in agent_ids {
            let Some(free) = self.ledger.free(agent_id) else {
                continue;
            };
            if !self.ledger.is_whitelisted(agent_id) {
                continue;
            }

            let offerable = free.allocatable();

            // Only offer agents carrying both a useful amount of cpu and of
            // memory. A mem-only offer would be declined on sight and the
            // default refusal filter would then hide the cpu that arrives a
            // moment later for the whole refusal interval.
            if offerable.scalar("cpus") >= self.config.min_cpus
                && offerable.scalar("mem") >= self.config.min_mem_mib
            {
                trace!(agent_id = %agent_id, resources = %offerable, "Agent has offerable resources");
                available.push((agent_id, offerable));
            }
        }

        if available.is_empty() {
            trace!("No resources available to allocate");
            return Vec::new();
        }

        let now = Instant::now();
        let mut offers = Vec::new();

        let ledger = &mut self.ledger;
        let filters = &self.filters;

        for (_, framework_id) in ordered {
            let mut granted: HashMap<AgentId, Resources> = HashMap::new();

            available.retain(|(agent_id, resources)| {
                if filters.matches(framework_id, *agent_id, resources, now) {
                    // Keep the agent for the next framework in line.
                    return true;
                }

                debug!(
                    framework_id = %framework_id,
                    agent_id = %agent_id,
                    resources = %resources,
                    "Offering resources"
                );
                ledger.grant(framework_id, *agent_id, resources);
                granted.insert(*agent_id, resources.clone());
                false
            });

            if !granted.is_empty() {
                offers.push(Offer {
                    framework_id,
                    resources: granted,
                });
            }
        }

        ledger.sanity_check();
        offers
    }
}
