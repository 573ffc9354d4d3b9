//! The accounting ledger: who advertises what, who holds what.
//!
//! The ledger is the authoritative record of per-agent advertised capacity,
//! per-agent free resources, and per-framework outstanding allocation. It
//! maintains, by construction:
//!
//! - free(a) ≥ 0 and free(a) ⊆ advertised(a), for every agent a
//! - free(a) + Σ over frameworks of their allocation on a = advertised(a),
//!   whenever the outer master has delivered every pending
//!   `resources_recovered` (removal intentionally leaves resources parked
//!   until then, see [`Ledger::remove_framework`])
//!
//! Unknown-ID lookups return errors for the caller to log and drop.
//! Duplicate registration and accounting underflow panic: both mean the
//! outer master fed us a sequence that can only come from a bug, and
//! continuing would corrupt the books.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use flotilla_id::{AgentId, FrameworkId};
use flotilla_resources::Resources;

use super::{AgentInfo, AllocatorError, FrameworkInfo};

/// A registered agent.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub info: AgentInfo,
}

/// A registered framework.
#[derive(Debug, Clone)]
pub struct FrameworkRecord {
    pub info: FrameworkInfo,
    /// Inactive frameworks keep their allocation but receive no new offers.
    pub active: bool,
}

/// Authoritative allocation accounting.
#[derive(Debug, Default)]
pub struct Ledger {
    agents: HashMap<AgentId, AgentRecord>,
    frameworks: HashMap<FrameworkId, FrameworkRecord>,

    /// Sum of advertised capacity across registered agents; the
    /// denominator for dominant shares.
    total: Resources,

    /// Per-agent resources not currently allocated to any framework.
    free: HashMap<AgentId, Resources>,

    /// Per-framework resources held in outstanding offers and running
    /// tasks.
    allocated: HashMap<FrameworkId, Resources>,

    /// When set, agents whose hostname is absent are excluded from
    /// allocation. `None` accepts all agents.
    whitelist: Option<HashSet<String>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Agents
    // =========================================================================

    /// Registers an agent, crediting `used` to the frameworks already
    /// running on it. Entries for unknown frameworks are skipped (the
    /// removal may have crossed this registration in flight); the skipped
    /// resources stay free.
    ///
    /// Panics if the agent is already registered.
    pub fn add_agent(
        &mut self,
        agent_id: AgentId,
        info: AgentInfo,
        used: &HashMap<FrameworkId, Resources>,
    ) {
        assert!(
            !self.agents.contains_key(&agent_id),
            "duplicate agent registration: {agent_id}"
        );

        self.total += &info.resources;

        let mut unused = info.resources.clone();
        for (framework_id, resources) in used {
            match self.allocated.get_mut(framework_id) {
                Some(allocated) => {
                    *allocated += resources;
                    unused -= resources;
                }
                None => {
                    warn!(
                        agent_id = %agent_id,
                        framework_id = %framework_id,
                        resources = %resources,
                        "Agent reports usage for unknown framework; leaving it free"
                    );
                }
            }
        }

        info!(
            agent_id = %agent_id,
            hostname = %info.hostname,
            resources = %info.resources,
            free = %unused,
            "Added agent"
        );

        self.free.insert(agent_id, unused);
        self.agents.insert(agent_id, AgentRecord { info });
    }

    /// Unregisters an agent. Filters mentioning it are left to expire on
    /// their own.
    pub fn remove_agent(&mut self, agent_id: AgentId) -> Result<(), AllocatorError> {
        let record = self
            .agents
            .remove(&agent_id)
            .ok_or(AllocatorError::UnknownAgent(agent_id))?;

        self.total -= &record.info.resources;
        self.free.remove(&agent_id);

        info!(agent_id = %agent_id, hostname = %record.info.hostname, "Removed agent");
        Ok(())
    }

    // =========================================================================
    // Frameworks
    // =========================================================================

    /// Registers a framework holding `used` resources, active.
    ///
    /// Panics if the framework is already registered.
    pub fn add_framework(&mut self, framework_id: FrameworkId, info: FrameworkInfo, used: Resources) {
        assert!(
            !self.frameworks.contains_key(&framework_id),
            "duplicate framework registration: {framework_id}"
        );

        info!(framework_id = %framework_id, name = %info.name, "Added framework");

        self.allocated.insert(framework_id, used);
        self.frameworks
            .insert(framework_id, FrameworkRecord { info, active: true });
    }

    pub fn activate_framework(
        &mut self,
        framework_id: FrameworkId,
        info: FrameworkInfo,
    ) -> Result<(), AllocatorError> {
        let record = self
            .frameworks
            .get_mut(&framework_id)
            .ok_or(AllocatorError::UnknownFramework(framework_id))?;

        record.info = info;
        record.active = true;
        info!(framework_id = %framework_id, "Activated framework");
        Ok(())
    }

    /// Deactivation preserves the allocation: pending offers may still be
    /// accepted or declined by the departing scheduler.
    pub fn deactivate_framework(&mut self, framework_id: FrameworkId) -> Result<(), AllocatorError> {
        let record = self
            .frameworks
            .get_mut(&framework_id)
            .ok_or(AllocatorError::UnknownFramework(framework_id))?;

        record.active = false;
        info!(framework_id = %framework_id, "Deactivated framework");
        Ok(())
    }

    /// Unregisters a framework.
    ///
    /// Outstanding resources are NOT returned here. The outer master owns
    /// the canonical list of in-flight offers (it must send rescinds), and
    /// will deliver one `resources_recovered` per outstanding offer;
    /// returning them on both paths would double-credit the books.
    pub fn remove_framework(&mut self, framework_id: FrameworkId) -> Result<(), AllocatorError> {
        if self.frameworks.remove(&framework_id).is_none() {
            return Err(AllocatorError::UnknownFramework(framework_id));
        }

        let outstanding = self.allocated.remove(&framework_id).unwrap_or_default();
        if !outstanding.is_empty() {
            debug!(
                framework_id = %framework_id,
                outstanding = %outstanding,
                "Removed framework with outstanding resources; awaiting recovery"
            );
        }

        info!(framework_id = %framework_id, "Removed framework");
        Ok(())
    }

    // =========================================================================
    // Resource movement
    // =========================================================================

    /// Moves resources from an agent's free pool to a framework, as part of
    /// an offer. The framework must be registered.
    pub fn grant(&mut self, framework_id: FrameworkId, agent_id: AgentId, resources: &Resources) {
        let allocated = self
            .allocated
            .get_mut(&framework_id)
            .unwrap_or_else(|| panic!("grant to unregistered framework {framework_id}"));
        *allocated += resources;

        let free = self
            .free
            .get_mut(&agent_id)
            .unwrap_or_else(|| panic!("grant from unregistered agent {agent_id}"));
        *free -= resources;
    }

    /// Returns declined resources from a framework to an agent's free pool.
    /// Both sides must still be registered.
    ///
    /// Panics if the framework does not hold the returned resources
    /// (accounting underflow: the same resources were returned twice).
    pub fn release_unused(
        &mut self,
        framework_id: FrameworkId,
        agent_id: AgentId,
        resources: &Resources,
    ) -> Result<(), AllocatorError> {
        if !self.frameworks.contains_key(&framework_id) {
            return Err(AllocatorError::UnknownFramework(framework_id));
        }
        if !self.agents.contains_key(&agent_id) {
            return Err(AllocatorError::UnknownAgent(agent_id));
        }

        self.debit(framework_id, resources);
        *self.free.get_mut(&agent_id).expect("free entry exists for registered agent") +=
            resources;
        Ok(())
    }

    /// Returns recovered resources (task finished, offer rescinded, holder
    /// died). Each side is credited only if it still exists; a removal
    /// racing the recovery is routine, not an error.
    ///
    /// Returns true if the agent's free pool was credited.
    pub fn release_recovered(
        &mut self,
        framework_id: FrameworkId,
        agent_id: AgentId,
        resources: &Resources,
    ) -> bool {
        if self.frameworks.contains_key(&framework_id) {
            self.debit(framework_id, resources);
        }

        match self.free.get_mut(&agent_id) {
            Some(free) => {
                *free += resources;
                debug!(
                    framework_id = %framework_id,
                    agent_id = %agent_id,
                    resources = %resources,
                    "Recovered resources"
                );
                true
            }
            None => false,
        }
    }

    fn debit(&mut self, framework_id: FrameworkId, resources: &Resources) {
        let allocated = self
            .allocated
            .get_mut(&framework_id)
            .expect("allocation entry exists for registered framework");
        assert!(
            allocated.contains(resources),
            "accounting underflow: framework {framework_id} returned {resources} \
             but holds only {allocated}"
        );
        *allocated -= resources;
    }

    // =========================================================================
    // Whitelist
    // =========================================================================

    pub fn set_whitelist(&mut self, whitelist: Option<HashSet<String>>) {
        match &whitelist {
            Some(hostnames) => {
                info!(hostnames = ?hostnames, "Updated agent whitelist");
            }
            None => info!("Cleared agent whitelist; all agents accepted"),
        }
        self.whitelist = whitelist;
    }

    /// True if the agent may receive allocations under the current
    /// whitelist.
    pub fn is_whitelisted(&self, agent_id: AgentId) -> bool {
        let Some(record) = self.agents.get(&agent_id) else {
            return false;
        };
        match &self.whitelist {
            Some(hostnames) => hostnames.contains(&record.info.hostname),
            None => true,
        }
    }

    // =========================================================================
    // Views
    // =========================================================================

    pub fn total(&self) -> &Resources {
        &self.total
    }

    pub fn contains_framework(&self, framework_id: FrameworkId) -> bool {
        self.frameworks.contains_key(&framework_id)
    }

    pub fn contains_agent(&self, agent_id: AgentId) -> bool {
        self.agents.contains_key(&agent_id)
    }

    /// Free resources of one agent, if registered.
    pub fn free(&self, agent_id: AgentId) -> Option<&Resources> {
        self.free.get(&agent_id)
    }

    /// Outstanding allocation of one framework. Empty for unknown
    /// frameworks (their share is zero).
    pub fn allocated(&self, framework_id: FrameworkId) -> Resources {
        self.allocated.get(&framework_id).cloned().unwrap_or_default()
    }

    /// IDs of all registered frameworks, active or not.
    pub fn framework_ids(&self) -> Vec<FrameworkId> {
        self.frameworks.keys().copied().collect()
    }

    /// IDs of frameworks eligible for offers.
    pub fn active_framework_ids(&self) -> Vec<FrameworkId> {
        self.frameworks
            .iter()
            .filter(|(_, record)| record.active)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.keys().copied().collect()
    }

    /// Verifies the per-agent bound free(a) ⊆ advertised(a). Cheap enough
    /// to run after every pass in debug builds; a violation means credited
    /// returns exceeded what the agent advertises.
    pub fn sanity_check(&self) {
        for (agent_id, free) in &self.free {
            let advertised = &self.agents[agent_id].info.resources;
            debug_assert!(
                advertised.contains(free),
                "agent {agent_id} free {free} exceeds advertised {advertised}"
            );
        }
    }
}
