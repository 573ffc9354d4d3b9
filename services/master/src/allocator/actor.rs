//! The allocator actor: serialized event surface around [`DrfAllocator`].
//!
//! All ledger and filter mutation happens on one task. Inbound events queue
//! in an mpsc mailbox and are processed one at a time; a pass runs to
//! completion without yielding, so timer events (filter expiry, periodic
//! tick) always land between whole passes, never inside one. Offers flow
//! out on an unbounded channel; the consumer's own inbox decouples
//! delivery, and the allocator is never reentered from an offer handler.
//!
//! Filter expiry is implemented as spawned sleeps that post
//! [`Event::FilterExpired`] identity tokens back to the mailbox. After
//! shutdown the mailbox is gone and a firing timer's send fails, which is
//! exactly the required semantics: timers already in flight complete as
//! no-ops.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use flotilla_id::{AgentId, FilterId, FrameworkId};
use flotilla_resources::Resources;

use crate::config::MasterConfig;

use super::drf::DrfAllocator;
use super::filter::InstalledFilter;
use super::{AgentInfo, AllocatorError, FrameworkInfo, Offer, RefusalFilters, Request};

/// Mailbox capacity; sends back-pressure the outer master beyond this.
const MAILBOX_SIZE: usize = 256;

/// Inbound events. One variant per operation of the allocator surface,
/// plus the two self-posted timer events (`Tick` from the periodic
/// interval, `FilterExpired` from per-filter sleep tasks).
#[derive(Debug)]
pub enum Event {
    AgentAdded {
        agent_id: AgentId,
        info: AgentInfo,
        used: HashMap<FrameworkId, Resources>,
    },
    AgentRemoved {
        agent_id: AgentId,
    },
    FrameworkAdded {
        framework_id: FrameworkId,
        info: FrameworkInfo,
        used: Resources,
    },
    FrameworkActivated {
        framework_id: FrameworkId,
        info: FrameworkInfo,
    },
    FrameworkDeactivated {
        framework_id: FrameworkId,
    },
    FrameworkRemoved {
        framework_id: FrameworkId,
    },
    UpdateWhitelist {
        hostnames: Option<HashSet<String>>,
    },
    ResourcesRequested {
        framework_id: FrameworkId,
        requests: Vec<Request>,
    },
    ResourcesUnused {
        framework_id: FrameworkId,
        agent_id: AgentId,
        resources: Resources,
        filters: Option<RefusalFilters>,
    },
    ResourcesRecovered {
        framework_id: FrameworkId,
        agent_id: AgentId,
        resources: Resources,
    },
    OffersRevived {
        framework_id: FrameworkId,
    },
    Tick,
    FilterExpired {
        framework_id: FrameworkId,
        filter_id: FilterId,
    },
}

/// The allocator has shut down and no longer accepts events.
#[derive(Debug, Error)]
#[error("allocator has stopped")]
pub struct AllocatorStopped;

/// Handle for delivering events to the allocator actor.
#[derive(Clone)]
pub struct AllocatorHandle {
    tx: mpsc::Sender<Event>,
}

impl AllocatorHandle {
    /// Deliver a raw event.
    pub async fn send(&self, event: Event) -> Result<(), AllocatorStopped> {
        self.tx.send(event).await.map_err(|_| AllocatorStopped)
    }

    pub async fn agent_added(
        &self,
        agent_id: AgentId,
        info: AgentInfo,
        used: HashMap<FrameworkId, Resources>,
    ) -> Result<(), AllocatorStopped> {
        self.send(Event::AgentAdded { agent_id, info, used }).await
    }

    pub async fn agent_removed(&self, agent_id: AgentId) -> Result<(), AllocatorStopped> {
        self.send(Event::AgentRemoved { agent_id }).await
    }

    pub async fn framework_added(
        &self,
        framework_id: FrameworkId,
        info: FrameworkInfo,
        used: Resources,
    ) -> Result<(), AllocatorStopped> {
        self.send(Event::FrameworkAdded {
            framework_id,
            info,
            used,
        })
        .await
    }

    pub async fn framework_activated(
        &self,
        framework_id: FrameworkId,
        info: FrameworkInfo,
    ) -> Result<(), AllocatorStopped> {
        self.send(Event::FrameworkActivated { framework_id, info }).await
    }

    pub async fn framework_deactivated(
        &self,
        framework_id: FrameworkId,
    ) -> Result<(), AllocatorStopped> {
        self.send(Event::FrameworkDeactivated { framework_id }).await
    }

    pub async fn framework_removed(&self, framework_id: FrameworkId) -> Result<(), AllocatorStopped> {
        self.send(Event::FrameworkRemoved { framework_id }).await
    }

    pub async fn update_whitelist(
        &self,
        hostnames: Option<HashSet<String>>,
    ) -> Result<(), AllocatorStopped> {
        self.send(Event::UpdateWhitelist { hostnames }).await
    }

    pub async fn resources_requested(
        &self,
        framework_id: FrameworkId,
        requests: Vec<Request>,
    ) -> Result<(), AllocatorStopped> {
        self.send(Event::ResourcesRequested {
            framework_id,
            requests,
        })
        .await
    }

    pub async fn resources_unused(
        &self,
        framework_id: FrameworkId,
        agent_id: AgentId,
        resources: Resources,
        filters: Option<RefusalFilters>,
    ) -> Result<(), AllocatorStopped> {
        self.send(Event::ResourcesUnused {
            framework_id,
            agent_id,
            resources,
            filters,
        })
        .await
    }

    pub async fn resources_recovered(
        &self,
        framework_id: FrameworkId,
        agent_id: AgentId,
        resources: Resources,
    ) -> Result<(), AllocatorStopped> {
        self.send(Event::ResourcesRecovered {
            framework_id,
            agent_id,
            resources,
        })
        .await
    }

    pub async fn offers_revived(&self, framework_id: FrameworkId) -> Result<(), AllocatorStopped> {
        self.send(Event::OffersRevived { framework_id }).await
    }

    /// Force an immediate batch pass, in addition to the periodic one.
    pub async fn tick(&self) -> Result<(), AllocatorStopped> {
        self.send(Event::Tick).await
    }
}

/// Spawns the allocator actor.
///
/// Returns the event handle, the outbound offer stream, and the actor's
/// join handle. Flip the `shutdown` watch to stop it; timers still in
/// flight complete as no-ops.
pub fn spawn(
    config: MasterConfig,
    shutdown: watch::Receiver<bool>,
) -> (AllocatorHandle, mpsc::UnboundedReceiver<Offer>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(MAILBOX_SIZE);
    let (offers_tx, offers_rx) = mpsc::unbounded_channel();

    let core = DrfAllocator::new(config.clone());
    let timer_tx = tx.clone();

    let task = tokio::spawn(run(core, config, rx, shutdown, offers_tx, timer_tx));

    (AllocatorHandle { tx }, offers_rx, task)
}

async fn run(
    mut core: DrfAllocator,
    config: MasterConfig,
    mut rx: mpsc::Receiver<Event>,
    mut shutdown: watch::Receiver<bool>,
    offers_tx: mpsc::UnboundedSender<Offer>,
    timer_tx: mpsc::Sender<Event>,
) {
    info!(
        batch_seconds = config.batch_seconds,
        "Starting allocator actor"
    );

    let mut interval = tokio::time::interval(config.batch_interval());
    // A pass overrunning its period must not cause a burst of catch-up
    // passes; the next tick is scheduled from completion.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Consume the immediate first tick; the first batch pass happens one
    // full period after startup.
    interval.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Allocator actor shutting down");
                    break;
                }
            }

            maybe_event = rx.recv() => {
                match maybe_event {
                    Some(event) => handle_event(&mut core, event, &offers_tx, &timer_tx),
                    // Unreachable while we hold timer_tx, but harmless.
                    None => break,
                }
            }

            _ = interval.tick() => {
                emit_offers(&offers_tx, core.tick());
            }
        }
    }
}

fn handle_event(
    core: &mut DrfAllocator,
    event: Event,
    offers_tx: &mpsc::UnboundedSender<Offer>,
    timer_tx: &mpsc::Sender<Event>,
) {
    match event {
        Event::AgentAdded {
            agent_id,
            info,
            used,
        } => {
            if let Err(e) = info
                .resources
                .validate()
                .and_then(|()| used.values().try_for_each(Resources::validate))
            {
                let e = AllocatorError::InvalidResources(e);
                error!(agent_id = %agent_id, error = %e, "Rejected agent registration");
                return;
            }
            emit_offers(offers_tx, core.agent_added(agent_id, info, &used));
        }

        Event::AgentRemoved { agent_id } => {
            if let Err(e) = core.agent_removed(agent_id) {
                warn!(error = %e, "Dropped agent removal");
            }
        }

        Event::FrameworkAdded {
            framework_id,
            info,
            used,
        } => {
            if let Err(e) = used.validate() {
                let e = AllocatorError::InvalidResources(e);
                error!(
                    framework_id = %framework_id,
                    error = %e,
                    "Rejected framework registration"
                );
                return;
            }
            emit_offers(offers_tx, core.framework_added(framework_id, info, used));
        }

        Event::FrameworkActivated { framework_id, info } => {
            match core.framework_activated(framework_id, info) {
                Ok(offers) => emit_offers(offers_tx, offers),
                Err(e) => warn!(error = %e, "Dropped framework activation"),
            }
        }

        Event::FrameworkDeactivated { framework_id } => {
            if let Err(e) = core.framework_deactivated(framework_id) {
                warn!(error = %e, "Dropped framework deactivation");
            }
        }

        Event::FrameworkRemoved { framework_id } => match core.framework_removed(framework_id) {
            Ok(offers) => emit_offers(offers_tx, offers),
            Err(e) => warn!(error = %e, "Dropped framework removal"),
        },

        Event::UpdateWhitelist { hostnames } => {
            emit_offers(offers_tx, core.update_whitelist(hostnames));
        }

        Event::ResourcesRequested {
            framework_id,
            requests,
        } => {
            core.resources_requested(framework_id, &requests);
        }

        Event::ResourcesUnused {
            framework_id,
            agent_id,
            resources,
            filters,
        } => {
            if let Err(e) = resources.validate() {
                let e = AllocatorError::InvalidResources(e);
                error!(
                    framework_id = %framework_id,
                    error = %e,
                    "Rejected refusal with invalid resources"
                );
                return;
            }
            match core.resources_unused(framework_id, agent_id, resources, filters) {
                Ok((offers, installed)) => {
                    emit_offers(offers_tx, offers);
                    if let Some(installed) = installed {
                        schedule_expiry(timer_tx, installed);
                    }
                }
                Err(e) => warn!(error = %e, "Dropped resource refusal"),
            }
        }

        Event::ResourcesRecovered {
            framework_id,
            agent_id,
            resources,
        } => {
            if let Err(e) = resources.validate() {
                let e = AllocatorError::InvalidResources(e);
                error!(
                    framework_id = %framework_id,
                    error = %e,
                    "Rejected recovery with invalid resources"
                );
                return;
            }
            emit_offers(
                offers_tx,
                core.resources_recovered(framework_id, agent_id, resources),
            );
        }

        Event::OffersRevived { framework_id } => match core.offers_revived(framework_id) {
            Ok(offers) => emit_offers(offers_tx, offers),
            Err(e) => warn!(error = %e, "Dropped offer revival"),
        },

        Event::Tick => {
            emit_offers(offers_tx, core.tick());
        }

        Event::FilterExpired {
            framework_id,
            filter_id,
        } => {
            emit_offers(offers_tx, core.filter_expired(framework_id, filter_id));
        }
    }
}

/// Spawns the one-shot expiry timer for a freshly installed filter. The
/// timer carries only the filter's identity; if the filter is detached (or
/// the actor gone) before the deadline, the delivery is a no-op.
fn schedule_expiry(timer_tx: &mpsc::Sender<Event>, installed: InstalledFilter) {
    let tx = timer_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep_until(installed.deadline).await;
        let _ = tx
            .send(Event::FilterExpired {
                framework_id: installed.framework_id,
                filter_id: installed.filter_id,
            })
            .await;
    });
}

fn emit_offers(offers_tx: &mpsc::UnboundedSender<Offer>, offers: Vec<Offer>) {
    for offer in offers {
        debug!(
            framework_id = %offer.framework_id,
            agents = offer.resources.len(),
            "Emitting offer"
        );
        if offers_tx.send(offer).is_err() {
            debug!("Offer receiver dropped; discarding offer");
        }
    }
}
