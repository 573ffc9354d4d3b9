//! Offer lifecycle scenarios against the allocator actor.
//!
//! These run under a paused tokio clock, so refusal expiry and the
//! periodic batch pass are exercised deterministically: `timeout` drives
//! the virtual clock forward only as far as the next armed timer.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use flotilla_id::{AgentId, FrameworkId, Ulid};
use flotilla_master::{
    allocator, AgentInfo, FrameworkInfo, MasterConfig, Offer, RefusalFilters,
};
use flotilla_resources::Resources;

fn fw(n: u64) -> FrameworkId {
    FrameworkId::from_ulid(Ulid::from_parts(n, 0))
}

fn agent(n: u64) -> AgentId {
    AgentId::from_ulid(Ulid::from_parts(n, 0))
}

fn res(text: &str) -> Resources {
    Resources::parse(text).unwrap()
}

fn fw_info(name: &str) -> FrameworkInfo {
    FrameworkInfo {
        name: name.to_string(),
        user: "tester".to_string(),
        role: None,
    }
}

fn ag_info(hostname: &str, capacity: &str) -> AgentInfo {
    AgentInfo {
        hostname: hostname.to_string(),
        resources: res(capacity),
    }
}

struct Harness {
    handle: allocator::AllocatorHandle,
    offers: mpsc::UnboundedReceiver<Offer>,
    shutdown: watch::Sender<bool>,
}

impl Harness {
    fn start() -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (handle, offers, _task) = allocator::spawn(MasterConfig::default(), shutdown_rx);
        Self {
            handle,
            offers,
            shutdown,
        }
    }

    /// Waits up to `window` of virtual time for an offer.
    async fn recv_within(&mut self, window: Duration) -> Option<Offer> {
        timeout(window, self.offers.recv()).await.ok().flatten()
    }

    async fn expect_offer(&mut self, window: Duration) -> Offer {
        self.recv_within(window).await.expect("expected an offer")
    }

    async fn expect_quiet(&mut self, window: Duration) {
        if let Some(offer) = self.recv_within(window).await {
            panic!("unexpected offer to {}", offer.framework_id);
        }
    }

    fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[tokio::test(start_paused = true)]
async fn refusal_holds_offers_until_the_filter_expires() {
    let mut h = Harness::start();
    let f = fw(1);
    let a = agent(1);

    h.handle
        .framework_added(f, fw_info("batch"), Resources::new())
        .await
        .unwrap();
    h.handle
        .agent_added(a, ag_info("host-1", "cpus:4;mem:1024"), HashMap::new())
        .await
        .unwrap();

    let offer = h.expect_offer(Duration::from_millis(100)).await;
    assert_eq!(offer.framework_id, f);

    // Decline everything for ten seconds.
    h.handle
        .resources_unused(
            f,
            a,
            offer.resources[&a].clone(),
            Some(RefusalFilters { refuse_seconds: 10.0 }),
        )
        .await
        .unwrap();

    // Batch passes keep running while the filter holds; none may offer.
    h.expect_quiet(Duration::from_secs_f64(9.5)).await;

    // Expiry fires at the ten-second mark and the agent comes back.
    let offer = h.expect_offer(Duration::from_secs(2)).await;
    assert_eq!(offer.framework_id, f);
    assert!(offer.resources[&a].equivalent(&res("cpus:4;mem:1024")));

    h.stop();
}

#[tokio::test(start_paused = true)]
async fn revival_reoffers_without_waiting_for_expiry() {
    let mut h = Harness::start();
    let f = fw(1);
    let a = agent(1);

    h.handle
        .framework_added(f, fw_info("batch"), Resources::new())
        .await
        .unwrap();
    h.handle
        .agent_added(a, ag_info("host-1", "cpus:4;mem:1024"), HashMap::new())
        .await
        .unwrap();

    let offer = h.expect_offer(Duration::from_millis(100)).await;
    h.handle
        .resources_unused(
            f,
            a,
            offer.resources[&a].clone(),
            Some(RefusalFilters { refuse_seconds: 10.0 }),
        )
        .await
        .unwrap();

    h.expect_quiet(Duration::from_secs_f64(1.5)).await;

    // Two seconds in, the scheduler changes its mind.
    h.handle.offers_revived(f).await.unwrap();
    let offer = h.expect_offer(Duration::from_millis(100)).await;
    assert_eq!(offer.framework_id, f);
    assert!(offer.resources.contains_key(&a));

    h.stop();
}

#[tokio::test(start_paused = true)]
async fn stale_expiry_timer_does_not_break_a_newer_filter() {
    let mut h = Harness::start();
    let f = fw(1);
    let a = agent(1);

    h.handle
        .framework_added(f, fw_info("batch"), Resources::new())
        .await
        .unwrap();
    h.handle
        .agent_added(a, ag_info("host-1", "cpus:4;mem:1024"), HashMap::new())
        .await
        .unwrap();
    let offer = h.expect_offer(Duration::from_millis(100)).await;

    // First refusal arms a ten-second timer.
    h.handle
        .resources_unused(
            f,
            a,
            offer.resources[&a].clone(),
            Some(RefusalFilters { refuse_seconds: 10.0 }),
        )
        .await
        .unwrap();

    // Revive early; the first filter is detached but its timer still
    // exists. Decline the fresh offer again for another ten seconds.
    h.expect_quiet(Duration::from_secs_f64(1.5)).await;
    h.handle.offers_revived(f).await.unwrap();
    let offer = h.expect_offer(Duration::from_millis(100)).await;
    h.handle
        .resources_unused(
            f,
            a,
            offer.resources[&a].clone(),
            Some(RefusalFilters { refuse_seconds: 10.0 }),
        )
        .await
        .unwrap();

    // The first timer fires around t+10 and finds its identity detached;
    // the second filter (expiring around t+11.6) must keep holding.
    h.expect_quiet(Duration::from_secs(9)).await;

    // Only the second filter's own expiry releases the agent.
    let offer = h.expect_offer(Duration::from_secs(3)).await;
    assert!(offer.resources[&a].equivalent(&res("cpus:4;mem:1024")));

    h.stop();
}

#[tokio::test(start_paused = true)]
async fn new_framework_takes_capacity_another_refused() {
    let mut h = Harness::start();
    let (f1, f2) = (fw(1), fw(2));
    let a = agent(1);

    h.handle
        .framework_added(f1, fw_info("one"), Resources::new())
        .await
        .unwrap();
    h.handle
        .agent_added(a, ag_info("host-1", "cpus:4;mem:1024"), HashMap::new())
        .await
        .unwrap();
    let offer = h.expect_offer(Duration::from_millis(100)).await;
    assert_eq!(offer.framework_id, f1);

    // f1 refuses; f2 registers afterwards and takes the agent instead.
    h.handle
        .resources_unused(
            f1,
            a,
            offer.resources[&a].clone(),
            Some(RefusalFilters { refuse_seconds: 30.0 }),
        )
        .await
        .unwrap();
    h.handle
        .framework_added(f2, fw_info("two"), Resources::new())
        .await
        .unwrap();

    let offer = h.expect_offer(Duration::from_secs(2)).await;
    assert_eq!(offer.framework_id, f2);

    h.stop();
}

#[tokio::test(start_paused = true)]
async fn invalid_resources_are_rejected_at_the_boundary() {
    let mut h = Harness::start();
    let f = fw(1);
    let a = agent(1);

    // A hand-built vector with a negative scalar must be rejected before
    // it reaches the ledger.
    let mut bad = Resources::new();
    bad.accumulate("cpus", flotilla_resources::Value::Scalar(-4.0));
    h.handle
        .agent_added(a, AgentInfo { hostname: "host-1".into(), resources: bad }, HashMap::new())
        .await
        .unwrap();

    // The agent was never registered, so a framework sees no offers.
    h.handle
        .framework_added(f, fw_info("batch"), Resources::new())
        .await
        .unwrap();
    h.expect_quiet(Duration::from_secs(2)).await;

    // The actor survived and keeps working.
    h.handle
        .agent_added(a, ag_info("host-1", "cpus:4;mem:1024"), HashMap::new())
        .await
        .unwrap();
    let offer = h.expect_offer(Duration::from_millis(100)).await;
    assert_eq!(offer.framework_id, f);

    h.stop();
}

#[tokio::test(start_paused = true)]
async fn shutdown_lets_inflight_timers_finish_as_noops() {
    let mut h = Harness::start();
    let f = fw(1);
    let a = agent(1);

    h.handle
        .framework_added(f, fw_info("batch"), Resources::new())
        .await
        .unwrap();
    h.handle
        .agent_added(a, ag_info("host-1", "cpus:4;mem:1024"), HashMap::new())
        .await
        .unwrap();
    let offer = h.expect_offer(Duration::from_millis(100)).await;

    // Arm a refusal timer, then shut down before it fires.
    h.handle
        .resources_unused(
            f,
            a,
            offer.resources[&a].clone(),
            Some(RefusalFilters { refuse_seconds: 5.0 }),
        )
        .await
        .unwrap();
    h.stop();

    // The timer fires into a closed mailbox; nothing panics and no offer
    // appears.
    h.expect_quiet(Duration::from_secs(10)).await;
    assert!(h.handle.tick().await.is_err());
}
