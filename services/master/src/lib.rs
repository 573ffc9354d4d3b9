//! flotilla master library.
//!
//! The master is the central coordinator of the cluster: agents advertise
//! capacity to it, frameworks receive resource offers from it. This crate
//! holds the allocation and offer core: accounting, fairness, filters,
//! and the actor that ties them together. Sessions, wire protocol, and
//! offer-timeout rescinds live in the outer master and drive this crate
//! through [`allocator::Event`].
//!
//! The crate primarily ships a `master` binary, but exposes the allocator
//! as a library surface for integration testing and reuse.

pub mod allocator;
pub mod config;

pub use allocator::{
    AgentInfo, AllocatorError, AllocatorHandle, AllocatorStopped, DrfAllocator, Event,
    FrameworkInfo, Offer, RefusalFilters, Request,
};
pub use config::MasterConfig;
