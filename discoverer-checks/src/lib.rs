//! Concrete [`discoverer_core::Checker`] implementations: one per batch
//! kind a [`discovery_api::Task`] can carry.

pub mod async_range;
pub mod composite;
pub mod drivers;
pub mod icmp;
pub mod icmp_batch;
pub mod sync_single;

pub use async_range::AsyncRangeChecker;
pub use composite::CompositeChecker;
pub use drivers::{AgentDispatcher, IcmpDriver, NullAgentDispatcher, NullSnmpEngine, SnmpEngine};
pub use icmp::Socket2IcmpDriver;
pub use icmp_batch::IcmpBatchChecker;
pub use sync_single::SyncSingleChecker;
