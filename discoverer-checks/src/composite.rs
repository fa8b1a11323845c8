//! Routes a task to the `Checker` matching its `batch_kind`, so the worker
//! pool can hold one `Arc<dyn Checker>` regardless of which of the three
//! batch drivers a given task needs.

use discovery_api::{BatchKind, HostResult, Task};
use discoverer_core::checker::{CheckContext, Checker};
use discoverer_core::error::CheckBatchError;

use crate::async_range::AsyncRangeChecker;
use crate::drivers::SnmpEngine;
use crate::icmp_batch::IcmpBatchChecker;
use crate::sync_single::SyncSingleChecker;
use crate::{AgentDispatcher, IcmpDriver};

pub struct CompositeChecker<I, A, S> {
    sync_single: SyncSingleChecker<A>,
    icmp_batch: IcmpBatchChecker<I>,
    async_range: AsyncRangeChecker<S>,
}

impl<I: IcmpDriver, A: AgentDispatcher, S: SnmpEngine> CompositeChecker<I, A, S> {
    pub fn new(icmp_driver: I, agent_dispatcher: A, snmp_engine: S) -> anyhow::Result<Self> {
        Ok(Self {
            sync_single: SyncSingleChecker::new(agent_dispatcher),
            icmp_batch: IcmpBatchChecker::new(icmp_driver),
            async_range: AsyncRangeChecker::new(snmp_engine)?,
        })
    }
}

impl<I: IcmpDriver, A: AgentDispatcher, S: SnmpEngine> Checker for CompositeChecker<I, A, S> {
    fn dispatch_batch(&self, task: &mut Task, ctx: &CheckContext) -> Result<Vec<HostResult>, CheckBatchError> {
        match task.batch_kind {
            BatchKind::Sync => self.sync_single.dispatch_batch(task, ctx),
            BatchKind::Icmp => self.icmp_batch.dispatch_batch(task, ctx),
            BatchKind::Async => self.async_range.dispatch_batch(task, ctx),
        }
    }
}
