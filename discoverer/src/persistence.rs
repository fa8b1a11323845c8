//! Wired-in [`PersistenceSink`] for a process with no database collaborator
//! configured: every write is logged at `debug!` and dropped. Real storage
//! is explicitly out of scope for this core; an embedder swaps this out for
//! a real implementation of the same trait.

use std::net::IpAddr;
use std::time::SystemTime;

use discovery_api::ServiceStatus;
use discoverer_core::collab::PersistenceSink;
use utils::id::{DCheckId, DRuleId};

pub struct NullPersistenceSink;

impl PersistenceSink for NullPersistenceSink {
    fn open(&self) -> anyhow::Result<()> {
        tracing::debug!("persistence: open");
        Ok(())
    }

    fn update_service(
        &self,
        druleid: DRuleId,
        ip: IpAddr,
        dcheckid: DCheckId,
        port: u16,
        status: ServiceStatus,
        value: &str,
        now: SystemTime,
    ) -> anyhow::Result<()> {
        tracing::debug!(%druleid, %ip, %dcheckid, port, ?status, value, ?now, "persistence: update_service");
        Ok(())
    }

    fn update_service_down(&self, dhostid: u64, now: SystemTime) -> anyhow::Result<()> {
        tracing::debug!(dhostid, ?now, "persistence: update_service_down");
        Ok(())
    }

    fn update_host(
        &self,
        druleid: DRuleId,
        ip: IpAddr,
        dnsname: &str,
        status: ServiceStatus,
        now: SystemTime,
    ) -> anyhow::Result<()> {
        tracing::debug!(%druleid, %ip, dnsname, ?status, ?now, "persistence: update_host");
        Ok(())
    }

    fn update_drule(&self, druleid: DRuleId, error: Option<&str>, now: SystemTime) -> anyhow::Result<()> {
        tracing::debug!(%druleid, error, ?now, "persistence: update_drule");
        Ok(())
    }

    fn find_host(&self, druleid: DRuleId, ip: IpAddr) -> anyhow::Result<Option<u64>> {
        tracing::debug!(%druleid, %ip, "persistence: find_host");
        Ok(None)
    }

    fn close(&self) -> anyhow::Result<()> {
        tracing::debug!("persistence: close");
        Ok(())
    }
}
