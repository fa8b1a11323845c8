//! Protocol-level driver traits. The orchestration above (batching,
//! timeouts, SNMPv3 mutual exclusion, result shape) lives in this crate's
//! [`crate::sync_single`]/[`crate::icmp_batch`]/[`crate::async_range`]
//! modules; the wire protocols themselves are either a real Rust library
//! (ICMP over a raw socket, HTTP over `reqwest`) or a minimal trait with a
//! test double standing in for the real SNMP engine and agent dispatcher,
//! both explicitly out of scope.

use std::net::IpAddr;
use std::time::Duration;

use discoverer_core::error::CheckError;

/// One ICMP echo sweep over a batch of addresses. A real implementation
/// owns one raw socket shared process-wide; see [`crate::icmp::Socket2IcmpDriver`].
pub trait IcmpDriver: Send + Sync {
    fn ping_batch(&self, addrs: &[IpAddr], timeout: Duration) -> Result<Vec<IpAddr>, CheckError>;
}

/// The Zabbix-agent-protocol dispatcher (`system.uname`-style key/value
/// probes). Out of scope per this crate's non-goals; callers inject a test
/// double.
pub trait AgentDispatcher: Send + Sync {
    fn query(&self, addr: IpAddr, port: u16, key: &str, timeout: Duration) -> Result<String, CheckError>;
}

/// The SNMP engine (v1/v2c/v3 session handling, community/credential
/// plumbing). Out of scope per this crate's non-goals; callers inject a
/// test double or a real engine from outside this crate.
pub trait SnmpEngine: Send + Sync {
    fn get(&self, addr: IpAddr, port: u16, oid: &str, timeout: Duration) -> Result<String, CheckError>;
}

/// Default wiring for a process with no agent protocol implementation
/// available: every query fails as a probe failure rather than panicking.
pub struct NullAgentDispatcher;

impl AgentDispatcher for NullAgentDispatcher {
    fn query(&self, _addr: IpAddr, _port: u16, _key: &str, _timeout: Duration) -> Result<String, CheckError> {
        Err(CheckError::ProbeFailed("agent protocol not configured".to_owned()))
    }
}

/// Default wiring for a process with no SNMP engine available.
pub struct NullSnmpEngine;

impl SnmpEngine for NullSnmpEngine {
    fn get(&self, _addr: IpAddr, _port: u16, _oid: &str, _timeout: Duration) -> Result<String, CheckError> {
        Err(CheckError::ProbeFailed("snmp engine not configured".to_owned()))
    }
}
