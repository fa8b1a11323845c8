//! Proxy-group membership types: [`Proxy`], [`ProxyGroup`], and
//! [`HostProxyBinding`], maintained by `discoverer-core::proxy_group` and
//! exposed read-only over IPC.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use utils::id::{HostId, ProxyGroupId, ProxyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyState {
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proxy {
    pub proxyid: ProxyId,
    pub name: String,
    pub group: Option<ProxyGroupId>,
    pub local_address: String,
    pub local_port: String,
    #[serde(with = "systemtime_serde")]
    pub lastaccess: SystemTime,
    /// Hosts deleted from this proxy's assignment, each tagged with the
    /// `hostmap_revision` the deletion was recorded at — lets
    /// `get_proxy_sync_data` answer `PARTIAL` without re-sending the whole
    /// map.
    pub deleted_group_hosts: Vec<(HostId, u64)>,
    #[serde(with = "systemtime_serde")]
    pub sync_time: SystemTime,
    pub state: ProxyState,
}

impl Proxy {
    pub fn is_online(&self) -> bool {
        matches!(self.state, ProxyState::Online)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyGroupState {
    Active,
    Degraded,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyGroup {
    pub proxy_groupid: ProxyGroupId,
    pub name: String,
    pub failover_delay: std::time::Duration,
    pub min_online: u32,
    pub proxies: Vec<ProxyId>,
    pub hostids: Vec<HostId>,
    pub hostmap_revision: u64,
    pub revision: u64,
    pub state: ProxyGroupState,
}

/// Authoritative `hostname -> proxy` mapping used by `get_host_redirect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostProxyBinding {
    pub host_name: String,
    pub hostid: HostId,
    pub proxyid: ProxyId,
    pub revision: u64,
    /// When a redirect decision was last issued for this binding — guards
    /// against re-issuing a redirect within `failover_delay` of the last one.
    #[serde(with = "systemtime_serde")]
    pub lastreset: SystemTime,
}

pub(crate) mod systemtime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let secs = t
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        secs.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(UNIX_EPOCH + Duration::from_secs(secs))
    }
}
