//! Proxy-group membership bookkeeping: [`ProxyGroupCache`] is the
//! authoritative `Proxy`/`ProxyGroup`/`HostProxyBinding` map, synced from
//! configuration and read by the ProxyGroupManager IPC endpoint.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use discovery_api::{HostProxyBinding, Proxy, ProxyGroup, ProxyGroupState, ProxyState};
use utils::id::{HostId, ProxyGroupId, ProxyId};

const DEFAULT_FAILOVER_DELAY: Duration = Duration::from_secs(60);
const FULL_SYNC_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

pub enum SyncMode {
    None,
    Full,
    Partial,
}

pub struct ProxySyncData {
    pub mode: SyncMode,
    pub revision: u64,
    pub failover_delay: Duration,
    pub deleted_hostids: Vec<HostId>,
}

pub struct ProxyGroupStats {
    pub name: String,
    pub state: ProxyGroupState,
    pub online_count: usize,
    pub proxy_ids: Vec<ProxyId>,
    pub host_count: usize,
    pub hostmap_revision: u64,
}

struct Inner {
    proxies: HashMap<ProxyId, Proxy>,
    groups: HashMap<ProxyGroupId, ProxyGroup>,
    bindings: HashMap<HostId, HostProxyBinding>,
    host_name_index: HashMap<String, HostId>,
    /// Looks up a group's id by name, for the `GET_STATS` endpoint, which
    /// addresses a group by name on the wire rather than by id.
    group_name_index: HashMap<String, ProxyGroupId>,
    /// Last rebalanced `hostid -> proxyid` assignment per group, so
    /// `cache_update_groups` can tell which proxy a host is leaving when it
    /// moves, and record the deletion there.
    group_assignment: HashMap<ProxyGroupId, HashMap<HostId, ProxyId>>,
}

/// Least-loaded-proxy selector used by [`ProxyGroupCache::cache_update_groups`]
/// to rebalance a group's hosts across its online proxies. Ordered by
/// declaration order, lower sorts first, same idea as a node-attachment
/// scheduling score: host count first (the thing we're balancing), proxy id
/// last purely to make ties deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ProxyLoadScore {
    host_count: usize,
    proxyid: ProxyId,
}

pub struct ProxyGroupCache {
    inner: RwLock<Inner>,
}

impl Default for ProxyGroupCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyGroupCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                proxies: HashMap::new(),
                groups: HashMap::new(),
                bindings: HashMap::new(),
                host_name_index: HashMap::new(),
                group_name_index: HashMap::new(),
                group_assignment: HashMap::new(),
            }),
        }
    }

    /// Upserts `rows` as the authoritative group set, deleting any group
    /// this set no longer names. An invalid `failover_delay` (zero) is
    /// replaced with the 60s default and a warning, rather than rejecting
    /// the whole row.
    pub fn sync_proxy_group(&self, rows: Vec<ProxyGroup>, _rev: u64) {
        let mut inner = self.inner.write().unwrap();
        let incoming: std::collections::HashSet<ProxyGroupId> = rows.iter().map(|g| g.proxy_groupid).collect();
        inner.groups.retain(|id, _| incoming.contains(id));
        inner.group_name_index.retain(|_, id| incoming.contains(id));

        for mut row in rows {
            if row.failover_delay.is_zero() {
                tracing::warn!(proxy_groupid = %row.proxy_groupid, "invalid failover_delay, defaulting to 60s");
                row.failover_delay = DEFAULT_FAILOVER_DELAY;
            }
            if let Some(existing) = inner.groups.get(&row.proxy_groupid) {
                if existing.name != row.name {
                    let old_name = existing.name.clone();
                    inner.group_name_index.remove(&old_name);
                }
            }
            inner.group_name_index.insert(row.name.clone(), row.proxy_groupid);
            inner.groups.insert(row.proxy_groupid, row);
        }
    }

    /// Upserts `rows` as the authoritative proxy set, deleting any proxy
    /// this set no longer names. A deleted proxy is also dropped from every
    /// group's `proxies` list so `cache_update_groups` never rebalances
    /// onto it.
    pub fn sync_proxy(&self, rows: Vec<Proxy>, _rev: u64) {
        let mut inner = self.inner.write().unwrap();
        let incoming: std::collections::HashSet<ProxyId> = rows.iter().map(|p| p.proxyid).collect();
        inner.proxies.retain(|id, _| incoming.contains(id));
        for group in inner.groups.values_mut() {
            group.proxies.retain(|id| incoming.contains(id));
        }
        for row in rows {
            inner.proxies.insert(row.proxyid, row);
        }
    }

    /// Upserts `rows` as the authoritative host-proxy binding set. A binding
    /// whose `host_name` changed from what the index last recorded is
    /// deregistered under the old name and reregistered under the new one.
    pub fn sync_host_proxy(&self, rows: Vec<HostProxyBinding>, _rev: u64) {
        let mut inner = self.inner.write().unwrap();
        let incoming: std::collections::HashSet<HostId> = rows.iter().map(|b| b.hostid).collect();
        let stale: Vec<HostId> = inner.bindings.keys().filter(|id| !incoming.contains(id)).copied().collect();
        for hostid in stale {
            if let Some(old) = inner.bindings.remove(&hostid) {
                inner.host_name_index.remove(&old.host_name);
            }
        }

        for row in rows {
            if let Some(old) = inner.bindings.get(&row.hostid) {
                if old.host_name != row.host_name {
                    let old_host_name = old.host_name.clone();
                    inner.host_name_index.remove(&old_host_name);
                }
            }
            inner.host_name_index.insert(row.host_name.clone(), row.hostid);
            inner.bindings.insert(row.hostid, row);
        }
    }

    /// Diffs the authoritative group map into `local`, updating `rev` to
    /// the highest revision observed. Inserts/updates are applied in
    /// place; groups no longer present are removed from `local` too.
    pub fn fetch_groups(&self, local: &mut HashMap<ProxyGroupId, ProxyGroup>, rev: &mut u64) {
        let inner = self.inner.read().unwrap();
        local.retain(|id, _| inner.groups.contains_key(id));
        for (id, group) in inner.groups.iter() {
            let changed = local.get(id).map(|existing| existing.revision != group.revision).unwrap_or(true);
            if changed {
                local.insert(*id, group.clone());
                *rev = (*rev).max(group.revision);
            }
        }
    }

    /// Diffs the authoritative proxy map into `local`, recording
    /// `(hostid, src_groupid, dst_groupid)` for every host bound to a proxy
    /// whose group membership moved since the last call — moving a proxy
    /// between groups takes every host it currently serves along with it.
    pub fn fetch_proxies(
        &self,
        local: &mut HashMap<ProxyId, Proxy>,
        rev: &mut u64,
        reloc_out: &mut Vec<(HostId, ProxyGroupId, ProxyGroupId)>,
    ) {
        let inner = self.inner.read().unwrap();
        for (id, proxy) in inner.proxies.iter() {
            let prior_group = local.get(id).and_then(|p| p.group);
            if prior_group != proxy.group {
                let src = prior_group.unwrap_or(ProxyGroupId::new(0));
                let dst = proxy.group.unwrap_or(ProxyGroupId::new(0));
                let hosts_served: Vec<HostId> = inner
                    .bindings
                    .values()
                    .filter(|b| b.proxyid == *id)
                    .map(|b| b.hostid)
                    .collect();
                for hostid in hosts_served {
                    reloc_out.push((hostid, src, dst));
                }
            }
            local.insert(*id, proxy.clone());
            *rev += 1;
        }
    }

    /// Applies a batch of `(hostid, src, dst)` group moves. `src == 0` means
    /// "no prior group"; `dst == 0` means "remove from all groups." Actual
    /// host placement onto a specific proxy happens in
    /// [`Self::cache_update_groups`], called once the batch is applied.
    pub fn update_host_pgroup(&self, batch: Vec<(HostId, ProxyGroupId, ProxyGroupId)>) {
        let mut inner = self.inner.write().unwrap();
        for (hostid, src, dst) in batch {
            if src.get() != 0 {
                if let Some(group) = inner.groups.get_mut(&src) {
                    group.hostids.retain(|h| *h != hostid);
                }
            }
            if dst.get() != 0 {
                if let Some(group) = inner.groups.get_mut(&dst) {
                    if !group.hostids.contains(&hostid) {
                        group.hostids.push(hostid);
                    }
                }
            }
        }
    }

    /// Rebalances every group's hosts across its online proxies by current
    /// load, bumping `hostmap_revision` and recording per-proxy deletions so
    /// `get_proxy_sync_data` can serve a partial delta next poll.
    pub fn cache_update_groups(&self) {
        let mut inner = self.inner.write().unwrap();
        let group_ids: Vec<ProxyGroupId> = inner.groups.keys().copied().collect();
        for group_id in group_ids {
            let (online_proxies, hostids) = {
                let group = &inner.groups[&group_id];
                let online: Vec<ProxyId> = group
                    .proxies
                    .iter()
                    .filter(|pid| inner.proxies.get(pid).map(Proxy::is_online).unwrap_or(false))
                    .copied()
                    .collect();
                (online, group.hostids.clone())
            };
            if online_proxies.is_empty() {
                continue;
            }

            let mut new_assignment: HashMap<HostId, ProxyId> = HashMap::new();
            let mut load: HashMap<ProxyId, usize> = online_proxies.iter().map(|p| (*p, 0)).collect();
            for hostid in hostids {
                let chosen = online_proxies
                    .iter()
                    .map(|pid| ProxyLoadScore {
                        host_count: load[pid],
                        proxyid: *pid,
                    })
                    .min()
                    .map(|score| score.proxyid)
                    .expect("online_proxies is non-empty");
                *load.get_mut(&chosen).unwrap() += 1;
                new_assignment.insert(hostid, chosen);
            }

            let previous = inner.group_assignment.remove(&group_id).unwrap_or_default();
            if new_assignment != previous {
                let new_revision = inner.groups[&group_id].hostmap_revision + 1;
                for (hostid, old_proxyid) in &previous {
                    if new_assignment.get(hostid) != Some(old_proxyid) {
                        if let Some(proxy) = inner.proxies.get_mut(old_proxyid) {
                            proxy.deleted_group_hosts.push((*hostid, new_revision));
                        }
                    }
                }

                if let Some(group) = inner.groups.get_mut(&group_id) {
                    group.hostmap_revision = new_revision;
                }
                crate::metrics::HOSTMAP_REVISION
                    .with_label_values(&[&group_id.to_string()])
                    .set(new_revision as i64);
            }

            inner.group_assignment.insert(group_id, new_assignment);
        }
    }

    pub fn update_proxy_lastaccess(&self, proxyid: ProxyId, ts: SystemTime) {
        let mut inner = self.inner.write().unwrap();
        if let Some(proxy) = inner.proxies.get_mut(&proxyid) {
            proxy.lastaccess = ts;
            proxy.state = ProxyState::Online;
        }
    }

    pub fn get_proxy_sync_data(&self, proxyid: ProxyId, client_hostmap_revision: u64, now: SystemTime) -> ProxySyncData {
        let inner = self.inner.read().unwrap();
        let Some(proxy) = inner.proxies.get(&proxyid) else {
            return ProxySyncData { mode: SyncMode::None, revision: 0, failover_delay: DEFAULT_FAILOVER_DELAY, deleted_hostids: Vec::new() };
        };
        let Some(group_id) = proxy.group else {
            return ProxySyncData { mode: SyncMode::None, revision: 0, failover_delay: DEFAULT_FAILOVER_DELAY, deleted_hostids: Vec::new() };
        };
        let group = &inner.groups[&group_id];
        let stale = now.duration_since(proxy.sync_time).unwrap_or(Duration::ZERO) > FULL_SYNC_MAX_AGE;

        if client_hostmap_revision == 0 || client_hostmap_revision > group.hostmap_revision || stale {
            return ProxySyncData {
                mode: SyncMode::Full,
                revision: group.hostmap_revision,
                failover_delay: group.failover_delay,
                deleted_hostids: Vec::new(),
            };
        }

        let deleted_hostids = proxy
            .deleted_group_hosts
            .iter()
            .filter(|(_, rev)| *rev > client_hostmap_revision)
            .map(|(hostid, _)| *hostid)
            .collect();

        ProxySyncData {
            mode: SyncMode::Partial,
            revision: group.hostmap_revision,
            failover_delay: group.failover_delay,
            deleted_hostids,
        }
    }

    pub fn get_proxy_group_stats(&self, proxy_groupid: ProxyGroupId) -> Option<ProxyGroupStats> {
        let inner = self.inner.read().unwrap();
        let group = inner.groups.get(&proxy_groupid)?;
        Some(Self::stats_for_group(&inner, group))
    }

    /// Same as [`Self::get_proxy_group_stats`], but addressed by name —
    /// the `GET_STATS` wire request carries a group name, not an id.
    pub fn get_proxy_group_stats_by_name(&self, name: &str) -> Option<ProxyGroupStats> {
        let inner = self.inner.read().unwrap();
        let group_id = inner.group_name_index.get(name)?;
        let group = inner.groups.get(group_id)?;
        Some(Self::stats_for_group(&inner, group))
    }

    fn stats_for_group(inner: &Inner, group: &ProxyGroup) -> ProxyGroupStats {
        let online_count = group.proxies.iter().filter(|pid| inner.proxies.get(pid).map(Proxy::is_online).unwrap_or(false)).count();
        ProxyGroupStats {
            name: group.name.clone(),
            state: group.state,
            online_count,
            proxy_ids: group.proxies.clone(),
            host_count: group.hostids.len(),
            hostmap_revision: group.hostmap_revision,
        }
    }

    /// Resolves `hostname` to a redirect target only when the locally-bound
    /// proxy is not `local_proxyid`, or is failing over (last seen and last
    /// redirected both older than the group's `failover_delay`). A
    /// failover-triggered redirect stamps `binding.lastreset = now`, which
    /// suppresses repeat redirects for the next `failover_delay`.
    pub fn get_host_redirect(&self, hostname: &str, local_proxyid: ProxyId, now: SystemTime) -> Option<String> {
        let mut inner = self.inner.write().unwrap();
        let hostid = *inner.host_name_index.get(hostname)?;
        let binding = inner.bindings.get(&hostid)?.clone();
        let proxy = inner.proxies.get(&binding.proxyid)?.clone();
        let failover_delay = proxy
            .group
            .and_then(|id| inner.groups.get(&id))
            .map(|g| g.failover_delay)
            .unwrap_or(DEFAULT_FAILOVER_DELAY);

        if binding.proxyid != local_proxyid {
            return Some(format!("{}:{}", proxy.local_address, proxy.local_port));
        }

        let is_failing_over = now.duration_since(proxy.lastaccess).unwrap_or(Duration::ZERO) > failover_delay
            && now.duration_since(binding.lastreset).unwrap_or(Duration::ZERO) > failover_delay;

        if is_failing_over {
            if let Some(binding) = inner.bindings.get_mut(&hostid) {
                binding.lastreset = now;
            }
            Some(format!("{}:{}", proxy.local_address, proxy.local_port))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(id: u64, group: Option<u64>, state: ProxyState) -> Proxy {
        Proxy {
            proxyid: ProxyId::new(id),
            name: format!("proxy{id}"),
            group: group.map(ProxyGroupId::new),
            local_address: "127.0.0.1".to_owned(),
            local_port: "10051".to_owned(),
            lastaccess: SystemTime::UNIX_EPOCH,
            deleted_group_hosts: Vec::new(),
            sync_time: SystemTime::UNIX_EPOCH,
            state,
        }
    }

    fn group(id: u64, proxies: Vec<u64>, hostids: Vec<u64>) -> ProxyGroup {
        ProxyGroup {
            proxy_groupid: ProxyGroupId::new(id),
            name: format!("group{id}"),
            failover_delay: DEFAULT_FAILOVER_DELAY,
            min_online: 1,
            proxies: proxies.into_iter().map(ProxyId::new).collect(),
            hostids: hostids.into_iter().map(HostId::new).collect(),
            hostmap_revision: 0,
            revision: 1,
            state: ProxyGroupState::Active,
        }
    }

    #[test]
    fn sync_proxy_group_defaults_invalid_failover_delay() {
        let cache = ProxyGroupCache::new();
        let mut row = group(1, vec![], vec![]);
        row.failover_delay = Duration::ZERO;
        cache.sync_proxy_group(vec![row], 1);

        let stats = cache.get_proxy_group_stats(ProxyGroupId::new(1)).unwrap();
        assert_eq!(stats.online_count, 0);
    }

    #[test]
    fn cache_update_groups_does_not_advance_revision_without_a_membership_change() {
        let cache = ProxyGroupCache::new();
        cache.sync_proxy_group(vec![group(1, vec![10, 11], vec![])], 1);
        {
            let mut inner = cache.inner.write().unwrap();
            inner.proxies.insert(ProxyId::new(10), proxy(10, Some(1), ProxyState::Online));
            inner.proxies.insert(ProxyId::new(11), proxy(11, Some(1), ProxyState::Online));
        }

        cache.cache_update_groups();
        let before = cache.get_proxy_group_stats(ProxyGroupId::new(1)).unwrap().hostmap_revision;
        assert_eq!(before, 0, "no hosts were ever assigned, so nothing changed");

        cache.cache_update_groups();
        let after = cache.get_proxy_group_stats(ProxyGroupId::new(1)).unwrap().hostmap_revision;
        assert_eq!(after, before, "a second call with nothing to rebalance must not bump the revision");
    }

    #[test]
    fn cache_update_groups_distributes_hosts_across_online_proxies_evenly() {
        let cache = ProxyGroupCache::new();
        cache.sync_proxy_group(vec![group(1, vec![10, 11], vec![100, 101, 102, 103])], 1);
        {
            let mut inner = cache.inner.write().unwrap();
            inner.proxies.insert(ProxyId::new(10), proxy(10, Some(1), ProxyState::Online));
            inner.proxies.insert(ProxyId::new(11), proxy(11, Some(1), ProxyState::Online));
        }

        cache.cache_update_groups();

        let stats = cache.get_proxy_group_stats(ProxyGroupId::new(1)).unwrap();
        assert_eq!(stats.online_count, 2);
    }

    #[test]
    fn get_proxy_sync_data_is_full_for_a_fresh_client() {
        let cache = ProxyGroupCache::new();
        cache.sync_proxy_group(vec![group(1, vec![10], vec![])], 1);
        {
            let mut inner = cache.inner.write().unwrap();
            inner.proxies.insert(ProxyId::new(10), proxy(10, Some(1), ProxyState::Online));
        }

        let data = cache.get_proxy_sync_data(ProxyId::new(10), 0, SystemTime::UNIX_EPOCH);
        assert!(matches!(data.mode, SyncMode::Full));
    }

    #[test]
    fn get_host_redirect_returns_none_when_already_on_the_bound_proxy() {
        let cache = ProxyGroupCache::new();
        cache.sync_proxy_group(vec![group(1, vec![10], vec![])], 1);
        {
            let mut inner = cache.inner.write().unwrap();
            inner.proxies.insert(ProxyId::new(10), proxy(10, Some(1), ProxyState::Online));
        }
        cache.sync_host_proxy(
            vec![HostProxyBinding {
                host_name: "host1".to_owned(),
                hostid: HostId::new(5),
                proxyid: ProxyId::new(10),
                revision: 1,
                lastreset: SystemTime::UNIX_EPOCH,
            }],
            1,
        );

        let redirect = cache.get_host_redirect("host1", ProxyId::new(10), SystemTime::UNIX_EPOCH);
        assert!(redirect.is_none());
    }
}
