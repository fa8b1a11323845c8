//! The result accumulator. Guarded by a mutex distinct from [`crate::queue::Queue`]'s
//! — the two must never be held together across an I/O call, and whenever
//! both are needed in one critical section the order is Queue, then
//! ResultStore.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::SystemTime;

use discovery_api::{DiscoveredService, HostResult, Task};
use utils::id::DRuleId;

type Key = (DRuleId, IpAddr);

struct StoreInner {
    results: HashMap<Key, HostResult>,
    incomplete_checks_count: HashMap<Key, u64>,
}

pub struct ResultStore {
    inner: Mutex<StoreInner>,
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                results: HashMap::new(),
                incomplete_checks_count: HashMap::new(),
            }),
        }
    }

    /// Registers the number of checks still owed for `(druleid, ip)` —
    /// called once per IP when the scheduler expands a rule into tasks, so
    /// a CheckCount row exists before any worker result can decrement it.
    pub fn register_pending(&self, druleid: DRuleId, ip: IpAddr, count: u32) {
        let mut inner = self.inner.lock().unwrap();
        *inner.incomplete_checks_count.entry((druleid, ip)).or_insert(0) += count as u64;
    }

    /// Atomically decrements the CheckCount for `(druleid, ip)`. A missing
    /// key means the rule's revision has since changed underneath this
    /// result — the caller must discard the partial service rather than
    /// write it into `results`.
    pub fn decrement(&self, druleid: DRuleId, ip: IpAddr, by: u64) -> (u64, bool) {
        let mut inner = self.inner.lock().unwrap();
        let key = (druleid, ip);
        match inner.incomplete_checks_count.get_mut(&key) {
            Some(count) => {
                *count = count.saturating_sub(by);
                let remaining = *count;
                if remaining == 0 {
                    inner.incomplete_checks_count.remove(&key);
                }
                (remaining, true)
            }
            None => (0, false),
        }
    }

    fn merge_one(inner: &mut StoreInner, druleid: DRuleId, ip: IpAddr, partial: HostResult, by: u64) {
        let key = (druleid, ip);
        let remaining = match inner.incomplete_checks_count.get_mut(&key) {
            Some(count) => {
                *count = count.saturating_sub(by);
                let r = *count;
                if r == 0 {
                    inner.incomplete_checks_count.remove(&key);
                }
                Some(r)
            }
            None => None,
        };
        if remaining.is_none() {
            return;
        }
        let entry = inner.results.entry(key).or_insert_with(|| HostResult {
            druleid,
            ip: Some(ip),
            dnsname: partial.dnsname.clone(),
            services: Vec::new(),
            now: partial.now,
            unique_dcheckid: partial.unique_dcheckid,
            processed_checks_per_ip: partial.processed_checks_per_ip,
            error: None,
        });
        if entry.dnsname.is_empty() {
            entry.dnsname = partial.dnsname;
        }
        if entry.unique_dcheckid.is_none() {
            entry.unique_dcheckid = partial.unique_dcheckid;
        }
        entry.now = partial.now;
        entry.services.extend(partial.services);
    }

    /// Folds worker-produced partial results into the store. A result whose
    /// `processed_checks_per_ip` disagrees with `task`'s current per-ip
    /// share was produced against a task shape that no longer exists
    /// (revision skew) and is dropped without decrementing anything.
    pub fn merge_partial(&self, task: &Task, partials: Vec<HostResult>) {
        let expected = task.expected_checks_per_ip();
        let mut inner = self.inner.lock().unwrap();
        for partial in partials {
            if partial.processed_checks_per_ip != expected {
                continue;
            }
            let Some(ip) = partial.ip else { continue };
            Self::merge_one(&mut inner, task.druleid, ip, partial, 1);
        }
    }

    /// Used once a task has fully completed: walks every address the task
    /// covered, decrementing each by the task's fixed per-ip contribution.
    /// Addresses with no partial result that reach zero get an empty
    /// placeholder so the IP is recorded as "probed, no services" rather
    /// than silently vanishing.
    pub fn merge_fullrange(&self, task: &Task, partials: Vec<HostResult>, now: SystemTime) {
        let expected = task.expected_checks_per_ip() as u64;
        let mut by_ip: HashMap<IpAddr, Vec<DiscoveredService>> = HashMap::new();
        for partial in partials {
            if let Some(ip) = partial.ip {
                by_ip.entry(ip).or_default().extend(partial.services);
            }
        }

        let mut inner = self.inner.lock().unwrap();
        for ip in task.addrs() {
            let services = by_ip.remove(ip).unwrap_or_default();
            let partial = HostResult {
                druleid: task.druleid,
                ip: Some(*ip),
                dnsname: String::new(),
                services,
                now,
                unique_dcheckid: None,
                processed_checks_per_ip: expected as u32,
                error: None,
            };
            Self::merge_one(&mut inner, task.druleid, *ip, partial, expected);
        }
    }

    /// Extracts up to `batch_cap` completed rows, skipping any rule in
    /// `excluded_druleids` (retired by a revision change this tick — its
    /// rows are dropped by the scheduler, not flushed). Returns the
    /// extracted rows plus the set of druleids that still have incomplete
    /// entries remaining in the store.
    pub fn take_completed(
        &self,
        excluded_druleids: &HashSet<DRuleId>,
        batch_cap: usize,
    ) -> (Vec<HostResult>, bool) {
        let mut inner = self.inner.lock().unwrap();
        let mut ready_keys = Vec::new();
        for (key, _) in inner.results.iter() {
            if excluded_druleids.contains(&key.0) {
                continue;
            }
            if !inner.incomplete_checks_count.contains_key(key) {
                ready_keys.push(*key);
                if ready_keys.len() >= batch_cap {
                    break;
                }
            }
        }
        let more_remaining = inner.results.len() > ready_keys.len();
        let mut out = Vec::with_capacity(ready_keys.len());
        for key in ready_keys {
            if let Some(result) = inner.results.remove(&key) {
                out.push(result);
            }
        }
        (out, more_remaining)
    }

    /// Drops every result and CheckCount row belonging to `druleid` — called
    /// when a rule's revision changes and its in-flight work is cancelled.
    pub fn discard_rule(&self, druleid: DRuleId) {
        let mut inner = self.inner.lock().unwrap();
        inner.results.retain(|key, _| key.0 != druleid);
        inner.incomplete_checks_count.retain(|key, _| key.0 != druleid);
    }

    pub fn insert_rule_level(&self, result: HostResult) {
        let key = (result.druleid, IpAddr::from([0, 0, 0, 0]));
        self.inner.lock().unwrap().results.insert(key, result);
    }

    #[cfg(test)]
    fn incomplete_count(&self, druleid: DRuleId, ip: IpAddr) -> Option<u64> {
        self.inner.lock().unwrap().incomplete_checks_count.get(&(druleid, ip)).copied()
    }
}
