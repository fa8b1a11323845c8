//! The scheduler main loop: one tick reconciles rule revisions, drains the
//! queue's error sideband, flushes completed results to persistence, and
//! expands due rules into jobs under the queue's remaining capacity.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use discovery_api::{BatchKind, Job, Rule, Task};
use utils::id::DRuleId;

use crate::collab::{ConfigLookup, PersistenceSink, RuleSource};
use crate::error::SchedulerError;
use crate::metrics;
use crate::queue::Queue;
use crate::result_store::ResultStore;

/// Per-rule bookkeeping the scheduler keeps across ticks: the revision it
/// last observed in flight, so a later mismatch means "this rule changed
/// underneath its running job."
struct ActiveJob {
    revision: u64,
}

pub struct Scheduler {
    queue: Arc<Queue>,
    result_store: Arc<ResultStore>,
    rule_source: Arc<dyn RuleSource>,
    config_lookup: Arc<dyn ConfigLookup>,
    persistence: Arc<dyn PersistenceSink>,
    active: std::collections::HashMap<DRuleId, ActiveJob>,
    result_batch_cap: usize,
}

impl Scheduler {
    pub fn new(
        queue: Arc<Queue>,
        result_store: Arc<ResultStore>,
        rule_source: Arc<dyn RuleSource>,
        config_lookup: Arc<dyn ConfigLookup>,
        persistence: Arc<dyn PersistenceSink>,
    ) -> Self {
        Self {
            queue,
            result_store,
            rule_source,
            config_lookup,
            persistence,
            active: std::collections::HashMap::new(),
            result_batch_cap: 1000,
        }
    }

    /// Runs one scheduler tick, returning whether completed results remain
    /// in the store (the caller uses this to decide whether to sleep at
    /// all before the next tick).
    pub fn tick(&mut self, now: SystemTime) -> bool {
        let retired = self.reconcile_revisions();
        self.drain_errors();
        let more_results = self.flush_results(&retired);
        self.expand_due_rules(now);
        more_results
    }

    /// Step 1: compares the authoritative `(druleid, revision)` list
    /// against jobs currently tracked as active. A job whose rule vanished
    /// or whose revision moved on is cancelled; its druleid is returned so
    /// the flush step excludes any results already accumulated for it.
    fn reconcile_revisions(&mut self) -> HashSet<DRuleId> {
        let authoritative: std::collections::HashMap<DRuleId, u64> =
            self.rule_source.active_revisions().into_iter().collect();

        let mut retired = HashSet::new();
        self.active.retain(|druleid, job| {
            let stale = match authoritative.get(druleid) {
                Some(rev) => *rev != job.revision,
                None => true,
            };
            if stale {
                retired.insert(*druleid);
                self.queue.cancel(*druleid);
                self.result_store.discard_rule(*druleid);
            }
            !stale
        });
        retired
    }

    fn drain_errors(&mut self) {
        for error in self.queue.drain_errors() {
            metrics::RULE_ERRORS_TOTAL.with_label_values(&[&error.druleid.to_string()]).inc();
            let _ = self.persistence.update_drule(error.druleid, Some(&error.message), SystemTime::now());
        }
    }

    /// Step 3: drains up to `result_batch_cap` completed rows and writes
    /// them to the persistence collaborator, skipping rules retired this
    /// tick. Rule-level rows (empty IP) update the rule's status instead of
    /// a host.
    fn flush_results(&mut self, retired: &HashSet<DRuleId>) -> bool {
        let (completed, more) = self.result_store.take_completed(retired, self.result_batch_cap);
        for result in completed {
            let now = result.now;
            if result.is_rule_level() {
                let _ = self.persistence.update_drule(result.druleid, result.error.as_deref(), now);
                continue;
            }
            let Some(ip) = result.ip else { continue };
            let status = if result.services.is_empty() {
                discovery_api::ServiceStatus::Down
            } else {
                discovery_api::ServiceStatus::Up
            };
            let _ = self.persistence.update_host(result.druleid, ip, &result.dnsname, status, now);
            for service in &result.services {
                let _ = self.persistence.update_service(
                    result.druleid,
                    ip,
                    service.dcheckid,
                    service.port,
                    service.status,
                    &service.value,
                    now,
                );
            }
            metrics::RESULTS_FLUSHED_TOTAL.inc();
        }
        more
    }

    /// Step 4: expands every due, not-yet-active rule into a job, bounded
    /// by the queue's remaining capacity. A rule whose full expansion
    /// would not fit is skipped entirely for this tick rather than
    /// partially enqueued — the queue cap is a capacity guard, not a
    /// truncation point.
    fn expand_due_rules(&mut self, now: SystemTime) {
        for rule in self.rule_source.due_rules(now) {
            if self.active.contains_key(&rule.druleid) {
                continue;
            }

            let delay = match self.rule_source.resolve_delay(&rule) {
                Ok(delay) => delay,
                Err(err) => {
                    self.record_rule_error(&rule, err);
                    self.rule_source.reschedule(rule.druleid, now + Duration::from_secs(60));
                    continue;
                }
            };

            if let Err(err) = self.validate_timeouts(&rule) {
                self.record_rule_error(&rule, err);
                self.rule_source.reschedule(rule.druleid, now + delay);
                continue;
            }

            match self.try_enqueue(&rule, now) {
                Ok(()) => {}
                Err(err) => self.record_rule_error(&rule, err),
            }

            self.rule_source.reschedule(rule.druleid, now + delay);
        }
    }

    fn validate_timeouts(&self, rule: &Rule) -> Result<(), SchedulerError> {
        for check in &rule.checks {
            self.config_lookup.timeout_for(check.check_type)?;
        }
        Ok(())
    }

    /// Builds one task per batch-kind group of checks sharing the rule's
    /// address range, registers each address's expected check count with
    /// the result store, and pushes the job — all only after confirming
    /// the rule's full expansion fits under `remaining_capacity`.
    fn try_enqueue(&mut self, rule: &Rule, now: SystemTime) -> Result<(), SchedulerError> {
        let full_count = rule.full_check_count();
        let remaining = self.queue.remaining_capacity() as u128;
        if full_count > remaining {
            return Err(SchedulerError::QueueFull);
        }

        let mut tasks = Vec::new();
        for kind in [BatchKind::Sync, BatchKind::Icmp, BatchKind::Async] {
            let checks: Vec<_> = rule.checks.iter().filter(|c| c.check_type.batch_kind() == kind).cloned().collect();
            if checks.is_empty() {
                continue;
            }
            tasks.push(Task::new(rule.druleid, kind, checks, rule.iprange.clone()));
        }
        if tasks.is_empty() {
            return Ok(());
        }

        let mut total_pending = 0u64;
        for task in &tasks {
            let per_ip = task.expected_checks_per_ip();
            for addr in task.addrs() {
                self.result_store.register_pending(rule.druleid, *addr, per_ip);
            }
            total_pending += task.total_checks();
        }

        self.queue.add_pending(total_pending);
        self.queue.push(Job::new(rule.druleid, rule.revision, tasks, 0));
        self.active.insert(rule.druleid, ActiveJob { revision: rule.revision });
        metrics::JOBS_ACTIVE.set(self.queue.jobs_active() as i64);
        metrics::QUEUE_PENDING_CHECKS.set(self.queue.pending_checks_count() as i64);
        let _ = now;
        Ok(())
    }

    fn record_rule_error(&self, rule: &Rule, err: impl std::fmt::Display) {
        tracing::warn!(druleid = %rule.druleid, error = %err, "rule tick failed");
        let _ = self.persistence.update_drule(rule.druleid, Some(&err.to_string()), SystemTime::now());
    }
}
