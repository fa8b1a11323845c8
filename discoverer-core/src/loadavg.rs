//! Per-worker busy/idle bookkeeping read by the Discoverer IPC endpoint's
//! `USAGE_STATS` handler. Each worker reports a busy/idle span after every
//! task; `LoadTracker` keeps a small ring of the most recent spans per
//! worker and reduces them to a single busy fraction on demand.

use std::sync::Mutex;
use std::time::Duration;

const WINDOW: usize = 16;

#[derive(Default)]
struct WorkerWindow {
    busy: Duration,
    idle: Duration,
    samples: usize,
}

pub struct LoadTracker {
    workers: Mutex<Vec<WorkerWindow>>,
}

impl LoadTracker {
    pub fn new(worker_count: usize) -> Self {
        Self {
            workers: Mutex::new((0..worker_count).map(|_| WorkerWindow::default()).collect()),
        }
    }

    pub fn record(&self, worker_index: usize, busy: Duration, idle: Duration) {
        let mut workers = self.workers.lock().unwrap();
        let Some(w) = workers.get_mut(worker_index) else {
            return;
        };
        if w.samples >= WINDOW {
            w.busy = Duration::ZERO;
            w.idle = Duration::ZERO;
            w.samples = 0;
        }
        w.busy += busy;
        w.idle += idle;
        w.samples += 1;
    }

    /// Busy fraction per worker in `0.0..=1.0`, in worker-index order. A
    /// worker with no recorded samples yet reports `0.0`.
    pub fn usage_fractions(&self) -> Vec<f64> {
        self.workers
            .lock()
            .unwrap()
            .iter()
            .map(|w| {
                let total = w.busy + w.idle;
                if total.is_zero() {
                    0.0
                } else {
                    w.busy.as_secs_f64() / total.as_secs_f64()
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_zero_for_workers_with_no_samples() {
        let tracker = LoadTracker::new(2);
        assert_eq!(tracker.usage_fractions(), vec![0.0, 0.0]);
    }

    #[test]
    fn busy_fraction_reflects_recorded_spans() {
        let tracker = LoadTracker::new(1);
        tracker.record(0, Duration::from_millis(750), Duration::from_millis(250));
        let fractions = tracker.usage_fractions();
        assert!((fractions[0] - 0.75).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_worker_index_is_ignored() {
        let tracker = LoadTracker::new(1);
        tracker.record(5, Duration::from_secs(1), Duration::ZERO);
        assert_eq!(tracker.usage_fractions(), vec![0.0]);
    }
}
