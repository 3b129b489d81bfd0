use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

/// Signals the scheduler reads for one account at one instant.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthSignals {
    pub ws_failure_rate: f64,
    pub policy_rate: f64,
    pub p95_ttft: Option<Duration>,
    pub baseline_ttft: Option<Duration>,
}

#[derive(Debug, Default)]
struct AccountWindow {
    ws_results: VecDeque<(Instant, bool)>,
    policy_errors: VecDeque<Instant>,
    ttft: VecDeque<(Instant, Duration)>,
    /// Long-run TTFT EWMA used as the 2x baseline reference.
    baseline_ttft: Option<Duration>,
}

impl AccountWindow {
    fn prune(&mut self, now: Instant) {
        let cutoff = now.checked_sub(WINDOW);
        let Some(cutoff) = cutoff else { return };
        while self.ws_results.front().is_some_and(|(at, _)| *at < cutoff) {
            self.ws_results.pop_front();
        }
        while self.policy_errors.front().is_some_and(|at| *at < cutoff) {
            self.policy_errors.pop_front();
        }
        while self.ttft.front().is_some_and(|(at, _)| *at < cutoff) {
            self.ttft.pop_front();
        }
    }

    fn signals(&self) -> HealthSignals {
        let attempts = self.ws_results.len();
        let failures = self
            .ws_results
            .iter()
            .filter(|(_, ok)| !ok)
            .count();
        let ws_failure_rate = if attempts == 0 {
            0.0
        } else {
            failures as f64 / attempts as f64
        };
        let policy_rate = if attempts == 0 {
            0.0
        } else {
            self.policy_errors.len() as f64 / attempts as f64
        };

        let mut sorted: Vec<Duration> = self.ttft.iter().map(|(_, d)| *d).collect();
        sorted.sort_unstable();
        let p95_ttft = if sorted.is_empty() {
            None
        } else {
            let index = ((sorted.len() as f64) * 0.95).ceil() as usize;
            Some(sorted[index.saturating_sub(1).min(sorted.len() - 1)])
        };

        HealthSignals {
            ws_failure_rate,
            policy_rate,
            p95_ttft,
            baseline_ttft: self.baseline_ttft,
        }
    }
}

/// Rolling 60 s health windows, one per account. Samples are pruned on every
/// write and read; no background task.
#[derive(Default)]
pub struct HealthRegistry {
    windows: Mutex<HashMap<String, AccountWindow>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ws_result(&self, account_id: &str, ok: bool) {
        let now = Instant::now();
        let Ok(mut windows) = self.windows.lock() else {
            return;
        };
        let window = windows.entry(account_id.to_string()).or_default();
        window.prune(now);
        window.ws_results.push_back((now, ok));
    }

    pub fn record_policy_error(&self, account_id: &str) {
        let now = Instant::now();
        let Ok(mut windows) = self.windows.lock() else {
            return;
        };
        let window = windows.entry(account_id.to_string()).or_default();
        window.prune(now);
        window.policy_errors.push_back(now);
    }

    pub fn record_ttft(&self, account_id: &str, ttft: Duration) {
        let now = Instant::now();
        let Ok(mut windows) = self.windows.lock() else {
            return;
        };
        let window = windows.entry(account_id.to_string()).or_default();
        window.prune(now);
        window.ttft.push_back((now, ttft));
        // EWMA with alpha 1/8 keeps the baseline steady against spikes.
        window.baseline_ttft = Some(match window.baseline_ttft {
            Some(baseline) => (baseline * 7 + ttft) / 8,
            None => ttft,
        });
    }

    pub fn signals(&self, account_id: &str) -> HealthSignals {
        let now = Instant::now();
        let Ok(mut windows) = self.windows.lock() else {
            return HealthSignals::default();
        };
        let Some(window) = windows.get_mut(account_id) else {
            return HealthSignals::default();
        };
        window.prune(now);
        window.signals()
    }
}
