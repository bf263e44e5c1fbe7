//! Throughput statistics over a sliding sample window.
//!
//! Every five seconds the coordinator snapshots the per-instance counters
//! into a [`StatsWindow`]. The global rate is computed over the whole
//! window (up to 30 samples), the per-GPU rates over a shorter read
//! window (10 samples back) so they react faster to a device dropping
//! out.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::solver::DevId;

/// How often the coordinator samples counters.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Retention horizon for the global rate.
const MAX_SAMPLES: usize = 30;

/// Read window for per-GPU rates, in samples back from the newest.
const GPU_WINDOW: usize = 10;

/// Cumulative counters reported by one solver instance.
///
/// Both counters are monotonic per solver process; a restarted solver
/// starts over from zero, so differences are computed saturating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counters {
    /// Solutions found
    pub sols: u64,
    /// Solutions that met the share target
    pub shares: u64,
}

/// One snapshot of all instance counters.
struct Sample {
    at: Instant,
    counters: HashMap<DevId, Counters>,
}

impl Sample {
    fn total_sols(&self) -> u64 {
        self.counters.values().map(|c| c.sols).sum()
    }

    fn gpu_sols(&self, gpu: u32) -> u64 {
        self.counters
            .iter()
            .filter(|(devid, _)| devid.gpu == gpu)
            .map(|(_, c)| c.sols)
            .sum()
    }
}

/// Bounded ring of counter snapshots, newest first.
pub struct StatsWindow {
    samples: VecDeque<Sample>,
}

impl StatsWindow {
    /// Create an empty window.
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(MAX_SAMPLES),
        }
    }

    /// Number of retained samples, never more than the horizon.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when no sample has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Insert a snapshot at the front, dropping the tail past the horizon.
    pub fn record(&mut self, at: Instant, counters: HashMap<DevId, Counters>) {
        self.samples.push_front(Sample { at, counters });
        self.samples.truncate(MAX_SAMPLES);
    }

    /// Format the stats line, or None before the first sample.
    ///
    /// Shape: `Total <g> sol/s [dev<gpu> <r>, ...] <n> share(s)`, rates
    /// to one decimal, GPUs in ascending id order.
    pub fn report(&self) -> Option<String> {
        let newest = self.samples.front()?;
        let oldest = self.samples.back()?;

        let total = rate(
            newest.total_sols(),
            oldest.total_sols(),
            newest.at - oldest.at,
        );

        let base_idx = GPU_WINDOW.min(self.samples.len() - 1);
        let base = &self.samples[base_idx];

        let gpus: BTreeSet<u32> = newest.counters.keys().map(|devid| devid.gpu).collect();
        let per_gpu: Vec<String> = gpus
            .iter()
            .map(|&gpu| {
                let r = rate(newest.gpu_sols(gpu), base.gpu_sols(gpu), newest.at - base.at);
                format!("dev{gpu} {r:.1}")
            })
            .collect();

        let shares: u64 = newest.counters.values().map(|c| c.shares).sum();

        Some(format!(
            "Total {:.1} sol/s [{}] {} share(s)",
            total,
            per_gpu.join(", "),
            shares
        ))
    }
}

impl Default for StatsWindow {
    fn default() -> Self {
        Self::new()
    }
}

fn rate(newer: u64, older: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    newer.saturating_sub(older) as f64 / secs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devid(gpu: u32, instance: u32) -> DevId {
        DevId { gpu, instance }
    }

    fn snapshot(entries: &[(DevId, u64, u64)]) -> HashMap<DevId, Counters> {
        entries
            .iter()
            .map(|&(d, sols, shares)| (d, Counters { sols, shares }))
            .collect()
    }

    /// Two instances on GPU 0, totals advancing 100 sols per 5 seconds.
    #[test]
    fn test_steady_rate_two_instances() {
        let t0 = Instant::now();
        let mut window = StatsWindow::new();

        for i in 0u64..5 {
            let half = i * 50;
            window.record(
                t0 + Duration::from_secs(i * 5),
                snapshot(&[(devid(0, 0), half, 0), (devid(0, 1), half, 0)]),
            );
        }

        assert_eq!(
            window.report().unwrap(),
            "Total 20.0 sol/s [dev0 20.0] 0 share(s)"
        );
    }

    #[test]
    fn test_window_capped_at_horizon() {
        let t0 = Instant::now();
        let mut window = StatsWindow::new();

        for i in 0u64..35 {
            window.record(
                t0 + Duration::from_secs(i * 5),
                snapshot(&[(devid(0, 0), i, 0)]),
            );
        }

        assert_eq!(window.len(), 30);
    }

    /// Per-GPU rate reads 10 samples back; global spans the whole window.
    #[test]
    fn test_gpu_window_is_shorter_than_global() {
        let t0 = Instant::now();
        let mut window = StatsWindow::new();

        // Flat for 11 samples, then a burst of 100 in the final interval
        for i in 0u64..12 {
            let sols = if i == 11 { 100 } else { 0 };
            window.record(
                t0 + Duration::from_secs(i * 5),
                snapshot(&[(devid(0, 0), sols, 0)]),
            );
        }

        // Global: 100 sols over 55s; per-GPU: 100 sols over 50s
        assert_eq!(
            window.report().unwrap(),
            "Total 1.8 sol/s [dev0 2.0] 0 share(s)"
        );
    }

    #[test]
    fn test_gpus_sorted_ascending_and_shares_summed() {
        let t0 = Instant::now();
        let mut window = StatsWindow::new();

        window.record(
            t0,
            snapshot(&[(devid(2, 0), 0, 0), (devid(0, 0), 0, 0)]),
        );
        window.record(
            t0 + Duration::from_secs(5),
            snapshot(&[(devid(2, 0), 10, 2), (devid(0, 0), 5, 1)]),
        );

        assert_eq!(
            window.report().unwrap(),
            "Total 3.0 sol/s [dev0 1.0, dev2 2.0] 3 share(s)"
        );
    }

    /// A restarted solver resets its counters; rates must not wrap.
    #[test]
    fn test_counter_reset_does_not_underflow() {
        let t0 = Instant::now();
        let mut window = StatsWindow::new();

        window.record(t0, snapshot(&[(devid(0, 0), 500, 0)]));
        window.record(
            t0 + Duration::from_secs(5),
            snapshot(&[(devid(0, 0), 3, 0)]),
        );

        assert_eq!(
            window.report().unwrap(),
            "Total 0.0 sol/s [dev0 0.0] 0 share(s)"
        );
    }

    #[test]
    fn test_single_sample_reports_zero_rates() {
        let mut window = StatsWindow::new();
        window.record(Instant::now(), snapshot(&[(devid(0, 0), 42, 1)]));

        assert_eq!(
            window.report().unwrap(),
            "Total 0.0 sol/s [dev0 0.0] 1 share(s)"
        );
    }

    #[test]
    fn test_empty_window_reports_nothing() {
        assert!(StatsWindow::new().report().is_none());
    }
}
