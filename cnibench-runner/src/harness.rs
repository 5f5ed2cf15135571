//! Benchmark harness: repeated lifecycles with attach and detach timed apart

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use cnibench_core::{Error, Phase, PluginId, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::orchestrator::{IterationOptions, Orchestrator};

/// Which timed phases a caller is interested in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimedPhase {
    /// Plugin ADD only
    Attach,
    /// Plugin DEL only
    Detach,
    /// Both
    #[default]
    Both,
}

impl TimedPhase {
    /// Whether `phase` is selected
    #[must_use]
    pub const fn includes(self, phase: Phase) -> bool {
        matches!(
            (self, phase),
            (Self::Attach | Self::Both, Phase::Attach) | (Self::Detach | Self::Both, Phase::Detach)
        )
    }
}

impl FromStr for TimedPhase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "attach" | "setup" => Ok(Self::Attach),
            "detach" | "delete" => Ok(Self::Detach),
            "both" => Ok(Self::Both),
            other => Err(Error::InvalidConfig {
                message: format!("Unknown phase `{other}` (expected attach, detach or both)"),
            }),
        }
    }
}

/// Summary statistics over a set of samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Summary {
    /// Number of samples
    pub count: usize,
    /// Sum of all samples
    pub total: Duration,
    /// Arithmetic mean
    pub mean: Duration,
    /// Fastest sample
    pub min: Duration,
    /// Slowest sample
    pub max: Duration,
    /// Median (mean of the middle two for even counts)
    pub median: Duration,
}

impl Summary {
    /// Summarize `samples`; all zero when empty
    #[must_use]
    pub fn of(samples: &[Duration]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let count = sorted.len();
        let total: Duration = sorted.iter().sum();
        let mid = count / 2;
        let median = if count % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2
        } else {
            sorted[mid]
        };

        Self {
            count,
            total,
            mean: total / u32::try_from(count).unwrap_or(u32::MAX),
            min: sorted[0],
            max: sorted[count - 1],
            median,
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} mean={:?} median={:?} min={:?} max={:?}",
            self.count, self.mean, self.median, self.min, self.max
        )
    }
}

/// Attach and detach samples of one benchmark run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingReport {
    /// Plugin benchmarked
    pub plugin: PluginId,
    /// Iterations requested
    pub iterations: usize,
    /// One sample per iteration, attach call only
    pub attach: Vec<Duration>,
    /// One sample per iteration, detach call only
    pub detach: Vec<Duration>,
}

impl TimingReport {
    /// Empty report for `plugin`
    #[must_use]
    pub fn new(plugin: PluginId, iterations: usize) -> Self {
        Self {
            plugin,
            iterations,
            attach: Vec::with_capacity(iterations),
            detach: Vec::with_capacity(iterations),
        }
    }

    /// Attach statistics
    #[must_use]
    pub fn attach_summary(&self) -> Summary {
        Summary::of(&self.attach)
    }

    /// Detach statistics
    #[must_use]
    pub fn detach_summary(&self) -> Summary {
        Summary::of(&self.detach)
    }

    /// Total time of the selected phases, as criterion's `iter_custom` expects
    #[must_use]
    pub fn total(&self, phase: TimedPhase) -> Duration {
        let mut total = Duration::ZERO;
        if phase.includes(Phase::Attach) {
            total += self.attach.iter().sum::<Duration>();
        }
        if phase.includes(Phase::Detach) {
            total += self.detach.iter().sum::<Duration>();
        }
        total
    }
}

/// Run `iterations` full lifecycles of `plugin`, keeping attach and detach
/// samples apart; stops at the first failing iteration
///
/// # Errors
/// Returns the failing iteration's error, or [`Error::InvalidConfig`] for
/// zero iterations
pub async fn measure(
    orchestrator: &mut Orchestrator,
    plugin: &PluginId,
    iterations: usize,
    options: IterationOptions,
) -> Result<TimingReport> {
    if iterations == 0 {
        return Err(Error::InvalidConfig {
            message: "Iteration count must be positive".to_string(),
        });
    }

    let mut report = TimingReport::new(plugin.clone(), iterations);
    for iteration in 1..=iterations {
        let sample = orchestrator.run_iteration(plugin, options).await?;
        debug!(
            plugin = %plugin,
            iteration,
            attach_us = sample.attach.as_micros(),
            detach_us = sample.detach.as_micros(),
            "Iteration done"
        );
        report.attach.push(sample.attach);
        report.detach.push(sample.detach);
    }

    info!(
        plugin = %plugin,
        iterations,
        attach = %report.attach_summary(),
        detach = %report.detach_summary(),
        "Benchmark finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(values: &[u64]) -> Vec<Duration> {
        values.iter().copied().map(Duration::from_millis).collect()
    }

    #[test]
    fn test_summary_odd() {
        let summary = Summary::of(&ms(&[30, 10, 20]));
        assert_eq!(summary.count, 3);
        assert_eq!(summary.total, Duration::from_millis(60));
        assert_eq!(summary.mean, Duration::from_millis(20));
        assert_eq!(summary.median, Duration::from_millis(20));
        assert_eq!(summary.min, Duration::from_millis(10));
        assert_eq!(summary.max, Duration::from_millis(30));
    }

    #[test]
    fn test_summary_even_median() {
        let summary = Summary::of(&ms(&[40, 10, 20, 30]));
        assert_eq!(summary.median, Duration::from_millis(25));
    }

    #[test]
    fn test_summary_empty() {
        assert_eq!(Summary::of(&[]), Summary::default());
    }

    #[test]
    fn test_timed_phase() {
        assert!(TimedPhase::Both.includes(Phase::Attach));
        assert!(TimedPhase::Both.includes(Phase::Detach));
        assert!(!TimedPhase::Attach.includes(Phase::Detach));
        assert!(!TimedPhase::Detach.includes(Phase::Spawn));

        assert_eq!("setup".parse::<TimedPhase>().unwrap(), TimedPhase::Attach);
        assert_eq!("delete".parse::<TimedPhase>().unwrap(), TimedPhase::Detach);
        assert!("spawn".parse::<TimedPhase>().is_err());
    }

    #[test]
    fn test_report_total() {
        let mut report = TimingReport::new(PluginId::new("bridge").unwrap(), 2);
        report.attach = ms(&[5, 7]);
        report.detach = ms(&[1, 2]);

        assert_eq!(report.total(TimedPhase::Attach), Duration::from_millis(12));
        assert_eq!(report.total(TimedPhase::Detach), Duration::from_millis(3));
        assert_eq!(report.total(TimedPhase::Both), Duration::from_millis(15));
    }
}
