//! Outcome of one engine run.

use std::{fmt, time::Duration};

use crate::deobfuscation::events::{DerivedStats, EventLog};

/// Timing of a single pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassTiming {
    /// Pass name.
    pub name: &'static str,
    /// Pipeline priority.
    pub priority: u32,
    /// Wall-clock time spent in `transform`.
    pub elapsed: Duration,
}

/// Everything a run recorded: the event log, statistics derived from it, and per-pass
/// timings in execution order.
#[derive(Debug, Clone)]
pub struct DeobfuscationResult {
    /// Structured events of the run.
    pub events: EventLog,
    /// Statistics computed from `events`.
    pub stats: DerivedStats,
    /// Passes that ran, in order.
    pub passes: Vec<PassTiming>,
}

impl DeobfuscationResult {
    /// Builds a result, deriving the statistics from `events`.
    #[must_use]
    pub fn new(events: EventLog, passes: Vec<PassTiming>, total: Duration) -> Self {
        let stats = DerivedStats::from_log(&events).with_time(total);
        DeobfuscationResult {
            events,
            stats,
            passes,
        }
    }

    /// Number of transformations of any kind.
    #[must_use]
    pub fn total_transformations(&self) -> usize {
        self.stats.total_transformations()
    }

    /// Returns `true` if any method faulted during analysis.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        self.stats.warnings > 0
    }

    /// One-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        self.stats.summary()
    }

    /// Multi-line report: summary, then one line per pass.
    #[must_use]
    pub fn detailed_summary(&self) -> String {
        let mut out = format!("{}\n", self.summary());
        for pass in &self.passes {
            let count = self.events.filter_pass(pass.name).count();
            out.push_str(&format!(
                "  {:<28} {:>6} events  {:>8.2?}\n",
                pass.name, count, pass.elapsed
            ));
        }
        out
    }
}

impl fmt::Display for DeobfuscationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}
