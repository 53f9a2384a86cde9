//! Lock report rendering
//!
//! A [`Snapshot`] is taken under the profiler's guard in one go, so every
//! view, hold and total in a report describes the same instant. Rendering
//! is a pure function of the snapshot: rendering a frozen profiler twice
//! yields identical bytes.
//!
//! # Text layout
//!
//! ```text
//! Format: <name> <file> <line>: <avglocktime> over <locktimes>, ...
//!
//! main 0:
//! All:
//! state src/world.rs 88: 0.250 over 4, 2.000 over 4, 0.000 over 4, 1
//!
//! By Mutex:
//! ...
//! Locked mutexes:
//! ...
//! Delay, locktime, condwait, time running by thread:
//! main 0: 0, 1, 0, 0.998
//!
//! Total locking time spent: 1
//! ...
//! ```

use crate::aggregate::{Aggregate, GroupingPolicy};
use crate::config::{ReportConfig, ReportFormat};
use crate::error::{ProfilerError, Result};
use crate::registry::ThreadProfile;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;

const FORMAT_LEGEND: &str = "Format: <name> <file> <line>: <avglocktime> over <locktimes>, <avgexectime> over <exectimes>, <avgunlocktime> over <unlocktimes>, <totlocktime>";

/// Session-wide counters across all threads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionTotals {
    /// Lock waits plus unlock times (ms)
    pub lock_wait: u64,
    pub lock_count: u64,
    pub delay: u64,
    pub cond_wait: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewSnapshot {
    pub policy: GroupingPolicy,
    /// Sorted by descending lock plus unlock time
    pub aggregates: Vec<Aggregate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadSnapshot {
    pub index: usize,
    pub profile: ThreadProfile,
    pub views: Vec<ViewSnapshot>,
}

impl ThreadSnapshot {
    pub fn view(&self, policy: GroupingPolicy) -> Option<&ViewSnapshot> {
        self.views.iter().find(|view| view.policy == policy)
    }
}

/// Consistent copy of everything a report needs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub threads: Vec<ThreadSnapshot>,
    /// ByUnique entry of every mutex still held, ordered by mutex identity
    pub locked: Vec<Aggregate>,
    pub totals: SessionTotals,
    pub violations: usize,
    pub session_start: u64,
    pub session_end: u64,
}

impl Snapshot {
    pub fn elapsed(&self) -> u64 {
        self.session_end.saturating_sub(self.session_start)
    }

    /// Fraction of the session this thread spent neither waiting on locks,
    /// sleeping, nor waiting on condition variables
    pub fn thread_running_ratio(&self, profile: &ThreadProfile) -> f64 {
        let blocked =
            profile.cumulative_delay + profile.cumulative_lock_wait + profile.cumulative_cond_wait;
        ratio(self.elapsed() as f64 - blocked as f64, self.elapsed())
    }

    /// Sum of every thread's running fraction
    pub fn running_ratio(&self) -> f64 {
        let elapsed = self.elapsed();
        let available = elapsed as f64 * self.threads.len() as f64;
        let blocked = self.totals.lock_wait + self.totals.delay + self.totals.cond_wait;
        ratio(available - blocked as f64, elapsed)
    }
}

fn ratio(numerator: f64, elapsed: u64) -> f64 {
    if elapsed == 0 {
        0.0
    } else {
        numerator / elapsed as f64
    }
}

/// Renders snapshots as text or JSON and writes them to disk
#[derive(Debug, Clone)]
pub struct ReportGenerator {
    format: ReportFormat,
    format_header: bool,
}

impl ReportGenerator {
    pub fn new(format: ReportFormat) -> Self {
        Self {
            format,
            format_header: true,
        }
    }

    pub fn from_config(config: &ReportConfig) -> Self {
        Self {
            format: config.format,
            format_header: config.format_header,
        }
    }

    pub fn with_format_header(mut self, enabled: bool) -> Self {
        self.format_header = enabled;
        self
    }

    pub fn render(&self, snapshot: &Snapshot) -> Result<String> {
        match self.format {
            ReportFormat::Text => Ok(TextReport {
                snapshot,
                format_header: self.format_header,
            }
            .to_string()),
            ReportFormat::Json => Ok(serde_json::to_string_pretty(snapshot)?),
        }
    }

    pub fn write<P: AsRef<Path>>(&self, snapshot: &Snapshot, path: P) -> Result<()> {
        let rendered = self.render(snapshot)?;
        fs::write(path.as_ref(), rendered).map_err(|source| ProfilerError::Report {
            path: path.as_ref().to_path_buf(),
            source,
        })
    }
}

struct TextReport<'a> {
    snapshot: &'a Snapshot,
    format_header: bool,
}

struct AggregateLine<'a>(&'a Aggregate);

impl fmt::Display for AggregateLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let agg = self.0;
        write!(
            f,
            "{} {} {}: {:.3} over {}, {:.3} over {}, {:.3} over {}, {}",
            agg.label,
            agg.site.file,
            agg.site.line,
            agg.average_lock(),
            agg.lock_count,
            agg.average_exec(),
            agg.exec_count,
            agg.average_unlock(),
            agg.unlock_count,
            agg.contention_total()
        )
    }
}

impl fmt::Display for TextReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot;

        if self.format_header {
            writeln!(f, "{}", FORMAT_LEGEND)?;
            writeln!(f)?;
        }

        for thread in &snapshot.threads {
            let origin = &thread.profile.origin_site;
            writeln!(f, "{} {}:", origin.file, origin.line)?;
            for view in &thread.views {
                writeln!(f, "{}:", view.policy.title())?;
                for agg in &view.aggregates {
                    writeln!(f, "{}", AggregateLine(agg))?;
                }
                writeln!(f)?;
            }
        }

        writeln!(f, "Locked mutexes:")?;
        for agg in &snapshot.locked {
            writeln!(f, "{}", AggregateLine(agg))?;
        }

        writeln!(f)?;
        writeln!(f, "Delay, locktime, condwait, time running by thread:")?;
        for thread in &snapshot.threads {
            let profile = &thread.profile;
            writeln!(
                f,
                "{} {}: {}, {}, {}, {:.3}",
                profile.origin_site.file,
                profile.origin_site.line,
                profile.cumulative_delay,
                profile.cumulative_lock_wait,
                profile.cumulative_cond_wait,
                snapshot.thread_running_ratio(profile)
            )?;
        }

        let totals = &snapshot.totals;
        writeln!(f)?;
        writeln!(f, "Total locking time spent: {}", totals.lock_wait)?;
        writeln!(f, "Total locks: {}", totals.lock_count)?;
        writeln!(f, "Total delay time spent: {}", totals.delay)?;
        writeln!(f, "Total condwait spent: {}", totals.cond_wait)?;
        writeln!(f, "Total time: {}", snapshot.elapsed())?;
        writeln!(f, "Total number of threads: {}", snapshot.threads.len())?;
        writeln!(f, "Time running: {:.3}", snapshot.running_ratio())?;
        writeln!(f, "Session start: {}", snapshot.session_start)?;
        writeln!(f, "Session end: {}", snapshot.session_end)
    }
}
