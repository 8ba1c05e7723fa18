//! Live counters shared by the workers, the writer and the progress reporter,
//! plus the report returned when a run finishes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::summarizer::Prefilter;

#[derive(Debug, Default)]
pub struct LaneStats {
    ok: AtomicUsize,
    failed: AtomicUsize,
}

impl LaneStats {
    pub fn ok(&self) -> usize {
        self.ok.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Counters updated only by the writer task. Readers may observe them at any
/// time without coordination.
#[derive(Debug, Default)]
pub struct LiveStats {
    processed: AtomicUsize,
    failed: AtomicUsize,
    db_errors: AtomicUsize,
    lanes: [LaneStats; 2],
}

impl LiveStats {
    pub fn record_success(&self, lane: usize) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if let Some(l) = self.lanes.get(lane) {
            l.ok.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self, lane: usize) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if let Some(l) = self.lanes.get(lane) {
            l.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_db_error(&self) {
        self.db_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn db_errors(&self) -> usize {
        self.db_errors.load(Ordering::Relaxed)
    }

    /// Items whose outcome has been written.
    pub fn completed(&self) -> usize {
        self.processed() + self.failed()
    }

    pub fn lane(&self, lane: usize) -> Option<&LaneStats> {
        self.lanes.get(lane)
    }
}

/// Per-provider line of a [`RunReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReport {
    pub name: String,
    pub model: String,
    pub assigned: usize,
    pub ok: usize,
    pub failed: usize,
}

/// What a dry run would have done.
#[derive(Debug, Clone, PartialEq)]
pub struct DryRunPlan {
    /// Processable items per source, largest first.
    pub by_source: Vec<(String, usize)>,
    pub avg_word_count: i64,
    pub primary_batch: usize,
    pub secondary_batch: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub loaded: usize,
    pub processable: usize,
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub db_errors: usize,
    pub skip_reasons: BTreeMap<Prefilter, usize>,
    pub providers: Vec<ProviderReport>,
    pub elapsed: Duration,
    pub dry_run: Option<DryRunPlan>,
}

impl RunReport {
    pub(crate) fn new(loaded: usize) -> Self {
        Self {
            loaded,
            processable: 0,
            processed: 0,
            failed: 0,
            skipped: 0,
            db_errors: 0,
            skip_reasons: BTreeMap::new(),
            providers: Vec::new(),
            elapsed: Duration::ZERO,
            dry_run: None,
        }
    }

    pub fn skip_count(&self, reason: Prefilter) -> usize {
        self.skip_reasons.get(&reason).copied().unwrap_or(0)
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderReport> {
        self.providers.iter().find(|p| p.name == name)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Loaded {} | processable {} | skipped {}",
            self.loaded, self.processable, self.skipped
        )?;
        for (reason, count) in &self.skip_reasons {
            writeln!(f, "  - {}: {}", reason.as_str(), count)?;
        }

        if let Some(plan) = &self.dry_run {
            writeln!(f, "[dry run] would process {} items:", self.processable)?;
            for (source, count) in &plan.by_source {
                writeln!(f, "  {source}: {count}")?;
            }
            writeln!(f, "  avg word count: {}", plan.avg_word_count)?;
            writeln!(f, "  primary batch: {}", plan.primary_batch)?;
            write!(f, "  secondary batch: {}", plan.secondary_batch)?;
            return Ok(());
        }

        let secs = self.elapsed.as_secs_f64();
        writeln!(f, "Total time: {:.1}s", secs)?;
        if secs > 0.0 {
            writeln!(
                f,
                "Rate: {:.1} items/s",
                (self.processed + self.failed) as f64 / secs
            )?;
        }
        writeln!(f, "Processed: {}", self.processed)?;
        writeln!(f, "Failed:    {}", self.failed)?;
        writeln!(f, "DB errors: {}", self.db_errors)?;
        for p in &self.providers {
            writeln!(
                f,
                "  {} ({}): {} assigned, {} ok / {} fail",
                p.name, p.model, p.assigned, p.ok, p.failed
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_counters_are_independent() {
        let stats = LiveStats::default();
        stats.record_success(0);
        stats.record_success(0);
        stats.record_failure(1);
        stats.record_db_error();
        assert_eq!(stats.processed(), 2);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.completed(), 3);
        assert_eq!(stats.db_errors(), 1);
        assert_eq!(stats.lane(0).map(LaneStats::ok), Some(2));
        assert_eq!(stats.lane(1).map(LaneStats::failed), Some(1));
        assert!(stats.lane(2).is_none());
    }

    #[test]
    fn dry_run_report_lists_sources() {
        let mut report = RunReport::new(3);
        report.processable = 2;
        report.skipped = 1;
        report.skip_reasons.insert(Prefilter::TooShort, 1);
        report.dry_run = Some(DryRunPlan {
            by_source: vec![("stratechery".into(), 2)],
            avg_word_count: 4200,
            primary_batch: 1,
            secondary_batch: 1,
        });
        let text = report.to_string();
        assert!(text.contains("  - too_short: 1"));
        assert!(text.contains("  stratechery: 2"));
        assert!(text.contains("avg word count: 4200"));
    }
}
