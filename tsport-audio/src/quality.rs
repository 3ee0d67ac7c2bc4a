//! Quality feedback from the downstream consumer
//!
//! Reports are advisory. The port keeps the most recent one plus a streak of
//! consecutive late reports; once the streak reaches the configured count the
//! delivery loop drops every other non-essential unit until an on-time
//! report arrives. Dropping only ever skips units, so delivered timestamps
//! keep their order.

use serde::{Deserialize, Serialize};
use tsport_common::timing::RefTime;

/// Direction of a quality report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityKind {
    /// Consumer is starved: delivery runs behind real time
    Famine,
    /// Consumer is flooded: delivery runs ahead of real time
    Flood,
}

/// One report from the downstream consumer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub kind: QualityKind,
    /// Requested delivery proportion in thousandths (1000 = real time)
    pub proportion: u32,
    /// How late the consumer is; negative values mean early
    pub late: RefTime,
    /// Stream time the report refers to
    pub timestamp: RefTime,
}

impl QualityReport {
    pub fn late(late: RefTime, timestamp: RefTime) -> Self {
        Self {
            kind: QualityKind::Famine,
            proportion: 1000,
            late,
            timestamp,
        }
    }

    pub fn on_time(timestamp: RefTime) -> Self {
        Self {
            kind: QualityKind::Flood,
            proportion: 1000,
            late: 0,
            timestamp,
        }
    }
}

/// Drop policy parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingPolicy {
    /// Lateness at or above which a report counts as late
    pub late_threshold: RefTime,
    /// Consecutive late reports before dropping starts
    pub reports_before_drop: u32,
}

/// Most recent quality state, consumed by the delivery loop
#[derive(Debug, Clone, Default)]
pub struct QualityHint {
    last: Option<QualityReport>,
    late_streak: u32,
    skip_next: bool,
    dropped: u64,
}

impl QualityHint {
    /// Record a report
    pub fn record(&mut self, report: QualityReport, policy: &PacingPolicy) {
        if report.kind == QualityKind::Famine && report.late >= policy.late_threshold {
            self.late_streak = self.late_streak.saturating_add(1);
        } else {
            self.late_streak = 0;
            self.skip_next = false;
        }
        self.last = Some(report);
    }

    pub fn last(&self) -> Option<QualityReport> {
        self.last
    }

    /// Lateness of the last report, zero if none
    pub fn late_by(&self) -> RefTime {
        self.last.map_or(0, |report| report.late)
    }

    pub fn late_streak(&self) -> u32 {
        self.late_streak
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn is_sustained_late(&self, policy: &PacingPolicy) -> bool {
        policy.reports_before_drop > 0 && self.late_streak >= policy.reports_before_drop
    }

    /// Decide whether to drop the next unit
    ///
    /// Essential units (those carrying a discontinuity or sync point) are
    /// never dropped. Under sustained lateness every other non-essential
    /// unit is dropped.
    pub fn should_drop(&mut self, essential: bool, policy: &PacingPolicy) -> bool {
        if essential || !self.is_sustained_late(policy) {
            return false;
        }
        let drop = self.skip_next;
        self.skip_next = !self.skip_next;
        if drop {
            self.dropped += 1;
        }
        drop
    }

    /// Forget all reports (new segment or disconnect)
    pub fn reset(&mut self) {
        *self = Self {
            dropped: self.dropped,
            ..Self::default()
        };
    }
}
