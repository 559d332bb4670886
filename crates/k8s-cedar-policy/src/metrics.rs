//! Evaluation metrics
//!
//! Atomic counters for tiered evaluation outcomes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::tiered::{TieredResponse, Verdict};

/// Tiered evaluation metrics
#[derive(Debug, Default)]
pub struct EvaluationMetrics {
    /// Total evaluations
    pub requests_total: AtomicU64,
    /// Allow verdicts
    pub allowed_total: AtomicU64,
    /// Deny verdicts
    pub denied_total: AtomicU64,
    /// No policy fired in any tier
    pub no_opinion_total: AtomicU64,
    /// Evaluations whose response carried errors
    pub errors_total: AtomicU64,
    /// Tiers skipped because nothing fired in them
    pub fallthrough_total: AtomicU64,
    /// Evaluations answered before the stores finished loading
    pub not_ready_total: AtomicU64,
    /// Total evaluation time in microseconds
    pub evaluation_time_us_total: AtomicU64,
    decisions_by_tier: Vec<AtomicU64>,
}

impl EvaluationMetrics {
    /// Create metrics for an evaluator with `tiers` stores
    pub fn new(tiers: usize) -> Self {
        Self {
            decisions_by_tier: (0..tiers).map(|_| AtomicU64::new(0)).collect(),
            ..Self::default()
        }
    }

    /// Record one evaluation
    pub fn record(&self, response: &TieredResponse, evaluation_time: Duration) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let counter = match response.verdict() {
            Verdict::Allow => &self.allowed_total,
            Verdict::Deny => &self.denied_total,
            Verdict::NoOpinion => &self.no_opinion_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if !response.errors.is_empty() {
            self.errors_total.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(tier) = response.tier {
            self.fallthrough_total
                .fetch_add(tier as u64, Ordering::Relaxed);
            if let Some(counter) = self.decisions_by_tier.get(tier) {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.evaluation_time_us_total
            .fetch_add(evaluation_time.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record an evaluation refused because the stores were not loaded
    pub fn record_not_ready(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.not_ready_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total requests
    pub fn requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Get allow verdicts
    pub fn allowed(&self) -> u64 {
        self.allowed_total.load(Ordering::Relaxed)
    }

    /// Get deny verdicts
    pub fn denied(&self) -> u64 {
        self.denied_total.load(Ordering::Relaxed)
    }

    /// Get no-opinion verdicts
    pub fn no_opinion(&self) -> u64 {
        self.no_opinion_total.load(Ordering::Relaxed)
    }

    /// Get evaluations with errors
    pub fn errors(&self) -> u64 {
        self.errors_total.load(Ordering::Relaxed)
    }

    /// Get skipped tiers
    pub fn fallthroughs(&self) -> u64 {
        self.fallthrough_total.load(Ordering::Relaxed)
    }

    /// Get evaluations refused before load
    pub fn not_ready(&self) -> u64 {
        self.not_ready_total.load(Ordering::Relaxed)
    }

    /// Get decisions returned by a tier
    pub fn tier_decisions(&self, tier: usize) -> u64 {
        self.decisions_by_tier
            .get(tier)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Get average evaluation time in microseconds
    pub fn avg_evaluation_time_us(&self) -> u64 {
        let total = self.evaluation_time_us_total.load(Ordering::Relaxed);
        let count = self.requests() - self.not_ready();
        if count > 0 {
            total / count
        } else {
            0
        }
    }
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
