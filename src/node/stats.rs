//! Round statistics gathered by the coordinator.
//!
//! A round is the time between two consecutive token receipts at the
//! coordinator. The first round is measured from token injection.
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Min/mean/max over all recorded rounds; all zero when there were none
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RoundSummary {
    pub rounds: usize,
    pub min: Duration,
    pub mean: Duration,
    pub max: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct StatisticsCollector {
    round_durations: Vec<Duration>,
    total_rounds: u64,
    fired_by_coordinator: u64,
    fires_observed: u64,
    last_receipt: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl StatisticsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark token injection; the first round is timed from here
    pub fn start(&mut self, now: Instant) {
        self.last_receipt = Some(now);
        self.started_at = Some(Utc::now());
    }

    pub fn finish(&mut self) {
        if self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
    }

    /// The coordinator received the token
    pub fn record_token_receipt(&mut self, now: Instant) {
        if let Some(previous) = self.last_receipt {
            self.round_durations
                .push(now.saturating_duration_since(previous));
        }
        self.last_receipt = Some(now);
        self.total_rounds += 1;
    }

    pub fn record_own_fire(&mut self) {
        self.fired_by_coordinator += 1;
    }

    /// Another node's rocket was seen on the broadcast channel
    pub fn record_observed_fire(&mut self) {
        self.fires_observed += 1;
    }

    pub fn round_durations(&self) -> &[Duration] {
        &self.round_durations
    }

    pub fn total_rounds(&self) -> u64 {
        self.total_rounds
    }

    pub fn fired_by_coordinator(&self) -> u64 {
        self.fired_by_coordinator
    }

    pub fn fires_observed(&self) -> u64 {
        self.fires_observed
    }

    /// Own rockets plus every rocket seen from peers
    pub fn total_fires(&self) -> u64 {
        self.fired_by_coordinator + self.fires_observed
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn summary(&self) -> RoundSummary {
        let rounds = self.round_durations.len();
        if rounds == 0 {
            return RoundSummary::default();
        }
        let total: Duration = self.round_durations.iter().sum();
        RoundSummary {
            rounds,
            min: self.round_durations.iter().min().copied().unwrap_or_default(),
            mean: mean_duration(total, rounds),
            max: self.round_durations.iter().max().copied().unwrap_or_default(),
        }
    }
}

/// Dividing by more than `u32::MAX` rounds saturates; zero rounds divide by one
fn mean_duration(total: Duration, rounds: usize) -> Duration {
    let divisor = u32::try_from(rounds).unwrap_or(u32::MAX).max(1);
    total / divisor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_summary_is_zero() {
        let stats = StatisticsCollector::new();
        let summary = stats.summary();
        assert_eq!(summary, RoundSummary::default());
        assert_eq!(summary.mean, Duration::ZERO);
        assert_eq!(stats.total_rounds(), 0);
        assert_eq!(stats.total_fires(), 0);
    }

    #[test]
    fn test_rounds_timed_from_injection() {
        let mut stats = StatisticsCollector::new();
        let t0 = Instant::now();
        stats.start(t0);
        stats.record_token_receipt(t0 + Duration::from_millis(30));
        stats.record_token_receipt(t0 + Duration::from_millis(40));
        stats.record_token_receipt(t0 + Duration::from_millis(60));

        assert_eq!(stats.total_rounds(), 3);
        assert_eq!(
            stats.round_durations(),
            &[
                Duration::from_millis(30),
                Duration::from_millis(10),
                Duration::from_millis(20)
            ]
        );

        let summary = stats.summary();
        assert_eq!(summary.rounds, 3);
        assert_eq!(summary.min, Duration::from_millis(10));
        assert_eq!(summary.max, Duration::from_millis(30));
        assert_eq!(summary.mean, Duration::from_millis(20));
        assert!(stats.started_at().is_some());
    }

    #[test]
    fn test_mean_never_truncates_the_round_count() {
        let total = Duration::from_secs(u64::from(u32::MAX));
        assert_eq!(mean_duration(total, usize::MAX), Duration::from_secs(1));
        assert_eq!(mean_duration(total, 0), total);
        assert_eq!(
            mean_duration(Duration::from_millis(90), 3),
            Duration::from_millis(30)
        );
    }

    #[test]
    fn test_receipt_without_start_counts_but_is_untimed() {
        let mut stats = StatisticsCollector::new();
        stats.record_token_receipt(Instant::now());
        assert_eq!(stats.total_rounds(), 1);
        assert!(stats.round_durations().is_empty());
    }

    #[test]
    fn test_fire_counts() {
        let mut stats = StatisticsCollector::new();
        stats.record_own_fire();
        stats.record_observed_fire();
        stats.record_observed_fire();
        assert_eq!(stats.fired_by_coordinator(), 1);
        assert_eq!(stats.fires_observed(), 2);
        assert_eq!(stats.total_fires(), 3);

        stats.finish();
        let finished = stats.finished_at();
        stats.finish();
        assert_eq!(stats.finished_at(), finished);
    }
}
