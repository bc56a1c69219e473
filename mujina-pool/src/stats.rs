//! Running summary of submitted results, kept by the listener.

use std::time::Duration;

use crate::job::SubmitResult;

/// Latency samples kept for the median.
const MAX_SAMPLES: usize = 1024;

#[derive(Debug, Default, Clone)]
pub struct ResultStats {
    accepted: u64,
    rejected: u64,
    /// Sum of the difficulty of accepted results
    total_diff: u64,
    best_diff: u64,
    latency: Vec<Duration>,
}

impl ResultStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: &SubmitResult, error: Option<&str>) {
        if error.is_some() {
            self.rejected += 1;
        } else {
            self.accepted += 1;
            self.total_diff = self.total_diff.saturating_add(result.diff);
        }
        self.best_diff = self.best_diff.max(result.actual_diff);

        if let Some(elapsed) = result.elapsed() {
            if self.latency.len() == MAX_SAMPLES {
                self.latency.remove(0);
            }
            self.latency.push(elapsed);
        }
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn total_diff(&self) -> u64 {
        self.total_diff
    }

    pub fn best_diff(&self) -> u64 {
        self.best_diff
    }

    /// Median pool response time.
    pub fn median_latency(&self) -> Option<Duration> {
        if self.latency.is_empty() {
            return None;
        }
        let mut sorted = self.latency.clone();
        sorted.sort_unstable();
        Some(sorted[sorted.len() / 2])
    }

    /// Forget everything, e.g. when another pool becomes active.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submitted(diff: u64, actual: u64) -> SubmitResult {
        let mut result = SubmitResult::new(1, diff, actual);
        result.done();
        result
    }

    #[test]
    fn test_counts() {
        let mut stats = ResultStats::new();
        stats.record(&submitted(1000, 5000), None);
        stats.record(&submitted(1000, 1200), None);
        stats.record(&submitted(1000, 9000), Some("Low difficulty share"));

        assert_eq!(stats.accepted(), 2);
        assert_eq!(stats.rejected(), 1);
        assert_eq!(stats.total_diff(), 2000);
        assert_eq!(stats.best_diff(), 9000);
        assert!(stats.median_latency().is_some());

        stats.reset();
        assert_eq!(stats.accepted(), 0);
        assert_eq!(stats.median_latency(), None);
    }

    #[test]
    fn test_unanswered_results_have_no_latency() {
        let mut stats = ResultStats::new();
        stats.record(&SubmitResult::new(1, 10, 10), None);
        assert_eq!(stats.median_latency(), None);
    }
}
