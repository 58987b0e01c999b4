//! In-memory performance metrics for one `ProxyServer` (§4.5).

/// Aggregate call counters and latency stats. Retries against the same
/// downstream request do not inflate `total_calls` — only the outward
/// reply counts once.
#[derive(Debug, Clone)]
pub struct PerformanceMetrics {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub min_response_time_ms: f64,
    pub max_response_time_ms: f64,
    total_response_time_ms: f64,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            min_response_time_ms: f64::INFINITY,
            max_response_time_ms: 0.0,
            total_response_time_ms: 0.0,
        }
    }
}

impl PerformanceMetrics {
    /// Record one completed downstream call (after any internal retries).
    pub fn record(&mut self, duration_ms: f64, success: bool) {
        self.total_calls += 1;
        if success {
            self.successful_calls += 1;
        } else {
            self.failed_calls += 1;
        }
        self.min_response_time_ms = self.min_response_time_ms.min(duration_ms);
        self.max_response_time_ms = self.max_response_time_ms.max(duration_ms);
        self.total_response_time_ms += duration_ms;
    }

    pub fn avg_response_time_ms(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.total_response_time_ms / self.total_calls as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.successful_calls as f64 / self.total_calls as f64
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_do_not_inflate_total_calls() {
        let mut metrics = PerformanceMetrics::default();
        metrics.record(12.0, true);
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.successful_calls, 1);
        assert_eq!(metrics.failed_calls, 0);
    }

    #[test]
    fn min_and_max_start_at_sentinel_values() {
        let metrics = PerformanceMetrics::default();
        assert_eq!(metrics.min_response_time_ms, f64::INFINITY);
        assert_eq!(metrics.max_response_time_ms, 0.0);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut metrics = PerformanceMetrics::default();
        metrics.record(5.0, false);
        metrics.reset();
        assert_eq!(metrics.total_calls, 0);
        assert_eq!(metrics.min_response_time_ms, f64::INFINITY);
    }
}
