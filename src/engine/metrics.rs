//! Engine metrics collection

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Engine performance metrics
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    /// Total number of decision requests
    pub total_requests: u64,

    /// Allowed decisions
    pub allowed: u64,

    /// Denied decisions (policy and failure together)
    pub denied: u64,

    /// Denies caused by failures rather than policy
    pub failure_denies: u64,

    /// Cache hits
    pub cache_hits: u64,

    /// Cache misses
    pub cache_misses: u64,

    /// Average decision latency
    pub avg_latency_ms: f64,

    /// Worst decision latency observed in the sample window
    pub max_latency_ms: f64,
}

impl EngineMetrics {
    /// Cache hit rate over recorded requests
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Fraction of decisions that allowed access
    pub fn allow_rate(&self) -> f64 {
        let total = self.allowed + self.denied;
        if total == 0 {
            0.0
        } else {
            self.allowed as f64 / total as f64
        }
    }
}

/// Collects decision counters and latency samples
pub struct MetricsCollector {
    metrics: Arc<RwLock<EngineMetrics>>,
    latency_samples: Arc<RwLock<Vec<f64>>>,
    max_samples: usize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(EngineMetrics::default())),
            latency_samples: Arc::new(RwLock::new(Vec::with_capacity(10_000))),
            max_samples: 10_000,
        }
    }

    pub async fn record_decision(&self, allowed: bool, failure: bool) {
        let mut metrics = self.metrics.write().await;
        metrics.total_requests += 1;
        if allowed {
            metrics.allowed += 1;
        } else {
            metrics.denied += 1;
            if failure {
                metrics.failure_denies += 1;
            }
        }
    }

    pub async fn record_cache(&self, hit: bool) {
        let mut metrics = self.metrics.write().await;
        if hit {
            metrics.cache_hits += 1;
        } else {
            metrics.cache_misses += 1;
        }
    }

    pub async fn record_latency(&self, latency: Duration) {
        let ms = latency.as_secs_f64() * 1000.0;
        let mut samples = self.latency_samples.write().await;
        if samples.len() >= self.max_samples {
            samples.remove(0);
        }
        samples.push(ms);
    }

    /// Snapshot of the current metrics
    pub async fn get_metrics(&self) -> EngineMetrics {
        let mut metrics = self.metrics.read().await.clone();
        let samples = self.latency_samples.read().await;
        if !samples.is_empty() {
            metrics.avg_latency_ms = samples.iter().sum::<f64>() / samples.len() as f64;
            metrics.max_latency_ms = samples.iter().cloned().fold(0.0, f64::max);
        }
        metrics
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters() {
        let collector = MetricsCollector::new();
        collector.record_decision(true, false).await;
        collector.record_decision(false, false).await;
        collector.record_decision(false, true).await;
        collector.record_cache(true).await;
        collector.record_cache(false).await;
        collector.record_latency(Duration::from_millis(4)).await;

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.allowed, 1);
        assert_eq!(metrics.denied, 2);
        assert_eq!(metrics.failure_denies, 1);
        assert!((metrics.cache_hit_rate() - 0.5).abs() < f64::EPSILON);
        assert!(metrics.avg_latency_ms > 0.0);
    }
}
