//! Service counters, latency statistics and model agreement tracking.

use crate::types::PricePrediction;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

const LATENCY_WINDOW: usize = 10_000;
const AGREEMENT_WINDOW: usize = 1_000;

/// Metrics collector for the price service
pub struct ServiceMetrics {
    /// Successful price estimates
    pub predictions: AtomicU64,
    /// Rejected or failed estimate requests
    pub prediction_failures: AtomicU64,
    /// Rows appended to the accumulated dataset
    pub rows_inserted: AtomicU64,
    pub insert_failures: AtomicU64,
    /// Completed retrains
    pub retrains: AtomicU64,
    pub retrain_failures: AtomicU64,
    /// Prediction latencies in microseconds
    latencies: RwLock<Vec<u64>>,
    /// Per-prediction agreement between the three models
    agreements: RwLock<Vec<f64>>,
    last_retrain: RwLock<Option<DateTime<Utc>>>,
    start_time: Instant,
}

impl ServiceMetrics {
    /// Zeroed counters, uptime starting now.
    pub fn new() -> Self {
        Self {
            predictions: AtomicU64::new(0),
            prediction_failures: AtomicU64::new(0),
            rows_inserted: AtomicU64::new(0),
            insert_failures: AtomicU64::new(0),
            retrains: AtomicU64::new(0),
            retrain_failures: AtomicU64::new(0),
            latencies: RwLock::new(Vec::with_capacity(1000)),
            agreements: RwLock::new(Vec::with_capacity(1000)),
            last_retrain: RwLock::new(None),
            start_time: Instant::now(),
        }
    }

    /// Count one estimate and keep its latency and model agreement.
    pub fn record_prediction(&self, latency: Duration, prediction: &PricePrediction) {
        self.predictions.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut latencies) = self.latencies.write() {
            latencies.push(latency.as_micros() as u64);
            if latencies.len() > LATENCY_WINDOW {
                latencies.drain(0..LATENCY_WINDOW / 2);
            }
        }

        if let Ok(mut agreements) = self.agreements.write() {
            agreements.push(agreement(prediction));
            if agreements.len() > AGREEMENT_WINDOW {
                agreements.drain(0..AGREEMENT_WINDOW / 2);
            }
        }
    }

    /// Count a request that produced no estimate.
    pub fn record_prediction_failure(&self) {
        self.prediction_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an insert attempt as stored or failed.
    pub fn record_insert(&self, ok: bool) {
        let counter = if ok {
            &self.rows_inserted
        } else {
            &self.insert_failures
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a retrain; success also stamps `last_retrain`.
    pub fn record_retrain(&self, ok: bool) {
        if ok {
            self.retrains.fetch_add(1, Ordering::Relaxed);
            if let Ok(mut last) = self.last_retrain.write() {
                *last = Some(Utc::now());
            }
        } else {
            self.retrain_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Percentiles over the recent latency window.
    pub fn get_latency_stats(&self) -> LatencyStats {
        let mut sorted = match self.latencies.read() {
            Ok(latencies) if !latencies.is_empty() => latencies.clone(),
            _ => return LatencyStats::default(),
        };
        sorted.sort_unstable();

        let count = sorted.len();
        let percentile = |p: f64| sorted[((count as f64 * p) as usize).min(count - 1)];

        LatencyStats {
            count: count as u64,
            mean_us: sorted.iter().sum::<u64>() / count as u64,
            p50_us: percentile(0.5),
            p95_us: percentile(0.95),
            p99_us: percentile(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Mean agreement over the recent window (0 with no data)
    pub fn get_avg_agreement(&self) -> f64 {
        match self.agreements.read() {
            Ok(agreements) if !agreements.is_empty() => {
                agreements.iter().sum::<f64>() / agreements.len() as f64
            }
            _ => 0.0,
        }
    }

    /// Predictions per second since startup
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.predictions.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Copy every counter and derived statistic.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            predictions: self.predictions.load(Ordering::Relaxed),
            prediction_failures: self.prediction_failures.load(Ordering::Relaxed),
            rows_inserted: self.rows_inserted.load(Ordering::Relaxed),
            insert_failures: self.insert_failures.load(Ordering::Relaxed),
            retrains: self.retrains.load(Ordering::Relaxed),
            retrain_failures: self.retrain_failures.load(Ordering::Relaxed),
            last_retrain: self.last_retrain.read().ok().and_then(|last| *last),
            throughput: self.get_throughput(),
            model_agreement: self.get_avg_agreement(),
            latency: self.get_latency_stats(),
        }
    }

    /// Log summary statistics
    pub fn print_summary(&self) {
        let snapshot = self.snapshot();
        let latency = &snapshot.latency;

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║             CAR PRICE SERVICE - METRICS SUMMARY              ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Predictions: {:>8} (failed {:>6})  │  {:>7.2} req/s     ║",
            snapshot.predictions, snapshot.prediction_failures, snapshot.throughput
        );
        info!(
            "║ Rows inserted: {:>6} (failed {:>6})                        ║",
            snapshot.rows_inserted, snapshot.insert_failures
        );
        info!(
            "║ Retrains: {:>6} (failed {:>6})                             ║",
            snapshot.retrains, snapshot.retrain_failures
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Latency (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5}      ║",
            latency.mean_us, latency.p50_us, latency.p95_us, latency.p99_us
        );
        info!(
            "║ Model Agreement: {:>5.1}% (higher = models agree more)        ║",
            snapshot.model_agreement * 100.0
        );
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// One minus the spread of the three estimates relative to their mean, floored at 0.
fn agreement(prediction: &PricePrediction) -> f64 {
    let mean = prediction.mean();
    let values = prediction.by_model();
    let variance = values.iter().map(|(_, v)| (v - mean).powi(2)).sum::<f64>() / 3.0;

    if mean.abs() < f64::EPSILON {
        return if variance == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - (variance.sqrt() / mean.abs()).min(1.0)
}

/// Prediction latency statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct LatencyStats {
    /// Samples in the window
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Point-in-time view served by the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Seconds since the service started
    pub uptime_secs: u64,
    pub predictions: u64,
    pub prediction_failures: u64,
    pub rows_inserted: u64,
    pub insert_failures: u64,
    pub retrains: u64,
    pub retrain_failures: u64,
    /// When the served bundle was last replaced by a retrain
    pub last_retrain: Option<DateTime<Utc>>,
    /// Predictions per second since startup
    pub throughput: f64,
    /// Recent mean agreement between the three models, 0 to 1
    pub model_agreement: f64,
    pub latency: LatencyStats,
}

/// Periodic metrics reporter
pub struct MetricsReporter {
    metrics: Arc<ServiceMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    /// Reporter logging `metrics` every `interval_secs` (at least 1).
    pub fn new(metrics: Arc<ServiceMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Log a summary every interval, forever.
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
