//! Queue metrics collection.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

#[derive(Debug, Default, Clone, Copy)]
struct Derived {
    throughput: f64,
    error_rate: f64,
    avg_processing_time_ms: f64,
}

/// Queue metrics.
///
/// Counters are always updated. The derived gauges (throughput, error rate,
/// average processing time) only move when [`MetricsCollector::recompute`]
/// runs with collection enabled.
#[derive(Debug)]
pub struct MetricsCollector {
    /// Messages accepted by enqueue, replays included.
    pub total_messages: AtomicU64,

    /// Messages processed successfully.
    pub processed_messages: AtomicU64,

    /// Failed processing attempts.
    pub failed_messages: AtomicU64,

    /// Messages moved to the dead letter set.
    pub dead_letter_messages: AtomicU64,

    /// Accumulated processing time of successful attempts (microseconds).
    pub processing_time_us: AtomicU64,

    /// Aggregate depth across every named queue.
    pub queue_depth: AtomicU64,

    collect: AtomicBool,
    derived: RwLock<Derived>,
    last_processed_at: RwLock<Option<DateTime<Utc>>>,
    start_time: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            total_messages: AtomicU64::new(0),
            processed_messages: AtomicU64::new(0),
            failed_messages: AtomicU64::new(0),
            dead_letter_messages: AtomicU64::new(0),
            processing_time_us: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            collect: AtomicBool::new(true),
            derived: RwLock::new(Derived::default()),
            last_processed_at: RwLock::new(None),
            start_time: Instant::now(),
        }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn recomputation of the derived gauges on or off.
    pub fn set_collection(&self, enabled: bool) {
        self.collect.store(enabled, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful attempt and its duration.
    pub fn record_processed(&self, elapsed: Duration) {
        self.processed_messages.fetch_add(1, Ordering::Relaxed);
        self.processing_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        *self.last_processed_at.write() = Some(Utc::now());
    }

    pub fn record_failed(&self) {
        self.failed_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self) {
        self.dead_letter_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth as u64, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Recompute the derived gauges from the counters.
    pub fn recompute(&self) {
        if !self.collect.load(Ordering::Relaxed) {
            return;
        }
        let total = self.total_messages.load(Ordering::Relaxed);
        let processed = self.processed_messages.load(Ordering::Relaxed);
        let failed = self.failed_messages.load(Ordering::Relaxed);
        let time_us = self.processing_time_us.load(Ordering::Relaxed);
        let elapsed = self.uptime().as_secs_f64();

        *self.derived.write() = Derived {
            throughput: if elapsed > 0.0 {
                processed as f64 / elapsed
            } else {
                0.0
            },
            error_rate: if total > 0 {
                failed as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            avg_processing_time_ms: if processed > 0 {
                time_us as f64 / processed as f64 / 1000.0
            } else {
                0.0
            },
        };
    }

    /// Get a snapshot of the metrics.
    pub fn snapshot(&self) -> QueueMetrics {
        let derived = *self.derived.read();
        QueueMetrics {
            timestamp: Utc::now(),
            total_messages: self.total_messages.load(Ordering::Relaxed),
            processed_messages: self.processed_messages.load(Ordering::Relaxed),
            failed_messages: self.failed_messages.load(Ordering::Relaxed),
            dead_letter_messages: self.dead_letter_messages.load(Ordering::Relaxed),
            avg_processing_time_ms: derived.avg_processing_time_ms,
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            throughput: derived.throughput,
            error_rate: derived.error_rate,
            last_processed_at: *self.last_processed_at.read(),
            uptime_secs: self.uptime().as_secs(),
        }
    }
}

/// Snapshot of queue metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueMetrics {
    pub timestamp: DateTime<Utc>,
    pub total_messages: u64,
    pub processed_messages: u64,
    pub failed_messages: u64,
    pub dead_letter_messages: u64,
    pub avg_processing_time_ms: f64,
    pub queue_depth: u64,
    /// Processed messages per second since start.
    pub throughput: f64,
    /// Failed attempts per hundred accepted messages.
    pub error_rate: f64,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
}

impl QueueMetrics {
    /// Render in the Prometheus text exposition format.
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        push_metric(
            &mut output,
            "courier_messages_total",
            "counter",
            "Messages accepted by enqueue",
            self.total_messages,
        );
        push_metric(
            &mut output,
            "courier_messages_processed_total",
            "counter",
            "Messages processed successfully",
            self.processed_messages,
        );
        push_metric(
            &mut output,
            "courier_messages_failed_total",
            "counter",
            "Failed processing attempts",
            self.failed_messages,
        );
        push_metric(
            &mut output,
            "courier_messages_dead_lettered_total",
            "counter",
            "Messages moved to the dead letter set",
            self.dead_letter_messages,
        );
        push_metric(
            &mut output,
            "courier_queue_depth",
            "gauge",
            "Messages waiting across all queues",
            self.queue_depth,
        );
        push_metric(
            &mut output,
            "courier_processing_time_avg_ms",
            "gauge",
            "Average processing time in milliseconds",
            self.avg_processing_time_ms,
        );
        push_metric(
            &mut output,
            "courier_throughput",
            "gauge",
            "Processed messages per second",
            self.throughput,
        );
        push_metric(
            &mut output,
            "courier_error_rate",
            "gauge",
            "Failed attempts per hundred messages",
            self.error_rate,
        );
        push_metric(
            &mut output,
            "courier_uptime_seconds",
            "gauge",
            "Seconds since the queue was created",
            self.uptime_secs,
        );

        output
    }
}

fn push_metric(output: &mut String, name: &str, kind: &str, help: &str, value: impl Display) {
    output.push_str(&format!("# HELP {} {}\n", name, help));
    output.push_str(&format!("# TYPE {} {}\n", name, kind));
    output.push_str(&format!("{} {}\n", name, value));
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
