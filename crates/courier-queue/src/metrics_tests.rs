use super::*;

#[test]
fn test_metrics_new() {
    let metrics = MetricsCollector::new();
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.total_messages, 0);
    assert_eq!(snapshot.error_rate, 0.0);
    assert!(snapshot.last_processed_at.is_none());
}

#[test]
fn test_counters() {
    let metrics = MetricsCollector::new();
    metrics.record_enqueued();
    metrics.record_enqueued();
    metrics.record_failed();
    metrics.record_dead_lettered();
    metrics.set_queue_depth(7);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.total_messages, 2);
    assert_eq!(snapshot.failed_messages, 1);
    assert_eq!(snapshot.dead_letter_messages, 1);
    assert_eq!(snapshot.queue_depth, 7);
}

#[test]
fn test_recompute_derived() {
    let metrics = MetricsCollector::new();
    for _ in 0..4 {
        metrics.record_enqueued();
    }
    metrics.record_failed();
    metrics.record_processed(Duration::from_millis(10));
    metrics.record_processed(Duration::from_millis(30));

    // Not recomputed yet.
    assert_eq!(metrics.snapshot().error_rate, 0.0);

    metrics.recompute();
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.error_rate, 25.0);
    assert_eq!(snapshot.avg_processing_time_ms, 20.0);
    assert!(snapshot.throughput > 0.0);
    assert!(snapshot.last_processed_at.is_some());
}

#[test]
fn test_collection_disabled_freezes_gauges() {
    let metrics = MetricsCollector::new();
    metrics.record_enqueued();
    metrics.record_failed();
    metrics.recompute();
    assert_eq!(metrics.snapshot().error_rate, 100.0);

    metrics.set_collection(false);
    metrics.record_enqueued();
    metrics.recompute();

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.total_messages, 2);
    assert_eq!(snapshot.error_rate, 100.0);
}

#[test]
fn test_zero_division() {
    let metrics = MetricsCollector::new();
    metrics.recompute();
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.error_rate, 0.0);
    assert_eq!(snapshot.avg_processing_time_ms, 0.0);
}

#[test]
fn test_export_prometheus() {
    let metrics = MetricsCollector::new();
    metrics.record_enqueued();
    metrics.set_queue_depth(3);

    let text = metrics.snapshot().export_prometheus();
    assert!(text.contains("# TYPE courier_messages_total counter"));
    assert!(text.contains("courier_messages_total 1\n"));
    assert!(text.contains("courier_queue_depth 3\n"));
    assert!(text.contains("# HELP courier_error_rate"));
    assert!(text.contains("# TYPE courier_uptime_seconds gauge\n"));
    assert!(text.contains("courier_messages_dead_lettered_total 0\n"));
    assert_eq!(text.lines().filter(|line| line.starts_with("# TYPE")).count(), 9);
}
