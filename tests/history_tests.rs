//! Sliding-window statistics over the session history.

use std::time::Duration;

use appharvest::profile::{SessionHistory, SessionProfile};

fn profile(latencies: &[f64]) -> SessionProfile {
    let mut profile = SessionProfile::new(latencies.len());
    profile.send();
    for latency in latencies {
        profile.add_latency(*latency);
    }
    profile.responses = latencies.len();
    profile.recv();
    profile
}

#[test]
fn test_window_count_is_monotone_in_window_size() {
    let history = SessionHistory::new(100);
    for _ in 0..3 {
        history.add(profile(&[0.1, 0.2]));
        std::thread::sleep(Duration::from_millis(30));
    }

    let windows = [
        Duration::from_millis(1),
        Duration::from_millis(50),
        Duration::from_millis(100),
        Duration::from_secs(3600),
    ];
    let counts: Vec<usize> = windows
        .iter()
        .map(|w| history.latency_stats(Some(*w)).count)
        .collect();

    for pair in counts.windows(2) {
        assert!(pair[0] <= pair[1], "counts not monotone: {counts:?}");
    }
    // The unbounded window sees everything.
    assert_eq!(history.latency_stats(None).count, 6);
    assert_eq!(*counts.last().unwrap(), 6);
}

#[test]
fn test_stats_contract_on_empty_window() {
    let history = SessionHistory::new(10);
    let stats = history.latency_stats(Some(Duration::from_secs(60)));
    assert_eq!(stats.count, 0);
    assert_eq!(stats.average, 0.0);
    assert_eq!(stats.median, 0.0);
    assert_eq!(stats.min, 0.0);
    assert_eq!(stats.max, 0.0);
    assert_eq!(stats.std, 0.0);
    assert_eq!(stats.cv, 0.0);
}

#[test]
fn test_pooled_latency_statistics() {
    let history = SessionHistory::new(10);
    history.add(profile(&[0.1, 0.3]));
    history.add(profile(&[0.2]));

    let stats = history.latency_stats(None);
    assert_eq!(stats.count, 3);
    assert!((stats.average - 0.2).abs() < 1e-9);
    assert!((stats.median - 0.2).abs() < 1e-9);
    assert!((stats.min - 0.1).abs() < 1e-9);
    assert!((stats.max - 0.3).abs() < 1e-9);
    assert!(stats.std > 0.0);
    assert!((stats.cv - stats.std / stats.average).abs() < 1e-9);
}

#[test]
fn test_throughput_statistics() {
    let history = SessionHistory::new(10);
    history.add(profile(&[0.01, 0.01, 0.01]));
    let stats = history.throughput_stats(None);
    assert_eq!(stats.count, 1);
    assert!(stats.average > 0.0);
}

#[test]
fn test_capacity_evicts_oldest() {
    let history = SessionHistory::new(2);
    history.add(profile(&[0.1]));
    history.add(profile(&[0.2]));
    history.add(profile(&[0.3]));
    assert_eq!(history.len(), 2);
    let stats = history.latency_stats(None);
    // 0.1 was evicted.
    assert!((stats.min - 0.2).abs() < 1e-9);
}
