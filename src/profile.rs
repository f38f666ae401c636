//! Per-batch session telemetry and the sliding statistics window that feeds
//! the adaptive controller.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Control triple emitted by the adapter after every dispatch.
///
/// `delay` is the inter-batch sleep in seconds, derived as
/// `max(0, concurrency / rate)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionControl {
    pub rate: f64,
    pub concurrency: f64,
    pub delay: f64,
}

impl SessionControl {
    pub fn new(rate: f64, concurrency: f64) -> Self {
        let delay = if rate > 0.0 {
            (concurrency / rate).max(0.0)
        } else {
            0.0
        };
        Self {
            rate,
            concurrency,
            delay,
        }
    }
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new(50.0, 5.0)
    }
}

/// Distribution summary over a pooled sample.
///
/// All fields are zero when the sample is empty; callers must treat a
/// zero average as "no signal", not as a stable baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionStats {
    pub count: usize,
    pub average: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
    pub cv: f64,
}

impl SessionStats {
    /// Computes the summary from a sample. NaN entries are discarded.
    pub fn from_samples(samples: &[f64]) -> Self {
        let mut values: Vec<f64> = samples.iter().copied().filter(|v| !v.is_nan()).collect();
        if values.is_empty() {
            return Self::default();
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let count = values.len();
        let sum: f64 = values.iter().sum();
        let average = sum / count as f64;
        let median = if count % 2 == 1 {
            values[count / 2]
        } else {
            (values[count / 2 - 1] + values[count / 2]) / 2.0
        };
        let variance = values
            .iter()
            .map(|v| (v - average).powi(2))
            .sum::<f64>()
            / count as f64;
        let std = variance.sqrt();
        let cv = if average > 0.0 { std / average } else { 0.0 };

        Self {
            count,
            average,
            median,
            min: values[0],
            max: values[count - 1],
            std,
            cv,
        }
    }

    /// True when the summary carries no observations.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Telemetry for a single dispatch: send/recv stamps, request and response
/// counts, and the per-request latencies observed in the batch.
#[derive(Debug, Clone, Default)]
pub struct SessionProfile {
    pub requests: usize,
    pub responses: usize,
    pub latencies: Vec<f64>,
    sent_at: Option<Instant>,
    recv_at: Option<Instant>,
}

impl SessionProfile {
    pub fn new(requests: usize) -> Self {
        Self {
            requests,
            ..Self::default()
        }
    }

    /// Marks the instant the batch was handed to the connection pool.
    pub fn send(&mut self) {
        self.sent_at = Some(Instant::now());
    }

    /// Marks the instant the last response arrived.
    pub fn recv(&mut self) {
        self.recv_at = Some(Instant::now());
    }

    pub fn add_latency(&mut self, latency: f64) {
        self.latencies.push(latency);
    }

    /// Wall time between send and recv, zero when either stamp is missing.
    pub fn duration(&self) -> f64 {
        match (self.sent_at, self.recv_at) {
            (Some(s), Some(r)) => r.saturating_duration_since(s).as_secs_f64(),
            _ => 0.0,
        }
    }

    /// Responses per second of batch duration.
    pub fn throughput(&self) -> f64 {
        let duration = self.duration();
        if duration > 0.0 {
            self.responses as f64 / duration
        } else {
            0.0
        }
    }

    /// Age of the recv stamp relative to `now`, or `None` if never received.
    fn recv_age(&self, now: Instant) -> Option<Duration> {
        self.recv_at.map(|r| now.saturating_duration_since(r))
    }
}

/// Thread-safe bounded window over recent session profiles, in insertion
/// order. Statistics pool the samples of every profile whose recv stamp
/// falls within the requested window.
#[derive(Debug)]
pub struct SessionHistory {
    profiles: Mutex<VecDeque<SessionProfile>>,
    capacity: usize,
}

pub const DEFAULT_HISTORY_SIZE: usize = 100;

impl SessionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            profiles: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
        }
    }

    pub fn add(&self, profile: SessionProfile) {
        let mut profiles = self.profiles.lock().unwrap();
        if profiles.len() == self.capacity {
            profiles.pop_front();
        }
        debug!(
            requests = profile.requests,
            responses = profile.responses,
            duration_secs = profile.duration(),
            "Recorded session profile"
        );
        profiles.push_back(profile);
    }

    pub fn len(&self) -> usize {
        self.profiles.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Latency statistics over profiles received within the last `window`
    /// seconds, or the entire history when `window` is `None`.
    pub fn latency_stats(&self, window: Option<Duration>) -> SessionStats {
        let now = Instant::now();
        let profiles = self.profiles.lock().unwrap();
        let pooled: Vec<f64> = profiles
            .iter()
            .filter(|p| Self::in_window(p, now, window))
            .flat_map(|p| p.latencies.iter().copied())
            .collect();
        SessionStats::from_samples(&pooled)
    }

    /// Throughput statistics over the same window selection.
    pub fn throughput_stats(&self, window: Option<Duration>) -> SessionStats {
        let now = Instant::now();
        let profiles = self.profiles.lock().unwrap();
        let pooled: Vec<f64> = profiles
            .iter()
            .filter(|p| Self::in_window(p, now, window))
            .map(|p| p.throughput())
            .collect();
        SessionStats::from_samples(&pooled)
    }

    fn in_window(profile: &SessionProfile, now: Instant, window: Option<Duration>) -> bool {
        match window {
            None => true,
            Some(w) => profile.recv_age(now).is_some_and(|age| age <= w),
        }
    }
}

impl Default for SessionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}
