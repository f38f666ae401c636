//! Controller primitives: an elapsed-time clock and a bounded control scalar.
//!
//! `ControlValue` is the only place Gaussian noise enters the controller;
//! every mutation clips the result to the configured `[min, max]` band.

use rand_distr::{Distribution, Normal};
use std::time::{Duration, Instant};

/// Monotonic clock for stage and stabilization timing.
///
/// The clock is inactive until `start` is called; `reset` returns it to the
/// inactive state. `elapsed` returns `None` while inactive.
#[derive(Debug, Clone, Copy, Default)]
pub struct Clock {
    started_at: Option<Instant>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts or restarts the clock.
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Stops the clock, returning it to the inactive state.
    pub fn reset(&mut self) {
        self.started_at = None;
    }

    /// Time elapsed since `start`, or `None` if the clock is inactive.
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|t| t.elapsed())
    }

    /// Whether at least `period` has passed since `start`.
    ///
    /// An inactive clock has not elapsed anything.
    pub fn has_elapsed(&self, period: Duration) -> bool {
        self.elapsed().is_some_and(|e| e >= period)
    }

    pub fn is_active(&self) -> bool {
        self.started_at.is_some()
    }
}

/// A bounded scalar with additive-up / multiplicative-down adjustment and
/// optional Gaussian noise, used for the request rate and concurrency.
#[derive(Debug, Clone)]
pub struct ControlValue {
    current: f64,
    min: f64,
    max: f64,
    additive: f64,
    multiplicative: f64,
    temperature: f64,
    initial: f64,
}

impl ControlValue {
    pub fn new(
        initial: f64,
        min: f64,
        max: f64,
        additive: f64,
        multiplicative: f64,
        temperature: f64,
    ) -> Self {
        let clipped = initial.clamp(min, max);
        Self {
            current: clipped,
            min,
            max,
            additive,
            multiplicative,
            temperature,
            initial: clipped,
        }
    }

    /// A value that is only ever noised, never stepped.
    pub fn noised(initial: f64, min: f64, max: f64, temperature: f64) -> Self {
        Self::new(initial, min, max, 0.0, 1.0, temperature)
    }

    pub fn value(&self) -> f64 {
        self.current
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Assigns `value` directly, clipped to the band. NaN is discarded.
    pub fn set(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }
        self.current = value.clamp(self.min, self.max);
    }

    /// Additive increase with noise: `clip(current + additive + N(0, T))`.
    pub fn increase(&mut self) {
        let next = self.current + self.additive + self.noise();
        self.current = next.clamp(self.min, self.max);
    }

    /// Multiplicative decrease with noise: `clip(current * mult + N(0, T))`.
    pub fn decrease(&mut self) {
        let next = self.current * self.multiplicative + self.noise();
        self.current = next.clamp(self.min, self.max);
    }

    /// Perturbs the value in place: `clip(current + N(0, T))`.
    pub fn add_noise(&mut self) {
        let next = self.current + self.noise();
        self.current = next.clamp(self.min, self.max);
    }

    /// Restores the value given at construction.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    fn noise(&self) -> f64 {
        if self.temperature <= 0.0 {
            return 0.0;
        }
        match Normal::new(0.0, self.temperature) {
            Ok(dist) => dist.sample(&mut rand::thread_rng()),
            Err(_) => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_inactive_until_started() {
        let mut clock = Clock::new();
        assert!(!clock.is_active());
        assert!(clock.elapsed().is_none());
        assert!(!clock.has_elapsed(Duration::ZERO));

        clock.start();
        assert!(clock.is_active());
        assert!(clock.elapsed().is_some());
    }

    #[test]
    fn test_clock_reset_deactivates() {
        let mut clock = Clock::new();
        clock.start();
        clock.reset();
        assert!(!clock.is_active());
        assert!(clock.elapsed().is_none());
    }

    #[test]
    fn test_clock_has_elapsed() {
        let mut clock = Clock::new();
        clock.start();
        assert!(clock.has_elapsed(Duration::ZERO));
        assert!(!clock.has_elapsed(Duration::from_secs(3600)));
    }

    #[test]
    fn test_increase_clips_to_max() {
        let mut v = ControlValue::new(95.0, 1.0, 100.0, 10.0, 0.5, 0.0);
        v.increase();
        assert_eq!(v.value(), 100.0);
    }

    #[test]
    fn test_decrease_clips_to_min() {
        let mut v = ControlValue::new(2.0, 1.5, 100.0, 10.0, 0.5, 0.0);
        v.decrease();
        assert_eq!(v.value(), 1.5);
    }

    #[test]
    fn test_increase_without_noise_is_additive() {
        let mut v = ControlValue::new(50.0, 1.0, 500.0, 5.0, 0.9, 0.0);
        v.increase();
        assert_eq!(v.value(), 55.0);
    }

    #[test]
    fn test_decrease_without_noise_is_multiplicative() {
        let mut v = ControlValue::new(50.0, 1.0, 500.0, 5.0, 0.9, 0.0);
        v.decrease();
        assert!((v.value() - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_noise_stays_in_band() {
        let mut v = ControlValue::new(50.0, 40.0, 60.0, 1.0, 0.9, 25.0);
        for _ in 0..1000 {
            v.add_noise();
            assert!(v.value() >= 40.0 && v.value() <= 60.0);
        }
    }

    #[test]
    fn test_reset_restores_initial() {
        let mut v = ControlValue::new(50.0, 1.0, 500.0, 5.0, 0.9, 0.0);
        v.increase();
        v.increase();
        v.reset();
        assert_eq!(v.value(), 50.0);
    }

    #[test]
    fn test_set_discards_nan() {
        let mut v = ControlValue::new(50.0, 1.0, 500.0, 5.0, 0.9, 0.0);
        v.set(f64::NAN);
        assert_eq!(v.value(), 50.0);
        v.set(1000.0);
        assert_eq!(v.value(), 500.0);
    }
}
