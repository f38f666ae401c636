//! Adaptive rate/concurrency controller.
//!
//! A four-stage state machine driven by observed latency statistics:
//!
//! Baseline -> RateExplore -> ConcurrencyExplore -> Exploit -> Baseline ...
//!
//! Baseline holds concurrency fixed and perturbs the rate to collect a
//! reference latency distribution. The explore stages alternate step and
//! stabilize phases, increasing the controlled value while the system stays
//! within threshold of the baseline and backing off multiplicatively when it
//! does not. Exploit applies a closed-form rate correction from the latency
//! and coefficient-of-variation ratios. Transitions are driven solely by
//! each stage's `response_time` elapsing.

use tracing::{debug, info};

use crate::config::{AdapterConfig, StageConfig};
use crate::control::{Clock, ControlValue};
use crate::profile::{SessionControl, SessionHistory, SessionStats};

/// Stage discriminant, exposed for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Baseline,
    RateExplore,
    ConcurrencyExplore,
    Exploit,
}

impl StageKind {
    pub fn label(&self) -> &'static str {
        match self {
            StageKind::Baseline => "baseline",
            StageKind::RateExplore => "rate_explore",
            StageKind::ConcurrencyExplore => "concurrency_explore",
            StageKind::Exploit => "exploit",
        }
    }

    fn next(&self) -> StageKind {
        match self {
            StageKind::Baseline => StageKind::RateExplore,
            StageKind::RateExplore => StageKind::ConcurrencyExplore,
            StageKind::ConcurrencyExplore => StageKind::Exploit,
            StageKind::Exploit => StageKind::Baseline,
        }
    }
}

/// Controller context. Owns the active stage and the session control emitted
/// to the dispatcher after each call.
pub struct Adapter {
    config: AdapterConfig,
    stage: Stage,
    session_control: SessionControl,
    /// Latency snapshot captured when Baseline ends; immutable for the rest
    /// of the cycle.
    baseline: SessionStats,
}

impl Adapter {
    pub fn new(config: AdapterConfig) -> Self {
        let initial = SessionControl::new(
            config.baseline.rate.base,
            config.baseline.concurrency.base,
        );
        let stage = Stage::baseline(&config.baseline);
        Self {
            config,
            stage,
            session_control: initial,
            baseline: SessionStats::default(),
        }
    }

    pub fn session_control(&self) -> SessionControl {
        self.session_control
    }

    pub fn stage_kind(&self) -> StageKind {
        self.stage.kind
    }

    pub fn baseline_stats(&self) -> SessionStats {
        self.baseline
    }

    /// One controller tick: begin the stage if needed, execute its policy
    /// against the history, emit the control triple, and hand off to the
    /// next stage once the stage duration has elapsed.
    pub fn adapt_requests(&mut self, history: &SessionHistory) {
        self.stage.begin_session(self.session_control);
        self.session_control = self.stage.execute_session(history, self.baseline);
        self.end_session(history);
    }

    fn end_session(&mut self, history: &SessionHistory) {
        if !self
            .stage
            .stage_clock
            .has_elapsed(self.stage.config.response_time_duration())
        {
            return;
        }

        // Baseline hands its closing latency snapshot to the rest of the
        // cycle; the snapshot stays frozen until the next Baseline ends.
        if self.stage.kind == StageKind::Baseline {
            self.baseline = history.latency_stats(self.stage.config.window());
            debug!(
                count = self.baseline.count,
                average = self.baseline.average,
                cv = self.baseline.cv,
                "Captured baseline latency snapshot"
            );
        }

        let next = self.stage.kind.next();
        info!(
            from = self.stage.kind.label(),
            to = next.label(),
            "Adapter transitioning stage"
        );
        self.stage = Stage::for_kind(next, self.stage_config(next));
    }

    fn stage_config(&self, kind: StageKind) -> StageConfig {
        match kind {
            StageKind::Baseline => self.config.baseline.clone(),
            StageKind::RateExplore => self.config.rate_explore.clone(),
            StageKind::ConcurrencyExplore => self.config.concurrency_explore.clone(),
            StageKind::Exploit => self.config.exploit.clone(),
        }
    }
}

/// One stage of the cycle. The same struct serves all four kinds; the kind
/// selects the policy applied on each tick.
struct Stage {
    kind: StageKind,
    config: StageConfig,
    stage_clock: Clock,
    step_clock: Clock,
    stabilizing: bool,
    rate: ControlValue,
    concurrency: ControlValue,
}

impl Stage {
    fn baseline(config: &StageConfig) -> Self {
        Self::new(StageKind::Baseline, config.clone())
    }

    fn for_kind(kind: StageKind, config: StageConfig) -> Self {
        Self::new(kind, config)
    }

    fn new(kind: StageKind, config: StageConfig) -> Self {
        let rate = ControlValue::new(
            config.rate.base,
            config.rate.min,
            config.rate.max,
            config.step_increase,
            config.step_decrease,
            config.temperature,
        );
        let concurrency = ControlValue::new(
            config.concurrency.base,
            config.concurrency.min,
            config.concurrency.max,
            config.step_increase,
            config.step_decrease,
            config.temperature,
        );
        Self {
            kind,
            config,
            stage_clock: Clock::new(),
            step_clock: Clock::new(),
            stabilizing: false,
            rate,
            concurrency,
        }
    }

    /// Starts the stage on its first tick, seeding control values from the
    /// control triple the previous stage left behind.
    fn begin_session(&mut self, inherited: SessionControl) {
        if self.stage_clock.is_active() {
            return;
        }
        self.stage_clock.start();

        match self.kind {
            StageKind::Baseline => {}
            StageKind::RateExplore => {
                // Rate explores from its configured base; concurrency is
                // carried forward unchanged.
                self.concurrency = ControlValue::noised(
                    inherited.concurrency,
                    self.config.concurrency.min,
                    self.config.concurrency.max,
                    0.0,
                );
            }
            StageKind::ConcurrencyExplore => {
                // Concurrency explores; the rate found by the prior stage is
                // only ever noised from here on.
                self.rate = ControlValue::noised(
                    inherited.rate,
                    self.config.rate.min,
                    self.config.rate.max,
                    self.config.temperature,
                );
            }
            StageKind::Exploit => {
                self.rate = ControlValue::noised(
                    inherited.rate,
                    self.config.rate.min,
                    self.config.rate.max,
                    0.0,
                );
                self.concurrency = ControlValue::noised(
                    inherited.concurrency,
                    self.config.concurrency.min,
                    self.config.concurrency.max,
                    0.0,
                );
            }
        }
    }

    fn execute_session(&mut self, history: &SessionHistory, baseline: SessionStats) -> SessionControl {
        match self.kind {
            StageKind::Baseline => {
                self.rate.add_noise();
            }
            StageKind::RateExplore => {
                if self.in_stabilization_period() {
                    self.rate.add_noise();
                } else {
                    self.step(history, baseline, Controlled::Rate);
                }
            }
            StageKind::ConcurrencyExplore => {
                if self.in_stabilization_period() {
                    self.rate.add_noise();
                } else {
                    self.step(history, baseline, Controlled::Concurrency);
                }
            }
            StageKind::Exploit => {
                self.exploit(history, baseline);
            }
        }
        SessionControl::new(self.rate.value(), self.concurrency.value())
    }

    /// Step phase of an explore stage: widen the controlled value while the
    /// system tracks the baseline, back off when it does not, then re-enter
    /// the stabilization window.
    fn step(&mut self, history: &SessionHistory, baseline: SessionStats, controlled: Controlled) {
        let stable = self.system_stable(history, baseline);
        let value = match controlled {
            Controlled::Rate => &mut self.rate,
            Controlled::Concurrency => &mut self.concurrency,
        };
        if stable {
            value.increase();
        } else {
            value.decrease();
        }
        debug!(
            stage = self.kind.label(),
            stable,
            value = value.value(),
            "Explore step applied"
        );
        self.step_clock.start();
        self.stabilizing = true;
    }

    /// Closed-form exploit correction:
    /// `rate * (1 - k*(latency_ratio - 1)) * (1 - m*(cv_ratio - 1))`,
    /// clipped to the configured band on assignment.
    fn exploit(&mut self, history: &SessionHistory, baseline: SessionStats) {
        let current = history.latency_stats(self.config.window());
        let latency_ratio = ratio(current.average, baseline.average);
        let cv_ratio = ratio(current.cv, baseline.cv);

        let adjusted = self.rate.value()
            * (1.0 - self.config.k * (latency_ratio - 1.0))
            * (1.0 - self.config.m * (cv_ratio - 1.0));
        self.rate.set(adjusted);

        debug!(
            latency_ratio,
            cv_ratio,
            rate = self.rate.value(),
            "Exploit adjustment applied"
        );
    }

    /// Stability test against the frozen baseline snapshot. An empty or
    /// degenerate baseline reads as stable so exploration still proceeds.
    fn system_stable(&self, history: &SessionHistory, baseline: SessionStats) -> bool {
        if baseline.is_empty() || baseline.average <= 0.0 || baseline.average.is_nan() {
            return true;
        }
        let current = history.latency_stats(self.config.window());
        if current.is_empty() || current.average.is_nan() {
            return true;
        }
        let average_ok = current.average <= baseline.average * self.config.threshold;
        let cv_ok = current.cv <= baseline.cv * self.config.threshold;
        let stable = average_ok && cv_ok;
        if !stable {
            debug!(
                stage = self.kind.label(),
                current_average = current.average,
                baseline_average = baseline.average,
                current_cv = current.cv,
                baseline_cv = baseline.cv,
                "System outside stability threshold"
            );
        }
        stable
    }

    /// The stabilization window holds between a step and the elapse of
    /// `step_response_time`. An inactive step clock means no step has been
    /// taken yet, so the stage adapts immediately.
    fn in_stabilization_period(&mut self) -> bool {
        let should_exit = !self.step_clock.is_active()
            || self
                .step_clock
                .has_elapsed(self.config.step_response_time_duration());
        if should_exit {
            if self.stabilizing {
                debug!(stage = self.kind.label(), "Exiting stabilization period");
            }
            self.stabilizing = false;
        } else {
            if !self.stabilizing {
                debug!(stage = self.kind.label(), "Entering stabilization period");
            }
            self.stabilizing = true;
        }
        self.stabilizing
    }
}

enum Controlled {
    Rate,
    Concurrency,
}

/// `current / baseline`, collapsing to 1 when the denominator carries no
/// signal (avoids division traps on empty windows).
fn ratio(current: f64, baseline: f64) -> f64 {
    if baseline <= 0.0 || baseline.is_nan() || current.is_nan() {
        1.0
    } else {
        current / baseline
    }
}
