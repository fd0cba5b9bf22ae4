//! Dead-time correction.
//!
//! Both models are local to one element in one frame. Numeric failures never escape as errors;
//! the value is substituted and an [ElementFault] is attached instead, so one bad element cannot
//! block its siblings.
use ndarray::{Array1, ArrayView1};

use super::constants::{
    IN_WINDOW_COUNT_OFFSET, LIVE_CLOCK_OFFSET, RESET_COUNT_OFFSET, RESET_TICK, TOTAL_COUNT_OFFSET,
};
use super::error::ElementFault;
use super::parameters::DeadtimeParams;

const RATE_SOLVER_ITERATIONS: usize = 64;

/// The four hardware counters of one element in one frame, widened to 64 bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawScalers {
    pub total: i64,
    pub reset: i64,
    pub in_window: i64,
    pub live_clock: i64,
}

impl RawScalers {
    pub fn new(total: i64, reset: i64, in_window: i64, live_clock: i64) -> Self {
        Self {
            total,
            reset,
            in_window,
            live_clock,
        }
    }

    /// Build from one decoded [total, reset, in-window, live clock] row
    pub fn from_counters(counters: ArrayView1<u32>) -> Self {
        let widened = |offset: usize| i64::from(counters[offset]);
        Self {
            total: widened(TOTAL_COUNT_OFFSET),
            reset: widened(RESET_COUNT_OFFSET),
            in_window: widened(IN_WINDOW_COUNT_OFFSET),
            live_clock: widened(LIVE_CLOCK_OFFSET),
        }
    }

    /// More events in the window than in total
    pub fn is_corrupt(&self) -> bool {
        self.in_window > self.total
    }

    /// Clock time not lost to resets
    pub fn live_seconds(&self, clock_period: f64) -> f64 {
        (self.live_clock - self.reset) as f64 * clock_period
    }

    /// Whole frame time
    pub fn frame_seconds(&self, clock_period: f64) -> f64 {
        self.live_clock as f64 * clock_period
    }
}

/// Outcome of correcting one element's in-window scaler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalerCorrection {
    pub value: f64,
    /// Multiplier applied uniformly to the element's spectrum
    pub factor: f64,
    pub fault: Option<ElementFault>,
}

impl ScalerCorrection {
    fn faulted(value: f64, factor: f64, fault: ElementFault) -> Self {
        Self {
            value,
            factor,
            fault: Some(fault),
        }
    }

    /// Zero value and factor, used for excluded elements
    pub fn zero() -> Self {
        Self {
            value: 0.0,
            factor: 0.0,
            fault: None,
        }
    }
}

/// Correct the in-window scaler of one element with its configured model
pub fn correct_scaler(
    raw: &RawScalers,
    params: &DeadtimeParams,
    clock_period: f64,
) -> ScalerCorrection {
    if raw.is_corrupt() {
        return ScalerCorrection::faulted(0.0, 0.0, ElementFault::CorruptFrame);
    }
    if raw.in_window <= 0 || raw.total <= 0 {
        return ScalerCorrection::faulted(0.0, 1.0, ElementFault::ZeroCounts);
    }
    match params {
        DeadtimeParams::Cubic {
            process_dead_time_in_window,
        } => correct_cubic(raw, *process_dead_time_in_window, clock_period),
        DeadtimeParams::Ratio { .. } => correct_ratio(raw, clock_period),
    }
}

/// Ratio model: factor = total / in-window, valid while the measured rate is finite
fn correct_ratio(raw: &RawScalers, clock_period: f64) -> ScalerCorrection {
    let live_seconds = raw.live_seconds(clock_period);
    let measured_rate = raw.total as f64 / live_seconds;
    if !measured_rate.is_finite() || live_seconds <= 0.0 {
        return ScalerCorrection::faulted(0.0, 0.0, ElementFault::RateUndefined);
    }
    let in_window = raw.in_window as f64;
    let factor = raw.total as f64 / in_window;
    // in_window * factor, which is the total count
    let value = raw.total as f64;
    if !factor.is_finite() || !value.is_finite() {
        return ScalerCorrection::faulted(in_window, 1.0, ElementFault::Uncorrectable);
    }
    ScalerCorrection {
        value,
        factor,
        fault: None,
    }
}

/// Legacy model: reset rescaling, then the closed form root of the non-paralyzable cubic
fn correct_cubic(raw: &RawScalers, dead_time: f64, clock_period: f64) -> ScalerCorrection {
    let in_window = raw.in_window as f64;
    let frame_seconds = raw.frame_seconds(clock_period);
    match relinearize(raw, dead_time, frame_seconds) {
        Some(value) => ScalerCorrection {
            value,
            factor: value / in_window,
            fault: None,
        },
        None => ScalerCorrection::faulted(in_window, 1.0, ElementFault::Uncorrectable),
    }
}

/// Corrected windowed count, truncated to a whole count. None when the solution is not finite.
pub fn relinearize(raw: &RawScalers, dead_time: f64, seconds: f64) -> Option<f64> {
    if raw.in_window <= 0 || raw.total <= 0 {
        return Some(0.0);
    }
    if dead_time <= 0.0 || seconds <= 0.0 {
        return None;
    }
    let reset_rate = raw.reset as f64 / seconds;
    let rescale = 1.0 / (1.0 - reset_rate * RESET_TICK);
    let total_rate = rescale * raw.total as f64 / seconds;
    let windowed_rate = rescale * raw.in_window as f64 / seconds;

    let tau_squared = dead_time * dead_time;
    let tau_cubed = tau_squared * dead_time;

    let mut big = (4.0 - 20.0 * dead_time * total_rate
        + 27.0 * tau_squared * total_rate * total_rate)
        .sqrt();
    big = big * 3.0f64.sqrt() / (9.0 * tau_cubed);
    big = big - 10.0 / (27.0 * tau_cubed) + total_rate / tau_squared;
    big = big.powf(1.0 / 3.0);

    let working = (big - 2.0 / (9.0 * tau_squared * big) + 2.0 / (3.0 * dead_time)) / total_rate;
    let value = (working * windowed_rate * seconds).trunc();
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}

/// Apply a per-element factor uniformly to every bin
pub fn correct_spectrum(raw: ArrayView1<u32>, factor: f64) -> Array1<f64> {
    raw.mapv(|count| count as f64 * factor)
}

/// Live statistics of one element, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LiveStats {
    /// Total events per second of live time
    pub measured_rate: f64,
    /// Factor the configured model applies to the in-window scaler
    pub factor: f64,
    /// In-window events per second of live time
    pub in_window_rate: f64,
    /// Hardware model factor from the process dead times; ratio model only
    pub model_factor: Option<f64>,
}

pub fn live_stats(
    raw: &RawScalers,
    params: &DeadtimeParams,
    clock_period: f64,
    deadtime_energy: f64,
) -> LiveStats {
    let live_seconds = raw.live_seconds(clock_period);
    let measured_rate = raw.total as f64 / live_seconds;
    if !measured_rate.is_finite() || live_seconds <= 0.0 {
        return LiveStats::default();
    }
    let correction = correct_scaler(raw, params, clock_period);
    let model_factor = match params {
        DeadtimeParams::Ratio { tau, .. } => {
            let input_rate =
                paralyzable_input_rate(measured_rate, params.all_event_dead_time(deadtime_energy));
            let factor = raw.live_clock as f64 / (raw.live_clock - raw.reset) as f64
                * (2.0 * input_rate * tau).exp();
            factor.is_finite().then_some(factor)
        }
        DeadtimeParams::Cubic { .. } => None,
    };
    LiveStats {
        measured_rate,
        factor: correction.factor,
        in_window_rate: raw.in_window as f64 / live_seconds,
        model_factor,
    }
}

/// Invert measured = input * exp(-input * dead_time) on the rising branch. Rates beyond the
/// peak of the curve saturate at 1/dead_time.
pub fn paralyzable_input_rate(measured_rate: f64, dead_time: f64) -> f64 {
    if dead_time <= 0.0 || measured_rate <= 0.0 {
        return measured_rate.max(0.0);
    }
    let peak = 1.0 / dead_time;
    if measured_rate >= peak * (-1.0f64).exp() {
        return peak;
    }
    let mut low = measured_rate;
    let mut high = peak;
    for _ in 0..RATE_SOLVER_ITERATIONS {
        let mid = 0.5 * (low + high);
        if mid * (-mid * dead_time).exp() < measured_rate {
            low = mid;
        } else {
            high = mid;
        }
    }
    0.5 * (low + high)
}
