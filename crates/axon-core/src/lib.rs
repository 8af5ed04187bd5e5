//! # AxonRules Core
//!
//! Shared types for single-compartment excitable-membrane simulation.
//!
//! ## Design Philosophy
//!
//! 1. Preserve numerical equivalence with the classical 1952 formulation
//! 2. Guard every exponential against overflow and removable singularities
//! 3. Fail loudly: no silently propagated NaN, no automatic retry

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Common errors
#[derive(Debug, Error)]
pub enum AxonError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error(
        "Numerical divergence at step {step} (t = {time} ms); \
         last finite state: V = {v} mV, m = {m}, h = {h}, n = {n}"
    )]
    NumericalDivergence {
        step: usize,
        time: Time,
        v: Voltage,
        m: f64,
        h: f64,
        n: f64,
    },

    #[error("Rate function singularity unresolved at V = {v} mV")]
    SingularityGuard { v: Voltage },
}

pub type Result<T> = std::result::Result<T, AxonError>;

/// Time point (ms)
pub type Time = f64;

/// Voltage (mV)
pub type Voltage = f64;

/// Current density (uA/cm^2)
pub type Current = f64;

/// Conductance (mS/cm^2)
pub type Conductance = f64;

/// Capacitance (uF/cm^2)
pub type Capacitance = f64;

/// Time series data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Time points
    pub time: Vec<Time>,
    /// Values at each time point
    pub values: Vec<f64>,
    /// Variable name
    pub name: String,
    /// Units
    pub units: Option<String>,
}

impl TimeSeries {
    pub fn new(name: &str) -> Self {
        Self {
            time: Vec::new(),
            values: Vec::new(),
            name: name.to_string(),
            units: None,
        }
    }

    /// Preallocate storage for a run of known length
    pub fn with_capacity(name: &str, capacity: usize) -> Self {
        Self {
            time: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
            name: name.to_string(),
            units: None,
        }
    }

    pub fn with_units(mut self, units: &str) -> Self {
        self.units = Some(units.to_string());
        self
    }

    pub fn push(&mut self, t: Time, v: f64) {
        self.time.push(t);
        self.values.push(v);
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn last(&self) -> Option<(Time, f64)> {
        match (self.time.last(), self.values.last()) {
            (Some(&t), Some(&v)) => Some((t, v)),
            _ => None,
        }
    }
}

/// Lower voltage clamp applied before every rate evaluation (mV)
pub const V_CLAMP_MIN: Voltage = -100.0;

/// Upper voltage clamp applied before every rate evaluation (mV)
pub const V_CLAMP_MAX: Voltage = 100.0;

/// Below this distance from a linoid singularity the limit value is used
pub const SINGULARITY_EPS: f64 = 1e-6;

/// Rate function type
///
/// The closed forms of the voltage-dependent transition rates, named after
/// the GENESIS tabchannel conventions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RateFunction {
    /// Linoid form: a*(V+b)/(1 - exp(-(V+b)/c)), removable singularity at V = -b
    Linoid { a: f64, b: f64, c: f64 },
    /// Exponential: a*exp(-(V+b)/c)
    Exponential { a: f64, b: f64, c: f64 },
    /// Sigmoid: a/(1 + exp(-(V+b)/c))
    Sigmoid { a: f64, b: f64, c: f64 },
    /// Constant
    Constant(f64),
}

impl RateFunction {
    /// Evaluate rate (1/ms) at given voltage.
    ///
    /// The voltage is clamped into [`V_CLAMP_MIN`, `V_CLAMP_MAX`] before any
    /// exponential is taken; rates at the clamp boundary are degraded
    /// approximations rather than exact values. Near a linoid singularity
    /// the analytic limit a*c is substituted.
    pub fn eval(&self, v: Voltage) -> f64 {
        let v = v.clamp(V_CLAMP_MIN, V_CLAMP_MAX);
        match self {
            Self::Linoid { a, b, c } => {
                let x = v + b;
                if x.abs() < SINGULARITY_EPS {
                    // L'Hopital's rule for x -> 0
                    a * c
                } else {
                    a * x / (1.0 - (-x / c).exp())
                }
            }
            Self::Exponential { a, b, c } => a * (-(v + b) / c).exp(),
            Self::Sigmoid { a, b, c } => a / (1.0 + (-(v + b) / c).exp()),
            Self::Constant(r) => *r,
        }
    }

    /// Checked evaluation: a non-finite rate means the stable substitution
    /// did not cover this input regime.
    pub fn try_eval(&self, v: Voltage) -> Result<f64> {
        let rate = self.eval(v);
        if rate.is_finite() {
            Ok(rate)
        } else {
            Err(AxonError::SingularityGuard { v })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linoid_matches_closed_form() {
        let f = RateFunction::Linoid { a: 0.1, b: 40.0, c: 10.0 };
        let v: f64 = -65.0;
        let expected = 0.1 * (v + 40.0) / (1.0 - (-(v + 40.0) / 10.0).exp());
        assert!((f.eval(v) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_linoid_limit_at_singularity() {
        let f = RateFunction::Linoid { a: 0.1, b: 40.0, c: 10.0 };
        // exact singular point takes the limit a*c
        assert!((f.eval(-40.0) - 1.0).abs() < 1e-12);
        // evaluation just off the singularity stays continuous
        let near = f.eval(-40.0 + 1e-5);
        assert!((near - 1.0).abs() < 1e-4);
        assert!(f.eval(-40.0 - 1e-9).is_finite());
    }

    #[test]
    fn test_voltage_clamp() {
        let f = RateFunction::Exponential { a: 4.0, b: 65.0, c: 18.0 };
        // beyond the clamp range evaluation saturates instead of overflowing
        assert_eq!(f.eval(-1e6), f.eval(V_CLAMP_MIN));
        assert_eq!(f.eval(1e6), f.eval(V_CLAMP_MAX));
        assert!(f.eval(f64::MAX).is_finite());
    }

    #[test]
    fn test_sigmoid_bounds() {
        let f = RateFunction::Sigmoid { a: 1.0, b: 35.0, c: 10.0 };
        let low = f.eval(-100.0);
        let high = f.eval(100.0);
        assert!(low > 0.0 && low < 0.01);
        assert!(high > 0.99 && high <= 1.0);
    }

    #[test]
    fn test_try_eval() {
        let f = RateFunction::Linoid { a: 0.01, b: 55.0, c: 10.0 };
        let rate = f.try_eval(-55.0).unwrap();
        assert!((rate - 0.1).abs() < 1e-12);
        assert_eq!(RateFunction::Constant(0.5).try_eval(-65.0).unwrap(), 0.5);
    }

    #[test]
    fn test_try_eval_flags_nonfinite_rate() {
        // this exponential overflows even inside the clamp range
        let f = RateFunction::Exponential { a: 1e300, b: 100.0, c: -1.0 };
        assert!(f.eval(100.0).is_infinite());
        match f.try_eval(100.0) {
            Err(AxonError::SingularityGuard { v }) => assert_eq!(v, 100.0),
            other => panic!("expected SingularityGuard, got {other:?}"),
        }
    }

    #[test]
    fn test_time_series() {
        let mut ts = TimeSeries::new("voltage").with_units("mV");
        ts.push(0.0, -65.0);
        ts.push(0.1, -64.0);
        assert_eq!(ts.len(), 2);
        assert_eq!(ts.last(), Some((0.1, -64.0)));
        assert_eq!(ts.units.as_deref(), Some("mV"));
    }
}
