//! # Axon-HH: Single-Compartment Hodgkin-Huxley Simulator
//!
//! Deterministic simulation of the classical squid-giant-axon membrane model
//! (Hodgkin & Huxley, 1952): membrane voltage plus the m, h, n gating
//! variables, integrated with fixed-step classical Runge-Kutta under an
//! externally injected current protocol.
//!
//! Key features:
//! - Voltage-clamped, singularity-guarded transition rates
//! - Pure derivative computation (no hidden state)
//! - RK4 with zero-order-hold stimulus and hard gating bounds
//! - Configurable rectangular/ramp current protocols
//! - Strictly sequential per-trajectory loop, rayon across trajectories

use axon_core::{
    AxonError, Capacitance, Conductance, Current, RateFunction, Result, Time, TimeSeries, Voltage,
};
use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

// ============================================================================
// GATE KINETICS
// ============================================================================

/// Sodium activation opening rate
const ALPHA_M: RateFunction = RateFunction::Linoid { a: 0.1, b: 40.0, c: 10.0 };
/// Sodium activation closing rate
const BETA_M: RateFunction = RateFunction::Exponential { a: 4.0, b: 65.0, c: 18.0 };
/// Sodium inactivation opening rate
const ALPHA_H: RateFunction = RateFunction::Exponential { a: 0.07, b: 65.0, c: 20.0 };
/// Sodium inactivation closing rate
const BETA_H: RateFunction = RateFunction::Sigmoid { a: 1.0, b: 35.0, c: 10.0 };
/// Potassium activation opening rate
const ALPHA_N: RateFunction = RateFunction::Linoid { a: 0.01, b: 55.0, c: 10.0 };
/// Potassium activation closing rate
const BETA_N: RateFunction = RateFunction::Exponential { a: 0.125, b: 65.0, c: 80.0 };

pub fn alpha_m(v: Voltage) -> f64 {
    ALPHA_M.eval(v)
}

pub fn beta_m(v: Voltage) -> f64 {
    BETA_M.eval(v)
}

pub fn alpha_h(v: Voltage) -> f64 {
    ALPHA_H.eval(v)
}

pub fn beta_h(v: Voltage) -> f64 {
    BETA_H.eval(v)
}

pub fn alpha_n(v: Voltage) -> f64 {
    ALPHA_N.eval(v)
}

pub fn beta_n(v: Voltage) -> f64 {
    BETA_N.eval(v)
}

/// Steady-state sodium activation at the given voltage
pub fn m_inf(v: Voltage) -> f64 {
    steady_state(alpha_m(v), beta_m(v))
}

/// Steady-state sodium inactivation at the given voltage
pub fn h_inf(v: Voltage) -> f64 {
    steady_state(alpha_h(v), beta_h(v))
}

/// Steady-state potassium activation at the given voltage
pub fn n_inf(v: Voltage) -> f64 {
    steady_state(alpha_n(v), beta_n(v))
}

fn steady_state(alpha: f64, beta: f64) -> f64 {
    alpha / (alpha + beta)
}

/// All six transition rates evaluated at one voltage (1/ms)
#[derive(Debug, Clone, Copy)]
pub struct RateTable {
    pub alpha_m: f64,
    pub beta_m: f64,
    pub alpha_h: f64,
    pub beta_h: f64,
    pub alpha_n: f64,
    pub beta_n: f64,
}

impl RateTable {
    pub fn at(v: Voltage) -> Self {
        Self {
            alpha_m: alpha_m(v),
            beta_m: beta_m(v),
            alpha_h: alpha_h(v),
            beta_h: beta_h(v),
            alpha_n: alpha_n(v),
            beta_n: beta_n(v),
        }
    }

    /// Checked variant used when seeding the resting state
    pub fn try_at(v: Voltage) -> Result<Self> {
        Ok(Self {
            alpha_m: ALPHA_M.try_eval(v)?,
            beta_m: BETA_M.try_eval(v)?,
            alpha_h: ALPHA_H.try_eval(v)?,
            beta_h: BETA_H.try_eval(v)?,
            alpha_n: ALPHA_N.try_eval(v)?,
            beta_n: BETA_N.try_eval(v)?,
        })
    }
}

// ============================================================================
// MEMBRANE PARAMETERS
// ============================================================================

/// Physical constants of the membrane patch, immutable for a run.
///
/// Units follow the original formulation: capacitance in uF/cm^2,
/// conductances in mS/cm^2, potentials in mV.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MembraneParameters {
    /// Membrane capacitance
    pub c_m: Capacitance,
    /// Maximum sodium conductance
    pub g_na: Conductance,
    /// Maximum potassium conductance
    pub g_k: Conductance,
    /// Leak conductance
    pub g_l: Conductance,
    /// Sodium reversal potential
    pub e_na: Voltage,
    /// Potassium reversal potential
    pub e_k: Voltage,
    /// Leak reversal potential
    pub e_l: Voltage,
    /// Resting potential used to seed the gates
    pub v_rest: Voltage,
}

impl Default for MembraneParameters {
    fn default() -> Self {
        Self::squid_giant_axon()
    }
}

impl MembraneParameters {
    /// The 1952 squid giant axon constants
    pub fn squid_giant_axon() -> Self {
        Self {
            c_m: 1.0,
            g_na: 120.0,
            g_k: 36.0,
            g_l: 0.3,
            e_na: 50.0,
            e_k: -77.0,
            e_l: -54.387,
            v_rest: -65.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.c_m.is_finite() || self.c_m <= 0.0 {
            return Err(AxonError::InvalidParameter(format!(
                "membrane capacitance must be positive, got {}",
                self.c_m
            )));
        }
        for (name, g) in [("g_na", self.g_na), ("g_k", self.g_k), ("g_l", self.g_l)] {
            if !g.is_finite() || g < 0.0 {
                return Err(AxonError::InvalidParameter(format!(
                    "conductance {name} must be non-negative, got {g}"
                )));
            }
        }
        for (name, e) in [
            ("e_na", self.e_na),
            ("e_k", self.e_k),
            ("e_l", self.e_l),
            ("v_rest", self.v_rest),
        ] {
            if !e.is_finite() {
                return Err(AxonError::InvalidParameter(format!(
                    "potential {name} must be finite, got {e}"
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// NEURON STATE
// ============================================================================

/// Membrane state: voltage plus the three gating probabilities
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NeuronState {
    /// Membrane potential (mV)
    pub v: Voltage,
    /// Sodium activation gate, in [0, 1]
    pub m: f64,
    /// Sodium inactivation gate, in [0, 1]
    pub h: f64,
    /// Potassium activation gate, in [0, 1]
    pub n: f64,
}

impl NeuronState {
    /// Resting state: gates seeded at alpha/(alpha+beta) evaluated at v_rest.
    ///
    /// Seeding at the steady-state values avoids an initial transient that a
    /// resting neuron would not exhibit.
    pub fn at_rest(params: &MembraneParameters) -> Result<Self> {
        let rates = RateTable::try_at(params.v_rest)?;
        Ok(Self {
            v: params.v_rest,
            m: steady_state(rates.alpha_m, rates.beta_m),
            h: steady_state(rates.alpha_h, rates.beta_h),
            n: steady_state(rates.alpha_n, rates.beta_n),
        })
    }

    /// Hard floor/ceiling on the gating probabilities; never touches V
    fn clamp_gates(&mut self) {
        self.m = self.m.clamp(0.0, 1.0);
        self.h = self.h.clamp(0.0, 1.0);
        self.n = self.n.clamp(0.0, 1.0);
    }

    fn is_finite(&self) -> bool {
        self.v.is_finite() && self.m.is_finite() && self.h.is_finite() && self.n.is_finite()
    }

    /// Euler predictor for the intermediate RK stages; stage states are
    /// deliberately left unclamped
    fn advanced(&self, d: &Derivatives, step: Time) -> Self {
        Self {
            v: self.v + d.dv * step,
            m: self.m + d.dm * step,
            h: self.h + d.dh * step,
            n: self.n + d.dn * step,
        }
    }
}

// ============================================================================
// IONIC CURRENTS & DERIVATIVES
// ============================================================================

/// Instantaneous ionic current densities (uA/cm^2)
#[derive(Debug, Clone, Copy)]
pub struct IonicCurrents {
    pub na: Current,
    pub k: Current,
    pub leak: Current,
}

pub fn ionic_currents(state: &NeuronState, params: &MembraneParameters) -> IonicCurrents {
    IonicCurrents {
        na: params.g_na * state.m.powi(3) * state.h * (state.v - params.e_na),
        k: params.g_k * state.n.powi(4) * (state.v - params.e_k),
        leak: params.g_l * (state.v - params.e_l),
    }
}

/// Time derivative of the full state
#[derive(Debug, Clone, Copy)]
pub struct Derivatives {
    pub dv: f64,
    pub dm: f64,
    pub dh: f64,
    pub dn: f64,
}

impl Derivatives {
    fn is_finite(&self) -> bool {
        self.dv.is_finite() && self.dm.is_finite() && self.dh.is_finite() && self.dn.is_finite()
    }
}

/// dState/dt under an external current; pure function of its inputs.
///
/// C_m dV/dt = I_ext - I_Na - I_K - I_L, with the first-order kinetic law
/// d(gate)/dt = alpha(V)(1 - gate) - beta(V) gate for each gate.
pub fn derivatives(
    state: &NeuronState,
    i_ext: Current,
    params: &MembraneParameters,
) -> Derivatives {
    let currents = ionic_currents(state, params);
    let rates = RateTable::at(state.v);
    Derivatives {
        dv: (i_ext - currents.na - currents.k - currents.leak) / params.c_m,
        dm: rates.alpha_m * (1.0 - state.m) - rates.beta_m * state.m,
        dh: rates.alpha_h * (1.0 - state.h) - rates.beta_h * state.h,
        dn: rates.alpha_n * (1.0 - state.n) - rates.beta_n * state.n,
    }
}

// ============================================================================
// RK4 INTEGRATOR
// ============================================================================

/// Advance one state by one fixed step of classical fourth-order Runge-Kutta.
///
/// The external current is held constant across all four stages (zero-order
/// hold). After the weighted combination the gating variables are clamped
/// into [0, 1]; V is never clamped. A non-finite stage derivative or result
/// aborts the step with a divergence error carrying the last finite state;
/// NaN is never silently propagated.
pub fn rk4_step(
    state: &NeuronState,
    i_ext: Current,
    dt: Time,
    params: &MembraneParameters,
) -> Result<NeuronState> {
    if !dt.is_finite() || dt <= 0.0 {
        return Err(AxonError::InvalidParameter(format!(
            "time step must be positive, got {dt}"
        )));
    }

    let k1 = derivatives(state, i_ext, params);
    let k2 = derivatives(&state.advanced(&k1, dt / 2.0), i_ext, params);
    let k3 = derivatives(&state.advanced(&k2, dt / 2.0), i_ext, params);
    let k4 = derivatives(&state.advanced(&k3, dt), i_ext, params);

    let sixth = dt / 6.0;
    let mut next = NeuronState {
        v: state.v + (k1.dv + 2.0 * k2.dv + 2.0 * k3.dv + k4.dv) * sixth,
        m: state.m + (k1.dm + 2.0 * k2.dm + 2.0 * k3.dm + k4.dm) * sixth,
        h: state.h + (k1.dh + 2.0 * k2.dh + 2.0 * k3.dh + k4.dh) * sixth,
        n: state.n + (k1.dn + 2.0 * k2.dn + 2.0 * k3.dn + k4.dn) * sixth,
    };

    // divergence must be detected before the gate clamp could mask it
    if !(k1.is_finite() && k2.is_finite() && k3.is_finite() && k4.is_finite() && next.is_finite())
    {
        return Err(divergence_at(0, 0.0, state));
    }

    next.clamp_gates();
    Ok(next)
}

/// Divergence error for the step; callers that know the step index enrich it
fn divergence_at(step: usize, time: Time, last_finite: &NeuronState) -> AxonError {
    AxonError::NumericalDivergence {
        step,
        time,
        v: last_finite.v,
        m: last_finite.m,
        h: last_finite.h,
        n: last_finite.n,
    }
}

// ============================================================================
// STIMULUS PROTOCOL
// ============================================================================

/// Precomputed injected-current samples, one per time index
pub type StimulusTrace = Array1<f64>;

/// A single component of the injected current waveform
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Waveform {
    /// Rectangular pulse active on [onset, offset) ms
    Pulse {
        onset: Time,
        offset: Time,
        amplitude: Current,
    },
    /// Linear ramp from start to stop over [onset, offset) ms
    Ramp {
        onset: Time,
        offset: Time,
        start: Current,
        stop: Current,
    },
    /// Constant holding current for the whole run
    Constant { amplitude: Current },
}

impl Waveform {
    fn validate(&self) -> Result<()> {
        let window_ok = |onset: Time, offset: Time| {
            onset.is_finite() && offset.is_finite() && onset >= 0.0 && offset > onset
        };
        let ok = match *self {
            Waveform::Pulse {
                onset,
                offset,
                amplitude,
            } => window_ok(onset, offset) && amplitude.is_finite(),
            Waveform::Ramp {
                onset,
                offset,
                start,
                stop,
            } => window_ok(onset, offset) && start.is_finite() && stop.is_finite(),
            Waveform::Constant { amplitude } => amplitude.is_finite(),
        };
        if ok {
            Ok(())
        } else {
            Err(AxonError::InvalidParameter(format!(
                "malformed stimulus waveform: {self:?}"
            )))
        }
    }

    fn current_at(&self, t: Time) -> Current {
        match *self {
            Waveform::Pulse {
                onset,
                offset,
                amplitude,
            } => {
                if t >= onset && t < offset {
                    amplitude
                } else {
                    0.0
                }
            }
            Waveform::Ramp {
                onset,
                offset,
                start,
                stop,
            } => {
                if t >= onset && t < offset {
                    start + (stop - start) * (t - onset) / (offset - onset)
                } else {
                    0.0
                }
            }
            Waveform::Constant { amplitude } => amplitude,
        }
    }
}

/// The externally injected current protocol: a sum of waveforms.
///
/// The integrator never sees this type; it consumes the sampled
/// [`StimulusTrace`], so alternative protocols substitute freely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StimulusProtocol {
    pub waveforms: Vec<Waveform>,
}

impl StimulusProtocol {
    /// No injected current
    pub fn silent() -> Self {
        Self::default()
    }

    /// Single rectangular pulse
    pub fn pulse(onset: Time, offset: Time, amplitude: Current) -> Self {
        Self {
            waveforms: vec![Waveform::Pulse {
                onset,
                offset,
                amplitude,
            }],
        }
    }

    /// Builder-style addition of another waveform
    pub fn with(mut self, waveform: Waveform) -> Self {
        self.waveforms.push(waveform);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.waveforms.iter().try_for_each(Waveform::validate)
    }

    /// Sample the protocol into one current value per time index.
    ///
    /// The trace holds (duration/dt) samples by integer truncation; sample i
    /// is the summed contribution of every active waveform at t = i*dt.
    pub fn trace(&self, duration: Time, dt: Time) -> Result<StimulusTrace> {
        self.validate()?;
        let steps = trace_len(duration, dt)?;
        Ok(Array1::from_shape_fn(steps, |i| {
            let t = i as Time * dt;
            self.waveforms.iter().map(|w| w.current_at(t)).sum()
        }))
    }
}

/// Number of samples covering the run: integer truncation of duration/dt
fn trace_len(duration: Time, dt: Time) -> Result<usize> {
    if !duration.is_finite() || duration <= 0.0 {
        return Err(AxonError::InvalidParameter(format!(
            "duration must be positive, got {duration} ms"
        )));
    }
    if !dt.is_finite() || dt <= 0.0 {
        return Err(AxonError::InvalidParameter(format!(
            "time step must be positive, got {dt} ms"
        )));
    }
    let steps = (duration / dt) as usize;
    if steps < 1 {
        return Err(AxonError::InvalidParameter(format!(
            "duration {duration} ms is shorter than one step of {dt} ms"
        )));
    }
    Ok(steps)
}

// ============================================================================
// SIMULATION DRIVER
// ============================================================================

/// Everything one trajectory needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Total duration (ms)
    pub duration: Time,
    /// Fixed time step (ms); <= 0.1 recommended for the stiff sodium term
    pub dt: Time,
    pub parameters: MembraneParameters,
    pub stimulus: StimulusProtocol,
}

impl Default for SimulationConfig {
    /// 700 ms at dt = 0.1 ms with a 10 uA/cm^2 pulse on [200, 500) ms
    fn default() -> Self {
        Self {
            duration: 700.0,
            dt: 0.1,
            parameters: MembraneParameters::default(),
            stimulus: StimulusProtocol::pulse(200.0, 500.0, 10.0),
        }
    }
}

impl SimulationConfig {
    /// Full fail-fast validation, run before any integration step
    pub fn validate(&self) -> Result<()> {
        trace_len(self.duration, self.dt)?;
        self.parameters.validate()?;
        self.stimulus.validate()
    }
}

/// Completed trajectory: the recorded voltage course plus the final state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    pub voltage: TimeSeries,
    pub final_state: NeuronState,
}

impl Trajectory {
    /// Count upward crossings of the given voltage threshold
    pub fn spike_count(&self, threshold: Voltage) -> usize {
        self.voltage
            .values
            .windows(2)
            .filter(|w| w[0] < threshold && w[1] >= threshold)
            .count()
    }
}

/// Single-trajectory driver.
///
/// Construction validates the configuration, seeds the resting state and
/// precomputes the stimulus trace; [`MembraneSimulation::run`] consumes the
/// simulation, so a completed run cannot be resumed or restarted half-way.
#[derive(Debug, Clone)]
pub struct MembraneSimulation {
    parameters: MembraneParameters,
    stimulus: StimulusTrace,
    dt: Time,
    state: NeuronState,
}

impl MembraneSimulation {
    pub fn new(config: &SimulationConfig) -> Result<Self> {
        config.validate()?;
        let stimulus = config.stimulus.trace(config.duration, config.dt)?;
        let state = NeuronState::at_rest(&config.parameters)?;
        Ok(Self {
            parameters: config.parameters,
            stimulus,
            dt: config.dt,
            state,
        })
    }

    pub fn state(&self) -> &NeuronState {
        &self.state
    }

    /// Integrate the whole trajectory.
    ///
    /// Entry 0 is the initial voltage; entry t (t >= 1) is the voltage after
    /// the RK4 step driven by stimulus sample t. Strictly sequential: each
    /// step's result is the next step's input. A divergence aborts the run
    /// and reports the failing step index with the last finite state.
    pub fn run(mut self) -> Result<Trajectory> {
        let steps = self.stimulus.len();
        let mut voltage = TimeSeries::with_capacity("V", steps).with_units("mV");
        voltage.push(0.0, self.state.v);

        for step in 1..steps {
            let i_ext = self.stimulus[step];
            self.state = rk4_step(&self.state, i_ext, self.dt, &self.parameters).map_err(
                |e| match e {
                    AxonError::NumericalDivergence { v, m, h, n, .. } => {
                        AxonError::NumericalDivergence {
                            step,
                            time: step as Time * self.dt,
                            v,
                            m,
                            h,
                            n,
                        }
                    }
                    other => other,
                },
            )?;
            voltage.push(step as Time * self.dt, self.state.v);
        }

        Ok(Trajectory {
            voltage,
            final_state: self.state,
        })
    }
}

/// Convenience wrapper: configure, initialize, run
pub fn run(config: &SimulationConfig) -> Result<Trajectory> {
    MembraneSimulation::new(config)?.run()
}

/// Run independent trajectories in parallel, one rayon task per config.
///
/// Each trajectory owns its state and output; parameters are copied into
/// each job, so nothing is shared mutably between workers.
pub fn run_batch(configs: &[SimulationConfig]) -> Vec<Result<Trajectory>> {
    configs.par_iter().map(run).collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn quiescent_config(duration: Time, dt: Time) -> SimulationConfig {
        SimulationConfig {
            duration,
            dt,
            stimulus: StimulusProtocol::silent(),
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn test_resting_gates_match_steady_state() {
        let params = MembraneParameters::default();
        let state = NeuronState::at_rest(&params).unwrap();

        assert!((state.m - m_inf(params.v_rest)).abs() < 1e-9);
        assert!((state.h - h_inf(params.v_rest)).abs() < 1e-9);
        assert!((state.n - n_inf(params.v_rest)).abs() < 1e-9);

        // classic textbook values at -65 mV
        assert!((state.m - 0.0529).abs() < 1e-3);
        assert!((state.h - 0.5961).abs() < 1e-3);
        assert!((state.n - 0.3177).abs() < 1e-3);
        assert_eq!(state.v, -65.0);
    }

    #[test]
    fn test_gates_stay_probabilities() {
        let params = MembraneParameters::default();
        for amplitude in [0.0, 10.0, 50.0, 100.0] {
            let mut state = NeuronState::at_rest(&params).unwrap();
            for _ in 0..2000 {
                state = rk4_step(&state, amplitude, 0.1, &params).unwrap();
                for gate in [state.m, state.h, state.n] {
                    assert!(
                        (0.0..=1.0).contains(&gate),
                        "gate left [0,1] at amplitude {amplitude}: {gate}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_quiescent_membrane_holds_rest() {
        let trajectory = run(&quiescent_config(2000.0, 0.1)).unwrap();

        // the textbook constants put the true equilibrium a few microvolts
        // above -65.0, so the bound is 1e-2 mV rather than 1e-3
        let max_deviation = trajectory
            .voltage
            .values
            .iter()
            .map(|v| (v + 65.0).abs())
            .fold(0.0, f64::max);
        assert!(
            max_deviation < 1e-2,
            "resting membrane drifted {max_deviation} mV"
        );
        assert_eq!(trajectory.spike_count(0.0), 0);
    }

    #[test]
    fn test_threshold_response() {
        // reference stimulus: 10 uA/cm^2 on [200, 500) ms at dt = 0.1
        let trajectory = run(&SimulationConfig::default()).unwrap();

        let in_window_max = trajectory
            .voltage
            .time
            .iter()
            .zip(&trajectory.voltage.values)
            .filter(|&(t, _)| (200.0..500.0).contains(t))
            .map(|(_, v)| *v)
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(
            in_window_max > 0.0,
            "no action potential inside the stimulus window (max {in_window_max} mV)"
        );

        assert!(trajectory.spike_count(0.0) >= 1);

        let (_, v_final) = trajectory.voltage.last().unwrap();
        assert!(
            v_final < -50.0,
            "membrane failed to repolarize after the stimulus ({v_final} mV)"
        );
    }

    fn endpoint_voltage(dt: Time, t_end: Time, i_ext: Current) -> Voltage {
        let params = MembraneParameters::default();
        let mut state = NeuronState::at_rest(&params).unwrap();
        let steps = (t_end / dt).round() as usize;
        for _ in 0..steps {
            state = rk4_step(&state, i_ext, dt, &params).unwrap();
        }
        state.v
    }

    #[test]
    fn test_fourth_order_convergence() {
        // binary-exact steps so every run covers exactly the same interval
        let t_end = 2.0;
        let reference = endpoint_voltage(0.0009765625, t_end, 15.0);

        let coarse = (endpoint_voltage(0.03125, t_end, 15.0) - reference).abs();
        let fine = (endpoint_voltage(0.015625, t_end, 15.0) - reference).abs();

        assert!(fine < coarse);
        let ratio = coarse / fine;
        assert!(
            ratio > 10.0 && ratio < 24.0,
            "convergence ratio {ratio} is not fourth-order"
        );
    }

    #[test]
    fn test_unstable_step_reports_divergence() {
        let config = SimulationConfig {
            duration: 2000.0,
            dt: 50.0,
            ..SimulationConfig::default()
        };
        let err = run(&config).unwrap_err();
        match err {
            AxonError::NumericalDivergence { step, v, m, h, n, .. } => {
                assert!(step >= 1);
                // the snapshot is the last finite state, not the overflow
                assert!(v.is_finite() && m.is_finite() && h.is_finite() && n.is_finite());
            }
            other => panic!("expected NumericalDivergence, got {other}"),
        }
    }

    #[test]
    fn test_configuration_fails_fast() {
        let bad_dt = SimulationConfig {
            dt: 0.0,
            ..SimulationConfig::default()
        };
        assert!(matches!(
            MembraneSimulation::new(&bad_dt),
            Err(AxonError::InvalidParameter(_))
        ));

        let bad_duration = SimulationConfig {
            duration: -1.0,
            ..SimulationConfig::default()
        };
        assert!(matches!(
            MembraneSimulation::new(&bad_duration),
            Err(AxonError::InvalidParameter(_))
        ));

        let mut bad_conductance = SimulationConfig::default();
        bad_conductance.parameters.g_na = -1.0;
        assert!(matches!(
            MembraneSimulation::new(&bad_conductance),
            Err(AxonError::InvalidParameter(_))
        ));

        let mut bad_capacitance = SimulationConfig::default();
        bad_capacitance.parameters.c_m = 0.0;
        assert!(matches!(
            MembraneSimulation::new(&bad_capacitance),
            Err(AxonError::InvalidParameter(_))
        ));

        let state = NeuronState::at_rest(&MembraneParameters::default()).unwrap();
        assert!(matches!(
            rk4_step(&state, 0.0, -0.1, &MembraneParameters::default()),
            Err(AxonError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_reference_pulse_indices() {
        let trace = StimulusProtocol::pulse(200.0, 500.0, 10.0)
            .trace(700.0, 0.1)
            .unwrap();
        // half-open [200, 500) ms maps onto index range [2000, 5000)
        assert_eq!(trace[1999], 0.0);
        assert_eq!(trace[2000], 10.0);
        assert_eq!(trace[4999], 10.0);
        assert_eq!(trace[5000], 0.0);
    }

    #[test]
    fn test_overlapping_pulses_sum() {
        let protocol = StimulusProtocol::pulse(0.0, 10.0, 5.0).with(Waveform::Pulse {
            onset: 5.0,
            offset: 15.0,
            amplitude: 3.0,
        });
        let trace = protocol.trace(20.0, 1.0).unwrap();
        assert_eq!(trace.len(), 20);
        assert_eq!(trace[2], 5.0);
        assert_eq!(trace[7], 8.0);
        assert_eq!(trace[12], 3.0);
        assert_eq!(trace[15], 0.0);
    }

    #[test]
    fn test_trace_length_truncates() {
        let silent = StimulusProtocol::silent();
        assert_eq!(silent.trace(700.0, 0.5).unwrap().len(), 1400);
        // a trailing partial step is dropped
        assert_eq!(silent.trace(1.05, 0.5).unwrap().len(), 2);
        assert!(silent.trace(0.1, 0.5).is_err());
    }

    #[test]
    fn test_ramp_waveform() {
        let protocol = StimulusProtocol::silent().with(Waveform::Ramp {
            onset: 0.0,
            offset: 10.0,
            start: 0.0,
            stop: 10.0,
        });
        let trace = protocol.trace(20.0, 1.0).unwrap();
        assert_eq!(trace[5], 5.0);
        assert_eq!(trace[15], 0.0);

        let backwards = StimulusProtocol::pulse(10.0, 5.0, 1.0);
        assert!(backwards.validate().is_err());
    }

    #[test]
    fn test_record_shape() {
        let sim = MembraneSimulation::new(&quiescent_config(100.0, 0.5)).unwrap();
        assert_eq!(sim.state().v, -65.0);

        let trajectory = run(&quiescent_config(100.0, 0.5)).unwrap();
        assert_eq!(trajectory.voltage.len(), 200);
        assert_eq!(trajectory.voltage.values[0], -65.0);
        assert_eq!(trajectory.voltage.time[1], 0.5);
        assert_eq!(trajectory.voltage.units.as_deref(), Some("mV"));
    }

    #[test]
    fn test_batch_matches_serial() {
        let configs = vec![
            SimulationConfig {
                duration: 100.0,
                ..SimulationConfig::default()
            },
            quiescent_config(100.0, 0.1),
        ];
        let parallel = run_batch(&configs);
        for (config, result) in configs.iter().zip(parallel) {
            let serial = run(config).unwrap();
            let batched = result.unwrap();
            assert_eq!(serial.voltage.values, batched.voltage.values);
            assert_eq!(serial.final_state, batched.final_state);
        }
    }

    #[test]
    fn test_spike_count() {
        let mut voltage = TimeSeries::new("V").with_units("mV");
        for (i, v) in [-65.0, -10.0, 20.0, 10.0, -30.0, 5.0, -60.0]
            .into_iter()
            .enumerate()
        {
            voltage.push(i as f64, v);
        }
        let trajectory = Trajectory {
            voltage,
            final_state: NeuronState {
                v: -60.0,
                m: 0.05,
                h: 0.6,
                n: 0.3,
            },
        };
        assert_eq!(trajectory.spike_count(0.0), 2);
    }
}
