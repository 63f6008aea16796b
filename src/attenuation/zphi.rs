//! Z-PHI attenuation correction of reflectivity along one radial.
//!
//! Path-integrated attenuation is taken as `c * (phi(r) - phi(r0))`. For a trial `c` the
//! Hitschfeld-Bordan relation gives a coefficient `a(r)` per gate, and with it the specific
//! attenuation
//!
//! ```text
//! A(r) = a(r) Z(r)^b / (1 - 0.46 a(r) b I(r)),    I(r) = integral of Z^b from r0 to r
//! ```
//!
//! Integrating `A / c` twice over range rebuilds the differential phase. The coefficient `c` that
//! best reproduces the observed phase (mean absolute deviation) is fitted per radial, after
//! which `Z <- Z / (1 - 0.46 a b I)^(1/b)`.
//!
//! Phase that falls below its start value carries no attenuation: path-integrated attenuation
//! is clamped at zero so that it never brightens the echo.
use crate::attenuation::optimizer::{differential_evolution, OptimizerConfig};
use crate::error::QcError;
use crate::utils::constants::{DB_TO_NEPER, HB_SCALE, ZPHI_EXPONENT};
use crate::utils::integrate::cumulative_simpson;
use log::{debug, warn};

type Result<T> = std::result::Result<T, QcError>;

#[derive(Debug, Clone)]
pub struct ZphiConfig {
    /// First gate of the integration path
    pub start_gate: usize,
    /// Search bounds of the phase-to-attenuation ratio, dB per degree
    pub c_min: f64,
    pub c_max: f64,
    /// Exponent of the `A = a Z^b` power law
    pub b: f64,
    /// Relative convergence tolerance of the global search
    pub tolerance: f64,
    pub optimizer: OptimizerConfig,
}

impl Default for ZphiConfig {
    fn default() -> Self {
        ZphiConfig {
            start_gate: 0,
            c_min: 0.03,
            c_max: 0.18,
            b: ZPHI_EXPONENT,
            tolerance: 1e-4,
            optimizer: OptimizerConfig::default(),
        }
    }
}

/// Fitted attenuation for one radial. Gate arrays cover the whole radial and are zero (or one
/// for `denominator`) before the start gate.
#[derive(Debug, Clone, PartialEq)]
pub struct AttenuationFit {
    /// Fitted phase-to-attenuation ratio, dB per degree
    pub coefficient: f64,
    /// Mean absolute phase residual at the fitted coefficient, degrees
    pub loss: f64,
    /// Two-way path-integrated attenuation, dB
    pub path_attenuation: Vec<f64>,
    /// Specific attenuation, dB per kilometre
    pub specific_attenuation: Vec<f64>,
    /// `1 - 0.46 a b I`, the factor reflectivity is divided by (to the power `1/b`)
    pub denominator: Vec<f64>,
}

/// Range profile from the start gate on, with everything that does not depend on `c`.
struct ZphiModel {
    gate_width: f64,
    b: f64,
    /// `Z^b` with negative reflectivity clipped to zero
    powered: Vec<f64>,
    /// Running integral of `powered`
    integral: Vec<f64>,
    /// Phase relative to the start gate
    phase_growth: Vec<f64>,
}

/// Per-gate quantities of the model at one `c`.
struct ModelState {
    path_attenuation: Vec<f64>,
    denominator: Vec<f64>,
    specific_attenuation: Vec<f64>,
}

impl ZphiModel {
    fn new(reflectivity: &[f64], phase: &[f64], gate_width: f64, start: usize, b: f64) -> Self {
        let powered: Vec<f64> = reflectivity[start..]
            .iter()
            .map(|z| z.max(0.0).powf(b))
            .collect();
        let integral = cumulative_simpson(&powered, gate_width);
        let phase_growth = phase[start..].iter().map(|p| p - phase[start]).collect();
        ZphiModel {
            gate_width,
            b,
            powered,
            integral,
            phase_growth,
        }
    }

    fn evaluate(&self, c: f64) -> ModelState {
        let b = self.b;
        let path_attenuation: Vec<f64> = self
            .phase_growth
            .iter()
            .map(|dphi| (c * dphi).max(0.0))
            .collect();
        let coefficient = path_attenuation
            .iter()
            .zip(&self.integral)
            .map(|(pia, integral)| {
                if *integral > 0.0 {
                    (1.0 - (-DB_TO_NEPER * b * pia).exp()) / (HB_SCALE * b * integral)
                } else {
                    0.0
                }
            });
        let denominator: Vec<f64> = coefficient
            .clone()
            .zip(&self.integral)
            .map(|(a, integral)| 1.0 - HB_SCALE * a * b * integral)
            .collect();
        let specific_attenuation = coefficient
            .zip(&self.powered)
            .zip(&denominator)
            .map(|((a, zb), den)| a * zb / den)
            .collect();
        ModelState {
            path_attenuation,
            denominator,
            specific_attenuation,
        }
    }

    /// Mean absolute deviation between the rebuilt and the observed phase growth.
    fn loss(&self, c: f64) -> f64 {
        let state = self.evaluate(c);
        let rebuilt = cumulative_simpson(&state.specific_attenuation, self.gate_width);
        let total: f64 = rebuilt
            .iter()
            .zip(&self.phase_growth)
            .map(|(a, dphi)| (2.0 / c * a - dphi).abs())
            .sum();
        total / self.phase_growth.len() as f64
    }
}

/// First gate at which the phase drops by more than half a turn from the previous gate, the
/// signature of a trace wrapped into `[0, 360)`.
pub fn find_phase_wrap(phase: &[f64]) -> Option<usize> {
    phase
        .windows(2)
        .position(|w| w[0] - w[1] > 180.0)
        .map(|i| i + 1)
}

/// Fits the attenuation coefficient of one radial without touching the reflectivity.
///
/// # Errors
/// Will return `Err` if the traces differ in length, the start gate leaves fewer than two
/// gates, the reflectivity beyond the start gate is all zero, the bounds are invalid, or the
/// global search fails to converge.
pub fn fit_attenuation(
    reflectivity: &[f64],
    phase: &[f64],
    gate_width: f64,
    config: &ZphiConfig,
) -> Result<AttenuationFit> {
    if reflectivity.len() != phase.len() {
        Err(QcError::InvalidInput(format!(
            "reflectivity has {} gates but phase has {}",
            reflectivity.len(),
            phase.len()
        )))?
    }
    if !(config.b.is_finite() && config.b > 0.0) {
        Err(QcError::InvalidInput(format!(
            "power-law exponent {} must be positive",
            config.b
        )))?
    }
    let start = config.start_gate;
    if start + 1 >= phase.len() {
        Err(QcError::AttenuationFitFailure(format!(
            "start gate {start} leaves no path to integrate over {} gates",
            phase.len()
        )))?
    }
    if !(config.c_min > 0.0 && config.c_min <= config.c_max) {
        Err(QcError::AttenuationFitFailure(format!(
            "invalid coefficient bounds [{}, {}]",
            config.c_min, config.c_max
        )))?
    }

    if let Some(gate) = find_phase_wrap(&phase[start..]) {
        warn!(
            "phase wraps at gate {}, attenuation beyond it will be underestimated",
            start + gate
        );
    }

    let model = ZphiModel::new(reflectivity, phase, gate_width, start, config.b);
    if model.integral.iter().all(|&i| i <= 0.0) {
        Err(QcError::AttenuationFitFailure(
            "reflectivity beyond the start gate is zero".to_string(),
        ))?
    }

    let objective = |c: &[f64]| model.loss(c[0]);
    let result = differential_evolution(
        &objective,
        &[(config.c_min, config.c_max)],
        config.tolerance,
        &config.optimizer,
    )?;
    let coefficient = result.x[0];
    if !result.fun.is_finite() {
        Err(QcError::AttenuationFitFailure(format!(
            "loss is not finite at c = {coefficient}"
        )))?
    }
    debug!(
        "fitted c = {coefficient:.5} dB/deg, loss {:.4} deg after {} generations",
        result.fun, result.generations
    );

    let state = model.evaluate(coefficient);
    let pad = |values: Vec<f64>, fill: f64| {
        let mut out = vec![fill; start];
        out.extend(values);
        out
    };
    Ok(AttenuationFit {
        coefficient,
        loss: result.fun,
        path_attenuation: pad(state.path_attenuation, 0.0),
        specific_attenuation: pad(state.specific_attenuation, 0.0),
        denominator: pad(state.denominator, 1.0),
    })
}

/// Fits the attenuation coefficient and divides the reflectivity (linear units) by
/// `(1 - 0.46 a b I)^(1/b)` from the start gate on.
///
/// Reflectivity is left untouched on error.
///
/// # Errors
/// See [`fit_attenuation`].
pub fn correct_attenuation(
    reflectivity: &mut [f64],
    phase: &[f64],
    gate_width: f64,
    config: &ZphiConfig,
) -> Result<AttenuationFit> {
    let fit = fit_attenuation(reflectivity, phase, gate_width, config)?;
    for (z, den) in reflectivity
        .iter_mut()
        .zip(&fit.denominator)
        .skip(config.start_gate)
    {
        *z /= den.powf(1.0 / config.b);
    }
    Ok(fit)
}
