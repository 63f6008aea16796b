//! Adaptive smoothing-spline reconstruction of the differential phase in one rain cell.
//!
//! The phase is fitted as a unit phasor so that wraps at 360 degrees do not disturb the fit.
//! A first non-adaptive pass gives the overall rate trend; the second pass weights each gate
//! by the local phasor incoherence (precision) and by the trend (smoothness). Both passes solve
//! the natural cubic smoothing-spline normal equations
//!
//! ```text
//! (M + 2/(3 lambda) Q C) b = Q y,     d = y - 2/(3 lambda) C b
//! ```
//!
//! where `M` is the tridiagonal stiffness matrix, `Q` the second-difference operator and `C`
//! the coupling term (`Q^T` for the first pass, `W Q^T M^-1 M_q` for the second). `d` holds the
//! smoothed phasors and `b` the quadratic coefficients, zero at both ends.
use crate::error::QcError;
use crate::phase::reconstruction::CellReconstruction;
use crate::utils::constants::{DEG_TO_RAD, RAD_TO_DEG};
use crate::utils::window::{hold_edges, rolling};
use nalgebra::{Complex, DMatrix};

/// Fewest gates the 5-point operators can work with
pub const MIN_SPLINE_GATES: usize = 5;

#[derive(Debug, Clone)]
pub struct SplineConfig {
    /// Smoothing parameter of the trend pass, as a multiple of the gate spacing
    pub trend_lambda_factor: f64,
    /// Smoothing parameter of the adaptive pass, as a multiple of the gate spacing
    pub adaptive_lambda_factor: f64,
    /// Ceiling on the smoothness weight `1 / rate` of the trend pass
    pub smoothness_ceiling: f64,
    /// Window length for the local phasor incoherence
    pub coherence_window: usize,
}

impl Default for SplineConfig {
    fn default() -> Self {
        SplineConfig {
            trend_lambda_factor: 0.1,
            adaptive_lambda_factor: 1.1,
            smoothness_ceiling: 5.0,
            coherence_window: 5,
        }
    }
}

struct SplineSystem {
    gate_width: f64,
    /// (m-2) x (m-2)
    stiffness: DMatrix<f64>,
    /// (m-2) x m
    operator: DMatrix<f64>,
}

/// Solution of one pass, in phasor form.
struct SplineFit {
    values: Vec<Complex<f64>>,
    slopes: Vec<Complex<f64>>,
}

impl SplineFit {
    /// `Im(c / d)`: phase rate at each knot but the last, radians per kilometre
    fn knot_rates(&self) -> Vec<f64> {
        self.slopes
            .iter()
            .zip(self.values.iter())
            .map(|(c, d)| if d.norm() > 0.0 { (c / d).im } else { 0.0 })
            .collect()
    }
}

impl SplineSystem {
    fn new(num_gates: usize, gate_width: f64) -> SplineSystem {
        let n = num_gates - 2;
        let h = gate_width;
        let l = 3.0 / h;
        let stiffness = DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                4.0 * h
            } else if i.abs_diff(j) == 1 {
                h
            } else {
                0.0
            }
        });
        let operator = DMatrix::from_fn(n, num_gates, |i, j| match j.wrapping_sub(i) {
            0 | 2 => l,
            1 => -2.0 * l,
            _ => 0.0,
        });
        SplineSystem {
            gate_width,
            stiffness,
            operator,
        }
    }

    /// Solves one pass for the observed phasors `y` (m x 2, real and imaginary columns).
    fn solve(
        &self,
        y: &DMatrix<f64>,
        coupling: &DMatrix<f64>,
        lambda: f64,
    ) -> Result<SplineFit, QcError> {
        let k = 2.0 / (3.0 * lambda);
        let system = &self.stiffness + (&self.operator * coupling) * k;
        let rhs = &self.operator * y;
        let interior = system.lu().solve(&rhs).ok_or_else(|| {
            QcError::SingularSystem("spline normal equations are singular".to_string())
        })?;
        if interior.iter().any(|v| !v.is_finite()) {
            Err(QcError::SingularSystem(
                "spline normal equations are ill-conditioned".to_string(),
            ))?
        }
        let smoothed = y - (coupling * &interior) * k;

        let m = y.nrows();
        let to_complex = |mat: &DMatrix<f64>, i: usize| Complex::new(mat[(i, 0)], mat[(i, 1)]);
        let values: Vec<Complex<f64>> = (0..m).map(|i| to_complex(&smoothed, i)).collect();
        // natural boundary: the first and last quadratic coefficients vanish
        let quadratic: Vec<Complex<f64>> = (0..m)
            .map(|i| {
                if i == 0 || i == m - 1 {
                    Complex::new(0.0, 0.0)
                } else {
                    to_complex(&interior, i - 1)
                }
            })
            .collect();

        let h = self.gate_width;
        let slopes = (0..m - 1)
            .map(|i| {
                (values[i + 1] - values[i]) / h - (quadratic[i + 1] + quadratic[i] * 2.0) * h / 3.0
            })
            .collect();
        Ok(SplineFit { values, slopes })
    }

    /// Smoothness weighting matrix from the trend rates, (m-2) x (m-2).
    fn smoothness_weights(&self, trend_rates: &[f64], ceiling: f64) -> DMatrix<f64> {
        let qh: Vec<f64> = trend_rates
            .iter()
            .map(|&rate| {
                let w = 1.0 / rate;
                // negative or vanishing trend rates are treated as the weakest smoothing
                let w = if w.is_finite() && w > 0.0 { w.min(ceiling) } else { ceiling };
                w * self.gate_width
            })
            .collect();
        let n = self.stiffness.nrows();
        DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                2.0 * (qh[i] + qh[i + 1])
            } else if i.abs_diff(j) == 1 {
                qh[i.max(j)]
            } else {
                0.0
            }
        })
    }
}

/// Precision weights `sqrt(1 - |mean phasor|)` over a sliding window, edge-held.
fn incoherence(phasors: &[Complex<f64>], window: usize) -> Vec<f64> {
    let weights = rolling(phasors, window, |w| {
        let mean = w.iter().sum::<Complex<f64>>() / w.len() as f64;
        (1.0 - mean.norm()).max(0.0).sqrt()
    });
    hold_edges(&weights, (window - 1) / 2, phasors.len())
}

/// Reconstructs the phase (degrees, in `[0, 360)`) and rate (degrees per kilometre) of one
/// rain cell.
///
/// # Errors
/// Will return `Err` if the cell is shorter than [`MIN_SPLINE_GATES`] or the coherence window,
/// or if the gate spacing makes the normal equations singular.
pub fn reconstruct_spline(
    phase: &[f64],
    gate_width: f64,
    config: &SplineConfig,
) -> Result<CellReconstruction, QcError> {
    if config.coherence_window == 0 {
        Err(QcError::InvalidInput(
            "coherence window must be at least one gate".to_string(),
        ))?
    }
    let m = phase.len();
    let min = MIN_SPLINE_GATES.max(config.coherence_window);
    if m < min {
        Err(QcError::SegmentTooShort { len: m, min })?
    }
    if !gate_width.is_finite() || gate_width <= f64::EPSILON {
        Err(QcError::SingularSystem(format!(
            "gate spacing {gate_width} km is too small for the spline system"
        )))?
    }

    let phasors: Vec<Complex<f64>> = phase
        .iter()
        .map(|p| Complex::from_polar(1.0, p * DEG_TO_RAD))
        .collect();
    let y = DMatrix::from_fn(m, 2, |i, j| if j == 0 { phasors[i].re } else { phasors[i].im });
    let system = SplineSystem::new(m, gate_width);

    // Trend pass
    let trend = system.solve(
        &y,
        &system.operator.transpose(),
        config.trend_lambda_factor * gate_width,
    )?;
    let trend_rates = trend.knot_rates();

    // Adaptive pass
    let precision = incoherence(&phasors, config.coherence_window);
    let smoothness = system.smoothness_weights(&trend_rates, config.smoothness_ceiling);
    let stiffness_inv_smoothness = system
        .stiffness
        .clone()
        .lu()
        .solve(&smoothness)
        .ok_or_else(|| QcError::SingularSystem("stiffness matrix is singular".to_string()))?;
    let weighted_operator =
        DMatrix::from_fn(m, m - 2, |i, j| precision[i] * system.operator[(j, i)]);
    let coupling = weighted_operator * stiffness_inv_smoothness;
    let fit = system.solve(&y, &coupling, config.adaptive_lambda_factor * gate_width)?;

    let phase = fit
        .values
        .iter()
        .map(|d| d.im.atan2(d.re) * RAD_TO_DEG)
        .map(|deg| if deg < 0.0 { deg + 360.0 } else { deg })
        .collect();
    let mut rate: Vec<f64> = fit.knot_rates().iter().map(|r| r * RAD_TO_DEG).collect();
    rate.push(rate[m - 2]);

    Ok(CellReconstruction { phase, rate })
}
