//! Monotone phase reconstruction by linear programming.
//!
//! For a cell of `m` gates with observed phase `p`, solve
//!
//! ```text
//! minimise   sum z_i
//! subject to z_i - x_i >= -p_i,  z_i + x_i >= p_i          (fidelity, i.e. z_i >= |x_i - p_i|)
//!            sum_k s_k x_{i+k-2} >= 0   for 2 <= i < m-2     (monotone 5-point derivative)
//! ```
//!
//! then low-pass the solution to remove oscillations shorter than the stencil.
use crate::error::QcError;
use crate::phase::reconstruction::CellReconstruction;
use crate::utils::window::{convolve5, hold_edges};
use minilp::{ComparisonOp, LinearExpr, OptimizationDirection, Problem, Variable};

/// Five-point derivative stencil, unit gain on a linear ramp
pub const DERIVATIVE_STENCIL: [f64; 5] = [-0.2, -0.1, 0.0, 0.1, 0.2];
/// Low-pass kernel applied to the solution
pub const SMOOTHING_KERNEL: [f64; 5] = [0.1, 0.25, 0.3, 0.25, 0.1];
/// Fewest gates the stencil can work with
pub const MIN_LP_GATES: usize = 5;

/// Solves the linear program for one cell and returns the unfiltered solution.
fn solve_monotone(phase: &[f64]) -> Result<Vec<f64>, QcError> {
    let m = phase.len();
    let mut problem = Problem::new(OptimizationDirection::Minimize);
    let slack: Vec<Variable> = (0..m)
        .map(|_| problem.add_var(1.0, (f64::NEG_INFINITY, f64::INFINITY)))
        .collect();
    let values: Vec<Variable> = (0..m)
        .map(|_| problem.add_var(0.0, (f64::NEG_INFINITY, f64::INFINITY)))
        .collect();

    for i in 0..m {
        let mut below = LinearExpr::empty();
        below.add(slack[i], 1.0);
        below.add(values[i], -1.0);
        problem.add_constraint(below, ComparisonOp::Ge, -phase[i]);

        let mut above = LinearExpr::empty();
        above.add(slack[i], 1.0);
        above.add(values[i], 1.0);
        problem.add_constraint(above, ComparisonOp::Ge, phase[i]);
    }
    for i in 2..m - 2 {
        let mut derivative = LinearExpr::empty();
        for (k, &coeff) in DERIVATIVE_STENCIL.iter().enumerate() {
            if coeff != 0.0 {
                derivative.add(values[i + k - 2], coeff);
            }
        }
        problem.add_constraint(derivative, ComparisonOp::Ge, 0.0);
    }

    let solution = problem.solve().map_err(|e| {
        QcError::ReconstructionFailure(format!("linear program for {m} gates failed: {e}"))
    })?;
    Ok(values.iter().map(|&v| solution[v]).collect())
}

/// Reconstructs a non-decreasing phase and its rate (degrees per kilometre) for one cell.
///
/// The first two gates keep their observed phase and the last two hold the last filtered
/// value. The rate is the derivative stencil over the filtered phase, edge-held over two gates
/// on each side.
///
/// # Errors
/// Will return `Err` if the cell is shorter than [`MIN_LP_GATES`] or the solver does not reach
/// an optimal solution.
pub fn reconstruct_monotone(
    phase: &[f64],
    gate_width: f64,
) -> Result<CellReconstruction, QcError> {
    let m = phase.len();
    if m < MIN_LP_GATES {
        Err(QcError::SegmentTooShort {
            len: m,
            min: MIN_LP_GATES,
        })?
    }
    if phase.iter().any(|p| !p.is_finite()) {
        Err(QcError::ReconstructionFailure(
            "phase contains non-finite values".to_string(),
        ))?
    }
    let solution = solve_monotone(phase)?;

    let mut filtered = phase.to_vec();
    filtered[2..m - 2].copy_from_slice(&convolve5(&solution, &SMOOTHING_KERNEL));
    filtered[m - 2] = filtered[m - 3];
    filtered[m - 1] = filtered[m - 3];

    let rates: Vec<f64> = convolve5(&filtered, &DERIVATIVE_STENCIL)
        .iter()
        .map(|d| d / gate_width)
        .collect();
    let rate = hold_edges(&rates, 2, m);

    Ok(CellReconstruction {
        phase: filtered,
        rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn monotone_ramp_is_reproduced() {
        let gate_width = 0.25;
        let phase: Vec<f64> = (0..30).map(|i| 12.0 + 0.75 * i as f64).collect();
        let rec = reconstruct_monotone(&phase, gate_width).expect("lp");
        for i in 0..28 {
            assert_abs_diff_eq!(rec.phase[i], phase[i], epsilon = 1e-6);
        }
        assert_eq!(rec.phase[28], rec.phase[27]);
        assert_eq!(rec.phase[29], rec.phase[27]);
        for i in 2..24 {
            assert_abs_diff_eq!(rec.rate[i], 3.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn dip_is_flattened_into_nondecreasing_rate() {
        let gate_width = 0.5;
        let phase: Vec<f64> = (0..40)
            .map(|i| {
                let base = 2.0 * i as f64;
                if (15..20).contains(&i) {
                    base - 25.0
                } else {
                    base + if i % 3 == 0 { 1.5 } else { -1.0 }
                }
            })
            .collect();
        let rec = reconstruct_monotone(&phase, gate_width).expect("lp");
        // interior gates whose stencil only sees constrained solution values
        for i in 4..36 {
            assert!(rec.rate[i] >= -1e-6, "negative rate {} at gate {i}", rec.rate[i]);
        }
        assert_eq!(rec.rate[0], rec.rate[2]);
        assert_eq!(rec.rate[39], rec.rate[37]);
        // gates 0 and 1 keep the observed phase; from gate 3 on the filtered phase must not fall
        for i in 3..38 {
            let step = rec.phase[i] - rec.phase[i - 1];
            assert!(step >= -1e-6, "phase falls by {step} at gate {i}");
        }
    }

    #[test]
    fn short_cell_is_rejected() {
        let res = reconstruct_monotone(&[1.0, 2.0, 3.0], 0.25);
        assert_eq!(res.unwrap_err(), QcError::SegmentTooShort { len: 3, min: 5 });
    }

    #[test]
    fn non_finite_phase_fails() {
        let res = reconstruct_monotone(&[1.0, 2.0, f64::NAN, 4.0, 5.0, 6.0], 0.25);
        assert!(matches!(res, Err(QcError::ReconstructionFailure(_))));
    }
}
