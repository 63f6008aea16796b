//! Selection between the phase reconstruction strategies and their application to a radial.
use crate::error::QcError;
use crate::phase::linprog::reconstruct_monotone;
use crate::phase::segmentation::RainCell;
use crate::phase::spline::{reconstruct_spline, SplineConfig};
use log::warn;

/// Reconstructed phase (degrees) and rate (degrees per kilometre) of one rain cell, one entry
/// per gate of the cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellReconstruction {
    pub phase: Vec<f64>,
    pub rate: Vec<f64>,
}

/// A cell whose reconstruction failed; its gates keep their input values.
#[derive(Debug, Clone, PartialEq)]
pub struct CellFailure {
    pub cell: RainCell,
    pub error: QcError,
}

/// Turns the observed phase of one rain cell into a smooth phase and its rate.
pub trait PhaseReconstructor {
    /// # Errors
    /// Will return `Err` if the cell is too short for the method or its numerical problem
    /// cannot be solved.
    fn reconstruct_cell(&self, phase: &[f64], gate_width: f64)
        -> Result<CellReconstruction, QcError>;
}

/// Adaptive two-pass smoothing spline on the unit phasor.
#[derive(Debug, Clone, Default)]
pub struct AdaptiveSpline {
    pub config: SplineConfig,
}

impl PhaseReconstructor for AdaptiveSpline {
    fn reconstruct_cell(
        &self,
        phase: &[f64],
        gate_width: f64,
    ) -> Result<CellReconstruction, QcError> {
        reconstruct_spline(phase, gate_width, &self.config)
    }
}

/// Monotone least-absolute-deviation fit by linear programming.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotoneLp;

impl PhaseReconstructor for MonotoneLp {
    fn reconstruct_cell(
        &self,
        phase: &[f64],
        gate_width: f64,
    ) -> Result<CellReconstruction, QcError> {
        reconstruct_monotone(phase, gate_width)
    }
}

/// Reconstruction method chosen for a whole sweep.
#[derive(Debug, Clone)]
pub enum ReconstructionStrategy {
    AdaptiveSpline(SplineConfig),
    MonotoneLp,
}

impl Default for ReconstructionStrategy {
    fn default() -> Self {
        ReconstructionStrategy::AdaptiveSpline(SplineConfig::default())
    }
}

impl PhaseReconstructor for ReconstructionStrategy {
    fn reconstruct_cell(
        &self,
        phase: &[f64],
        gate_width: f64,
    ) -> Result<CellReconstruction, QcError> {
        match self {
            ReconstructionStrategy::AdaptiveSpline(config) => {
                reconstruct_spline(phase, gate_width, config)
            }
            ReconstructionStrategy::MonotoneLp => MonotoneLp.reconstruct_cell(phase, gate_width),
        }
    }
}

/// Reconstructs every cell of a radial, overwriting the cell gates of `phase` and `rate`.
///
/// Gates outside any cell, and the gates of cells that fail, keep their input values. The
/// failures are returned in cell order.
///
/// # Errors
/// Will return `Err` if `phase` and `rate` differ in length or a cell lies outside the radial.
pub fn reconstruct_radial<R: PhaseReconstructor + ?Sized>(
    reconstructor: &R,
    phase: &mut [f64],
    rate: &mut [f64],
    cells: &[RainCell],
    gate_width: f64,
) -> Result<Vec<CellFailure>, QcError> {
    if phase.len() != rate.len() {
        Err(QcError::InvalidInput(format!(
            "phase has {} gates but rate has {}",
            phase.len(),
            rate.len()
        )))?
    }
    let mut failures = vec![];
    for cell in cells {
        if cell.end >= phase.len() || cell.start > cell.end {
            Err(QcError::InvalidInput(format!(
                "cell {} spans gates {}..={} of a {} gate radial",
                cell.label,
                cell.start,
                cell.end,
                phase.len()
            )))?
        }
        match reconstructor.reconstruct_cell(&phase[cell.range()], gate_width) {
            Ok(rec) => {
                phase[cell.range()].copy_from_slice(&rec.phase);
                rate[cell.range()].copy_from_slice(&rec.rate);
            }
            Err(error) => {
                warn!(
                    "cell {} (gates {}..={}) not reconstructed: {error}",
                    cell.label, cell.start, cell.end
                );
                failures.push(CellFailure { cell: *cell, error });
            }
        }
    }
    Ok(failures)
}
