//! Python bindings over numpy arrays shaped `[num_radial, num_gate]`.
//!
//! Every function returns, next to its arrays, the status of the units it could not process:
//! failed cells as `(radial, label, error)` tuples, one attenuation ratio per radial (`None`
//! where the fit failed) and the recorded rate traces keyed by radial.
use crate::attenuation::zphi::ZphiConfig;
use crate::error::QcError;
use crate::phase::reconstruction::ReconstructionStrategy;
use crate::phase::segmentation::SegmentationConfig;
use crate::phase::unfold::{unfold_phase, UnfoldConfig};
use crate::pipeline::{correct_sweep_attenuation, par_quality_control, QcConfig, SweepReport};
use crate::sweep::Sweep;
use itertools::izip;
use ndarray::{Array1, Array2};
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use pyo3::{pyfunction, pymodule, wrap_pyfunction, Bound, PyResult, Python};
use std::collections::BTreeMap;

type FailedCells = Vec<(usize, usize, String)>;

fn owned(array: &PyReadonlyArray2<'_, f64>) -> Array2<f64> {
    array.as_array().as_standard_layout().into_owned()
}

fn check_radials(gate_width: &Array1<f64>, array: &Array2<f64>) -> Result<(), QcError> {
    if gate_width.len() != array.nrows() {
        Err(QcError::InvalidInput(format!(
            "gate_width has {} entries for {} radials",
            gate_width.len(),
            array.nrows()
        )))?
    }
    Ok(())
}

fn failed_cells(report: &SweepReport) -> FailedCells {
    report
        .failed_cells()
        .into_iter()
        .map(|(radial, failure)| (radial, failure.cell.label, failure.error.to_string()))
        .collect()
}

/// Failed cells, attenuation ratios, radial errors and recorded rates as a dict.
fn status<'py>(py: Python<'py>, report: SweepReport) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new_bound(py);
    dict.set_item("failed_cells", failed_cells(&report))?;
    dict.set_item("attenuation", report.attenuation_coefficients())?;
    let attenuation_errors: Vec<(usize, String)> = report
        .radials
        .iter()
        .filter_map(|r| match &r.attenuation {
            Some(Err(e)) => Some((r.radial, e.to_string())),
            _ => None,
        })
        .collect();
    dict.set_item("attenuation_errors", attenuation_errors)?;
    let failed_radials: Vec<(usize, String)> = report
        .radials
        .iter()
        .filter_map(|r| r.error.as_ref().map(|e| (r.radial, e.to_string())))
        .collect();
    dict.set_item("failed_radials", failed_radials)?;
    let rate_records: BTreeMap<usize, Vec<f64>> = report.rate_records;
    dict.set_item("rate_records", rate_records)?;
    Ok(dict)
}

fn parse_strategy(strategy: &str) -> Result<ReconstructionStrategy, QcError> {
    match strategy {
        "spline" => Ok(ReconstructionStrategy::default()),
        "lp" => Ok(ReconstructionStrategy::MonotoneLp),
        other => Err(QcError::InvalidInput(format!(
            "unknown strategy '{other}', expected 'spline' or 'lp'"
        ))),
    }
}

/// Segments and reconstructs every radial, leaving reflectivity alone.
fn reconstruct<'py>(
    py: Python<'py>,
    phase: &PyReadonlyArray2<'py, f64>,
    correlation: &PyReadonlyArray2<'py, f64>,
    gate_width: &PyReadonlyArray1<'py, f64>,
    strategy: ReconstructionStrategy,
    segmentation: SegmentationConfig,
    record_radials: Vec<usize>,
) -> PyResult<(
    Bound<'py, PyArray2<f64>>,
    Bound<'py, PyArray2<f64>>,
    Bound<'py, PyDict>,
)> {
    let phase = owned(phase);
    let dim = phase.dim();
    let mut sweep = Sweep::new(
        gate_width.as_array().to_owned(),
        Array2::zeros(dim),
        Array2::zeros(dim),
        phase,
        owned(correlation),
    )?;
    let config = QcConfig {
        segmentation,
        strategy,
        record_radials,
        ..Default::default()
    };
    let report = par_quality_control(&mut sweep, &config)?;
    Ok((
        sweep.differential_phase.into_pyarray_bound(py),
        sweep.rate.into_pyarray_bound(py),
        status(py, report)?,
    ))
}

/// Undoes folds in the differential phase of every radial. Returns the phase and the folded
/// gates of each radial.
#[pyfunction]
#[pyo3(signature = (phase, correlation, gate_width, max_phase_diff = -80.0, fold = 180.0))]
fn phase_unfolding<'py>(
    py: Python<'py>,
    phase: PyReadonlyArray2<'py, f64>,
    correlation: PyReadonlyArray2<'py, f64>,
    gate_width: PyReadonlyArray1<'py, f64>,
    max_phase_diff: f64,
    fold: f64,
) -> PyResult<(Bound<'py, PyArray2<f64>>, Vec<Vec<usize>>)> {
    let mut phase = owned(&phase);
    let correlation = owned(&correlation);
    let gate_width = gate_width.as_array().to_owned();
    check_radials(&gate_width, &phase)?;
    let config = UnfoldConfig {
        max_phase_diff,
        fold,
        ..Default::default()
    };
    let mut folded = Vec::with_capacity(phase.nrows());
    for (mut p, rho, &w) in izip!(phase.rows_mut(), correlation.rows(), gate_width.iter()) {
        let rho = rho.to_vec();
        let mut row = p.to_vec();
        folded.push(unfold_phase(&mut row, &rho, w, &config)?);
        p.assign(&Array1::from(row));
    }
    Ok((phase.into_pyarray_bound(py), folded))
}

/// Reconstructs phase and rate with the adaptive spline.
#[pyfunction]
#[pyo3(signature = (phase, correlation, gate_width, num_good = 15, num_bad = 10, d_max = 0.98, rho_max = 0.9, population_min = 5, record_radials = vec![]))]
#[allow(clippy::too_many_arguments)]
fn phase_rec_spline<'py>(
    py: Python<'py>,
    phase: PyReadonlyArray2<'py, f64>,
    correlation: PyReadonlyArray2<'py, f64>,
    gate_width: PyReadonlyArray1<'py, f64>,
    num_good: usize,
    num_bad: usize,
    d_max: f64,
    rho_max: f64,
    population_min: usize,
    record_radials: Vec<usize>,
) -> PyResult<(
    Bound<'py, PyArray2<f64>>,
    Bound<'py, PyArray2<f64>>,
    Bound<'py, PyDict>,
)> {
    let segmentation = SegmentationConfig {
        num_good,
        num_bad,
        d_max,
        rho_max,
        population_min,
    };
    reconstruct(
        py,
        &phase,
        &correlation,
        &gate_width,
        ReconstructionStrategy::default(),
        segmentation,
        record_radials,
    )
}

/// Reconstructs phase and rate with the monotone linear program.
#[pyfunction]
#[pyo3(signature = (phase, correlation, gate_width, num_good = 15, num_bad = 10, d_max = 0.98, rho_max = 0.9, population_min = 5, record_radials = vec![]))]
#[allow(clippy::too_many_arguments)]
fn phase_rec_lp<'py>(
    py: Python<'py>,
    phase: PyReadonlyArray2<'py, f64>,
    correlation: PyReadonlyArray2<'py, f64>,
    gate_width: PyReadonlyArray1<'py, f64>,
    num_good: usize,
    num_bad: usize,
    d_max: f64,
    rho_max: f64,
    population_min: usize,
    record_radials: Vec<usize>,
) -> PyResult<(
    Bound<'py, PyArray2<f64>>,
    Bound<'py, PyArray2<f64>>,
    Bound<'py, PyDict>,
)> {
    let segmentation = SegmentationConfig {
        num_good,
        num_bad,
        d_max,
        rho_max,
        population_min,
    };
    reconstruct(
        py,
        &phase,
        &correlation,
        &gate_width,
        ReconstructionStrategy::MonotoneLp,
        segmentation,
        record_radials,
    )
}

/// Corrects reflectivity (linear units) for attenuation. Radials whose fit fails are returned
/// unchanged, with `None` in place of their attenuation ratio and the reason in the errors.
#[pyfunction]
#[pyo3(signature = (reflectivity, phase, gate_width, start_gate = 0, c_min = 0.03, c_max = 0.18))]
#[allow(clippy::type_complexity)]
fn correct_zphi<'py>(
    py: Python<'py>,
    reflectivity: PyReadonlyArray2<'py, f64>,
    phase: PyReadonlyArray2<'py, f64>,
    gate_width: PyReadonlyArray1<'py, f64>,
    start_gate: usize,
    c_min: f64,
    c_max: f64,
) -> PyResult<(
    Bound<'py, PyArray2<f64>>,
    Vec<Option<f64>>,
    Vec<(usize, String)>,
)> {
    let reflectivity = owned(&reflectivity);
    let dim = reflectivity.dim();
    let mut sweep = Sweep::new(
        gate_width.as_array().to_owned(),
        reflectivity,
        Array2::zeros(dim),
        owned(&phase),
        Array2::zeros(dim),
    )?;
    let config = ZphiConfig {
        start_gate,
        c_min,
        c_max,
        ..Default::default()
    };
    let fits = correct_sweep_attenuation(&mut sweep, &config)?;
    let coefficients = fits.iter().map(|fit| fit.as_ref().ok().copied()).collect();
    let errors = fits
        .into_iter()
        .enumerate()
        .filter_map(|(radial, fit)| fit.err().map(|e| (radial, e.to_string())))
        .collect();
    Ok((sweep.reflectivity.into_pyarray_bound(py), coefficients, errors))
}

/// Runs the full pipeline and returns the corrected reflectivity, phase and rate, with a dict
/// holding the failed cells, attenuation ratios, failed radials and recorded rates.
#[pyfunction]
#[pyo3(signature = (
    reflectivity,
    differential_reflectivity,
    phase,
    correlation,
    gate_width,
    strategy = "spline",
    unfold = false,
    attenuation = true,
    max_phase_diff = -80.0,
    fold = 180.0,
    num_good = 15,
    num_bad = 10,
    d_max = 0.98,
    rho_max = 0.9,
    population_min = 5,
    start_gate = 0,
    c_min = 0.03,
    c_max = 0.18,
    record_radials = vec![],
))]
#[allow(clippy::too_many_arguments, clippy::type_complexity)]
fn quality_control<'py>(
    py: Python<'py>,
    reflectivity: PyReadonlyArray2<'py, f64>,
    differential_reflectivity: PyReadonlyArray2<'py, f64>,
    phase: PyReadonlyArray2<'py, f64>,
    correlation: PyReadonlyArray2<'py, f64>,
    gate_width: PyReadonlyArray1<'py, f64>,
    strategy: &str,
    unfold: bool,
    attenuation: bool,
    max_phase_diff: f64,
    fold: f64,
    num_good: usize,
    num_bad: usize,
    d_max: f64,
    rho_max: f64,
    population_min: usize,
    start_gate: usize,
    c_min: f64,
    c_max: f64,
    record_radials: Vec<usize>,
) -> PyResult<(
    Bound<'py, PyArray2<f64>>,
    Bound<'py, PyArray2<f64>>,
    Bound<'py, PyArray2<f64>>,
    Bound<'py, PyDict>,
)> {
    let strategy = parse_strategy(strategy)?;
    let mut sweep = Sweep::new(
        gate_width.as_array().to_owned(),
        owned(&reflectivity),
        owned(&differential_reflectivity),
        owned(&phase),
        owned(&correlation),
    )?;
    let config = QcConfig {
        unfold: unfold.then(|| UnfoldConfig {
            max_phase_diff,
            fold,
            ..Default::default()
        }),
        segmentation: SegmentationConfig {
            num_good,
            num_bad,
            d_max,
            rho_max,
            population_min,
        },
        strategy,
        attenuation: attenuation.then(|| ZphiConfig {
            start_gate,
            c_min,
            c_max,
            ..Default::default()
        }),
        record_radials,
    };
    let report = par_quality_control(&mut sweep, &config)?;
    Ok((
        sweep.reflectivity.into_pyarray_bound(py),
        sweep.differential_phase.into_pyarray_bound(py),
        sweep.rate.into_pyarray_bound(py),
        status(py, report)?,
    ))
}

/// Quality control of polarimetric weather radar moments.
#[pymodule]
fn radarqc(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(phase_unfolding, m)?)?;
    m.add_function(wrap_pyfunction!(phase_rec_spline, m)?)?;
    m.add_function(wrap_pyfunction!(phase_rec_lp, m)?)?;
    m.add_function(wrap_pyfunction!(correct_zphi, m)?)?;
    m.add_function(wrap_pyfunction!(quality_control, m)?)?;
    Ok(())
}
