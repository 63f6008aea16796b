//! Per-radial quality control: unfold, segment, reconstruct, correct.
//!
//! Every radial is processed independently. Failures are confined to the cell or radial that
//! produced them and come back in the [`SweepReport`]; only a malformed sweep aborts the run.
use crate::attenuation::zphi::{correct_attenuation, ZphiConfig};
use crate::error::QcError;
use crate::phase::reconstruction::{reconstruct_radial, CellFailure, ReconstructionStrategy};
use crate::phase::segmentation::{segment, segment_clutter_mask, RainCell, SegmentationConfig};
use crate::phase::unfold::{unfold_phase, UnfoldConfig};
use crate::sweep::{RadialProfile, Sweep};
use log::{debug, info, warn};
use ndarray::ArrayViewMut1;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use std::collections::BTreeMap;

type Result<T> = std::result::Result<T, QcError>;

#[derive(Debug, Clone, Default)]
pub struct QcConfig {
    /// Run the unfolding pre-pass when set
    pub unfold: Option<UnfoldConfig>,
    pub segmentation: SegmentationConfig,
    pub strategy: ReconstructionStrategy,
    /// Correct reflectivity for attenuation when set
    pub attenuation: Option<ZphiConfig>,
    /// Radials whose rate trace is copied into the report
    pub record_radials: Vec<usize>,
}

/// Outcome of one radial.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RadialReport {
    pub radial: usize,
    /// Gates corrected by the unfolding pass
    pub folded_gates: Vec<usize>,
    pub cells: Vec<RainCell>,
    pub cell_failures: Vec<CellFailure>,
    /// Fitted attenuation ratio, or why the correction was skipped; `None` when disabled
    pub attenuation: Option<std::result::Result<f64, QcError>>,
    /// Set when the radial could not be processed at all
    pub error: Option<QcError>,
    /// Rate trace after reconstruction, for radials listed in `record_radials`
    pub rate: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SweepReport {
    pub radials: Vec<RadialReport>,
    /// Recorded rate traces keyed by radial index
    pub rate_records: BTreeMap<usize, Vec<f64>>,
}

impl SweepReport {
    fn from_radials(mut radials: Vec<RadialReport>) -> SweepReport {
        let rate_records = radials
            .iter_mut()
            .filter_map(|r| r.rate.take().map(|rate| (r.radial, rate)))
            .collect();
        let report = SweepReport {
            radials,
            rate_records,
        };
        info!(
            "quality control of {} radials: {} rain cells, {} cells failed, {} radials failed, {} attenuation fits failed",
            report.radials.len(),
            report.num_cells(),
            report.num_failed_cells(),
            report.failed_radials().len(),
            report.num_failed_attenuation()
        );
        report
    }

    pub fn num_cells(&self) -> usize {
        self.radials.iter().map(|r| r.cells.len()).sum()
    }

    pub fn num_failed_cells(&self) -> usize {
        self.radials.iter().map(|r| r.cell_failures.len()).sum()
    }

    pub fn num_failed_attenuation(&self) -> usize {
        self.radials
            .iter()
            .filter(|r| matches!(r.attenuation, Some(Err(_))))
            .count()
    }

    /// Cells whose reconstruction failed, paired with their radial.
    pub fn failed_cells(&self) -> Vec<(usize, &CellFailure)> {
        self.radials
            .iter()
            .flat_map(|r| r.cell_failures.iter().map(move |f| (r.radial, f)))
            .collect()
    }

    /// Fitted attenuation ratio of each radial, `None` where the fit failed or was not run.
    pub fn attenuation_coefficients(&self) -> Vec<Option<f64>> {
        self.radials
            .iter()
            .map(|r| r.attenuation.as_ref().and_then(|fit| fit.as_ref().ok().copied()))
            .collect()
    }

    /// Indices of radials that could not be processed.
    pub fn failed_radials(&self) -> Vec<usize> {
        self.radials
            .iter()
            .filter(|r| r.error.is_some())
            .map(|r| r.radial)
            .collect()
    }
}

fn contiguous<'b>(view: &'b mut ArrayViewMut1<'_, f64>, name: &str) -> Result<&'b mut [f64]> {
    view.as_slice_mut()
        .ok_or_else(|| QcError::InvalidInput(format!("{name} row is not contiguous")))
}

/// Runs every enabled stage on one radial, writing phase, rate and reflectivity in place.
fn run_radial(
    radial: &mut RadialProfile,
    config: &QcConfig,
    report: &mut RadialReport,
) -> Result<()> {
    let gate_width = radial.gate_width;
    let correlation = radial.correlation.to_vec();
    let phase = contiguous(&mut radial.differential_phase, "differential phase")?;

    if let Some(unfold) = &config.unfold {
        report.folded_gates = unfold_phase(phase, &correlation, gate_width, unfold)?;
    }

    report.cells = match &radial.clutter_mask {
        Some(mask) => segment_clutter_mask(&mask.to_vec(), config.segmentation.population_min),
        None => segment(phase, &correlation, &config.segmentation)?,
    };
    debug!("radial {}: {} rain cells", report.radial, report.cells.len());

    let rate = contiguous(&mut radial.rate, "rate")?;
    report.cell_failures =
        reconstruct_radial(&config.strategy, phase, rate, &report.cells, gate_width)?;

    if let Some(zphi) = &config.attenuation {
        let reflectivity = contiguous(&mut radial.reflectivity, "reflectivity")?;
        let fit = correct_attenuation(reflectivity, phase, gate_width, zphi)
            .map(|fit| fit.coefficient);
        if let Err(e) = &fit {
            warn!("radial {}: attenuation not corrected: {e}", report.radial);
        }
        report.attenuation = Some(fit);
    }

    if config.record_radials.contains(&report.radial) {
        report.rate = Some(radial.rate.to_vec());
    }
    Ok(())
}

/// Processes one radial and reports the outcome of each stage.
///
/// A radial that cannot be processed is reported through [`RadialReport::error`]; stages that
/// had already run keep their output.
pub fn process_radial(mut radial: RadialProfile, config: &QcConfig) -> RadialReport {
    let mut report = RadialReport {
        radial: radial.index,
        ..Default::default()
    };
    if let Err(e) = run_radial(&mut radial, config, &mut report) {
        warn!("radial {} skipped: {e}", report.radial);
        report.error = Some(e);
    }
    report
}

fn check_records(sweep: &Sweep, config: &QcConfig) {
    for &r in &config.record_radials {
        if r >= sweep.num_radials() {
            warn!(
                "cannot record rate of radial {r}, sweep has {} radials",
                sweep.num_radials()
            );
        }
    }
}

/// Runs quality control over every radial of a sweep in turn.
///
/// # Errors
/// Will return `Err` if the sweep arrays disagree in shape. Failures within a radial are
/// reported, not returned.
pub fn quality_control(sweep: &mut Sweep, config: &QcConfig) -> Result<SweepReport> {
    sweep.validate()?;
    check_records(sweep, config);
    let radials = sweep
        .radials_mut()
        .into_iter()
        .map(|radial| process_radial(radial, config))
        .collect();
    Ok(SweepReport::from_radials(radials))
}

/// Runs quality control over the radials of a sweep in parallel.
///
/// # Errors
/// Will return `Err` if the sweep arrays disagree in shape. Failures within a radial are
/// reported, not returned.
pub fn par_quality_control(sweep: &mut Sweep, config: &QcConfig) -> Result<SweepReport> {
    sweep.validate()?;
    check_records(sweep, config);
    let radials = sweep
        .radials_mut()
        .into_par_iter()
        .map(|radial| process_radial(radial, config))
        .collect();
    Ok(SweepReport::from_radials(radials))
}

/// Corrects the reflectivity of every radial against the differential phase as it stands in
/// the sweep, without segmenting or reconstructing first.
///
/// Returns the fitted attenuation ratio of each radial, or why its reflectivity was left as is.
///
/// # Errors
/// Will return `Err` if the sweep arrays disagree in shape.
pub fn correct_sweep_attenuation(
    sweep: &mut Sweep,
    config: &ZphiConfig,
) -> Result<Vec<std::result::Result<f64, QcError>>> {
    sweep.validate()?;
    let fits = sweep
        .radials_mut()
        .into_par_iter()
        .map(|mut radial| {
            let phase = radial.differential_phase.to_vec();
            let fit = contiguous(&mut radial.reflectivity, "reflectivity").and_then(|z| {
                correct_attenuation(z, &phase, radial.gate_width, config).map(|f| f.coefficient)
            });
            if let Err(e) = &fit {
                warn!("radial {}: attenuation not corrected: {e}", radial.index);
            }
            fit
        })
        .collect();
    Ok(fits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    /// Noisy leading gates, then a steady 0.5 degree per gate rise.
    fn radial_phase(num_gates: usize) -> Vec<f64> {
        (0..num_gates)
            .map(|i| {
                if i < 20 {
                    if i % 2 == 0 {
                        40.0
                    } else {
                        160.0
                    }
                } else {
                    30.0 + 0.5 * i as f64
                }
            })
            .collect()
    }

    fn sweep(num_radials: usize, num_gates: usize) -> Sweep {
        let phase = Array2::from_shape_fn((num_radials, num_gates), |(_, g)| {
            radial_phase(num_gates)[g]
        });
        Sweep::new(
            Array1::from_elem(num_radials, 0.25),
            Array2::from_elem((num_radials, num_gates), 1e3),
            Array2::zeros((num_radials, num_gates)),
            phase,
            Array2::from_elem((num_radials, num_gates), 0.99),
        )
        .expect("sweep")
    }

    #[test]
    fn clutter_mask_drives_segmentation() {
        let sweep = sweep(2, 60);
        let mask = Array2::from_shape_fn((2, 60), |(_, g)| !(20..50).contains(&g));
        let mut sweep = sweep.with_clutter_mask(mask).expect("mask");
        let config = QcConfig {
            strategy: ReconstructionStrategy::MonotoneLp,
            record_radials: vec![1],
            ..Default::default()
        };
        let report = quality_control(&mut sweep, &config).expect("qc");
        for radial in &report.radials {
            assert_eq!(
                radial.cells,
                vec![RainCell {
                    label: 1,
                    start: 20,
                    end: 49
                }]
            );
            assert!(radial.cell_failures.is_empty());
            assert!(radial.attenuation.is_none());
        }
        let rate = &report.rate_records[&1];
        assert!(rate[..20].iter().all(|&r| r == 0.0));
        assert!(rate[22..46].iter().all(|&r| (r - 2.0).abs() < 1e-6));
        assert!(!report.rate_records.contains_key(&0));
    }

    #[test]
    fn short_cell_failure_is_reported() {
        let sweep = sweep(1, 60);
        let mask = Array2::from_shape_fn((1, 60), |(_, g)| !(30..33).contains(&g) && g < 40);
        let mut sweep = sweep.with_clutter_mask(mask).expect("mask");
        let config = QcConfig {
            segmentation: SegmentationConfig {
                population_min: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let before = sweep.differential_phase.clone();
        let report = quality_control(&mut sweep, &config).expect("qc");
        let failures = &report.radials[0].cell_failures;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].cell.start, 30);
        assert_eq!(failures[0].error, QcError::SegmentTooShort { len: 3, min: 5 });
        assert_eq!(
            sweep.differential_phase.row(0).to_vec()[30..33],
            before.row(0).to_vec()[30..33]
        );
        assert_eq!(report.num_failed_cells(), 1);
        assert!(report.failed_radials().is_empty());
    }

    #[test]
    fn attenuation_failure_leaves_reflectivity() {
        let mut sweep = sweep(2, 60);
        sweep.reflectivity.fill(0.0);
        let config = QcConfig {
            attenuation: Some(ZphiConfig::default()),
            ..Default::default()
        };
        let report = quality_control(&mut sweep, &config).expect("qc");
        assert_eq!(report.num_failed_attenuation(), 2);
        assert!(sweep.reflectivity.iter().all(|&z| z == 0.0));
    }

    #[test]
    fn report_lists_failed_cells_and_coefficients() {
        let sweep = sweep(3, 60);
        let mask = Array2::from_shape_fn((3, 60), |(r, g)| match r {
            1 => !(30..33).contains(&g),
            _ => !(20..50).contains(&g),
        });
        let mut sweep = sweep.with_clutter_mask(mask).expect("mask");
        sweep.reflectivity.row_mut(2).fill(0.0);
        let config = QcConfig {
            segmentation: SegmentationConfig {
                population_min: 1,
                ..Default::default()
            },
            attenuation: Some(ZphiConfig::default()),
            ..Default::default()
        };
        let report = quality_control(&mut sweep, &config).expect("qc");

        let failed = report.failed_cells();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, 1);
        assert_eq!(failed[0].1.cell.start, 30);

        let coefficients = report.attenuation_coefficients();
        assert_eq!(coefficients.len(), 3);
        assert!(coefficients[0].is_some() && coefficients[1].is_some());
        assert_eq!(coefficients[2], None);
        assert!(quality_control(&mut sweep, &QcConfig::default())
            .expect("qc")
            .attenuation_coefficients()
            .iter()
            .all(Option::is_none));
    }

    #[test]
    fn sweep_attenuation_reports_each_radial() {
        let mut sweep = sweep(3, 60);
        sweep.reflectivity.row_mut(1).fill(0.0);
        let fits = correct_sweep_attenuation(&mut sweep, &ZphiConfig::default()).expect("zphi");
        assert_eq!(fits.len(), 3);
        assert!(fits[0].is_ok() && fits[2].is_ok());
        assert!(matches!(fits[1], Err(QcError::AttenuationFitFailure(_))));
        assert!(sweep.reflectivity.row(1).iter().all(|&z| z == 0.0));

        sweep.rate = Array2::zeros((3, 59));
        assert!(correct_sweep_attenuation(&mut sweep, &ZphiConfig::default()).is_err());
    }

    #[test]
    fn malformed_sweep_is_rejected() {
        let mut sweep = sweep(2, 30);
        sweep.rate = Array2::zeros((2, 29));
        assert!(quality_control(&mut sweep, &QcConfig::default()).is_err());
        assert!(par_quality_control(&mut sweep, &QcConfig::default()).is_err());
    }
}
