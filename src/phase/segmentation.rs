//! Rain-cell segmentation of a single radial.
//!
//! A rain cell opens at a gate whose windowed phase dispersion reaches `d_max` and closes at
//! the first later gate where the dispersion has dropped below `d_max` while the correlation
//! is under `rho_max`. Cells that touch (the next opening gate directly follows the previous
//! closing gate) are merged, and cells with fewer than `population_min` gates are dropped.
use crate::error::QcError;
use crate::utils::window::{circular_dispersion, hold_edges, rolling};
use std::ops::RangeInclusive;

#[derive(Debug, Clone)]
pub struct SegmentationConfig {
    /// Window length for the phase dispersion
    pub num_good: usize,
    /// Accepted alongside `num_good` but unused: neither the dispersion rule nor the clutter
    /// mask reads it
    pub num_bad: usize,
    /// Dispersion at or above which a gate may open a cell
    pub d_max: f64,
    /// Correlation below which a low-dispersion gate closes a cell
    pub rho_max: f64,
    /// Minimum number of gates in a labelled cell
    pub population_min: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        SegmentationConfig {
            num_good: 15,
            num_bad: 10,
            d_max: 0.98,
            rho_max: 0.9,
            population_min: 5,
        }
    }
}

/// A maximal run of gates `[start, end]` (inclusive) sharing a positive label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RainCell {
    pub label: usize,
    pub start: usize,
    pub end: usize,
}

impl RainCell {
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn range(&self) -> RangeInclusive<usize> {
        self.start..=self.end
    }
}

/// Windowed circular dispersion of the phase trace, padded to the trace length by holding the
/// last value.
///
/// Phase values enter the trigonometric functions unscaled, so a degree-valued trace with a
/// gate-to-gate spread of a few degrees already decorrelates.
pub fn dispersion_trace(phase: &[f64], window: usize) -> Vec<f64> {
    let dispersion = rolling(phase, window, circular_dispersion);
    hold_edges(&dispersion, 0, phase.len())
}

/// Segments one radial using the dispersion and correlation thresholds.
///
/// # Errors
/// Will return `Err` if the traces differ in length or the window length is zero.
pub fn segment(
    phase: &[f64],
    correlation: &[f64],
    config: &SegmentationConfig,
) -> Result<Vec<RainCell>, QcError> {
    if config.num_good == 0 {
        Err(QcError::InvalidInput(
            "dispersion window must be at least one gate".to_string(),
        ))?
    }
    if phase.len() < config.num_good {
        check_lengths(phase.len(), correlation.len())?;
        return Ok(vec![]);
    }
    let dispersion = dispersion_trace(phase, config.num_good);
    segment_dispersion(&dispersion, correlation, config)
}

/// Segments one radial from a precomputed dispersion trace.
///
/// # Errors
/// Will return `Err` if the traces differ in length.
pub fn segment_dispersion(
    dispersion: &[f64],
    correlation: &[f64],
    config: &SegmentationConfig,
) -> Result<Vec<RainCell>, QcError> {
    check_lengths(dispersion.len(), correlation.len())?;

    let starts: Vec<usize> = dispersion
        .iter()
        .enumerate()
        .filter(|(_, &d)| d >= config.d_max)
        .map(|(i, _)| i)
        .collect();
    let ends: Vec<usize> = dispersion
        .iter()
        .zip(correlation.iter())
        .enumerate()
        .filter(|(_, (&d, &rho))| d < config.d_max && rho < config.rho_max)
        .map(|(i, _)| i)
        .collect();

    let spans = merge_touching(pair_boundaries(&starts, &ends));
    Ok(label_spans(&spans, config.population_min))
}

/// Segments one radial from an external clutter mask (`true` marks clutter). Every run of
/// non-clutter gates at least `population_min` long becomes a cell.
pub fn segment_clutter_mask(mask: &[bool], population_min: usize) -> Vec<RainCell> {
    let mut spans = vec![];
    let mut open: Option<usize> = None;
    for (i, &clutter) in mask.iter().enumerate() {
        match (open, clutter) {
            (None, false) => open = Some(i),
            (Some(start), true) => {
                spans.push((start, i - 1));
                open = None;
            }
            _ => {}
        }
    }
    if let Some(start) = open {
        spans.push((start, mask.len() - 1));
    }
    label_spans(&spans, population_min)
}

/// Expands cells into a per-gate label array, 0 for unlabelled gates.
pub fn label_gates(cells: &[RainCell], num_gates: usize) -> Vec<usize> {
    let mut labels = vec![0; num_gates];
    for cell in cells {
        for label in labels[cell.range()].iter_mut() {
            *label = cell.label;
        }
    }
    labels
}

fn check_lengths(trace: usize, correlation: usize) -> Result<(), QcError> {
    if trace != correlation {
        Err(QcError::InvalidInput(format!(
            "phase trace has {trace} gates but correlation has {correlation}"
        )))?
    }
    Ok(())
}

/// Two-pointer walk over the sorted opening and closing gates. Each opening gate is paired
/// with the first closing gate at or after it; the next opening gate is searched from that
/// closing gate on. Stops as soon as an opening gate has no closing gate left.
fn pair_boundaries(starts: &[usize], ends: &[usize]) -> Vec<(usize, usize)> {
    let mut spans = vec![];
    let (mut s, mut e) = (0, 0);
    while let Some(&start) = starts.get(s) {
        while e < ends.len() && ends[e] < start {
            e += 1;
        }
        let Some(&end) = ends.get(e) else { break };
        spans.push((start, end));
        while s < starts.len() && starts[s] < end {
            s += 1;
        }
    }
    spans
}

/// Joins spans whose start directly follows the previous end.
fn merge_touching(spans: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some(last) if start == last.1 + 1 => last.1 = end,
            _ => merged.push((start, end)),
        }
    }
    merged
}

fn label_spans(spans: &[(usize, usize)], population_min: usize) -> Vec<RainCell> {
    spans
        .iter()
        .filter(|(start, end)| end - start + 1 >= population_min)
        .enumerate()
        .map(|(i, &(start, end))| RainCell {
            label: i + 1,
            start,
            end,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SegmentationConfig {
        SegmentationConfig::default()
    }

    #[test]
    fn correlation_dip_closes_single_cell() {
        let dispersion: Vec<f64> = [vec![0.99; 20], vec![0.5; 5], vec![0.99; 20]].concat();
        let correlation: Vec<f64> = [vec![0.95; 20], vec![0.2; 5], vec![0.95; 20]].concat();
        let cells = segment_dispersion(&dispersion, &correlation, &config()).expect("segment");
        assert_eq!(
            cells,
            vec![RainCell {
                label: 1,
                start: 0,
                end: 20
            }]
        );
    }

    #[test]
    fn touching_cells_share_the_earlier_label() {
        // gate 10 closes the first cell and gate 11 opens the next one
        let mut dispersion = vec![0.99; 30];
        let mut correlation = vec![0.95; 30];
        for i in [10, 21] {
            dispersion[i] = 0.5;
            correlation[i] = 0.3;
        }
        for i in 22..30 {
            dispersion[i] = 0.5;
        }
        let cells = segment_dispersion(&dispersion, &correlation, &config()).expect("segment");
        assert_eq!(
            cells,
            vec![RainCell {
                label: 1,
                start: 0,
                end: 21
            }]
        );
    }

    #[test]
    fn short_cells_stay_unlabelled_and_labels_stay_dense() {
        let mut dispersion = vec![0.5; 40];
        let mut correlation = vec![0.95; 40];
        // cell [2, 4] is 3 gates, cell [10, 19] and [25, 34] are long enough
        for i in (2..4).chain(10..19).chain(25..34) {
            dispersion[i] = 0.99;
        }
        for i in [4, 19, 34] {
            correlation[i] = 0.3;
        }
        let cells = segment_dispersion(&dispersion, &correlation, &config()).expect("segment");
        assert_eq!(
            cells,
            vec![
                RainCell {
                    label: 1,
                    start: 10,
                    end: 19
                },
                RainCell {
                    label: 2,
                    start: 25,
                    end: 34
                }
            ]
        );
        let labels = label_gates(&cells, 40);
        assert!(labels[..10].iter().all(|&l| l == 0));
        assert!(labels[10..=19].iter().all(|&l| l == 1));
        assert!(labels[25..=34].iter().all(|&l| l == 2));
    }

    #[test]
    fn open_cell_without_end_is_dropped() {
        let dispersion = vec![0.99; 25];
        let correlation = vec![0.3; 25];
        let cells = segment_dispersion(&dispersion, &correlation, &config()).expect("segment");
        assert!(cells.is_empty());
    }

    #[test]
    fn dispersion_is_edge_held() {
        let phase: Vec<f64> = (0..20).map(|i| if i < 12 { 1.0 } else { 3.0 * i as f64 }).collect();
        let trace = dispersion_trace(&phase, 5);
        assert_eq!(trace.len(), 20);
        let last = trace[15];
        assert!(trace[15..].iter().all(|&d| d == last));
        assert!(trace[0] < 1e-12);
    }

    #[test]
    fn num_bad_is_ignored() {
        let phase: Vec<f64> = (0..60)
            .map(|i| if (20..40).contains(&i) { 7.0 * i as f64 } else { 3.0 })
            .collect();
        let correlation = vec![0.5; 60];
        let expected = segment(&phase, &correlation, &config()).expect("segment");
        for num_bad in [0, 1, 50] {
            let config = SegmentationConfig {
                num_bad,
                ..config()
            };
            assert_eq!(
                segment(&phase, &correlation, &config).expect("segment"),
                expected
            );
        }
    }

    #[test]
    fn short_radial_has_no_cells() {
        let cells = segment(&[1.0; 10], &[0.99; 10], &config()).expect("segment");
        assert!(cells.is_empty());
        assert!(segment(&[1.0; 10], &[0.99; 9], &config()).is_err());
    }

    #[test]
    fn clutter_mask_runs() {
        let mut mask = vec![true; 30];
        for i in (3..6).chain(8..20).chain(24..30) {
            mask[i] = false;
        }
        let cells = segment_clutter_mask(&mask, 5);
        assert_eq!(
            cells,
            vec![
                RainCell {
                    label: 1,
                    start: 8,
                    end: 19
                },
                RainCell {
                    label: 2,
                    start: 24,
                    end: 29
                }
            ]
        );
    }
}
