//! Single forward pass that undoes 180/360 degree folds in the differential phase.
use crate::error::QcError;
use crate::sweep::cumulative_range;
use crate::utils::window::{mean, regression_slope, std_dev};

/// Number of gates used for the local phase standard deviation
pub const STD_WINDOW: usize = 10;
/// Number of preceding gates used for the reference slope and the initial reference
pub const SLOPE_WINDOW: usize = 5;

#[derive(Debug, Clone)]
pub struct UnfoldConfig {
    /// A gate whose phase falls this far below the running reference is folded, degrees
    pub max_phase_diff: f64,
    /// Phase added to a folded gate, degrees
    pub fold: f64,
    /// Maximum phase standard deviation for the window that fixes the reference
    pub std_start: f64,
    /// Minimum correlation over the gates preceding the reference window
    pub rho_start: f64,
    /// Maximum phase standard deviation for the reference to advance
    pub std_ref: f64,
    /// Plausible bounds on the phase slope, degrees per kilometre
    pub slope_min: f64,
    pub slope_max: f64,
}

impl Default for UnfoldConfig {
    fn default() -> Self {
        UnfoldConfig {
            max_phase_diff: -80.0,
            fold: 180.0,
            std_start: 5.0,
            rho_start: 0.9,
            std_ref: 15.0,
            slope_min: -5.0,
            slope_max: 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnfoldState {
    /// No trustworthy phase has been seen yet
    Seeking,
    /// Following the expected phase from the last trusted reference
    Tracking { reference: f64 },
}

/// Corrects folded gates of one radial in place and returns their indices.
///
/// The radial is left untouched if no window qualifies as a reference.
///
/// # Errors
/// Will return `Err` if `phase` and `correlation` differ in length.
pub fn unfold_phase(
    phase: &mut [f64],
    correlation: &[f64],
    gate_width: f64,
    config: &UnfoldConfig,
) -> Result<Vec<usize>, QcError> {
    if phase.len() != correlation.len() {
        Err(QcError::InvalidInput(format!(
            "phase has {} gates but correlation has {}",
            phase.len(),
            correlation.len()
        )))?
    }
    let num_gates = phase.len();
    let mut folded = vec![];
    if num_gates < SLOPE_WINDOW + STD_WINDOW {
        return Ok(folded);
    }
    let range = cumulative_range(gate_width, num_gates);

    let mut state = UnfoldState::Seeking;
    for i in SLOPE_WINDOW..=num_gates - STD_WINDOW {
        let sigma = std_dev(&phase[i..i + STD_WINDOW]);
        let preceding = i - SLOPE_WINDOW..i;

        if state == UnfoldState::Seeking {
            if sigma < config.std_start
                && correlation[preceding.clone()]
                    .iter()
                    .all(|&rho| rho > config.rho_start)
            {
                state = UnfoldState::Tracking {
                    reference: mean(&phase[preceding.clone()]),
                };
            } else {
                continue;
            }
        }

        if let UnfoldState::Tracking { reference } = &mut state {
            let slope = regression_slope(&range[preceding.clone()], &phase[preceding]);
            if sigma < config.std_ref && slope > config.slope_min && slope < config.slope_max {
                *reference += slope * gate_width;
            }
            if phase[i] - *reference < config.max_phase_diff {
                phase[i] += config.fold;
                folded.push(i);
            }
        }
    }
    Ok(folded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_fold_is_corrected_once() {
        let mut phase = vec![50.0; 60];
        phase[30] = -150.0;
        let correlation = vec![0.99; 60];
        let folded = unfold_phase(&mut phase, &correlation, 0.25, &UnfoldConfig::default())
            .expect("unfold");
        assert_eq!(folded, vec![30]);
        assert_eq!(phase[30], 30.0);
        assert!(phase
            .iter()
            .enumerate()
            .all(|(i, &p)| i == 30 || p == 50.0));
    }

    #[test]
    fn full_turn_fold() {
        let mut phase: Vec<f64> = (0..80).map(|i| 20.0 + 0.5 * i as f64).collect();
        let expected = phase.clone();
        for p in phase[40..46].iter_mut() {
            *p -= 360.0;
        }
        let config = UnfoldConfig {
            max_phase_diff: -180.0,
            fold: 360.0,
            ..Default::default()
        };
        let folded =
            unfold_phase(&mut phase, &vec![0.99; 80], 0.25, &config).expect("unfold");
        assert_eq!(folded, (40..46).collect::<Vec<_>>());
        assert_eq!(phase, expected);
    }

    #[test]
    fn no_reference_leaves_radial_untouched() {
        let mut phase: Vec<f64> = (0..40).map(|i| if i % 2 == 0 { 0.0 } else { -300.0 }).collect();
        let original = phase.clone();
        let folded = unfold_phase(&mut phase, &vec![0.99; 40], 0.25, &UnfoldConfig::default())
            .expect("unfold");
        assert!(folded.is_empty());
        assert_eq!(phase, original);
    }

    #[test]
    fn low_correlation_blocks_reference() {
        let mut phase = vec![50.0; 40];
        phase[25] = -150.0;
        let folded = unfold_phase(&mut phase, &vec![0.5; 40], 0.25, &UnfoldConfig::default())
            .expect("unfold");
        assert!(folded.is_empty());
    }

    #[test]
    fn mismatched_lengths() {
        let mut phase = vec![0.0; 20];
        let res = unfold_phase(&mut phase, &[0.9; 19], 0.25, &UnfoldConfig::default());
        assert!(matches!(res, Err(QcError::InvalidInput(_))));
    }
}
