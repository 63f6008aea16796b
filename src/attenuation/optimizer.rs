//! Bounded derivative-free global minimisation.
//!
//! Differential evolution (best/1/bin with dithered mutation) over a box, followed by an
//! optional bounded Levenberg-Marquardt polish of the best member.
use crate::error::QcError;
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rmpfit::{MPConfig, MPFitter, MPPar, MPResult};
use std::time::{Duration, Instant};

type Result<T> = std::result::Result<T, QcError>;

/// Smallest population that leaves two distinct donors besides the target and best members
pub const MIN_POPULATION: usize = 5;

#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Number of population members
    pub population: usize,
    pub max_generations: usize,
    /// Range the differential weight is drawn from once per generation
    pub mutation: (f64, f64),
    /// Crossover probability
    pub recombination: f64,
    pub seed: u64,
    /// Refine the best member with a local bounded least-squares step
    pub polish: bool,
    /// Wall-clock limit for one minimisation
    pub time_budget: Option<Duration>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            population: 15,
            max_generations: 1000,
            mutation: (0.5, 1.0),
            recombination: 0.7,
            seed: 0,
            polish: true,
            time_budget: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeResult {
    /// Best parameters found
    pub x: Vec<f64>,
    /// Objective at `x`
    pub fun: f64,
    pub generations: usize,
    pub evaluations: usize,
    /// Whether the population energies met the relative tolerance
    pub converged: bool,
}

/// Population kept in the unit box, mapped onto the real bounds for every evaluation.
struct Population<'a, F> {
    objective: &'a F,
    bounds: &'a [(f64, f64)],
    members: Vec<Vec<f64>>,
    energies: Vec<f64>,
    best: usize,
    evaluations: usize,
}

impl<'a, F: Fn(&[f64]) -> f64> Population<'a, F> {
    /// Latin hypercube initialisation: each dimension gets one sample per stratum.
    fn latin_hypercube(
        objective: &'a F,
        bounds: &'a [(f64, f64)],
        size: usize,
        rng: &mut StdRng,
    ) -> Self {
        let mut members = vec![vec![0.0; bounds.len()]; size];
        for d in 0..bounds.len() {
            let mut strata: Vec<usize> = (0..size).collect();
            strata.shuffle(rng);
            for (member, stratum) in members.iter_mut().zip(strata) {
                member[d] = (stratum as f64 + rng.gen::<f64>()) / size as f64;
            }
        }
        let mut population = Population {
            objective,
            bounds,
            members: vec![],
            energies: Vec::with_capacity(size),
            best: 0,
            evaluations: 0,
        };
        for member in &members {
            let energy = population.energy(member);
            population.energies.push(energy);
        }
        population.members = members;
        population.best = argmin(&population.energies);
        population
    }

    fn scale(&self, unit: &[f64]) -> Vec<f64> {
        unit.iter()
            .zip(self.bounds)
            .map(|(u, (lo, hi))| lo + u * (hi - lo))
            .collect()
    }

    /// Objective at a unit-box point; non-finite values rank last.
    fn energy(&mut self, unit: &[f64]) -> f64 {
        self.evaluations += 1;
        let value = (self.objective)(&self.scale(unit));
        if value.is_finite() {
            value
        } else {
            f64::INFINITY
        }
    }

    fn converged(&self, tol: f64) -> bool {
        if self.energies.iter().any(|e| !e.is_finite()) {
            return false;
        }
        let n = self.energies.len() as f64;
        let mean = self.energies.iter().sum::<f64>() / n;
        let var = self
            .energies
            .iter()
            .map(|e| (e - mean) * (e - mean))
            .sum::<f64>()
            / n;
        var.sqrt() <= tol * mean.abs()
    }

    /// best/1/bin trial for member `target`; out-of-box coordinates are resampled.
    fn trial(&self, target: usize, weight: f64, crossover: f64, rng: &mut StdRng) -> Vec<f64> {
        let size = self.members.len();
        let mut donors = [0usize; 2];
        let mut picked = 0;
        while picked < 2 {
            let candidate = rng.gen_range(0..size);
            if candidate != target && !donors[..picked].contains(&candidate) {
                donors[picked] = candidate;
                picked += 1;
            }
        }
        let dims = self.bounds.len();
        let forced = rng.gen_range(0..dims);
        let best = &self.members[self.best];
        (0..dims)
            .map(|d| {
                if d == forced || rng.gen::<f64>() < crossover {
                    let v = best[d]
                        + weight * (self.members[donors[0]][d] - self.members[donors[1]][d]);
                    if (0.0..=1.0).contains(&v) {
                        v
                    } else {
                        rng.gen::<f64>()
                    }
                } else {
                    self.members[target][d]
                }
            })
            .collect()
    }
}

fn argmin(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |(best, min), (i, &v)| {
            if v < min {
                (i, v)
            } else {
                (best, min)
            }
        })
        .0
}

/// Minimises `objective` over the box `bounds` by differential evolution.
///
/// Converges when the standard deviation of the population energies is at most
/// `tol * |mean energy|`.
///
/// # Errors
/// Will return `Err` if the bounds or the configuration are invalid, if the time budget runs
/// out, or if the population does not converge within `max_generations`.
pub fn differential_evolution<F>(
    objective: &F,
    bounds: &[(f64, f64)],
    tol: f64,
    config: &OptimizerConfig,
) -> Result<OptimizeResult>
where
    F: Fn(&[f64]) -> f64,
{
    if bounds.is_empty() {
        Err(QcError::InvalidInput("no parameters to optimise".to_string()))?
    }
    for (lo, hi) in bounds {
        if !(lo.is_finite() && hi.is_finite() && lo <= hi) {
            Err(QcError::AttenuationFitFailure(format!(
                "invalid search bounds [{lo}, {hi}]"
            )))?
        }
    }
    if config.population < MIN_POPULATION {
        Err(QcError::InvalidInput(format!(
            "population of {} is below the minimum of {MIN_POPULATION}",
            config.population
        )))?
    }
    let (f_lo, f_hi) = config.mutation;
    if !(0.0..=2.0).contains(&f_lo) || !(f_lo..=2.0).contains(&f_hi) {
        Err(QcError::InvalidInput(format!(
            "mutation range ({f_lo}, {f_hi}) must lie within [0, 2]"
        )))?
    }

    let deadline = config.time_budget.map(|budget| (budget, Instant::now() + budget));
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut population =
        Population::latin_hypercube(objective, bounds, config.population, &mut rng);

    let mut generations = 0;
    let mut converged = population.converged(tol);
    while !converged && generations < config.max_generations {
        if let Some((budget, deadline)) = deadline {
            if Instant::now() >= deadline {
                Err(QcError::AttenuationFitFailure(format!(
                    "time budget of {budget:?} exceeded after {generations} generations"
                )))?
            }
        }
        let weight = f_lo + (f_hi - f_lo) * rng.gen::<f64>();
        for target in 0..population.members.len() {
            let trial = population.trial(target, weight, config.recombination, &mut rng);
            let energy = population.energy(&trial);
            if energy <= population.energies[target] {
                population.members[target] = trial;
                population.energies[target] = energy;
                if energy <= population.energies[population.best] {
                    population.best = target;
                }
            }
        }
        generations += 1;
        converged = population.converged(tol);
    }
    if !converged {
        Err(QcError::AttenuationFitFailure(format!(
            "no convergence after {generations} generations"
        )))?
    }

    let mut result = OptimizeResult {
        x: population.scale(&population.members[population.best]),
        fun: population.energies[population.best],
        generations,
        evaluations: population.evaluations,
        converged,
    };
    if config.polish {
        polish(objective, bounds, &mut result);
    }
    Ok(result)
}

/// Bounded local refinement. The polished point replaces the result only when it lowers the
/// objective.
fn polish<F: Fn(&[f64]) -> f64>(objective: &F, bounds: &[(f64, f64)], result: &mut OptimizeResult) {
    let mut problem = PolishProblem::new(objective, bounds);
    let mut params = result.x.clone();
    match problem.mpfit(&mut params) {
        Ok(_) => {
            for (p, (lo, hi)) in params.iter_mut().zip(bounds) {
                *p = p.clamp(*lo, *hi);
            }
            let fun = objective(&params);
            if fun.is_finite() && fun < result.fun {
                debug!("polish lowered the objective from {} to {fun}", result.fun);
                result.x = params;
                result.fun = fun;
            }
        }
        Err(e) => debug!("polish skipped: {e}"),
    }
}

/// Levenberg-Marquardt view of a scalar objective: the first deviate is its square root, the
/// rest pad the system to one point per parameter.
struct PolishProblem<'a, F> {
    objective: &'a F,
    params: Vec<MPPar>,
}

impl<'a, F: Fn(&[f64]) -> f64> PolishProblem<'a, F> {
    fn new(objective: &'a F, bounds: &[(f64, f64)]) -> Self {
        let params = bounds
            .iter()
            .map(|&(lo, hi)| MPPar {
                limited_low: true,
                limit_low: lo,
                limited_up: true,
                limit_up: hi,
                ..Default::default()
            })
            .collect();
        PolishProblem { objective, params }
    }
}

impl<'a, F: Fn(&[f64]) -> f64> MPFitter for PolishProblem<'a, F> {
    fn eval(&mut self, params: &[f64], deviates: &mut [f64]) -> MPResult<()> {
        deviates.fill(0.0);
        deviates[0] = (self.objective)(params).max(0.0).sqrt();
        Ok(())
    }

    fn number_of_points(&self) -> usize {
        self.params.len()
    }

    fn config(&self) -> MPConfig {
        MPConfig {
            ftol: 1e-10,
            gtol: 1e-10,
            no_finite_check: false,
            max_fev: 200,
            ..Default::default()
        }
    }

    fn parameters(&self) -> Option<&[MPPar]> {
        Some(&self.params)
    }
}
