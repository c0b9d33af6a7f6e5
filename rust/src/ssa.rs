//! Gillespie stochastic simulation over a [`Model`].
//!
//! Used to cross-check FSP solutions: the empirical distribution of final
//! states over many independent trajectories converges to the CME solution.
//! Trajectories run in parallel with Rayon, each with its own seeded RNG.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::distribution::Distribution;
use crate::error::{FspError, Result};
use crate::model::Model;
use crate::state::State;

/// Configuration for Gillespie simulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Time at which the state is read off.
    pub t_final: f64,
    /// Reaction events allowed per trajectory.
    pub max_events: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            t_final: 1.0,
            max_events: 1_000_000,
        }
    }
}

/// Gillespie simulator for models with time-independent propensities.
pub struct GillespieSampler {
    model: Model,
    config: SimulationConfig,
}

impl GillespieSampler {
    /// # Errors
    /// `InvalidModel` for a model with time-dependent coefficients or a
    /// negative / non-finite final time.
    pub fn new(model: Model, config: SimulationConfig) -> Result<Self> {
        if !model.time_dependencies().is_empty() {
            return Err(FspError::InvalidModel(
                "stochastic simulation requires time-independent propensities".to_string(),
            ));
        }
        if !config.t_final.is_finite() || config.t_final < 0.0 {
            return Err(FspError::InvalidModel(format!(
                "final time {} must be finite and >= 0",
                config.t_final
            )));
        }
        Ok(Self { model, config })
    }

    /// Run one trajectory from `initial` and return the state at `t_final`.
    ///
    /// Reactions leading to invalid states never fire.
    pub fn simulate(&self, initial: &State, rng: &mut StdRng) -> Result<State> {
        let mut state = initial.clone();
        let mut t = 0.0;
        let mut events = 0usize;

        loop {
            let mut candidates: Vec<(State, f64)> = self
                .model
                .reactions()
                .iter()
                .filter_map(|reaction| {
                    let rate = reaction.rate(&state);
                    if rate <= 0.0 {
                        return None;
                    }
                    let next = state.offset(&reaction.offset);
                    self.model.is_valid(&next).then_some((next, rate))
                })
                .collect();
            let total_rate: f64 = candidates.iter().map(|(_, rate)| rate).sum();

            // Absorbing state
            if total_rate <= 0.0 {
                return Ok(state);
            }

            t += -rng.gen::<f64>().ln() / total_rate;
            if t > self.config.t_final {
                return Ok(state);
            }

            if events >= self.config.max_events {
                return Err(FspError::Integration(format!(
                    "trajectory exceeded {} events before t = {}",
                    self.config.max_events, self.config.t_final
                )));
            }
            events += 1;

            let u = rng.gen::<f64>() * total_rate;
            let mut cumsum = 0.0;
            let mut chosen = candidates.len() - 1;
            for (i, (_, rate)) in candidates.iter().enumerate() {
                cumsum += rate;
                if u <= cumsum {
                    chosen = i;
                    break;
                }
            }
            state = candidates.swap_remove(chosen).0;
        }
    }
}

/// Simulate `n_samples` trajectories in parallel and return the empirical
/// distribution of their final states.
///
/// Trajectory `i` draws from `StdRng::seed_from_u64(seed + i)`, so results
/// do not depend on thread scheduling.
pub fn sample_final_states(
    model: &Model,
    config: &SimulationConfig,
    initial: &State,
    n_samples: usize,
    seed: u64,
) -> Result<Distribution> {
    let sampler = GillespieSampler::new(model.clone(), config.clone())?;

    let finals: Vec<State> = (0..n_samples)
        .into_par_iter()
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
            sampler.simulate(initial, &mut rng)
        })
        .collect::<Result<_>>()?;

    let mut counts: HashMap<State, usize> = HashMap::new();
    for state in finals {
        *counts.entry(state).or_insert(0) += 1;
    }
    debug!(
        n_samples,
        distinct_states = counts.len(),
        t_final = config.t_final,
        "sampled final states"
    );

    let total = n_samples as f64;
    Ok(counts
        .into_iter()
        .map(|(state, count)| (state, count as f64 / total))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::from_rect;
    use crate::expand::NeighbourhoodExpander;
    use crate::fsp::{FspConfig, FspSolver};
    use crate::integrator::{IntegratorConfig, Rk45Integrator};
    use crate::model::Reaction;

    fn birth_death(birth: f64, death: f64) -> Model {
        Model::new(
            1,
            vec![
                Reaction::new("birth", [1], move |_: &State| birth),
                Reaction::new("death", [-1], move |s: &State| death * s.get(0) as f64),
            ],
        )
        .unwrap()
        .with_initial_state([0])
        .unwrap()
    }

    #[test]
    fn test_single_trajectory() {
        let model = birth_death(2.0, 1.0);
        let sampler = GillespieSampler::new(model, SimulationConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let state = sampler.simulate(&State::from([0]), &mut rng).unwrap();
        assert!(state.get(0) >= 0);
    }

    #[test]
    fn test_absorbing_state() {
        let model = Model::new(
            1,
            vec![Reaction::new("decay", [-1], |s: &State| s.get(0) as f64)],
        )
        .unwrap();
        let config = SimulationConfig {
            t_final: 1e6,
            ..Default::default()
        };
        let sampler = GillespieSampler::new(model, config).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            sampler.simulate(&State::from([5]), &mut rng).unwrap(),
            State::from([0])
        );
    }

    #[test]
    fn test_event_budget() {
        let config = SimulationConfig {
            t_final: 100.0,
            max_events: 10,
        };
        let sampler = GillespieSampler::new(birth_death(50.0, 0.0), config).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        assert!(sampler.simulate(&State::from([0]), &mut rng).is_err());
    }

    #[test]
    fn test_time_dependent_model_rejected() {
        let model = birth_death(1.0, 1.0)
            .with_time_dependency(vec![0], |t| t)
            .unwrap();
        assert!(GillespieSampler::new(model, SimulationConfig::default()).is_err());
    }

    #[test]
    fn test_sampling_is_reproducible() {
        let model = birth_death(2.0, 1.0);
        let config = SimulationConfig::default();
        let a = sample_final_states(&model, &config, &State::from([0]), 200, 42).unwrap();
        let b = sample_final_states(&model, &config, &State::from([0]), 200, 42).unwrap();
        assert_eq!(a, b);
        assert!((a.total_mass() - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_agrees_with_fsp() {
        let model = birth_death(2.0, 1.0);
        let config = SimulationConfig {
            t_final: 1.0,
            ..Default::default()
        };
        let empirical =
            sample_final_states(&model, &config, &State::from([0]), 4000, 2024).unwrap();

        let expander = NeighbourhoodExpander::from_model(&model, 1);
        let integrator = Rk45Integrator::new(IntegratorConfig::default()).unwrap();
        let setup = FspConfig {
            domain: Some(from_rect(&[4])),
            ..Default::default()
        };
        let mut solver = FspSolver::new(model, setup, integrator, expander).unwrap();
        solver.advance(1.0, 1e-6).unwrap();
        let exact = solver.current_distribution();

        for k in 0..5 {
            let state = State::from([k]);
            let diff = (empirical.get(&state) - exact.get(&state)).abs();
            assert!(diff < 0.03, "P({k}): ssa {} fsp {}", empirical.get(&state), exact.get(&state));
        }
    }

    #[test]
    fn test_config_from_json() {
        let config: SimulationConfig = serde_json::from_str(r#"{ "t_final": 2.5 }"#).unwrap();
        assert_eq!(config.t_final, 2.5);
        assert_eq!(config.max_events, SimulationConfig::default().max_events);
    }
}
