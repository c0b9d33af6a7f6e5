//! Adaptive finite state projection solver.
//!
//! [`FspSolver`] advances a truncated CME under an error budget:
//!
//! - **Stepping**: integrate to the target time and read the sink mass.
//! - **Settled**: the sink mass is within `restore_point_error + epsilon`;
//!   the step is committed as the new restore point.
//! - **Expanding**: otherwise the expansion strategy proposes a larger
//!   domain, the restore-point vector is remapped onto it by state identity,
//!   the integrator is rolled back, and the step is retried.
//!
//! The retry loop has no iteration cap; bounded work is the strategy's job
//! (see [`crate::expand::BoundedExpander`]).

use std::sync::Arc;

use ndarray::{s, Array1, ArrayView1};
use tracing::{debug, info, warn};

use crate::distribution::Distribution;
use crate::error::{FspError, Result};
use crate::expand::DomainExpander;
use crate::flux::{ErrorTracker, FluxBuilder};
use crate::index_map::StateIndexMap;
use crate::integrator::Integrator;
use crate::model::Model;
use crate::rhs::{Packing, Rhs};
use crate::state::State;

/// Setup of a solve session.
#[derive(Clone, Debug, Default)]
pub struct FspConfig {
    /// Initial domain. Defaults to the model's rectangular shape.
    pub domain: Option<Vec<State>>,
    /// Initial distribution. Defaults to a point mass at the model's
    /// initial state.
    pub p0: Option<Distribution>,
    /// Accumulators tracked in addition to the primary sink.
    pub error_trackers: Vec<ErrorTracker>,
    /// Initial time.
    pub t0: f64,
}

/// Counters over the lifetime of a solver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SolverStats {
    /// Calls to the integrator's `step`.
    pub steps: usize,
    /// Accepted domain expansions.
    pub expansions: usize,
}

/// Last accepted solution, the rollback target of an expansion.
#[derive(Clone, Debug)]
struct RestorePoint {
    domain: Arc<StateIndexMap>,
    y: Array1<f64>,
    t: f64,
    /// Sink mass committed at this point.
    error: f64,
}

/// CME solver that grows its domain to keep truncation error in budget.
pub struct FspSolver<I, E> {
    model: Model,
    trackers: Vec<ErrorTracker>,
    domain: Arc<StateIndexMap>,
    packing: Packing,
    integrator: I,
    expander: E,
    restore: RestorePoint,
    stats: SolverStats,
}

impl<I: Integrator, E: DomainExpander> FspSolver<I, E> {
    /// Set up a solve session and install the initial operator in
    /// `integrator`.
    ///
    /// # Errors
    /// `InvalidModel` if no domain or initial distribution can be derived,
    /// `DuplicateState` for a repeated domain state, `NotInDomain` if the
    /// initial distribution has support outside the domain, and any flux
    /// building error.
    pub fn new(model: Model, config: FspConfig, mut integrator: I, expander: E) -> Result<Self> {
        let states = match config.domain {
            Some(states) => states,
            None => model.default_domain()?,
        };
        let domain = Arc::new(StateIndexMap::new(states)?);

        let p0 = match config.p0 {
            Some(p0) => p0,
            None => match model.initial_state() {
                Some(state) => Distribution::point(state.clone()),
                None => {
                    return Err(FspError::InvalidModel(
                        "no initial distribution given and model has no initial state"
                            .to_string(),
                    ))
                }
            },
        };
        if let Some((state, p)) = p0.iter().find(|(_, p)| !p.is_finite() || *p < 0.0) {
            return Err(FspError::InvalidModel(format!(
                "initial probability {p} at state {state} is not a finite non-negative number"
            )));
        }
        let p_dense = domain.pack(&p0)?;

        let mut trackers = Vec::with_capacity(config.error_trackers.len() + 1);
        trackers.push(ErrorTracker::sink());
        trackers.extend(config.error_trackers);

        let packing = packing_for(&domain, &trackers);
        let accumulators: Vec<Array1<f64>> =
            trackers.iter().map(|t| Array1::zeros(t.len())).collect();
        let y0 = packing.pack(p_dense.view(), &accumulators);

        let rhs = assemble(&model, &domain, &trackers)?;
        integrator.reset(rhs, y0.clone(), config.t0);

        debug!(
            domain_states = domain.len(),
            accumulators = trackers.len(),
            t0 = config.t0,
            "fsp solver initialised"
        );

        Ok(Self {
            model,
            trackers,
            restore: RestorePoint {
                domain: domain.clone(),
                y: y0,
                t: config.t0,
                error: 0.0,
            },
            domain,
            packing,
            integrator,
            expander,
            stats: SolverStats::default(),
        })
    }

    /// Advance the solution to `target_time`, spending at most `epsilon`
    /// additional truncation error, expanding the domain as often as needed.
    ///
    /// # Errors
    /// `InvalidEpsilon` for a negative or non-finite budget,
    /// `ExpansionFailure` if the strategy does not strictly grow the domain,
    /// and integrator or flux-building errors. On error the solver is left at
    /// the last restore point.
    pub fn advance(&mut self, target_time: f64, epsilon: f64) -> Result<()> {
        if !epsilon.is_finite() || epsilon < 0.0 {
            return Err(FspError::InvalidEpsilon {
                epsilon,
                range: "[0, inf)",
            });
        }
        let budget = self.restore.error + epsilon;

        loop {
            let stepped = self.integrator.step(target_time);
            self.stats.steps += 1;
            if let Err(err) = stepped {
                self.rollback()?;
                return Err(err);
            }

            let y = self.integrator.solution();
            let sink = self.packing.sink_mass(y.view());

            if sink <= budget {
                self.integrator.set_restore_point();
                self.restore = RestorePoint {
                    domain: self.domain.clone(),
                    y,
                    t: target_time,
                    error: sink,
                };
                debug!(
                    t = target_time,
                    sink,
                    budget,
                    domain_states = self.domain.len(),
                    "step accepted"
                );
                return Ok(());
            }

            if let Err(err) = self.expand(y.view(), sink, target_time) {
                self.rollback()?;
                return Err(err);
            }
        }
    }

    /// Return the integrator to the restore point on the current domain.
    fn rollback(&mut self) -> Result<()> {
        let rhs = assemble(&self.model, &self.domain, &self.trackers)?;
        self.integrator.restore(rhs, self.restore.y.clone());
        debug!(
            t = self.restore.t,
            domain_states = self.domain.len(),
            "rolled back to restore point"
        );
        Ok(())
    }

    /// Grow the domain and roll the integrator back to the restore point.
    fn expand(&mut self, y: ArrayView1<f64>, sink: f64, t: f64) -> Result<()> {
        let p = self.packing.states(y);
        let states = self.expander.expand(&self.domain, p, sink, t)?;

        if states.len() <= self.domain.len() {
            warn!(
                current = self.domain.len(),
                proposed = states.len(),
                sink,
                t,
                "expansion did not grow the domain"
            );
            return Err(FspError::ExpansionFailure(format!(
                "expansion did not increase size of domain ({} -> {} states)",
                self.domain.len(),
                states.len()
            )));
        }

        let expanded = Arc::new(StateIndexMap::new(states)?);
        let packing = packing_for(&expanded, &self.trackers);
        let y0 = remap(
            &self.restore.domain,
            &expanded,
            self.restore.y.view(),
            &packing,
        )?;
        let rhs = assemble(&self.model, &expanded, &self.trackers)?;

        info!(
            from = self.domain.len(),
            to = expanded.len(),
            sink,
            t,
            restore_t = self.restore.t,
            "expanded domain"
        );

        self.integrator.restore(rhs, y0.clone());
        self.restore.domain = expanded.clone();
        self.restore.y = y0;
        self.domain = expanded;
        self.packing = packing;
        self.stats.expansions += 1;
        Ok(())
    }

    /// Copy of the current domain probabilities and the sink mass.
    pub fn current_solution(&self) -> (Array1<f64>, f64) {
        let y = self.integrator.solution();
        let sink = self.packing.sink_mass(y.view());
        (self.packing.states(y.view()).to_owned(), sink)
    }

    /// Current solution as a sparse distribution over domain states.
    pub fn current_distribution(&self) -> Distribution {
        let y = self.integrator.solution();
        self.domain.unpack(self.packing.states(y.view()))
    }

    /// Current contents of every accumulator, primary sink first.
    pub fn accumulators(&self) -> Vec<Array1<f64>> {
        self.packing.unpack(self.integrator.solution().view()).1
    }

    pub fn current_time(&self) -> f64 {
        self.integrator.time()
    }

    /// Current domain.
    pub fn domain(&self) -> Arc<StateIndexMap> {
        self.domain.clone()
    }

    /// Truncation error committed at the last restore point.
    pub fn restore_point_error(&self) -> f64 {
        self.restore.error
    }

    pub fn stats(&self) -> SolverStats {
        self.stats
    }
}

fn packing_for(domain: &StateIndexMap, trackers: &[ErrorTracker]) -> Packing {
    Packing::new(domain.len(), trackers.iter().map(ErrorTracker::len).collect())
}

/// Flux matrices and RHS for one domain.
fn assemble(model: &Model, domain: &StateIndexMap, trackers: &[ErrorTracker]) -> Result<Rhs> {
    let builder = FluxBuilder::new(domain, trackers);
    let fluxes = builder.build(model)?;
    Ok(Rhs::new(builder.size(), fluxes, model))
}

/// Re-express a packed vector over `from` as a packed vector over `to`.
///
/// Domain entries move by state identity; accumulator entries are copied
/// as they are. Every state of `from` must be present in `to`.
fn remap(
    from: &StateIndexMap,
    to: &StateIndexMap,
    y: ArrayView1<f64>,
    packing: &Packing,
) -> Result<Array1<f64>> {
    let mut remapped = Array1::zeros(packing.size());
    for (i, state) in from.iter() {
        let j = to.get_index(state).ok_or_else(|| {
            FspError::ExpansionFailure(format!("expanded domain dropped state {state}"))
        })?;
        remapped[j] = y[i];
    }
    remapped
        .slice_mut(s![to.len()..])
        .assign(&y.slice(s![from.len()..]));
    Ok(remapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::from_rect;
    use crate::expand::{BoundedExpander, NeighbourhoodExpander};
    use crate::integrator::{IntegratorConfig, Rk45Integrator};
    use crate::model::Reaction;
    use ndarray::array;

    fn birth(rate: f64) -> Model {
        Model::new(1, vec![Reaction::new("birth", [1], move |_: &State| rate)])
            .unwrap()
            .with_initial_state([0])
            .unwrap()
    }

    fn birth_solver(
        domain: i64,
    ) -> FspSolver<Rk45Integrator, NeighbourhoodExpander> {
        let model = birth(1.0);
        let expander = NeighbourhoodExpander::from_model(&model, 1);
        let config = FspConfig {
            domain: Some(from_rect(&[domain])),
            ..Default::default()
        };
        let integrator = Rk45Integrator::new(IntegratorConfig::default()).unwrap();
        FspSolver::new(model, config, integrator, expander).unwrap()
    }

    fn poisson(k: usize, t: f64) -> f64 {
        let mut term = (-t).exp();
        for i in 1..=k {
            term *= t / i as f64;
        }
        term
    }

    /// Hands back a fixed state list regardless of input.
    struct FixedExpander(Vec<State>);

    impl DomainExpander for FixedExpander {
        fn expand(
            &mut self,
            _domain: &StateIndexMap,
            _p: ArrayView1<f64>,
            _sink_mass: f64,
            _t: f64,
        ) -> Result<Vec<State>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_generous_budget_accepts_without_expansion() {
        let mut solver = birth_solver(3);
        solver.advance(0.1, 0.5).unwrap();

        assert_eq!(solver.stats(), SolverStats { steps: 1, expansions: 0 });
        assert_eq!(solver.current_time(), 0.1);
        let (p, sink) = solver.current_solution();
        assert_eq!(p.len(), 3);
        assert!(p[0] <= 1.0);
        assert!((p[0] - (-0.1f64).exp()).abs() < 1e-8);
        assert!(sink >= 0.0);
        assert!((p.sum() + sink - 1.0).abs() < 1e-9);
        assert_eq!(solver.restore_point_error(), sink);
    }

    #[test]
    fn test_tight_budget_expands_until_within_budget() {
        let mut solver = birth_solver(3);
        solver.advance(0.1, 0.5).unwrap();
        let committed = solver.restore_point_error();

        solver.advance(1.0, 1e-9).unwrap();
        let stats = solver.stats();
        assert!(stats.expansions >= 1);
        assert_eq!(stats.steps, 1 + 1 + stats.expansions);

        let (p, sink) = solver.current_solution();
        assert!(sink <= committed + 1e-9);
        assert_eq!(p.len(), solver.domain().len());
        assert!(solver.domain().len() > 3);
        assert!((p.sum() + sink - 1.0).abs() < 1e-9);
        assert_eq!(solver.current_time(), 1.0);
    }

    #[test]
    fn test_expanded_solution_matches_poisson() {
        let mut solver = birth_solver(3);
        solver.advance(2.0, 1e-8).unwrap();
        let domain = solver.domain();
        let p = solver.current_distribution();
        for k in 0..6 {
            let state = State::from([k as i64]);
            assert!(domain.contains(&state));
            assert!(
                (p.get(&state) - poisson(k, 2.0)).abs() < 1e-7,
                "P({k}) = {} vs {}",
                p.get(&state),
                poisson(k, 2.0)
            );
        }
    }

    #[test]
    fn test_budgets_compose_across_calls() {
        let mut solver = birth_solver(4);
        solver.advance(0.5, 0.1).unwrap();
        let first = solver.restore_point_error();
        solver.advance(1.0, 0.1).unwrap();
        assert!(solver.restore_point_error() <= first + 0.1);
        assert!(solver.restore_point_error() >= first);
    }

    #[test]
    fn test_expansion_must_grow() {
        let model = birth(1.0);
        let config = FspConfig {
            domain: Some(from_rect(&[2])),
            ..Default::default()
        };
        let integrator = Rk45Integrator::new(IntegratorConfig::default()).unwrap();
        let mut solver =
            FspSolver::new(model, config, integrator, FixedExpander(from_rect(&[2]))).unwrap();
        let err = solver.advance(5.0, 1e-6).unwrap_err();
        assert!(matches!(err, FspError::ExpansionFailure(_)));
    }

    #[test]
    fn test_expansion_must_keep_states() {
        let model = birth(1.0);
        let config = FspConfig {
            domain: Some(from_rect(&[2])),
            ..Default::default()
        };
        let integrator = Rk45Integrator::new(IntegratorConfig::default()).unwrap();
        let shifted: Vec<State> = (1..5).map(|x| State::from([x])).collect();
        let mut solver = FspSolver::new(model, config, integrator, FixedExpander(shifted)).unwrap();
        let err = solver.advance(5.0, 1e-6).unwrap_err();
        assert!(matches!(err, FspError::ExpansionFailure(_)));
    }

    #[test]
    fn test_bounded_strategy_turns_runaway_into_failure() {
        let model = birth(1.0);
        let expander = BoundedExpander::new(NeighbourhoodExpander::from_model(&model, 1), 6);
        let config = FspConfig {
            domain: Some(from_rect(&[2])),
            ..Default::default()
        };
        let integrator = Rk45Integrator::new(IntegratorConfig::default()).unwrap();
        let mut solver = FspSolver::new(model, config, integrator, expander).unwrap();
        let err = solver.advance(10.0, 1e-12).unwrap_err();
        assert!(matches!(err, FspError::ExpansionFailure(_)));
        assert_eq!(solver.domain().len(), 6);
    }

    #[test]
    fn test_failed_advance_leaves_restore_point() {
        let model = birth(1.0);
        let expander = BoundedExpander::new(NeighbourhoodExpander::from_model(&model, 1), 3);
        let config = FspConfig {
            domain: Some(from_rect(&[3])),
            ..Default::default()
        };
        let integrator = Rk45Integrator::new(IntegratorConfig::default()).unwrap();
        let mut solver = FspSolver::new(model, config, integrator, expander).unwrap();
        solver.advance(0.1, 0.5).unwrap();
        let committed = solver.current_solution();
        let error = solver.restore_point_error();

        let err = solver.advance(5.0, 1e-9).unwrap_err();
        assert!(matches!(err, FspError::ExpansionFailure(_)));
        assert_eq!(solver.current_time(), 0.1);
        let (p, sink) = solver.current_solution();
        assert_eq!(sink, error);
        assert_eq!((p, sink), committed);

        // The solver stays usable from the restore point.
        solver.advance(0.2, 0.5).unwrap();
        assert_eq!(solver.current_time(), 0.2);
    }

    #[test]
    fn test_failed_step_leaves_restore_point() {
        let model = birth(1.0);
        let expander = NeighbourhoodExpander::from_model(&model, 1);
        let config = FspConfig {
            domain: Some(from_rect(&[3])),
            ..Default::default()
        };
        let integrator = Rk45Integrator::new(IntegratorConfig {
            max_steps: 3,
            h0: 1e-3,
            h_max: 1e-3,
            ..Default::default()
        })
        .unwrap();
        let mut solver = FspSolver::new(model, config, integrator, expander).unwrap();
        assert!(matches!(
            solver.advance(1.0, 0.5),
            Err(FspError::Integration(_))
        ));
        assert_eq!(solver.current_time(), 0.0);
        assert_eq!(solver.current_solution().1, 0.0);
    }

    #[test]
    fn test_remap_preserves_mass_by_state_identity() {
        let from = StateIndexMap::new(vec![State::from([0]), State::from([1]), State::from([2])])
            .unwrap();
        let to = StateIndexMap::new(vec![
            State::from([3]),
            State::from([2]),
            State::from([0]),
            State::from([1]),
        ])
        .unwrap();
        let packing = Packing::new(to.len(), vec![1]);
        let y = array![0.5, 0.2, 0.1, 0.2];
        let remapped = remap(&from, &to, y.view(), &packing).unwrap();
        assert_eq!(remapped, array![0.0, 0.1, 0.5, 0.2, 0.2]);
        assert!((remapped.sum() - y.sum()).abs() < 1e-15);
    }

    #[test]
    fn test_invalid_epsilon() {
        let mut solver = birth_solver(3);
        assert!(matches!(
            solver.advance(1.0, -1.0),
            Err(FspError::InvalidEpsilon { .. })
        ));
        assert!(solver.advance(1.0, f64::NAN).is_err());
        assert_eq!(solver.stats().steps, 0);
    }

    #[test]
    fn test_initial_distribution_outside_domain() {
        let model = birth(1.0);
        let config = FspConfig {
            domain: Some(from_rect(&[2])),
            p0: Some(Distribution::point(State::from([5]))),
            ..Default::default()
        };
        let integrator = Rk45Integrator::new(IntegratorConfig::default()).unwrap();
        let expander = NeighbourhoodExpander::from_model(&model, 1);
        let err = FspSolver::new(model, config, integrator, expander).err().unwrap();
        assert!(matches!(err, FspError::NotInDomain { .. }));
    }

    #[test]
    fn test_default_domain_requires_shape() {
        let model = birth(1.0);
        let integrator = Rk45Integrator::new(IntegratorConfig::default()).unwrap();
        let expander = NeighbourhoodExpander::from_model(&model, 1);
        let err = FspSolver::new(model, FspConfig::default(), integrator, expander)
            .err()
            .unwrap();
        assert!(matches!(err, FspError::InvalidModel(_)));
    }

    #[test]
    fn test_extra_tracker_records_lost_marginal() {
        // Two independent birth axes; the extra accumulator keeps the first
        // coordinate of every escaping transition.
        let model = Model::new(
            2,
            vec![
                Reaction::new("a", [1, 0], |_: &State| 1.0),
                Reaction::new("b", [0, 1], |_: &State| 0.5),
            ],
        )
        .unwrap()
        .with_shape(vec![3, 3])
        .unwrap()
        .with_initial_state([0, 0])
        .unwrap();
        let config = FspConfig {
            error_trackers: vec![ErrorTracker::marginal(vec![0], &[4]).unwrap()],
            ..Default::default()
        };
        let integrator = Rk45Integrator::new(IntegratorConfig::default()).unwrap();
        let expander = NeighbourhoodExpander::from_model(&model, 1);
        let mut solver = FspSolver::new(model, config, integrator, expander).unwrap();
        solver.advance(0.5, 1.0).unwrap();

        let (_, sink) = solver.current_solution();
        let accumulators = solver.accumulators();
        assert_eq!(accumulators.len(), 2);
        assert!((accumulators[0][0] - sink).abs() < 1e-15);
        // Each accumulator receives every escaping transition.
        assert!((accumulators[1].sum() - sink).abs() < 1e-9);
        assert!((solver.current_distribution().total_mass() + sink - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_extra_tracker_survives_expansion() {
        let model = Model::new(
            2,
            vec![
                Reaction::new("a", [1, 0], |_: &State| 1.0),
                Reaction::new("b", [0, 1], |_: &State| 0.5),
            ],
        )
        .unwrap()
        .with_shape(vec![3, 3])
        .unwrap()
        .with_initial_state([0, 0])
        .unwrap();
        let config = FspConfig {
            error_trackers: vec![ErrorTracker::marginal(vec![0], &[40]).unwrap()],
            ..Default::default()
        };
        let integrator = Rk45Integrator::new(IntegratorConfig::default()).unwrap();
        let expander = NeighbourhoodExpander::from_model(&model, 1);
        let mut solver = FspSolver::new(model, config, integrator, expander).unwrap();

        solver.advance(0.2, 1.0).unwrap();
        let before = solver.accumulators();
        assert!(before[1].sum() > 0.0);

        solver.advance(1.0, 1e-6).unwrap();
        assert!(solver.stats().expansions >= 1);

        let (p, sink) = solver.current_solution();
        let accumulators = solver.accumulators();
        assert_eq!(accumulators[1].len(), 40);
        assert!((accumulators[0][0] - sink).abs() < 1e-15);
        assert!((accumulators[1].sum() - sink).abs() < 1e-9);
        // Mass lost before the expansion is carried over slot by slot.
        for (slot, &lost) in before[1].iter().enumerate() {
            assert!(accumulators[1][slot] >= lost - 1e-12, "slot {slot}");
        }
        assert!(sink <= before[0][0] + 1e-6);
        assert!((p.sum() + sink - 1.0).abs() < 1e-9);
    }
}
