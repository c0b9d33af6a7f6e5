//! Adaptive finite state projection (FSP) for the Chemical Master Equation.
//!
//! The state space of a reaction network is truncated to a finite domain.
//! Probability flowing out of the domain is collected in a sink accumulator,
//! and its mass bounds the truncation error. [`FspSolver`] advances the
//! truncated system in time and enlarges the domain whenever a step would
//! overspend the caller's error budget.
//!
//! Building blocks:
//! - [`State`], [`StateIndexMap`]: lattice points and the domain bijection
//! - [`Model`], [`Reaction`]: propensities, offsets, time dependence
//! - [`FluxBuilder`], [`ErrorTracker`]: per-reaction sparse flux matrices
//! - [`Rhs`], [`Integrator`], [`Rk45Integrator`]: time stepping with restore
//! - [`DomainExpander`]: strategies for growing the domain
//! - [`compress`]: minimal-support approximation of a distribution
//! - [`sample_final_states`]: parallel Gillespie cross-check

pub mod distribution;
pub mod domain;
pub mod error;
pub mod expand;
pub mod flux;
pub mod fsp;
pub mod index_map;
pub mod integrator;
pub mod model;
pub mod rhs;
pub mod sparse;
pub mod ssa;
pub mod state;

pub use distribution::{compress, Distribution};
pub use error::{FspError, Result};
pub use expand::{BoundedExpander, DomainExpander, NeighbourhoodExpander};
pub use flux::{ErrorTracker, FluxBuilder, ReactionFlux};
pub use fsp::{FspConfig, FspSolver, SolverStats};
pub use index_map::StateIndexMap;
pub use integrator::{Integrator, IntegratorConfig, Rk45Integrator};
pub use model::{Model, Reaction};
pub use rhs::{Packing, Rhs};
pub use sparse::CsrMatrix;
pub use ssa::{sample_final_states, GillespieSampler, SimulationConfig};
pub use state::State;
