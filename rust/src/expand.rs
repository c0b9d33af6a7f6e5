//! Domain expansion strategies.
//!
//! The solver asks a [`DomainExpander`] for a larger domain whenever the
//! truncation error of a step exceeds its budget. The only contract is that
//! the returned state set strictly grows the current one; anything else makes
//! the solver fail with `ExpansionFailure`.

use std::collections::HashSet;
use std::sync::Arc;

use ndarray::ArrayView1;
use tracing::warn;

use crate::error::Result;
use crate::index_map::StateIndexMap;
use crate::model::{Model, Validity};
use crate::state::State;

/// Strategy deciding how to grow the domain.
pub trait DomainExpander {
    /// Propose a new domain given the current one, the (failed) solution `p`
    /// over it, the sink mass and the time the step was aimed at.
    fn expand(
        &mut self,
        domain: &StateIndexMap,
        p: ArrayView1<f64>,
        sink_mass: f64,
        t: f64,
    ) -> Result<Vec<State>>;
}

/// Adds every valid state reachable from the domain within `depth` reaction
/// firings.
#[derive(Clone)]
pub struct NeighbourhoodExpander {
    offsets: Vec<State>,
    validity: Validity,
    depth: usize,
}

impl NeighbourhoodExpander {
    pub fn new(offsets: Vec<State>, validity: Validity, depth: usize) -> Self {
        Self {
            offsets,
            validity,
            depth,
        }
    }

    /// Use the model's reaction offsets and validity predicate.
    pub fn from_model(model: &Model, depth: usize) -> Self {
        let offsets: Vec<State> = model.reactions().iter().map(|r| r.offset.clone()).collect();
        let model = model.clone();
        let validity: Validity = Arc::new(move |s: &State| model.is_valid(s));
        Self::new(offsets, validity, depth)
    }

    /// Current states first (in index order), then new states in discovery
    /// order, so results are reproducible.
    fn grow(&self, domain: &StateIndexMap) -> Vec<State> {
        let mut seen: HashSet<State> = domain.states().iter().cloned().collect();
        let mut states: Vec<State> = domain.states().to_vec();
        let mut frontier: Vec<State> = domain.states().to_vec();

        for _ in 0..self.depth {
            let mut next = Vec::new();
            for state in &frontier {
                for offset in &self.offsets {
                    let candidate = state.offset(offset);
                    if (self.validity)(&candidate) && seen.insert(candidate.clone()) {
                        next.push(candidate);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            states.extend(next.iter().cloned());
            frontier = next;
        }
        states
    }
}

impl DomainExpander for NeighbourhoodExpander {
    fn expand(
        &mut self,
        domain: &StateIndexMap,
        _p: ArrayView1<f64>,
        _sink_mass: f64,
        _t: f64,
    ) -> Result<Vec<State>> {
        Ok(self.grow(domain))
    }
}

/// Wraps a strategy and refuses to grow past `max_states`.
///
/// A refusal hands back the current domain unchanged, which the solver
/// reports as `ExpansionFailure`. This bounds the work of a single advance.
#[derive(Clone)]
pub struct BoundedExpander<E> {
    inner: E,
    max_states: usize,
}

impl<E: DomainExpander> BoundedExpander<E> {
    pub fn new(inner: E, max_states: usize) -> Self {
        Self { inner, max_states }
    }
}

impl<E: DomainExpander> DomainExpander for BoundedExpander<E> {
    fn expand(
        &mut self,
        domain: &StateIndexMap,
        p: ArrayView1<f64>,
        sink_mass: f64,
        t: f64,
    ) -> Result<Vec<State>> {
        let proposed = self.inner.expand(domain, p, sink_mass, t)?;
        if proposed.len() > self.max_states {
            warn!(
                proposed = proposed.len(),
                max_states = self.max_states,
                sink_mass,
                t,
                "refusing to grow domain past state budget"
            );
            return Ok(domain.states().to_vec());
        }
        Ok(proposed)
    }
}
