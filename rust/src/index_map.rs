//! Bijection between the states of a finite domain and a dense index range.

use std::collections::HashMap;

use ndarray::{Array1, ArrayView1};

use crate::distribution::Distribution;
use crate::error::{FspError, Result};
use crate::state::State;

/// Finite domain of states with a stable state <-> index bijection.
///
/// Index `i` is the position of the state in the collection the map was
/// built from. The map is immutable: domain expansion builds a new one.
#[derive(Clone, Debug)]
pub struct StateIndexMap {
    dim: usize,
    states: Vec<State>,
    index: HashMap<State, usize>,
}

impl StateIndexMap {
    /// Build a map over `states`, assigning indices in iteration order.
    ///
    /// # Errors
    /// `DuplicateState` if a state repeats, `InvalidModel` if dimensions differ.
    pub fn new(states: impl IntoIterator<Item = State>) -> Result<Self> {
        let states: Vec<State> = states.into_iter().collect();
        let dim = states.first().map(State::dim).unwrap_or(0);

        let mut index = HashMap::with_capacity(states.len());
        for (i, state) in states.iter().enumerate() {
            if state.dim() != dim {
                return Err(FspError::InvalidModel(format!(
                    "state {} has dimension {}, expected {}",
                    state,
                    state.dim(),
                    dim
                )));
            }
            if index.insert(state.clone(), i).is_some() {
                return Err(FspError::DuplicateState {
                    state: state.clone(),
                });
            }
        }

        Ok(Self { dim, states, index })
    }

    /// Map over a single state.
    pub fn singleton(state: State) -> Self {
        let dim = state.dim();
        let index = HashMap::from([(state.clone(), 0)]);
        Self {
            dim,
            states: vec![state],
            index,
        }
    }

    /// Number of states in the domain.
    #[inline]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Dimension shared by every state (0 for an empty domain).
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    /// `(index, state)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &State)> {
        self.states.iter().enumerate()
    }

    pub fn index_of(&self, state: &State) -> Result<usize> {
        self.index
            .get(state)
            .copied()
            .ok_or_else(|| FspError::NotInDomain {
                state: state.clone(),
            })
    }

    /// Non-failing lookup.
    #[inline]
    pub fn get_index(&self, state: &State) -> Option<usize> {
        self.index.get(state).copied()
    }

    /// # Panics
    /// If `index >= self.len()`.
    #[inline]
    pub fn state_of(&self, index: usize) -> &State {
        &self.states[index]
    }

    #[inline]
    pub fn contains(&self, state: &State) -> bool {
        self.index.contains_key(state)
    }

    /// Batched [`index_of`](Self::index_of); fails on the first missing state.
    pub fn indices_of(&self, states: &[State]) -> Result<Vec<usize>> {
        states.iter().map(|s| self.index_of(s)).collect()
    }

    /// Batched [`contains`](Self::contains), flags in input order.
    pub fn contains_all(&self, states: &[State]) -> Vec<bool> {
        states.iter().map(|s| self.contains(s)).collect()
    }

    /// Dense vector over the domain holding the probabilities of `p`.
    ///
    /// # Errors
    /// `NotInDomain` if the support of `p` is not a subset of the domain.
    pub fn pack(&self, p: &Distribution) -> Result<Array1<f64>> {
        let mut dense = Array1::zeros(self.len());
        for (state, probability) in p.iter() {
            dense[self.index_of(state)?] = probability;
        }
        Ok(dense)
    }

    /// Sparse distribution of the non-zero entries of a dense domain vector.
    pub fn unpack(&self, dense: ArrayView1<f64>) -> Distribution {
        debug_assert_eq!(dense.len(), self.len());
        dense
            .iter()
            .zip(self.states.iter())
            .filter(|(&p, _)| p != 0.0)
            .map(|(&p, state)| (state.clone(), p))
            .collect()
    }
}
