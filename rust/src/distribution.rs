//! Sparse probability distributions and minimal-support compression.

use std::collections::HashMap;

use crate::error::{FspError, Result};
use crate::state::State;

/// Sparse probability distribution: state -> probability.
///
/// Used at the API boundary (initial conditions, solution read-out) and by
/// [`compress`]. Keys are unique; iteration order carries no meaning.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Distribution {
    probs: HashMap<State, f64>,
}

impl Distribution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point mass at one state.
    pub fn point(state: State) -> Self {
        let mut d = Self::new();
        d.insert(state, 1.0);
        d
    }

    /// Set the probability of a state, replacing any previous value.
    pub fn insert(&mut self, state: State, probability: f64) {
        self.probs.insert(state, probability);
    }

    /// Probability of a state (zero if absent).
    pub fn get(&self, state: &State) -> f64 {
        self.probs.get(state).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, state: &State) -> bool {
        self.probs.contains_key(state)
    }

    pub fn len(&self) -> usize {
        self.probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&State, f64)> {
        self.probs.iter().map(|(s, &p)| (s, p))
    }

    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.probs.keys()
    }

    /// Sum of all probabilities.
    pub fn total_mass(&self) -> f64 {
        self.probs.values().sum()
    }

    /// Image of the distribution under `f`, merging colliding keys by summation.
    ///
    /// Typical use is marginalisation, e.g. `d.map(|s| s.project(&[0]))`.
    pub fn map<F>(&self, f: F) -> Distribution
    where
        F: Fn(&State) -> State,
    {
        let mut mapped = Distribution::new();
        for (state, &p) in &self.probs {
            *mapped.probs.entry(f(state)).or_insert(0.0) += p;
        }
        mapped
    }

    /// Entries sorted by ascending probability, ties broken by state order.
    fn sorted_ascending(&self) -> Vec<(&State, f64)> {
        let mut entries: Vec<(&State, f64)> = self.iter().collect();
        entries.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        entries
    }
}

impl FromIterator<(State, f64)> for Distribution {
    fn from_iter<I: IntoIterator<Item = (State, f64)>>(iter: I) -> Self {
        Self {
            probs: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Distribution {
    type Item = (State, f64);
    type IntoIter = std::collections::hash_map::IntoIter<State, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.probs.into_iter()
    }
}

/// Compress a distribution to its smallest support within an L1 error budget.
///
/// Entries are visited in ascending order of probability while accumulating a
/// running sum; the prefix whose cumulative sum stays strictly below `epsilon`
/// is discarded and everything from the first entry reaching `epsilon` on is
/// kept. With `epsilon = 0` nothing is dropped.
///
/// # Errors
/// `InvalidEpsilon` unless `0 <= epsilon <= 1`.
pub fn compress(p: &Distribution, epsilon: f64) -> Result<Distribution> {
    if !(0.0..=1.0).contains(&epsilon) {
        return Err(FspError::InvalidEpsilon {
            epsilon,
            range: "[0, 1]",
        });
    }

    let mut cumulative = 0.0;
    let mut compressed = Distribution::new();
    for (state, probability) in p.sorted_ascending() {
        cumulative += probability;
        if cumulative >= epsilon {
            compressed.insert(state.clone(), probability);
        }
    }
    Ok(compressed)
}
