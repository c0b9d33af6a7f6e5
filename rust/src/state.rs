//! State vector representation.
//!
//! A state is one point of the reaction network's lattice: one integer
//! coordinate per species (or reaction-count axis).

use std::fmt;

/// Integer state vector of fixed dimension.
///
/// Key properties:
/// - Immutable (Clone only)
/// - Hashable (used as HashMap keys by the index map and distributions)
/// - Totally ordered (lexicographic), so sorts over states are deterministic
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct State(Box<[i64]>);

impl State {
    /// Create a state from its coordinates.
    pub fn new(coords: impl Into<Vec<i64>>) -> Self {
        Self(coords.into().into_boxed_slice())
    }

    /// The zero-dimensional state. Used as the single slot of a scalar sink.
    pub fn empty() -> Self {
        Self(Box::default())
    }

    /// Number of coordinates.
    #[inline]
    pub fn dim(&self) -> usize {
        self.0.len()
    }

    /// Coordinates as a slice.
    #[inline]
    pub fn coords(&self) -> &[i64] {
        &self.0
    }

    /// Coordinate along one axis.
    #[inline]
    pub fn get(&self, axis: usize) -> i64 {
        self.0[axis]
    }

    /// Create the state reached by adding `offset` component-wise.
    ///
    /// Both states must have the same dimension.
    pub fn offset(&self, offset: &State) -> Self {
        debug_assert_eq!(self.dim(), offset.dim());
        self.0
            .iter()
            .zip(offset.0.iter())
            .map(|(&x, &dx)| x + dx)
            .collect()
    }

    /// True if every coordinate is non-negative (a physical copy-number state).
    pub fn is_non_negative(&self) -> bool {
        self.0.iter().all(|&x| x >= 0)
    }

    /// Keep only the listed axes, in the given order.
    pub fn project(&self, axes: &[usize]) -> Self {
        axes.iter().map(|&axis| self.0[axis]).collect()
    }
}

impl From<Vec<i64>> for State {
    fn from(coords: Vec<i64>) -> Self {
        Self::new(coords)
    }
}

impl<const D: usize> From<[i64; D]> for State {
    fn from(coords: [i64; D]) -> Self {
        Self::new(coords.to_vec())
    }
}

impl FromIterator<i64> for State {
    fn from_iter<I: IntoIterator<Item = i64>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let coords: Vec<String> = self.0.iter().map(|x| x.to_string()).collect();
        write!(f, "({})", coords.join(", "))
    }
}
