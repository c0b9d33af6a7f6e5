//! Right-hand side of the truncated CME: `dp/dt = A(t)·p`.

use std::sync::Arc;

use ndarray::{Array1, ArrayView1, ArrayViewMut1};

use crate::flux::ReactionFlux;
use crate::model::{Coefficient, Model};

/// Linear operator `A(t) = Σ_k φ_k(t)·M_k` over one domain.
///
/// Cloning shares the matrices. A new `Rhs` is assembled whenever the
/// domain changes; it is never patched in place.
#[derive(Clone)]
pub struct Rhs {
    size: usize,
    terms: Arc<[(ReactionFlux, Option<Coefficient>)]>,
}

impl Rhs {
    /// Pair each reaction's matrix with its time-dependent coefficient.
    pub fn new(size: usize, fluxes: Vec<ReactionFlux>, model: &Model) -> Self {
        let terms: Vec<(ReactionFlux, Option<Coefficient>)> = fluxes
            .into_iter()
            .map(|flux| {
                debug_assert_eq!(flux.matrix.size(), size);
                let phi = model.coefficient_for(flux.reaction);
                (flux, phi)
            })
            .collect();
        Self {
            size,
            terms: terms.into(),
        }
    }

    /// Length of the vectors the operator acts on.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of reaction terms.
    pub fn n_terms(&self) -> usize {
        self.terms.len()
    }

    /// Write `A(t)·p` into `dp`.
    pub fn velocity_into(&self, t: f64, p: ArrayView1<f64>, mut dp: ArrayViewMut1<f64>) {
        dp.fill(0.0);
        for (flux, phi) in self.terms.iter() {
            let scale = phi.as_ref().map_or(1.0, |phi| phi(t));
            if scale != 0.0 {
                flux.matrix.mul_add(scale, p, dp.view_mut());
            }
        }
    }

    /// `A(t)·p` as a fresh vector.
    pub fn velocity(&self, t: f64, p: ArrayView1<f64>) -> Array1<f64> {
        let mut dp = Array1::zeros(self.size);
        self.velocity_into(t, p, dp.view_mut());
        dp
    }
}

/// Layout of the flat integrator vector:
/// `[domain states | accumulator 0 | accumulator 1 | ...]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packing {
    n_states: usize,
    accumulator_sizes: Vec<usize>,
}

impl Packing {
    pub fn new(n_states: usize, accumulator_sizes: Vec<usize>) -> Self {
        Self {
            n_states,
            accumulator_sizes,
        }
    }

    pub fn n_states(&self) -> usize {
        self.n_states
    }

    /// Total vector length.
    pub fn size(&self) -> usize {
        self.n_states + self.accumulator_sizes.iter().sum::<usize>()
    }

    /// Concatenate domain probabilities and accumulator contents.
    pub fn pack(&self, p: ArrayView1<f64>, accumulators: &[Array1<f64>]) -> Array1<f64> {
        debug_assert_eq!(p.len(), self.n_states);
        debug_assert_eq!(accumulators.len(), self.accumulator_sizes.len());
        let mut y = Array1::zeros(self.size());
        y.slice_mut(ndarray::s![..self.n_states]).assign(&p);
        let mut base = self.n_states;
        for (acc, &len) in accumulators.iter().zip(self.accumulator_sizes.iter()) {
            y.slice_mut(ndarray::s![base..base + len]).assign(acc);
            base += len;
        }
        y
    }

    /// Split a flat vector into domain probabilities and accumulators.
    pub fn unpack(&self, y: ArrayView1<f64>) -> (Array1<f64>, Vec<Array1<f64>>) {
        debug_assert_eq!(y.len(), self.size());
        let p = y.slice(ndarray::s![..self.n_states]).to_owned();
        let mut base = self.n_states;
        let accumulators = self
            .accumulator_sizes
            .iter()
            .map(|&len| {
                let acc = y.slice(ndarray::s![base..base + len]).to_owned();
                base += len;
                acc
            })
            .collect();
        (p, accumulators)
    }

    /// Domain part of a flat vector.
    pub fn states<'a>(&self, y: ArrayView1<'a, f64>) -> ArrayView1<'a, f64> {
        y.slice_move(ndarray::s![..self.n_states])
    }

    /// Total mass held by accumulator 0 (the primary sink).
    pub fn sink_mass(&self, y: ArrayView1<f64>) -> f64 {
        match self.accumulator_sizes.first() {
            Some(&len) => y
                .slice(ndarray::s![self.n_states..self.n_states + len])
                .sum(),
            None => 0.0,
        }
    }
}
