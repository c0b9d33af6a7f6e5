//! Per-reaction flux matrices over a truncated domain.
//!
//! For a domain of `N` states and error accumulators of sizes `E_1..E_m`, each
//! reaction contributes a square sparse matrix of size `N + Σ E_j`. Columns
//! are source states. Rows `0..N` are domain states; the remaining rows are
//! accumulator slots, laid out accumulator by accumulator.
//!
//! Routing of a transition `s -> d = s + offset` at rate `r`:
//! - `d` in domain: `-r` at `(s, s)`, `+r` at `(d, s)`
//! - `d` outside the domain but valid: `-r` at `(s, s)`, and `+r` into the
//!   slot of `projection(d)` in every configured accumulator
//! - `d` invalid: no entry (the transition cannot happen)

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{FspError, Result};
use crate::index_map::StateIndexMap;
use crate::model::Model;
use crate::sparse::CsrMatrix;
use crate::state::State;

/// Projection of an out-of-domain destination onto an accumulator's space.
pub type Projection = Arc<dyn Fn(&State) -> State + Send + Sync>;

/// Error accumulator: collects probability flowing out of the domain,
/// indexed by the projection of the destination state.
#[derive(Clone)]
pub struct ErrorTracker {
    projection: Projection,
    map: Arc<StateIndexMap>,
    /// Smallest state dimension the projection can read.
    source_dim: usize,
}

impl ErrorTracker {
    pub fn new<F>(projection: F, map: StateIndexMap) -> Self
    where
        F: Fn(&State) -> State + Send + Sync + 'static,
    {
        Self {
            projection: Arc::new(projection),
            map: Arc::new(map),
            source_dim: 0,
        }
    }

    /// Scalar sink: a single slot receiving all lost probability.
    pub fn sink() -> Self {
        Self::new(|_| State::empty(), StateIndexMap::singleton(State::empty()))
    }

    /// Marginal accumulator over `axes`, covering the box `[0, shape)`.
    pub fn marginal(axes: Vec<usize>, shape: &[i64]) -> Result<Self> {
        if axes.len() != shape.len() {
            return Err(FspError::DimensionMismatch(format!(
                "{} projection axes for a {}-dimensional accumulator",
                axes.len(),
                shape.len()
            )));
        }
        let map = StateIndexMap::new(crate::domain::from_rect(shape))?;
        let source_dim = axes.iter().max().map_or(0, |&axis| axis + 1);
        let mut tracker = Self::new(move |s| s.project(&axes), map);
        tracker.source_dim = source_dim;
        Ok(tracker)
    }

    /// Number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn map(&self) -> &StateIndexMap {
        &self.map
    }

    /// Smallest model dimension this tracker can project from.
    pub fn source_dim(&self) -> usize {
        self.source_dim
    }

    /// Slot index receiving flux into `destination`.
    fn slot_of(&self, destination: &State) -> Result<usize> {
        let projected = (self.projection)(destination);
        self.map.get_index(&projected).ok_or_else(|| {
            FspError::DimensionMismatch(format!(
                "destination {} projects to {}, outside an accumulator of {} slots",
                destination,
                projected,
                self.len()
            ))
        })
    }
}

impl fmt::Debug for ErrorTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorTracker")
            .field("slots", &self.len())
            .finish_non_exhaustive()
    }
}

/// Flux matrix of one reaction.
#[derive(Clone, Debug)]
pub struct ReactionFlux {
    /// Index of the reaction in the model.
    pub reaction: usize,
    pub matrix: CsrMatrix,
}

/// Builds flux matrices for one domain and accumulator configuration.
pub struct FluxBuilder<'a> {
    domain: &'a StateIndexMap,
    trackers: &'a [ErrorTracker],
}

impl<'a> FluxBuilder<'a> {
    pub fn new(domain: &'a StateIndexMap, trackers: &'a [ErrorTracker]) -> Self {
        Self { domain, trackers }
    }

    /// Dimension of every matrix: domain states plus accumulator slots.
    pub fn size(&self) -> usize {
        self.domain.len() + self.trackers.iter().map(ErrorTracker::len).sum::<usize>()
    }

    /// Build the flux matrices of every reaction of `model`.
    ///
    /// Reactions contributing no entries on this domain are skipped.
    ///
    /// # Errors
    /// `DimensionMismatch` if the domain dimension differs from the model's,
    /// an accumulator reads an axis the model lacks, or a destination projects
    /// outside its accumulator.
    pub fn build(&self, model: &Model) -> Result<Vec<ReactionFlux>> {
        if !self.domain.is_empty() && self.domain.dim() != model.dim() {
            return Err(FspError::DimensionMismatch(format!(
                "domain states have dimension {}, model has {}",
                self.domain.dim(),
                model.dim()
            )));
        }
        if let Some((j, tracker)) = self
            .trackers
            .iter()
            .enumerate()
            .find(|(_, tracker)| tracker.source_dim() > model.dim())
        {
            return Err(FspError::DimensionMismatch(format!(
                "accumulator {} projects from axis {}, model has dimension {}",
                j,
                tracker.source_dim() - 1,
                model.dim()
            )));
        }

        let mut fluxes = Vec::with_capacity(model.reactions().len());
        for k in 0..model.reactions().len() {
            let triplets = self.reaction_triplets(model, k)?;
            if triplets.is_empty() {
                continue;
            }
            let matrix = CsrMatrix::from_triplets(self.size(), triplets);
            if matrix.nnz() == 0 {
                continue;
            }
            fluxes.push(ReactionFlux { reaction: k, matrix });
        }

        debug!(
            domain_states = self.domain.len(),
            size = self.size(),
            reactions = model.reactions().len(),
            matrices = fluxes.len(),
            nnz = fluxes.iter().map(|f| f.matrix.nnz()).sum::<usize>(),
            "built flux matrices"
        );
        Ok(fluxes)
    }

    fn reaction_triplets(&self, model: &Model, k: usize) -> Result<Vec<(usize, usize, f64)>> {
        let reaction = &model.reactions()[k];
        let n = self.domain.len();
        let mut triplets = Vec::new();

        let destinations: Vec<State> = self
            .domain
            .states()
            .iter()
            .map(|state| state.offset(&reaction.offset))
            .collect();
        let inside = self.domain.contains_all(&destinations);

        let (internal, external): (Vec<usize>, Vec<usize>) =
            (0..n).partition(|&source| inside[source]);

        let internal_destinations: Vec<State> = internal
            .iter()
            .map(|&source| destinations[source].clone())
            .collect();
        let targets = self.domain.indices_of(&internal_destinations)?;
        for (&source, target) in internal.iter().zip(targets) {
            let rate = reaction.rate(self.domain.state_of(source));
            triplets.push((source, source, -rate));
            triplets.push((target, source, rate));
        }

        for source in external {
            let destination = &destinations[source];
            if !model.is_valid(destination) {
                continue;
            }
            let rate = reaction.rate(self.domain.state_of(source));
            triplets.push((source, source, -rate));
            let mut base = n;
            for tracker in self.trackers {
                let slot = tracker.slot_of(destination)?;
                triplets.push((base + slot, source, rate));
                base += tracker.len();
            }
        }
        Ok(triplets)
    }
}
