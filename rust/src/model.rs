//! Reaction network model definition.
//!
//! A model is an ordered list of reactions over a fixed-dimension state
//! lattice, plus the policy deciding which lattice points are physical
//! states and optional time-dependent rate coefficients.

use std::fmt;
use std::sync::Arc;

use crate::domain;
use crate::error::{FspError, Result};
use crate::state::State;

/// Reaction propensity: state -> non-negative rate.
pub type Propensity = Arc<dyn Fn(&State) -> f64 + Send + Sync>;

/// Predicate deciding whether a lattice point is a physical state.
pub type Validity = Arc<dyn Fn(&State) -> bool + Send + Sync>;

/// Scalar time-dependent coefficient `φ(t)`.
pub type Coefficient = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// One reaction channel: propensity and stoichiometric offset.
#[derive(Clone)]
pub struct Reaction {
    pub name: String,
    pub propensity: Propensity,
    pub offset: State,
}

impl Reaction {
    pub fn new<F>(name: impl Into<String>, offset: impl Into<State>, propensity: F) -> Self
    where
        F: Fn(&State) -> f64 + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            propensity: Arc::new(propensity),
            offset: offset.into(),
        }
    }

    /// Rate of firing from `state`.
    #[inline]
    pub fn rate(&self, state: &State) -> f64 {
        (self.propensity)(state)
    }
}

impl fmt::Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction")
            .field("name", &self.name)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

/// A coefficient applied to a subset of reactions (by index).
#[derive(Clone)]
pub struct TimeDependency {
    pub reactions: Vec<usize>,
    pub coefficient: Coefficient,
}

/// Immutable model definition.
#[derive(Clone)]
pub struct Model {
    dim: usize,
    reactions: Vec<Reaction>,
    shape: Option<Vec<i64>>,
    initial_state: Option<State>,
    validity: Validity,
    time_dependencies: Vec<TimeDependency>,
}

impl Model {
    /// Create a model over `dim` axes. Lattice points with any negative
    /// coordinate are invalid by default.
    pub fn new(dim: usize, reactions: Vec<Reaction>) -> Result<Self> {
        for (k, reaction) in reactions.iter().enumerate() {
            if reaction.offset.dim() != dim {
                return Err(FspError::InvalidModel(format!(
                    "reaction {} ({}) has offset of dimension {}, expected {}",
                    k,
                    reaction.name,
                    reaction.offset.dim(),
                    dim
                )));
            }
        }
        Ok(Self {
            dim,
            reactions,
            shape: None,
            initial_state: None,
            validity: Arc::new(State::is_non_negative),
            time_dependencies: Vec::new(),
        })
    }

    /// Default rectangular domain `[0, shape)`.
    pub fn with_shape(mut self, shape: Vec<i64>) -> Result<Self> {
        if shape.len() != self.dim {
            return Err(FspError::InvalidModel(format!(
                "shape has {} axes, expected {}",
                shape.len(),
                self.dim
            )));
        }
        self.shape = Some(shape);
        Ok(self)
    }

    /// State carrying all initial probability when no distribution is given.
    pub fn with_initial_state(mut self, state: impl Into<State>) -> Result<Self> {
        let state = state.into();
        if state.dim() != self.dim {
            return Err(FspError::InvalidModel(format!(
                "initial state {} has dimension {}, expected {}",
                state,
                state.dim(),
                self.dim
            )));
        }
        self.initial_state = Some(state);
        Ok(self)
    }

    /// Replace the validity predicate for destination states.
    pub fn with_validity<F>(mut self, validity: F) -> Self
    where
        F: Fn(&State) -> bool + Send + Sync + 'static,
    {
        self.validity = Arc::new(validity);
        self
    }

    /// Multiply the propensities of `reactions` by `coefficient(t)`.
    pub fn with_time_dependency<F>(mut self, reactions: Vec<usize>, coefficient: F) -> Result<Self>
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        if let Some(&k) = reactions.iter().find(|&&k| k >= self.reactions.len()) {
            return Err(FspError::InvalidModel(format!(
                "time dependency refers to reaction {} of {}",
                k,
                self.reactions.len()
            )));
        }
        self.time_dependencies.push(TimeDependency {
            reactions,
            coefficient: Arc::new(coefficient),
        });
        Ok(self)
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    pub fn initial_state(&self) -> Option<&State> {
        self.initial_state.as_ref()
    }

    pub fn time_dependencies(&self) -> &[TimeDependency] {
        &self.time_dependencies
    }

    /// Whether `state` is a physical state of the model.
    #[inline]
    pub fn is_valid(&self, state: &State) -> bool {
        (self.validity)(state)
    }

    /// Domain implied by the model's shape.
    ///
    /// # Errors
    /// `InvalidModel` if the model has no shape.
    pub fn default_domain(&self) -> Result<Vec<State>> {
        match &self.shape {
            Some(shape) => Ok(domain::from_rect(shape)),
            None => Err(FspError::InvalidModel(
                "no domain states given and model has no shape".to_string(),
            )),
        }
    }

    /// Combined coefficient of reaction `k`: the product of every time
    /// dependency covering it, or `None` if it is time-independent.
    pub fn coefficient_for(&self, k: usize) -> Option<Coefficient> {
        let factors: Vec<Coefficient> = self
            .time_dependencies
            .iter()
            .filter(|dep| dep.reactions.contains(&k))
            .map(|dep| dep.coefficient.clone())
            .collect();
        match factors.len() {
            0 => None,
            1 => factors.into_iter().next(),
            _ => {
                let combined: Coefficient =
                    Arc::new(move |t: f64| -> f64 { factors.iter().map(|phi| phi(t)).product() });
                Some(combined)
            }
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("dim", &self.dim)
            .field("reactions", &self.reactions)
            .field("shape", &self.shape)
            .field("initial_state", &self.initial_state)
            .field("time_dependencies", &self.time_dependencies.len())
            .finish_non_exhaustive()
    }
}
