//! Evolver module - Per-cell transition functions.
//!
//! Two variants share one contract: given the full-grid perception buffer they
//! return a freshly allocated next-state buffer, every component clamped to `[0, 1]`.
//!
//! - [`MarkovianEvolver`]: memoryless, next state from perception alone.
//! - [`StateSpaceEvolver`]: carries a per-cell hidden state and may attend over
//!   past grid snapshots.
//!
//! Both hold their parameters as named [`Dense`] layers, which is what the
//! evolutionary operators ([`Evolver::mutate`], [`Evolver::crossover`]) and
//! persistence ([`Evolver::parameters`], [`Evolver::load_parameters`]) work on.

mod dense;
mod markovian;
mod state_space;

pub use dense::*;
pub use markovian::*;
pub use state_space::*;

use rand::Rng;

use crate::compute::Perception;
use crate::error::{NcaError, Result};
use crate::schema::{ConfigError, EvolverMode, NcaConfig};

/// Clamp to `[0, 1]`. NaN (e.g. from `inf - inf` in a saturated layer) maps to 0.
#[inline]
pub(crate) fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

/// Recurrent inputs for a state-space step. Borrowed for the duration of one
/// forward call only.
#[derive(Debug, Clone, Copy)]
pub struct Memory<'a> {
    /// `hidden_dim` values per cell.
    pub hidden: &'a [f32],
    /// Past grid buffers, oldest first.
    pub history: &'a [&'a [f32]],
}

/// Result of one forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct EvolverOutput {
    pub state: Vec<f32>,
    /// Next hidden state (state-space only).
    pub hidden: Option<Vec<f32>>,
}

#[derive(Debug, Clone)]
pub enum Evolver {
    Markovian(MarkovianEvolver),
    StateSpace(StateSpaceEvolver),
}

impl Evolver {
    /// Construct the variant selected by `config.mode`.
    pub fn new<R: Rng>(
        config: &NcaConfig,
        perception: &Perception,
        rng: &mut R,
    ) -> std::result::Result<Self, ConfigError> {
        let evolver = match config.mode {
            EvolverMode::Markovian => Evolver::Markovian(MarkovianEvolver::new(
                perception,
                config.channels,
                &config.evolver,
                rng,
            )?),
            EvolverMode::StateSpace => Evolver::StateSpace(StateSpaceEvolver::new(
                perception,
                config.channels,
                &config.evolver,
                rng,
            )?),
        };
        log::debug!(
            "built {} evolver with {} parameters",
            evolver.mode_name(),
            evolver.parameter_count()
        );
        Ok(evolver)
    }

    pub fn mode(&self) -> EvolverMode {
        match self {
            Evolver::Markovian(_) => EvolverMode::Markovian,
            Evolver::StateSpace(_) => EvolverMode::StateSpace,
        }
    }

    fn mode_name(&self) -> &'static str {
        match self {
            Evolver::Markovian(_) => "markovian",
            Evolver::StateSpace(_) => "state-space",
        }
    }

    pub fn output_channels(&self) -> usize {
        match self {
            Evolver::Markovian(e) => e.output_channels(),
            Evolver::StateSpace(e) => e.output_channels(),
        }
    }

    /// Width of the per-cell hidden state, zero for the Markovian variant.
    pub fn hidden_dim(&self) -> usize {
        match self {
            Evolver::Markovian(_) => 0,
            Evolver::StateSpace(e) => e.hidden_dim(),
        }
    }

    /// Zero hidden buffer for a `width × height` grid, if this variant has one.
    pub fn init_hidden(&self, width: usize, height: usize) -> Option<Vec<f32>> {
        match self {
            Evolver::Markovian(_) => None,
            Evolver::StateSpace(e) => Some(e.init_hidden(width, height)),
        }
    }

    /// Compute the next state for every cell.
    ///
    /// `memory` is ignored by the Markovian variant. A state-space evolver run
    /// without memory starts from a zero hidden state and no history.
    pub fn forward<R: Rng>(
        &self,
        features: &[f32],
        memory: Option<Memory<'_>>,
        rng: &mut R,
    ) -> Result<EvolverOutput> {
        match self {
            Evolver::Markovian(e) => Ok(EvolverOutput {
                state: e.forward(features, rng),
                hidden: None,
            }),
            Evolver::StateSpace(e) => {
                let (state, hidden) = match memory {
                    Some(m) => e.forward(features, m.hidden, m.history)?,
                    None => {
                        let cells = features.len() / e.input_dim();
                        let zeros = vec![0.0; cells * e.hidden_dim()];
                        e.forward(features, &zeros, &[])?
                    }
                };
                Ok(EvolverOutput {
                    state,
                    hidden: Some(hidden),
                })
            }
        }
    }

    /// Gradient-based training is not supported.
    pub fn backward(&mut self, _output_grad: &[f32]) -> Result<()> {
        Err(NcaError::NotImplemented("backward pass"))
    }

    pub fn parameters(&self) -> &[Dense] {
        match self {
            Evolver::Markovian(e) => e.layers(),
            Evolver::StateSpace(e) => e.layers(),
        }
    }

    fn parameters_mut(&mut self) -> &mut Vec<Dense> {
        match self {
            Evolver::Markovian(e) => e.layers_mut(),
            Evolver::StateSpace(e) => e.layers_mut(),
        }
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters().iter().map(Dense::parameter_count).sum()
    }

    /// Replace all layers. Names and shapes must match the current ones.
    pub fn load_parameters(&mut self, layers: Vec<Dense>) -> Result<()> {
        check_compatible(self.parameters(), &layers)?;
        *self.parameters_mut() = layers;
        Ok(())
    }

    /// Perturb each weight with probability `rate` by `U(-strength, strength)`.
    pub fn mutate<R: Rng>(&mut self, rate: f32, strength: f32, rng: &mut R) {
        mutate_layers(self.parameters_mut(), rate, strength, rng);
    }

    /// Child with every weight drawn from either parent. Both parents must be the
    /// same variant with identical layer shapes.
    pub fn crossover<R: Rng>(&self, other: &Evolver, rng: &mut R) -> Result<Evolver> {
        if self.mode() != other.mode() {
            return Err(NcaError::ParameterMismatch(format!(
                "cannot cross {} with {}",
                self.mode_name(),
                other.mode_name()
            )));
        }
        let layers = crossover_layers(self.parameters(), other.parameters(), rng)?;
        let mut child = self.clone();
        *child.parameters_mut() = layers;
        Ok(child)
    }
}
