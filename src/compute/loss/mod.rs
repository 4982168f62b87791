//! Loss module - Scalar diagnostics over grid state.
//!
//! - [`LocalLoss`]: neighborhood measures, stateless per call.
//! - [`GlobalLoss`]: population measures over cached grid statistics, with a
//!   bounded rolling history for temporal measures.
//! - [`CompositeLoss`]: weighted blend of one local, one global and any number
//!   of extra losses.

mod composite;
mod global;
mod local;

pub use composite::*;
pub use global::*;
pub use local::*;

use super::Grid;

/// Per-call inputs beyond the grid itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct LossContext<'a> {
    /// Generation the grid belongs to. Global losses record a history sample
    /// only when this is set.
    pub generation: Option<u64>,
    /// Grid state one step earlier.
    pub previous: Option<&'a Grid>,
}

impl<'a> LossContext<'a> {
    pub fn at(generation: u64) -> Self {
        Self {
            generation: Some(generation),
            previous: None,
        }
    }

    pub fn with_previous(mut self, previous: &'a Grid) -> Self {
        self.previous = Some(previous);
        self
    }
}

/// A scalar measure of a grid.
pub trait Loss: Send {
    fn name(&self) -> &str;

    fn compute(&mut self, grid: &Grid, ctx: &LossContext<'_>) -> f32;

    /// Clear any temporal state.
    fn reset(&mut self) {}
}
