//! Weighted blend of local, global and extra losses.

use serde::{Deserialize, Serialize};

use crate::compute::Grid;
use crate::schema::{ConfigError, LossConfig};

use super::{GlobalLoss, LocalLoss, Loss, LossContext};

/// Value of one extra loss in a breakdown (unweighted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraTerm {
    pub name: String,
    pub weight: f32,
    pub value: f32,
}

/// Per-component result of [`CompositeLoss::compute`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LossBreakdown {
    pub local: f32,
    pub global: f32,
    pub extras: Vec<ExtraTerm>,
    /// `local_weight·local + global_weight·global + Σ weight·extra`.
    pub total: f32,
}

struct WeightedLoss {
    weight: f32,
    loss: Box<dyn Loss>,
}

pub struct CompositeLoss {
    local: LocalLoss,
    global: GlobalLoss,
    local_weight: f32,
    global_weight: f32,
    extras: Vec<WeightedLoss>,
}

impl std::fmt::Debug for CompositeLoss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeLoss")
            .field("local", &self.local)
            .field("global", &self.global)
            .field("local_weight", &self.local_weight)
            .field("global_weight", &self.global_weight)
            .field(
                "extras",
                &self.extras.iter().map(|e| e.loss.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl CompositeLoss {
    pub fn new(config: &LossConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            local: LocalLoss::new(&config.local)?,
            global: GlobalLoss::new(&config.global),
            local_weight: config.local_weight,
            global_weight: config.global_weight,
            extras: Vec::new(),
        })
    }

    pub fn local(&self) -> &LocalLoss {
        &self.local
    }

    pub fn set_local(&mut self, local: LocalLoss) {
        self.local = local;
    }

    pub fn global(&self) -> &GlobalLoss {
        &self.global
    }

    pub fn global_mut(&mut self) -> &mut GlobalLoss {
        &mut self.global
    }

    /// `(local_weight, global_weight)`.
    pub fn weights(&self) -> (f32, f32) {
        (self.local_weight, self.global_weight)
    }

    /// `local_weight = 1 - blend`, `global_weight = blend`, with `blend` clamped to `[0, 1]`.
    pub fn set_blend(&mut self, blend: f32) {
        let blend = blend.clamp(0.0, 1.0);
        self.local_weight = 1.0 - blend;
        self.global_weight = blend;
    }

    /// Append an extra term.
    pub fn add_loss(&mut self, weight: f32, loss: Box<dyn Loss>) {
        self.extras.push(WeightedLoss { weight, loss });
    }

    /// Remove the first extra term called `name`.
    pub fn remove_loss(&mut self, name: &str) -> Option<Box<dyn Loss>> {
        let index = self.extras.iter().position(|e| e.loss.name() == name)?;
        Some(self.extras.remove(index).loss)
    }

    pub fn extra_count(&self) -> usize {
        self.extras.len()
    }

    pub fn compute(&mut self, grid: &Grid, ctx: &LossContext<'_>) -> LossBreakdown {
        let local = self.local.compute(grid, ctx);
        let global = self.global.compute(grid, ctx);
        let mut total = self.local_weight * local + self.global_weight * global;

        let mut extras = Vec::with_capacity(self.extras.len());
        for extra in &mut self.extras {
            let value = extra.loss.compute(grid, ctx);
            total += extra.weight * value;
            extras.push(ExtraTerm {
                name: extra.loss.name().to_string(),
                weight: extra.weight,
                value,
            });
        }

        LossBreakdown {
            local,
            global,
            extras,
            total,
        }
    }

    /// Clear the global loss history. Local and extra losses are left alone.
    pub fn reset(&mut self) {
        self.global.reset();
    }
}
