//! Named configuration presets.

use crate::error::NcaError;

use super::{
    Activation, EvolverConfig, EvolverMode, GateKind, GlobalLossConfig, GlobalLossKind,
    KernelType, LocalLossConfig, LocalLossKind, LossConfig, NcaConfig, PerceptionConfig,
    WeightInit,
};

/// Names accepted by [`NcaConfig::preset`].
pub const PRESET_NAMES: &[&str] = &["game_of_life", "growing", "memory"];

impl NcaConfig {
    /// Build a named preset configuration.
    pub fn preset(name: &str) -> Result<Self, NcaError> {
        match name.to_ascii_lowercase().replace('-', "_").as_str() {
            "game_of_life" | "life" => Ok(game_of_life()),
            "growing" => Ok(growing()),
            "memory" => Ok(memory()),
            _ => Err(NcaError::UnknownPreset(name.to_string())),
        }
    }
}

/// Conway's B3/S23 compiled into a Markovian evolver.
fn game_of_life() -> NcaConfig {
    NcaConfig {
        width: 32,
        height: 32,
        channels: 1,
        scale: 1,
        mode: EvolverMode::Markovian,
        wrap: true,
        perception: PerceptionConfig {
            radius: 1,
            kind: KernelType::Moore,
            include_center: true,
            custom_kernel: None,
        },
        evolver: EvolverConfig {
            hidden_dim: 9,
            activation: Activation::Relu,
            residual: false,
            update_rate: 1.0,
            gate: GateKind::Gru,
            attention: false,
            init: WeightInit::Rule {
                birth: vec![3],
                survive: vec![2, 3],
            },
        },
        loss: LossConfig {
            local_weight: 0.7,
            global_weight: 0.3,
            local: LocalLossConfig {
                kind: LocalLossKind::Rule,
                ..Default::default()
            },
            global: GlobalLossConfig {
                kind: GlobalLossKind::Density,
                target_density: 0.3,
                ..Default::default()
            },
        },
        history_depth: 4,
        activity_threshold: 0.5,
        seed: Some(1),
    }
}

/// Gradient-perceiving residual NCA with asynchronous updates.
fn growing() -> NcaConfig {
    NcaConfig {
        width: 64,
        height: 64,
        channels: 4,
        scale: 1,
        mode: EvolverMode::Markovian,
        wrap: true,
        perception: PerceptionConfig {
            radius: 1,
            kind: KernelType::Sobel,
            include_center: true,
            custom_kernel: None,
        },
        evolver: EvolverConfig {
            hidden_dim: 32,
            activation: Activation::Relu,
            residual: true,
            update_rate: 0.5,
            init: WeightInit::Uniform { scale: 0.1 },
            ..Default::default()
        },
        loss: LossConfig {
            local_weight: 0.5,
            global_weight: 0.5,
            local: LocalLossConfig {
                kind: LocalLossKind::Smoothness,
                ..Default::default()
            },
            global: GlobalLossConfig {
                kind: GlobalLossKind::Entropy,
                target_entropy: Some(0.6),
                ..Default::default()
            },
        },
        history_depth: 4,
        activity_threshold: 0.1,
        seed: Some(7),
    }
}

/// Gated recurrent evolver attending over recent history.
fn memory() -> NcaConfig {
    NcaConfig {
        width: 48,
        height: 48,
        channels: 3,
        scale: 1,
        mode: EvolverMode::StateSpace,
        wrap: true,
        perception: PerceptionConfig::default(),
        evolver: EvolverConfig {
            hidden_dim: 12,
            activation: Activation::Tanh,
            residual: false,
            update_rate: 1.0,
            gate: GateKind::Gru,
            attention: true,
            init: WeightInit::Xavier,
        },
        loss: LossConfig {
            local_weight: 0.4,
            global_weight: 0.6,
            local: LocalLossConfig {
                kind: LocalLossKind::Gradient,
                ..Default::default()
            },
            global: GlobalLossConfig {
                kind: GlobalLossKind::Stability,
                history_length: 16,
                ..Default::default()
            },
        },
        history_depth: 6,
        activity_threshold: 0.1,
        seed: Some(11),
    }
}
