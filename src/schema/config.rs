//! Configuration types for NCA simulation parameters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NcaError;

fn default_scale() -> usize {
    1
}

fn default_history_depth() -> usize {
    8
}

fn default_activity_threshold() -> f32 {
    0.1
}

/// Top-level simulation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NcaConfig {
    /// Logical grid width in cells.
    pub width: usize,
    /// Logical grid height in cells.
    pub height: usize,
    /// Number of state channels per cell.
    pub channels: usize,
    /// Effective-dimension multiplier applied to width and height.
    #[serde(default = "default_scale")]
    pub scale: usize,
    /// Evolution strategy.
    #[serde(default)]
    pub mode: EvolverMode,
    /// Toroidal addressing when true, bounded otherwise.
    #[serde(default)]
    pub wrap: bool,
    #[serde(default)]
    pub perception: PerceptionConfig,
    #[serde(default)]
    pub evolver: EvolverConfig,
    #[serde(default)]
    pub loss: LossConfig,
    /// Number of pre-step grid snapshots retained.
    #[serde(default = "default_history_depth")]
    pub history_depth: usize,
    /// Channel-0 value above which a cell counts as populated.
    #[serde(default = "default_activity_threshold")]
    pub activity_threshold: f32,
    /// Seed for the simulation RNG (entropy when absent).
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for NcaConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            channels: 4,
            scale: 1,
            mode: EvolverMode::Markovian,
            wrap: true,
            perception: PerceptionConfig::default(),
            evolver: EvolverConfig::default(),
            loss: LossConfig::default(),
            history_depth: default_history_depth(),
            activity_threshold: default_activity_threshold(),
            seed: None,
        }
    }
}

/// Which evolver variant drives the simulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvolverMode {
    /// Memoryless: `x[t+1] = f(x[t])`.
    #[default]
    #[serde(rename = "markovian")]
    Markovian,
    /// Recurrent with hidden state and optional history attention.
    #[serde(rename = "ssm", alias = "state_space")]
    StateSpace,
}

/// Perception kernel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PerceptionConfig {
    /// Neighborhood radius in cells.
    pub radius: usize,
    /// Kernel construction rule.
    #[serde(rename = "type")]
    pub kind: KernelType,
    /// Keep the center offset in Moore/Von-Neumann kernels, force it in custom kernels.
    pub include_center: bool,
    /// Weight matrix for `KernelType::Custom`, rows are y.
    pub custom_kernel: Option<Vec<Vec<f32>>>,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            radius: 1,
            kind: KernelType::Moore,
            include_center: true,
            custom_kernel: None,
        }
    }
}

/// Kernel construction rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelType {
    /// All offsets within Chebyshev distance `radius`.
    #[default]
    #[serde(alias = "8-connected")]
    Moore,
    /// All offsets within Manhattan distance `radius`.
    #[serde(alias = "4-connected")]
    VonNeumann,
    /// Fixed 3x3 identity + gradient-x + gradient-y taps.
    #[serde(alias = "gradient")]
    Sobel,
    /// Arbitrary weight matrix.
    Custom,
}

/// Evolver network configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EvolverConfig {
    /// Hidden layer width (Markovian) or hidden state width (state-space).
    pub hidden_dim: usize,
    pub activation: Activation,
    /// Add the leading perception slice to the network output (Markovian).
    pub residual: bool,
    /// Per-cell probability of running the network on a tick (Markovian).
    pub update_rate: f32,
    /// Gated update family (state-space).
    pub gate: GateKind,
    /// Refine the hidden state by attending over grid history (state-space).
    pub attention: bool,
    pub init: WeightInit,
}

impl Default for EvolverConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 16,
            activation: Activation::Relu,
            residual: true,
            update_rate: 1.0,
            gate: GateKind::Gru,
            attention: false,
            init: WeightInit::Xavier,
        }
    }
}

/// Gated update family for the state-space evolver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    #[default]
    Gru,
    Lstm,
    Simple,
}

/// Weight initialisation scheme.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WeightInit {
    /// All weights and biases zero.
    Zero,
    /// Uniform Glorot: `U(-sqrt(6/(fan_in+fan_out)), +sqrt(6/(fan_in+fan_out)))`.
    #[default]
    Xavier,
    /// Normal He: `N(0, sqrt(2/fan_in))`.
    He,
    /// Uniform in `[-scale, scale]`.
    Uniform { scale: f32 },
    /// Birth/survive rule compiled into the two dense layers (Markovian only).
    Rule {
        birth: Vec<usize>,
        survive: Vec<usize>,
    },
}

/// Element-wise activation function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Activation {
    #[default]
    Relu,
    /// Leaky ReLU with slope 0.01.
    LeakyRelu,
    Tanh,
    Sigmoid,
    /// GELU, tanh approximation.
    Gelu,
    Sin,
    Identity,
}

impl Activation {
    pub fn name(self) -> &'static str {
        match self {
            Activation::Relu => "relu",
            Activation::LeakyRelu => "leaky_relu",
            Activation::Tanh => "tanh",
            Activation::Sigmoid => "sigmoid",
            Activation::Gelu => "gelu",
            Activation::Sin => "sin",
            Activation::Identity => "identity",
        }
    }
}

impl FromStr for Activation {
    type Err = NcaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relu" => Ok(Activation::Relu),
            "leaky_relu" | "leakyrelu" => Ok(Activation::LeakyRelu),
            "tanh" => Ok(Activation::Tanh),
            "sigmoid" => Ok(Activation::Sigmoid),
            "gelu" => Ok(Activation::Gelu),
            "sin" => Ok(Activation::Sin),
            "identity" | "linear" => Ok(Activation::Identity),
            _ => Err(NcaError::UnknownActivation(s.to_string())),
        }
    }
}

impl TryFrom<String> for Activation {
    type Error = NcaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Activation> for String {
    fn from(value: Activation) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Composite loss configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LossConfig {
    pub local_weight: f32,
    pub global_weight: f32,
    pub local: LocalLossConfig,
    pub global: GlobalLossConfig,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            local_weight: 0.5,
            global_weight: 0.5,
            local: LocalLossConfig::default(),
            global: GlobalLossConfig::default(),
        }
    }
}

/// Neighborhood-local loss configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LocalLossConfig {
    #[serde(rename = "type")]
    pub kind: LocalLossKind,
    /// Neighbor counts that turn a dead cell alive (`rule`).
    pub birth: Vec<usize>,
    /// Neighbor counts that keep a live cell alive (`rule`).
    pub survive: Vec<usize>,
    /// Alive threshold on channel 0 (`rule`).
    pub threshold: f32,
}

impl Default for LocalLossConfig {
    fn default() -> Self {
        Self {
            kind: LocalLossKind::Smoothness,
            birth: vec![3],
            survive: vec![2, 3],
            threshold: 0.5,
        }
    }
}

/// Population-global loss configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GlobalLossConfig {
    #[serde(rename = "type")]
    pub kind: GlobalLossKind,
    pub target_density: f32,
    /// Score entropy against this target when set, report raw entropy otherwise.
    pub target_entropy: Option<f32>,
    /// Rolling (generation, density, means) samples kept for stability/periodicity.
    pub history_length: usize,
}

impl Default for GlobalLossConfig {
    fn default() -> Self {
        Self {
            kind: GlobalLossKind::Density,
            target_density: 0.3,
            target_entropy: None,
            history_length: 32,
        }
    }
}

/// Per-grid local loss kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LocalLossKind {
    #[default]
    Smoothness,
    Symmetry,
    Rule,
    Edge,
    Gradient,
    Custom,
}

impl LocalLossKind {
    pub fn name(self) -> &'static str {
        match self {
            LocalLossKind::Smoothness => "smoothness",
            LocalLossKind::Symmetry => "symmetry",
            LocalLossKind::Rule => "rule",
            LocalLossKind::Edge => "edge",
            LocalLossKind::Gradient => "gradient",
            LocalLossKind::Custom => "custom",
        }
    }
}

impl FromStr for LocalLossKind {
    type Err = NcaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "smoothness" => Ok(LocalLossKind::Smoothness),
            "symmetry" => Ok(LocalLossKind::Symmetry),
            "rule" => Ok(LocalLossKind::Rule),
            "edge" => Ok(LocalLossKind::Edge),
            "gradient" => Ok(LocalLossKind::Gradient),
            "custom" => Ok(LocalLossKind::Custom),
            _ => Err(NcaError::UnknownLossType(s.to_string())),
        }
    }
}

impl TryFrom<String> for LocalLossKind {
    type Error = NcaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LocalLossKind> for String {
    fn from(value: LocalLossKind) -> Self {
        value.name().to_string()
    }
}

/// Population-level global loss kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GlobalLossKind {
    #[default]
    Density,
    Entropy,
    Stability,
    Complexity,
    Distribution,
    Periodicity,
    Diversity,
}

impl GlobalLossKind {
    pub fn name(self) -> &'static str {
        match self {
            GlobalLossKind::Density => "density",
            GlobalLossKind::Entropy => "entropy",
            GlobalLossKind::Stability => "stability",
            GlobalLossKind::Complexity => "complexity",
            GlobalLossKind::Distribution => "distribution",
            GlobalLossKind::Periodicity => "periodicity",
            GlobalLossKind::Diversity => "diversity",
        }
    }
}

impl FromStr for GlobalLossKind {
    type Err = NcaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "density" => Ok(GlobalLossKind::Density),
            "entropy" => Ok(GlobalLossKind::Entropy),
            "stability" => Ok(GlobalLossKind::Stability),
            "complexity" => Ok(GlobalLossKind::Complexity),
            "distribution" => Ok(GlobalLossKind::Distribution),
            "periodicity" => Ok(GlobalLossKind::Periodicity),
            "diversity" => Ok(GlobalLossKind::Diversity),
            _ => Err(NcaError::UnknownLossType(s.to_string())),
        }
    }
}

impl TryFrom<String> for GlobalLossKind {
    type Error = NcaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GlobalLossKind> for String {
    fn from(value: GlobalLossKind) -> Self {
        value.name().to_string()
    }
}

impl NcaConfig {
    /// Storage width after scaling.
    #[inline]
    pub fn effective_width(&self) -> usize {
        self.width * self.scale
    }

    /// Storage height after scaling.
    #[inline]
    pub fn effective_height(&self) -> usize {
        self.height * self.scale
    }

    /// Number of stored cells.
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.effective_width() * self.effective_height()
    }

    /// Length of a full grid buffer.
    #[inline]
    pub fn grid_len(&self) -> usize {
        self.cell_count() * self.channels
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if self.channels == 0 {
            return Err(ConfigError::InvalidChannels);
        }
        if self.scale == 0 {
            return Err(ConfigError::InvalidScale);
        }
        if self.evolver.hidden_dim == 0 {
            return Err(ConfigError::InvalidHiddenDim);
        }
        if !(0.0..=1.0).contains(&self.evolver.update_rate) {
            return Err(ConfigError::InvalidUpdateRate(self.evolver.update_rate));
        }

        match self.perception.kind {
            KernelType::Moore | KernelType::VonNeumann => {
                if self.perception.radius == 0 && !self.perception.include_center {
                    return Err(ConfigError::EmptyKernel);
                }
            }
            KernelType::Sobel => {}
            KernelType::Custom => {
                let matrix = self
                    .perception
                    .custom_kernel
                    .as_ref()
                    .ok_or(ConfigError::MissingCustomKernel)?;
                let cols = matrix.first().map(Vec::len).unwrap_or(0);
                if matrix.is_empty()
                    || cols == 0
                    || matrix.len() % 2 == 0
                    || cols % 2 == 0
                    || matrix.iter().any(|row| row.len() != cols)
                {
                    return Err(ConfigError::MalformedCustomKernel);
                }
                let has_tap = matrix.iter().flatten().any(|&w| w != 0.0);
                if !has_tap && !self.perception.include_center {
                    return Err(ConfigError::EmptyKernel);
                }
            }
        }

        if let WeightInit::Rule { birth, survive } = &self.evolver.init {
            if self.mode != EvolverMode::Markovian {
                return Err(ConfigError::RuleInitRequiresMarkovian);
            }
            let required = 3 * (birth.len() + survive.len());
            if self.evolver.hidden_dim < required {
                return Err(ConfigError::HiddenTooSmallForRule { required });
            }
        }

        if self.loss.local.kind == LocalLossKind::Custom {
            return Err(ConfigError::CustomLossWithoutFunction);
        }

        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Grid dimensions (width, height) must be non-zero")]
    InvalidDimensions,
    #[error("Channel count must be non-zero")]
    InvalidChannels,
    #[error("Scale must be at least 1")]
    InvalidScale,
    #[error("Hidden dimension must be non-zero")]
    InvalidHiddenDim,
    #[error("Update rate {0} is outside [0, 1]")]
    InvalidUpdateRate(f32),
    #[error("Custom perception requires a custom kernel")]
    MissingCustomKernel,
    #[error("Custom kernel must be a non-empty rectangular matrix with odd dimensions")]
    MalformedCustomKernel,
    #[error("Perception kernel has no offsets")]
    EmptyKernel,
    #[error("Rule weight initialisation requires the markovian evolver")]
    RuleInitRequiresMarkovian,
    #[error("Rule weight initialisation needs a hidden dimension of at least {required}")]
    HiddenTooSmallForRule { required: usize },
    #[error("Rule weight initialisation requires a perception kernel with a weighted center")]
    RuleRequiresCenterTap,
    #[error("Custom local loss must be supplied as a function, not through configuration")]
    CustomLossWithoutFunction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(NcaConfig::default().validate().is_ok());
    }

    #[test]
    fn test_camel_case_round_trip() {
        let json = r#"{
            "width": 8,
            "height": 4,
            "channels": 2,
            "mode": "ssm",
            "wrap": true,
            "perception": {"radius": 2, "type": "4-connected", "includeCenter": false},
            "evolver": {"hiddenDim": 6, "activation": "gelu", "gate": "lstm"},
            "loss": {"localWeight": 0.2, "globalWeight": 0.8,
                     "local": {"type": "edge"}, "global": {"type": "entropy", "targetEntropy": 0.5}},
            "historyDepth": 3
        }"#;
        let config: NcaConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.mode, EvolverMode::StateSpace);
        assert_eq!(config.perception.kind, KernelType::VonNeumann);
        assert_eq!(config.evolver.activation, Activation::Gelu);
        assert_eq!(config.evolver.gate, GateKind::Lstm);
        assert_eq!(config.loss.local.kind, LocalLossKind::Edge);
        assert_eq!(config.loss.global.target_entropy, Some(0.5));
        assert_eq!(config.scale, 1);
        assert_eq!(config.history_depth, 3);

        let back: NcaConfig =
            serde_json::from_str(&serde_json::to_string(&config).unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_unknown_activation_rejected() {
        assert!(matches!(
            "swish".parse::<Activation>(),
            Err(NcaError::UnknownActivation(name)) if name == "swish"
        ));

        let json = r#"{"width": 4, "height": 4, "channels": 1, "evolver": {"activation": "swish"}}"#;
        let err = serde_json::from_str::<NcaConfig>(json).unwrap_err();
        assert!(err.to_string().contains("Unknown activation"));
    }

    #[test]
    fn test_unknown_loss_type_rejected() {
        assert!(matches!(
            "chaos".parse::<GlobalLossKind>(),
            Err(NcaError::UnknownLossType(_))
        ));
        let json = r#"{"width": 4, "height": 4, "channels": 1, "loss": {"local": {"type": "blur"}}}"#;
        assert!(serde_json::from_str::<NcaConfig>(json).is_err());
    }

    #[test]
    fn test_validation_errors() {
        let config = NcaConfig {
            channels: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidChannels)));

        let mut config = NcaConfig::default();
        config.perception.kind = KernelType::Custom;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCustomKernel)
        ));

        config.perception.custom_kernel = Some(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MalformedCustomKernel)
        ));

        let mut config = NcaConfig::default();
        config.mode = EvolverMode::StateSpace;
        config.evolver.init = WeightInit::Rule {
            birth: vec![3],
            survive: vec![2, 3],
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RuleInitRequiresMarkovian)
        ));

        let mut config = NcaConfig::default();
        config.evolver.update_rate = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUpdateRate(_))
        ));
    }
}
