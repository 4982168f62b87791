//! Memoryless evolver: `x[t+1] = f(x[t])`.
//!
//! Two dense layers, `hidden = act(W1·p + b1)` and `raw = W2·hidden + b2`, with an
//! optional residual onto the cell's own state and a per-cell stochastic update
//! mask.

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;

use rand::Rng;

use crate::compute::Perception;
use crate::schema::{Activation, ConfigError, EvolverConfig, WeightInit};

use super::{Dense, clamp_unit};

/// Rule encodings shift the center term by this much so that dead (`0..=8`) and
/// alive (`10..=18`) neighbor sums never overlap.
const ALIVE_OFFSET: f32 = 10.0;

#[derive(Debug, Clone)]
pub struct MarkovianEvolver {
    input_dim: usize,
    hidden_dim: usize,
    output_channels: usize,
    activation: Activation,
    residual: bool,
    update_rate: f32,
    /// Start of the slice used for residual and pass-through (the center tap).
    passthrough: usize,
    layers: Vec<Dense>,
}

impl MarkovianEvolver {
    /// Build an evolver reading features from `perception` and emitting `output_channels`.
    pub fn new<R: Rng>(
        perception: &Perception,
        output_channels: usize,
        config: &EvolverConfig,
        rng: &mut R,
    ) -> Result<Self, ConfigError> {
        if config.hidden_dim == 0 {
            return Err(ConfigError::InvalidHiddenDim);
        }

        let input_dim = perception.features_per_cell();
        let layers = vec![
            Dense::initialized("w1", input_dim, config.hidden_dim, &config.init, rng),
            Dense::initialized("w2", config.hidden_dim, output_channels, &config.init, rng),
        ];

        let mut evolver = Self {
            input_dim,
            hidden_dim: config.hidden_dim,
            output_channels,
            activation: config.activation,
            residual: config.residual,
            update_rate: config.update_rate,
            passthrough: perception.center_index().unwrap_or(0) * perception.channels(),
            layers,
        };

        if let WeightInit::Rule { birth, survive } = &config.init {
            evolver.encode_rule(perception, birth, survive)?;
        }

        Ok(evolver)
    }

    /// Compile a birth/survive rule on channel 0 into the two layers.
    ///
    /// With `u = neighbors + 10·center`, every target count `k` gets a triangular
    /// bump `relu(u-k+1) - 2·relu(u-k) + relu(u-k-1)`, which is 1 at `u = k` and 0 at
    /// every other integer. The encoding is exact for binary grids.
    fn encode_rule(
        &mut self,
        perception: &Perception,
        birth: &[usize],
        survive: &[usize],
    ) -> Result<(), ConfigError> {
        let targets: Vec<f32> = birth
            .iter()
            .map(|&k| k as f32)
            .chain(survive.iter().map(|&k| k as f32 + ALIVE_OFFSET))
            .collect();
        if self.hidden_dim < 3 * targets.len() {
            return Err(ConfigError::HiddenTooSmallForRule {
                required: 3 * targets.len(),
            });
        }

        let center = perception
            .center_index()
            .filter(|&i| perception.taps()[i].weight != 0.0)
            .ok_or(ConfigError::RuleRequiresCenterTap)?;

        let channels = perception.channels();
        let mut u = vec![0.0f32; self.input_dim];
        for (t, tap) in perception.taps().iter().enumerate() {
            if tap.weight == 0.0 {
                continue;
            }
            let scale = if t == center { ALIVE_OFFSET } else { 1.0 };
            u[t * channels] = scale / tap.weight;
        }

        self.activation = Activation::Relu;
        self.residual = false;
        for layer in &mut self.layers {
            layer.weights.fill(0.0);
            layer.bias.fill(0.0);
        }

        let (w1, w2) = self.layers.split_at_mut(1);
        let (w1, w2) = (&mut w1[0], &mut w2[0]);
        for (j, &k) in targets.iter().enumerate() {
            for (step, (shift, out_weight)) in [(1.0, 1.0), (0.0, -2.0), (-1.0, 1.0)]
                .into_iter()
                .enumerate()
            {
                let h = 3 * j + step;
                w1.row_mut(h).copy_from_slice(&u);
                w1.bias[h] = shift - k;
                w2.row_mut(0)[h] = out_weight;
            }
        }

        log::debug!(
            "encoded rule B{:?}/S{:?} into {} hidden units",
            birth,
            survive,
            3 * targets.len()
        );
        Ok(())
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    #[inline]
    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    #[inline]
    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    #[inline]
    pub fn update_rate(&self) -> f32 {
        self.update_rate
    }

    pub fn layers(&self) -> &[Dense] {
        &self.layers
    }

    pub(crate) fn layers_mut(&mut self) -> &mut Vec<Dense> {
        &mut self.layers
    }

    /// Run the network on one cell's perception vector.
    pub fn forward_cell(&self, perception: &[f32]) -> Vec<f32> {
        let mut hidden = vec![0.0f32; self.hidden_dim];
        let mut out = vec![0.0f32; self.output_channels];
        self.forward_cell_into(perception, &mut hidden, &mut out);
        out
    }

    /// Run the network on one cell, using `hidden` as scratch.
    pub fn forward_cell_into(&self, perception: &[f32], hidden: &mut [f32], out: &mut [f32]) {
        self.layers[0].forward_into(perception, hidden);
        self.activation.apply_slice(hidden);
        self.layers[1].forward_into(hidden, out);

        if self.residual {
            let own = &perception[self.passthrough..];
            for (o, &p) in out.iter_mut().zip(own) {
                *o += p;
            }
        }
        for o in out.iter_mut() {
            *o = clamp_unit(*o);
        }
    }

    /// Copy the cell's own state through unchanged (clamped to the valid range).
    #[inline]
    fn pass_through(&self, perception: &[f32], out: &mut [f32]) {
        let own = &perception[self.passthrough..];
        for (o, &p) in out.iter_mut().zip(own) {
            *o = clamp_unit(p);
        }
    }

    /// Evolve every cell of a full-grid feature buffer.
    ///
    /// With `update_rate < 1` each cell independently runs the network with that
    /// probability; the mask is drawn up front so the result is independent of
    /// scheduling.
    pub fn forward<R: Rng>(&self, features: &[f32], rng: &mut R) -> Vec<f32> {
        let cells = features.len() / self.input_dim;
        let mask: Option<Vec<bool>> = (self.update_rate < 1.0).then(|| {
            (0..cells)
                .map(|_| rng.r#gen::<f32>() < self.update_rate)
                .collect()
        });

        let mut out = vec![0.0f32; cells * self.output_channels];
        let oc = self.output_channels;
        let run = |hidden: &mut Vec<f32>, cell: usize, o: &mut [f32]| {
            let f = &features[cell * self.input_dim..(cell + 1) * self.input_dim];
            match &mask {
                Some(m) if !m[cell] => self.pass_through(f, o),
                _ => self.forward_cell_into(f, hidden, o),
            }
        };

        #[cfg(not(target_arch = "wasm32"))]
        out.par_chunks_mut(oc).enumerate().for_each_init(
            || vec![0.0f32; self.hidden_dim],
            |hidden, (cell, o)| run(hidden, cell, o),
        );

        #[cfg(target_arch = "wasm32")]
        {
            let mut hidden = vec![0.0f32; self.hidden_dim];
            for (cell, o) in out.chunks_mut(oc).enumerate() {
                run(&mut hidden, cell, o);
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::Grid;
    use crate::schema::{KernelType, PerceptionConfig};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn moore(channels: usize) -> Perception {
        Perception::new(&PerceptionConfig::default(), channels).unwrap()
    }

    fn config(init: WeightInit) -> EvolverConfig {
        EvolverConfig {
            hidden_dim: 8,
            init,
            ..Default::default()
        }
    }

    #[test]
    fn test_zero_weights_residual_is_identity() {
        let perception = moore(2);
        let mut rng = StdRng::seed_from_u64(0);
        let evolver =
            MarkovianEvolver::new(&perception, 2, &config(WeightInit::Zero), &mut rng).unwrap();

        let mut grid = Grid::new(4, 3, 2, true).unwrap();
        grid.fill(&crate::schema::FillMode::Random { amplitude: 1.0 }, &mut rng);
        let next = evolver.forward(&perception.sample(&grid), &mut rng);
        assert_eq!(next, grid.data());
    }

    #[test]
    fn test_zero_weights_without_residual_is_zero() {
        let perception = moore(1);
        let mut rng = StdRng::seed_from_u64(0);
        let mut cfg = config(WeightInit::Zero);
        cfg.residual = false;
        let evolver = MarkovianEvolver::new(&perception, 1, &cfg, &mut rng).unwrap();
        assert_eq!(evolver.forward_cell(&[1.0; 9]), vec![0.0]);
    }

    #[test]
    fn test_update_rate_zero_passes_through() {
        let perception = moore(1);
        let mut rng = StdRng::seed_from_u64(1);
        let mut cfg = config(WeightInit::Uniform { scale: 2.0 });
        cfg.update_rate = 0.0;
        let evolver = MarkovianEvolver::new(&perception, 1, &cfg, &mut rng).unwrap();

        let mut grid = Grid::new(5, 5, 1, false).unwrap();
        grid.fill(&crate::schema::FillMode::Noise { scale: 2 }, &mut rng);
        let next = evolver.forward(&perception.sample(&grid), &mut rng);
        assert_eq!(next, grid.data());
    }

    #[test]
    fn test_update_mask_is_per_cell() {
        let perception = moore(1);
        let mut rng = StdRng::seed_from_u64(2);
        let mut cfg = config(WeightInit::Zero);
        cfg.residual = false;
        cfg.update_rate = 0.5;
        let evolver = MarkovianEvolver::new(&perception, 1, &cfg, &mut rng).unwrap();

        // Updated cells go to 0, skipped cells keep 1
        let features = vec![1.0f32; 64 * 9];
        let next = evolver.forward(&features, &mut rng);
        let kept = next.iter().filter(|&&v| v == 1.0).count();
        assert!(kept > 0 && kept < 64, "kept {} of 64", kept);
    }

    #[test]
    fn test_rule_encoding_counts() {
        let perception = moore(1);
        let mut rng = StdRng::seed_from_u64(0);
        let cfg = EvolverConfig {
            hidden_dim: 9,
            init: WeightInit::Rule {
                birth: vec![3],
                survive: vec![2, 3],
            },
            ..Default::default()
        };
        let evolver = MarkovianEvolver::new(&perception, 1, &cfg, &mut rng).unwrap();

        for alive in [0.0f32, 1.0] {
            for n in 0..=8usize {
                let mut p = vec![0.0f32; 9];
                p[0] = alive;
                for v in p.iter_mut().skip(1).take(n) {
                    *v = 1.0;
                }
                let expected = if alive == 1.0 {
                    n == 2 || n == 3
                } else {
                    n == 3
                };
                assert_eq!(
                    evolver.forward_cell(&p)[0],
                    if expected { 1.0 } else { 0.0 },
                    "alive={} n={}",
                    alive,
                    n
                );
            }
        }
    }

    #[test]
    fn test_rule_requires_center_tap() {
        let perception = Perception::new(
            &PerceptionConfig {
                include_center: false,
                kind: KernelType::Moore,
                ..Default::default()
            },
            1,
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let cfg = EvolverConfig {
            hidden_dim: 9,
            init: WeightInit::Rule {
                birth: vec![3],
                survive: vec![2, 3],
            },
            ..Default::default()
        };
        assert!(matches!(
            MarkovianEvolver::new(&perception, 1, &cfg, &mut rng),
            Err(ConfigError::RuleRequiresCenterTap)
        ));
    }

    proptest! {
        #[test]
        fn prop_output_bounded(
            seed in any::<u64>(),
            input in prop::collection::vec(-100.0f32..100.0, 18),
        ) {
            let perception = moore(2);
            let mut rng = StdRng::seed_from_u64(seed);
            let cfg = EvolverConfig {
                hidden_dim: 6,
                activation: Activation::LeakyRelu,
                init: WeightInit::Uniform { scale: 3.0 },
                ..Default::default()
            };
            let evolver = MarkovianEvolver::new(&perception, 2, &cfg, &mut rng).unwrap();
            for v in evolver.forward_cell(&input) {
                prop_assert!((0.0..=1.0).contains(&v));
            }
        }

        #[test]
        fn prop_output_bounded_at_float_extremes(
            seed in any::<u64>(),
            residual in any::<bool>(),
            update_rate in prop::sample::select(vec![0.0f32, 1.0]),
            input in prop::collection::vec(
                prop::sample::select(vec![f32::MAX, f32::MIN, 0.0, 1.0]),
                9,
            ),
        ) {
            let perception = moore(1);
            let mut rng = StdRng::seed_from_u64(seed);
            let cfg = EvolverConfig {
                hidden_dim: 6,
                activation: Activation::Identity,
                init: WeightInit::Uniform { scale: 3.0 },
                residual,
                update_rate,
                ..Default::default()
            };
            let evolver = MarkovianEvolver::new(&perception, 1, &cfg, &mut rng).unwrap();
            for v in evolver.forward(&input, &mut rng) {
                prop_assert!((0.0..=1.0).contains(&v), "got {}", v);
            }
        }
    }

    #[test]
    fn test_saturated_layers_stay_in_range() {
        let perception = moore(1);
        let mut rng = StdRng::seed_from_u64(3);
        let cfg = EvolverConfig {
            hidden_dim: 8,
            activation: Activation::Identity,
            init: WeightInit::Uniform { scale: 3.0 },
            residual: false,
            ..Default::default()
        };
        let evolver = MarkovianEvolver::new(&perception, 1, &cfg, &mut rng).unwrap();
        let out = evolver.forward_cell(&[f32::MAX; 9]);
        assert!((0.0..=1.0).contains(&out[0]), "got {}", out[0]);
    }
}
