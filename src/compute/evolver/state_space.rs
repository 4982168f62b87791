//! Recurrent evolver: `x[t+1] = f(x[t], h[t])`, `h[t+1] = g(x[t], h[t])`.
//!
//! Every cell carries a hidden vector of width `hidden_dim`. A step concatenates
//! `[perception, hidden]`, runs one gated update family, optionally attends over
//! the cell's values in past grid snapshots, and reads the next cell state out of
//! the new hidden vector.

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;

use rand::Rng;

use crate::compute::{Perception, sigmoid};
use crate::error::{NcaError, Result};
use crate::schema::{Activation, ConfigError, EvolverConfig, GateKind, WeightInit};

use super::{Dense, clamp_unit};

/// Gate layer names per family, in storage order.
fn gate_names(gate: GateKind) -> &'static [&'static str] {
    match gate {
        GateKind::Gru => &["reset", "update", "candidate"],
        GateKind::Lstm => &["forget", "input", "output", "candidate"],
        GateKind::Simple => &["recurrent"],
    }
}

#[derive(Debug, Clone)]
pub struct StateSpaceEvolver {
    input_dim: usize,
    hidden_dim: usize,
    output_channels: usize,
    /// Channels of a history snapshot cell.
    state_channels: usize,
    activation: Activation,
    gate: GateKind,
    attention: bool,
    /// Gate layers, then `key`/`value` when attention is on, then `readout`.
    layers: Vec<Dense>,
}

/// Per-worker buffers for one cell update.
struct Scratch {
    concat: Vec<f32>,
    gates: [Vec<f32>; 4],
    key: Vec<f32>,
    value: Vec<f32>,
    attended: Vec<f32>,
}

impl Scratch {
    fn new(input_dim: usize, hidden_dim: usize) -> Self {
        Self {
            concat: vec![0.0; input_dim + hidden_dim],
            gates: std::array::from_fn(|_| vec![0.0; hidden_dim]),
            key: vec![0.0; hidden_dim],
            value: vec![0.0; hidden_dim],
            attended: vec![0.0; hidden_dim],
        }
    }
}

impl StateSpaceEvolver {
    pub fn new<R: Rng>(
        perception: &Perception,
        output_channels: usize,
        config: &EvolverConfig,
        rng: &mut R,
    ) -> std::result::Result<Self, ConfigError> {
        if config.hidden_dim == 0 {
            return Err(ConfigError::InvalidHiddenDim);
        }
        if matches!(config.init, WeightInit::Rule { .. }) {
            return Err(ConfigError::RuleInitRequiresMarkovian);
        }

        let input_dim = perception.features_per_cell();
        let hidden_dim = config.hidden_dim;
        let state_channels = perception.channels();
        let concat = input_dim + hidden_dim;

        let mut layers: Vec<Dense> = gate_names(config.gate)
            .iter()
            .map(|name| Dense::initialized(name, concat, hidden_dim, &config.init, rng))
            .collect();
        if config.attention {
            layers.push(Dense::initialized(
                "key",
                state_channels,
                hidden_dim,
                &config.init,
                rng,
            ));
            layers.push(Dense::initialized(
                "value",
                state_channels,
                hidden_dim,
                &config.init,
                rng,
            ));
        }
        layers.push(Dense::initialized(
            "readout",
            hidden_dim,
            output_channels,
            &config.init,
            rng,
        ));

        Ok(Self {
            input_dim,
            hidden_dim,
            output_channels,
            state_channels,
            activation: config.activation,
            gate: config.gate,
            attention: config.attention,
            layers,
        })
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

    pub fn gate(&self) -> GateKind {
        self.gate
    }

    pub fn layers(&self) -> &[Dense] {
        &self.layers
    }

    pub(crate) fn layers_mut(&mut self) -> &mut Vec<Dense> {
        &mut self.layers
    }

    /// Zero hidden state for a `width × height` grid.
    pub fn init_hidden(&self, width: usize, height: usize) -> Vec<f32> {
        vec![0.0; width * height * self.hidden_dim]
    }

    fn gate_layers(&self) -> &[Dense] {
        &self.layers[..gate_names(self.gate).len()]
    }

    fn readout(&self) -> &Dense {
        &self.layers[self.layers.len() - 1]
    }

    fn key_value(&self) -> Option<(&Dense, &Dense)> {
        if !self.attention {
            return None;
        }
        let at = gate_names(self.gate).len();
        Some((&self.layers[at], &self.layers[at + 1]))
    }

    /// Run one cell without history.
    pub fn forward_cell(&self, perception: &[f32], hidden: &[f32]) -> (Vec<f32>, Vec<f32>) {
        let mut scratch = Scratch::new(self.input_dim, self.hidden_dim);
        let mut next_hidden = vec![0.0; self.hidden_dim];
        let mut out = vec![0.0; self.output_channels];
        self.step_cell(0, perception, hidden, &[], &mut scratch, &mut next_hidden, &mut out);
        (out, next_hidden)
    }

    /// Evolve every cell. `hidden` holds `hidden_dim` values per cell and every
    /// `history` entry is a full grid buffer; both are only read.
    pub fn forward(
        &self,
        features: &[f32],
        hidden: &[f32],
        history: &[&[f32]],
    ) -> Result<(Vec<f32>, Vec<f32>)> {
        let cells = features.len() / self.input_dim;
        if hidden.len() != cells * self.hidden_dim {
            return Err(NcaError::ShapeMismatch {
                expected: cells * self.hidden_dim,
                actual: hidden.len(),
            });
        }
        if let Some(bad) = history
            .iter()
            .find(|h| h.len() != cells * self.state_channels)
        {
            return Err(NcaError::ShapeMismatch {
                expected: cells * self.state_channels,
                actual: bad.len(),
            });
        }

        let (hd, oc) = (self.hidden_dim, self.output_channels);
        let mut out = vec![0.0f32; cells * oc];
        let mut next_hidden = vec![0.0f32; cells * hd];

        let run = |scratch: &mut Scratch, cell: usize, h_out: &mut [f32], o: &mut [f32]| {
            let p = &features[cell * self.input_dim..(cell + 1) * self.input_dim];
            let h = &hidden[cell * hd..(cell + 1) * hd];
            self.step_cell(cell, p, h, history, scratch, h_out, o);
        };

        #[cfg(not(target_arch = "wasm32"))]
        out.par_chunks_mut(oc)
            .zip(next_hidden.par_chunks_mut(hd))
            .enumerate()
            .for_each_init(
                || Scratch::new(self.input_dim, hd),
                |scratch, (cell, (o, h_out))| run(scratch, cell, h_out, o),
            );

        #[cfg(target_arch = "wasm32")]
        {
            let mut scratch = Scratch::new(self.input_dim, hd);
            for (cell, (o, h_out)) in out
                .chunks_mut(oc)
                .zip(next_hidden.chunks_mut(hd))
                .enumerate()
            {
                run(&mut scratch, cell, h_out, o);
            }
        }

        Ok((out, next_hidden))
    }

    #[allow(clippy::too_many_arguments)]
    fn step_cell(
        &self,
        cell: usize,
        perception: &[f32],
        hidden: &[f32],
        history: &[&[f32]],
        scratch: &mut Scratch,
        h_out: &mut [f32],
        out: &mut [f32],
    ) {
        let p_len = perception.len();
        scratch.concat[..p_len].copy_from_slice(perception);
        scratch.concat[p_len..].copy_from_slice(hidden);

        let gates = self.gate_layers();
        let [g0, g1, g2, g3] = &mut scratch.gates;
        match self.gate {
            GateKind::Gru => {
                // r, z from [p, h]; candidate from [p, r * h]
                gates[0].forward_into(&scratch.concat, g0);
                gates[1].forward_into(&scratch.concat, g1);
                for ((c, &h), r) in scratch.concat[p_len..].iter_mut().zip(hidden).zip(g0.iter()) {
                    *c = sigmoid(*r) * h;
                }
                gates[2].forward_into(&scratch.concat, g2);
                for (i, dst) in h_out.iter_mut().enumerate() {
                    let z = sigmoid(g1[i]);
                    *dst = (1.0 - z) * hidden[i] + z * g2[i].tanh();
                }
            }
            GateKind::Lstm => {
                gates[0].forward_into(&scratch.concat, g0);
                gates[1].forward_into(&scratch.concat, g1);
                gates[2].forward_into(&scratch.concat, g2);
                gates[3].forward_into(&scratch.concat, g3);
                for (i, dst) in h_out.iter_mut().enumerate() {
                    let f = sigmoid(g0[i]);
                    let input = sigmoid(g1[i]);
                    let o = sigmoid(g2[i]);
                    *dst = o * (f * hidden[i] + input * g3[i].tanh()).tanh();
                }
            }
            GateKind::Simple => {
                gates[0].forward_into(&scratch.concat, h_out);
                self.activation.apply_slice(h_out);
            }
        }

        if self.attention {
            self.attend(cell, history, scratch, h_out);
        }

        self.readout().forward_into(h_out, out);
        for o in out.iter_mut() {
            *o = clamp_unit(*o);
        }
    }

    /// Add the attention-weighted history values to `h`.
    ///
    /// Scores are `max(q·k / sqrt(H), 0)` normalized by their sum. When no entry
    /// scores above zero `h` is left as is.
    fn attend(&self, cell: usize, history: &[&[f32]], scratch: &mut Scratch, h: &mut [f32]) {
        let Some((key, value)) = self.key_value() else {
            return;
        };
        if history.is_empty() {
            return;
        }

        let scale = (self.hidden_dim as f32).sqrt();
        let sc = self.state_channels;
        let mut total = 0.0f32;
        scratch.attended.fill(0.0);

        for entry in history {
            let x = &entry[cell * sc..(cell + 1) * sc];
            key.forward_into(x, &mut scratch.key);
            let score = (super::dot(h, &scratch.key) / scale).max(0.0);
            if score == 0.0 {
                continue;
            }
            value.forward_into(x, &mut scratch.value);
            for (a, &v) in scratch.attended.iter_mut().zip(&scratch.value) {
                *a += score * v;
            }
            total += score;
        }

        if total > 1e-8 {
            for (dst, &a) in h.iter_mut().zip(&scratch.attended) {
                *dst += a / total;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PerceptionConfig;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn perception() -> Perception {
        Perception::new(&PerceptionConfig::default(), 2).unwrap()
    }

    fn evolver(gate: GateKind, attention: bool, init: WeightInit, seed: u64) -> StateSpaceEvolver {
        let cfg = EvolverConfig {
            hidden_dim: 4,
            gate,
            attention,
            init,
            ..Default::default()
        };
        StateSpaceEvolver::new(&perception(), 2, &cfg, &mut StdRng::seed_from_u64(seed)).unwrap()
    }

    #[test]
    fn test_layer_layout() {
        let names = |e: &StateSpaceEvolver| -> Vec<String> {
            e.layers().iter().map(|l| l.name.clone()).collect()
        };
        let gru = evolver(GateKind::Gru, true, WeightInit::Zero, 0);
        assert_eq!(
            names(&gru),
            ["reset", "update", "candidate", "key", "value", "readout"]
        );
        let lstm = evolver(GateKind::Lstm, false, WeightInit::Zero, 0);
        assert_eq!(lstm.layers().len(), 5);
        assert_eq!(lstm.layers()[0].inputs, 18 + 4);
    }

    #[test]
    fn test_zero_weights_keep_zero_hidden() {
        let e = evolver(GateKind::Gru, false, WeightInit::Zero, 0);
        let hidden = e.init_hidden(3, 2);
        assert_eq!(hidden.len(), 24);

        let features = vec![0.7f32; 6 * 18];
        let (state, next) = e.forward(&features, &hidden, &[]).unwrap();
        assert_eq!(state, vec![0.0; 12]);
        assert_eq!(next, hidden);
    }

    #[test]
    fn test_gru_blends_with_previous_hidden() {
        // Zero weights: z = 0.5 and candidate = 0, so h halves every step
        let e = evolver(GateKind::Gru, false, WeightInit::Zero, 0);
        let (_, next) = e.forward_cell(&[0.0; 18], &[1.0, -1.0, 0.5, 0.0]);
        assert_eq!(next, vec![0.5, -0.5, 0.25, 0.0]);
    }

    #[test]
    fn test_hidden_shape_checked() {
        let e = evolver(GateKind::Simple, false, WeightInit::Xavier, 1);
        let features = vec![0.0f32; 4 * 18];
        let err = e.forward(&features, &[0.0; 3], &[]).unwrap_err();
        assert!(matches!(
            err,
            NcaError::ShapeMismatch {
                expected: 16,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_attention_adds_weighted_values() {
        let cfg = EvolverConfig {
            hidden_dim: 4,
            gate: GateKind::Simple,
            activation: Activation::Identity,
            attention: true,
            init: WeightInit::Zero,
            ..Default::default()
        };
        let mut e =
            StateSpaceEvolver::new(&perception(), 2, &cfg, &mut StdRng::seed_from_u64(0)).unwrap();
        for layer in e.layers_mut().iter_mut() {
            match layer.name.as_str() {
                "recurrent" => layer.bias.fill(1.0),
                "key" | "value" => layer.weights.fill(1.0),
                _ => {}
            }
        }

        let features = vec![0.0f32; 2 * 18];
        let hidden = vec![0.0f32; 8];
        let (_, plain) = e.forward(&features, &hidden, &[]).unwrap();
        assert_eq!(plain, vec![1.0; 8]);

        // key = value = 1.8 per unit, one entry: the attended value is 1.8
        let snapshot = vec![0.9f32; 4];
        let (_, attended) = e.forward(&features, &hidden, &[&snapshot]).unwrap();
        for v in attended {
            assert!((v - 2.8).abs() < 1e-5, "got {}", v);
        }
    }

    #[test]
    fn test_history_shape_checked() {
        let e = evolver(GateKind::Gru, true, WeightInit::Xavier, 2);
        let features = vec![0.0f32; 4 * 18];
        let hidden = e.init_hidden(2, 2);
        let short = vec![0.0f32; 7];
        assert!(matches!(
            e.forward(&features, &hidden, &[&short]),
            Err(NcaError::ShapeMismatch { expected: 8, .. })
        ));
    }

    #[test]
    fn test_rule_init_rejected() {
        let cfg = EvolverConfig {
            init: WeightInit::Rule {
                birth: vec![3],
                survive: vec![2, 3],
            },
            ..Default::default()
        };
        let result =
            StateSpaceEvolver::new(&perception(), 2, &cfg, &mut StdRng::seed_from_u64(0));
        assert!(matches!(result, Err(ConfigError::RuleInitRequiresMarkovian)));
    }

    proptest! {
        #[test]
        fn prop_output_bounded(
            seed in any::<u64>(),
            gate in prop::sample::select(vec![GateKind::Gru, GateKind::Lstm, GateKind::Simple]),
            input in prop::collection::vec(-50.0f32..50.0, 18),
            hidden in prop::collection::vec(-5.0f32..5.0, 4),
        ) {
            let e = evolver(gate, true, WeightInit::He, seed);
            let (out, _) = e.forward_cell(&input, &hidden);
            for v in out {
                prop_assert!((0.0..=1.0).contains(&v));
            }
        }

        #[test]
        fn prop_output_bounded_at_float_extremes(
            seed in any::<u64>(),
            gate in prop::sample::select(vec![GateKind::Gru, GateKind::Lstm, GateKind::Simple]),
            input in prop::collection::vec(
                prop::sample::select(vec![f32::MAX, f32::MIN, 0.0, 1.0]),
                18,
            ),
        ) {
            let cfg = EvolverConfig {
                hidden_dim: 4,
                gate,
                activation: Activation::Identity,
                init: WeightInit::Uniform { scale: 3.0 },
                ..Default::default()
            };
            let e = StateSpaceEvolver::new(&perception(), 2, &cfg, &mut StdRng::seed_from_u64(seed))
                .unwrap();
            let (out, _) = e.forward_cell(&input, &[0.0; 4]);
            for v in out {
                prop_assert!((0.0..=1.0).contains(&v), "got {}", v);
            }
        }
    }
}
