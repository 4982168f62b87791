//! Dense layers and the weight-level evolutionary operators.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{NcaError, Result};
use crate::schema::WeightInit;

/// Fully connected layer: `out = W·x + b`, `W` stored row-major as `outputs × inputs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dense {
    pub name: String,
    pub inputs: usize,
    pub outputs: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

impl Dense {
    /// Zero-initialized layer.
    pub fn zeros(name: &str, inputs: usize, outputs: usize) -> Self {
        Self {
            name: name.to_string(),
            inputs,
            outputs,
            weights: vec![0.0; inputs * outputs],
            bias: vec![0.0; outputs],
        }
    }

    /// Layer initialized with `scheme`. Rule encodings are applied by the evolver, so
    /// `WeightInit::Rule` yields zeros here.
    pub fn initialized<R: Rng>(
        name: &str,
        inputs: usize,
        outputs: usize,
        scheme: &WeightInit,
        rng: &mut R,
    ) -> Self {
        let mut layer = Self::zeros(name, inputs, outputs);
        match scheme {
            WeightInit::Zero | WeightInit::Rule { .. } => {}
            WeightInit::Xavier => {
                let limit = (6.0 / (inputs + outputs) as f32).sqrt();
                for w in &mut layer.weights {
                    *w = rng.gen_range(-limit..=limit);
                }
            }
            WeightInit::He => {
                let std = (2.0 / inputs.max(1) as f32).sqrt();
                for w in &mut layer.weights {
                    let n: f32 = rng.sample(rand_distr::StandardNormal);
                    *w = n * std;
                }
            }
            WeightInit::Uniform { scale } => {
                let s = scale.abs();
                for w in &mut layer.weights {
                    *w = rng.gen_range(-s..=s);
                }
            }
        }
        layer
    }

    /// Row `o` of the weight matrix.
    #[inline]
    pub fn row(&self, o: usize) -> &[f32] {
        &self.weights[o * self.inputs..(o + 1) * self.inputs]
    }

    /// Mutable row `o` of the weight matrix.
    #[inline]
    pub fn row_mut(&mut self, o: usize) -> &mut [f32] {
        &mut self.weights[o * self.inputs..(o + 1) * self.inputs]
    }

    /// `out = W·input + b`.
    #[inline]
    pub fn forward_into(&self, input: &[f32], out: &mut [f32]) {
        debug_assert_eq!(input.len(), self.inputs);
        debug_assert_eq!(out.len(), self.outputs);
        for (o, (dst, &b)) in out.iter_mut().zip(&self.bias).enumerate() {
            *dst = b + dot(self.row(o), input);
        }
    }

    /// Total number of scalars (weights and biases).
    pub fn parameter_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    fn same_shape(&self, other: &Dense) -> bool {
        self.name == other.name
            && self.inputs == other.inputs
            && self.outputs == other.outputs
            && self.weights.len() == other.weights.len()
            && self.bias.len() == other.bias.len()
    }
}

#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Perturb each scalar with probability `rate` by a uniform value in `[-strength, strength]`.
pub fn mutate_layers<R: Rng>(layers: &mut [Dense], rate: f32, strength: f32, rng: &mut R) {
    let strength = strength.abs();
    for layer in layers {
        for v in layer.weights.iter_mut().chain(layer.bias.iter_mut()) {
            if rng.r#gen::<f32>() < rate {
                *v += rng.gen_range(-strength..=strength);
            }
        }
    }
}

/// Uniform crossover: every scalar of the child comes from either parent with equal odds.
pub fn crossover_layers<R: Rng>(a: &[Dense], b: &[Dense], rng: &mut R) -> Result<Vec<Dense>> {
    check_compatible(a, b)?;

    let child = a
        .iter()
        .zip(b)
        .map(|(la, lb)| {
            let mut layer = la.clone();
            for (v, &other) in layer
                .weights
                .iter_mut()
                .chain(layer.bias.iter_mut())
                .zip(lb.weights.iter().chain(lb.bias.iter()))
            {
                if rng.gen_bool(0.5) {
                    *v = other;
                }
            }
            layer
        })
        .collect();

    Ok(child)
}

/// Ensure two layer sets have identical names and shapes.
pub fn check_compatible(a: &[Dense], b: &[Dense]) -> Result<()> {
    if a.len() != b.len() {
        return Err(NcaError::ParameterMismatch(format!(
            "{} layers vs {} layers",
            a.len(),
            b.len()
        )));
    }
    for (la, lb) in a.iter().zip(b) {
        if !la.same_shape(lb) {
            return Err(NcaError::ParameterMismatch(format!(
                "layer {} ({}x{}) vs {} ({}x{})",
                la.name, la.outputs, la.inputs, lb.name, lb.outputs, lb.inputs
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_forward() {
        let layer = Dense {
            name: "l".into(),
            inputs: 2,
            outputs: 2,
            weights: vec![1.0, 2.0, -1.0, 0.5],
            bias: vec![0.5, 0.0],
        };
        let mut out = [0.0; 2];
        layer.forward_into(&[1.0, 1.0], &mut out);
        assert_eq!(out, [3.5, -0.5]);
    }

    #[test]
    fn test_xavier_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        let layer = Dense::initialized("l", 10, 14, &WeightInit::Xavier, &mut rng);
        let limit = (6.0f32 / 24.0).sqrt();
        assert!(layer.weights.iter().all(|w| w.abs() <= limit));
        assert!(layer.weights.iter().any(|&w| w != 0.0));
        assert!(layer.bias.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_mutate_rate_zero_is_identity() {
        let mut rng = StdRng::seed_from_u64(2);
        let original = vec![Dense::initialized("l", 4, 3, &WeightInit::He, &mut rng)];
        let mut layers = original.clone();
        mutate_layers(&mut layers, 0.0, 1.0, &mut rng);
        assert_eq!(layers, original);
    }

    #[test]
    fn test_mutate_bounded_by_strength() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut layers = vec![Dense::zeros("l", 8, 8)];
        mutate_layers(&mut layers, 1.0, 0.1, &mut rng);
        assert!(layers[0].weights.iter().all(|w| w.abs() <= 0.1));
        assert!(layers[0].weights.iter().any(|&w| w != 0.0));
    }

    #[test]
    fn test_crossover_draws_from_parents() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut a = Dense::zeros("l", 16, 16);
        a.weights.fill(1.0);
        let mut b = Dense::zeros("l", 16, 16);
        b.weights.fill(2.0);

        let child = crossover_layers(&[a], &[b], &mut rng).unwrap();
        let ones = child[0].weights.iter().filter(|&&w| w == 1.0).count();
        let twos = child[0].weights.iter().filter(|&&w| w == 2.0).count();
        assert_eq!(ones + twos, 256);
        assert!(ones > 0 && twos > 0);
    }

    #[test]
    fn test_crossover_shape_mismatch() {
        let mut rng = StdRng::seed_from_u64(5);
        let a = vec![Dense::zeros("l", 4, 4)];
        let b = vec![Dense::zeros("l", 4, 5)];
        assert!(matches!(
            crossover_layers(&a, &b, &mut rng),
            Err(NcaError::ParameterMismatch(_))
        ));
    }
}
