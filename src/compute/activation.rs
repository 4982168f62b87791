//! Activation functions for evolver layers.

use crate::schema::Activation;

const LEAKY_SLOPE: f32 = 0.01;
/// sqrt(2 / pi)
const GELU_SCALE: f32 = 0.797_884_6;

impl Activation {
    /// Apply the activation to a single value.
    #[inline]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::LeakyRelu => {
                if x > 0.0 {
                    x
                } else {
                    LEAKY_SLOPE * x
                }
            }
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => sigmoid(x),
            Activation::Gelu => 0.5 * x * (1.0 + (GELU_SCALE * (x + 0.044715 * x * x * x)).tanh()),
            Activation::Sin => x.sin(),
            Activation::Identity => x,
        }
    }

    /// Apply the activation in place.
    #[inline]
    pub fn apply_slice(self, values: &mut [f32]) {
        for v in values {
            *v = self.apply(*v);
        }
    }
}

/// Logistic sigmoid.
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relu_family() {
        assert_eq!(Activation::Relu.apply(-2.0), 0.0);
        assert_eq!(Activation::Relu.apply(1.5), 1.5);
        assert!((Activation::LeakyRelu.apply(-2.0) + 0.02).abs() < 1e-7);
        assert_eq!(Activation::Identity.apply(-3.0), -3.0);
    }

    #[test]
    fn test_squashing() {
        assert!((Activation::Sigmoid.apply(0.0) - 0.5).abs() < 1e-6);
        assert!(Activation::Tanh.apply(50.0) <= 1.0);
        assert!((Activation::Sin.apply(std::f32::consts::FRAC_PI_2) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_gelu_shape() {
        assert_eq!(Activation::Gelu.apply(0.0), 0.0);
        assert!((Activation::Gelu.apply(3.0) - 3.0).abs() < 0.01);
        assert!(Activation::Gelu.apply(-3.0).abs() < 0.01);
    }
}
