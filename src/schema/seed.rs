//! Fill modes for initializing NCA grids.

use rand::Rng;
use serde::{Deserialize, Serialize};

fn default_amplitude() -> f32 {
    1.0
}

fn default_disk_radius() -> f32 {
    0.25
}

fn default_noise_scale() -> usize {
    8
}

/// Predefined grid fill patterns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FillMode {
    /// All channels zero.
    Zero,
    /// Independent uniform noise in `[0, amplitude)` per value.
    Random {
        #[serde(default = "default_amplitude")]
        amplitude: f32,
    },
    /// Filled disk at the grid center.
    Disk {
        /// Radius as fraction of the smaller grid dimension.
        #[serde(default = "default_disk_radius")]
        radius: f32,
        /// Value written to every channel inside the disk.
        #[serde(default = "default_amplitude")]
        value: f32,
    },
    /// Smoothly interpolated lattice noise.
    Noise {
        /// Lattice spacing in cells.
        #[serde(default = "default_noise_scale")]
        scale: usize,
    },
    /// Linear ramp from 0 at the left edge to 1 at the right edge.
    Gradient,
}

impl Default for FillMode {
    fn default() -> Self {
        FillMode::Disk {
            radius: default_disk_radius(),
            value: default_amplitude(),
        }
    }
}

impl FillMode {
    /// Write the pattern into a cell-interleaved buffer of `width * height * channels` values.
    pub fn generate_into<R: Rng>(
        &self,
        data: &mut [f32],
        width: usize,
        height: usize,
        channels: usize,
        rng: &mut R,
    ) {
        debug_assert_eq!(data.len(), width * height * channels);

        match self {
            FillMode::Zero => data.fill(0.0),
            FillMode::Random { amplitude } => {
                for v in data.iter_mut() {
                    *v = amplitude * rng.r#gen::<f32>();
                }
            }
            FillMode::Disk { radius, value } => {
                let cx = (width as f32 - 1.0) / 2.0;
                let cy = (height as f32 - 1.0) / 2.0;
                let r = radius * width.min(height) as f32;
                let r_sq = r * r;
                for y in 0..height {
                    for x in 0..width {
                        let dx = x as f32 - cx;
                        let dy = y as f32 - cy;
                        let v = if dx * dx + dy * dy <= r_sq { *value } else { 0.0 };
                        let base = (y * width + x) * channels;
                        data[base..base + channels].fill(v);
                    }
                }
            }
            FillMode::Noise { scale } => {
                apply_value_noise(data, width, height, channels, (*scale).max(1), rng);
            }
            FillMode::Gradient => {
                let denom = (width.max(2) - 1) as f32;
                for y in 0..height {
                    for x in 0..width {
                        let base = (y * width + x) * channels;
                        data[base..base + channels].fill(x as f32 / denom);
                    }
                }
            }
        }
    }
}

/// Bilinear value noise with smoothstep easing over a random lattice.
fn apply_value_noise<R: Rng>(
    data: &mut [f32],
    width: usize,
    height: usize,
    channels: usize,
    scale: usize,
    rng: &mut R,
) {
    let lattice_w = width / scale + 2;
    let lattice_h = height / scale + 2;
    let lattice: Vec<f32> = (0..lattice_w * lattice_h * channels)
        .map(|_| rng.r#gen::<f32>())
        .collect();
    let at = |lx: usize, ly: usize, c: usize| lattice[(ly * lattice_w + lx) * channels + c];

    for y in 0..height {
        let fy = y as f32 / scale as f32;
        let ly = fy.floor() as usize;
        let ty = smoothstep(fy - ly as f32);
        for x in 0..width {
            let fx = x as f32 / scale as f32;
            let lx = fx.floor() as usize;
            let tx = smoothstep(fx - lx as f32);
            let base = (y * width + x) * channels;
            for c in 0..channels {
                let top = lerp(at(lx, ly, c), at(lx + 1, ly, c), tx);
                let bottom = lerp(at(lx, ly + 1, c), at(lx + 1, ly + 1, c), tx);
                data[base + c] = lerp(top, bottom, ty);
            }
        }
    }
}

#[inline]
fn smoothstep(t: f32) -> f32 {
    t * t * (3.0 - 2.0 * t)
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_disk_is_centered() {
        let mut data = vec![0.0; 9 * 9];
        let mut rng = StdRng::seed_from_u64(0);
        FillMode::Disk {
            radius: 0.25,
            value: 1.0,
        }
        .generate_into(&mut data, 9, 9, 1, &mut rng);

        assert_eq!(data[4 * 9 + 4], 1.0);
        assert_eq!(data[0], 0.0);
        assert_eq!(data[8 * 9 + 8], 0.0);
    }

    #[test]
    fn test_noise_in_unit_range() {
        let mut data = vec![0.0; 20 * 12 * 2];
        let mut rng = StdRng::seed_from_u64(3);
        FillMode::Noise { scale: 4 }.generate_into(&mut data, 20, 12, 2, &mut rng);
        assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(data.iter().any(|&v| v > 0.0));
    }

    #[test]
    fn test_gradient_ramp() {
        let mut data = vec![0.0; 5 * 2];
        let mut rng = StdRng::seed_from_u64(0);
        FillMode::Gradient.generate_into(&mut data, 5, 2, 1, &mut rng);
        assert_eq!(&data[..5], &[0.0, 0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_fill_mode_json_tags() {
        let mode: FillMode = serde_json::from_str(r#"{"type": "random"}"#).unwrap();
        assert_eq!(mode, FillMode::Random { amplitude: 1.0 });
    }
}
