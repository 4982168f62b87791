//! Gradient computation using Sobel filters.
//!
//! Addressing follows the grid: toroidal grids wrap, bounded grids read
//! absent neighbors as zero.

use super::Grid;

/// Sobel filter kernels for gradient computation, indexed `[ky][kx]`.
pub const SOBEL_X: [[f32; 3]; 3] = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];

pub const SOBEL_Y: [[f32; 3]; 3] = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

/// Sobel gradient of one channel at `(x, y)`, normalized by 1/8.
#[inline]
pub fn sobel_at(grid: &Grid, x: isize, y: isize, channel: usize) -> (f32, f32) {
    let mut gx = 0.0f32;
    let mut gy = 0.0f32;

    for (ky, (row_x, row_y)) in SOBEL_X.iter().zip(SOBEL_Y.iter()).enumerate() {
        for kx in 0..3 {
            let val = grid.get_channel(x + kx as isize - 1, y + ky as isize - 1, channel);
            gx += row_x[kx] * val;
            gy += row_y[kx] * val;
        }
    }

    (gx * 0.125, gy * 0.125)
}

/// Compute the gradient of one channel over the whole grid.
/// Returns (gradient_x, gradient_y) as flat row-major vectors.
pub fn sobel_gradient(grid: &Grid, channel: usize) -> (Vec<f32>, Vec<f32>) {
    let width = grid.width();
    let height = grid.height();
    let mut grad_x = vec![0.0f32; width * height];
    let mut grad_y = vec![0.0f32; width * height];

    for y in 0..height {
        for x in 0..width {
            let (gx, gy) = sobel_at(grid, x as isize, y as isize, channel);
            grad_x[y * width + x] = gx;
            grad_y[y * width + x] = gy;
        }
    }

    (grad_x, grad_y)
}

/// Squared Sobel magnitude `gx² + gy²` of one channel, row-major.
pub fn gradient_energy(grid: &Grid, channel: usize) -> Vec<f32> {
    let (grad_x, grad_y) = sobel_gradient(grid, channel);
    grad_x
        .into_iter()
        .zip(grad_y)
        .map(|(gx, gy)| gx * gx + gy * gy)
        .collect()
}
