//! Neighborhood perception.
//!
//! A perception kernel is an ordered list of weighted offsets ("taps"). Sampling
//! a grid produces, for every cell in row-major order, every tap in build order,
//! and every channel, the neighbor value times the tap weight:
//!
//! ```text
//! features[cell * field_size * channels + tap * channels + channel]
//! ```
//!
//! Evolvers index feature vectors with exactly this layout. When the center is
//! part of the kernel it is always tap 0, so the leading `channels` values of a
//! cell's features are its own (weighted) state.

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;

use crate::schema::{ConfigError, KernelType, PerceptionConfig};

use super::{Grid, SOBEL_X, SOBEL_Y};

/// Role of a tap in a structured kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapTag {
    Identity,
    GradientX,
    GradientY,
}

/// One weighted offset of a perception kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelTap {
    pub dx: isize,
    pub dy: isize,
    pub weight: f32,
    pub tag: Option<TapTag>,
}

impl KernelTap {
    fn plain(dx: isize, dy: isize, weight: f32) -> Self {
        Self {
            dx,
            dy,
            weight,
            tag: None,
        }
    }
}

/// Immutable perception kernel.
#[derive(Debug, Clone)]
pub struct Perception {
    taps: Vec<KernelTap>,
    channels: usize,
}

impl Perception {
    /// Build the kernel for grids with `channels` channels.
    pub fn new(config: &PerceptionConfig, channels: usize) -> Result<Self, ConfigError> {
        if channels == 0 {
            return Err(ConfigError::InvalidChannels);
        }

        let taps = match config.kind {
            KernelType::Moore => {
                distance_taps(config.radius, config.include_center, |dx, dy| {
                    dx.abs().max(dy.abs())
                })
            }
            KernelType::VonNeumann => {
                distance_taps(config.radius, config.include_center, |dx, dy| {
                    dx.abs() + dy.abs()
                })
            }
            KernelType::Sobel => sobel_taps(),
            KernelType::Custom => {
                let matrix = config
                    .custom_kernel
                    .as_ref()
                    .ok_or(ConfigError::MissingCustomKernel)?;
                custom_taps(matrix, config.include_center)?
            }
        };

        if taps.is_empty() {
            return Err(ConfigError::EmptyKernel);
        }

        Ok(Self { taps, channels })
    }

    /// Number of taps.
    #[inline]
    pub fn field_size(&self) -> usize {
        self.taps.len()
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Feature-vector width of one cell (`field_size * channels`).
    #[inline]
    pub fn features_per_cell(&self) -> usize {
        self.taps.len() * self.channels
    }

    pub fn taps(&self) -> &[KernelTap] {
        &self.taps
    }

    /// Index of the `(0, 0)` tap, if the kernel contains one.
    pub fn center_index(&self) -> Option<usize> {
        self.taps.iter().position(|t| t.dx == 0 && t.dy == 0)
    }

    /// Sample every cell of the grid.
    pub fn sample(&self, grid: &Grid) -> Vec<f32> {
        let mut out = vec![0.0f32; grid.cell_count() * self.features_per_cell()];
        self.sample_into(grid, &mut out);
        out
    }

    /// Sample every cell into a pre-allocated buffer.
    pub fn sample_into(&self, grid: &Grid, out: &mut [f32]) {
        debug_assert_eq!(grid.channels(), self.channels);
        debug_assert_eq!(out.len(), grid.cell_count() * self.features_per_cell());

        let width = grid.width();
        let per_cell = self.features_per_cell();

        #[cfg(not(target_arch = "wasm32"))]
        out.par_chunks_mut(per_cell)
            .enumerate()
            .for_each(|(cell, chunk)| {
                self.sample_cell_into(grid, (cell % width) as isize, (cell / width) as isize, chunk)
            });

        #[cfg(target_arch = "wasm32")]
        for (cell, chunk) in out.chunks_mut(per_cell).enumerate() {
            self.sample_cell_into(grid, (cell % width) as isize, (cell / width) as isize, chunk);
        }
    }

    /// Sample a single cell.
    pub fn sample_cell(&self, grid: &Grid, x: isize, y: isize) -> Vec<f32> {
        let mut out = vec![0.0f32; self.features_per_cell()];
        self.sample_cell_into(grid, x, y, &mut out);
        out
    }

    /// Sample a single cell into `out` (length `features_per_cell`).
    pub fn sample_cell_into(&self, grid: &Grid, x: isize, y: isize, out: &mut [f32]) {
        let channels = self.channels;
        for (tap, chunk) in self.taps.iter().zip(out.chunks_exact_mut(channels)) {
            match grid.get(x + tap.dx, y + tap.dy) {
                Some(values) => {
                    for (o, &v) in chunk.iter_mut().zip(values) {
                        *o = v * tap.weight;
                    }
                }
                None => chunk.fill(0.0),
            }
        }
    }
}

/// Center first (when kept), then all offsets within `radius` in row-major order.
///
/// The center is hoisted, so the feature layout is not that of a row-major
/// `(2r+1)²` kernel: the cell's own state always sits at tap 0.
fn distance_taps<F>(radius: usize, include_center: bool, distance: F) -> Vec<KernelTap>
where
    F: Fn(isize, isize) -> isize,
{
    let r = radius as isize;
    let mut taps = Vec::new();
    if include_center {
        taps.push(KernelTap::plain(0, 0, 1.0));
    }
    for dy in -r..=r {
        for dx in -r..=r {
            if (dx == 0 && dy == 0) || distance(dx, dy) > r {
                continue;
            }
            taps.push(KernelTap::plain(dx, dy, 1.0));
        }
    }
    taps
}

/// Identity tap followed by the non-zero Sobel-x and Sobel-y taps, gradients divided by 4.
fn sobel_taps() -> Vec<KernelTap> {
    let mut taps = vec![KernelTap {
        dx: 0,
        dy: 0,
        weight: 1.0,
        tag: Some(TapTag::Identity),
    }];
    for (kernel, tag) in [(SOBEL_X, TapTag::GradientX), (SOBEL_Y, TapTag::GradientY)] {
        for (ky, row) in kernel.iter().enumerate() {
            for (kx, &w) in row.iter().enumerate() {
                if w != 0.0 {
                    taps.push(KernelTap {
                        dx: kx as isize - 1,
                        dy: ky as isize - 1,
                        weight: w / 4.0,
                        tag: Some(tag),
                    });
                }
            }
        }
    }
    taps
}

/// Non-zero entries of a weight matrix centred on its middle element. Both
/// dimensions must be odd.
fn custom_taps(matrix: &[Vec<f32>], force_center: bool) -> Result<Vec<KernelTap>, ConfigError> {
    let rows = matrix.len();
    let cols = matrix.first().map(Vec::len).unwrap_or(0);
    if rows % 2 == 0 || cols % 2 == 0 || matrix.iter().any(|row| row.len() != cols) {
        return Err(ConfigError::MalformedCustomKernel);
    }

    let cy = (rows / 2) as isize;
    let cx = (cols / 2) as isize;
    let center = matrix[rows / 2][cols / 2];

    let mut taps = Vec::new();
    if center != 0.0 || force_center {
        taps.push(KernelTap::plain(0, 0, center));
    }
    for (ky, row) in matrix.iter().enumerate() {
        for (kx, &w) in row.iter().enumerate() {
            let dx = kx as isize - cx;
            let dy = ky as isize - cy;
            if (dx == 0 && dy == 0) || w == 0.0 {
                continue;
            }
            taps.push(KernelTap::plain(dx, dy, w));
        }
    }
    Ok(taps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(kind: KernelType, radius: usize, include_center: bool) -> PerceptionConfig {
        PerceptionConfig {
            radius,
            kind,
            include_center,
            custom_kernel: None,
        }
    }

    fn custom_config() -> PerceptionConfig {
        PerceptionConfig {
            radius: 1,
            kind: KernelType::Custom,
            include_center: false,
            custom_kernel: Some(vec![
                vec![0.0, 0.5, 0.0],
                vec![0.25, 0.0, -0.25],
                vec![0.0, 0.0, 0.0],
            ]),
        }
    }

    fn test_grid(wrap: bool) -> Grid {
        let mut grid = Grid::new(6, 4, 2, wrap).unwrap();
        grid.fill_with(|x, y, c| ((x * 7 + y * 3 + c * 5) % 11) as f32 / 10.0);
        grid
    }

    #[test]
    fn test_field_sizes() {
        let moore = Perception::new(&config(KernelType::Moore, 1, true), 1).unwrap();
        assert_eq!(moore.field_size(), 9);
        let moore = Perception::new(&config(KernelType::Moore, 2, false), 1).unwrap();
        assert_eq!(moore.field_size(), 24);
        let vn = Perception::new(&config(KernelType::VonNeumann, 1, true), 3).unwrap();
        assert_eq!(vn.field_size(), 5);
        assert_eq!(vn.features_per_cell(), 15);
        let sobel = Perception::new(&config(KernelType::Sobel, 1, false), 1).unwrap();
        assert_eq!(sobel.field_size(), 13);
        let custom = Perception::new(&custom_config(), 1).unwrap();
        assert_eq!(custom.field_size(), 3);
    }

    #[test]
    fn test_center_comes_first() {
        let p = Perception::new(&config(KernelType::Moore, 1, true), 1).unwrap();
        assert_eq!(p.center_index(), Some(0));
        let p = Perception::new(&config(KernelType::Moore, 1, false), 1).unwrap();
        assert_eq!(p.center_index(), None);
        assert_eq!((p.taps()[0].dx, p.taps()[0].dy), (-1, -1));
    }

    #[test]
    fn test_custom_forced_center() {
        let mut cfg = custom_config();
        cfg.include_center = true;
        let p = Perception::new(&cfg, 1).unwrap();
        assert_eq!(p.field_size(), 4);
        assert_eq!(p.taps()[0].weight, 0.0);
    }

    #[test]
    fn test_sobel_weights() {
        let p = Perception::new(&config(KernelType::Sobel, 1, true), 1).unwrap();
        let taps = p.taps();
        assert_eq!(taps[0].tag, Some(TapTag::Identity));
        assert_eq!(taps[0].weight, 1.0);
        let gx: f32 = taps
            .iter()
            .filter(|t| t.tag == Some(TapTag::GradientX))
            .map(|t| t.weight.abs())
            .sum();
        assert!((gx - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_kernel_rejected() {
        assert!(matches!(
            Perception::new(&config(KernelType::Moore, 0, false), 1),
            Err(ConfigError::EmptyKernel)
        ));
    }

    #[test]
    fn test_even_custom_kernel_rejected() {
        for matrix in [
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            vec![vec![1.0, 1.0, 1.0], vec![1.0, 1.0, 1.0]],
            vec![vec![0.5, 1.0]],
        ] {
            let cfg = PerceptionConfig {
                kind: KernelType::Custom,
                custom_kernel: Some(matrix),
                ..config(KernelType::Custom, 1, true)
            };
            assert!(matches!(
                Perception::new(&cfg, 1),
                Err(ConfigError::MalformedCustomKernel)
            ));
        }
    }

    #[test]
    fn test_sample_cell_matches_sample() {
        let configs = [
            config(KernelType::Moore, 1, true),
            config(KernelType::Moore, 2, false),
            config(KernelType::VonNeumann, 2, true),
            config(KernelType::Sobel, 1, true),
            custom_config(),
        ];

        for wrap in [true, false] {
            let grid = test_grid(wrap);
            for cfg in &configs {
                let p = Perception::new(cfg, grid.channels()).unwrap();
                let all = p.sample(&grid);
                let per_cell = p.features_per_cell();
                assert_eq!(all.len(), grid.cell_count() * per_cell);

                for y in 0..grid.height() {
                    for x in 0..grid.width() {
                        let cell = y * grid.width() + x;
                        let single = p.sample_cell(&grid, x as isize, y as isize);
                        let slice = &all[cell * per_cell..(cell + 1) * per_cell];
                        assert!(
                            single
                                .iter()
                                .zip(slice)
                                .all(|(a, b)| a.to_bits() == b.to_bits()),
                            "mismatch at ({}, {}) for {:?}",
                            x,
                            y,
                            cfg.kind
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_layout_and_absent_neighbors() {
        let grid = test_grid(false);
        let p = Perception::new(&config(KernelType::Moore, 1, true), 2).unwrap();
        let features = p.sample_cell(&grid, 0, 0);

        // Tap 0 is the cell itself
        assert_eq!(&features[..2], grid.get(0, 0).unwrap());
        // Tap 1 is (-1, -1): absent on a bounded grid
        assert_eq!(&features[2..4], &[0.0, 0.0]);
        // Last tap is (1, 1)
        assert_eq!(&features[16..18], grid.get(1, 1).unwrap());
    }
}
