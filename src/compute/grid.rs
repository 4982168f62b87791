//! Multi-channel cell grid with toroidal or bounded addressing.
//!
//! Values are stored contiguously, row-major and cell-interleaved:
//! `index = (y * width + x) * channels + c`.

use std::sync::OnceLock;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{NcaError, Result};
use crate::schema::{ConfigError, FillMode};

/// Per-channel summary of a grid plus its populated-cell count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridStats {
    pub mean: Vec<f32>,
    pub variance: Vec<f32>,
    pub min: Vec<f32>,
    pub max: Vec<f32>,
    pub sum: Vec<f32>,
    /// Cells whose channel 0 exceeds the activity threshold.
    pub population: usize,
    /// `population / cell_count`.
    pub density: f32,
}

/// Raw input accepted by [`Grid::set_data`].
#[derive(Debug, Clone, Copy)]
pub enum CellBuffer<'a> {
    /// Copied verbatim.
    Float(&'a [f32]),
    /// Rescaled linearly from `0..=255` to `[0, 1]`.
    Bytes(&'a [u8]),
}

impl CellBuffer<'_> {
    pub fn len(&self) -> usize {
        match self {
            CellBuffer::Float(data) => data.len(),
            CellBuffer::Bytes(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> From<&'a [f32]> for CellBuffer<'a> {
    fn from(data: &'a [f32]) -> Self {
        CellBuffer::Float(data)
    }
}

impl<'a> From<&'a Vec<f32>> for CellBuffer<'a> {
    fn from(data: &'a Vec<f32>) -> Self {
        CellBuffer::Float(data)
    }
}

impl<'a> From<&'a [u8]> for CellBuffer<'a> {
    fn from(data: &'a [u8]) -> Self {
        CellBuffer::Bytes(data)
    }
}

impl<'a> From<&'a Vec<u8>> for CellBuffer<'a> {
    fn from(data: &'a Vec<u8>) -> Self {
        CellBuffer::Bytes(data)
    }
}

/// Neighborhood shape for [`Grid::get_neighborhood`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Chebyshev distance.
    Moore,
    /// Manhattan distance.
    VonNeumann,
}

/// One entry of a neighborhood query. `values` is `None` for absent cells.
#[derive(Debug, Clone, Copy)]
pub struct Neighbor<'a> {
    pub dx: isize,
    pub dy: isize,
    pub values: Option<&'a [f32]>,
}

/// Canonical cell-state buffer.
#[derive(Debug, Clone)]
pub struct Grid {
    width: usize,
    height: usize,
    channels: usize,
    wrap: bool,
    activity_threshold: f32,
    data: Vec<f32>,
    /// Cleared by every mutator, filled on the next `stats()` read.
    stats: OnceLock<GridStats>,
}

impl Grid {
    /// Create a zeroed grid.
    pub fn new(
        width: usize,
        height: usize,
        channels: usize,
        wrap: bool,
    ) -> std::result::Result<Self, ConfigError> {
        if width == 0 || height == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if channels == 0 {
            return Err(ConfigError::InvalidChannels);
        }

        Ok(Self {
            width,
            height,
            channels,
            wrap,
            activity_threshold: 0.1,
            data: vec![0.0; width * height * channels],
            stats: OnceLock::new(),
        })
    }

    /// Set the channel-0 threshold used for population counts.
    pub fn with_activity_threshold(mut self, threshold: f32) -> Self {
        self.activity_threshold = threshold;
        self.invalidate();
        self
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn wraps(&self) -> bool {
        self.wrap
    }

    #[inline]
    pub fn activity_threshold(&self) -> f32 {
        self.activity_threshold
    }

    /// Number of cells.
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.width * self.height
    }

    /// Raw buffer length (`cell_count * channels`).
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the raw cell-interleaved buffer.
    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Map signed coordinates to a cell index, wrapping or rejecting per addressing mode.
    #[inline]
    pub fn resolve(&self, x: isize, y: isize) -> Option<usize> {
        let w = self.width as isize;
        let h = self.height as isize;
        if self.wrap {
            let xx = x.rem_euclid(w) as usize;
            let yy = y.rem_euclid(h) as usize;
            Some(yy * self.width + xx)
        } else if x < 0 || y < 0 || x >= w || y >= h {
            None
        } else {
            Some(y as usize * self.width + x as usize)
        }
    }

    /// Channel slice of the cell at `(x, y)`, `None` when absent.
    #[inline]
    pub fn get(&self, x: isize, y: isize) -> Option<&[f32]> {
        self.resolve(x, y).map(|cell| {
            let base = cell * self.channels;
            &self.data[base..base + self.channels]
        })
    }

    /// Single channel value, 0 for absent cells.
    #[inline]
    pub fn get_channel(&self, x: isize, y: isize, channel: usize) -> f32 {
        if channel >= self.channels {
            return 0.0;
        }
        self.resolve(x, y)
            .map(|cell| self.data[cell * self.channels + channel])
            .unwrap_or(0.0)
    }

    /// Write up to `channels` values into a cell. Returns false for absent cells.
    pub fn set(&mut self, x: isize, y: isize, values: &[f32]) -> bool {
        let Some(cell) = self.resolve(x, y) else {
            return false;
        };
        let base = cell * self.channels;
        let n = values.len().min(self.channels);
        self.data[base..base + n].copy_from_slice(&values[..n]);
        self.invalidate();
        true
    }

    /// Write one channel of a cell. Returns false for absent cells or channels.
    pub fn set_channel(&mut self, x: isize, y: isize, channel: usize, value: f32) -> bool {
        if channel >= self.channels {
            return false;
        }
        let Some(cell) = self.resolve(x, y) else {
            return false;
        };
        self.data[cell * self.channels + channel] = value;
        self.invalidate();
        true
    }

    /// Replace the whole buffer. Leaves the grid untouched on a length mismatch.
    pub fn set_data<'a>(&mut self, buffer: impl Into<CellBuffer<'a>>) -> Result<()> {
        let buffer = buffer.into();
        if buffer.len() != self.data.len() {
            return Err(NcaError::ShapeMismatch {
                expected: self.data.len(),
                actual: buffer.len(),
            });
        }

        match buffer {
            CellBuffer::Float(src) => self.data.copy_from_slice(src),
            CellBuffer::Bytes(src) => {
                for (dst, &b) in self.data.iter_mut().zip(src) {
                    *dst = b as f32 / 255.0;
                }
            }
        }
        self.invalidate();
        Ok(())
    }

    /// Fill from a predefined pattern.
    pub fn fill<R: Rng>(&mut self, mode: &FillMode, rng: &mut R) {
        mode.generate_into(
            &mut self.data,
            self.width,
            self.height,
            self.channels,
            rng,
        );
        self.invalidate();
    }

    /// Fill every value from `generator(x, y, channel)`.
    pub fn fill_with<F>(&mut self, mut generator: F)
    where
        F: FnMut(usize, usize, usize) -> f32,
    {
        for y in 0..self.height {
            for x in 0..self.width {
                let base = (y * self.width + x) * self.channels;
                for c in 0..self.channels {
                    self.data[base + c] = generator(x, y, c);
                }
            }
        }
        self.invalidate();
    }

    /// All offsets within `radius` of `(x, y)` (center excluded), row-major by offset.
    pub fn get_neighborhood(
        &self,
        x: isize,
        y: isize,
        radius: usize,
        connectivity: Connectivity,
    ) -> Vec<Neighbor<'_>> {
        let r = radius as isize;
        let mut out = Vec::with_capacity((2 * radius + 1).pow(2));
        for dy in -r..=r {
            for dx in -r..=r {
                if dx == 0 && dy == 0 {
                    continue;
                }
                if connectivity == Connectivity::VonNeumann && dx.abs() + dy.abs() > r {
                    continue;
                }
                out.push(Neighbor {
                    dx,
                    dy,
                    values: self.get(x + dx, y + dy),
                });
            }
        }
        out
    }

    /// Cached statistics, computed at most once per mutation.
    pub fn stats(&self) -> &GridStats {
        self.stats.get_or_init(|| self.compute_stats())
    }

    /// Whether the statistics cache currently holds a value.
    #[inline]
    pub fn stats_cached(&self) -> bool {
        self.stats.get().is_some()
    }

    fn invalidate(&mut self) {
        self.stats.take();
    }

    fn compute_stats(&self) -> GridStats {
        let channels = self.channels;
        let cells = self.cell_count();
        let mut sum = vec![0.0f32; channels];
        let mut min = vec![f32::INFINITY; channels];
        let mut max = vec![f32::NEG_INFINITY; channels];
        let mut population = 0usize;

        for cell in self.data.chunks_exact(channels) {
            for (c, &v) in cell.iter().enumerate() {
                sum[c] += v;
                min[c] = min[c].min(v);
                max[c] = max[c].max(v);
            }
            if cell[0] > self.activity_threshold {
                population += 1;
            }
        }

        let mean: Vec<f32> = sum.iter().map(|s| s / cells as f32).collect();
        let mut variance = vec![0.0f32; channels];
        for cell in self.data.chunks_exact(channels) {
            for (c, &v) in cell.iter().enumerate() {
                let d = v - mean[c];
                variance[c] += d * d;
            }
        }
        for v in &mut variance {
            *v /= cells as f32;
        }

        log::trace!(
            "grid stats recomputed: {}x{}x{}, population {}",
            self.width,
            self.height,
            channels,
            population
        );

        GridStats {
            mean,
            variance,
            min,
            max,
            sum,
            population,
            density: population as f32 / cells as f32,
        }
    }

    /// 8-bit RGBA rendering of up to four channels.
    ///
    /// One channel renders as grayscale; missing color channels are 0 and a
    /// missing alpha channel is 255.
    pub fn to_pixel_buffer(&self) -> Vec<u8> {
        let mut pixels = Vec::with_capacity(self.cell_count() * 4);
        for cell in self.data.chunks_exact(self.channels) {
            let rgba = match cell {
                [v] => {
                    let g = to_byte(*v);
                    [g, g, g, 255]
                }
                [r, g] => [to_byte(*r), to_byte(*g), 0, 255],
                [r, g, b] => [to_byte(*r), to_byte(*g), to_byte(*b), 255],
                [r, g, b, a, ..] => [to_byte(*r), to_byte(*g), to_byte(*b), to_byte(*a)],
                [] => [0, 0, 0, 255],
            };
            pixels.extend_from_slice(&rgba);
        }
        pixels
    }
}

#[inline]
fn to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}
