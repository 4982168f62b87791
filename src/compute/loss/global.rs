//! Population-global losses.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::compute::Grid;
use crate::schema::{GlobalLossConfig, GlobalLossKind};

use super::{Loss, LossContext};

const ENTROPY_BINS: usize = 32;

/// One recorded point of the rolling history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSample {
    pub generation: u64,
    pub density: f32,
    /// Per-channel means.
    pub means: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct GlobalLoss {
    kind: GlobalLossKind,
    target_density: f32,
    target_entropy: Option<f32>,
    history_length: usize,
    history: VecDeque<GlobalSample>,
}

impl GlobalLoss {
    pub fn new(config: &GlobalLossConfig) -> Self {
        Self {
            kind: config.kind,
            target_density: config.target_density,
            target_entropy: config.target_entropy,
            history_length: config.history_length,
            history: VecDeque::with_capacity(config.history_length),
        }
    }

    pub fn kind(&self) -> GlobalLossKind {
        self.kind
    }

    /// Recorded samples, oldest first.
    pub fn history(&self) -> &VecDeque<GlobalSample> {
        &self.history
    }

    /// Replace the history, keeping at most the newest `history_length` samples.
    pub fn load_history(&mut self, samples: impl IntoIterator<Item = GlobalSample>) {
        self.history.clear();
        for sample in samples {
            self.record(sample);
        }
    }

    fn record(&mut self, sample: GlobalSample) {
        if self.history_length == 0 {
            return;
        }
        while self.history.len() >= self.history_length {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }

    fn measure(&self, grid: &Grid) -> f32 {
        match self.kind {
            GlobalLossKind::Density => {
                let d = grid.stats().density - self.target_density;
                d * d
            }
            GlobalLossKind::Entropy => {
                let h = compute_entropy(grid);
                match self.target_entropy {
                    Some(target) => (h - target) * (h - target),
                    None => h,
                }
            }
            GlobalLossKind::Stability => compute_stability(grid, self.history.back()),
            GlobalLossKind::Complexity => compute_complexity(grid),
            GlobalLossKind::Distribution => compute_distribution(grid),
            GlobalLossKind::Periodicity => {
                let mut series: Vec<f32> = self.history.iter().map(|s| s.density).collect();
                series.push(grid.stats().density);
                compute_periodicity(&series)
            }
            GlobalLossKind::Diversity => compute_diversity(&grid.stats().mean),
        }
    }
}

impl Loss for GlobalLoss {
    fn name(&self) -> &str {
        self.kind.name()
    }

    /// Measure the grid, then record a sample when `ctx.generation` is set.
    fn compute(&mut self, grid: &Grid, ctx: &LossContext<'_>) -> f32 {
        let value = self.measure(grid);
        if let Some(generation) = ctx.generation {
            let stats = grid.stats();
            self.record(GlobalSample {
                generation,
                density: stats.density,
                means: stats.mean.clone(),
            });
        }
        value
    }

    fn reset(&mut self) {
        self.history.clear();
    }
}

/// Shannon entropy of a 32-bin histogram over every sample, normalized to `[0, 1]`.
fn compute_entropy(grid: &Grid) -> f32 {
    let data = grid.data();
    let mut bins = [0usize; ENTROPY_BINS];
    for &v in data {
        let bin = (v.clamp(0.0, 1.0) * ENTROPY_BINS as f32) as usize;
        bins[bin.min(ENTROPY_BINS - 1)] += 1;
    }

    let n = data.len() as f32;
    let h: f32 = bins
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f32 / n;
            -p * p.ln()
        })
        .sum();
    h / (ENTROPY_BINS as f32).ln()
}

/// `|Δdensity| + mean |Δmean|` against the previous sample; zero without one.
fn compute_stability(grid: &Grid, previous: Option<&GlobalSample>) -> f32 {
    let Some(previous) = previous else {
        return 0.0;
    };
    let stats = grid.stats();
    let channels = stats.mean.len().min(previous.means.len());
    let mean_delta = if channels == 0 {
        0.0
    } else {
        stats
            .mean
            .iter()
            .zip(&previous.means)
            .map(|(a, b)| (a - b).abs())
            .sum::<f32>()
            / channels as f32
    };
    (stats.density - previous.density).abs() + mean_delta
}

/// Alive/dead transitions along the row-major channel-0 sequence, per cell.
fn compute_complexity(grid: &Grid) -> f32 {
    let threshold = grid.activity_threshold();
    let alive: Vec<bool> = grid
        .data()
        .chunks_exact(grid.channels())
        .map(|cell| cell[0] > threshold)
        .collect();
    let transitions = alive.windows(2).filter(|w| w[0] != w[1]).count();
    transitions as f32 / grid.cell_count() as f32
}

/// Variance of channel-0 density across the four quadrants.
fn compute_distribution(grid: &Grid) -> f32 {
    let (w, h) = (grid.width(), grid.height());
    let (mx, my) = (w / 2, h / 2);
    let threshold = grid.activity_threshold();

    let quadrants = [(0, mx, 0, my), (mx, w, 0, my), (0, mx, my, h), (mx, w, my, h)];
    let densities: Vec<f32> = quadrants
        .iter()
        .filter(|(x0, x1, y0, y1)| x1 > x0 && y1 > y0)
        .map(|&(x0, x1, y0, y1)| {
            let mut alive = 0usize;
            for y in y0..y1 {
                for x in x0..x1 {
                    if grid.get_channel(x as isize, y as isize, 0) > threshold {
                        alive += 1;
                    }
                }
            }
            alive as f32 / ((x1 - x0) * (y1 - y0)) as f32
        })
        .collect();

    if densities.is_empty() {
        return 0.0;
    }
    let mean = densities.iter().sum::<f32>() / densities.len() as f32;
    densities.iter().map(|d| (d - mean) * (d - mean)).sum::<f32>() / densities.len() as f32
}

/// Maximum normalized autocorrelation over lags `1..=n/2`.
fn compute_periodicity(series: &[f32]) -> f32 {
    let n = series.len();
    if n < 4 {
        return 0.0;
    }
    let mean = series.iter().sum::<f32>() / n as f32;
    let centered: Vec<f32> = series.iter().map(|v| v - mean).collect();
    let energy: f32 = centered.iter().map(|v| v * v).sum();
    if energy <= 1e-12 {
        return 0.0;
    }

    (1..=n / 2)
        .map(|lag| {
            centered
                .iter()
                .zip(&centered[lag..])
                .map(|(a, b)| a * b)
                .sum::<f32>()
                / energy
        })
        .fold(0.0f32, f32::max)
}

/// `1 / (1 + spread)` of the per-channel means.
fn compute_diversity(means: &[f32]) -> f32 {
    let (lo, hi) = means
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &m| {
            (lo.min(m), hi.max(m))
        });
    if lo > hi {
        return 1.0;
    }
    1.0 / (1.0 + (hi - lo))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loss(kind: GlobalLossKind) -> GlobalLoss {
        GlobalLoss::new(&GlobalLossConfig {
            kind,
            history_length: 4,
            ..Default::default()
        })
    }

    fn half_alive() -> Grid {
        let mut grid = Grid::new(4, 4, 1, true).unwrap();
        grid.fill_with(|x, _, _| if x < 2 { 1.0 } else { 0.0 });
        grid
    }

    #[test]
    fn test_density_target() {
        let mut l = loss(GlobalLossKind::Density);
        let value = l.compute(&half_alive(), &LossContext::default());
        assert!((value - 0.04).abs() < 1e-6);
    }

    #[test]
    fn test_history_only_with_generation() {
        let mut l = loss(GlobalLossKind::Density);
        let grid = half_alive();
        l.compute(&grid, &LossContext::default());
        assert!(l.history().is_empty());

        for g in 0..7 {
            l.compute(&grid, &LossContext::at(g));
        }
        let generations: Vec<u64> = l.history().iter().map(|s| s.generation).collect();
        assert_eq!(generations, vec![3, 4, 5, 6]);

        l.reset();
        assert!(l.history().is_empty());
    }

    #[test]
    fn test_entropy_bounds() {
        let mut l = loss(GlobalLossKind::Entropy);
        let mut grid = Grid::new(8, 4, 1, true).unwrap();
        assert_eq!(l.compute(&grid, &LossContext::default()), 0.0);

        // One sample per bin gives maximal entropy
        grid.fill_with(|x, y, _| (y * 8 + x) as f32 / 32.0 + 1.0 / 64.0);
        let h = l.compute(&grid, &LossContext::default());
        assert!((h - 1.0).abs() < 1e-5);

        let mut targeted = GlobalLoss::new(&GlobalLossConfig {
            kind: GlobalLossKind::Entropy,
            target_entropy: Some(0.5),
            ..Default::default()
        });
        assert!((targeted.compute(&grid, &LossContext::default()) - 0.25).abs() < 1e-5);
    }

    #[test]
    fn test_stability_against_previous_sample() {
        let mut l = loss(GlobalLossKind::Stability);
        let empty = Grid::new(4, 4, 1, true).unwrap();
        let grid = half_alive();

        assert_eq!(l.compute(&empty, &LossContext::at(0)), 0.0);
        // density 0 -> 0.5, mean 0 -> 0.5
        assert!((l.compute(&grid, &LossContext::at(1)) - 1.0).abs() < 1e-6);
        assert!(l.compute(&grid, &LossContext::at(2)).abs() < 1e-6);
    }

    #[test]
    fn test_complexity_counts_transitions() {
        let mut l = loss(GlobalLossKind::Complexity);
        // Row-major: 1100 1100 1100 1100 -> 7 transitions
        let value = l.compute(&half_alive(), &LossContext::default());
        assert!((value - 7.0 / 16.0).abs() < 1e-6);
    }

    #[test]
    fn test_distribution_quadrants() {
        let mut l = loss(GlobalLossKind::Distribution);
        // Left quadrants full, right empty: densities 1, 0, 1, 0
        let value = l.compute(&half_alive(), &LossContext::default());
        assert!((value - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_periodicity_detects_oscillation() {
        let series = [0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        assert!(compute_periodicity(&series) > 0.5);
        assert_eq!(compute_periodicity(&[0.3; 8]), 0.0);
        assert_eq!(compute_periodicity(&[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_diversity() {
        assert_eq!(compute_diversity(&[0.5, 0.5]), 1.0);
        assert!((compute_diversity(&[0.0, 1.0]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_load_history_truncates() {
        let mut l = loss(GlobalLossKind::Periodicity);
        l.load_history((0..10).map(|g| GlobalSample {
            generation: g,
            density: 0.0,
            means: vec![0.0],
        }));
        assert_eq!(l.history().len(), 4);
        assert_eq!(l.history().front().map(|s| s.generation), Some(6));
    }
}
