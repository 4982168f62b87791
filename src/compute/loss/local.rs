//! Neighborhood-local losses.

use crate::compute::{Grid, gradient_energy};
use crate::schema::{ConfigError, LocalLossConfig, LocalLossKind};

use super::{Loss, LossContext};

/// Caller-supplied loss function.
pub type LossFn = Box<dyn Fn(&Grid, &LossContext<'_>) -> f32 + Send + Sync>;

const ORTHOGONAL: [(isize, isize); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

pub struct LocalLoss {
    kind: LocalLossKind,
    birth: Vec<usize>,
    survive: Vec<usize>,
    threshold: f32,
    function: Option<LossFn>,
}

impl std::fmt::Debug for LocalLoss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalLoss")
            .field("kind", &self.kind)
            .field("birth", &self.birth)
            .field("survive", &self.survive)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl LocalLoss {
    /// Build from configuration. `custom` losses carry a function and must be
    /// built with [`LocalLoss::custom`].
    pub fn new(config: &LocalLossConfig) -> Result<Self, ConfigError> {
        if config.kind == LocalLossKind::Custom {
            return Err(ConfigError::CustomLossWithoutFunction);
        }
        Ok(Self {
            kind: config.kind,
            birth: config.birth.clone(),
            survive: config.survive.clone(),
            threshold: config.threshold,
            function: None,
        })
    }

    pub fn custom<F>(function: F) -> Self
    where
        F: Fn(&Grid, &LossContext<'_>) -> f32 + Send + Sync + 'static,
    {
        let defaults = LocalLossConfig::default();
        Self {
            kind: LocalLossKind::Custom,
            birth: defaults.birth,
            survive: defaults.survive,
            threshold: defaults.threshold,
            function: Some(Box::new(function)),
        }
    }

    pub fn kind(&self) -> LocalLossKind {
        self.kind
    }

    /// Evaluate without needing mutable access.
    pub fn evaluate(&self, grid: &Grid, ctx: &LossContext<'_>) -> f32 {
        match self.kind {
            LocalLossKind::Smoothness => compute_smoothness(grid),
            LocalLossKind::Symmetry => compute_symmetry(grid),
            LocalLossKind::Rule => {
                compute_rule(grid, ctx.previous, &self.birth, &self.survive, self.threshold)
            }
            LocalLossKind::Edge => compute_edge(grid),
            LocalLossKind::Gradient => compute_gradient(grid),
            LocalLossKind::Custom => self.function.as_ref().map_or(0.0, |f| f(grid, ctx)),
        }
    }
}

impl Loss for LocalLoss {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn compute(&mut self, grid: &Grid, ctx: &LossContext<'_>) -> f32 {
        self.evaluate(grid, ctx)
    }
}

/// Mean squared difference between each cell and its present 4-connected neighbors.
fn compute_smoothness(grid: &Grid) -> f32 {
    let mut total = 0.0f64;
    let mut pairs = 0usize;
    for y in 0..grid.height() as isize {
        for x in 0..grid.width() as isize {
            let Some(cell) = grid.get(x, y) else { continue };
            for (dx, dy) in ORTHOGONAL {
                let Some(neighbor) = grid.get(x + dx, y + dy) else {
                    continue;
                };
                for (&a, &b) in cell.iter().zip(neighbor) {
                    total += ((a - b) * (a - b)) as f64;
                }
                pairs += 1;
            }
        }
    }
    if pairs == 0 {
        return 0.0;
    }
    (total / (pairs * grid.channels()) as f64) as f32
}

/// Mean squared difference between left/right and up/down neighbor pairs.
/// Absent neighbors read as zero.
fn compute_symmetry(grid: &Grid) -> f32 {
    let mut total = 0.0f64;
    for y in 0..grid.height() as isize {
        for x in 0..grid.width() as isize {
            for c in 0..grid.channels() {
                let h = grid.get_channel(x - 1, y, c) - grid.get_channel(x + 1, y, c);
                let v = grid.get_channel(x, y - 1, c) - grid.get_channel(x, y + 1, c);
                total += (h * h + v * v) as f64;
            }
        }
    }
    (total / (2 * grid.len()) as f64) as f32
}

/// Live Moore neighbors of `(x, y)` on channel 0. Absent cells never count.
fn live_neighbors(grid: &Grid, x: isize, y: isize, threshold: f32) -> usize {
    let mut count = 0;
    for dy in -1..=1 {
        for dx in -1..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            if grid.get(x + dx, y + dy).is_some_and(|v| v[0] > threshold) {
                count += 1;
            }
        }
    }
    count
}

/// Birth/survive compliance on channel 0.
///
/// With a previous grid, every cell of `grid` is scored against the transition
/// the rule prescribes from `previous`. Without one, `grid` is scored as a still
/// life: each cell against the transition of its own neighborhood.
fn compute_rule(
    grid: &Grid,
    previous: Option<&Grid>,
    birth: &[usize],
    survive: &[usize],
    threshold: f32,
) -> f32 {
    let source = previous
        .filter(|p| p.width() == grid.width() && p.height() == grid.height())
        .unwrap_or(grid);

    let mut total = 0.0f64;
    for y in 0..grid.height() as isize {
        for x in 0..grid.width() as isize {
            let alive = source.get_channel(x, y, 0) > threshold;
            let n = live_neighbors(source, x, y, threshold);
            let next = if alive {
                survive.contains(&n)
            } else {
                birth.contains(&n)
            };
            let target = if next { 1.0 } else { 0.0 };
            let d = grid.get_channel(x, y, 0) - target;
            total += (d * d) as f64;
        }
    }
    (total / grid.cell_count() as f64) as f32
}

/// Mean Sobel-gradient energy `gx² + gy²` over cells and channels.
fn compute_edge(grid: &Grid) -> f32 {
    let total: f64 = (0..grid.channels())
        .flat_map(|c| gradient_energy(grid, c))
        .map(|e| e as f64)
        .sum();
    (total / grid.len() as f64) as f32
}

/// Mean Sobel-gradient magnitude over cells and channels.
fn compute_gradient(grid: &Grid) -> f32 {
    let total: f64 = (0..grid.channels())
        .flat_map(|c| gradient_energy(grid, c))
        .map(|e| e.sqrt() as f64)
        .sum();
    (total / grid.len() as f64) as f32
}
