//! Simulation orchestrator.
//!
//! Owns one grid, perception kernel, evolver and composite loss, and drives the
//! step/run loop. A step always evolves from a consistent snapshot: the whole
//! next-state buffer is computed before anything is committed.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{NcaError, Result};
use crate::schema::{FillMode, Metrics, NcaConfig, SerializedState};

use super::{
    CellBuffer, CompositeLoss, Evolver, Grid, LocalLoss, Loss, LossBreakdown, LossContext, Memory,
    Perception, TickClock,
};

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    Idle,
    /// Inside a single `step()`.
    Stepping,
    /// Driven by `on_frame` until `stop()`.
    Running,
}

/// Initial grid contents for [`Simulation::seed`].
pub enum Seed<'a> {
    Fill(&'a FillMode),
    /// `generator(x, y, channel)` over effective coordinates.
    Generator(&'a mut dyn FnMut(usize, usize, usize) -> f32),
    Buffer(CellBuffer<'a>),
}

/// Something that draws the grid. Receives read-only access once per render.
pub trait Renderer: Send {
    fn render(&mut self, grid: &Grid);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type StepCallback = Box<dyn FnMut(u64, &Metrics) + Send>;
pub type LossCallback = Box<dyn FnMut(&LossBreakdown) + Send>;
pub type RenderCallback = Box<dyn FnMut(u64) + Send>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    step: Vec<(SubscriptionId, StepCallback)>,
    loss: Vec<(SubscriptionId, LossCallback)>,
    render: Vec<(SubscriptionId, RenderCallback)>,
}

impl Subscribers {
    fn next(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.step.len() + self.loss.len() + self.render.len();
        self.step.retain(|(i, _)| *i != id);
        self.loss.retain(|(i, _)| *i != id);
        self.render.retain(|(i, _)| *i != id);
        before != self.step.len() + self.loss.len() + self.render.len()
    }
}

/// Run one subscriber, logging instead of propagating a panic.
fn isolate(channel: &str, id: SubscriptionId, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        log::error!("{} subscriber {:?} panicked; continuing", channel, id);
    }
}

pub struct Simulation {
    config: NcaConfig,
    grid: Grid,
    perception: Perception,
    evolver: Evolver,
    loss: CompositeLoss,
    hidden: Option<Vec<f32>>,
    /// Pre-step grids, oldest first, at most `history_depth`.
    history: VecDeque<Grid>,
    generation: u64,
    state: RunState,
    metrics: Metrics,
    last_loss: LossBreakdown,
    /// Root of every random stream; `config.seed` or drawn once from entropy.
    base_seed: u64,
    /// Seeding and mutation draws. Steps use [`Simulation::step_rng`] instead.
    rng: StdRng,
    clock: Option<TickClock>,
    renderer: Option<Box<dyn Renderer>>,
    subscribers: Subscribers,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("generation", &self.generation)
            .field("state", &self.state)
            .field("grid", &(self.grid.width(), self.grid.height(), self.grid.channels()))
            .field("mode", &self.evolver.mode())
            .field("history", &self.history.len())
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl Simulation {
    /// Build every component from `config`. The grid starts zeroed.
    pub fn new(config: NcaConfig) -> Result<Self> {
        config.validate()?;

        let base_seed = config
            .seed
            .unwrap_or_else(|| StdRng::from_entropy().r#gen());
        let mut rng = StdRng::seed_from_u64(base_seed);

        let (width, height) = (config.effective_width(), config.effective_height());
        let grid = Grid::new(width, height, config.channels, config.wrap)?
            .with_activity_threshold(config.activity_threshold);
        let perception = Perception::new(&config.perception, config.channels)?;
        let evolver = Evolver::new(&config, &perception, &mut rng)?;
        let loss = CompositeLoss::new(&config.loss)?;
        let hidden = evolver.init_hidden(width, height);

        log::info!(
            "simulation {}x{} (scale {}) x{} channels, {:?} evolver, {} taps, {} parameters",
            config.width,
            config.height,
            config.scale,
            config.channels,
            evolver.mode(),
            perception.field_size(),
            evolver.parameter_count()
        );

        Ok(Self {
            history: VecDeque::with_capacity(config.history_depth),
            config,
            grid,
            perception,
            evolver,
            loss,
            hidden,
            generation: 0,
            state: RunState::Idle,
            metrics: Metrics::default(),
            last_loss: LossBreakdown::default(),
            base_seed,
            rng,
            clock: None,
            renderer: None,
            subscribers: Subscribers::default(),
        })
    }

    /// Rebuild a simulation from an exported snapshot.
    pub fn from_state(state: SerializedState) -> Result<Self> {
        let mut sim = Self::new(state.config.clone())?;
        sim.restore(state)?;
        Ok(sim)
    }

    // ---- accessors ----

    pub fn config(&self) -> &NcaConfig {
        &self.config
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn perception(&self) -> &Perception {
        &self.perception
    }

    pub fn evolver(&self) -> &Evolver {
        &self.evolver
    }

    pub fn loss(&self) -> &CompositeLoss {
        &self.loss
    }

    pub fn loss_mut(&mut self) -> &mut CompositeLoss {
        &mut self.loss
    }

    pub fn hidden(&self) -> Option<&[f32]> {
        self.hidden.as_deref()
    }

    /// Pre-step grids, oldest first.
    pub fn history(&self) -> &VecDeque<Grid> {
        &self.history
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn last_loss(&self) -> &LossBreakdown {
        &self.last_loss
    }

    // ---- seeding ----

    /// Reset generation, history, hidden state and loss history, then populate
    /// the grid. A mismatched buffer fails before anything is reset.
    pub fn seed(&mut self, seed: Seed<'_>) -> Result<()> {
        match seed {
            Seed::Fill(mode) => self.grid.fill(mode, &mut self.rng),
            Seed::Generator(generator) => self.grid.fill_with(generator),
            Seed::Buffer(buffer) => self.grid.set_data(buffer)?,
        }

        self.generation = 0;
        self.history.clear();
        self.hidden = self
            .evolver
            .init_hidden(self.grid.width(), self.grid.height());
        self.loss.reset();
        self.metrics = Metrics::default();
        self.last_loss = LossBreakdown::default();
        log::debug!("seeded grid, population {}", self.grid.stats().population);
        Ok(())
    }

    // ---- stepping ----

    /// Advance one generation.
    pub fn step(&mut self) -> Result<()> {
        let resume = self.state;
        self.state = RunState::Stepping;
        let result = self.advance();
        self.state = resume;
        result
    }

    /// Generator for the step that produces generation `self.generation + 1`.
    ///
    /// Derived from `(base_seed, generation)` only, so a step taken after
    /// `import_state` draws exactly what the exporting simulation would have.
    fn step_rng(&self) -> StdRng {
        StdRng::seed_from_u64(
            self.base_seed ^ self.generation.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15),
        )
    }

    fn advance(&mut self) -> Result<()> {
        let started = Instant::now();

        let mut rng = self.step_rng();
        let features = self.perception.sample(&self.grid);
        let output = {
            let history: Vec<&[f32]> = self.history.iter().map(Grid::data).collect();
            let memory = self.hidden.as_deref().map(|hidden| Memory {
                hidden,
                history: &history,
            });
            self.evolver.forward(&features, memory, &mut rng)?
        };

        let previous = self.grid.clone();
        self.grid.set_data(&output.state)?;
        if output.hidden.is_some() {
            self.hidden = output.hidden;
        }
        self.generation += 1;

        let ctx = LossContext::at(self.generation).with_previous(&previous);
        let breakdown = self.loss.compute(&self.grid, &ctx);
        self.push_history(previous);

        let elapsed_ms = started.elapsed().as_secs_f32() * 1000.0;
        self.metrics = Metrics {
            local_loss: breakdown.local,
            global_loss: breakdown.global,
            total_loss: breakdown.total,
            fps: if elapsed_ms > 0.0 {
                1000.0 / elapsed_ms
            } else {
                0.0
            },
            last_frame_time: elapsed_ms,
        };
        self.last_loss = breakdown;

        log::debug!(
            "generation {} in {:.3}ms, loss {:.5}",
            self.generation,
            elapsed_ms,
            self.metrics.total_loss
        );

        self.notify_step();
        Ok(())
    }

    fn push_history(&mut self, grid: Grid) {
        if self.config.history_depth == 0 {
            return;
        }
        while self.history.len() >= self.config.history_depth {
            self.history.pop_front();
        }
        self.history.push_back(grid);
    }

    fn notify_step(&mut self) {
        let (generation, metrics) = (self.generation, self.metrics);
        for (id, callback) in &mut self.subscribers.step {
            isolate("step", *id, || callback(generation, &metrics));
        }
        let breakdown = &self.last_loss;
        for (id, callback) in &mut self.subscribers.loss {
            isolate("loss", *id, || callback(breakdown));
        }
    }

    /// Draw the current grid on the attached renderer and notify render subscribers.
    pub fn render(&mut self) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.render(&self.grid);
        }
        let generation = self.generation;
        for (id, callback) in &mut self.subscribers.render {
            isolate("render", *id, || callback(generation));
        }
    }

    // ---- run loop ----

    /// Start ticking at `target_rate` steps per second. Ticks are delivered by
    /// [`Simulation::on_frame`].
    pub fn run(&mut self, target_rate: f32) {
        let clock = TickClock::new(target_rate);
        log::info!("running at {:?} per step", clock.interval());
        self.clock = Some(clock);
        self.state = RunState::Running;
    }

    /// Stop scheduling ticks. A step in progress is not interrupted.
    pub fn stop(&mut self) {
        self.clock = None;
        self.state = RunState::Idle;
    }

    /// Host frame callback. Runs every tick that is due at `now`, then renders
    /// once if anything changed. Returns the number of steps taken.
    pub fn on_frame(&mut self, now: Instant) -> Result<u32> {
        if self.state != RunState::Running {
            return Ok(0);
        }
        let Some(clock) = self.clock.as_mut() else {
            return Ok(0);
        };

        let ticks = clock.advance(now);
        for _ in 0..ticks {
            self.step()?;
        }
        if ticks > 0 {
            self.render();
        }
        Ok(ticks)
    }

    // ---- collaborators ----

    pub fn attach_renderer(&mut self, renderer: Box<dyn Renderer>) {
        self.renderer = Some(renderer);
    }

    pub fn detach_renderer(&mut self) -> Option<Box<dyn Renderer>> {
        self.renderer.take()
    }

    pub fn on_step(&mut self, callback: impl FnMut(u64, &Metrics) + Send + 'static) -> SubscriptionId {
        let id = self.subscribers.next();
        self.subscribers.step.push((id, Box::new(callback)));
        id
    }

    pub fn on_loss(&mut self, callback: impl FnMut(&LossBreakdown) + Send + 'static) -> SubscriptionId {
        let id = self.subscribers.next();
        self.subscribers.loss.push((id, Box::new(callback)));
        id
    }

    pub fn on_render(&mut self, callback: impl FnMut(u64) + Send + 'static) -> SubscriptionId {
        let id = self.subscribers.next();
        self.subscribers.render.push((id, Box::new(callback)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    /// Replace the local term of the composite loss.
    pub fn set_local_loss(&mut self, local: LocalLoss) {
        self.loss.set_local(local);
    }

    pub fn add_loss(&mut self, weight: f32, loss: Box<dyn Loss>) {
        self.loss.add_loss(weight, loss);
    }

    /// Mutate the evolver weights with the simulation RNG.
    pub fn mutate(&mut self, rate: f32, strength: f32) {
        self.evolver.mutate(rate, strength, &mut self.rng);
    }

    /// Backpropagation is not supported.
    pub fn backward(&mut self, output_grad: &[f32]) -> Result<()> {
        self.evolver.backward(output_grad)
    }

    // ---- coordinates ----

    fn effective(&self, x: f32, y: f32) -> (isize, isize) {
        let scale = self.config.scale as f32;
        ((x * scale).floor() as isize, (y * scale).floor() as isize)
    }

    /// Cell at logical coordinates, mapped to storage as `floor(coord * scale)`.
    pub fn get_cell(&self, x: f32, y: f32) -> Option<&[f32]> {
        let (ex, ey) = self.effective(x, y);
        self.grid.get(ex, ey)
    }

    /// Write the cell at logical coordinates. False if it is absent.
    pub fn set_cell(&mut self, x: f32, y: f32, values: &[f32]) -> bool {
        let (ex, ey) = self.effective(x, y);
        self.grid.set(ex, ey, values)
    }

    // ---- persistence ----

    pub fn export_state(&self) -> SerializedState {
        SerializedState {
            generation: self.generation,
            grid: self.grid.data().to_vec(),
            hidden: self.hidden.clone(),
            history: self.history.iter().map(|g| g.data().to_vec()).collect(),
            config: self.config.clone(),
            metrics: self.metrics,
            parameters: self.evolver.parameters().to_vec(),
            loss_history: self.loss.global().history().iter().cloned().collect(),
            rng_seed: Some(self.base_seed),
        }
    }

    /// Replace this simulation's state with `state`.
    ///
    /// Everything is rebuilt from `state.config` and checked before being swapped
    /// in, so on error the simulation is unchanged. Subscribers and the attached
    /// renderer are kept; programmatically added losses are not. The random
    /// streams resume from the exported `rng_seed` when present.
    pub fn import_state(&mut self, state: SerializedState) -> Result<()> {
        let mut next = Self::new(state.config.clone())?;
        next.restore(state)?;

        next.subscribers = std::mem::take(&mut self.subscribers);
        next.renderer = self.renderer.take();
        *self = next;
        log::info!("imported state at generation {}", self.generation);
        Ok(())
    }

    fn restore(&mut self, state: SerializedState) -> Result<()> {
        let grid_len = self.grid.len();
        if let Some(bad) = state.history.iter().find(|h| h.len() != grid_len) {
            return Err(NcaError::ShapeMismatch {
                expected: grid_len,
                actual: bad.len(),
            });
        }

        let hidden = match (state.hidden, self.hidden.as_ref()) {
            (Some(h), Some(current)) if h.len() != current.len() => {
                return Err(NcaError::ShapeMismatch {
                    expected: current.len(),
                    actual: h.len(),
                });
            }
            (Some(h), Some(_)) => Some(h),
            (Some(h), None) => {
                return Err(NcaError::ShapeMismatch {
                    expected: 0,
                    actual: h.len(),
                });
            }
            (None, current) => current.cloned(),
        };

        if !state.parameters.is_empty() {
            self.evolver.load_parameters(state.parameters)?;
        }
        self.grid.set_data(&state.grid)?;

        let template = self.grid.clone();
        let mut history = VecDeque::with_capacity(self.config.history_depth);
        for buffer in state.history {
            let mut grid = template.clone();
            grid.set_data(&buffer)?;
            history.push_back(grid);
        }
        while history.len() > self.config.history_depth {
            history.pop_front();
        }

        self.history = history;
        self.hidden = hidden;
        self.generation = state.generation;
        self.metrics = state.metrics;
        self.loss.global_mut().load_history(state.loss_history);
        if let Some(seed) = state.rng_seed {
            self.base_seed = seed;
            self.rng = StdRng::seed_from_u64(seed);
        }
        Ok(())
    }
}
