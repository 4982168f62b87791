//! Neural CA - Neural cellular automata on multi-channel grids.
//!
//! Every cell of a toroidal or bounded grid perceives a weighted neighborhood,
//! and a small per-cell network maps that perception to the cell's next state.
//! Two evolution strategies are available: a memoryless (Markovian) network
//! and a recurrent state-space network with optional attention over past grids.
//! A composite local/global loss scores every generation.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration, presets, seed fills and serialized state
//! - `compute`: Grid, perception, evolvers, losses and the simulation driver
//!
//! # Example
//!
//! ```rust,no_run
//! use neural_ca::{
//!     compute::{Seed, Simulation},
//!     schema::{FillMode, NcaConfig},
//! };
//!
//! // Conway's Life compiled into network weights
//! let config = NcaConfig::preset("game_of_life")?;
//! let mut sim = Simulation::new(config)?;
//! sim.seed(Seed::Fill(&FillMode::Random { amplitude: 1.0 }))?;
//!
//! for _ in 0..100 {
//!     sim.step()?;
//! }
//!
//! println!("Density after 100 steps: {}", sim.grid().stats().density);
//! # Ok::<(), neural_ca::NcaError>(())
//! ```

pub mod compute;
pub mod error;
pub mod schema;

// Re-export commonly used types
pub use compute::{Evolver, Grid, Perception, Simulation};
pub use error::{NcaError, Result};
pub use schema::{NcaConfig, SerializedState};
