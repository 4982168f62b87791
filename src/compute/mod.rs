//! Compute module - Grid, perception, evolvers, losses and the simulation driver.

mod activation;
mod clock;
mod gradient;
mod grid;
mod perception;
mod simulation;

pub mod evolver;
pub mod loss;

pub use activation::*;
pub use clock::*;
pub use evolver::*;
pub use gradient::*;
pub use grid::*;
pub use loss::*;
pub use perception::*;
pub use simulation::*;
