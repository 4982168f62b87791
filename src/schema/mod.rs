//! Schema module - Configuration, seeding and persisted-state types for NCA simulations.

mod config;
mod preset;
mod seed;
mod state;

pub use config::*;
pub use preset::PRESET_NAMES;
pub use seed::*;
pub use state::*;
