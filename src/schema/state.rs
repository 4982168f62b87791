//! Serialized engine state for export and import.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::compute::{Dense, GlobalSample};
use crate::error::Result;

use super::NcaConfig;

/// Last-step diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub local_loss: f32,
    pub global_loss: f32,
    pub total_loss: f32,
    /// Steps per second, derived from the last step's duration.
    pub fps: f32,
    /// Duration of the last step in milliseconds.
    pub last_frame_time: f32,
}

/// Flat snapshot of a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedState {
    pub generation: u64,
    /// Grid buffer, `effective_width * effective_height * channels` values.
    pub grid: Vec<f32>,
    /// Hidden buffer of a state-space evolver.
    pub hidden: Option<Vec<f32>>,
    /// Past grid buffers, oldest first.
    pub history: Vec<Vec<f32>>,
    pub config: NcaConfig,
    pub metrics: Metrics,
    /// Evolver layers. Empty means "rebuild from `config`".
    #[serde(default)]
    pub parameters: Vec<Dense>,
    /// Global loss samples, oldest first.
    #[serde(default)]
    pub loss_history: Vec<GlobalSample>,
    /// Root seed of the simulation's random streams. Absent means "reseed
    /// from `config`".
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

impl SerializedState {
    /// Write as pretty-printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Read a JSON snapshot.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
