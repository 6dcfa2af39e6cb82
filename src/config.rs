//! Training configuration.

use serde::{Deserialize, Serialize};

use crate::error::{CartographError, Result};
use crate::topology::{GlobalTopology, LocalTopology, Topology};

/// Radius the adaptive schedule aims for at the final epoch when no update
/// exponent is given explicitly.
const TARGET_FINAL_RADIUS: f64 = 1.5;

/// Hyperparameters of a semantic-map training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Map width in cells.
    pub width: u16,

    /// Map height in cells. Must be even for hexagonal maps.
    pub height: u16,

    /// Initial neighbourhood radius of every cell.
    /// Default: (width + height) / 2.
    pub initial_radius: u32,

    /// Per-epoch radius shrink exponent in (0, 1].
    pub update_exponent: f32,

    /// Number of training epochs. Must be at least 2.
    pub epochs: u32,

    /// Global map shape.
    pub global_topology: GlobalTopology,

    /// Local neighbour shape.
    pub local_topology: LocalTopology,

    /// Keep each cell's radius above the lower bound derived from
    /// topographic discontinuities. Disabled by `--non-adaptive`.
    pub respect_lower_bound: bool,

    /// If non-zero, ignore vocabulary indices at or above this value during
    /// training (except for the final epoch's batch update).
    pub train_vocab_cutoff: u32,

    /// If non-zero, reassign dead cells to the worst-matching snippets
    /// every nth epoch.
    pub dead_cell_update_strides: u32,

    /// Base seed for codebook initialization. Each worker adds its worker
    /// index, so runs with the same seed and worker count are reproducible.
    /// Default: None (seed from the wall clock).
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            width: 128,
            height: 128,
            initial_radius: 128,
            update_exponent: 0.95,
            epochs: 2,
            global_topology: GlobalTopology::Torus,
            local_topology: LocalTopology::Circ,
            respect_lower_bound: true,
            train_vocab_cutoff: 0,
            dead_cell_update_strides: 0,
            seed: None,
        }
    }
}

impl TrainingConfig {
    /// Total number of cells in the map.
    #[inline]
    pub fn num_cells(&self) -> u32 {
        u32::from(self.width) * u32::from(self.height)
    }

    /// Builds the lattice geometry for this configuration.
    pub fn topology(&self) -> Result<Topology> {
        Topology::new(
            self.global_topology,
            self.local_topology,
            self.height,
            self.width,
        )
    }

    /// Checks the invariants the training engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.width < 1 || self.height < 1 {
            return Err(CartographError::InvalidArgument(
                "the map width and height must be at least 1".to_string(),
            ));
        }
        if u64::from(self.width) * u64::from(self.height) > (1u64 << 16) {
            return Err(CartographError::InvalidArgument(
                "the map has more cells than a 16-bit cell index can address".to_string(),
            ));
        }
        if self.epochs < 2 {
            return Err(CartographError::InvalidArgument(
                "the number of epochs must be at least 2".to_string(),
            ));
        }
        if self.initial_radius < 1 {
            return Err(CartographError::InvalidArgument(
                "the initial radius must be at least 1".to_string(),
            ));
        }
        if !(self.update_exponent > 0.0 && self.update_exponent <= 1.0) {
            return Err(CartographError::InvalidArgument(
                "the update exponent must be a real number between 0 and 1".to_string(),
            ));
        }
        if self.local_topology == LocalTopology::Hexa && self.height % 2 == 1 {
            return Err(CartographError::InvalidArgument(
                "a hexagonal grid needs an even number of rows".to_string(),
            ));
        }
        Ok(())
    }
}

/// Update exponent that shrinks `initial_radius` to 1.5 over `epochs`
/// epochs, i.e. `(ln 1.5 / ln r)^(1/E)`.
pub fn derived_update_exponent(initial_radius: u32, epochs: u32) -> f32 {
    let r = f64::from(initial_radius);
    let e = f64::from(epochs);
    (TARGET_FINAL_RADIUS.ln().powf(1.0 / e) / r.ln().powf(1.0 / e)) as f32
}
