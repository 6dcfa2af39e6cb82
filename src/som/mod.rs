//! The adaptive self-organizing-map training engine.
//!
//! - `codebook` — the prototype matrix and its hot loops (BMU search,
//!   batch update, quality metrics, dead-cell reassignment)
//! - `neighbourhood` — the per-cell adaptive radius field
//! - `training` — the epoch loop and the convergence log

pub mod codebook;
pub mod neighbourhood;
pub mod training;

pub use codebook::{BestMatch, Codebook, RowMatch};
pub use neighbourhood::{Neighbourhood, TopographicDiscontinuity};
pub use training::{train, ConvergenceLog};
