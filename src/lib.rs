//! # Cartograph — adaptive self-organizing semantic maps
//!
//! Cartograph trains an adaptive self-organizing map (SOM) over a corpus
//! of sparse binary text snippets and produces a two-dimensional semantic
//! map: a grid of prototype vectors (the *codebook*), a best matching cell
//! for every snippet, and a term-by-cell co-occurrence count tensor.
//!
//! ## Key features
//!
//! - **Batch-SOM training** over sparse binary (optionally weighted) input
//! - **Adaptive per-cell radii** that shrink every epoch but are held open
//!   near topographic discontinuities
//! - **Dead-cell reassignment** to keep the whole map utilized
//! - **Four convergence metrics** (quantization, topographic, gap, and
//!   diffusion error) logged per epoch
//! - **Plane and torus maps** with rectangular, hexagonal, or circular
//!   cell neighbourhoods
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use cartograph::{
//!     Codebook, ConvergenceLog, Neighbourhood, SemanticMap, SparseCorpus,
//!     TrainingConfig,
//! };
//!
//! let config = TrainingConfig::default();
//! config.validate()?;
//! let topology = config.topology()?;
//!
//! let data = SparseCorpus::load("corpus.bin")?;
//! let mut codebook = Codebook::new(config.height, config.width, data.num_cols(), topology);
//! codebook.init_random(42);
//! let mut neighbourhood = Neighbourhood::new(
//!     config.height,
//!     config.width,
//!     topology,
//!     config.update_exponent,
//!     config.initial_radius,
//! );
//!
//! let mut log = ConvergenceLog::create("convergence.tsv")?;
//! cartograph::train(&mut codebook, &mut neighbourhood, &data, &config, &mut log, None)?;
//!
//! let map = SemanticMap::build(&data, &codebook, 0)?;
//! map.save_best_matching_units("bmus.bin")?;
//! ```
//!
//! ## Architecture
//!
//! - [`topology`] — lattice distance functions
//! - [`corpus`] — the sparse CSR corpus and its loader
//! - [`som`] — codebook, adaptive neighbourhood, and the training loop
//! - [`semantic_map`] — the count tensor and the BMU/count artifacts
//! - [`config`] — run hyperparameters
//!
//! All artifact files are little endian; big-endian hosts are not
//! supported.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod corpus;
pub mod error;
pub mod semantic_map;
pub mod som;
mod storage;
pub mod topology;

// Re-export commonly used types
pub use config::{derived_update_exponent, TrainingConfig};
pub use corpus::SparseCorpus;
pub use error::{CartographError, Result};
pub use semantic_map::SemanticMap;
pub use som::{
    train, BestMatch, Codebook, ConvergenceLog, Neighbourhood, RowMatch,
    TopographicDiscontinuity,
};
pub use som::training::unix_time;
pub use topology::{GlobalTopology, LocalTopology, Topology};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Index of a cell on the map grid. Sixteen bits bound the map to 65,536
/// cells.
pub type CellIndex = u16;
