//! Error types for the cartograph training engine.

use std::path::PathBuf;
use thiserror::Error;

use crate::topology::{GlobalTopology, LocalTopology};

/// The main error type for cartograph operations.
#[derive(Error, Debug)]
pub enum CartographError {
    /// A command-line or configuration value failed validation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An input file is malformed or truncated.
    #[error("Corrupt input: {0}")]
    CorruptInput(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No distance function exists for this (global, local) topology pair.
    #[error("No distance function for the {global:?}/{local:?} topology")]
    InvalidTopology {
        /// The requested global map shape.
        global: GlobalTopology,
        /// The requested local neighbour shape.
        local: LocalTopology,
    },

    /// A co-occurrence count would overflow its 32-bit storage.
    #[error("Count for term {term} in cell {cell} would exceed {max}")]
    CapacityExceeded {
        /// Vocabulary index of the overflowing term.
        term: u32,
        /// Map cell holding the overflowing count.
        cell: u16,
        /// The largest representable count.
        max: u32,
    },

    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
}

/// Result type alias for cartograph operations.
pub type Result<T> = std::result::Result<T, CartographError>;
