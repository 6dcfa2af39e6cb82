//! The epoch loop of adaptive semantic-map training.
//!
//! Each epoch runs a fixed sequence: dual BMU search, dead-cell handling,
//! diffusion measurement against the previous epoch, batch-SOM update, and
//! the adaptive radius update, followed by one convergence-log row. After
//! the last epoch a final BMU search flushes the metrics once more.
//!
//! The final epoch's batch update always runs without the vocabulary
//! cutoff so the prototypes settle across the full vocabulary.

use log::info;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::TrainingConfig;
use crate::corpus::SparseCorpus;
use crate::error::{CartographError, Result};
use crate::som::codebook::Codebook;
use crate::som::neighbourhood::Neighbourhood;
use crate::CellIndex;

/// Seconds since the Unix epoch.
pub fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Tab-separated per-epoch metrics writer.
pub struct ConvergenceLog {
    writer: BufWriter<File>,
}

impl ConvergenceLog {
    /// Creates the log file and writes the column header.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(
            writer,
            "Epoch\tUnixTime\tRadiusMin\tRadiusMax\tQuantizationError\tTopographicError\tGapError\tDiffusionError"
        )?;
        Ok(Self { writer })
    }

    /// Appends one epoch's metrics.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        epoch: u32,
        radius_min: f32,
        radius_max: f32,
        quantization: f32,
        topographic: f32,
        gap: f32,
        diffusion: f32,
    ) -> Result<()> {
        writeln!(
            self.writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            epoch,
            unix_time(),
            radius_min,
            radius_max,
            quantization,
            topographic,
            gap,
            diffusion
        )?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Trains the codebook over the corpus for the configured number of
/// epochs, shrinking the neighbourhood adaptively.
///
/// When `preliminary_dir` is given, the neighbourhood is saved there once
/// per epoch (as `prelim-<epoch>.neighbourhood.bin`) so an interrupted run
/// leaves inspectable state behind.
pub fn train(
    codebook: &mut Codebook,
    neighbourhood: &mut Neighbourhood,
    data: &SparseCorpus,
    config: &TrainingConfig,
    log: &mut ConvergenceLog,
    preliminary_dir: Option<&Path>,
) -> Result<()> {
    if config.epochs < 2 {
        return Err(CartographError::InvalidArgument(
            "the number of epochs must be at least 2".to_string(),
        ));
    }
    info!("training adaptive self-organizing map");

    let cutoff = config.train_vocab_cutoff;
    let strides = config.dead_cell_update_strides;
    let mut previous_bmus: Vec<CellIndex> = Vec::new();
    let mut diffusion = 0.0f32;

    for epoch in 1..=config.epochs {
        info!("epoch {} of {}", epoch, config.epochs);

        let mut matches = codebook.find_best_and_next_best_matching_units(data, cutoff);

        let gap = if strides > 0 && epoch % strides == 0 {
            codebook.assign_dead_cells(&mut matches)
        } else {
            codebook.gap_error(&matches)
        };

        if epoch > 1 {
            diffusion = codebook.diffusion_error(&matches, &previous_bmus);
        }
        previous_bmus = matches.iter().map(|m| m.best).collect();

        if let Some(dir) = preliminary_dir {
            neighbourhood.save(dir.join(format!("prelim-{}.neighbourhood.bin", epoch - 1)))?;
        }

        // The last epoch updates over the full vocabulary.
        let update_cutoff = if epoch < config.epochs { cutoff } else { 0 };
        codebook.apply_batch_update(data, neighbourhood, &matches, update_cutoff);

        let topographic = neighbourhood.update(&matches, config.respect_lower_bound);

        log.record(
            epoch - 1,
            neighbourhood.radius_min(),
            neighbourhood.radius_max(),
            codebook.quantization_error(&matches),
            topographic,
            gap,
            diffusion,
        )?;
    }

    // One final search to flush the metrics for the settled codebook.
    let matches = codebook.find_best_and_next_best_matching_units(data, cutoff);
    let gap = codebook.gap_error(&matches);
    let topographic = neighbourhood.update(&matches, config.respect_lower_bound);
    diffusion = codebook.diffusion_error(&matches, &previous_bmus);
    log.record(
        config.epochs,
        neighbourhood.radius_min(),
        neighbourhood.radius_max(),
        codebook.quantization_error(&matches),
        topographic,
        gap,
        diffusion,
    )?;

    Ok(())
}
