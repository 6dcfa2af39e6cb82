//! The codebook of prototype vectors.
//!
//! A codebook is a dense `height x width x input_dim` matrix of 32-bit
//! floats, row-major over (cell, dimension). It owns the four hot
//! operations of training: random initialization, best-matching-unit
//! search over the sparse corpus, the batch-SOM update, and the per-epoch
//! quality metrics.
//!
//! The BMU search keeps the cell loop outside so the squared prototype
//! norm is computed once per cell; the row loop inside is parallel because
//! every row only writes its own match slot.

use log::info;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::corpus::SparseCorpus;
use crate::error::{CartographError, Result};
use crate::som::neighbourhood::Neighbourhood;
use crate::storage::{dimension_from_u64, read_f32, read_u64, read_u8, write_f32, write_u64, write_u8};
use crate::topology::{GlobalTopology, LocalTopology, Topology};
use crate::CellIndex;

/// Sentinel distance before any cell has been compared.
const MAX_REAL_DISTANCE: f32 = f32::MAX;

/// Format byte of the codebook file.
const CODEBOOK_FORMAT: u8 = 0;

/// Best match of a single search for one corpus row.
#[derive(Debug, Clone, Copy)]
pub struct BestMatch {
    /// Best matching cell.
    pub cell: CellIndex,
    /// Distance to that cell's prototype.
    pub distance: f32,
}

/// Best and second-best match of the dual search for one corpus row.
#[derive(Debug, Clone, Copy)]
pub struct RowMatch {
    /// Best matching cell.
    pub best: CellIndex,
    /// Second-best matching cell.
    pub next_best: CellIndex,
    /// Distance to the best prototype, clamped at zero.
    pub distance: f32,
    /// Distance to the second-best prototype, clamped at zero.
    pub next_distance: f32,
}

/// The `height x width x input_dim` prototype matrix.
#[derive(Debug)]
pub struct Codebook {
    height: u16,
    width: u16,
    input_dim: u32,
    num_cells: u32,
    topology: Topology,
    values: Vec<f32>,
}

impl Codebook {
    /// Allocates a zeroed codebook. Call [`Self::init_random`] before
    /// training from scratch.
    pub fn new(height: u16, width: u16, input_dim: u32, topology: Topology) -> Self {
        let num_cells = u32::from(height) * u32::from(width);
        let size = num_cells as usize * input_dim as usize;
        Self {
            height,
            width,
            input_dim,
            num_cells,
            topology,
            values: vec![0.0; size],
        }
    }

    /// Fills the codebook with IID uniform values in [0, 1).
    ///
    /// The work is split into one contiguous chunk per worker; worker `i`
    /// seeds its generator with `base_seed + i`, so runs with the same seed
    /// and worker count produce the same codebook.
    pub fn init_random(&mut self, base_seed: u64) {
        info!("initializing codebook with base seed {}", base_seed);
        let workers = rayon::current_num_threads().max(1);
        let chunk_len = self.values.len().div_ceil(workers).max(1);
        self.values
            .par_chunks_mut(chunk_len)
            .enumerate()
            .for_each(|(worker, chunk)| {
                let mut rng = ChaCha8Rng::seed_from_u64(base_seed + worker as u64);
                for value in chunk {
                    *value = rng.gen_range(0.0f32..1.0);
                }
            });
    }

    /// Map height in cells.
    #[inline]
    pub fn height(&self) -> u16 {
        self.height
    }

    /// Map width in cells.
    #[inline]
    pub fn width(&self) -> u16 {
        self.width
    }

    /// Dimensionality of the prototype vectors.
    #[inline]
    pub fn input_dim(&self) -> u32 {
        self.input_dim
    }

    /// Total number of cells.
    #[inline]
    pub fn num_cells(&self) -> u32 {
        self.num_cells
    }

    /// The lattice geometry of the map.
    #[inline]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The raw prototype matrix, row-major over (cell, dimension).
    #[inline]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// One cell's prototype vector.
    #[inline]
    pub fn cell(&self, cell: CellIndex) -> &[f32] {
        let dim = self.input_dim as usize;
        &self.values[cell as usize * dim..][..dim]
    }

    #[cfg(test)]
    pub(crate) fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    /// Finds the best matching cell for every corpus row.
    ///
    /// The per-row distance is the surrogate `|w|^2 - 2<w, x>`, which
    /// preserves the argmin; with `need_correct_distances` the row's
    /// squared norm is added back and the result clamped at zero, giving
    /// true squared distances. Rows that are empty (or whose smallest term
    /// index already falls outside the cutoff) keep cell 0 at infinite
    /// distance.
    pub fn find_best_matching_units(
        &self,
        data: &SparseCorpus,
        train_vocab_cutoff: u32,
        need_correct_distances: bool,
    ) -> Vec<BestMatch> {
        debug_assert_eq!(data.num_cols(), self.input_dim);
        let effective_dim = if train_vocab_cutoff > 0 {
            train_vocab_cutoff
        } else {
            data.num_cols()
        };

        let mut matches = vec![
            BestMatch {
                cell: 0,
                distance: MAX_REAL_DISTANCE,
            };
            data.num_rows() as usize
        ];

        let dim = self.input_dim as usize;
        for cell in 0..self.num_cells {
            let prototype = &self.values[cell as usize * dim..][..dim];
            let prototype_squared: f32 = prototype.iter().map(|v| v * v).sum();

            matches.par_iter_mut().enumerate().for_each(|(row, best)| {
                let Some(distance) =
                    surrogate_distance(data, row, prototype, prototype_squared, effective_dim)
                else {
                    return;
                };
                if distance < best.distance {
                    best.cell = cell as CellIndex;
                    best.distance = distance;
                }
            });
        }

        if need_correct_distances {
            let sum_of_squares = data.sum_of_squares();
            matches.par_iter_mut().enumerate().for_each(|(row, best)| {
                best.distance = (best.distance + sum_of_squares[row]).max(0.0);
            });
        }

        matches
    }

    /// Finds the best and second-best matching cells for every corpus row.
    ///
    /// Distances include the row norms and are clamped at zero. Ties keep
    /// the first cell reaching the minimum.
    pub fn find_best_and_next_best_matching_units(
        &self,
        data: &SparseCorpus,
        train_vocab_cutoff: u32,
    ) -> Vec<RowMatch> {
        debug_assert_eq!(data.num_cols(), self.input_dim);
        let effective_dim = if train_vocab_cutoff > 0 {
            train_vocab_cutoff
        } else {
            self.input_dim
        };
        let sum_of_squares = data.sum_of_squares();

        let mut matches = vec![
            RowMatch {
                best: 0,
                next_best: 0,
                distance: MAX_REAL_DISTANCE,
                next_distance: MAX_REAL_DISTANCE,
            };
            data.num_rows() as usize
        ];

        let dim = self.input_dim as usize;
        for cell in 0..self.num_cells {
            let prototype = &self.values[cell as usize * dim..][..dim];
            let prototype_squared: f32 = prototype.iter().map(|v| v * v).sum();

            matches.par_iter_mut().enumerate().for_each(|(row, row_match)| {
                let Some(surrogate) =
                    surrogate_distance(data, row, prototype, prototype_squared, effective_dim)
                else {
                    return;
                };
                let distance = surrogate + sum_of_squares[row];
                if distance < row_match.distance {
                    row_match.next_best = row_match.best;
                    row_match.next_distance = row_match.distance;
                    row_match.best = cell as CellIndex;
                    row_match.distance = distance.max(0.0);
                } else if distance < row_match.next_distance {
                    row_match.next_best = cell as CellIndex;
                    row_match.next_distance = distance.max(0.0);
                }
            });
        }

        matches
    }

    /// Applies the batch-SOM update: every cell becomes the
    /// influence-weighted mean of the rows, using each row's best matching
    /// cell as the influence source.
    ///
    /// Occurrence weights bias the BMU search only; the update treats
    /// inputs as binary so prototypes stay within [0, 1]. Dimensions at or
    /// above the cutoff are written as zero whenever a cell is touched at
    /// all; untouched cells keep their previous prototype.
    pub fn apply_batch_update(
        &mut self,
        data: &SparseCorpus,
        neighbourhood: &Neighbourhood,
        matches: &[RowMatch],
        train_vocab_cutoff: u32,
    ) {
        let dim = self.input_dim as usize;
        let effective_dim = if train_vocab_cutoff > 0 {
            train_vocab_cutoff as usize
        } else {
            dim
        };
        let num_rows = data.num_rows() as usize;

        self.values
            .par_chunks_mut(dim)
            .enumerate()
            .for_each_init(
                || vec![0.0f32; dim],
                |numerator, (cell, prototype)| {
                    numerator.fill(0.0);
                    let mut denominator = 0.0f32;

                    for row in 0..num_rows {
                        let influence =
                            neighbourhood.influence(matches[row].best, cell as CellIndex);
                        if influence <= 0.0 {
                            continue;
                        }
                        denominator += influence;
                        for &index in data.row_indices(row) {
                            if index as usize >= effective_dim {
                                break;
                            }
                            numerator[index as usize] += influence;
                        }
                    }

                    if denominator != 0.0 {
                        for (value, numerator) in prototype.iter_mut().zip(numerator.iter()) {
                            *value = numerator / denominator;
                        }
                    }
                },
            );
    }

    /// Root of the summed squared row distances, divided by the row count.
    pub fn quantization_error(&self, matches: &[RowMatch]) -> f32 {
        let total: f64 = matches
            .iter()
            .map(|m| f64::from(m.distance) * f64::from(m.distance))
            .sum();
        (total.sqrt() / matches.len() as f64) as f32
    }

    /// Fraction of cells that are no row's best matching unit.
    pub fn gap_error(&self, matches: &[RowMatch]) -> f32 {
        let used = self.count_used_cells(matches).1;
        (self.num_cells - used) as f32 / self.num_cells as f32
    }

    /// Mean lattice distance between each row's current and previous best
    /// matching unit.
    pub fn diffusion_error(&self, matches: &[RowMatch], previous: &[CellIndex]) -> f32 {
        debug_assert_eq!(matches.len(), previous.len());
        let total: u64 = matches
            .iter()
            .zip(previous.iter())
            .filter(|(m, &prev)| m.best != prev)
            .map(|(m, &prev)| u64::from(self.topology.cell_distance(m.best, prev)))
            .sum();
        total as f32 / matches.len() as f32
    }

    /// Reassigns every unused cell as the best matching unit of one of the
    /// worst-matching rows, so the next batch update pulls its prototype
    /// towards an input the map currently represents badly.
    ///
    /// Returns the fraction of cells that were dead, or zero when there
    /// was nothing to do (no dead cells, or more dead cells than rows).
    pub fn assign_dead_cells(&self, matches: &mut [RowMatch]) -> f32 {
        let (cell_in_use, used) = self.count_used_cells(matches);
        let unused = (self.num_cells - used) as usize;
        if unused == 0 || unused > matches.len() {
            return 0.0;
        }
        info!("found {} dead cells", unused);

        // The unused-th largest distance bounds the candidate set; ties at
        // the threshold are admitted in row order.
        let mut distances: Vec<f32> = matches.iter().map(|m| m.distance).collect();
        distances.select_nth_unstable_by(unused - 1, |a, b| b.total_cmp(a));
        let threshold = distances[unused - 1];

        let mut candidates = Vec::with_capacity(unused);
        for (row, row_match) in matches.iter().enumerate() {
            if row_match.distance >= threshold {
                candidates.push(row);
                if candidates.len() == unused {
                    break;
                }
            }
        }

        let mut next_candidate = candidates.into_iter();
        for cell in 0..self.num_cells as usize {
            if !cell_in_use[cell] {
                match next_candidate.next() {
                    Some(row) => matches[row].best = cell as CellIndex,
                    None => break,
                }
            }
        }

        unused as f32 / self.num_cells as f32
    }

    fn count_used_cells(&self, matches: &[RowMatch]) -> (Vec<bool>, u32) {
        let mut cell_in_use = vec![false; self.num_cells as usize];
        let mut used = 0u32;
        for row_match in matches {
            let slot = &mut cell_in_use[row_match.best as usize];
            if !*slot {
                *slot = true;
                used += 1;
                if used == self.num_cells {
                    break;
                }
            }
        }
        (cell_in_use, used)
    }

    /// Writes the codebook to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!("saving codebook to {}", path.display());
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        write_u8(&mut writer, CODEBOOK_FORMAT)?;
        write_u64(&mut writer, u64::from(self.height))?;
        write_u64(&mut writer, u64::from(self.width))?;
        write_u64(&mut writer, u64::from(self.input_dim))?;
        for &value in &self.values {
            write_f32(&mut writer, value)?;
        }
        Ok(())
    }

    /// Reads a codebook back, rebinding it to the given lattice shapes.
    /// The map dimensions come from the file.
    pub fn load<P: AsRef<Path>>(path: P, global: GlobalTopology, local: LocalTopology) -> Result<Self> {
        let path = path.as_ref();
        info!("loading codebook from {}", path.display());
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let format = read_u8(&mut reader)?;
        if format != CODEBOOK_FORMAT {
            return Err(CartographError::CorruptInput(format!(
                "stored codebook has unknown format {}",
                format
            )));
        }
        let height = dimension_from_u64(read_u64(&mut reader)?, "height")?;
        let width = dimension_from_u64(read_u64(&mut reader)?, "width")?;
        let input_dim = u32::try_from(read_u64(&mut reader)?).map_err(|_| {
            CartographError::CorruptInput("stored input dimension exceeds 32 bits".to_string())
        })?;

        let topology = Topology::new(global, local, height, width)?;
        let num_cells = u32::from(height) * u32::from(width);
        let size = num_cells as usize * input_dim as usize;
        let mut values = Vec::with_capacity(size);
        for _ in 0..size {
            values.push(read_f32(&mut reader)?);
        }

        Ok(Self {
            height,
            width,
            input_dim,
            num_cells,
            topology,
            values,
        })
    }
}

/// Surrogate distance `|w|^2 - 2<w, x>` of one row against one prototype,
/// or `None` for rows the search must skip. The sparse scan stops at the
/// first index outside the effective dimension; indices are ascending, so
/// everything after it is outside too.
#[inline]
fn surrogate_distance(
    data: &SparseCorpus,
    row: usize,
    prototype: &[f32],
    prototype_squared: f32,
    effective_dim: u32,
) -> Option<f32> {
    let indices = data.row_indices(row);
    match indices.first() {
        Some(&first) if first < effective_dim => {}
        _ => return None,
    }

    let dot = match data.row_weights(row) {
        Some(weights) => {
            let mut result = 0.0f32;
            for (&index, &weight) in indices.iter().zip(weights.iter()) {
                if index >= effective_dim {
                    break;
                }
                result += prototype[index as usize] * f32::from(weight);
            }
            result
        }
        None => {
            let mut result = 0.0f32;
            for &index in indices {
                if index >= effective_dim {
                    break;
                }
                result += prototype[index as usize];
            }
            result
        }
    };

    Some(prototype_squared - 2.0 * dot)
}
