//! Sparse corpus loading.
//!
//! A corpus is an immutable CSR-style sparse binary matrix: one row per
//! text snippet, one column per vocabulary term, a 1 wherever the term
//! occurs in the snippet. Version-2 files additionally carry one byte of
//! weight per occurrence.
//!
//! ## File layout (little endian)
//!
//! ```text
//! u8   version              2 => weighted, 3 => unweighted
//! u64  numNonZero
//! u32  numRows
//! u32  numCols
//! per row:
//!   u32  entriesInRow
//!   entriesInRow x u32      ascending column indices
//!   entriesInRow x u8       weights (version 2 only)
//! ```
//!
//! The file is memory-mapped and parsed in one pass; the loader rejects
//! truncated files, out-of-range indices, and non-ascending rows instead
//! of reading past buffers.

use log::info;
use memmap2::Mmap;
use once_cell::sync::OnceCell;
use std::fs::File;
use std::path::Path;

use crate::error::{CartographError, Result};

/// Corpus format byte for weighted occurrence files.
const VERSION_WEIGHTED: u8 = 2;
/// Corpus format byte for plain binary occurrence files.
const VERSION_BINARY: u8 = 3;
/// Entry total is capped by the 32-bit index pointer type.
const MAX_NON_ZERO: u64 = u32::MAX as u64;

/// An immutable sparse binary snippet-by-term matrix.
#[derive(Debug)]
pub struct SparseCorpus {
    num_rows: u32,
    num_cols: u32,
    num_non_zero: u32,
    index_pointers: Vec<u32>,
    indices: Vec<u32>,
    weights: Option<Vec<u8>>,
    sum_of_squares: OnceCell<Vec<f32>>,
}

/// Byte-slice cursor over the mapped corpus file.
struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                CartographError::CorruptInput("unexpected end of corpus file".to_string())
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}

impl SparseCorpus {
    /// Memory-maps and parses a corpus file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CartographError::FileNotFound(path.to_path_buf()));
        }
        info!("loading corpus from {}", path.display());
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let corpus = Self::parse(&mmap)?;
        info!(
            "loaded corpus: {} snippets, {} terms, {} occurrences{}",
            corpus.num_rows,
            corpus.num_cols,
            corpus.num_non_zero,
            if corpus.has_weights() { " (weighted)" } else { "" }
        );
        Ok(corpus)
    }

    /// Parses a corpus from raw bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);

        let has_weights = match reader.u8()? {
            VERSION_WEIGHTED => true,
            VERSION_BINARY => false,
            other => {
                return Err(CartographError::CorruptInput(format!(
                    "expected corpus format version 2 or 3, got {}",
                    other
                )))
            }
        };

        let num_non_zero = reader.u64()?;
        if num_non_zero > MAX_NON_ZERO {
            return Err(CartographError::CorruptInput(format!(
                "corpus declares {} entries but at most {} are supported",
                num_non_zero, MAX_NON_ZERO
            )));
        }
        let num_non_zero = num_non_zero as u32;

        let num_rows = reader.u32()?;
        let num_cols = reader.u32()?;

        let mut index_pointers = Vec::with_capacity(num_rows as usize + 1);
        index_pointers.push(0u32);
        let mut indices = Vec::with_capacity(num_non_zero as usize);
        let mut weights = has_weights.then(|| Vec::with_capacity(num_non_zero as usize));

        let mut pointer = 0u32;
        for row in 0..num_rows {
            let entries_in_row = reader.u32()?;
            pointer = pointer
                .checked_add(entries_in_row)
                .filter(|&p| p <= num_non_zero)
                .ok_or_else(|| {
                    CartographError::CorruptInput(format!(
                        "row {} pushes the entry total past the declared {}",
                        row, num_non_zero
                    ))
                })?;
            index_pointers.push(pointer);

            let mut previous: Option<u32> = None;
            for _ in 0..entries_in_row {
                let index = reader.u32()?;
                if index >= num_cols {
                    return Err(CartographError::CorruptInput(format!(
                        "row {} holds term index {} outside the vocabulary of {}",
                        row, index, num_cols
                    )));
                }
                if previous.is_some_and(|p| index <= p) {
                    return Err(CartographError::CorruptInput(format!(
                        "term indices in row {} are not strictly ascending",
                        row
                    )));
                }
                previous = Some(index);
                indices.push(index);
            }

            if let Some(weights) = weights.as_mut() {
                weights.extend_from_slice(reader.take(entries_in_row as usize)?);
            }
        }

        if pointer != num_non_zero {
            return Err(CartographError::CorruptInput(format!(
                "rows hold {} entries but the header declares {}",
                pointer, num_non_zero
            )));
        }

        Ok(Self {
            num_rows,
            num_cols,
            num_non_zero,
            index_pointers,
            indices,
            weights,
            sum_of_squares: OnceCell::new(),
        })
    }

    /// Number of snippets.
    #[inline]
    pub fn num_rows(&self) -> u32 {
        self.num_rows
    }

    /// Vocabulary size.
    #[inline]
    pub fn num_cols(&self) -> u32 {
        self.num_cols
    }

    /// Total number of term occurrences.
    #[inline]
    pub fn num_non_zero(&self) -> u32 {
        self.num_non_zero
    }

    /// Whether occurrences carry weights.
    #[inline]
    pub fn has_weights(&self) -> bool {
        self.weights.is_some()
    }

    /// Ascending term indices of one row.
    #[inline]
    pub fn row_indices(&self, row: usize) -> &[u32] {
        let start = self.index_pointers[row] as usize;
        let end = self.index_pointers[row + 1] as usize;
        &self.indices[start..end]
    }

    /// Weights of one row, aligned with [`Self::row_indices`].
    #[inline]
    pub fn row_weights(&self, row: usize) -> Option<&[u8]> {
        let weights = self.weights.as_ref()?;
        let start = self.index_pointers[row] as usize;
        let end = self.index_pointers[row + 1] as usize;
        Some(&weights[start..end])
    }

    /// Number of occurrences in one row.
    #[inline]
    pub fn row_len(&self, row: usize) -> usize {
        (self.index_pointers[row + 1] - self.index_pointers[row]) as usize
    }

    /// Per-row squared norm: the sum of squared weights, or the occurrence
    /// count for unweighted corpora. Computed once on first use.
    pub fn sum_of_squares(&self) -> &[f32] {
        self.sum_of_squares.get_or_init(|| {
            (0..self.num_rows as usize)
                .map(|row| match self.row_weights(row) {
                    Some(weights) => weights
                        .iter()
                        .map(|&w| u64::from(w) * u64::from(w))
                        .sum::<u64>() as f32,
                    None => self.row_len(row) as f32,
                })
                .collect()
        })
    }

    /// Smallest vocabulary cutoff that leaves no non-empty row without
    /// trainable terms, i.e. the largest leading term index across rows.
    pub fn min_cutoff_to_avoid_empty_rows(&self) -> u32 {
        (0..self.num_rows as usize)
            .filter_map(|row| self.row_indices(row).first().copied())
            .max()
            .unwrap_or(0)
    }
}
