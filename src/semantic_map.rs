//! The semantic map: best matching units plus the co-occurrence count
//! tensor.
//!
//! After training, every snippet is assigned its best matching cell, and a
//! dense `num_cells x vocabulary_size` tensor counts how often each term
//! occurs in snippets landing on each cell. The tensor is column-major
//! over the vocabulary index (stride `num_cells`), and that layout is
//! preserved on disk.
//!
//! ## File layouts (little endian)
//!
//! Best matching units:
//!
//! ```text
//! u8   endianness flag (written as 0, ignored on read)
//! u8   format (= 0)
//! u64  height, width, vocabularySize, datasetSize
//! datasetSize x u16 best matching unit per snippet
//! ```
//!
//! Counts: the same header without `datasetSize`, then
//! `numCells * vocabularySize x u32`.

use log::{info, warn};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;

use crate::corpus::SparseCorpus;
use crate::error::{CartographError, Result};
use crate::som::codebook::Codebook;
use crate::storage::{
    dimension_from_u64, read_u16, read_u32, read_u64, read_u8, write_u16, write_u32, write_u64,
    write_u8,
};
use crate::CellIndex;

/// Format byte shared by the BMU and count files.
const SEMANTIC_MAP_FORMAT: u8 = 0;

/// Counts saturate one step below the 32-bit limit.
const MAX_COUNT: u32 = u32::MAX;

/// A trained semantic map.
pub struct SemanticMap {
    height: u16,
    width: u16,
    num_cells: u32,
    vocabulary_size: u32,
    dataset_size: u32,
    best_matching_units: Vec<CellIndex>,
    /// Column-major over the vocabulary index; `None` when count building
    /// was abandoned due to an overflowing cell.
    counts: Option<Vec<u32>>,
    vocabulary: Option<Vec<String>>,
}

impl SemanticMap {
    /// Builds a semantic map by searching the best matching unit of every
    /// snippet against a trained codebook, then counting term-cell
    /// associations.
    pub fn build(
        data: &SparseCorpus,
        codebook: &Codebook,
        train_vocab_cutoff: u32,
    ) -> Result<Self> {
        if data.num_cols() != codebook.input_dim() {
            return Err(CartographError::InvalidArgument(format!(
                "corpus vocabulary {} does not match the codebook dimension {}",
                data.num_cols(),
                codebook.input_dim()
            )));
        }
        info!("creating semantic map");

        let effective_dim = if train_vocab_cutoff > 0 {
            train_vocab_cutoff
        } else {
            data.num_cols()
        };
        let best_matching_units: Vec<CellIndex> = codebook
            .find_best_matching_units(data, effective_dim, false)
            .into_iter()
            .map(|m| m.cell)
            .collect();

        Ok(Self::from_best_matching_units(
            data,
            best_matching_units,
            codebook.height(),
            codebook.width(),
        ))
    }

    /// Builds a semantic map from precomputed best matching units.
    pub fn from_best_matching_units(
        data: &SparseCorpus,
        best_matching_units: Vec<CellIndex>,
        height: u16,
        width: u16,
    ) -> Self {
        let num_cells = u32::from(height) * u32::from(width);
        let mut map = Self {
            height,
            width,
            num_cells,
            vocabulary_size: data.num_cols(),
            dataset_size: data.num_rows(),
            best_matching_units,
            counts: None,
            vocabulary: None,
        };
        map.build_counts(data);
        map
    }

    /// Counts term-cell associations, dropping the tensor on overflow.
    fn build_counts(&mut self, data: &SparseCorpus) {
        info!("counting term-cell associations");
        match self.count_tensor(data) {
            Ok(counts) => self.counts = Some(counts),
            Err(error) => {
                warn!("{}; dropping the count tensor", error);
                self.counts = None;
            }
        }
    }

    fn count_tensor(&self, data: &SparseCorpus) -> Result<Vec<u32>> {
        let num_cells = self.num_cells as usize;
        let mut counts = vec![0u32; num_cells * self.vocabulary_size as usize];

        for row in 0..data.num_rows() as usize {
            let cell = self.best_matching_units[row];
            debug_assert!(u32::from(cell) < self.num_cells);
            for &term in data.row_indices(row) {
                let slot = &mut counts[num_cells * term as usize + cell as usize];
                if *slot >= MAX_COUNT - 1 {
                    return Err(CartographError::CapacityExceeded {
                        term,
                        cell,
                        max: MAX_COUNT,
                    });
                }
                *slot += 1;
            }
        }
        Ok(counts)
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

    /// Vocabulary size of the underlying corpus.
    #[inline]
    pub fn vocabulary_size(&self) -> u32 {
        self.vocabulary_size
    }

    /// Number of snippets the map was built from.
    #[inline]
    pub fn dataset_size(&self) -> u32 {
        self.dataset_size
    }

    /// Best matching cell per snippet.
    #[inline]
    pub fn best_matching_units(&self) -> &[CellIndex] {
        &self.best_matching_units
    }

    /// Whether the count tensor survived building.
    #[inline]
    pub fn has_counts(&self) -> bool {
        self.counts.is_some()
    }

    /// Snippets whose best matching unit is the cell at (row, col).
    pub fn find_snippets(&self, map_row: u16, map_col: u16) -> Vec<u32> {
        let cell = u32::from(map_row) * u32::from(self.width) + u32::from(map_col);
        self.best_matching_units
            .iter()
            .enumerate()
            .filter(|(_, &bmu)| u32::from(bmu) == cell)
            .map(|(snippet, _)| snippet as u32)
            .collect()
    }

    /// Total count of all terms associated with the cell at (row, col), or
    /// `None` when the tensor was dropped.
    pub fn cell_count(&self, map_row: u16, map_col: u16) -> Option<u32> {
        let counts = self.counts.as_ref()?;
        let num_cells = self.num_cells as usize;
        let cell = usize::from(map_row) * usize::from(self.width) + usize::from(map_col);
        Some(
            (0..self.vocabulary_size as usize)
                .map(|term| counts[num_cells * term + cell])
                .sum(),
        )
    }

    /// Per-cell counts of one vocabulary term, or `None` when the tensor
    /// was dropped.
    pub fn term_counts(&self, term: u32) -> Option<&[u32]> {
        let counts = self.counts.as_ref()?;
        let num_cells = self.num_cells as usize;
        Some(&counts[num_cells * term as usize..][..num_cells])
    }

    /// Attaches a vocabulary (one term per line, blank lines skipped) so
    /// terms can be resolved by index.
    pub fn associate_vocabulary<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        if self.vocabulary.is_some() {
            warn!("replacing the previously associated vocabulary");
        }
        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);
        let mut vocabulary = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if !line.is_empty() {
                vocabulary.push(line);
            }
        }
        self.vocabulary = Some(vocabulary);
        Ok(())
    }

    /// The term behind a vocabulary index, if a vocabulary is associated.
    pub fn vocabulary_term(&self, term: u32) -> Option<&str> {
        self.vocabulary
            .as_ref()?
            .get(term as usize)
            .map(String::as_str)
    }

    /// Writes the best-matching-unit array to a file.
    pub fn save_best_matching_units<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!("saving best matching units to {}", path.display());
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        write_u8(&mut writer, 0)?; // endianness flag, by convention
        write_u8(&mut writer, SEMANTIC_MAP_FORMAT)?;
        write_u64(&mut writer, u64::from(self.height))?;
        write_u64(&mut writer, u64::from(self.width))?;
        write_u64(&mut writer, u64::from(self.vocabulary_size))?;
        write_u64(&mut writer, u64::from(self.dataset_size))?;
        for &cell in &self.best_matching_units {
            write_u16(&mut writer, cell)?;
        }
        Ok(())
    }

    /// Writes the count tensor to a file, preserving its column-major
    /// layout. Fails when the tensor was dropped during building.
    pub fn save_counts<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let counts = self.counts.as_ref().ok_or_else(|| {
            CartographError::InvalidArgument(
                "the count tensor was dropped and cannot be saved".to_string(),
            )
        })?;
        let path = path.as_ref();
        info!("saving counts to {}", path.display());
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        write_u8(&mut writer, 0)?;
        write_u8(&mut writer, SEMANTIC_MAP_FORMAT)?;
        write_u64(&mut writer, u64::from(self.height))?;
        write_u64(&mut writer, u64::from(self.width))?;
        write_u64(&mut writer, u64::from(self.vocabulary_size))?;
        for &count in counts {
            write_u32(&mut writer, count)?;
        }
        Ok(())
    }

    /// Reads a semantic map back from its two artifact files.
    pub fn load<P: AsRef<Path>>(counts_path: P, best_matching_units_path: P) -> Result<Self> {
        let (height, width, vocabulary_size, dataset_size, best_matching_units) =
            load_best_matching_units(best_matching_units_path.as_ref())?;
        let counts = load_counts(counts_path.as_ref(), height, width, vocabulary_size)?;

        Ok(Self {
            height,
            width,
            num_cells: u32::from(height) * u32::from(width),
            vocabulary_size,
            dataset_size,
            best_matching_units,
            counts: Some(counts),
            vocabulary: None,
        })
    }

    /// Reads a semantic map from a best-matching-unit file alone; counts
    /// are unavailable on the result.
    pub fn load_best_matching_units<P: AsRef<Path>>(path: P) -> Result<Self> {
        let (height, width, vocabulary_size, dataset_size, best_matching_units) =
            load_best_matching_units(path.as_ref())?;
        Ok(Self {
            height,
            width,
            num_cells: u32::from(height) * u32::from(width),
            vocabulary_size,
            dataset_size,
            best_matching_units,
            counts: None,
            vocabulary: None,
        })
    }
}

type BmuFileContents = (u16, u16, u32, u32, Vec<CellIndex>);

fn load_best_matching_units(path: &Path) -> Result<BmuFileContents> {
    info!("loading best matching units from {}", path.display());
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let _endianness = read_u8(&mut reader)?;
    let format = read_u8(&mut reader)?;
    if format != SEMANTIC_MAP_FORMAT {
        return Err(CartographError::CorruptInput(format!(
            "stored BMU array has unknown format {}",
            format
        )));
    }
    let height = dimension_from_u64(read_u64(&mut reader)?, "height")?;
    let width = dimension_from_u64(read_u64(&mut reader)?, "width")?;
    let vocabulary_size = u32::try_from(read_u64(&mut reader)?).map_err(|_| {
        CartographError::CorruptInput("stored vocabulary size exceeds 32 bits".to_string())
    })?;
    let dataset_size = u32::try_from(read_u64(&mut reader)?).map_err(|_| {
        CartographError::CorruptInput("stored dataset size exceeds 32 bits".to_string())
    })?;

    let num_cells = u32::from(height) * u32::from(width);
    let mut best_matching_units = Vec::with_capacity(dataset_size as usize);
    for _ in 0..dataset_size {
        let cell = read_u16(&mut reader)?;
        if u32::from(cell) >= num_cells {
            return Err(CartographError::CorruptInput(format!(
                "stored best matching unit {} is outside the {} map cells",
                cell, num_cells
            )));
        }
        best_matching_units.push(cell);
    }

    Ok((height, width, vocabulary_size, dataset_size, best_matching_units))
}

fn load_counts(path: &Path, height: u16, width: u16, vocabulary_size: u32) -> Result<Vec<u32>> {
    info!("loading counts from {}", path.display());
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let _endianness = read_u8(&mut reader)?;
    let format = read_u8(&mut reader)?;
    if format != SEMANTIC_MAP_FORMAT {
        return Err(CartographError::CorruptInput(format!(
            "stored count array has unknown format {}",
            format
        )));
    }
    let stored_height = dimension_from_u64(read_u64(&mut reader)?, "height")?;
    let stored_width = dimension_from_u64(read_u64(&mut reader)?, "width")?;
    let stored_vocabulary = u32::try_from(read_u64(&mut reader)?).map_err(|_| {
        CartographError::CorruptInput("stored vocabulary size exceeds 32 bits".to_string())
    })?;
    if (stored_height, stored_width, stored_vocabulary) != (height, width, vocabulary_size) {
        return Err(CartographError::CorruptInput(
            "count and BMU files describe different maps".to_string(),
        ));
    }

    let len = u32::from(height) as usize * u32::from(width) as usize * vocabulary_size as usize;
    let mut counts = Vec::with_capacity(len);
    for _ in 0..len {
        counts.push(read_u32(&mut reader)?);
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::test_support::corpus_from_rows;
    use crate::topology::{GlobalTopology, LocalTopology, Topology};
    use std::io::Write as _;
    use tempfile::tempdir;

    fn map_from_bmus(data: &SparseCorpus, bmus: &[CellIndex]) -> SemanticMap {
        SemanticMap::from_best_matching_units(data, bmus.to_vec(), 2, 2)
    }

    #[test]
    fn test_count_layout_is_column_major_over_terms() {
        let data = corpus_from_rows(3, &[&[0, 2], &[0], &[1]]);
        let map = map_from_bmus(&data, &[1, 1, 3]);

        // Term 0 occurs twice on cell 1, term 1 once on cell 3, term 2
        // once on cell 1.
        assert_eq!(map.term_counts(0).unwrap(), &[0, 2, 0, 0]);
        assert_eq!(map.term_counts(1).unwrap(), &[0, 0, 0, 1]);
        assert_eq!(map.term_counts(2).unwrap(), &[0, 1, 0, 0]);
    }

    #[test]
    fn test_cell_count_sums_over_terms() {
        let data = corpus_from_rows(3, &[&[0, 2], &[0], &[1]]);
        let map = map_from_bmus(&data, &[1, 1, 3]);

        assert_eq!(map.cell_count(0, 1), Some(3)); // cell 1 on a 2x2 map
        assert_eq!(map.cell_count(1, 1), Some(1)); // cell 3
        assert_eq!(map.cell_count(0, 0), Some(0));
    }

    #[test]
    fn test_find_snippets() {
        let data = corpus_from_rows(3, &[&[0], &[1], &[2]]);
        let map = map_from_bmus(&data, &[2, 0, 2]);

        assert_eq!(map.find_snippets(1, 0), vec![0, 2]); // cell 2
        assert_eq!(map.find_snippets(0, 0), vec![1]);
        assert!(map.find_snippets(0, 1).is_empty());
    }

    #[test]
    fn test_build_against_codebook() {
        let topology =
            Topology::new(GlobalTopology::Plane, LocalTopology::Rect, 1, 3).unwrap();
        // One-hot prototypes: snippet {i} lands on cell i.
        let mut codebook = Codebook::new(1, 3, 3, topology);
        codebook
            .values_mut()
            .copy_from_slice(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        let corpus = corpus_from_rows(3, &[&[1], &[2], &[0]]);

        let map = SemanticMap::build(&corpus, &codebook, 0).unwrap();
        assert_eq!(map.best_matching_units(), &[1, 2, 0]);
        assert_eq!(map.term_counts(1).unwrap(), &[0, 1, 0]);
    }

    #[test]
    fn test_bmu_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bmus.bin");

        let data = corpus_from_rows(3, &[&[0], &[1], &[2]]);
        let map = map_from_bmus(&data, &[2, 0, 3]);
        map.save_best_matching_units(&path).unwrap();

        let loaded = SemanticMap::load_best_matching_units(&path).unwrap();
        assert_eq!(loaded.height(), 2);
        assert_eq!(loaded.width(), 2);
        assert_eq!(loaded.vocabulary_size(), 3);
        assert_eq!(loaded.dataset_size(), 3);
        assert_eq!(loaded.best_matching_units(), map.best_matching_units());
        assert!(!loaded.has_counts());
    }

    #[test]
    fn test_counts_file_roundtrip() {
        let dir = tempdir().unwrap();
        let counts_path = dir.path().join("counts.bin");
        let bmus_path = dir.path().join("bmus.bin");

        let data = corpus_from_rows(3, &[&[0, 2], &[0], &[1]]);
        let map = map_from_bmus(&data, &[1, 1, 3]);
        map.save_counts(&counts_path).unwrap();
        map.save_best_matching_units(&bmus_path).unwrap();

        let loaded = SemanticMap::load(&counts_path, &bmus_path).unwrap();
        assert!(loaded.has_counts());
        assert_eq!(loaded.term_counts(0).unwrap(), map.term_counts(0).unwrap());
        assert_eq!(loaded.term_counts(2).unwrap(), map.term_counts(2).unwrap());
    }

    #[test]
    fn test_bmu_out_of_range_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bmus.bin");

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[0u8, 0]); // endianness, format
        bytes.extend_from_slice(&2u64.to_le_bytes()); // height
        bytes.extend_from_slice(&2u64.to_le_bytes()); // width
        bytes.extend_from_slice(&3u64.to_le_bytes()); // vocabulary
        bytes.extend_from_slice(&1u64.to_le_bytes()); // dataset
        bytes.extend_from_slice(&9u16.to_le_bytes()); // cell 9 on a 4-cell map
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&bytes)
            .unwrap();

        assert!(SemanticMap::load_best_matching_units(&path).is_err());
    }

    #[test]
    fn test_vocabulary_association() {
        let dir = tempdir().unwrap();
        let vocab_path = dir.path().join("vocab.txt");
        std::fs::write(&vocab_path, "alpha\nbeta\n\ngamma\n").unwrap();

        let data = corpus_from_rows(3, &[&[0]]);
        let mut map = map_from_bmus(&data, &[0]);
        map.associate_vocabulary(&vocab_path).unwrap();

        assert_eq!(map.vocabulary_term(0), Some("alpha"));
        assert_eq!(map.vocabulary_term(2), Some("gamma"));
        assert_eq!(map.vocabulary_term(3), None);
    }
}
