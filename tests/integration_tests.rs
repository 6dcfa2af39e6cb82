//! Integration tests for the cartograph training engine.

use cartograph::{
    Codebook, ConvergenceLog, GlobalTopology, LocalTopology, Neighbourhood, SemanticMap,
    SparseCorpus, TrainingConfig,
};
use std::path::Path;
use tempfile::tempdir;

/// Encodes rows into the on-disk corpus layout (version 3, unweighted, or
/// version 2 when weights are given).
fn write_corpus_file(path: &Path, num_cols: u32, rows: &[(Vec<u32>, Option<Vec<u8>>)]) {
    let weighted = rows.iter().any(|(_, w)| w.is_some());
    let num_non_zero: u64 = rows.iter().map(|(indices, _)| indices.len() as u64).sum();

    let mut bytes = Vec::new();
    bytes.push(if weighted { 2u8 } else { 3u8 });
    bytes.extend_from_slice(&num_non_zero.to_le_bytes());
    bytes.extend_from_slice(&(rows.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&num_cols.to_le_bytes());
    for (indices, weights) in rows {
        bytes.extend_from_slice(&(indices.len() as u32).to_le_bytes());
        for index in indices {
            bytes.extend_from_slice(&index.to_le_bytes());
        }
        if weighted {
            match weights {
                Some(weights) => bytes.extend_from_slice(weights),
                None => bytes.extend(std::iter::repeat(1u8).take(indices.len())),
            }
        }
    }
    std::fs::write(path, bytes).unwrap();
}

/// A small corpus of eight snippets over a twelve-term vocabulary, built
/// from two loose topic clusters.
fn dummy_rows() -> Vec<(Vec<u32>, Option<Vec<u8>>)> {
    vec![
        (vec![0, 1, 2], None),
        (vec![0, 2, 3], None),
        (vec![1, 2, 4], None),
        (vec![0, 3, 4], None),
        (vec![7, 8, 10], None),
        (vec![7, 9, 11], None),
        (vec![8, 9, 10], None),
        (vec![7, 10, 11], None),
    ]
}

fn small_config() -> TrainingConfig {
    TrainingConfig {
        width: 4,
        height: 4,
        initial_radius: 4,
        update_exponent: 0.8,
        epochs: 5,
        global_topology: GlobalTopology::Torus,
        local_topology: LocalTopology::Circ,
        respect_lower_bound: true,
        train_vocab_cutoff: 0,
        dead_cell_update_strides: 2,
        seed: Some(42),
    }
}

#[test]
fn test_dummy_corpus_loads() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dummy.bin");
    write_corpus_file(&path, 12, &dummy_rows());

    let corpus = SparseCorpus::load(&path).unwrap();
    assert_eq!(corpus.num_rows(), 8);
    assert_eq!(corpus.num_cols(), 12);
    assert_eq!(corpus.num_non_zero(), 24);
    assert!(!corpus.has_weights());
}

#[test]
fn test_weighted_corpus_loads() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("weighted.bin");
    write_corpus_file(
        &path,
        6,
        &[
            (vec![0, 2], Some(vec![3, 1])),
            (vec![1, 5], Some(vec![2, 2])),
        ],
    );

    let corpus = SparseCorpus::load(&path).unwrap();
    assert!(corpus.has_weights());
    assert_eq!(corpus.row_weights(0).unwrap(), &[3, 1]);
    // Weighted rows square their weights: 9 + 1.
    assert_eq!(corpus.sum_of_squares()[0], 10.0);
}

#[test]
fn test_end_to_end_training() {
    let dir = tempdir().unwrap();
    let corpus_path = dir.path().join("corpus.bin");
    write_corpus_file(&corpus_path, 12, &dummy_rows());

    let config = small_config();
    let topology = config.topology().unwrap();
    let data = SparseCorpus::load(&corpus_path).unwrap();

    let mut codebook = Codebook::new(config.height, config.width, data.num_cols(), topology);
    codebook.init_random(config.seed.unwrap());
    let mut neighbourhood = Neighbourhood::new(
        config.height,
        config.width,
        topology,
        config.update_exponent,
        config.initial_radius,
    );
    let mut log = ConvergenceLog::create(dir.path().join("convergence.tsv")).unwrap();

    cartograph::train(
        &mut codebook,
        &mut neighbourhood,
        &data,
        &config,
        &mut log,
        None,
    )
    .unwrap();
    drop(log);

    // Every prototype value stays within the binary data range.
    assert!(codebook.values().iter().all(|&v| (0.0..=1.0).contains(&v)));

    // The radius field shrank but never below one.
    assert!(neighbourhood.radius_max() < config.initial_radius as f32);
    assert!(neighbourhood.radius_min() >= 1.0);

    // The log holds a header, one row per epoch, and a final flush row.
    let contents = std::fs::read_to_string(dir.path().join("convergence.tsv")).unwrap();
    assert_eq!(contents.lines().count(), 1 + config.epochs as usize + 1);

    // The settled map assigns every snippet a valid cell, uses more than
    // one cell, and agrees with its own snippet lookup.
    let map = SemanticMap::build(&data, &codebook, 0).unwrap();
    let bmus = map.best_matching_units();
    assert_eq!(bmus.len(), 8);
    assert!(bmus.iter().all(|&cell| u32::from(cell) < 16));
    let distinct: std::collections::HashSet<u16> = bmus.iter().copied().collect();
    assert!(distinct.len() >= 2);
    let (row, col) = (bmus[0] / 4, bmus[0] % 4);
    assert!(map.find_snippets(row, col).contains(&0));
}

#[test]
fn test_artifact_roundtrips() {
    let dir = tempdir().unwrap();
    let corpus_path = dir.path().join("corpus.bin");
    write_corpus_file(&corpus_path, 12, &dummy_rows());

    let config = small_config();
    let topology = config.topology().unwrap();
    let data = SparseCorpus::load(&corpus_path).unwrap();

    let mut codebook = Codebook::new(config.height, config.width, data.num_cols(), topology);
    codebook.init_random(7);

    // Codebook file: bytes and values survive a save/load cycle.
    let codebook_path = dir.path().join("codebook.bin");
    codebook.save(&codebook_path).unwrap();
    let loaded = Codebook::load(
        &codebook_path,
        config.global_topology,
        config.local_topology,
    )
    .unwrap();
    assert_eq!(loaded.values(), codebook.values());
    let roundtrip_path = dir.path().join("codebook2.bin");
    loaded.save(&roundtrip_path).unwrap();
    assert_eq!(
        std::fs::read(&codebook_path).unwrap(),
        std::fs::read(&roundtrip_path).unwrap()
    );

    // Neighbourhood file.
    let neighbourhood = Neighbourhood::new(
        config.height,
        config.width,
        topology,
        config.update_exponent,
        config.initial_radius,
    );
    let neighbourhood_path = dir.path().join("neighbourhood.bin");
    neighbourhood.save(&neighbourhood_path).unwrap();
    let loaded =
        Neighbourhood::load(&neighbourhood_path, topology, config.update_exponent).unwrap();
    assert_eq!(loaded.values(), neighbourhood.values());

    // BMU and count files.
    let map = SemanticMap::build(&data, &codebook, 0).unwrap();
    let bmus_path = dir.path().join("bmus.bin");
    let counts_path = dir.path().join("counts.bin");
    map.save_best_matching_units(&bmus_path).unwrap();
    map.save_counts(&counts_path).unwrap();

    let loaded = SemanticMap::load(&counts_path, &bmus_path).unwrap();
    assert_eq!(loaded.best_matching_units(), map.best_matching_units());
    assert_eq!(loaded.vocabulary_size(), 12);
    assert_eq!(loaded.dataset_size(), 8);
    for term in 0..12 {
        assert_eq!(loaded.term_counts(term), map.term_counts(term));
    }
}

#[test]
fn test_bmu_search_is_reproducible_across_runs() {
    let dir = tempdir().unwrap();
    let corpus_path = dir.path().join("corpus.bin");
    write_corpus_file(&corpus_path, 12, &dummy_rows());
    let data = SparseCorpus::load(&corpus_path).unwrap();

    let config = small_config();
    let topology = config.topology().unwrap();

    let mut first = Codebook::new(config.height, config.width, data.num_cols(), topology);
    let mut second = Codebook::new(config.height, config.width, data.num_cols(), topology);
    first.init_random(42);
    second.init_random(42);
    assert_eq!(first.values(), second.values());

    let matches_a = first.find_best_and_next_best_matching_units(&data, 0);
    let matches_b = second.find_best_and_next_best_matching_units(&data, 0);
    for (a, b) in matches_a.iter().zip(matches_b.iter()) {
        assert_eq!(a.best, b.best);
        assert_eq!(a.next_best, b.next_best);
        assert_eq!(a.distance, b.distance);
    }
}

#[test]
fn test_gap_error_matches_distinct_bmu_count() {
    let dir = tempdir().unwrap();
    let corpus_path = dir.path().join("corpus.bin");
    write_corpus_file(&corpus_path, 12, &dummy_rows());
    let data = SparseCorpus::load(&corpus_path).unwrap();

    let config = small_config();
    let topology = config.topology().unwrap();
    let mut codebook = Codebook::new(config.height, config.width, data.num_cols(), topology);
    codebook.init_random(3);

    let matches = codebook.find_best_and_next_best_matching_units(&data, 0);
    let distinct: std::collections::HashSet<u16> = matches.iter().map(|m| m.best).collect();
    let expected = 1.0 - distinct.len() as f32 / codebook.num_cells() as f32;
    assert!((codebook.gap_error(&matches) - expected).abs() < 1e-6);
}

#[test]
fn test_training_with_cutoff_and_weights() {
    let dir = tempdir().unwrap();
    let corpus_path = dir.path().join("corpus.bin");
    write_corpus_file(
        &corpus_path,
        12,
        &[
            (vec![0, 1, 8], Some(vec![2, 1, 1])),
            (vec![1, 2, 9], Some(vec![1, 3, 1])),
            (vec![0, 2, 10], Some(vec![1, 1, 2])),
            (vec![3, 4, 11], Some(vec![2, 2, 1])),
            (vec![3, 5, 8], Some(vec![1, 1, 1])),
            (vec![4, 5, 9], Some(vec![3, 1, 2])),
        ],
    );

    let config = TrainingConfig {
        train_vocab_cutoff: 8,
        epochs: 3,
        dead_cell_update_strides: 0,
        ..small_config()
    };
    let topology = config.topology().unwrap();
    let data = SparseCorpus::load(&corpus_path).unwrap();

    let mut codebook = Codebook::new(config.height, config.width, data.num_cols(), topology);
    codebook.init_random(config.seed.unwrap());
    let mut neighbourhood = Neighbourhood::new(
        config.height,
        config.width,
        topology,
        config.update_exponent,
        config.initial_radius,
    );
    let mut log = ConvergenceLog::create(dir.path().join("convergence.tsv")).unwrap();

    cartograph::train(
        &mut codebook,
        &mut neighbourhood,
        &data,
        &config,
        &mut log,
        None,
    )
    .unwrap();

    // The final epoch updates without the cutoff, so the high terms (8..)
    // can carry non-zero prototype mass again.
    let high_mass: f32 = codebook
        .values()
        .chunks(12)
        .map(|prototype| prototype[8..].iter().sum::<f32>())
        .sum();
    assert!(high_mass > 0.0);
}

#[test]
fn test_hexagonal_training_requires_even_height() {
    let config = TrainingConfig {
        local_topology: LocalTopology::Hexa,
        height: 5,
        ..small_config()
    };
    assert!(config.validate().is_err());

    let config = TrainingConfig {
        local_topology: LocalTopology::Hexa,
        height: 4,
        ..small_config()
    };
    config.validate().unwrap();
}
