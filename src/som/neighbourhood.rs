//! Per-cell adaptive neighbourhood radii.
//!
//! Every cell carries its own update radius. After each epoch the radii
//! shrink exponentially, but cells sitting near a *topographic
//! discontinuity* (a snippet whose best and second-best matching cells are
//! far apart on the lattice) are held open so the map can still fold that
//! region. Influence and lower bound follow Kiviluoto
//! (DOI 10.1109/ICNN.1996.548907), equations (3) and (5).

use log::{debug, info};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{CartographError, Result};
use crate::som::codebook::RowMatch;
use crate::storage::{dimension_from_u64, read_f32, read_u64, read_u8, write_f32, write_u64, write_u8};
use crate::topology::Topology;
use crate::CellIndex;

/// sqrt(e), the peak factor of the bell-shaped influence.
const SQRT_E: f64 = 1.648_721_270_700_128_2;

/// Format byte of the neighbourhood file.
const NEIGHBOURHOOD_FORMAT: u8 = 0;

/// A snippet whose two best matching cells are more than one lattice step
/// apart.
#[derive(Debug, Clone, Copy)]
pub struct TopographicDiscontinuity {
    /// Best matching cell.
    pub cell1: CellIndex,
    /// Second-best matching cell.
    pub cell2: CellIndex,
    /// Lattice distance between the two.
    pub distance: u32,
}

/// The per-cell radius field and its adaptive update rule.
pub struct Neighbourhood {
    height: u16,
    width: u16,
    topology: Topology,
    update_exponent: f32,
    values: Vec<f32>,
    radius_min: f32,
    radius_max: f32,
}

impl Neighbourhood {
    /// Creates a radius field with every cell at `initial_radius`.
    pub fn new(
        height: u16,
        width: u16,
        topology: Topology,
        update_exponent: f32,
        initial_radius: u32,
    ) -> Self {
        let num_cells = usize::from(height) * usize::from(width);
        let initial_radius = initial_radius as f32;
        Self {
            height,
            width,
            topology,
            update_exponent,
            values: vec![initial_radius; num_cells],
            radius_min: initial_radius,
            radius_max: initial_radius,
        }
    }

    /// Influence of a snippet that landed on `source` onto the prototype of
    /// `target`, using the target cell's current radius.
    ///
    /// The bell shape is normalized so the influences over a radius sum to
    /// roughly one; it is zero at and beyond the radius.
    #[inline]
    pub fn influence(&self, source: CellIndex, target: CellIndex) -> f32 {
        let d = f64::from(self.topology.cell_distance(source, target));
        let r = f64::from(self.values[target as usize]);
        if d < r {
            ((1.0 - SQRT_E * (-0.5 * d * d / (r * r)).exp()) / (r * (1.0 - SQRT_E))) as f32
        } else {
            0.0
        }
    }

    /// Shrinks every cell's radius by the update exponent, bounded below by
    /// the discontinuities observed this epoch when `respect_lower_bound`
    /// is set. Returns the topographic error.
    pub fn update(&mut self, matches: &[RowMatch], respect_lower_bound: bool) -> f32 {
        let discontinuities = self.topographic_discontinuities(matches);
        debug!(
            "{} topographic discontinuities over {} rows",
            discontinuities.len(),
            matches.len()
        );

        let topology = self.topology;
        let exponent = self.update_exponent;
        let discontinuities_ref = &discontinuities;
        self.values.par_iter_mut().enumerate().for_each(|(cell, value)| {
            let shrunk = value.powf(exponent);
            *value = if respect_lower_bound {
                let mut lower_bound = 1.0f32;
                for discontinuity in discontinuities_ref {
                    let bound = radius_lower_bound(&topology, cell as CellIndex, discontinuity);
                    lower_bound = lower_bound.max(bound as f32);
                }
                shrunk.max(lower_bound)
            } else {
                shrunk
            };
        });

        self.radius_min = self
            .values
            .par_iter()
            .copied()
            .reduce(|| f32::MAX, f32::min);
        self.radius_max = self.values.par_iter().copied().reduce(|| 0.0, f32::max);

        (discontinuities.len() + 1) as f32 / matches.len() as f32
    }

    /// Collects the discontinuities of one epoch's matches.
    fn topographic_discontinuities(&self, matches: &[RowMatch]) -> Vec<TopographicDiscontinuity> {
        let mut discontinuities = Vec::new();
        for row_match in matches {
            let distance = self
                .topology
                .cell_distance(row_match.best, row_match.next_best);
            if distance > 1 {
                discontinuities.push(TopographicDiscontinuity {
                    cell1: row_match.best,
                    cell2: row_match.next_best,
                    distance,
                });
            }
        }
        discontinuities
    }

    /// Smallest radius observed after the last update.
    #[inline]
    pub fn radius_min(&self) -> f32 {
        self.radius_min
    }

    /// Largest radius observed after the last update.
    #[inline]
    pub fn radius_max(&self) -> f32 {
        self.radius_max
    }

    /// The raw per-cell radii.
    #[inline]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Writes the radius field to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!("saving neighbourhood to {}", path.display());
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        write_u8(&mut writer, NEIGHBOURHOOD_FORMAT)?;
        write_u64(&mut writer, u64::from(self.height))?;
        write_u64(&mut writer, u64::from(self.width))?;
        for &value in &self.values {
            write_f32(&mut writer, value)?;
        }
        Ok(())
    }

    /// Reads a radius field back, rebinding it to the given geometry and
    /// update exponent.
    pub fn load<P: AsRef<Path>>(
        path: P,
        topology: Topology,
        update_exponent: f32,
    ) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let format = read_u8(&mut reader)?;
        if format != NEIGHBOURHOOD_FORMAT {
            return Err(CartographError::CorruptInput(format!(
                "stored neighbourhood has unknown format {}",
                format
            )));
        }
        let height = dimension_from_u64(read_u64(&mut reader)?, "height")?;
        let width = dimension_from_u64(read_u64(&mut reader)?, "width")?;

        let num_cells = usize::from(height) * usize::from(width);
        let mut values = Vec::with_capacity(num_cells);
        for _ in 0..num_cells {
            values.push(read_f32(&mut reader)?);
        }

        let radius_min = values.iter().copied().fold(f32::MAX, f32::min);
        let radius_max = values.iter().copied().fold(0.0, f32::max);

        Ok(Self {
            height,
            width,
            topology,
            update_exponent,
            values,
            radius_min,
            radius_max,
        })
    }
}

/// Lower bound a single discontinuity imposes on the radius of `cell`:
/// the full discontinuity distance inside the ball spanned by both
/// endpoints, the remaining distance when only partially inside, and one
/// otherwise.
fn radius_lower_bound(
    topology: &Topology,
    cell: CellIndex,
    discontinuity: &TopographicDiscontinuity,
) -> u32 {
    let d1 = topology.cell_distance(cell, discontinuity.cell1);
    let d2 = topology.cell_distance(cell, discontinuity.cell2);
    if d1.max(d2) <= discontinuity.distance {
        discontinuity.distance
    } else if d1.min(d2) < discontinuity.distance {
        discontinuity.distance - d1.min(d2)
    } else {
        1
    }
}
