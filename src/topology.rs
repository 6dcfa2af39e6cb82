//! Lattice distance functions for the map grid.
//!
//! A topology pairs a global map shape (plane or torus) with a local
//! neighbour shape (rectangular, hexagonal, or circular). Every distance is
//! a pure integer-valued function of two grid positions and satisfies
//! identity, symmetry, and the triangle inequality on its lattice.
//!
//! The hexagonal lattice uses the "pointy top" layout with odd rows shifted
//! by half a cell; see <https://www.redblobgames.com/grids/hexagons/>.

use serde::{Deserialize, Serialize};

use crate::error::{CartographError, Result};
use crate::CellIndex;

/// Global shape of the map.
///
/// The discriminants are the wire values accepted by the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum GlobalTopology {
    /// Connects east/west and north/south.
    Torus = 0,
    /// Connects east/west with one twist. Declared but without a distance
    /// function; rejected at construction.
    Moebius = 1,
    /// Connects east/west. Declared but without a distance function;
    /// rejected at construction.
    Tube = 2,
    /// No wrap-around.
    Plane = 4,
}

impl GlobalTopology {
    /// Human-readable description for run reports.
    pub fn describe(&self) -> &'static str {
        match self {
            GlobalTopology::Torus => "torus (connecting east/west and north/south)",
            GlobalTopology::Moebius => "moebius (connecting east/west with one twist)",
            GlobalTopology::Tube => "tube (connecting east/west)",
            GlobalTopology::Plane => "plane",
        }
    }
}

impl TryFrom<u8> for GlobalTopology {
    type Error = CartographError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(GlobalTopology::Torus),
            1 => Ok(GlobalTopology::Moebius),
            2 => Ok(GlobalTopology::Tube),
            4 => Ok(GlobalTopology::Plane),
            other => Err(CartographError::InvalidArgument(format!(
                "unknown global topology {} (expected 0, 1, 2, or 4)",
                other
            ))),
        }
    }
}

/// Local neighbour shape of a cell.
///
/// The discriminant of each variant is both its wire value and its
/// neighbour count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LocalTopology {
    /// Four neighbours; Euclidean distance rounded up.
    Circ = 4,
    /// Six neighbours; axial hexagonal distance.
    Hexa = 6,
    /// Eight neighbours; Chebyshev distance.
    Rect = 8,
}

impl LocalTopology {
    /// Human-readable description for run reports.
    pub fn describe(&self) -> &'static str {
        match self {
            LocalTopology::Circ => "circular (4 neighbours)",
            LocalTopology::Hexa => "hexagonal (6 neighbours)",
            LocalTopology::Rect => "rectangular (8 neighbours)",
        }
    }
}

impl TryFrom<u8> for LocalTopology {
    type Error = CartographError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            4 => Ok(LocalTopology::Circ),
            6 => Ok(LocalTopology::Hexa),
            8 => Ok(LocalTopology::Rect),
            other => Err(CartographError::InvalidArgument(format!(
                "unknown local topology {} (expected 4, 6, or 8)",
                other
            ))),
        }
    }
}

/// A concrete lattice geometry: a (global, local) pair bound to map
/// dimensions.
///
/// Constructing a `Topology` fails for pairs that have no distance
/// function, so a held value is always usable.
#[derive(Debug, Clone, Copy)]
pub struct Topology {
    global: GlobalTopology,
    local: LocalTopology,
    height: u16,
    width: u16,
}

impl Topology {
    /// Binds a topology pair to map dimensions.
    ///
    /// Returns [`CartographError::InvalidTopology`] for the declared but
    /// unimplemented global shapes (moebius, tube).
    pub fn new(
        global: GlobalTopology,
        local: LocalTopology,
        height: u16,
        width: u16,
    ) -> Result<Self> {
        match global {
            GlobalTopology::Plane | GlobalTopology::Torus => Ok(Self {
                global,
                local,
                height,
                width,
            }),
            GlobalTopology::Moebius | GlobalTopology::Tube => {
                Err(CartographError::InvalidTopology { global, local })
            }
        }
    }

    /// The global map shape.
    #[inline]
    pub fn global(&self) -> GlobalTopology {
        self.global
    }

    /// The local neighbour shape.
    #[inline]
    pub fn local(&self) -> LocalTopology {
        self.local
    }

    /// Lattice distance between two grid positions.
    #[inline]
    pub fn distance(&self, row1: u16, col1: u16, row2: u16, col2: u16) -> u32 {
        let (r1, c1) = (i64::from(row1), i64::from(col1));
        let (r2, c2) = (i64::from(row2), i64::from(col2));
        let (h, w) = (i64::from(self.height), i64::from(self.width));

        match (self.global, self.local) {
            (GlobalTopology::Plane, LocalTopology::Rect) => rect_plane(r1, c1, r2, c2),
            (GlobalTopology::Torus, LocalTopology::Rect) => rect_torus(r1, c1, r2, c2, h, w),
            (GlobalTopology::Plane, LocalTopology::Circ) => circ_plane(r1, c1, r2, c2),
            (GlobalTopology::Torus, LocalTopology::Circ) => circ_torus(r1, c1, r2, c2, h, w),
            (GlobalTopology::Plane, LocalTopology::Hexa) => hexa_plane(r1, c1, r2, c2),
            (GlobalTopology::Torus, LocalTopology::Hexa) => hexa_torus(r1, c1, r2, c2, h, w),
            // Ruled out by the constructor.
            (GlobalTopology::Moebius | GlobalTopology::Tube, _) => unreachable!(),
        }
    }

    /// Lattice distance between two linear cell indices.
    #[inline]
    pub fn cell_distance(&self, a: CellIndex, b: CellIndex) -> u32 {
        let (r1, c1) = self.cell_coords(a);
        let (r2, c2) = self.cell_coords(b);
        self.distance(r1, c1, r2, c2)
    }

    /// Splits a linear cell index into (row, column).
    #[inline]
    pub fn cell_coords(&self, cell: CellIndex) -> (u16, u16) {
        let width = u32::from(self.width);
        let cell = u32::from(cell);
        ((cell / width) as u16, (cell % width) as u16)
    }
}

#[inline]
fn rect_plane(r1: i64, c1: i64, r2: i64, c2: i64) -> u32 {
    (r1 - r2).abs().max((c1 - c2).abs()) as u32
}

#[inline]
fn rect_torus(r1: i64, c1: i64, r2: i64, c2: i64, h: i64, w: i64) -> u32 {
    let dr = (r1 - r2).abs();
    let dc = (c1 - c2).abs();
    dr.min(h - dr).max(dc.min(w - dc)) as u32
}

#[inline]
fn circ_plane(r1: i64, c1: i64, r2: i64, c2: i64) -> u32 {
    let dr = (r1 - r2) as f64;
    let dc = (c1 - c2) as f64;
    (dr * dr + dc * dc).sqrt().ceil() as u32
}

#[inline]
fn circ_torus(r1: i64, c1: i64, r2: i64, c2: i64, h: i64, w: i64) -> u32 {
    let dr = (r1 - r2).abs();
    let dc = (c1 - c2).abs();
    let dr = dr.min(h - dr) as f64;
    let dc = dc.min(w - dc) as f64;
    (dr * dr + dc * dc).sqrt().ceil() as u32
}

/// Axial hexagonal distance after converting the odd-row-shifted offset
/// coordinates; the expression is the usual max of the three cube-axis
/// deltas.
#[inline]
fn hexa_plane(r1: i64, c1: i64, r2: i64, c2: i64) -> u32 {
    let a = (r1 - r2).abs();
    let shift = (r2 - (r2 & 1)) / 2 - (r1 - (r1 & 1)) / 2;
    let b = (c1 - c2 + shift).abs();
    let c = (c1 - c2 + r1 - r2 + shift).abs();
    a.max(b).max(c) as u32
}

/// Minimum of the plane distance over the row and column wrap-around
/// offsets of the torus.
#[inline]
fn hexa_torus(r1: i64, c1: i64, r2: i64, c2: i64, h: i64, w: i64) -> u32 {
    let candidates = [
        hexa_plane(r1, c1, r2, c2),
        hexa_plane(r1, c1, r2 + h, c2),
        hexa_plane(r1, c1, r2, c2 + w),
        hexa_plane(r1, c1, r2 + h, c2 + w),
        hexa_plane(r1 + h, c1, r2, c2),
        hexa_plane(r1, c1 + w, r2, c2),
        hexa_plane(r1 + h, c1 + w, r2, c2),
    ];
    candidates.into_iter().min().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_topologies(height: u16, width: u16) -> Vec<Topology> {
        let mut result = Vec::new();
        for global in [GlobalTopology::Plane, GlobalTopology::Torus] {
            for local in [LocalTopology::Rect, LocalTopology::Hexa, LocalTopology::Circ] {
                result.push(Topology::new(global, local, height, width).unwrap());
            }
        }
        result
    }

    #[test]
    fn test_identity() {
        for topology in all_topologies(5, 4) {
            for r in [0u16, 2, 4] {
                for c in [0u16, 2, 3] {
                    assert_eq!(topology.distance(r, c, r, c), 0);
                }
            }
        }
    }

    #[test]
    fn test_symmetry() {
        let points = [(0u16, 0u16), (0, 2), (2, 0), (2, 2), (4, 3), (3, 1)];
        for topology in all_topologies(5, 4) {
            for &(r1, c1) in &points {
                for &(r2, c2) in &points {
                    assert_eq!(
                        topology.distance(r1, c1, r2, c2),
                        topology.distance(r2, c2, r1, c1),
                        "symmetry violated for {:?}/{:?} at ({},{})-({},{})",
                        topology.global(),
                        topology.local(),
                        r1,
                        c1,
                        r2,
                        c2
                    );
                }
            }
        }
    }

    #[test]
    fn test_triangle_inequality() {
        let points = [(0u16, 0u16), (0, 2), (2, 0), (2, 3), (3, 1), (3, 3)];
        for topology in all_topologies(4, 4) {
            for &(r1, c1) in &points {
                for &(r2, c2) in &points {
                    for &(r3, c3) in &points {
                        let direct = topology.distance(r1, c1, r3, c3);
                        let via = topology.distance(r1, c1, r2, c2)
                            + topology.distance(r2, c2, r3, c3);
                        assert!(
                            direct <= via,
                            "triangle inequality violated for {:?}/{:?}",
                            topology.global(),
                            topology.local()
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_hexa_neighbours_of_even_row_cell() {
        for global in [GlobalTopology::Plane, GlobalTopology::Torus] {
            let topology = Topology::new(global, LocalTopology::Hexa, 10, 10).unwrap();
            // Neighbours of (2, 2): even rows shift their upper/lower
            // neighbours towards the left.
            for (r, c) in [(1, 1), (1, 2), (2, 1), (2, 3), (3, 1), (3, 2)] {
                assert_eq!(topology.distance(2, 2, r, c), 1, "({}, {})", r, c);
            }
        }
    }

    #[test]
    fn test_hexa_neighbours_of_odd_row_cell() {
        for global in [GlobalTopology::Plane, GlobalTopology::Torus] {
            let topology = Topology::new(global, LocalTopology::Hexa, 10, 10).unwrap();
            for (r, c) in [(2, 2), (2, 3), (3, 1), (3, 3), (4, 2), (4, 3)] {
                assert_eq!(topology.distance(3, 2, r, c), 1, "({}, {})", r, c);
            }
        }
    }

    #[test]
    fn test_hexa_plane_long_distances() {
        let topology = Topology::new(GlobalTopology::Plane, LocalTopology::Hexa, 32, 32).unwrap();
        assert_eq!(topology.distance(0, 0, 10, 0), 10);
        assert_eq!(topology.distance(0, 0, 0, 10), 10);
        assert_eq!(topology.distance(0, 0, 10, 10), 15);
    }

    #[test]
    fn test_hexa_torus_wraps() {
        let topology = Topology::new(GlobalTopology::Torus, LocalTopology::Hexa, 10, 10).unwrap();
        assert_eq!(topology.distance(0, 0, 9, 0), 1);
        assert_eq!(topology.distance(0, 0, 0, 9), 1);
        assert_eq!(topology.distance(0, 0, 9, 9), 1);
    }

    #[test]
    fn test_rect_torus_wraps() {
        let topology = Topology::new(GlobalTopology::Torus, LocalTopology::Rect, 8, 8).unwrap();
        assert_eq!(topology.distance(0, 0, 7, 7), 1);
        assert_eq!(topology.distance(0, 0, 4, 0), 4);
    }

    #[test]
    fn test_circ_plane_rounds_up() {
        let topology = Topology::new(GlobalTopology::Plane, LocalTopology::Circ, 8, 8).unwrap();
        assert_eq!(topology.distance(0, 0, 1, 1), 2); // ceil(sqrt(2))
        assert_eq!(topology.distance(0, 0, 3, 4), 5);
    }

    #[test]
    fn test_unimplemented_global_shapes_are_rejected() {
        for global in [GlobalTopology::Moebius, GlobalTopology::Tube] {
            match Topology::new(global, LocalTopology::Rect, 4, 4) {
                Err(CartographError::InvalidTopology { .. }) => {}
                other => panic!("expected InvalidTopology, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_cell_coords() {
        let topology = Topology::new(GlobalTopology::Plane, LocalTopology::Rect, 4, 3).unwrap();
        assert_eq!(topology.cell_coords(0), (0, 0));
        assert_eq!(topology.cell_coords(5), (1, 2));
        assert_eq!(topology.cell_distance(0, 5), 2);
    }

    #[test]
    fn test_wire_values() {
        assert_eq!(GlobalTopology::try_from(0).unwrap(), GlobalTopology::Torus);
        assert_eq!(GlobalTopology::try_from(4).unwrap(), GlobalTopology::Plane);
        assert!(GlobalTopology::try_from(3).is_err());
        assert_eq!(LocalTopology::try_from(6).unwrap(), LocalTopology::Hexa);
        assert!(LocalTopology::try_from(5).is_err());
    }
}
