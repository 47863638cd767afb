//! Neighborhood adjacency tables for bounded Schelling grids.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors emitted by neighborhood index implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    /// Indicates dimensions that cannot be indexed (e.g., a zero-sized grid).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Which cells count as adjacent to a given cell.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Adjacency {
    /// The eight surrounding cells (orthogonal and diagonal).
    #[default]
    Moore,
    /// The four orthogonal cells.
    VonNeumann,
}

const MOORE_OFFSETS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

const VON_NEUMANN_OFFSETS: [(i64, i64); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];

impl Adjacency {
    /// Relative `(dx, dy)` offsets, ordered so neighbors come out row-major.
    #[must_use]
    pub const fn offsets(self) -> &'static [(i64, i64)] {
        match self {
            Self::Moore => &MOORE_OFFSETS,
            Self::VonNeumann => &VON_NEUMANN_OFFSETS,
        }
    }

    /// Upper bound on neighbors for an interior cell.
    #[must_use]
    pub const fn max_neighbors(self) -> usize {
        self.offsets().len()
    }
}

/// Common behaviour exposed by neighborhood indices.
pub trait NeighborhoodIndex {
    /// Rebuild internal tables for a `width` x `height` grid.
    fn rebuild(&mut self, width: u32, height: u32) -> Result<(), IndexError>;

    /// In-bounds neighbors of the cell at row-major `offset`.
    fn neighbors(&self, offset: usize) -> &[usize];
}

/// Precomputed neighbor lists stored in a compact row layout.
///
/// Cells are addressed by their row-major offset `y * width + x`. Edge and
/// corner cells simply have shorter lists; nothing wraps around.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridNeighborhood {
    adjacency: Adjacency,
    width: u32,
    height: u32,
    #[serde(skip)]
    starts: Vec<usize>,
    #[serde(skip)]
    flat: Vec<usize>,
}

impl GridNeighborhood {
    /// Create an empty table; call [`NeighborhoodIndex::rebuild`] before use.
    #[must_use]
    pub fn new(adjacency: Adjacency) -> Self {
        Self {
            adjacency,
            width: 0,
            height: 0,
            starts: vec![0],
            flat: Vec::new(),
        }
    }

    /// Create and populate a table for the given dimensions.
    pub fn build(adjacency: Adjacency, width: u32, height: u32) -> Result<Self, IndexError> {
        let mut index = Self::new(adjacency);
        index.rebuild(width, height)?;
        Ok(index)
    }

    #[must_use]
    pub const fn adjacency(&self) -> Adjacency {
        self.adjacency
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Number of indexed cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.starts.len().saturating_sub(1)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NeighborhoodIndex for GridNeighborhood {
    fn rebuild(&mut self, width: u32, height: u32) -> Result<(), IndexError> {
        if width == 0 || height == 0 {
            return Err(IndexError::InvalidConfig("grid dimensions must be non-zero"));
        }
        let cells = (width as usize)
            .checked_mul(height as usize)
            .ok_or(IndexError::InvalidConfig("grid cell count overflows usize"))?;

        let offsets = self.adjacency.offsets();
        self.width = width;
        self.height = height;
        self.starts.clear();
        self.starts.reserve(cells + 1);
        self.flat.clear();
        self.flat.reserve(cells * offsets.len());
        self.starts.push(0);

        let (w, h) = (i64::from(width), i64::from(height));
        for y in 0..h {
            for x in 0..w {
                for &(dx, dy) in offsets {
                    let (nx, ny) = (x + dx, y + dy);
                    if (0..w).contains(&nx) && (0..h).contains(&ny) {
                        self.flat.push((ny * w + nx) as usize);
                    }
                }
                self.starts.push(self.flat.len());
            }
        }
        Ok(())
    }

    fn neighbors(&self, offset: usize) -> &[usize] {
        match (self.starts.get(offset), self.starts.get(offset + 1)) {
            (Some(&start), Some(&end)) => &self.flat[start..end],
            _ => &[],
        }
    }
}
