//! Core grid topology.
//!
//! Producer cores form a fixed `CORES_ROWS × CORES_COLS` grid. Ring buffers
//! are laid out in shared memory in row-major order, and the consumer sweeps
//! them in the same order.

use core::fmt;

use crate::config::{CORES_COLS, CORES_COUNT, CORES_ROWS};

/// Coordinates of one producer core in the grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoreCoords {
    pub row: usize,
    pub col: usize,
}

impl CoreCoords {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Row-major index of this core (position of its ring buffer).
    #[inline]
    pub const fn index(self) -> usize {
        self.row * CORES_COLS + self.col
    }

    /// Inverse of [`CoreCoords::index`].
    #[inline]
    pub const fn from_index(index: usize) -> Self {
        Self {
            row: index / CORES_COLS,
            col: index % CORES_COLS,
        }
    }

    /// True if the coordinates fall inside the configured grid.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.row < CORES_ROWS && self.col < CORES_COLS
    }

    /// Every core of the grid, row-major.
    pub fn all() -> impl Iterator<Item = CoreCoords> {
        (0..CORES_COUNT).map(CoreCoords::from_index)
    }

    /// File name of this core's output stream inside the trace directory.
    #[cfg(feature = "std")]
    pub fn stream_file_name(self) -> String {
        format!("stream-{}-{}", self.row, self.col)
    }
}

impl fmt::Display for CoreCoords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}
