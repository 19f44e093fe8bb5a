// THEORY:
// The `grid` module holds the one canonical matrix representation the engine
// works on. Callers arrive with all sorts of array shapes (nested rows, flat
// buffers, `image` crate buffers); the adapters turn each of them into a `Grid`
// or an `EmbeddingGrid` once, at the boundary, and the grouping algorithm never
// has to care where its data came from.
//
// Key architectural principles:
// 1.  **Row-major, flat storage**: A single `Vec<T>` indexed by `y * width + x`.
//     Neighbour lookups during region growth are plain index arithmetic.
// 2.  **Checked construction**: Every constructor verifies that the backing
//     buffer has exactly `width * height` (or `width * height * channels`)
//     elements. Once a grid exists, its shape is trustworthy.
// 3.  **Dumb data container**: Like `Point`, a grid knows how to hand out its
//     cells and nothing else. It has no notion of kernels, scores or instances.

use crate::core_modules::error::GroupingError;

/// A pixel coordinate on the grid. `x` is the column, `y` the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// A row-major H×W matrix of scalar cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    data: Vec<T>,
}

impl<T> Grid<T> {
    /// Wraps a flat row-major buffer. Fails if `data.len() != width * height`.
    pub fn new(width: usize, height: usize, data: Vec<T>) -> Result<Self, GroupingError> {
        if data.len() != width * height {
            return Err(GroupingError::BufferLength {
                what: "grid",
                expected: width * height,
                actual: data.len(),
            });
        }
        Ok(Self { width, height, data })
    }

    /// Builds a grid from a list of rows. All rows must have the same length.
    pub fn from_rows(rows: Vec<Vec<T>>) -> Result<Self, GroupingError> {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(width * height);
        for (y, row) in rows.into_iter().enumerate() {
            if row.len() != width {
                return Err(GroupingError::InvalidArgument(format!(
                    "ragged rows: row {} has {} cells, row 0 has {}",
                    y,
                    row.len(),
                    width
                )));
            }
            data.extend(row);
        }
        Ok(Self { width, height, data })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// `(width, height)`.
    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn index_of(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<&T> {
        if x < self.width && y < self.height {
            self.data.get(self.index_of(x, y))
        } else {
            None
        }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Iterates the rows top to bottom.
    pub fn rows(&self) -> std::slice::Chunks<'_, T> {
        // `chunks(0)` panics, and an empty grid has no rows anyway.
        self.data.chunks(self.width.max(1))
    }

    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> Grid<U> {
        Grid {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(f).collect(),
        }
    }
}

impl<T: Clone> Grid<T> {
    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    pub fn set(&mut self, x: usize, y: usize, value: T) {
        let index = self.index_of(x, y);
        self.data[index] = value;
    }
}

/// An H×W×C matrix of `f32` embedding vectors, stored pixel-major.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingGrid {
    width: usize,
    height: usize,
    channels: usize,
    data: Vec<f32>,
}

impl EmbeddingGrid {
    pub fn new(
        width: usize,
        height: usize,
        channels: usize,
        data: Vec<f32>,
    ) -> Result<Self, GroupingError> {
        let expected = width * height * channels;
        if data.len() != expected {
            return Err(GroupingError::BufferLength {
                what: "embedding",
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Builds an embedding grid from `rows[y][x] = vector`. Every vector must
    /// have the same dimensionality.
    pub fn from_rows(rows: Vec<Vec<Vec<f32>>>) -> Result<Self, GroupingError> {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        let channels = rows
            .first()
            .and_then(|row| row.first())
            .map_or(0, Vec::len);

        let mut data = Vec::with_capacity(width * height * channels);
        for (y, row) in rows.into_iter().enumerate() {
            if row.len() != width {
                return Err(GroupingError::InvalidArgument(format!(
                    "ragged embedding rows: row {} has {} pixels, row 0 has {}",
                    y,
                    row.len(),
                    width
                )));
            }
            for (x, vector) in row.into_iter().enumerate() {
                if vector.len() != channels {
                    return Err(GroupingError::InvalidArgument(format!(
                        "embedding at ({}, {}) has {} channels, expected {}",
                        x,
                        y,
                        vector.len(),
                        channels
                    )));
                }
                data.extend(vector);
            }
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Every pixel gets the same vector.
    pub fn uniform(width: usize, height: usize, vector: &[f32]) -> Self {
        let mut data = Vec::with_capacity(width * height * vector.len());
        for _ in 0..width * height {
            data.extend_from_slice(vector);
        }
        Self {
            width,
            height,
            channels: vector.len(),
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// `(width, height)` of the leading two dimensions.
    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// The embedding of the pixel at flat index `index = y * width + x`.
    #[inline]
    pub fn vector_at(&self, index: usize) -> &[f32] {
        let start = index * self.channels;
        &self.data[start..start + self.channels]
    }

    #[inline]
    pub fn vector(&self, x: usize, y: usize) -> &[f32] {
        self.vector_at(y * self.width + x)
    }

    pub fn set_vector(&mut self, x: usize, y: usize, vector: &[f32]) {
        let start = (y * self.width + x) * self.channels;
        self.data[start..start + self.channels].copy_from_slice(vector);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_wrong_length() {
        let err = Grid::new(3, 2, vec![0u8; 5]).unwrap_err();
        assert!(err.is_shape_mismatch());
    }

    #[test]
    fn from_rows_is_row_major() {
        let grid = Grid::from_rows(vec![vec![1, 2, 3], vec![4, 5, 6]]).unwrap();
        assert_eq!(grid.dims(), (3, 2));
        assert_eq!(grid.get(2, 0), Some(&3));
        assert_eq!(grid.get(0, 1), Some(&4));
        assert_eq!(grid.get(3, 0), None);
        assert_eq!(grid.rows().count(), 2);
    }

    #[test]
    fn from_rows_rejects_ragged_input() {
        let err = Grid::from_rows(vec![vec![1, 2], vec![3]]).unwrap_err();
        assert!(matches!(err, GroupingError::InvalidArgument(_)));
    }

    #[test]
    fn embedding_vectors_are_pixel_major() {
        let grid = EmbeddingGrid::from_rows(vec![
            vec![vec![0.0, 1.0], vec![2.0, 3.0]],
            vec![vec![4.0, 5.0], vec![6.0, 7.0]],
        ])
        .unwrap();
        assert_eq!(grid.channels(), 2);
        assert_eq!(grid.vector(1, 0), &[2.0, 3.0]);
        assert_eq!(grid.vector(0, 1), &[4.0, 5.0]);
        assert_eq!(grid.vector_at(3), &[6.0, 7.0]);
    }

    #[test]
    fn embedding_rejects_mixed_channel_counts() {
        let err = EmbeddingGrid::from_rows(vec![vec![vec![0.0, 1.0], vec![2.0]]]).unwrap_err();
        assert!(matches!(err, GroupingError::InvalidArgument(_)));
    }
}
