use crate::types::{MosaicError, MosaicResult, Rectangle};

/// One rectangular raster unit placed inside a [`MosaicMatrix`]
pub trait MatrixCell {
    fn cell_width(&self) -> usize;
    fn cell_height(&self) -> usize;
}

/// Row-major grid of cells stitched into one logical raster.
///
/// Cells in a column share their width and cells in a row share their height.
/// The last column and the last row may be exempted when the cells are placed
/// with [`MosaicMatrix::set_cell_at`], which covers ragged trailing sub-swaths.
#[derive(Debug, Clone)]
pub struct MosaicMatrix<C> {
    row_count: usize,
    column_count: usize,
    cells: Vec<Option<C>>,
}

impl<C: MatrixCell> MosaicMatrix<C> {
    pub fn new(row_count: usize, column_count: usize) -> MosaicResult<Self> {
        if row_count == 0 || column_count == 0 {
            return Err(MosaicError::Geometry(format!(
                "Invalid matrix size {}x{}",
                row_count, column_count
            )));
        }

        let mut cells = Vec::with_capacity(row_count * column_count);
        cells.resize_with(row_count * column_count, || None);

        Ok(Self {
            row_count,
            column_count,
            cells,
        })
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Number of assigned slots
    pub fn filled(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_some()).count()
    }

    /// Place a cell at the first free slot in row-major order
    pub fn add_cell(&mut self, cell: C) -> MosaicResult<()> {
        let free_slot = self.cells.iter().position(|slot| slot.is_none());
        match free_slot {
            Some(index) => {
                let (row, column) = (index / self.column_count, index % self.column_count);
                self.set_cell_at(row, column, cell, false, false)
            }
            None => Err(MosaicError::Capacity {
                capacity: self.capacity(),
            }),
        }
    }

    /// Place a cell at an explicit position
    pub fn set_cell_at(
        &mut self,
        row: usize,
        column: usize,
        cell: C,
        allow_last_column_width_mismatch: bool,
        allow_last_row_height_mismatch: bool,
    ) -> MosaicResult<()> {
        let index = self.slot_index(row, column)?;
        if self.cells[index].is_some() {
            return Err(MosaicError::OccupiedSlot { row, column });
        }

        let width_exempt = allow_last_column_width_mismatch && column == self.column_count - 1;
        if !width_exempt {
            for other_row in 0..self.row_count {
                if let Some(other) = self.cells[other_row * self.column_count + column].as_ref() {
                    if other.cell_width() != cell.cell_width() {
                        return Err(MosaicError::Geometry(format!(
                            "Cell ({}, {}) width {} differs from width {} of cell ({}, {}) in the same column",
                            row, column, cell.cell_width(), other.cell_width(), other_row, column
                        )));
                    }
                }
            }
        }

        let height_exempt = allow_last_row_height_mismatch && row == self.row_count - 1;
        if !height_exempt {
            for other_column in 0..self.column_count {
                if let Some(other) = self.cells[row * self.column_count + other_column].as_ref() {
                    if other.cell_height() != cell.cell_height() {
                        return Err(MosaicError::Geometry(format!(
                            "Cell ({}, {}) height {} differs from height {} of cell ({}, {}) in the same row",
                            row, column, cell.cell_height(), other.cell_height(), row, other_column
                        )));
                    }
                }
            }
        }

        log::trace!(
            "Matrix cell ({}, {}) set to {}x{}",
            row,
            column,
            cell.cell_width(),
            cell.cell_height()
        );
        self.cells[index] = Some(cell);
        Ok(())
    }

    pub fn cell_at(&self, row: usize, column: usize) -> Option<&C> {
        if row >= self.row_count || column >= self.column_count {
            return None;
        }
        self.cells[row * self.column_count + column].as_ref()
    }

    /// True when every slot holds a cell
    pub fn is_consistent(&self) -> bool {
        self.cells.iter().all(Option::is_some)
    }

    /// Widest row, summing the cell widths along each row
    pub fn compute_total_width(&self) -> MosaicResult<usize> {
        self.ensure_consistent()?;
        let widest = (0..self.row_count)
            .map(|row| {
                (0..self.column_count)
                    .filter_map(|column| self.cell_at(row, column))
                    .map(MatrixCell::cell_width)
                    .sum::<usize>()
            })
            .max()
            .unwrap_or(0);
        Ok(widest)
    }

    /// Tallest column, summing the cell heights down each column
    pub fn compute_total_height(&self) -> MosaicResult<usize> {
        self.ensure_consistent()?;
        let tallest = (0..self.column_count)
            .map(|column| {
                (0..self.row_count)
                    .filter_map(|row| self.cell_at(row, column))
                    .map(MatrixCell::cell_height)
                    .sum::<usize>()
            })
            .max()
            .unwrap_or(0);
        Ok(tallest)
    }

    /// Bounds of a cell in the stitched raster.
    ///
    /// The x origin accumulates the widths of the preceding cells in the same
    /// row; the y origin accumulates the heights of the first column's cells
    /// above it.
    pub fn cell_bounds(&self, row: usize, column: usize) -> MosaicResult<Rectangle> {
        self.ensure_consistent()?;
        self.slot_index(row, column)?;

        let x = (0..column)
            .filter_map(|c| self.cell_at(row, c))
            .map(MatrixCell::cell_width)
            .sum();
        let y = (0..row)
            .filter_map(|r| self.cell_at(r, 0))
            .map(MatrixCell::cell_height)
            .sum();

        let cell = self.cell_at(row, column).ok_or(MosaicError::IncompleteMatrix {
            filled: self.filled(),
            capacity: self.capacity(),
        })?;
        Ok(Rectangle::new(x, y, cell.cell_width(), cell.cell_height()))
    }

    /// Assigned cells with their positions, row-major
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &C)> + '_ {
        self.cells.iter().enumerate().filter_map(move |(index, slot)| {
            slot.as_ref()
                .map(|cell| (index / self.column_count, index % self.column_count, cell))
        })
    }

    pub(crate) fn ensure_consistent(&self) -> MosaicResult<()> {
        if !self.is_consistent() {
            return Err(MosaicError::IncompleteMatrix {
                filled: self.filled(),
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    fn slot_index(&self, row: usize, column: usize) -> MosaicResult<usize> {
        if row >= self.row_count || column >= self.column_count {
            return Err(MosaicError::Geometry(format!(
                "Cell position ({}, {}) is outside the {}x{} matrix",
                row, column, self.row_count, self.column_count
            )));
        }
        Ok(row * self.column_count + column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    struct Cell(usize, usize);

    impl MatrixCell for Cell {
        fn cell_width(&self) -> usize {
            self.0
        }

        fn cell_height(&self) -> usize {
            self.1
        }
    }

    #[test]
    fn test_add_cell_fills_row_major() {
        let mut matrix = MosaicMatrix::new(2, 2).unwrap();
        for _ in 0..4 {
            matrix.add_cell(Cell(100, 50)).unwrap();
        }

        assert!(matrix.is_consistent());
        assert_eq!(matrix.compute_total_width().unwrap(), 200);
        assert_eq!(matrix.compute_total_height().unwrap(), 100);
        assert!(matches!(
            matrix.add_cell(Cell(100, 50)),
            Err(MosaicError::Capacity { capacity: 4 })
        ));
    }

    #[test]
    fn test_incomplete_matrix() {
        let mut matrix = MosaicMatrix::new(2, 2).unwrap();
        matrix.add_cell(Cell(100, 50)).unwrap();
        matrix.set_cell_at(1, 1, Cell(100, 50), false, false).unwrap();

        assert!(!matrix.is_consistent());
        assert!(matches!(
            matrix.compute_total_width(),
            Err(MosaicError::IncompleteMatrix { filled: 2, capacity: 4 })
        ));
        assert!(matrix.compute_total_height().is_err());
    }

    #[test]
    fn test_occupied_slot() {
        let mut matrix = MosaicMatrix::new(1, 2).unwrap();
        matrix.set_cell_at(0, 1, Cell(10, 10), false, false).unwrap();

        assert!(matches!(
            matrix.set_cell_at(0, 1, Cell(10, 10), false, false),
            Err(MosaicError::OccupiedSlot { row: 0, column: 1 })
        ));
    }

    #[test]
    fn test_ragged_last_column_and_row() {
        let mut matrix = MosaicMatrix::new(2, 2).unwrap();
        matrix.set_cell_at(0, 0, Cell(100, 50), false, false).unwrap();
        matrix.set_cell_at(1, 0, Cell(100, 30), false, true).unwrap();

        // Last column may be narrower only when allowed
        assert!(matches!(
            matrix.set_cell_at(0, 1, Cell(60, 50), false, false),
            Ok(())
        ));
        assert!(matches!(
            matrix.set_cell_at(1, 1, Cell(70, 30), false, true),
            Err(MosaicError::Geometry(_))
        ));
        matrix.set_cell_at(1, 1, Cell(70, 30), true, true).unwrap();

        assert_eq!(matrix.compute_total_width().unwrap(), 170);
        assert_eq!(matrix.compute_total_height().unwrap(), 80);
        assert_eq!(matrix.cell_bounds(1, 1).unwrap(), Rectangle::new(100, 50, 70, 30));
    }

    #[test]
    fn test_row_height_mismatch_rejected() {
        let mut matrix = MosaicMatrix::new(2, 2).unwrap();
        matrix.add_cell(Cell(100, 50)).unwrap();

        assert!(matches!(
            matrix.add_cell(Cell(100, 40)),
            Err(MosaicError::Geometry(_))
        ));
        // Mismatch outside the last row is never exempt
        assert!(matrix.set_cell_at(0, 1, Cell(100, 40), true, true).is_err());
    }
}
