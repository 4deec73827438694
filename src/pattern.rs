use core::fmt;
use core::ops::Range;

/// Fixed CSC structure of a sparse operator such as the grid difference matrix.
///
/// Row indices are zero-based and strictly increasing within a column.
#[derive(Debug, Clone)]
pub struct SparsePattern {
    nrows: usize,
    ncols: usize,
    col_ptrs: Vec<usize>,
    row_indices: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// `col_ptrs` must hold `ncols + 1` offsets.
    ColPtrLen { expected: usize, actual: usize },
    /// The first offset is not 0.
    ColPtrStart { value: usize },
    /// Offsets decrease between `col` and `col + 1`.
    ColPtrNotMonotonic { col: usize, prev: usize, next: usize },
    /// The final offset disagrees with the number of stored rows.
    ColPtrOutOfBounds { last: usize, row_indices_len: usize },
    RowIndexOutOfBounds { col: usize, row: usize, nrows: usize },
    /// Duplicate or descending rows inside one column.
    RowIndexNotSorted { col: usize, prev: usize, next: usize },
    /// An entry names a column past the end.
    ColIndexOutOfBounds { col: usize, ncols: usize },
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColPtrLen { expected, actual } => {
                write!(f, "expected {expected} column offsets, got {actual}")
            }
            Self::ColPtrStart { value } => write!(f, "first column offset is {value}, not 0"),
            Self::ColPtrNotMonotonic { col, prev, next } => {
                write!(f, "column offsets decrease at col {col} ({prev} -> {next})")
            }
            Self::ColPtrOutOfBounds {
                last,
                row_indices_len,
            } => write!(f, "last column offset {last} but {row_indices_len} stored rows"),
            Self::RowIndexOutOfBounds { col, row, nrows } => {
                write!(f, "row {row} in col {col} is out of range for {nrows} rows")
            }
            Self::RowIndexNotSorted { col, prev, next } => {
                write!(f, "rows in col {col} are not strictly increasing ({prev} then {next})")
            }
            Self::ColIndexOutOfBounds { col, ncols } => {
                write!(f, "col {col} is out of range for {ncols} columns")
            }
        }
    }
}

impl std::error::Error for PatternError {}

impl SparsePattern {
    pub fn new(
        nrows: usize,
        ncols: usize,
        col_ptrs: Vec<usize>,
        row_indices: Vec<usize>,
    ) -> Result<Self, PatternError> {
        if col_ptrs.len() != ncols + 1 {
            return Err(PatternError::ColPtrLen {
                expected: ncols + 1,
                actual: col_ptrs.len(),
            });
        }
        if col_ptrs[0] != 0 {
            return Err(PatternError::ColPtrStart { value: col_ptrs[0] });
        }
        let last = col_ptrs[ncols];
        if last != row_indices.len() {
            return Err(PatternError::ColPtrOutOfBounds {
                last,
                row_indices_len: row_indices.len(),
            });
        }
        for (col, bounds) in col_ptrs.windows(2).enumerate() {
            let (prev, next) = (bounds[0], bounds[1]);
            if prev > next || next > last {
                return Err(PatternError::ColPtrNotMonotonic { col, prev, next });
            }
            let rows = &row_indices[prev..next];
            if let Some(&row) = rows.iter().find(|&&row| row >= nrows) {
                return Err(PatternError::RowIndexOutOfBounds { col, row, nrows });
            }
            if let Some(pair) = rows.windows(2).find(|pair| pair[0] >= pair[1]) {
                return Err(PatternError::RowIndexNotSorted {
                    col,
                    prev: pair[0],
                    next: pair[1],
                });
            }
        }

        Ok(Self {
            nrows,
            ncols,
            col_ptrs,
            row_indices,
        })
    }

    /// Builds a pattern from `(row, col)` entries; duplicates collapse.
    pub fn from_entries(
        nrows: usize,
        ncols: usize,
        entries: &[(usize, usize)],
    ) -> Result<Self, PatternError> {
        let mut cols: Vec<Vec<usize>> = vec![Vec::new(); ncols];
        for &(row, col) in entries {
            if col >= ncols {
                return Err(PatternError::ColIndexOutOfBounds { col, ncols });
            }
            cols[col].push(row);
        }
        let mut col_ptrs = Vec::with_capacity(ncols + 1);
        let mut row_indices = Vec::with_capacity(entries.len());
        col_ptrs.push(0);
        for mut col_rows in cols {
            col_rows.sort_unstable();
            col_rows.dedup();
            row_indices.extend_from_slice(&col_rows);
            col_ptrs.push(row_indices.len());
        }
        Self::new(nrows, ncols, col_ptrs, row_indices)
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.row_indices.len()
    }

    pub fn col_ptrs(&self) -> &[usize] {
        &self.col_ptrs
    }

    pub fn row_indices(&self) -> &[usize] {
        &self.row_indices
    }

    /// Slots of `col` in `row_indices` and in any value array.
    pub fn col_range(&self, col: usize) -> Range<usize> {
        self.col_ptrs[col]..self.col_ptrs[col + 1]
    }

    /// Position of entry `(row, col)` in the value array, if stored.
    pub fn position(&self, row: usize, col: usize) -> Option<usize> {
        let range = self.col_range(col);
        let start = range.start;
        self.row_indices[range]
            .binary_search(&row)
            .ok()
            .map(|offset| start + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_csc_layout() {
        assert!(SparsePattern::new(2, 2, vec![0, 1, 2], vec![0, 1]).is_ok());
        assert_eq!(
            SparsePattern::new(2, 2, vec![0, 1], vec![0]).unwrap_err(),
            PatternError::ColPtrLen {
                expected: 3,
                actual: 2
            }
        );
        assert_eq!(
            SparsePattern::new(2, 1, vec![0, 2], vec![1, 0]).unwrap_err(),
            PatternError::RowIndexNotSorted {
                col: 0,
                prev: 1,
                next: 0
            }
        );
        assert_eq!(
            SparsePattern::new(2, 1, vec![0, 1], vec![2]).unwrap_err(),
            PatternError::RowIndexOutOfBounds {
                col: 0,
                row: 2,
                nrows: 2
            }
        );
    }

    #[test]
    fn entries_are_sorted_and_deduplicated() {
        let pattern = SparsePattern::from_entries(3, 2, &[(2, 0), (0, 0), (2, 0), (1, 1)]).unwrap();
        assert_eq!(pattern.col_ptrs(), &[0, 2, 3]);
        assert_eq!(pattern.row_indices(), &[0, 2, 1]);
        assert_eq!(pattern.position(2, 0), Some(1));
        assert_eq!(pattern.position(0, 1), None);
    }
}
