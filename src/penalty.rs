use crate::pattern::{PatternError, SparsePattern};

/// First-difference operator `D` over a column-major grid.
///
/// Each row takes the difference of two neighbouring cells along one axis, so
/// `||D f||^2` is the squared gradient norm of `f` over the grid. Axes with a
/// single point contribute no rows.
#[derive(Debug, Clone)]
pub struct DifferenceOperator {
    shape: Vec<usize>,
    pattern: SparsePattern,
    values: Vec<f64>,
}

impl DifferenceOperator {
    pub fn new(shape: &[usize]) -> Result<Self, PatternError> {
        let ncols: usize = shape.iter().product();
        let mut triplets = Vec::new();
        let mut row = 0;
        let mut stride = 1;
        for &count in shape {
            if count >= 2 {
                for idx in 0..ncols {
                    if (idx / stride) % count + 1 < count {
                        triplets.push((row, idx, -1.0));
                        triplets.push((row, idx + stride, 1.0));
                        row += 1;
                    }
                }
            }
            stride *= count;
        }

        let entries: Vec<(usize, usize)> = triplets.iter().map(|&(r, c, _)| (r, c)).collect();
        let pattern = SparsePattern::from_entries(row, ncols, &entries)?;
        let mut values = vec![0.0; pattern.nnz()];
        for &(r, c, v) in &triplets {
            if let Some(pos) = pattern.position(r, c) {
                values[pos] = v;
            }
        }
        Ok(Self {
            shape: shape.to_vec(),
            pattern,
            values,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn nrows(&self) -> usize {
        self.pattern.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.pattern.ncols()
    }

    pub fn pattern(&self) -> &SparsePattern {
        &self.pattern
    }

    /// `out = D f`.
    pub fn apply(&self, f: &[f64], out: &mut [f64]) {
        out.fill(0.0);
        for (col, &fc) in f.iter().enumerate().take(self.ncols()) {
            if fc == 0.0 {
                continue;
            }
            for idx in self.pattern.col_range(col) {
                out[self.pattern.row_indices()[idx]] += self.values[idx] * fc;
            }
        }
    }

    /// `||D f||^2`.
    pub fn roughness(&self, f: &[f64]) -> f64 {
        let mut out = vec![0.0; self.nrows()];
        self.apply(f, &mut out);
        out.iter().map(|v| v * v).sum()
    }

    /// Adds `scale * D^T D` to a column-major `ncols x ncols` matrix.
    pub fn add_gram(&self, gram: &mut [f64], scale: f64) {
        let n = self.ncols();
        if scale == 0.0 {
            return;
        }
        let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); self.nrows()];
        for col in 0..n {
            for idx in self.pattern.col_range(col) {
                rows[self.pattern.row_indices()[idx]].push((col, self.values[idx]));
            }
        }
        for entries in &rows {
            for &(a, va) in entries {
                for &(b, vb) in entries {
                    gram[b * n + a] += scale * va * vb;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_neighbour_pairs_per_axis() {
        let op = DifferenceOperator::new(&[3, 2]).unwrap();
        // 2 pairs per row of 3 (x2 rows) + 3 pairs along y.
        assert_eq!(op.nrows(), 7);
        assert_eq!(op.ncols(), 6);
        assert_eq!(op.pattern().nnz(), 14);
    }

    #[test]
    fn constant_fields_are_smooth() {
        let op = DifferenceOperator::new(&[4, 3]).unwrap();
        assert_eq!(op.roughness(&[2.5; 12]), 0.0);
        let mut ramp = vec![0.0; 12];
        for (i, v) in ramp.iter_mut().enumerate() {
            *v = (i % 4) as f64;
        }
        // Every x-step is 1, every y-step is 0.
        assert!((op.roughness(&ramp) - 9.0).abs() < 1e-12);
    }

    #[test]
    fn gram_matches_roughness() {
        let op = DifferenceOperator::new(&[3, 3]).unwrap();
        let n = op.ncols();
        let mut gram = vec![0.0; n * n];
        op.add_gram(&mut gram, 1.0);
        let f: Vec<f64> = (0..n).map(|i| ((i * 7) % 5) as f64 - 2.0).collect();
        let mut quad = 0.0;
        for a in 0..n {
            for b in 0..n {
                quad += f[a] * gram[b * n + a] * f[b];
            }
        }
        assert!((quad - op.roughness(&f)).abs() < 1e-10);
    }

    #[test]
    fn single_point_axes_add_no_rows() {
        let op = DifferenceOperator::new(&[5, 1]).unwrap();
        assert_eq!(op.nrows(), 4);
    }
}
