use core::ops::Range;

use faer_core::{mat, MatRef};
use serde::{Deserialize, Serialize};

use crate::dimension::{Dimension, DimensionError};

/// Real N-dimensional array with linear dimension metadata.
///
/// Values are stored column-major: dimension 0 varies fastest. For spectra,
/// dimension 0 is the anisotropic dimension and the remaining dimensions
/// (usually the isotropic shift) are flattened into matrix columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDataset")]
pub struct Dataset {
    dimensions: Vec<Dimension>,
    values: Vec<f64>,
    #[serde(default)]
    pub description: String,
}

#[derive(Deserialize)]
struct RawDataset {
    dimensions: Vec<Dimension>,
    values: Vec<f64>,
    #[serde(default)]
    description: String,
}

impl TryFrom<RawDataset> for Dataset {
    type Error = DimensionError;

    fn try_from(raw: RawDataset) -> Result<Self, Self::Error> {
        Ok(Self::new(raw.dimensions, raw.values)?.with_description(raw.description))
    }
}

impl Dataset {
    pub fn new(dimensions: Vec<Dimension>, values: Vec<f64>) -> Result<Self, DimensionError> {
        if dimensions.is_empty() {
            return Err(DimensionError::Rank {
                expected: 1,
                actual: 0,
            });
        }
        for dim in &dimensions {
            dim.validate()?;
        }
        let expected: usize = dimensions.iter().map(|d| d.count).product();
        if values.len() != expected {
            return Err(DimensionError::ValueCount {
                expected,
                actual: values.len(),
            });
        }
        Ok(Self {
            dimensions,
            values,
            description: String::new(),
        })
    }

    /// Keeps the real part of complex `(re, im)` amplitudes.
    pub fn from_complex(
        dimensions: Vec<Dimension>,
        values: &[(f64, f64)],
    ) -> Result<Self, DimensionError> {
        Self::new(dimensions, values.iter().map(|&(re, _)| re).collect())
    }

    /// Builds a dataset from a matrix whose rows follow dimension 0.
    pub fn from_matrix(
        dimensions: Vec<Dimension>,
        matrix: MatRef<'_, f64>,
    ) -> Result<Self, DimensionError> {
        let expected: usize = dimensions.iter().map(|d| d.count).product();
        if matrix.nrows() * matrix.ncols() != expected {
            return Err(DimensionError::ValueCount {
                expected,
                actual: matrix.nrows() * matrix.ncols(),
            });
        }
        let mut values = Vec::with_capacity(expected);
        for j in 0..matrix.ncols() {
            for i in 0..matrix.nrows() {
                values.push(matrix.read(i, j));
            }
        }
        Self::new(dimensions, values)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn shape(&self) -> Vec<usize> {
        self.dimensions.iter().map(|d| d.count).collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of rows when viewed as a matrix (count of dimension 0).
    pub fn nrows(&self) -> usize {
        self.dimensions[0].count
    }

    /// Number of columns when viewed as a matrix (all other dimensions).
    pub fn ncols(&self) -> usize {
        self.values.len() / self.nrows()
    }

    /// Column-major matrix view: dimension 0 as rows.
    pub fn as_matrix(&self) -> MatRef<'_, f64> {
        mat::from_column_major_slice::<f64>(&self.values, self.nrows(), self.ncols())
    }

    /// Fails unless dimension 0 has `rows` points.
    ///
    /// When another dimension matches instead, the error names it so the caller
    /// learns the axes are out of order rather than merely mis-sized.
    pub fn check_anisotropic_axis(&self, rows: usize) -> Result<(), DimensionError> {
        if self.nrows() == rows {
            return Ok(());
        }
        if let Some(found) = self.dimensions.iter().position(|d| d.count == rows) {
            return Err(DimensionError::AxisOrder { found });
        }
        Err(DimensionError::RowMismatch {
            expected: rows,
            actual: self.nrows(),
        })
    }

    fn strides(&self) -> Vec<usize> {
        let mut strides = Vec::with_capacity(self.dimensions.len());
        let mut stride = 1;
        for dim in &self.dimensions {
            strides.push(stride);
            stride *= dim.count;
        }
        strides
    }

    /// Sub-array over half-open index ranges, one per dimension.
    pub fn region(&self, ranges: &[Range<usize>]) -> Result<Dataset, DimensionError> {
        if ranges.len() != self.dimensions.len() {
            return Err(DimensionError::RegionRank {
                expected: self.dimensions.len(),
                actual: ranges.len(),
            });
        }
        for (axis, (range, dim)) in ranges.iter().zip(&self.dimensions).enumerate() {
            if range.start >= range.end || range.end > dim.count {
                return Err(DimensionError::RegionBounds {
                    axis,
                    start: range.start,
                    end: range.end,
                    count: dim.count,
                });
            }
        }

        let dimensions: Vec<Dimension> = ranges
            .iter()
            .zip(&self.dimensions)
            .map(|(range, dim)| dim.restricted(range.start, range.end))
            .collect();
        let strides = self.strides();
        let total: usize = dimensions.iter().map(|d| d.count).product();
        let mut values = Vec::with_capacity(total);
        let mut index: Vec<usize> = ranges.iter().map(|r| r.start).collect();
        for _ in 0..total {
            let flat: usize = index.iter().zip(&strides).map(|(i, s)| i * s).sum();
            values.push(self.values[flat]);
            for (axis, range) in ranges.iter().enumerate() {
                index[axis] += 1;
                if index[axis] < range.end {
                    break;
                }
                index[axis] = range.start;
            }
        }

        Ok(Dataset {
            dimensions,
            values,
            description: self.description.clone(),
        })
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn scale(&mut self, factor: f64) {
        for v in &mut self.values {
            *v *= factor;
        }
    }

    /// Multi-index of a flat position.
    pub(crate) fn unravel(&self, mut flat: usize, index: &mut [usize]) {
        for (slot, dim) in index.iter_mut().zip(&self.dimensions) {
            *slot = flat % dim.count;
            flat /= dim.count;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::Unit;

    fn dataset_3x2() -> Dataset {
        let a = Dimension::new(3, 1.0, Unit::Hertz).unwrap();
        let b = Dimension::new(2, 10.0, Unit::Ppm).unwrap().with_offset(5.0);
        Dataset::new(vec![a, b], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap()
    }

    #[test]
    fn matrix_view_is_column_major() {
        let data = dataset_3x2();
        let m = data.as_matrix();
        assert_eq!((m.nrows(), m.ncols()), (3, 2));
        assert_eq!(m.read(2, 0), 3.0);
        assert_eq!(m.read(0, 1), 4.0);
    }

    #[test]
    fn region_is_half_open_and_moves_offset() {
        let data = dataset_3x2();
        let region = data.region(&[1..3, 1..2]).unwrap();
        assert_eq!(region.shape(), vec![2, 1]);
        assert_eq!(region.values(), &[5.0, 6.0]);
        assert_eq!(region.dimensions()[0].coordinates_offset, 1.0);
        assert_eq!(region.dimensions()[1].coordinates_offset, 15.0);

        assert!(matches!(
            data.region(&[1..1, 0..2]),
            Err(DimensionError::RegionBounds { axis: 0, .. })
        ));
        assert!(matches!(
            data.region(&[0..4, 0..2]),
            Err(DimensionError::RegionBounds { axis: 0, .. })
        ));
    }

    #[test]
    fn wrong_axis_order_is_reported() {
        let data = dataset_3x2();
        assert!(data.check_anisotropic_axis(3).is_ok());
        assert_eq!(
            data.check_anisotropic_axis(2),
            Err(DimensionError::AxisOrder { found: 1 })
        );
        assert_eq!(
            data.check_anisotropic_axis(7),
            Err(DimensionError::RowMismatch {
                expected: 7,
                actual: 3
            })
        );
    }

    #[test]
    fn rejects_value_count_mismatch() {
        let a = Dimension::new(3, 1.0, Unit::Hertz).unwrap();
        assert!(matches!(
            Dataset::new(vec![a], vec![1.0, 2.0]),
            Err(DimensionError::ValueCount { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let short = r#"{"dimensions": [{"count": 4, "increment": 1.0, "unit": "Hertz"}], "values": [1.0]}"#;
        assert!(serde_json::from_str::<Dataset>(short).is_err());
        assert!(serde_json::from_str::<Dataset>(r#"{"dimensions": [], "values": []}"#).is_err());

        let good = r#"{"dimensions": [{"count": 2, "increment": 1.0, "unit": "Hertz"}], "values": [1.0, 2.0], "description": "ok"}"#;
        let data: Dataset = serde_json::from_str(good).unwrap();
        assert_eq!(data.as_matrix().nrows(), 2);
        assert_eq!(data.description, "ok");
    }
}
