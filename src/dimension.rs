use core::fmt;

use serde::{Deserialize, Serialize};

/// Physical unit of a linear dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    Hertz,
    Ppm,
    Second,
}

impl Unit {
    /// Whether coordinates in this unit can be read as frequencies.
    pub fn is_frequency(self) -> bool {
        matches!(self, Self::Hertz | Self::Ppm)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hertz => write!(f, "Hz"),
            Self::Ppm => write!(f, "ppm"),
            Self::Second => write!(f, "s"),
        }
    }
}

/// Shape and indexing errors shared by datasets, grids and kernels.
#[derive(Debug, Clone, PartialEq)]
pub enum DimensionError {
    /// A dimension has zero points.
    Empty { label: String },
    /// The increment is zero or not finite.
    InvalidIncrement { label: String, increment: f64 },
    /// The number of values does not match the product of the dimension counts.
    ValueCount { expected: usize, actual: usize },
    /// The anisotropic dimension was found at `found` instead of index 0.
    AxisOrder { found: usize },
    /// The row count of a matrix does not match the anisotropic dimension.
    RowMismatch { expected: usize, actual: usize },
    /// The column count of a matrix does not match the dataset.
    ColumnMismatch { expected: usize, actual: usize },
    /// A region does not provide one range per dimension.
    RegionRank { expected: usize, actual: usize },
    /// A region range is empty or exceeds the dimension.
    RegionBounds { axis: usize, start: usize, end: usize, count: usize },
    /// An operation needed a different number of dimensions.
    Rank { expected: usize, actual: usize },
    /// A supersampling factor of zero.
    ZeroSupersampling,
}

impl fmt::Display for DimensionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty { label } => write!(f, "dimension '{label}' has no points"),
            Self::InvalidIncrement { label, increment } => {
                write!(f, "dimension '{label}' has invalid increment {increment}")
            }
            Self::ValueCount { expected, actual } => {
                write!(f, "value count {actual} does not match shape size {expected}")
            }
            Self::AxisOrder { found } => write!(
                f,
                "anisotropic dimension must be at index 0 (matching dimension found at index {found})"
            ),
            Self::RowMismatch { expected, actual } => {
                write!(f, "row count {actual} does not match anisotropic count {expected}")
            }
            Self::ColumnMismatch { expected, actual } => {
                write!(f, "column count {actual} does not match expected {expected}")
            }
            Self::RegionRank { expected, actual } => {
                write!(f, "region has {actual} ranges, dataset has {expected} dimensions")
            }
            Self::RegionBounds {
                axis,
                start,
                end,
                count,
            } => write!(
                f,
                "region {start}..{end} on axis {axis} is empty or exceeds count {count}"
            ),
            Self::Rank { expected, actual } => {
                write!(f, "expected {expected} dimensions, got {actual}")
            }
            Self::ZeroSupersampling => write!(f, "supersampling factor must be at least 1"),
        }
    }
}

impl std::error::Error for DimensionError {}

/// A linear dimension: `coordinate(i) = coordinates_offset + i * increment`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDimension")]
pub struct Dimension {
    pub count: usize,
    pub increment: f64,
    #[serde(default)]
    pub coordinates_offset: f64,
    pub unit: Unit,
    #[serde(default)]
    pub label: String,
}

#[derive(Deserialize)]
struct RawDimension {
    count: usize,
    increment: f64,
    #[serde(default)]
    coordinates_offset: f64,
    unit: Unit,
    #[serde(default)]
    label: String,
}

impl TryFrom<RawDimension> for Dimension {
    type Error = DimensionError;

    fn try_from(raw: RawDimension) -> Result<Self, Self::Error> {
        let dim = Dimension {
            count: raw.count,
            increment: raw.increment,
            coordinates_offset: raw.coordinates_offset,
            unit: raw.unit,
            label: raw.label,
        };
        dim.validate()?;
        Ok(dim)
    }
}

impl Dimension {
    /// Creates a validated linear dimension starting at zero.
    pub fn new(count: usize, increment: f64, unit: Unit) -> Result<Self, DimensionError> {
        let dim = Self {
            count,
            increment,
            coordinates_offset: 0.0,
            unit,
            label: String::new(),
        };
        dim.validate()?;
        Ok(dim)
    }

    pub fn with_offset(mut self, coordinates_offset: f64) -> Self {
        self.coordinates_offset = coordinates_offset;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Re-checks invariants, for dimensions built by struct literal or deserialized.
    pub fn validate(&self) -> Result<(), DimensionError> {
        if self.count == 0 {
            return Err(DimensionError::Empty {
                label: self.label.clone(),
            });
        }
        if !self.increment.is_finite() || self.increment == 0.0 || !self.coordinates_offset.is_finite()
        {
            return Err(DimensionError::InvalidIncrement {
                label: self.label.clone(),
                increment: self.increment,
            });
        }
        Ok(())
    }

    pub fn coordinate(&self, index: usize) -> f64 {
        self.coordinates_offset + index as f64 * self.increment
    }

    pub fn coordinates(&self) -> Vec<f64> {
        (0..self.count).map(|i| self.coordinate(i)).collect()
    }

    /// Coordinates with every cell split into `factor` centred sub-points.
    pub fn supersampled_coordinates(&self, factor: usize) -> Vec<f64> {
        let factor = factor.max(1);
        let step = self.increment / factor as f64;
        let shift = 0.5 * step * (factor - 1) as f64;
        (0..self.count * factor)
            .map(|i| self.coordinates_offset + i as f64 * step - shift)
            .collect()
    }

    /// Index of the cell whose centre is nearest to `value`, if inside the dimension.
    pub fn nearest_index(&self, value: f64) -> Option<usize> {
        let pos = ((value - self.coordinates_offset) / self.increment).round();
        if pos.is_finite() && pos >= 0.0 && (pos as usize) < self.count {
            Some(pos as usize)
        } else {
            None
        }
    }

    /// Converts a frequency-like dimension to hertz.
    pub fn to_hertz(&self, larmor_frequency: f64) -> Dimension {
        match self.unit {
            Unit::Ppm => {
                let scale = 1e-6 * larmor_frequency.abs();
                Dimension {
                    count: self.count,
                    increment: self.increment * scale,
                    coordinates_offset: self.coordinates_offset * scale,
                    unit: Unit::Hertz,
                    label: self.label.clone(),
                }
            }
            _ => self.clone(),
        }
    }

    /// The dimension restricted to `start..end`.
    pub(crate) fn restricted(&self, start: usize, end: usize) -> Dimension {
        Dimension {
            count: end - start,
            increment: self.increment,
            coordinates_offset: self.coordinate(start),
            unit: self.unit,
            label: self.label.clone(),
        }
    }
}

/// The basis-feature space a spectrum is inverted onto.
///
/// Holds one (relaxation) or two (`x`-`y` shielding) dimensions. Features are
/// ordered column-major, so the first dimension varies fastest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawInverseGrid")]
pub struct InverseGrid {
    dimensions: Vec<Dimension>,
}

#[derive(Deserialize)]
struct RawInverseGrid {
    dimensions: Vec<Dimension>,
}

impl TryFrom<RawInverseGrid> for InverseGrid {
    type Error = DimensionError;

    fn try_from(raw: RawInverseGrid) -> Result<Self, Self::Error> {
        Self::new(raw.dimensions)
    }
}

impl InverseGrid {
    pub fn new(dimensions: Vec<Dimension>) -> Result<Self, DimensionError> {
        if dimensions.is_empty() {
            return Err(DimensionError::Rank {
                expected: 1,
                actual: 0,
            });
        }
        for dim in &dimensions {
            dim.validate()?;
        }
        Ok(Self { dimensions })
    }

    /// Two-dimensional `x`-`y` grid.
    pub fn xy(x: Dimension, y: Dimension) -> Result<Self, DimensionError> {
        Self::new(vec![x, y])
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn shape(&self) -> Vec<usize> {
        self.dimensions.iter().map(|d| d.count).collect()
    }

    pub fn n_features(&self) -> usize {
        self.dimensions.iter().map(|d| d.count).product()
    }
}
