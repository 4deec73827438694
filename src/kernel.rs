//! Forward models mapping an inverse grid onto the measured dimension.
//!
//! Kernels are dense `(n_direct, n_features)` matrices. Feature `j` follows the
//! column-major order of the inverse grid, so for an `x`-`y` grid
//! `j = iy * nx + ix`.

mod lineshape;
mod relaxation;
mod wigner;

use core::fmt;
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::dimension::{DimensionError, Unit};
use crate::isotope::{Isotope, UnknownIsotope};

pub use lineshape::NuclearShieldingKernel;
pub use relaxation::{RelaxationKernel, RelaxationKind};

/// The magic angle, `acos(1/sqrt(3))`, in radians.
pub const MAGIC_ANGLE: f64 = 0.955_316_618_124_509_3;

/// Errors raised while configuring or evaluating a kernel.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelError {
    /// A dimension or dataset is malformed or out of order.
    Dimension(DimensionError),
    /// The measured dimension has the wrong unit for this kernel.
    DirectUnit { expected: &'static str, found: Unit },
    /// An inverse dimension has the wrong unit for this kernel.
    InverseUnit { axis: usize, expected: &'static str, found: Unit },
    /// The inverse grid has the wrong number of dimensions.
    InverseRank { expected: usize, actual: usize },
    /// The supersampling factor is zero.
    ZeroSupersampling,
    /// Zero sidebands or zero powder integration density.
    InvalidSampling { sidebands: usize, integration_density: usize },
    /// Field, rotor angle or rotor frequency is not finite or not positive.
    InvalidParameter { name: &'static str, value: f64 },
    /// The isotope label is not known.
    Isotope(UnknownIsotope),
    /// A relaxation-time coordinate is zero or negative.
    NonPositiveRelaxationTime { index: usize, value: f64 },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dimension(err) => write!(f, "dimension error: {err}"),
            Self::DirectUnit { expected, found } => {
                write!(f, "direct dimension must be {expected}, found unit {found}")
            }
            Self::InverseUnit {
                axis,
                expected,
                found,
            } => write!(
                f,
                "inverse dimension {axis} must be {expected}, found unit {found}"
            ),
            Self::InverseRank { expected, actual } => {
                write!(f, "expected {expected} inverse dimensions, got {actual}")
            }
            Self::ZeroSupersampling => write!(f, "supersampling factor must be at least 1"),
            Self::InvalidSampling {
                sidebands,
                integration_density,
            } => write!(
                f,
                "invalid sampling: sidebands={sidebands}, integration_density={integration_density}"
            ),
            Self::InvalidParameter { name, value } => write!(f, "invalid {name}: {value}"),
            Self::Isotope(err) => write!(f, "{err}"),
            Self::NonPositiveRelaxationTime { index, value } => {
                write!(f, "relaxation time at index {index} must be positive (got {value})")
            }
        }
    }
}

impl std::error::Error for KernelError {}

impl From<DimensionError> for KernelError {
    fn from(err: DimensionError) -> Self {
        Self::Dimension(err)
    }
}

impl From<UnknownIsotope> for KernelError {
    fn from(err: UnknownIsotope) -> Self {
        Self::Isotope(err)
    }
}

/// Acquisition conditions of the anisotropic dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionParams {
    pub isotope: Isotope,
    /// Static field in tesla.
    pub magnetic_flux_density: f64,
    /// Rotor angle relative to the static field, in radians.
    pub rotor_angle: f64,
    /// Effective sample rotation frequency in Hz.
    pub rotor_frequency: f64,
    /// Number of sidebands (time points per rotor period) to simulate.
    pub number_of_sidebands: usize,
    /// Powder orientations per Euler angle (alpha, beta).
    pub integration_density: usize,
}

impl Default for AcquisitionParams {
    fn default() -> Self {
        Self {
            isotope: Isotope::si29(),
            magnetic_flux_density: 9.4,
            rotor_angle: MAGIC_ANGLE,
            rotor_frequency: 14e3,
            number_of_sidebands: 1,
            integration_density: 24,
        }
    }
}

impl AcquisitionParams {
    /// Rotor angle given in degrees.
    pub fn with_rotor_angle_degrees(mut self, degrees: f64) -> Self {
        self.rotor_angle = degrees * PI / 180.0;
        self
    }

    pub fn larmor_frequency(&self) -> f64 {
        self.isotope.larmor_frequency(self.magnetic_flux_density)
    }

    pub(crate) fn validate(&self) -> Result<(), KernelError> {
        let checks = [
            ("magnetic_flux_density", self.magnetic_flux_density),
            ("rotor_frequency", self.rotor_frequency),
        ];
        for (name, value) in checks {
            if !value.is_finite() || value <= 0.0 {
                return Err(KernelError::InvalidParameter { name, value });
            }
        }
        if !self.rotor_angle.is_finite() {
            return Err(KernelError::InvalidParameter {
                name: "rotor_angle",
                value: self.rotor_angle,
            });
        }
        if self.number_of_sidebands == 0 || self.integration_density == 0 {
            return Err(KernelError::InvalidSampling {
                sidebands: self.number_of_sidebands,
                integration_density: self.integration_density,
            });
        }
        Ok(())
    }
}

impl Isotope {
    fn si29() -> Self {
        "29Si".parse().unwrap_or_else(|_| unreachable!("29Si is in the isotope table"))
    }
}

/// Averages `factor^rank` supersampled columns back onto their parent feature.
///
/// `fine` is column-major `(rows, fine_features)`, where fine feature indices are
/// column-major over the supersampled grid.
pub(crate) fn average_supersampled(
    fine: &[f64],
    rows: usize,
    shape: &[usize],
    factor: usize,
) -> Vec<f64> {
    let n_features: usize = shape.iter().product();
    let mut coarse = vec![0.0; rows * n_features];
    let fine_shape: Vec<usize> = shape.iter().map(|&n| n * factor).collect();
    let n_fine: usize = fine_shape.iter().product();
    let norm = 1.0 / (factor.pow(shape.len() as u32)) as f64;
    let mut fine_index = vec![0usize; shape.len()];
    for fine_col in 0..n_fine {
        let mut rest = fine_col;
        for (slot, &n) in fine_index.iter_mut().zip(&fine_shape) {
            *slot = rest % n;
            rest /= n;
        }
        let mut col = 0;
        let mut stride = 1;
        for (&i, &n) in fine_index.iter().zip(shape) {
            col += (i / factor) * stride;
            stride *= n;
        }
        let src = &fine[fine_col * rows..(fine_col + 1) * rows];
        let dst = &mut coarse[col * rows..(col + 1) * rows];
        for (d, s) in dst.iter_mut().zip(src) {
            *d += s * norm;
        }
    }
    coarse
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averaging_groups_sub_cells() {
        // 2x1 grid supersampled by 2 -> 4x2 fine features, one row each.
        let fine: Vec<f64> = (0..8).map(|v| v as f64).collect();
        let coarse = average_supersampled(&fine, 1, &[2, 1], 2);
        // Parent 0 holds fine (0,0),(1,0),(0,1),(1,1) -> 0,1,4,5.
        assert_eq!(coarse, vec![2.5, 4.5]);
    }

    #[test]
    fn default_params_validate() {
        let params = AcquisitionParams::default();
        assert!(params.validate().is_ok());
        let bad = AcquisitionParams {
            number_of_sidebands: 0,
            ..AcquisitionParams::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(KernelError::InvalidSampling { .. })
        ));
    }
}
