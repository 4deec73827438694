use faer_core::Mat;

use super::{average_supersampled, KernelError};
use crate::dimension::{Dimension, Unit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaxationKind {
    /// Decay `exp(-t / T2)`.
    T2,
    /// Recovery `1 - exp(-t / T1)`.
    T1,
}

/// Relaxation kernel over a one-dimensional grid of relaxation times.
#[derive(Debug, Clone)]
pub struct RelaxationKernel {
    kind: RelaxationKind,
    kernel_dimension: Dimension,
    inverse_dimension: Dimension,
}

impl RelaxationKernel {
    pub fn new(
        kind: RelaxationKind,
        kernel_dimension: &Dimension,
        inverse_dimension: &Dimension,
    ) -> Result<Self, KernelError> {
        kernel_dimension.validate()?;
        inverse_dimension.validate()?;
        if kernel_dimension.unit != Unit::Second {
            return Err(KernelError::DirectUnit {
                expected: "time",
                found: kernel_dimension.unit,
            });
        }
        if inverse_dimension.unit != Unit::Second {
            return Err(KernelError::InverseUnit {
                axis: 0,
                expected: "time",
                found: inverse_dimension.unit,
            });
        }
        Ok(Self {
            kind,
            kernel_dimension: kernel_dimension.clone(),
            inverse_dimension: inverse_dimension.clone(),
        })
    }

    pub fn kind(&self) -> RelaxationKind {
        self.kind
    }

    pub fn kernel(&self, supersampling: usize) -> Result<Mat<f64>, KernelError> {
        if supersampling == 0 {
            return Err(KernelError::ZeroSupersampling);
        }
        let times = self.kernel_dimension.coordinates();
        let inverse = self.inverse_dimension.supersampled_coordinates(supersampling);
        if let Some(index) = inverse.iter().position(|&t| t <= 0.0 || !t.is_finite()) {
            return Err(KernelError::NonPositiveRelaxationTime {
                index: index / supersampling,
                value: inverse[index],
            });
        }

        let rows = times.len();
        let mut fine = Vec::with_capacity(rows * inverse.len());
        for &relaxation in &inverse {
            for &t in &times {
                let decay = (-t / relaxation).exp();
                fine.push(match self.kind {
                    RelaxationKind::T2 => decay,
                    RelaxationKind::T1 => 1.0 - decay,
                });
            }
        }
        let n = self.inverse_dimension.count;
        let coarse = average_supersampled(&fine, rows, &[n], supersampling);
        log::debug!("{:?} relaxation kernel: {rows}x{n}", self.kind);
        Ok(Mat::from_fn(rows, n, |i, j| coarse[j * rows + i]))
    }
}
