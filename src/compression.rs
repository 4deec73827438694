use core::fmt;

use dyn_stack::{GlobalPodBuffer, PodStack};
use faer_core::mul::matmul;
use faer_core::{Mat, MatRef, Parallelism};
use faer_svd::{compute_svd, compute_svd_req, ComputeVectors, SvdParams};
use serde::{Deserialize, Serialize};

/// Rule selecting how many singular components to keep.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Truncation {
    /// Normalized entropy of the squared singular values times their count.
    #[default]
    Entropy,
    /// Keep exactly this many components (capped at the numerical rank).
    Rank(usize),
    /// Keep components with `s_i / s_0` above this value.
    RelativeThreshold(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompressionError {
    /// The kernel or signal has no rows or columns.
    InvalidDimensions { nrows: usize, ncols: usize },
    /// Kernel and signal row counts differ.
    RowMismatch { kernel: usize, signal: usize },
    /// Every singular value of the kernel is zero.
    ZeroKernel,
    /// `Rank(0)` or a threshold outside `[0, 1)`.
    InvalidTruncation(Truncation),
    /// Workspace requirement overflowed.
    WorkspaceOverflow,
    /// Workspace allocation failed.
    WorkspaceAlloc,
}

impl fmt::Display for CompressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDimensions { nrows, ncols } => {
                write!(f, "invalid dimensions: nrows={nrows}, ncols={ncols}")
            }
            Self::RowMismatch { kernel, signal } => {
                write!(f, "kernel has {kernel} rows but signal has {signal}")
            }
            Self::ZeroKernel => write!(f, "kernel has no nonzero singular values"),
            Self::InvalidTruncation(t) => write!(f, "invalid truncation rule {t:?}"),
            Self::WorkspaceOverflow => write!(f, "workspace size overflow"),
            Self::WorkspaceAlloc => write!(f, "workspace allocation failed"),
        }
    }
}

impl std::error::Error for CompressionError {}

/// Reduced-rank system `(U_r^T K, U_r^T s)` from a truncated SVD of `K`.
///
/// Least squares on the compressed pair differs from the full problem only by
/// the constant `truncation_error` plus the part of `K f` outside the retained
/// left singular subspace.
#[derive(Debug, Clone)]
pub struct TsvdCompression {
    compressed_kernel: Mat<f64>,
    compressed_signal: Mat<f64>,
    singular_values: Vec<f64>,
    truncation_index: usize,
    truncation_error: f64,
}

impl TsvdCompression {
    pub fn new(
        kernel: MatRef<'_, f64>,
        signal: MatRef<'_, f64>,
        truncation: Truncation,
        parallelism: Parallelism,
    ) -> Result<Self, CompressionError> {
        let (m, n) = (kernel.nrows(), kernel.ncols());
        if m == 0 || n == 0 || signal.ncols() == 0 {
            return Err(CompressionError::InvalidDimensions { nrows: m, ncols: n });
        }
        if signal.nrows() != m {
            return Err(CompressionError::RowMismatch {
                kernel: m,
                signal: signal.nrows(),
            });
        }
        match truncation {
            Truncation::Rank(0) => return Err(CompressionError::InvalidTruncation(truncation)),
            Truncation::RelativeThreshold(t) if !(0.0..1.0).contains(&t) => {
                return Err(CompressionError::InvalidTruncation(truncation))
            }
            _ => {}
        }

        let size = m.min(n);
        let mut s = Mat::<f64>::zeros(size, 1);
        let mut u = Mat::<f64>::zeros(m, size);
        let params = SvdParams::default();
        let req = compute_svd_req::<f64>(
            m,
            n,
            ComputeVectors::Thin,
            ComputeVectors::No,
            parallelism,
            params,
        )
        .map_err(|_| CompressionError::WorkspaceOverflow)?;
        let mut buffer = GlobalPodBuffer::try_new(req).map_err(|_| CompressionError::WorkspaceAlloc)?;
        compute_svd(
            kernel,
            s.as_mut(),
            Some(u.as_mut()),
            None,
            parallelism,
            PodStack::new(&mut buffer),
            params,
        );

        // Order components by decreasing singular value.
        let mut order: Vec<usize> = (0..size).collect();
        order.sort_by(|&a, &b| s.read(b, 0).total_cmp(&s.read(a, 0)));
        let singular_values: Vec<f64> = order.iter().map(|&i| s.read(i, 0)).collect();

        let largest = singular_values[0];
        if largest.is_nan() || largest <= 0.0 {
            return Err(CompressionError::ZeroKernel);
        }
        let tol = largest * f64::EPSILON * m.max(n) as f64;
        let numerical_rank = singular_values.iter().take_while(|&&v| v > tol).count();
        let truncation_index = truncation_rank(&singular_values[..numerical_rank], truncation);

        let u_r = Mat::<f64>::from_fn(m, truncation_index, |i, j| u.read(i, order[j]));
        let mut compressed_kernel = Mat::<f64>::zeros(truncation_index, n);
        matmul(
            compressed_kernel.as_mut(),
            u_r.as_ref().transpose(),
            kernel,
            None,
            1.0,
            parallelism,
        );
        let mut compressed_signal = Mat::<f64>::zeros(truncation_index, signal.ncols());
        matmul(
            compressed_signal.as_mut(),
            u_r.as_ref().transpose(),
            signal,
            None,
            1.0,
            parallelism,
        );

        let mut signal_energy = 0.0;
        for j in 0..signal.ncols() {
            for i in 0..m {
                signal_energy += signal.read(i, j).powi(2);
            }
        }
        let mut retained = 0.0;
        for j in 0..signal.ncols() {
            for i in 0..truncation_index {
                retained += compressed_signal.read(i, j).powi(2);
            }
        }
        let truncation_error = (signal_energy - retained).max(0.0);

        log::debug!(
            "tsvd compression: {m}x{n} -> {truncation_index}x{n} (numerical rank {numerical_rank}, rule {truncation:?})"
        );
        Ok(Self {
            compressed_kernel,
            compressed_signal,
            singular_values,
            truncation_index,
            truncation_error,
        })
    }

    pub fn compressed_kernel(&self) -> MatRef<'_, f64> {
        self.compressed_kernel.as_ref()
    }

    pub fn compressed_signal(&self) -> MatRef<'_, f64> {
        self.compressed_signal.as_ref()
    }

    /// Number of retained singular components.
    pub fn truncation_index(&self) -> usize {
        self.truncation_index
    }

    /// All singular values of the kernel, in decreasing order.
    pub fn singular_values(&self) -> &[f64] {
        &self.singular_values
    }

    /// Signal energy outside the retained subspace, `||(I - U_r U_r^T) s||^2`.
    pub fn truncation_error(&self) -> f64 {
        self.truncation_error
    }
}

/// Number of components kept from nonzero, decreasing singular values.
fn truncation_rank(singular_values: &[f64], truncation: Truncation) -> usize {
    let len = singular_values.len();
    let rank = match truncation {
        Truncation::Rank(r) => r,
        Truncation::RelativeThreshold(t) => {
            let largest = singular_values[0];
            singular_values.iter().filter(|&&v| v / largest > t).count()
        }
        Truncation::Entropy => {
            if len == 1 {
                1
            } else {
                let total: f64 = singular_values.iter().map(|v| v * v).sum();
                let entropy: f64 = singular_values
                    .iter()
                    .map(|v| v * v / total)
                    .filter(|&p| p > 0.0)
                    .map(|p| -p * p.ln())
                    .sum();
                let normalized = entropy / (len as f64).ln();
                (normalized * len as f64).ceil() as usize
            }
        }
    };
    rank.clamp(1, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entropy_rank_tracks_spectrum_flatness() {
        assert_eq!(truncation_rank(&[1.0, 1.0, 1.0, 1.0], Truncation::Entropy), 4);
        assert_eq!(truncation_rank(&[1.0, 1e-6, 1e-6, 1e-6], Truncation::Entropy), 1);
        let mid = truncation_rank(&[1.0, 0.5, 0.1, 0.01, 0.001], Truncation::Entropy);
        assert!((2..5).contains(&mid), "rank {mid}");
    }

    #[test]
    fn explicit_rules_are_capped() {
        let s = [4.0, 2.0, 1.0];
        assert_eq!(truncation_rank(&s, Truncation::Rank(10)), 3);
        assert_eq!(truncation_rank(&s, Truncation::RelativeThreshold(0.3)), 2);
        assert_eq!(truncation_rank(&s, Truncation::RelativeThreshold(0.99)), 1);
    }

    #[test]
    fn compressed_signal_preserves_energy_at_full_rank() {
        let k = Mat::<f64>::from_fn(4, 6, |i, j| 1.0 / (1.0 + i as f64 + j as f64));
        let s = Mat::<f64>::from_fn(4, 2, |i, j| (i + 2 * j) as f64 - 1.5);
        let c = TsvdCompression::new(k.as_ref(), s.as_ref(), Truncation::Rank(4), Parallelism::None)
            .unwrap();
        // Hilbert-like kernels lose rank numerically; whatever is kept must be consistent.
        assert!(c.truncation_index() <= 4);
        assert_eq!(c.compressed_kernel().nrows(), c.truncation_index());
        assert_eq!(c.compressed_signal().ncols(), 2);
        let sv = c.singular_values();
        assert!(sv.windows(2).all(|w| w[0] >= w[1]));
        assert!(c.truncation_error() >= 0.0);
    }

    #[test]
    fn rejects_bad_inputs() {
        let k = Mat::<f64>::zeros(3, 2);
        let s = Mat::<f64>::zeros(3, 1);
        assert_eq!(
            TsvdCompression::new(k.as_ref(), s.as_ref(), Truncation::Entropy, Parallelism::None)
                .unwrap_err(),
            CompressionError::ZeroKernel
        );
        let short = Mat::<f64>::zeros(2, 1);
        assert!(matches!(
            TsvdCompression::new(k.as_ref(), short.as_ref(), Truncation::Entropy, Parallelism::None),
            Err(CompressionError::RowMismatch { .. })
        ));
        assert!(matches!(
            TsvdCompression::new(k.as_ref(), s.as_ref(), Truncation::Rank(0), Parallelism::None),
            Err(CompressionError::InvalidTruncation(_))
        ));
    }
}
