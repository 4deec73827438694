//! Smooth-LASSO inversion of 2D NMR spectra into tensor parameter distributions.
//!
//! This crate recovers a distribution `f` over an inverse grid (nuclear shielding
//! `x`-`y` anisotropy, or relaxation times) from spectra `s` that satisfy
//! `s = K f + noise`. The problem is ill-posed, so it is regularized with an L1
//! term and a first-difference smoothness term.
//!
//! How it works (high level):
//! - Build the kernel `K` from acquisition parameters (`NuclearShieldingKernel`,
//!   `RelaxationKernel`).
//! - Compress `(K, s)` with a truncated SVD (`TsvdCompression`).
//! - Minimize `||K f - s||^2 + alpha ||f||_1 + lambda ||D f||^2` by coordinate
//!   descent (`SmoothLasso`), choosing `(alpha, lambda)` by K-fold
//!   cross-validation when needed (`SmoothLassoCv`).
//! - Post-process: residuals at full resolution, re-binning to `zeta`-`eta`
//!   (`polar`), and region statistics (`stats`).
//!
//! Example:
//! ```rust,no_run
//! use faer_core::Parallelism;
//! use mrinv_rs::{
//!     AcquisitionParams, Dataset, Dimension, Hyperparameters, InverseGrid,
//!     NuclearShieldingKernel, SmoothLasso, SolverOptions, Truncation, TsvdCompression, Unit,
//! };
//!
//! let direct = Dimension::new(96, 208.33, Unit::Hertz).unwrap().with_offset(-10000.0);
//! let x = Dimension::new(25, 400.0, Unit::Hertz).unwrap();
//! let grid = InverseGrid::xy(x.clone(), x).unwrap();
//! let kernel = NuclearShieldingKernel::new(&direct, &grid, AcquisitionParams::default())
//!     .unwrap()
//!     .kernel(1)
//!     .unwrap();
//!
//! let spectrum = Dataset::new(vec![direct], vec![0.0; 96]).unwrap();
//! let compressed = TsvdCompression::new(
//!     kernel.as_ref(),
//!     spectrum.as_matrix(),
//!     Truncation::Entropy,
//!     Parallelism::None,
//! )
//! .unwrap();
//!
//! let hyper = Hyperparameters::new(1e-5, 1e-6).unwrap();
//! let solver = SmoothLasso::new(hyper, &grid, Parallelism::None).unwrap();
//! let fit = solver
//!     .fit(
//!         compressed.compressed_kernel(),
//!         compressed.compressed_signal(),
//!         &SolverOptions::default(),
//!         None,
//!     )
//!     .unwrap();
//! let residuals = fit.residuals(kernel.as_ref(), &spectrum).unwrap();
//! assert_eq!(residuals.shape(), spectrum.shape());
//! ```

mod compression;
mod cv;
mod dataset;
mod dimension;
mod isotope;
mod kernel;
mod pattern;
mod penalty;
pub mod polar;
mod report;
mod solver;
pub mod stats;

pub use compression::{CompressionError, Truncation, TsvdCompression};
pub use cv::{log_spaced, CvError, CvResult, SmoothLassoCv};
pub use dataset::Dataset;
pub use dimension::{Dimension, DimensionError, InverseGrid, Unit};
pub use isotope::{Isotope, UnknownIsotope};
pub use kernel::{
    AcquisitionParams, KernelError, NuclearShieldingKernel, RelaxationKernel, RelaxationKind,
    MAGIC_ANGLE,
};
pub use pattern::{PatternError, SparsePattern};
pub use penalty::DifferenceOperator;
pub use report::{IterationReport, Reporter, SolveStatus, SolverStats, StdoutReporter};
pub use solver::{Fit, Hyperparameters, SmoothLasso, SolverError, SolverOptions};
