use core::fmt;

use std::time::{Duration, Instant};

use faer_core::mul::matmul;
use faer_core::{mat, Mat, MatRef, Parallelism};
use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::dimension::{DimensionError, InverseGrid};
use crate::pattern::PatternError;
use crate::penalty::DifferenceOperator;
use crate::report::{emit_line, IterationReport, Reporter, SolveStatus, SolverStats, StdoutReporter};

/// Errors while configuring or running the smooth-LASSO solver.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    /// The smoothness operator could not be assembled.
    Pattern(PatternError),
    /// The kernel has zero rows or columns.
    InvalidDimensions { nrows: usize, ncols: usize },
    /// Kernel columns do not match the number of grid features.
    FeatureMismatch { expected: usize, actual: usize },
    /// Kernel and signal row counts differ.
    SignalRows { kernel: usize, signal: usize },
    /// A hyperparameter is negative or not finite.
    InvalidHyperparameter { name: &'static str, value: f64 },
    /// A dataset does not line up with the kernel or solution.
    Dimension(DimensionError),
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pattern(err) => write!(f, "invalid smoothness operator: {err}"),
            Self::InvalidDimensions { nrows, ncols } => {
                write!(f, "invalid dimensions: nrows={nrows}, ncols={ncols}")
            }
            Self::FeatureMismatch { expected, actual } => {
                write!(f, "kernel has {actual} columns but the grid has {expected} features")
            }
            Self::SignalRows { kernel, signal } => {
                write!(f, "kernel has {kernel} rows but signal has {signal}")
            }
            Self::InvalidHyperparameter { name, value } => {
                write!(f, "{name} must be finite and non-negative (got {value})")
            }
            Self::Dimension(err) => write!(f, "dimension error: {err}"),
        }
    }
}

impl std::error::Error for SolverError {}

impl From<PatternError> for SolverError {
    fn from(err: PatternError) -> Self {
        Self::Pattern(err)
    }
}

impl From<DimensionError> for SolverError {
    fn from(err: DimensionError) -> Self {
        Self::Dimension(err)
    }
}

/// Penalty weights: `alpha` on `||f||_1`, `lambda` on `||D f||^2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub alpha: f64,
    pub lambda: f64,
}

impl Hyperparameters {
    pub fn new(alpha: f64, lambda: f64) -> Result<Self, SolverError> {
        let hyper = Self { alpha, lambda };
        hyper.validate()?;
        Ok(hyper)
    }

    pub(crate) fn validate(&self) -> Result<(), SolverError> {
        for (name, value) in [("alpha", self.alpha), ("lambda", self.lambda)] {
            if !value.is_finite() || value < 0.0 {
                return Err(SolverError::InvalidHyperparameter { name, value });
            }
        }
        Ok(())
    }
}

/// Options controlling the coordinate-descent solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Maximum number of full sweeps over the coefficients.
    pub max_iters: usize,
    /// Converge when the largest update is at most `tol * max |f|`.
    pub tol: f64,
    /// Constrain every coefficient to be non-negative.
    pub positive: bool,
    /// Emit per-sweep diagnostics to stdout by default.
    pub verbose: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iters: 5000,
            tol: 1e-6,
            positive: true,
            verbose: false,
        }
    }
}

enum ReporterSlot<'a> {
    External(&'a mut dyn Reporter),
    Local(StdoutReporter),
    None,
}

impl<'a> ReporterSlot<'a> {
    fn new(reporter: Option<&'a mut dyn Reporter>, verbose: bool) -> Self {
        match reporter {
            Some(r) => Self::External(r),
            None if verbose => Self::Local(StdoutReporter::new()),
            None => Self::None,
        }
    }

    fn as_mut(&mut self) -> Option<&mut dyn Reporter> {
        match self {
            Self::External(r) => Some(*r),
            Self::Local(r) => Some(r),
            Self::None => None,
        }
    }
}

/// Smooth-LASSO regression over an inverse grid.
///
/// Minimizes `||K f - s||^2 + alpha ||f||_1 + lambda ||D f||^2` for every
/// column of `s`, where `D` is the first-difference operator of the grid.
pub struct SmoothLasso {
    hyperparameters: Hyperparameters,
    penalty: DifferenceOperator,
    parallelism: Parallelism,
}

impl SmoothLasso {
    pub fn new(
        hyperparameters: Hyperparameters,
        grid: &InverseGrid,
        parallelism: Parallelism,
    ) -> Result<Self, SolverError> {
        Self::with_shape(hyperparameters, &grid.shape(), parallelism)
    }

    /// Same as `new`, from the grid shape alone.
    pub fn with_shape(
        hyperparameters: Hyperparameters,
        shape: &[usize],
        parallelism: Parallelism,
    ) -> Result<Self, SolverError> {
        hyperparameters.validate()?;
        let penalty = DifferenceOperator::new(shape)?;
        if penalty.ncols() == 0 {
            return Err(SolverError::InvalidDimensions {
                nrows: 0,
                ncols: 0,
            });
        }
        Ok(Self {
            hyperparameters,
            penalty,
            parallelism,
        })
    }

    pub fn hyperparameters(&self) -> Hyperparameters {
        self.hyperparameters
    }

    pub fn penalty(&self) -> &DifferenceOperator {
        &self.penalty
    }

    /// Solves for every column of `signal`; `kernel` may be compressed.
    pub fn fit(
        &self,
        kernel: MatRef<'_, f64>,
        signal: MatRef<'_, f64>,
        options: &SolverOptions,
        reporter: Option<&mut dyn Reporter>,
    ) -> Result<Fit, SolverError> {
        check_system(kernel, signal, self.penalty.ncols())?;
        let start_time = options.verbose.then(Instant::now);
        let mut reporter = ReporterSlot::new(reporter, options.verbose);

        let n = kernel.ncols();
        let cols = signal.ncols();
        let mut gram = gram_matrix(kernel, self.parallelism);
        self.penalty.add_gram(&mut gram, self.hyperparameters.lambda);
        let rhs = correlation(kernel, signal, self.parallelism);

        let mut coefficients = vec![0.0; n * cols];
        let mut stats = Vec::with_capacity(cols);
        for col in 0..cols {
            let energy = column_energy(signal, col);
            let column_stats = coordinate_descent(
                &gram,
                &rhs[col * n..(col + 1) * n],
                energy,
                self.hyperparameters.alpha,
                options,
                &mut coefficients[col * n..(col + 1) * n],
                col,
                reporter.as_mut(),
            );
            match column_stats.status {
                SolveStatus::Converged => {}
                SolveStatus::MaxIterations => log::warn!(
                    "column {col}: no convergence after {} sweeps (last update {:.2e})",
                    column_stats.iterations,
                    column_stats.max_update
                ),
                SolveStatus::NumericalFailure => {
                    log::warn!("column {col}: numerical failure after {} sweeps", column_stats.iterations)
                }
            }
            stats.push(column_stats);
        }

        if let Some(reporter) = reporter.as_mut() {
            reporter.on_finish();
        }
        if let Some(start) = start_time {
            emit_line(&format!("time: {}", format_duration(start.elapsed())));
        }
        log::debug!(
            "smooth lasso: {n} features x {cols} columns, alpha={:.3e}, lambda={:.3e}",
            self.hyperparameters.alpha,
            self.hyperparameters.lambda
        );

        Ok(Fit {
            coefficients,
            n_features: n,
            n_columns: cols,
            stats,
            hyperparameters: self.hyperparameters,
        })
    }
}

/// Solution of a smooth-LASSO fit.
#[derive(Debug, Clone)]
pub struct Fit {
    coefficients: Vec<f64>,
    n_features: usize,
    n_columns: usize,
    stats: Vec<SolverStats>,
    hyperparameters: Hyperparameters,
}

impl Fit {
    /// Coefficients as an `(n_features, n_columns)` matrix.
    pub fn f(&self) -> MatRef<'_, f64> {
        mat::from_column_major_slice::<f64>(&self.coefficients, self.n_features, self.n_columns)
    }

    pub fn column(&self, col: usize) -> &[f64] {
        &self.coefficients[col * self.n_features..(col + 1) * self.n_features]
    }

    pub fn stats(&self) -> &[SolverStats] {
        &self.stats
    }

    pub fn hyperparameters(&self) -> Hyperparameters {
        self.hyperparameters
    }

    /// True when every column converged.
    pub fn is_converged(&self) -> bool {
        self.stats.iter().all(|s| s.status.is_converged())
    }

    /// `K f`.
    pub fn predict(&self, kernel: MatRef<'_, f64>) -> Result<Mat<f64>, SolverError> {
        if kernel.ncols() != self.n_features {
            return Err(SolverError::FeatureMismatch {
                expected: self.n_features,
                actual: kernel.ncols(),
            });
        }
        let mut out = Mat::<f64>::zeros(kernel.nrows(), self.n_columns);
        matmul(out.as_mut(), kernel, self.f(), None, 1.0, Parallelism::None);
        Ok(out)
    }

    /// `s - K f` against the full, uncompressed spectrum.
    pub fn residuals(
        &self,
        kernel: MatRef<'_, f64>,
        spectrum: &Dataset,
    ) -> Result<Dataset, SolverError> {
        spectrum.check_anisotropic_axis(kernel.nrows())?;
        if spectrum.ncols() != self.n_columns {
            return Err(DimensionError::ColumnMismatch {
                expected: self.n_columns,
                actual: spectrum.ncols(),
            }
            .into());
        }
        let predicted = self.predict(kernel)?;
        let observed = spectrum.as_matrix();
        let residual = Mat::<f64>::from_fn(observed.nrows(), observed.ncols(), |i, j| {
            observed.read(i, j) - predicted.read(i, j)
        });
        Ok(Dataset::from_matrix(spectrum.dimensions().to_vec(), residual.as_ref())?)
    }

    /// The solution as a dataset over the inverse grid followed by the
    /// non-anisotropic dimensions of `spectrum`.
    pub fn distribution(
        &self,
        grid: &InverseGrid,
        spectrum: &Dataset,
    ) -> Result<Dataset, SolverError> {
        if grid.n_features() != self.n_features {
            return Err(SolverError::FeatureMismatch {
                expected: grid.n_features(),
                actual: self.n_features,
            });
        }
        if spectrum.ncols() != self.n_columns {
            return Err(DimensionError::ColumnMismatch {
                expected: self.n_columns,
                actual: spectrum.ncols(),
            }
            .into());
        }
        let mut dimensions = grid.dimensions().to_vec();
        dimensions.extend_from_slice(&spectrum.dimensions()[1..]);
        Ok(Dataset::new(dimensions, self.coefficients.clone())?)
    }
}

pub(crate) fn check_system(
    kernel: MatRef<'_, f64>,
    signal: MatRef<'_, f64>,
    n_features: usize,
) -> Result<(), SolverError> {
    if kernel.nrows() == 0 || kernel.ncols() == 0 || signal.ncols() == 0 {
        return Err(SolverError::InvalidDimensions {
            nrows: kernel.nrows(),
            ncols: kernel.ncols(),
        });
    }
    if kernel.ncols() != n_features {
        return Err(SolverError::FeatureMismatch {
            expected: n_features,
            actual: kernel.ncols(),
        });
    }
    if kernel.nrows() != signal.nrows() {
        return Err(SolverError::SignalRows {
            kernel: kernel.nrows(),
            signal: signal.nrows(),
        });
    }
    Ok(())
}

/// Column-major `K^T K`.
pub(crate) fn gram_matrix(kernel: MatRef<'_, f64>, parallelism: Parallelism) -> Vec<f64> {
    let n = kernel.ncols();
    let mut gram = vec![0.0; n * n];
    matmul(
        mat::from_column_major_slice_mut::<f64>(&mut gram, n, n),
        kernel.transpose(),
        kernel,
        None,
        1.0,
        parallelism,
    );
    gram
}

/// Column-major `K^T s`.
pub(crate) fn correlation(
    kernel: MatRef<'_, f64>,
    signal: MatRef<'_, f64>,
    parallelism: Parallelism,
) -> Vec<f64> {
    let (n, cols) = (kernel.ncols(), signal.ncols());
    let mut rhs = vec![0.0; n * cols];
    matmul(
        mat::from_column_major_slice_mut::<f64>(&mut rhs, n, cols),
        kernel.transpose(),
        signal,
        None,
        1.0,
        parallelism,
    );
    rhs
}

pub(crate) fn column_energy(signal: MatRef<'_, f64>, col: usize) -> f64 {
    (0..signal.nrows()).map(|i| signal.read(i, col).powi(2)).sum()
}

/// Cyclic coordinate descent on `f^T G f - 2 c^T f + e + alpha ||f||_1`.
///
/// `gram` is the column-major `n x n` matrix `G`, `rhs` is `c`, `energy` is
/// `e = ||s||^2`. `f` holds the starting point and receives the solution.
#[allow(clippy::too_many_arguments)]
pub(crate) fn coordinate_descent(
    gram: &[f64],
    rhs: &[f64],
    energy: f64,
    alpha: f64,
    options: &SolverOptions,
    f: &mut [f64],
    column: usize,
    mut reporter: Option<&mut dyn Reporter>,
) -> SolverStats {
    let n = rhs.len();
    let half_alpha = 0.5 * alpha;

    // q = G f, kept current as coordinates move.
    let mut q = vec![0.0; n];
    for (j, &fj) in f.iter().enumerate() {
        if fj != 0.0 {
            for (qi, gij) in q.iter_mut().zip(&gram[j * n..(j + 1) * n]) {
                *qi += gij * fj;
            }
        }
    }

    let mut max_update = 0.0;
    for iter in 0..options.max_iters {
        max_update = 0.0;
        let mut max_coef: f64 = 0.0;
        for j in 0..n {
            let g_col = &gram[j * n..(j + 1) * n];
            let gjj = g_col[j];
            let old = f[j];
            let new = if gjj > 0.0 {
                let z = rhs[j] - q[j] + gjj * old;
                if options.positive {
                    ((z - half_alpha) / gjj).max(0.0)
                } else {
                    z.signum() * (z.abs() - half_alpha).max(0.0) / gjj
                }
            } else {
                0.0
            };
            let delta = new - old;
            if delta != 0.0 {
                for (qi, gij) in q.iter_mut().zip(g_col) {
                    *qi += gij * delta;
                }
                f[j] = new;
            }
            max_update = f64::max(max_update, delta.abs());
            max_coef = max_coef.max(new.abs());
        }

        let objective = objective(f, &q, rhs, energy, alpha);
        let nonzero = f.iter().filter(|&&v| v != 0.0).count();
        if let Some(reporter) = reporter.as_deref_mut() {
            reporter.on_iteration(&IterationReport {
                column,
                iteration: iter,
                objective,
                max_update,
                nonzero,
            });
        }
        if !objective.is_finite() || !max_update.is_finite() {
            return SolverStats {
                status: SolveStatus::NumericalFailure,
                iterations: iter + 1,
                objective,
                max_update,
                nonzero,
            };
        }
        if max_update <= options.tol * max_coef {
            return SolverStats {
                status: SolveStatus::Converged,
                iterations: iter + 1,
                objective,
                max_update,
                nonzero,
            };
        }
    }

    SolverStats {
        status: SolveStatus::MaxIterations,
        iterations: options.max_iters,
        objective: objective(f, &q, rhs, energy, alpha),
        max_update,
        nonzero: f.iter().filter(|&&v| v != 0.0).count(),
    }
}

fn objective(f: &[f64], q: &[f64], rhs: &[f64], energy: f64, alpha: f64) -> f64 {
    let mut quad = 0.0;
    let mut linear = 0.0;
    let mut l1 = 0.0;
    for ((&fj, &qj), &cj) in f.iter().zip(q).zip(rhs) {
        quad += fj * qj;
        linear += cj * fj;
        l1 += fj.abs();
    }
    quad - 2.0 * linear + energy + alpha * l1
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 1.0 {
        format!("{:.3} s", secs)
    } else if secs >= 1e-3 {
        format!("{:.3} ms", secs * 1e3)
    } else if secs >= 1e-6 {
        format!("{:.3} us", secs * 1e6)
    } else {
        format!("{:.0} ns", secs * 1e9)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagonal_problem() -> (Mat<f64>, Mat<f64>) {
        let k = Mat::<f64>::from_fn(2, 2, |i, j| if i == j { 1.0 } else { 0.0 });
        let s = Mat::<f64>::from_fn(2, 1, |i, _| if i == 0 { 3.0 } else { -1.0 });
        (k, s)
    }

    #[test]
    fn soft_thresholds_identity_kernel() {
        let (k, s) = diagonal_problem();
        let hyper = Hyperparameters::new(2.0, 0.0).unwrap();
        let solver = SmoothLasso::with_shape(hyper, &[2], Parallelism::None).unwrap();

        let fit = solver
            .fit(k.as_ref(), s.as_ref(), &SolverOptions::default(), None)
            .unwrap();
        assert!(fit.is_converged());
        // f = max(s - alpha / 2, 0) for an orthonormal kernel.
        assert!((fit.column(0)[0] - 2.0).abs() < 1e-9);
        assert_eq!(fit.column(0)[1], 0.0);

        let unconstrained = SolverOptions {
            positive: false,
            ..SolverOptions::default()
        };
        let fit = solver.fit(k.as_ref(), s.as_ref(), &unconstrained, None).unwrap();
        assert!((fit.column(0)[1] - 0.0).abs() < 1e-12);
        let hyper = Hyperparameters::new(1.0, 0.0).unwrap();
        let solver = SmoothLasso::with_shape(hyper, &[2], Parallelism::None).unwrap();
        let fit = solver.fit(k.as_ref(), s.as_ref(), &unconstrained, None).unwrap();
        assert!((fit.column(0)[1] + 0.5).abs() < 1e-9);
    }

    #[test]
    fn zero_signal_gives_zero_solution() {
        let k = Mat::<f64>::from_fn(3, 4, |i, j| (i + j) as f64 + 1.0);
        let s = Mat::<f64>::zeros(3, 2);
        let hyper = Hyperparameters::new(0.1, 0.1).unwrap();
        let solver = SmoothLasso::with_shape(hyper, &[2, 2], Parallelism::None).unwrap();
        let fit = solver
            .fit(k.as_ref(), s.as_ref(), &SolverOptions::default(), None)
            .unwrap();
        assert!(fit.is_converged());
        assert!(fit.stats().iter().all(|st| st.iterations == 1));
        assert!((0..2).all(|c| fit.column(c).iter().all(|&v| v == 0.0)));
    }

    #[test]
    fn iteration_budget_is_reported() {
        let k = Mat::<f64>::from_fn(3, 3, |i, j| 1.0 / (1.0 + i as f64 + j as f64));
        let s = Mat::<f64>::from_fn(3, 1, |i, _| 1.0 + i as f64);
        let hyper = Hyperparameters::new(0.0, 0.0).unwrap();
        let solver = SmoothLasso::with_shape(hyper, &[3], Parallelism::None).unwrap();
        let options = SolverOptions {
            max_iters: 1,
            tol: 1e-14,
            ..SolverOptions::default()
        };
        let fit = solver.fit(k.as_ref(), s.as_ref(), &options, None).unwrap();
        assert_eq!(fit.stats()[0].status, SolveStatus::MaxIterations);
        assert!(!fit.is_converged());
    }

    #[test]
    fn non_finite_kernel_is_numerical_failure() {
        let k = Mat::<f64>::from_fn(2, 2, |i, j| if (i, j) == (0, 0) { f64::NAN } else { 1.0 });
        let s = Mat::<f64>::from_fn(2, 1, |_, _| 1.0);
        let hyper = Hyperparameters::new(0.0, 0.0).unwrap();
        let solver = SmoothLasso::with_shape(hyper, &[2], Parallelism::None).unwrap();
        let fit = solver
            .fit(k.as_ref(), s.as_ref(), &SolverOptions::default(), None)
            .unwrap();
        assert_eq!(fit.stats()[0].status, SolveStatus::NumericalFailure);
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(matches!(
            Hyperparameters::new(-1.0, 0.0),
            Err(SolverError::InvalidHyperparameter { name: "alpha", .. })
        ));
        assert!(matches!(
            Hyperparameters::new(0.0, f64::NAN),
            Err(SolverError::InvalidHyperparameter { name: "lambda", .. })
        ));
        let hyper = Hyperparameters::new(0.0, 0.0).unwrap();
        let solver = SmoothLasso::with_shape(hyper, &[3], Parallelism::None).unwrap();
        let k = Mat::<f64>::zeros(2, 2);
        let s = Mat::<f64>::zeros(2, 1);
        assert!(matches!(
            solver.fit(k.as_ref(), s.as_ref(), &SolverOptions::default(), None),
            Err(SolverError::FeatureMismatch { expected: 3, actual: 2 })
        ));
    }
}
