use core::fmt;

use faer_core::mul::matmul;
use faer_core::{mat, MatRef, Parallelism};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dimension::InverseGrid;
use crate::penalty::DifferenceOperator;
use crate::report::{emit_line, error_surface_table, SolveStatus};
use crate::solver::{
    check_system, column_energy, coordinate_descent, correlation, gram_matrix, Fit,
    Hyperparameters, SmoothLasso, SolverError, SolverOptions,
};

#[derive(Debug, Clone, PartialEq)]
pub enum CvError {
    /// Fewer than two folds were requested.
    InvalidFolds { folds: usize },
    /// The system has fewer rows than folds.
    DegenerateFolds { rows: usize, folds: usize },
    /// No alpha or no lambda to search.
    EmptyGrid,
    /// Every grid point produced a non-finite validation error.
    NoValidPoint,
    Solver(SolverError),
}

impl fmt::Display for CvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFolds { folds } => write!(f, "need at least 2 folds (got {folds})"),
            Self::DegenerateFolds { rows, folds } => {
                write!(f, "cannot split {rows} rows into {folds} folds")
            }
            Self::EmptyGrid => write!(f, "hyperparameter grid is empty"),
            Self::NoValidPoint => write!(f, "no grid point produced a finite validation error"),
            Self::Solver(err) => write!(f, "solver error: {err}"),
        }
    }
}

impl std::error::Error for CvError {}

impl From<SolverError> for CvError {
    fn from(err: SolverError) -> Self {
        Self::Solver(err)
    }
}

/// `count` values `10^e` with `e` evenly spaced from `start_exp` to `stop_exp`.
pub fn log_spaced(start_exp: f64, stop_exp: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![10f64.powf(start_exp)],
        _ => (0..count)
            .map(|i| {
                let t = i as f64 / (count - 1) as f64;
                10f64.powf(start_exp + (stop_exp - start_exp) * t)
            })
            .collect(),
    }
}

/// K-fold grid search over `(lambda, alpha)` for the smooth-LASSO solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothLassoCv {
    pub alphas: Vec<f64>,
    pub lambdas: Vec<f64>,
    pub folds: usize,
    /// Shuffle rows with this seed before splitting; contiguous blocks otherwise.
    pub shuffle_seed: Option<u64>,
    pub options: SolverOptions,
}

impl Default for SmoothLassoCv {
    fn default() -> Self {
        Self {
            alphas: log_spaced(-4.0, -7.0, 10),
            lambdas: log_spaced(-4.0, -6.0, 10),
            folds: 10,
            shuffle_seed: None,
            options: SolverOptions::default(),
        }
    }
}

struct FoldSystem {
    gram: Vec<f64>,
    rhs: Vec<f64>,
    energy: Vec<f64>,
    test_kernel: Vec<f64>,
    test_signal: Vec<f64>,
    test_rows: usize,
}

struct PointScore {
    error: f64,
    non_converged: usize,
}

impl SmoothLassoCv {
    pub fn new(alphas: Vec<f64>, lambdas: Vec<f64>, folds: usize) -> Self {
        Self {
            alphas,
            lambdas,
            folds,
            ..Self::default()
        }
    }

    pub fn with_shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    pub fn with_options(mut self, options: SolverOptions) -> Self {
        self.options = options;
        self
    }

    /// Scores every grid point, then refits the best pair on all rows.
    pub fn fit(
        &self,
        kernel: MatRef<'_, f64>,
        signal: MatRef<'_, f64>,
        grid: &InverseGrid,
        parallelism: Parallelism,
    ) -> Result<CvResult, CvError> {
        if self.folds < 2 {
            return Err(CvError::InvalidFolds { folds: self.folds });
        }
        if self.alphas.is_empty() || self.lambdas.is_empty() {
            return Err(CvError::EmptyGrid);
        }
        for &alpha in &self.alphas {
            Hyperparameters::new(alpha, 0.0)?;
        }
        for &lambda in &self.lambdas {
            Hyperparameters::new(0.0, lambda)?;
        }
        let n = grid.n_features();
        check_system(kernel, signal, n)?;
        let rows = kernel.nrows();
        if rows < self.folds {
            return Err(CvError::DegenerateFolds {
                rows,
                folds: self.folds,
            });
        }

        let penalty = DifferenceOperator::new(&grid.shape()).map_err(SolverError::from)?;
        let mut smoothness = vec![0.0; n * n];
        penalty.add_gram(&mut smoothness, 1.0);

        let folds: Vec<FoldSystem> = fold_assignment(rows, self.folds, self.shuffle_seed)
            .iter()
            .map(|test| fold_system(kernel, signal, test, parallelism))
            .collect();

        let options = SolverOptions {
            verbose: false,
            ..self.options.clone()
        };
        let cols = signal.ncols();
        let points: Vec<(usize, usize)> = (0..self.lambdas.len())
            .flat_map(|li| (0..self.alphas.len()).map(move |ai| (li, ai)))
            .collect();
        let scores: Vec<PointScore> = points
            .par_iter()
            .map(|&(li, ai)| {
                score_point(
                    &folds,
                    &smoothness,
                    self.alphas[ai],
                    self.lambdas[li],
                    cols,
                    &options,
                )
            })
            .collect();

        let mut best: Option<(usize, f64)> = None;
        for (idx, score) in scores.iter().enumerate() {
            if score.error.is_finite() && best.map_or(true, |(_, e)| score.error < e) {
                best = Some((idx, score.error));
            }
        }
        let (best_idx, best_error) = best.ok_or(CvError::NoValidPoint)?;
        let (li, ai) = points[best_idx];
        let hyper = Hyperparameters {
            alpha: self.alphas[ai],
            lambda: self.lambdas[li],
        };
        log::debug!(
            "cv: best alpha={:.3e}, lambda={:.3e}, error={best_error:.4e} over {} points",
            hyper.alpha,
            hyper.lambda,
            points.len()
        );
        let unconverged: usize = scores.iter().map(|s| s.non_converged).sum();
        if unconverged > 0 {
            log::warn!("cv: {unconverged} fold solves did not converge");
        }

        let solver = SmoothLasso::new(hyper, grid, parallelism)?;
        let fit = solver.fit(kernel, signal, &self.options, None)?;

        Ok(CvResult {
            alphas: self.alphas.clone(),
            lambdas: self.lambdas.clone(),
            error_surface: scores.iter().map(|s| s.error).collect(),
            non_converged: scores.iter().map(|s| s.non_converged).collect(),
            best: hyper,
            best_index: (li, ai),
            best_error,
            fit,
        })
    }
}

/// Held-out row sets, one per fold.
fn fold_assignment(rows: usize, folds: usize, seed: Option<u64>) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..rows).collect();
    if let Some(seed) = seed {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        order.shuffle(&mut rng);
    }
    (0..folds)
        .map(|k| {
            let mut block = order[k * rows / folds..(k + 1) * rows / folds].to_vec();
            block.sort_unstable();
            block
        })
        .collect()
}

fn fold_system(
    kernel: MatRef<'_, f64>,
    signal: MatRef<'_, f64>,
    test: &[usize],
    parallelism: Parallelism,
) -> FoldSystem {
    let (rows, n, cols) = (kernel.nrows(), kernel.ncols(), signal.ncols());
    let mut held_out = vec![false; rows];
    for &r in test {
        held_out[r] = true;
    }
    let train: Vec<usize> = (0..rows).filter(|&r| !held_out[r]).collect();
    let train_kernel = gather(kernel, &train);
    let train_signal = gather(signal, &train);
    let train_kernel = mat::from_column_major_slice::<f64>(&train_kernel, train.len(), n);
    let train_signal = mat::from_column_major_slice::<f64>(&train_signal, train.len(), cols);
    FoldSystem {
        gram: gram_matrix(train_kernel, parallelism),
        rhs: correlation(train_kernel, train_signal, parallelism),
        energy: (0..cols).map(|c| column_energy(train_signal, c)).collect(),
        test_kernel: gather(kernel, test),
        test_signal: gather(signal, test),
        test_rows: test.len(),
    }
}

/// Column-major copy of the given rows.
fn gather(source: MatRef<'_, f64>, rows: &[usize]) -> Vec<f64> {
    let mut out = Vec::with_capacity(rows.len() * source.ncols());
    for j in 0..source.ncols() {
        out.extend(rows.iter().map(|&r| source.read(r, j)));
    }
    out
}

fn score_point(
    folds: &[FoldSystem],
    smoothness: &[f64],
    alpha: f64,
    lambda: f64,
    cols: usize,
    options: &SolverOptions,
) -> PointScore {
    let n = folds[0].rhs.len() / cols;
    let mut total = 0.0;
    let mut non_converged = 0;
    let mut gram = vec![0.0; n * n];
    let mut coefficients = vec![0.0; n * cols];
    for fold in folds {
        for ((g, &base), &d) in gram.iter_mut().zip(&fold.gram).zip(smoothness) {
            *g = base + lambda * d;
        }
        coefficients.fill(0.0);
        for col in 0..cols {
            let stats = coordinate_descent(
                &gram,
                &fold.rhs[col * n..(col + 1) * n],
                fold.energy[col],
                alpha,
                options,
                &mut coefficients[col * n..(col + 1) * n],
                col,
                None,
            );
            match stats.status {
                SolveStatus::Converged => {}
                SolveStatus::MaxIterations => non_converged += 1,
                SolveStatus::NumericalFailure => {
                    return PointScore {
                        error: f64::NAN,
                        non_converged: non_converged + 1,
                    }
                }
            }
        }

        let test_kernel = mat::from_column_major_slice::<f64>(&fold.test_kernel, fold.test_rows, n);
        let test_signal = mat::from_column_major_slice::<f64>(&fold.test_signal, fold.test_rows, cols);
        let f = mat::from_column_major_slice::<f64>(&coefficients, n, cols);
        let mut predicted = vec![0.0; fold.test_rows * cols];
        matmul(
            mat::from_column_major_slice_mut::<f64>(&mut predicted, fold.test_rows, cols),
            test_kernel,
            f,
            None,
            1.0,
            Parallelism::None,
        );
        let mut sse = 0.0;
        for j in 0..cols {
            for i in 0..fold.test_rows {
                sse += (test_signal.read(i, j) - predicted[j * fold.test_rows + i]).powi(2);
            }
        }
        total += sse / (fold.test_rows * cols) as f64;
    }
    PointScore {
        error: total / folds.len() as f64,
        non_converged,
    }
}

/// Outcome of a cross-validated grid search.
#[derive(Debug, Clone)]
pub struct CvResult {
    alphas: Vec<f64>,
    lambdas: Vec<f64>,
    error_surface: Vec<f64>,
    non_converged: Vec<usize>,
    best: Hyperparameters,
    best_index: (usize, usize),
    best_error: f64,
    fit: Fit,
}

impl CvResult {
    pub fn alphas(&self) -> &[f64] {
        &self.alphas
    }

    pub fn lambdas(&self) -> &[f64] {
        &self.lambdas
    }

    /// Mean held-out squared error, lambda-major: `[li * alphas.len() + ai]`.
    pub fn error_surface(&self) -> &[f64] {
        &self.error_surface
    }

    pub fn error(&self, lambda_index: usize, alpha_index: usize) -> f64 {
        self.error_surface[lambda_index * self.alphas.len() + alpha_index]
    }

    /// Fold solves that hit the sweep limit, same layout as `error_surface`.
    pub fn non_converged(&self) -> &[usize] {
        &self.non_converged
    }

    pub fn best(&self) -> Hyperparameters {
        self.best
    }

    /// `(lambda_index, alpha_index)` of the best point.
    pub fn best_index(&self) -> (usize, usize) {
        self.best_index
    }

    pub fn best_error(&self) -> f64 {
        self.best_error
    }

    /// The refit on all rows at the best point.
    pub fn fit(&self) -> &Fit {
        &self.fit
    }

    pub fn into_fit(self) -> Fit {
        self.fit
    }

    pub fn error_surface_table(&self) -> String {
        error_surface_table(&self.alphas, &self.lambdas, &self.error_surface, self.best_index)
            .to_string()
    }

    /// Emits the error surface table line by line.
    pub fn report_error_surface(&self) {
        for line in self.error_surface_table().lines() {
            emit_line(line);
        }
    }
}
