use comfy_table::{presets, Cell, CellAlignment, ContentArrangement, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// The largest coordinate update fell below the tolerance.
    Converged,
    /// The sweep budget ran out first; the iterate is returned as-is.
    MaxIterations,
    /// A non-finite value appeared in the iterate or objective.
    NumericalFailure,
}

impl SolveStatus {
    pub fn is_converged(self) -> bool {
        matches!(self, Self::Converged)
    }
}

#[derive(Debug, Clone)]
pub struct SolverStats {
    pub status: SolveStatus,
    pub iterations: usize,
    /// `||K f - s||^2 + alpha ||f||_1 + lambda ||D f||^2` at the returned iterate.
    pub objective: f64,
    pub max_update: f64,
    pub nonzero: usize,
}

#[derive(Debug, Clone)]
pub struct IterationReport {
    /// Signal column being solved.
    pub column: usize,
    pub iteration: usize,
    pub objective: f64,
    pub max_update: f64,
    pub nonzero: usize,
}

pub(crate) fn emit_line(line: &str) {
    if log::log_enabled!(log::Level::Info) {
        log::info!("{line}");
    } else {
        println!("{line}");
    }
}

pub trait Reporter {
    fn on_iteration(&mut self, report: &IterationReport);
    fn on_finish(&mut self) {}
}

/// Collects per-sweep reports and prints them as one table when a fit ends.
pub struct StdoutReporter {
    rows: Vec<IterationReport>,
}

impl StdoutReporter {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }
}

impl Default for StdoutReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for StdoutReporter {
    fn on_iteration(&mut self, report: &IterationReport) {
        self.rows.push(report.clone());
    }

    fn on_finish(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        if !log::log_enabled!(log::Level::Info) {
            println!();
        }
        let mut table = Table::new();
        table.load_preset(presets::UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("col").set_alignment(CellAlignment::Right),
            Cell::new("sweep").set_alignment(CellAlignment::Right),
            Cell::new("objective").set_alignment(CellAlignment::Right),
            Cell::new("update").set_alignment(CellAlignment::Right),
            Cell::new("nonzero").set_alignment(CellAlignment::Right),
        ]);
        for row in &self.rows {
            table.add_row(vec![
                Cell::new(row.column).set_alignment(CellAlignment::Right),
                Cell::new(row.iteration).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.4e}", row.objective)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.1e}", row.max_update)).set_alignment(CellAlignment::Right),
                Cell::new(row.nonzero).set_alignment(CellAlignment::Right),
            ]);
        }

        for line in table.to_string().lines() {
            emit_line(line);
        }
        self.rows.clear();
    }
}

/// Table of a cross-validation error surface: one row per lambda, one column per alpha.
pub(crate) fn error_surface_table(
    alphas: &[f64],
    lambdas: &[f64],
    errors: &[f64],
    best: (usize, usize),
) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    let mut header = vec![Cell::new("lambda \\ alpha")];
    header.extend(
        alphas
            .iter()
            .map(|a| Cell::new(format!("{a:.2e}")).set_alignment(CellAlignment::Right)),
    );
    table.set_header(header);
    for (li, lambda) in lambdas.iter().enumerate() {
        let mut row = vec![Cell::new(format!("{lambda:.2e}")).set_alignment(CellAlignment::Right)];
        for ai in 0..alphas.len() {
            let err = errors[li * alphas.len() + ai];
            let text = if (li, ai) == best {
                format!("*{err:.3e}")
            } else {
                format!("{err:.3e}")
            };
            row.push(Cell::new(text).set_alignment(CellAlignment::Right));
        }
        table.add_row(row);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_best_point() {
        let table = error_surface_table(&[0.1, 0.01], &[1.0], &[2.0, 1.0], (0, 1));
        let text = table.to_string();
        assert!(text.contains("*1.000e0"));
        assert!(text.contains("2.000e0"));
    }
}
