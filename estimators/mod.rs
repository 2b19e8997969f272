//! Transition matrix estimators.
//!
//! Every estimator is configured once and consumes a dataset through `fit`, which always starts
//! from fresh accumulators and returns an owned estimate.

pub mod aalen_johansen;
pub mod cohort;
pub mod confint;
pub mod simple;

pub use aalen_johansen::{AalenJohansenEstimate, AalenJohansenEstimator};
pub use cohort::{CohortEstimate, CohortEstimator};
pub use confint::{
    ConfidenceIntervalConfig, ConfidenceIntervalError, ConfidenceMethod, RowIntervals,
    multinomial_intervals,
};
pub use simple::{SimpleEstimate, SimpleEstimator};

use crate::matrix::MatrixError;
use crate::matrix_set::MatrixSetError;
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis, s};
use std::fmt::Write as _;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("Confidence interval error: {0}")]
    ConfidenceInterval(#[from] ConfidenceIntervalError),
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    #[error(transparent)]
    MatrixSet(#[from] MatrixSetError),
    #[error("The state space is empty.")]
    EmptyStateSpace,
    #[error("At least one cohort is required.")]
    NoCohorts,
    #[error("Period {period} is out of range; the estimate holds {periods} periods.")]
    PeriodOutOfRange { period: usize, periods: usize },
}

/// Simultaneous interval bounds indexed `[from, to, period]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceBounds {
    pub config: ConfidenceIntervalConfig,
    pub lower: Array3<f64>,
    pub upper: Array3<f64>,
    /// Rows where the Sison-Glaz search failed and `(0, 1)` was used instead.
    pub fallbacks: usize,
}

/// Intervals for every origin row of every period of a `[from, to, period]` count tensor.
pub(crate) fn confidence_bounds(
    counts: ArrayView3<'_, f64>,
    config: &ConfidenceIntervalConfig,
) -> Result<ConfidenceBounds, ConfidenceIntervalError> {
    let (states, targets, periods) = counts.dim();
    let mut lower = Array3::zeros((states, targets, periods));
    let mut upper = Array3::ones((states, targets, periods));
    let mut fallbacks = 0usize;
    for k in 0..periods {
        for origin in 0..states {
            let row: Vec<f64> = counts.slice(s![origin, .., k]).to_vec();
            let intervals = match multinomial_intervals(&row, config) {
                Ok(intervals) => intervals,
                Err(ConfidenceIntervalError::SisonGlazNoSolution { total }) => {
                    log::warn!(
                        "Sison-Glaz search failed for state {origin} in period {k} ({total} observations); using (0, 1)"
                    );
                    fallbacks += 1;
                    RowIntervals::uninformative(targets)
                }
                Err(other) => return Err(other),
            };
            for t in 0..targets {
                lower[[origin, t, k]] = intervals.lower[t];
                upper[[origin, t, k]] = intervals.upper[t];
            }
        }
    }
    Ok(ConfidenceBounds {
        config: *config,
        lower,
        upper,
        fallbacks,
    })
}

/// Row-wise normalisation of `counts` by `population`; rows without population stay zero.
pub(crate) fn normalize_rows(counts: ArrayView2<'_, f64>, population: &[f64]) -> Array2<f64> {
    let mut values = counts.to_owned();
    for (mut row, &total) in values.axis_iter_mut(Axis(0)).zip(population) {
        if total > 0.0 {
            row.mapv_inplace(|v| v / total);
        } else {
            row.fill(0.0);
        }
    }
    values
}

const RULE: &str =
    "==============================================================================";
const THIN_RULE: &str =
    "------------------------------------------------------------------------------";
const DOTTED_RULE: &str =
    "..............................................................................";

/// Tabular summary of one period: value per cell, with interval bounds when available.
pub(crate) fn summary_table(
    values: ArrayView2<'_, f64>,
    bounds: Option<(&ConfidenceBounds, usize)>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:^78}", "Transition Matrix Estimation Results");
    let _ = writeln!(out, "{RULE}");
    let (rows, cols) = values.dim();
    match bounds {
        Some((ci, k)) => {
            let _ = writeln!(out, "Confidence Level: {:.1}%", 100.0 * (1.0 - ci.config.alpha));
            let _ = writeln!(out, "Confidence Interval Method: {}", ci.config.method);
            let _ = writeln!(out, "{THIN_RULE}");
            let _ = writeln!(out, "Row  Col  Lower Bound      Value   Upper Bound");
            for s1 in 0..rows {
                for s2 in 0..cols {
                    let _ = writeln!(
                        out,
                        "{:3} {:4} {:12.6} {:10.6} {:12.6}",
                        s1,
                        s2,
                        ci.lower[[s1, s2, k]],
                        values[[s1, s2]],
                        ci.upper[[s1, s2, k]]
                    );
                }
                let _ = writeln!(out, "{DOTTED_RULE}");
            }
        }
        None => {
            let _ = writeln!(out, "Row  Col  Value");
            for s1 in 0..rows {
                for s2 in 0..cols {
                    let _ = writeln!(out, "{:3} {:4} {:10.6}", s1, s2, values[[s1, s2]]);
                }
                let _ = writeln!(out, "{DOTTED_RULE}");
            }
        }
    }
    let _ = writeln!(out, "{RULE}");
    out
}

fn write_grid(out: &mut String, values: ArrayView2<'_, f64>, decimals: usize) {
    for row in values.outer_iter() {
        let cells: Vec<String> = row.iter().map(|v| format!("{v:>10.decimals$}")).collect();
        let _ = writeln!(out, "{}", cells.join(" "));
    }
}

/// "Period / Starting Count / Migration Counts" listing for one period.
pub(crate) fn counts_listing(period: usize, population: &[f64], counts: ArrayView2<'_, f64>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Period: {period}");
    let _ = writeln!(out, "Starting Count:");
    let starting: Vec<String> = population.iter().map(|v| format!("{v:>10.0}")).collect();
    let _ = writeln!(out, "{}", starting.join(" "));
    let _ = writeln!(out, "Migration Counts:");
    write_grid(&mut out, counts, 0);
    out
}

/// "Period / frequencies" listing for one period.
pub(crate) fn frequencies_listing(period: usize, values: ArrayView2<'_, f64>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Period: {period}");
    write_grid(&mut out, values, 6);
    out
}
